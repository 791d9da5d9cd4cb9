//! WASAPI microphone source.
//!
//! Opens a capture endpoint in shared mode on a dedicated thread registered
//! with MMCSS, regroups device packets into quanta, and drives the session's
//! capture worklet once per quantum.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::bounded;
use windows::core::*;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;
use windows::Win32::System::Threading::*;

use mic_relay_core::{
    AudioSource, CaptureWorklet, LossReporter, MicrophoneSource, QuantumAssembler, ResourceFailure, SessionConfig,
    StreamFormat,
};

use crate::com::ComGuard;
use crate::device_enumerator::DeviceEnumerator;
use crate::error::WindowsAudioError;
use crate::permissions;

/// Shared-mode buffer requested from the audio engine: 100 ms in 100 ns units.
const BUFFER_DURATION_HNS: i64 = 1_000_000;

/// Microphone source backed by a WASAPI capture endpoint.
pub struct WasapiMicrophone {
    device_id: Option<String>,
    info: AudioSource,
    format: Option<StreamFormat>,
    running: Arc<AtomicBool>,
    capture_handle: Option<thread::JoinHandle<()>>,
}

impl WasapiMicrophone {
    /// Source for the system default microphone, or the session's
    /// `device_id` if the config names one.
    pub fn default_device() -> Self {
        Self::build(None, "Default Microphone".into(), true)
    }

    /// Source for a specific endpoint as returned by
    /// [`DeviceEnumerator::list_capture_devices`].
    pub fn with_device(device: AudioSource) -> Self {
        Self {
            device_id: Some(device.id.clone()),
            info: device,
            format: None,
            running: Arc::new(AtomicBool::new(false)),
            capture_handle: None,
        }
    }

    fn build(device_id: Option<String>, name: String, is_default: bool) -> Self {
        Self {
            info: AudioSource {
                id: device_id.clone().unwrap_or_else(|| "default-mic".into()),
                name,
                is_default,
                transport_type: None,
            },
            device_id,
            format: None,
            running: Arc::new(AtomicBool::new(false)),
            capture_handle: None,
        }
    }

    /// Resolve the endpoint and read its mix rate on the calling thread.
    fn probe(&mut self) -> std::result::Result<u32, WindowsAudioError> {
        let _com = ComGuard::init()?;
        let enumerator = DeviceEnumerator::new()?;
        if let Ok(info) = enumerator.describe(self.device_id.as_deref()) {
            self.info = info;
        }
        let device = enumerator.capture_device(self.device_id.as_deref())?;
        unsafe {
            let client: IAudioClient = device
                .Activate(CLSCTX_ALL, None)
                .map_err(|e| WindowsAudioError::ClientSetup(format!("Activate failed: {}", e)))?;
            let mix_format = client
                .GetMixFormat()
                .map_err(|e| WindowsAudioError::ClientSetup(format!("GetMixFormat failed: {}", e)))?;
            let sample_rate = (*mix_format).nSamplesPerSec;
            CoTaskMemFree(Some(mix_format as *const _));
            Ok(sample_rate)
        }
    }
}

impl MicrophoneSource for WasapiMicrophone {
    fn acquire(&mut self, config: &SessionConfig) -> std::result::Result<StreamFormat, ResourceFailure> {
        if self.device_id.is_none() {
            self.device_id = config.device_id.clone();
        }
        match permissions::check_microphone_permission() {
            Ok(true) => {}
            Ok(false) => return Err(ResourceFailure::PermissionDenied),
            Err(e) => return Err(e.into()),
        }

        let sample_rate = self.probe().map_err(ResourceFailure::from)?;
        if sample_rate != config.sample_rate_hint {
            log::info!(
                "microphone runs at {} Hz (requested {} Hz)",
                sample_rate,
                config.sample_rate_hint
            );
        }
        let format = StreamFormat {
            sample_rate,
            quantum_frames: config.quantum_frames,
        };
        self.format = Some(format);
        Ok(format)
    }

    fn attach(&mut self, worklet: CaptureWorklet, loss: LossReporter) -> std::result::Result<(), ResourceFailure> {
        let format = self
            .format
            .ok_or_else(|| ResourceFailure::RegistrationFailed("microphone not acquired".into()))?;
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ResourceFailure::RegistrationFailed("capture already running".into()));
        }

        let running = Arc::clone(&self.running);
        let device_id = self.device_id.clone();
        let (ready_tx, ready_rx) = bounded(1);

        let handle = thread::Builder::new()
            .name("mic-relay-wasapi".into())
            .spawn(move || {
                let mut worklet = worklet;
                let result = capture_loop(&running, device_id, format, &mut worklet, |started| {
                    let _ = ready_tx.send(started);
                });
                if let Err(e) = result {
                    if running.load(Ordering::SeqCst) {
                        log::error!("microphone capture stopped: {}", e);
                        loss.report(e.into());
                    }
                }
                // Report before the worklet's port goes away.
                drop(worklet);
                running.store(false, Ordering::SeqCst);
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                ResourceFailure::RegistrationFailed(format!("failed to spawn capture thread: {}", e))
            })?;
        self.capture_handle = Some(handle);

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.release();
                Err(e.into())
            }
            Err(_) => {
                self.release();
                Err(ResourceFailure::RegistrationFailed("capture thread exited during setup".into()))
            }
        }
    }

    fn release(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.capture_handle.take() {
            let _ = handle.join();
        }
        self.format = None;
    }

    fn device_info(&self) -> AudioSource {
        self.info.clone()
    }
}

impl Drop for WasapiMicrophone {
    fn drop(&mut self) {
        self.release();
    }
}

/// Capture thread body.
///
/// Sequence:
/// 1. Join the MTA and open the endpoint (default or by ID)
/// 2. Initialize a shared-mode `IAudioClient` on the mix format
/// 3. Register with MMCSS for real-time priority
/// 4. Start, report readiness, then poll packets into quanta
///
/// Setup failures go to `ready`; failures after that are returned so the
/// caller can report the device as lost.
fn capture_loop<R>(
    running: &AtomicBool,
    device_id: Option<String>,
    format: StreamFormat,
    worklet: &mut CaptureWorklet,
    ready: R,
) -> std::result::Result<(), WindowsAudioError>
where
    R: FnOnce(std::result::Result<(), WindowsAudioError>),
{
    let setup = (|| -> std::result::Result<_, WindowsAudioError> {
        unsafe {
            let com = ComGuard::init()?;
            let enumerator = DeviceEnumerator::new()?;
            let device = enumerator.capture_device(device_id.as_deref())?;

            let audio_client: IAudioClient = device
                .Activate(CLSCTX_ALL, None)
                .map_err(|e| WindowsAudioError::ClientSetup(format!("Activate failed: {}", e)))?;
            let mix_format_ptr = audio_client
                .GetMixFormat()
                .map_err(|e| WindowsAudioError::ClientSetup(format!("GetMixFormat failed: {}", e)))?;
            let channels = (*mix_format_ptr).nChannels as usize;

            let initialized = audio_client.Initialize(
                AUDCLNT_SHAREMODE_SHARED,
                AUDCLNT_STREAMFLAGS_NOPERSIST,
                BUFFER_DURATION_HNS,
                0,
                mix_format_ptr,
                None,
            );
            CoTaskMemFree(Some(mix_format_ptr as *const _));
            initialized.map_err(|e| WindowsAudioError::ClientSetup(format!("Initialize failed: {}", e)))?;

            let capture_client: IAudioCaptureClient = audio_client
                .GetService()
                .map_err(|e| WindowsAudioError::ClientSetup(format!("GetService failed: {}", e)))?;

            let mut task_index: u32 = 0;
            if AvSetMmThreadCharacteristicsW(w!("Pro Audio"), &mut task_index).is_err() {
                log::warn!("could not register capture thread with MMCSS");
            }

            audio_client
                .Start()
                .map_err(|e| WindowsAudioError::ClientSetup(format!("Start failed: {}", e)))?;

            Ok((com, audio_client, capture_client, channels))
        }
    })();

    let (_com, audio_client, capture_client, channels) = match setup {
        Ok(parts) => {
            ready(Ok(()));
            parts
        }
        Err(e) => {
            ready(Err(e));
            return Ok(());
        }
    };
    log::info!(
        "WASAPI capture started: {} Hz, {} channel(s), {} frames per quantum",
        format.sample_rate,
        channels,
        format.quantum_frames
    );

    let mut assembler = QuantumAssembler::new(format.quantum_frames);
    let mut silence: Vec<f32> = Vec::new();
    let mut alive = true;

    let result = (|| -> std::result::Result<(), WindowsAudioError> {
        unsafe {
            while alive && running.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(5));

                let mut packet_length = capture_client.GetNextPacketSize().map_err(device_error)?;
                while packet_length > 0 && alive {
                    let mut buffer_ptr: *mut u8 = std::ptr::null_mut();
                    let mut num_frames: u32 = 0;
                    let mut flags: u32 = 0;
                    capture_client
                        .GetBuffer(&mut buffer_ptr, &mut num_frames, &mut flags, None, None)
                        .map_err(device_error)?;

                    let total_samples = num_frames as usize * channels;
                    if total_samples > 0 && !buffer_ptr.is_null() {
                        // Shared mode delivers the mix format, which is Float32.
                        let samples: &[f32] = if flags & (AUDCLNT_BUFFERFLAGS_SILENT.0 as u32) != 0 {
                            silence.resize(total_samples, 0.0);
                            &silence[..total_samples]
                        } else {
                            std::slice::from_raw_parts(buffer_ptr as *const f32, total_samples)
                        };
                        assembler.push_interleaved(samples, channels, |quantum| {
                            if alive {
                                let port: &[&[f32]] = &[quantum];
                                alive = worklet.process(&[port]);
                            }
                        });
                    }

                    capture_client.ReleaseBuffer(num_frames).map_err(device_error)?;
                    packet_length = capture_client.GetNextPacketSize().map_err(device_error)?;
                }
            }
            Ok(())
        }
    })();

    unsafe {
        let _ = audio_client.Stop();
    }
    log::info!("WASAPI capture stopped");
    result
}

fn device_error(e: Error) -> WindowsAudioError {
    if e.code() == AUDCLNT_E_DEVICE_INVALIDATED {
        WindowsAudioError::DeviceInvalidated(e.message().to_string())
    } else {
        WindowsAudioError::Com(e.to_string())
    }
}
