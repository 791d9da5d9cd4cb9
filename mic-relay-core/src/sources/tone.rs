use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::channel::frame_channel::LossReporter;
use crate::models::audio_models::{AudioSource, AudioTransportType, StreamFormat};
use crate::models::config::SessionConfig;
use crate::models::error::ResourceFailure;
use crate::processing::quantizer::QuantumAssembler;
use crate::traits::microphone::MicrophoneSource;
use crate::worklet::capture_worklet::CaptureWorklet;

/// Device callbacks per second the synthetic device simulates (10 ms buffers).
const CALLBACKS_PER_SEC: u32 = 100;

/// Synthetic sine-wave microphone driven by its own paced thread.
///
/// The thread produces 10 ms device buffers, regroups them into quanta, and
/// runs the worklet once per quantum, the way a hardware backend would.
pub struct ToneMicrophone {
    frequency: f32,
    amplitude: f32,
    format: Option<StreamFormat>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ToneMicrophone {
    pub fn new(frequency: f32, amplitude: f32) -> Self {
        Self {
            frequency,
            amplitude: amplitude.clamp(0.0, 1.0),
            format: None,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }
}

impl MicrophoneSource for ToneMicrophone {
    fn acquire(&mut self, config: &SessionConfig) -> Result<StreamFormat, ResourceFailure> {
        let format = StreamFormat {
            sample_rate: config.sample_rate_hint,
            quantum_frames: config.quantum_frames,
        };
        self.format = Some(format);
        Ok(format)
    }

    fn attach(&mut self, mut worklet: CaptureWorklet, _loss: LossReporter) -> Result<(), ResourceFailure> {
        let format = self
            .format
            .ok_or_else(|| ResourceFailure::RegistrationFailed("tone source not acquired".into()))?;

        let running = Arc::clone(&self.running);
        running.store(true, Ordering::SeqCst);
        let frequency = self.frequency;
        let amplitude = self.amplitude;

        let handle = thread::Builder::new()
            .name("mic-relay-tone".into())
            .spawn(move || {
                let buffer_len = (format.sample_rate / CALLBACKS_PER_SEC).max(1) as usize;
                let period = Duration::from_secs(1) / CALLBACKS_PER_SEC;
                let step = TAU * frequency / format.sample_rate as f32;

                let mut assembler = QuantumAssembler::new(format.quantum_frames);
                let mut buffer = vec![0.0f32; buffer_len];
                let mut phase = 0.0f32;
                let mut next_tick = Instant::now();
                let mut alive = true;

                while alive && running.load(Ordering::Acquire) {
                    for sample in buffer.iter_mut() {
                        *sample = amplitude * phase.sin();
                        phase = (phase + step) % TAU;
                    }
                    assembler.push_interleaved(&buffer, 1, |quantum| {
                        if alive {
                            let port: &[&[f32]] = &[quantum];
                            alive = worklet.process(&[port]);
                        }
                    });

                    next_tick += period;
                    let now = Instant::now();
                    if next_tick > now {
                        thread::sleep(next_tick - now);
                    }
                }
            })
            .map_err(|e| ResourceFailure::RegistrationFailed(format!("failed to spawn tone thread: {}", e)))?;

        self.thread = Some(handle);
        Ok(())
    }

    fn release(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        self.format = None;
    }

    fn device_info(&self) -> AudioSource {
        AudioSource {
            id: "tone".into(),
            name: format!("Tone {} Hz", self.frequency),
            is_default: false,
            transport_type: Some(AudioTransportType::Virtual),
        }
    }
}

impl Drop for ToneMicrophone {
    fn drop(&mut self) {
        self.release();
    }
}
