use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::channel::frame_channel::LossReporter;
use crate::models::audio_models::{AudioSource, AudioTransportType, StreamFormat};
use crate::models::config::SessionConfig;
use crate::models::error::ResourceFailure;
use crate::traits::microphone::MicrophoneSource;
use crate::worklet::capture_worklet::CaptureWorklet;

#[derive(Default)]
struct Slot {
    worklet: Option<CaptureWorklet>,
    loss: Option<LossReporter>,
}

#[derive(Debug, Default)]
struct CallCounts {
    acquired: AtomicU64,
    released: AtomicU64,
}

/// Microphone whose quanta are pushed by the host through a [`QuantumFeeder`].
///
/// For hosts that already own an audio callback and for deterministic tests.
/// Acquisition and attachment can be scripted to fail.
pub struct ScriptedMicrophone {
    slot: Arc<Mutex<Slot>>,
    counts: Arc<CallCounts>,
    deny: Option<ResourceFailure>,
    fail_attach: Option<ResourceFailure>,
    sample_rate: Option<u32>,
    name: String,
}

impl ScriptedMicrophone {
    pub fn new() -> (Self, QuantumFeeder) {
        let slot = Arc::new(Mutex::new(Slot::default()));
        let counts = Arc::new(CallCounts::default());
        let feeder = QuantumFeeder {
            slot: Arc::clone(&slot),
            counts: Arc::clone(&counts),
        };
        (
            Self {
                slot,
                counts,
                deny: None,
                fail_attach: None,
                sample_rate: None,
                name: "Scripted Microphone".into(),
            },
            feeder,
        )
    }

    /// Make `acquire` fail with `reason`.
    pub fn deny_with(mut self, reason: ResourceFailure) -> Self {
        self.deny = Some(reason);
        self
    }

    /// Make `attach` fail with `reason` after a successful `acquire`.
    pub fn fail_attach_with(mut self, reason: ResourceFailure) -> Self {
        self.fail_attach = Some(reason);
        self
    }

    /// Report this rate instead of the configured hint.
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = Some(sample_rate);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl MicrophoneSource for ScriptedMicrophone {
    fn acquire(&mut self, config: &SessionConfig) -> Result<StreamFormat, ResourceFailure> {
        if let Some(ref reason) = self.deny {
            return Err(reason.clone());
        }
        self.counts.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(StreamFormat {
            sample_rate: self.sample_rate.unwrap_or(config.sample_rate_hint),
            quantum_frames: config.quantum_frames,
        })
    }

    fn attach(&mut self, worklet: CaptureWorklet, loss: LossReporter) -> Result<(), ResourceFailure> {
        if let Some(ref reason) = self.fail_attach {
            return Err(reason.clone());
        }
        let mut slot = self.slot.lock();
        slot.worklet = Some(worklet);
        slot.loss = Some(loss);
        Ok(())
    }

    fn release(&mut self) {
        let mut slot = self.slot.lock();
        slot.worklet = None;
        slot.loss = None;
        self.counts.released.fetch_add(1, Ordering::SeqCst);
    }

    fn device_info(&self) -> AudioSource {
        AudioSource {
            id: "scripted".into(),
            name: self.name.clone(),
            is_default: false,
            transport_type: Some(AudioTransportType::Virtual),
        }
    }
}

/// Host side of a [`ScriptedMicrophone`]: runs the attached worklet on the
/// caller's thread, one quantum per call.
#[derive(Clone)]
pub struct QuantumFeeder {
    slot: Arc<Mutex<Slot>>,
    counts: Arc<CallCounts>,
}

impl QuantumFeeder {
    /// Run one quantum of mono input. Returns the worklet's liveness, or
    /// `false` when nothing is attached.
    pub fn feed(&self, samples: &[f32]) -> bool {
        let port: &[&[f32]] = &[samples];
        self.process(&[port])
    }

    /// Run one quantum whose input port carries no channels.
    pub fn feed_empty(&self) -> bool {
        self.process(&[])
    }

    fn process(&self, inputs: &[&[&[f32]]]) -> bool {
        match self.slot.lock().worklet.as_mut() {
            Some(worklet) => worklet.process(inputs),
            None => false,
        }
    }

    /// Report the device as lost. The worklet stays attached until release,
    /// as a real device callback would.
    pub fn simulate_loss(&self, reason: ResourceFailure) -> bool {
        match self.slot.lock().loss.as_ref() {
            Some(loss) => {
                loss.report(reason);
                true
            }
            None => false,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.slot.lock().worklet.is_some()
    }

    pub fn acquire_count(&self) -> u64 {
        self.counts.acquired.load(Ordering::SeqCst)
    }

    pub fn release_count(&self) -> u64 {
        self.counts.released.load(Ordering::SeqCst)
    }
}
