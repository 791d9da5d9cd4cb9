use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::channel::frame_channel::{FramePort, PostError};
use crate::models::audio_models::AudioFrame;

/// One quantum of input as delivered by the audio thread:
/// `ports → channels → samples`.
pub type QuantumInputs<'a> = &'a [&'a [&'a [f32]]];

/// State shared between a worklet and the controller that registered it.
///
/// All fields are atomics; nothing here is locked on the audio thread.
#[derive(Debug)]
pub struct WorkletShared {
    active: AtomicBool,
    next_sequence: AtomicU64,
    overruns: AtomicU64,
    dropped: AtomicBool,
}

/// Controller-side handle on a registered worklet.
#[derive(Debug, Clone)]
pub struct WorkletHandle {
    shared: Arc<WorkletShared>,
}

impl WorkletHandle {
    /// Ask the worklet to stop. It reports `false` on its next quantum.
    pub fn stop(&self) {
        self.shared.active.store(false, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
    }

    /// Sequence number the next emitted frame will carry.
    pub fn next_sequence(&self) -> u64 {
        self.shared.next_sequence.load(Ordering::Acquire)
    }

    /// Quanta withheld because the channel was full.
    pub fn overruns(&self) -> u64 {
        self.shared.overruns.load(Ordering::Relaxed)
    }

    /// Whether the source already let go of the worklet.
    pub fn is_dropped(&self) -> bool {
        self.shared.dropped.load(Ordering::Acquire)
    }
}

/// Real-time half of the pipeline.
///
/// Driven once per quantum by a microphone source's audio thread. Copies the
/// first channel of the first input port into an [`AudioFrame`] and posts it.
/// `process` never blocks, logs, or takes a lock; its only allocation is the
/// frame's own sample storage, exactly one quantum long.
#[derive(Debug)]
pub struct CaptureWorklet {
    port: FramePort,
    shared: Arc<WorkletShared>,
    finished: bool,
}

impl CaptureWorklet {
    pub fn new(port: FramePort) -> (Self, WorkletHandle) {
        let shared = Arc::new(WorkletShared {
            active: AtomicBool::new(true),
            next_sequence: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
            dropped: AtomicBool::new(false),
        });
        let handle = WorkletHandle {
            shared: Arc::clone(&shared),
        };
        (
            Self {
                port,
                shared,
                finished: false,
            },
            handle,
        )
    }

    /// Process one quantum. Returns whether the worklet wants to be scheduled
    /// again; once it returns `false` it always will.
    pub fn process(&mut self, inputs: QuantumInputs<'_>) -> bool {
        if self.finished {
            return false;
        }
        if !self.shared.active.load(Ordering::Acquire) {
            self.finished = true;
            return false;
        }

        let Some(samples) = inputs.first().and_then(|port| port.first()) else {
            return true;
        };
        if samples.is_empty() {
            return true;
        }

        let sequence = self.shared.next_sequence.fetch_add(1, Ordering::AcqRel);
        match self.port.post(AudioFrame::from_slice(sequence, samples)) {
            Ok(()) => {}
            Err(PostError::Full) => {
                self.shared.overruns.fetch_add(1, Ordering::Relaxed);
            }
            Err(PostError::Closed) => {
                // Closing always follows `stop`, so an active worklet here means
                // the controller tore the channel down out of order.
                debug_assert!(
                    !self.shared.active.load(Ordering::Acquire),
                    "frame channel closed while worklet still active"
                );
                self.finished = true;
                return false;
            }
        }
        true
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl Drop for CaptureWorklet {
    fn drop(&mut self) {
        self.shared.dropped.store(true, Ordering::Release);
    }
}
