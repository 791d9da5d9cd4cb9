use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// One quantum of mono microphone samples.
///
/// Immutable once built. Cloning shares the sample storage, so a sink that
/// keeps a frame never observes later writes by the capture side.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    sequence: u64,
    samples: Arc<[f32]>,
}

impl AudioFrame {
    pub fn new(sequence: u64, samples: Vec<f32>) -> Self {
        Self {
            sequence,
            samples: samples.into(),
        }
    }

    /// Copy `samples` into a new frame with a single allocation.
    pub fn from_slice(sequence: u64, samples: &[f32]) -> Self {
        Self {
            sequence,
            samples: Arc::from(samples),
        }
    }

    /// Position of this frame in the worklet's production order.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Format negotiated with the microphone when it is acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub quantum_frames: usize,
}

/// Transport type for an audio device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioTransportType {
    BuiltIn,
    Bluetooth,
    BluetoothLE,
    Usb,
    Virtual,
    Unknown,
}

/// A microphone available for capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSource {
    pub id: String,
    pub name: String,
    pub is_default: bool,
    pub transport_type: Option<AudioTransportType>,
}

/// Microphone level metering (RMS and peak, 0.0–1.0).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioLevels {
    pub rms: f32,
    pub peak: f32,
}

/// Frame accounting for a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDiagnostics {
    /// Frames the relay took off the channel.
    pub frames_received: u64,
    /// Frames handed to the sink successfully.
    pub frames_forwarded: u64,
    /// Frames dropped by the mute gate.
    pub frames_gated: u64,
    /// Frames dropped because the sink queue was full.
    pub frames_dropped: u64,
    /// Quanta the worklet withheld because the channel was full.
    pub worklet_overruns: u64,
    /// Blocking hand-offs that hit the backpressure timeout.
    pub backpressure_timeouts: u64,
}
