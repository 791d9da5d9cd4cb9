use crate::channel::frame_channel::LossReporter;
use crate::models::audio_models::{AudioSource, StreamFormat};
use crate::models::config::SessionConfig;
use crate::models::error::ResourceFailure;
use crate::worklet::capture_worklet::CaptureWorklet;

/// Interface for microphone backends.
///
/// Implemented by:
/// - `ScriptedMicrophone` (quanta pushed by the host)
/// - `ToneMicrophone` (synthetic, paced thread)
/// - `WasapiMicrophone` (Windows)
///
/// The controller calls `acquire`, then `attach`, and `release` exactly once
/// for every successful `acquire`, on every exit path.
pub trait MicrophoneSource: Send + 'static {
    /// Claim the device. Fails with `PermissionDenied` or
    /// `DeviceNotAvailable`; nothing is held on failure.
    fn acquire(&mut self, config: &SessionConfig) -> Result<StreamFormat, ResourceFailure>;

    /// Start driving `worklet` once per quantum on the source's real-time
    /// context. A device that disappears later is reported through `loss`.
    fn attach(&mut self, worklet: CaptureWorklet, loss: LossReporter) -> Result<(), ResourceFailure>;

    /// Stop driving the worklet, join any audio thread, and give the device back.
    fn release(&mut self);

    /// Information about the device backing this source.
    fn device_info(&self) -> AudioSource;
}
