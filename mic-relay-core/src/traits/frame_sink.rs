use crate::models::audio_models::AudioFrame;
use crate::models::error::SinkError;

/// Downstream consumer of relayed frames (transport, storage, test harness).
///
/// Called from the controller's sink thread, never from the audio thread,
/// so implementations may block on I/O.
pub trait FrameSink: Send + 'static {
    /// Consume one frame. An error ends the session with `SinkFailure`.
    fn send(&mut self, frame: &AudioFrame) -> Result<(), SinkError>;

    /// Flush and release the sink. Called once after the last `send`.
    fn close(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

impl<K: FrameSink + ?Sized> FrameSink for Box<K> {
    fn send(&mut self, frame: &AudioFrame) -> Result<(), SinkError> {
        (**self).send(frame)
    }

    fn close(&mut self) -> Result<(), SinkError> {
        (**self).close()
    }
}
