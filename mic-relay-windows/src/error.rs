use thiserror::Error;

use mic_relay_core::ResourceFailure;

/// Failures raised while talking to WASAPI and the MMDevice API.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WindowsAudioError {
    #[error("COM call failed: {0}")]
    Com(String),

    #[error("no matching capture device")]
    DeviceNotFound,

    #[error("microphone access denied by privacy settings")]
    AccessDenied,

    #[error("capture device invalidated: {0}")]
    DeviceInvalidated(String),

    #[error("audio client setup failed: {0}")]
    ClientSetup(String),
}

impl From<WindowsAudioError> for ResourceFailure {
    fn from(err: WindowsAudioError) -> Self {
        match err {
            WindowsAudioError::AccessDenied => ResourceFailure::PermissionDenied,
            WindowsAudioError::DeviceNotFound => ResourceFailure::DeviceNotAvailable,
            WindowsAudioError::DeviceInvalidated(msg) => ResourceFailure::DeviceLost(msg),
            WindowsAudioError::Com(msg) | WindowsAudioError::ClientSetup(msg) => {
                ResourceFailure::RegistrationFailed(msg)
            }
        }
    }
}
