use thiserror::Error;

use super::state::{SessionEvent, SessionState};

/// Why the microphone could not be acquired, attached, or kept.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResourceFailure {
    #[error("permission denied")]
    PermissionDenied,

    #[error("device not available")]
    DeviceNotAvailable,

    #[error("device lost: {0}")]
    DeviceLost(String),

    #[error("registration failed: {0}")]
    RegistrationFailed(String),
}

/// Failure reported by a [`FrameSink`](crate::traits::frame_sink::FrameSink).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("sink closed")]
    Closed,

    #[error("sink rejected frame: {0}")]
    Rejected(String),

    #[error("sink storage error: {0}")]
    Storage(String),
}

/// Coarse error classification used by callers deciding on retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ResourceUnavailable,
    ChannelClosed,
    SinkFailure,
    TimeoutExceeded,
    InvalidTransition,
    ConfigurationFailed,
}

/// Errors raised by a relay session.
///
/// Every session-level variant records the state the session was in when
/// the error originated.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("microphone unavailable while {state}: {reason}")]
    ResourceUnavailable {
        state: SessionState,
        reason: ResourceFailure,
    },

    #[error("frame channel closed while {state}")]
    ChannelClosed { state: SessionState },

    #[error("sink failure while {state}: {source}")]
    SinkFailure {
        state: SessionState,
        #[source]
        source: SinkError,
    },

    #[error("sink did not accept frame within {timeout_ms} ms while {state}")]
    TimeoutExceeded { state: SessionState, timeout_ms: u64 },

    #[error("cannot {event} while {state}")]
    InvalidTransition {
        state: SessionState,
        event: SessionEvent,
    },

    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),
}

impl RelayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ResourceUnavailable { .. } => ErrorKind::ResourceUnavailable,
            Self::ChannelClosed { .. } => ErrorKind::ChannelClosed,
            Self::SinkFailure { .. } => ErrorKind::SinkFailure,
            Self::TimeoutExceeded { .. } => ErrorKind::TimeoutExceeded,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::ConfigurationFailed(_) => ErrorKind::ConfigurationFailed,
        }
    }

    /// State the session was in when the error originated.
    ///
    /// Configuration errors happen before any session exists and report `Idle`.
    pub fn state(&self) -> SessionState {
        match self {
            Self::ResourceUnavailable { state, .. }
            | Self::ChannelClosed { state }
            | Self::SinkFailure { state, .. }
            | Self::TimeoutExceeded { state, .. }
            | Self::InvalidTransition { state, .. } => *state,
            Self::ConfigurationFailed(_) => SessionState::Idle,
        }
    }

    /// Whether the caller may retry with a fresh session.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::ChannelClosed { .. })
    }
}
