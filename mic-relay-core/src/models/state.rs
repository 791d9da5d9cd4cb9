use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::RelayError;

/// Relay session state machine.
///
/// State transitions:
/// ```text
/// idle → connecting → connected ⇄ muted
///             │           │         │
///             └───────→ disconnected ←┘
/// ```
///
/// `Disconnected` is terminal. Failures land there too; the reason is kept
/// as the session's last error instead of a separate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Muted,
    Disconnected,
}

impl SessionState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Connected or muted: the microphone is held and frames are flowing.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Connected | Self::Muted)
    }

    pub fn is_muted(&self) -> bool {
        matches!(self, Self::Muted)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Muted => "muted",
            Self::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events that drive the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionEvent {
    Start,
    Registered,
    Mute,
    Unmute,
    Stop,
    SinkFailed,
    ResourceFailed,
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::Registered => "register",
            Self::Mute => "mute",
            Self::Unmute => "unmute",
            Self::Stop => "stop",
            Self::SinkFailed => "handle sink failure",
            Self::ResourceFailed => "handle resource failure",
        };
        f.write_str(name)
    }
}

/// Side effects a transition asks the controller to perform, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Effect {
    AcquireResource,
    OpenChannel,
    RegisterWorklet,
    CloseGate,
    OpenGate,
    StopWorklet,
    CloseChannel,
    ReleaseResource,
}

const TEARDOWN: &[Effect] = &[Effect::StopWorklet, Effect::CloseChannel, Effect::ReleaseResource];

/// Result of an accepted event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: SessionState,
    pub to: SessionState,
    pub effects: &'static [Effect],
}

/// Apply `event` to `state`.
///
/// Pure: performs no side effects, only describes them. Events outside the
/// edges drawn on [`SessionState`] are rejected with `InvalidTransition`.
pub fn transition(state: SessionState, event: SessionEvent) -> Result<Transition, RelayError> {
    use SessionEvent as E;
    use SessionState as S;

    let (to, effects): (SessionState, &'static [Effect]) = match (state, event) {
        (S::Idle, E::Start) => (
            S::Connecting,
            &[Effect::AcquireResource, Effect::OpenChannel, Effect::RegisterWorklet],
        ),
        (S::Connecting, E::Registered) => (S::Connected, &[]),
        (S::Connecting, E::ResourceFailed | E::SinkFailed | E::Stop) => {
            (S::Disconnected, TEARDOWN)
        }
        (S::Connected, E::Mute) => (S::Muted, &[Effect::CloseGate]),
        (S::Muted, E::Unmute) => (S::Connected, &[Effect::OpenGate]),
        (S::Connected | S::Muted, E::Stop | E::SinkFailed | E::ResourceFailed) => {
            (S::Disconnected, TEARDOWN)
        }
        _ => return Err(RelayError::InvalidTransition { state, event }),
    };

    Ok(Transition {
        from: state,
        to,
        effects,
    })
}
