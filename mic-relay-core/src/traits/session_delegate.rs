use crate::models::audio_models::AudioLevels;
use crate::models::error::RelayError;
use crate::models::session_summary::SessionSummary;
use crate::models::state::SessionState;

/// Event delegate for UI collaborators.
///
/// Callbacks arrive one at a time, in the order the controller took its
/// transitions, on one of the controller's threads (caller, relay, or sink).
/// No controller lock is held during a callback, so a delegate may call back
/// into the controller. Marshal to the UI thread if needed.
pub trait SessionDelegate: Send + Sync {
    /// Called after every accepted transition.
    fn on_state_changed(&self, state: SessionState, muted: bool);

    /// Called periodically with the latest microphone levels.
    fn on_levels_updated(&self, _levels: &AudioLevels) {}

    /// Called for fatal and recoverable errors alike.
    fn on_error(&self, error: &RelayError);

    /// Called once when `stop` collects the session summary.
    fn on_session_finished(&self, _summary: &SessionSummary) {}
}
