use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::audio_models::SessionDiagnostics;
use super::state::SessionState;

/// Report produced when a session reaches `Disconnected`.
///
/// Serializable for JSON export next to whatever the sink stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub final_state: SessionState,
    pub diagnostics: SessionDiagnostics,
    /// Display form of the error that ended the session, if any.
    pub error: Option<String>,
}

impl SessionSummary {
    pub fn new(
        session_id: Uuid,
        started_at: DateTime<Utc>,
        final_state: SessionState,
        diagnostics: SessionDiagnostics,
        error: Option<String>,
    ) -> Self {
        let ended_at = Utc::now();
        let duration_secs = (ended_at - started_at).num_milliseconds().max(0) as f64 / 1000.0;
        Self {
            session_id,
            started_at,
            ended_at,
            duration_secs,
            final_state,
            diagnostics,
            error,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.error.is_none()
    }
}
