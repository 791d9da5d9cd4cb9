use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::models::error::SinkError;
use crate::models::session_summary::SessionSummary;

/// Description of a finished recording, stored next to it as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingMetadata {
    pub file_path: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
    pub frames_written: u64,
    pub samples_written: u64,
    pub duration_secs: f64,
    /// SHA-256 of the complete file, lowercase hex.
    pub checksum: String,
    pub created_at: String,
    pub encryption_algorithm: Option<String>,
    #[serde(default)]
    pub key_metadata: HashMap<String, String>,
    /// Summary of the relay session that fed the recording, when known.
    #[serde(default)]
    pub session: Option<SessionSummary>,
}

impl RecordingMetadata {
    pub fn is_encrypted(&self) -> bool {
        self.encryption_algorithm.is_some()
    }
}

/// `{recording}.metadata.json`
pub fn metadata_path(recording_path: &Path) -> PathBuf {
    recording_path.with_extension("metadata.json")
}

/// Write recording metadata as a JSON sidecar file.
pub fn write_metadata(metadata: &RecordingMetadata, recording_path: &Path) -> Result<(), SinkError> {
    let json = serde_json::to_string_pretty(metadata)
        .map_err(|e| SinkError::Storage(format!("failed to serialize metadata: {}", e)))?;
    fs::write(metadata_path(recording_path), json)
        .map_err(|e| SinkError::Storage(format!("failed to write metadata: {}", e)))?;
    Ok(())
}

/// Read recording metadata from a JSON sidecar file.
pub fn read_metadata(recording_path: &Path) -> Result<RecordingMetadata, SinkError> {
    let json = fs::read_to_string(metadata_path(recording_path))
        .map_err(|e| SinkError::Storage(format!("failed to read metadata: {}", e)))?;
    serde_json::from_str(&json).map_err(|e| SinkError::Storage(format!("failed to parse metadata: {}", e)))
}

/// Attach a session summary to an existing sidecar.
pub fn attach_summary(recording_path: &Path, summary: &SessionSummary) -> Result<(), SinkError> {
    let mut metadata = read_metadata(recording_path)?;
    metadata.session = Some(summary.clone());
    write_metadata(&metadata, recording_path)
}
