use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::RelayError;

/// What the relay does when the sink queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Drop the frame that does not fit.
    DropNewest,
    /// Wait up to `timeout_ms` for room, then drop the frame and report
    /// a recoverable `TimeoutExceeded`.
    Block { timeout_ms: u64 },
}

impl BackpressurePolicy {
    pub fn timeout(&self) -> Option<Duration> {
        match self {
            Self::DropNewest => None,
            Self::Block { timeout_ms } => Some(Duration::from_millis(*timeout_ms)),
        }
    }
}

impl Default for BackpressurePolicy {
    fn default() -> Self {
        Self::Block { timeout_ms: 250 }
    }
}

/// Configuration for a relay session.
///
/// Read once when the controller is built; never consulted mid-session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Samples per quantum the microphone is asked to deliver (default: 128).
    pub quantum_frames: usize,

    /// Preferred sample rate in Hz; the microphone may negotiate another.
    pub sample_rate_hint: u32,

    /// Frames the worklet → controller channel can hold.
    pub channel_capacity: usize,

    /// Frames the relay → sink queue can hold.
    pub sink_queue_capacity: usize,

    pub backpressure: BackpressurePolicy,

    /// Specific microphone device ID, or None for system default.
    pub device_id: Option<String>,

    /// Frames between `on_levels_updated` callbacks (0 disables them).
    pub level_update_interval: u32,
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(16..=16384).contains(&self.quantum_frames) {
            return Err(format!("unsupported quantum size: {}", self.quantum_frames));
        }
        if !(8000..=192_000).contains(&self.sample_rate_hint) {
            return Err(format!("unsupported sample rate: {}", self.sample_rate_hint));
        }
        if self.channel_capacity == 0 {
            return Err("channel capacity must be positive".into());
        }
        if self.sink_queue_capacity == 0 {
            return Err("sink queue capacity must be positive".into());
        }
        if let BackpressurePolicy::Block { timeout_ms: 0 } = self.backpressure {
            return Err("backpressure timeout must be positive".into());
        }
        Ok(())
    }

    /// Parse a JSON document; missing keys fall back to defaults.
    pub fn from_json(json: &str) -> Result<Self, RelayError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| RelayError::ConfigurationFailed(format!("invalid config: {}", e)))?;
        config.validate().map_err(RelayError::ConfigurationFailed)?;
        Ok(config)
    }

    /// Overlay stored user overrides on top of this config.
    ///
    /// Objects merge key by key; any other value replaces the current one.
    /// Unknown keys are ignored.
    pub fn merged_with(&self, overrides: &Value) -> Result<Self, RelayError> {
        let mut base = serde_json::to_value(self)
            .map_err(|e| RelayError::ConfigurationFailed(format!("failed to encode config: {}", e)))?;
        merge_values(&mut base, overrides);
        let merged: Self = serde_json::from_value(base)
            .map_err(|e| RelayError::ConfigurationFailed(format!("invalid override: {}", e)))?;
        merged.validate().map_err(RelayError::ConfigurationFailed)?;
        Ok(merged)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            quantum_frames: 128,
            sample_rate_hint: 48000,
            channel_capacity: 64,
            sink_queue_capacity: 32,
            backpressure: BackpressurePolicy::default(),
            device_id: None,
            level_update_interval: 10,
        }
    }
}

fn merge_values(base: &mut Value, overrides: &Value) {
    match (base, overrides) {
        (Value::Object(base), Value::Object(overrides)) => {
            for (key, value) in overrides {
                match base.get_mut(key) {
                    Some(slot) => merge_values(slot, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (slot, value) => *slot = value.clone(),
    }
}
