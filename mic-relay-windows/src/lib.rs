//! # mic-relay-windows
//!
//! Windows WASAPI backend for mic-relay.
//!
//! Provides:
//! - `WasapiMicrophone`: a `MicrophoneSource` over a WASAPI capture endpoint
//! - `DeviceEnumerator`: capture device enumeration via the MMDevice API
//! - `permissions`: Windows microphone privacy check
//!
//! ## Platform Requirements
//! - Windows 10 1803+ for the microphone privacy toggle
//! - Visual Studio Build Tools 2022 + Windows SDK for linking
//!
//! ## Usage
//! ```ignore
//! use mic_relay_core::{SessionConfig, SessionController, WavFileSink};
//! use mic_relay_windows::WasapiMicrophone;
//!
//! let sink = WavFileSink::create("session.wav", 48000, None)?;
//! let mut session = SessionController::new(WasapiMicrophone::default_device(), sink, SessionConfig::default())?;
//! session.start()?;
//! ```

pub mod error;

#[cfg(target_os = "windows")]
mod com;
#[cfg(target_os = "windows")]
pub mod device_enumerator;
#[cfg(target_os = "windows")]
pub mod permissions;
#[cfg(target_os = "windows")]
pub mod wasapi_mic;

pub use error::WindowsAudioError;

#[cfg(target_os = "windows")]
pub use device_enumerator::DeviceEnumerator;
#[cfg(target_os = "windows")]
pub use wasapi_mic::WasapiMicrophone;
