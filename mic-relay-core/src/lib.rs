//! # mic-relay-core
//!
//! Platform-agnostic microphone relay core library.
//!
//! Captures microphone quanta on a real-time thread, carries them over a
//! bounded ordered channel, and relays them to a downstream sink while a small
//! connection/mute state machine tracks the session. Platform backends
//! (Windows WASAPI) implement the `MicrophoneSource` trait and plug into the
//! generic `SessionController`.
//!
//! ## Architecture
//!
//! ```text
//! mic-relay-core (this crate)
//! ├── traits/       ← MicrophoneSource, FrameSink, SessionDelegate, FrameEncryptor
//! ├── models/       ← RelayError, SessionState + transition table, SessionConfig, AudioFrame, etc.
//! ├── worklet/      ← CaptureWorklet (real-time side)
//! ├── channel/      ← FramePort / FrameInbox (bounded worklet → controller link)
//! ├── session/      ← SessionController, MuteGate, relay and sink threads
//! ├── processing/   ← level metering, PCM conversion, QuantumAssembler
//! ├── sources/      ← ScriptedMicrophone, ToneMicrophone
//! └── storage/      ← WavFileSink, AesGcmEncryptor, metadata sidecar
//! ```

pub mod channel;
pub mod models;
pub mod processing;
pub mod session;
pub mod sources;
pub mod storage;
pub mod traits;
pub mod worklet;

// Re-export key types at crate root for convenience.
pub use channel::frame_channel::{FramePort, LossReporter};
pub use models::audio_models::{
    AudioFrame, AudioLevels, AudioSource, AudioTransportType, SessionDiagnostics, StreamFormat,
};
pub use models::config::{BackpressurePolicy, SessionConfig};
pub use models::error::{ErrorKind, RelayError, ResourceFailure, SinkError};
pub use models::session_summary::SessionSummary;
pub use models::state::{transition, Effect, SessionEvent, SessionState, Transition};
pub use processing::quantizer::QuantumAssembler;
pub use session::controller::SessionController;
pub use session::gate::MuteGate;
pub use sources::scripted::{QuantumFeeder, ScriptedMicrophone};
pub use sources::tone::ToneMicrophone;
pub use storage::aes_encryptor::AesGcmEncryptor;
pub use storage::metadata::RecordingMetadata;
pub use storage::wav_sink::WavFileSink;
pub use traits::encryptor::FrameEncryptor;
pub use traits::frame_sink::FrameSink;
pub use traits::microphone::MicrophoneSource;
pub use traits::session_delegate::SessionDelegate;
pub use worklet::capture_worklet::{CaptureWorklet, QuantumInputs, WorkletHandle};
