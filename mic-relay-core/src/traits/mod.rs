pub mod encryptor;
pub mod frame_sink;
pub mod microphone;
pub mod session_delegate;
