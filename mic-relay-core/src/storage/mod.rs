pub mod aes_encryptor;
pub mod metadata;
pub mod wav_sink;
