use std::fs::{self, File};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::models::audio_models::AudioFrame;
use crate::models::error::SinkError;
use crate::processing::levels;
use crate::traits::encryptor::FrameEncryptor;
use crate::traits::frame_sink::FrameSink;

use super::metadata::{self, RecordingMetadata};

/// Size of the canonical PCM RIFF header in bytes.
pub const WAV_HEADER_SIZE: usize = 44;

/// Largest data chunk a RIFF header can describe.
pub const MAX_DATA_SIZE: u64 = u32::MAX as u64 - 36;

const CHANNELS: u16 = 1;
const BIT_DEPTH: u16 = 16;

/// Canonical 44-byte header for mono 16-bit PCM.
///
/// ```text
/// [0-3]   "RIFF"       [4-7]   36 + data_size
/// [8-11]  "WAVE"       [12-15] "fmt "
/// [16-19] 16           [20-21] 1 (PCM)
/// [22-23] channels     [24-27] sample_rate
/// [28-31] byte_rate    [32-33] block_align
/// [34-35] bit_depth    [36-39] "data"
/// [40-43] data_size
/// ```
pub fn wav_header(sample_rate: u32, data_size: u32) -> [u8; WAV_HEADER_SIZE] {
    let block_align = CHANNELS * BIT_DEPTH / 8;
    let byte_rate = sample_rate * block_align as u32;

    let mut header = [0u8; WAV_HEADER_SIZE];
    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&data_size.saturating_add(36).to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");
    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&1u16.to_le_bytes());
    header[22..24].copy_from_slice(&CHANNELS.to_le_bytes());
    header[24..28].copy_from_slice(&sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    header[32..34].copy_from_slice(&block_align.to_le_bytes());
    header[34..36].copy_from_slice(&BIT_DEPTH.to_le_bytes());
    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&data_size.to_le_bytes());
    header
}

/// [`FrameSink`] that records frames to a mono 16-bit WAV file.
///
/// ## File format
///
/// **Plaintext:**
/// ```text
/// [44-byte WAV header]
/// [16-bit PCM, one quantum per frame...]
/// ```
///
/// **Encrypted:**
/// ```text
/// [44-byte WAV header, unencrypted]
/// [frame 1: 4-byte LE length | sealed box (nonce + ciphertext + tag)]
/// [frame 2: ...]
/// ```
///
/// On close the header sizes are patched, the SHA-256 of the whole file is
/// computed, and a `.metadata.json` sidecar is written next to it.
pub struct WavFileSink {
    path: PathBuf,
    sample_rate: u32,
    encryptor: Option<Box<dyn FrameEncryptor>>,
    file: Option<BufWriter<File>>,
    bytes_written: u64,
    frames_written: u64,
    samples_written: u64,
    checksum: Option<String>,
}

impl WavFileSink {
    /// Create the file (and its directory) and write a placeholder header.
    pub fn create(
        path: impl Into<PathBuf>,
        sample_rate: u32,
        encryptor: Option<Box<dyn FrameEncryptor>>,
    ) -> Result<Self, SinkError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| SinkError::Storage(format!("failed to create directory: {}", e)))?;
        }
        let file =
            File::create(&path).map_err(|e| SinkError::Storage(format!("failed to create file: {}", e)))?;

        let mut sink = Self {
            path,
            sample_rate,
            encryptor,
            file: Some(BufWriter::new(file)),
            bytes_written: 0,
            frames_written: 0,
            samples_written: 0,
            checksum: None,
        };
        sink.write_raw(&wav_header(sample_rate, 0))?;
        log::debug!("recording to {}", sink.path.display());
        Ok(sink)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Bytes written so far, header included.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    pub fn is_encrypted(&self) -> bool {
        self.encryptor.is_some()
    }

    /// SHA-256 of the finished file, available after close.
    pub fn checksum(&self) -> Option<&str> {
        self.checksum.as_deref()
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples_written as f64 / self.sample_rate as f64
    }

    fn data_size(&self) -> u64 {
        self.bytes_written.saturating_sub(WAV_HEADER_SIZE as u64)
    }

    fn write_raw(&mut self, data: &[u8]) -> Result<(), SinkError> {
        let file = self.file.as_mut().ok_or(SinkError::Closed)?;
        file.write_all(data)
            .map_err(|e| SinkError::Storage(format!("write failed: {}", e)))?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    fn ensure_room(&self, len: usize) -> Result<(), SinkError> {
        if self.data_size() + len as u64 > MAX_DATA_SIZE {
            return Err(SinkError::Storage(format!(
                "recording full: {} more bytes would exceed the WAV size limit",
                len
            )));
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<String, SinkError> {
        let Some(writer) = self.file.take() else {
            return Err(SinkError::Closed);
        };
        let mut file = writer
            .into_inner()
            .map_err(|e| SinkError::Storage(format!("flush failed: {}", e.error())))?;

        let data_size = u32::try_from(self.data_size())
            .map_err(|_| SinkError::Storage("data chunk exceeds the RIFF size limit".into()))?;
        let header = wav_header(self.sample_rate, data_size);
        let patch = |file: &mut File| -> std::io::Result<()> {
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&header)?;
            file.flush()
        };
        patch(&mut file).map_err(|e| SinkError::Storage(format!("failed to patch header: {}", e)))?;
        drop(file);

        sha256_file(&self.path)
    }

    fn metadata(&self, checksum: &str) -> RecordingMetadata {
        RecordingMetadata {
            file_path: self.path.display().to_string(),
            sample_rate: self.sample_rate,
            channels: CHANNELS,
            bit_depth: BIT_DEPTH,
            frames_written: self.frames_written,
            samples_written: self.samples_written,
            duration_secs: self.duration_secs(),
            checksum: checksum.to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            encryption_algorithm: self.encryptor.as_ref().map(|e| e.algorithm().to_string()),
            key_metadata: self.encryptor.as_ref().map(|e| e.key_metadata()).unwrap_or_default(),
            session: None,
        }
    }
}

impl FrameSink for WavFileSink {
    fn send(&mut self, frame: &AudioFrame) -> Result<(), SinkError> {
        let pcm = levels::to_pcm16_le(frame.samples());

        if let Some(ref encryptor) = self.encryptor {
            let sealed = encryptor
                .encrypt(&pcm)
                .map_err(|e| SinkError::Rejected(format!("chunk encryption failed: {}", e)))?;
            self.ensure_room(4 + sealed.len())?;
            self.write_raw(&(sealed.len() as u32).to_le_bytes())?;
            self.write_raw(&sealed)?;
        } else {
            self.ensure_room(pcm.len())?;
            self.write_raw(&pcm)?;
        }

        self.frames_written += 1;
        self.samples_written += frame.len() as u64;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        if self.file.is_none() {
            return Ok(());
        }
        let checksum = self.finalize()?;
        metadata::write_metadata(&self.metadata(&checksum), &self.path)?;
        log::info!(
            "recording closed: {} frames, {:.2}s, sha256 {}",
            self.frames_written,
            self.duration_secs(),
            checksum
        );
        self.checksum = Some(checksum);
        Ok(())
    }
}

fn sha256_file(path: &Path) -> Result<String, SinkError> {
    let data =
        fs::read(path).map_err(|e| SinkError::Storage(format!("failed to read file for checksum: {}", e)))?;
    Ok(Sha256::digest(&data).iter().map(|b| format!("{:02x}", b)).collect())
}
