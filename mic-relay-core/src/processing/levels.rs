//! Sample math used on the control side: metering and PCM conversion.

use crate::models::audio_models::AudioLevels;

/// RMS level of samples (0.0–1.0 for normalized audio).
pub fn rms_level(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Peak absolute level of samples.
pub fn peak_level(samples: &[f32]) -> f32 {
    samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max)
}

pub fn measure(samples: &[f32]) -> AudioLevels {
    AudioLevels {
        rms: rms_level(samples),
        peak: peak_level(samples),
    }
}

/// Convert f32 samples `[-1.0, 1.0]` to 16-bit little-endian PCM, clamping
/// out-of-range values.
pub fn to_pcm16_le(samples: &[f32]) -> Vec<u8> {
    let mut data = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        data.extend_from_slice(&value.to_le_bytes());
    }
    data
}
