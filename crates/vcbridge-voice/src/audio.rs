//! PCM format helpers.
//!
//! Call audio arrives as 48 kHz stereo signed 16-bit little-endian PCM. The
//! ASR input is 16 kHz mono s16le WAV, produced here by averaging each block
//! of three stereo frames into one mono sample.

use crate::error::VoiceError;
use std::path::Path;
use std::time::Duration;

/// Sample rate of decoded call audio.
pub const CAPTURE_SAMPLE_RATE: u32 = 48_000;
/// Channel count of decoded call audio.
pub const CAPTURE_CHANNELS: u16 = 2;
/// Bytes per sample of decoded call audio.
pub const CAPTURE_SAMPLE_BYTES: u16 = 2;

/// Sample rate of the ASR input.
pub const ASR_SAMPLE_RATE: u32 = 16_000;

const DECIMATION: usize = (CAPTURE_SAMPLE_RATE / ASR_SAMPLE_RATE) as usize;
const FRAME_BYTES: usize = (CAPTURE_CHANNELS * CAPTURE_SAMPLE_BYTES) as usize;

/// Duration of `len` bytes of capture PCM.
///
/// Derived from the byte count alone, so it is deterministic for a buffer.
pub fn pcm_duration(len: usize) -> Duration {
    let frames = (len / FRAME_BYTES) as u64;
    Duration::from_micros(frames * 1_000_000 / CAPTURE_SAMPLE_RATE as u64)
}

/// Converts capture PCM to ASR samples: stereo is averaged to mono and
/// every three frames are averaged into one 16 kHz sample.
///
/// A trailing partial frame is ignored.
pub fn downmix_to_asr(pcm: &[u8]) -> Vec<i16> {
    pcm.chunks_exact(FRAME_BYTES * DECIMATION)
        .map(|block| {
            let sum: i32 = block
                .chunks_exact(CAPTURE_SAMPLE_BYTES as usize)
                .map(|s| i16::from_le_bytes([s[0], s[1]]) as i32)
                .sum();
            (sum / (DECIMATION * CAPTURE_CHANNELS as usize) as i32) as i16
        })
        .collect()
}

/// Writes mono 16-bit samples as a WAV file.
pub fn write_wav(path: &Path, samples: &[i16], sample_rate: u32) -> Result<(), VoiceError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Writes capture PCM as the canonical ASR input WAV.
pub fn write_asr_wav(path: &Path, pcm: &[u8]) -> Result<(), VoiceError> {
    write_wav(path, &downmix_to_asr(pcm), ASR_SAMPLE_RATE)
}
