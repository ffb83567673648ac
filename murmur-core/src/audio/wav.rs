//! WAV file loading for offline transcription.

use std::path::Path;

use hound::SampleFormat;

use crate::audio::resample::RateConverter;
use crate::error::{MurmurError, Result};

/// Load a WAV file as mono f32 samples at `target_rate`.
///
/// Multi-channel files are downmixed by averaging; other sample rates are
/// converted. Integer PCM (8/16/24/32-bit) and float formats are accepted.
///
/// # Errors
/// `MurmurError::InvalidAudio` on unreadable or malformed files.
pub fn load_wav_mono<P: AsRef<Path>>(path: P, target_rate: u32) -> Result<Vec<f32>> {
    let mut reader = hound::WavReader::open(&path)
        .map_err(|e| MurmurError::InvalidAudio(format!("open wav: {e}")))?;
    let spec = reader.spec();
    let channels = spec.channels as usize;
    if channels == 0 {
        return Err(MurmurError::InvalidAudio("zero-channel wav".into()));
    }

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| MurmurError::InvalidAudio(format!("read wav: {e}")))?,
        SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| MurmurError::InvalidAudio(format!("read wav: {e}")))?
        }
    };

    let mono: Vec<f32> = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    if spec.sample_rate == target_rate {
        return Ok(mono);
    }

    let mut converter = RateConverter::new(spec.sample_rate, target_rate)?;
    let mut out = converter.process(&mono);
    // Push silence through to flush the converter's accumulation block.
    out.extend_from_slice(&converter.process(&[0.0; 960]));
    Ok(out)
}
