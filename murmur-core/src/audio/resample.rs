//! Sample-rate conversion using a rubato `FastFixedIn` resampler.
//!
//! Capture devices deliver audio at their native rate (commonly 44.1 or
//! 48 kHz); the recognizer wants the engine rate (16 kHz by default).
//! `RateConverter` bridges the gap on the capture-loop thread. When the
//! rates already match it is a passthrough and no rubato session exists.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::error;

use crate::error::{MurmurError, Result};

/// Input frames handed to rubato per process call.
const RESAMPLE_BLOCK: usize = 960;

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when the rates match (passthrough mode).
    resampler: Option<FastFixedIn<f32>>,
    /// Holds partial input blocks between calls.
    input_buf: Vec<f32>,
    /// Pre-allocated rubato output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    /// Create a converter from `from_rate` to `to_rate` (Hz).
    ///
    /// # Errors
    /// `MurmurError::AudioDevice` if rubato fails to initialise.
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        if from_rate == to_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                output_buf: Vec::new(),
            });
        }

        let ratio = to_rate as f64 / from_rate as f64;
        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio — no dynamic adjustment
            PolynomialDegree::Cubic,
            RESAMPLE_BLOCK,
            1, // mono
        )
        .map_err(|e| MurmurError::AudioDevice(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        let output_buf = vec![vec![0f32; max_out]; 1];

        tracing::info!(from_rate, to_rate, "resampling enabled");

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::new(),
            output_buf,
        })
    }

    /// Process incoming samples, returning converted output (may be empty).
    ///
    /// Input accumulates internally until a full block is available for
    /// rubato; any remainder is kept for the next call. In passthrough mode
    /// the input is returned directly.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.input_buf.extend_from_slice(samples);

        let mut result = Vec::new();
        while self.input_buf.len() >= RESAMPLE_BLOCK {
            let block = &self.input_buf[..RESAMPLE_BLOCK];
            match resampler.process_into_buffer(&[block], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => {
                    error!("resampler process error: {e}");
                }
            }
            self.input_buf.drain(..RESAMPLE_BLOCK);
        }

        result
    }

    /// `true` when no rate conversion occurs.
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_identity() {
        let mut rc = RateConverter::new(16_000, 16_000).unwrap();
        assert!(rc.is_passthrough());
        let samples: Vec<f32> = (0..480).map(|i| i as f32 * 0.001).collect();
        assert_eq!(rc.process(&samples), samples);
    }

    #[test]
    fn downsamples_48k_to_16k_at_one_third_length() {
        let mut rc = RateConverter::new(48_000, 16_000).unwrap();
        assert!(!rc.is_passthrough());
        let out = rc.process(&vec![0.0f32; RESAMPLE_BLOCK]);
        assert!(!out.is_empty(), "expected non-empty output");
        let expected = RESAMPLE_BLOCK / 3;
        assert!(
            (out.len() as isize - expected as isize).unsigned_abs() <= 10,
            "output len={} expected≈{expected}",
            out.len()
        );
    }

    #[test]
    fn partial_block_accumulates_until_full() {
        let mut rc = RateConverter::new(48_000, 16_000).unwrap();
        assert!(rc.process(&vec![0.0f32; 500]).is_empty());
        assert!(
            !rc.process(&vec![0.0f32; 500]).is_empty(),
            "second push crosses the block size and should produce output"
        );
    }
}
