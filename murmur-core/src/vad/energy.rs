//! Energy-based VAD using an RMS threshold.
//!
//! The sole signal driving segmentation is root-mean-square loudness.
//! `EnergyVad` is deliberately memoryless: end-of-speech smoothing is the
//! segmenter's silence-run counter, not a detector hangover, so one knob
//! (`silence_chunks_to_end`) controls tail length.

use super::{VadDecision, VoiceActivityDetector};
use crate::buffering::chunk::AudioChunk;

/// Root-mean-square amplitude of a sample slice. `0.0` for an empty slice.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// A simple energy-threshold voice activity detector.
#[derive(Debug, Clone)]
pub struct EnergyVad {
    /// RMS amplitude threshold. Chunks above this are considered speech.
    /// Typical range: 0.01–0.05 for a quiet microphone.
    threshold: f32,
}

impl EnergyVad {
    /// Create a new `EnergyVad` with the given RMS threshold.
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self::new(0.01)
    }
}

impl VoiceActivityDetector for EnergyVad {
    fn classify(&mut self, chunk: &AudioChunk) -> VadDecision {
        if rms(&chunk.samples) > self.threshold {
            VadDecision::Speech
        } else {
            VadDecision::Silence
        }
    }

    fn reset(&mut self) {}
}
