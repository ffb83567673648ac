//! Engine configuration.
//!
//! Every timing and threshold constant of the streaming engine is injectable
//! here rather than hardcoded, so hosts can tune latency against quality.
//! Defaults target a quiet microphone feeding a 16 kHz recognizer.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for [`MurmurEngine`](crate::engine::MurmurEngine).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Sample rate the engine (and recognizer) operate at, in Hz.
    /// Audio captured at other device rates is resampled at the source
    /// boundary. Default: 16000.
    pub sample_rate: u32,
    /// Samples per chunk — the atomic unit moved between the capture and
    /// processing loops. 512 samples = 32 ms at 16 kHz. Default: 512.
    pub chunk_size: usize,
    /// How many pre-speech chunks are retained while idle and prepended to a
    /// new segment, so detection latency does not clip the speech onset.
    /// Default: 5.
    pub lookback_chunks: usize,
    /// RMS level above which a chunk counts as speech. Default: 0.01.
    pub vad_start_threshold: f32,
    /// Consecutive below-threshold chunks that end a segment. Default: 25
    /// (~0.8 s at 512-sample chunks / 16 kHz).
    pub silence_chunks_to_end: u32,
    /// Hard cap on a single segment's duration, in seconds. Reaching it
    /// forces a final transcription even with no silence. Default: 15.0.
    pub max_speech_secs: f32,
    /// Minimum interval between two partial transcriptions of the same
    /// segment, in seconds. Default: 0.2.
    pub min_refresh_secs: f32,
    /// Segment length (samples) below which no partial transcription is
    /// attempted — very short windows waste recognizer calls. Default: 4000.
    pub min_model_samples: usize,
    /// Capacity of the shared capture→processing ring, in samples.
    /// Default: 2^20 (~65 s at 16 kHz) — absorbs recognizer latency spikes
    /// without evicting audio.
    pub ring_capacity: usize,
    /// Whether to run partial transcriptions during active speech.
    pub enable_partial_inference: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            chunk_size: 512,
            lookback_chunks: 5,
            vad_start_threshold: 0.01,
            silence_chunks_to_end: 25,
            max_speech_secs: 15.0,
            min_refresh_secs: 0.2,
            min_model_samples: 4_000,
            ring_capacity: 1 << 20,
            enable_partial_inference: true,
        }
    }
}

impl EngineConfig {
    /// Segment cap in samples: `max_speech_secs * sample_rate`.
    pub fn max_speech_samples(&self) -> usize {
        (self.max_speech_secs * self.sample_rate as f32) as usize
    }

    /// Minimum spacing between partial transcriptions.
    pub fn min_refresh(&self) -> Duration {
        Duration::from_secs_f32(self.min_refresh_secs.max(0.0))
    }
}
