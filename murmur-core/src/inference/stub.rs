//! `StubRecognizer` — placeholder backend that echoes metadata without real
//! inference.
//!
//! Produces deterministic token sequences so the full event pipeline can be
//! exercised end-to-end before a real acoustic backend is wired in.

use tracing::debug;

use crate::error::{MurmurError, Result};
use crate::inference::{Recognizer, Token};

/// Samples per synthetic token — roughly one "word" per 100 ms at 16 kHz.
const SAMPLES_PER_TOKEN: usize = 1_600;

/// Echo-style stub recognizer.
///
/// `generate` emits one token per [`SAMPLES_PER_TOKEN`] samples in the
/// window; `detokenize` renders them as a duration annotation like
/// `[speech 1.2s]`.
pub struct StubRecognizer {
    sample_rate: u32,
}

impl StubRecognizer {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }
}

impl Default for StubRecognizer {
    fn default() -> Self {
        Self::new(16_000)
    }
}

impl Recognizer for StubRecognizer {
    fn warm_up(&mut self) -> Result<()> {
        debug!("StubRecognizer::warm_up — no-op");
        Ok(())
    }

    fn generate(&mut self, samples: &[f32]) -> Result<Vec<Token>> {
        let count = samples.len() / SAMPLES_PER_TOKEN;
        Ok((0..count as Token).collect())
    }

    fn detokenize(&self, tokens: &[Token]) -> Result<String> {
        // Tokens are sequential by construction; anything else is malformed.
        if tokens.iter().enumerate().any(|(i, t)| *t != i as Token) {
            return Err(MurmurError::Decode(
                "non-sequential stub token sequence".into(),
            ));
        }
        let secs =
            tokens.len() as f32 * SAMPLES_PER_TOKEN as f32 / self.sample_rate as f32;
        Ok(format!("[speech {secs:.1}s]"))
    }

    fn reset(&mut self) {
        debug!("StubRecognizer::reset");
    }
}
