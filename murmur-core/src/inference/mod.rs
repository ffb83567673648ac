//! Speech recognizer abstraction.
//!
//! The `Recognizer` trait decouples the processing loop from any specific
//! backend. Its two-step contract mirrors how streaming ASR backends
//! actually work: `generate` maps a sample window to token ids,
//! `detokenize` maps token ids to text. The loop composes them and treats
//! their failures differently per call site (partials swallowed, finals
//! consume the segment).
//!
//! `&mut self` on `generate` intentionally expresses that decoders are
//! stateful — beam search caches, RNN hidden states, etc. All mutation is
//! serialised through `RecognizerHandle`'s `parking_lot::Mutex`.

pub mod stub;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;

/// A recognizer vocabulary token id.
pub type Token = u32;

/// Contract for speech recognition backends.
pub trait Recognizer: Send + 'static {
    /// One-time warm-up: load weights, pre-allocate caches, run a dummy
    /// inference. Called once at engine startup.
    ///
    /// # Errors
    /// Returns an error if model assets are missing or corrupt.
    fn warm_up(&mut self) -> Result<()>;

    /// Map a window of mono f32 samples to a token sequence.
    ///
    /// Must not mutate its input. Latency is unspecified and may be
    /// hundreds of milliseconds — callers own that trade-off.
    ///
    /// # Errors
    /// `MurmurError::Inference` on malformed input or backend failure.
    fn generate(&mut self, samples: &[f32]) -> Result<Vec<Token>>;

    /// Map a token sequence to text. Pure.
    ///
    /// # Errors
    /// `MurmurError::Decode` on a malformed token sequence.
    fn detokenize(&self, tokens: &[Token]) -> Result<String>;

    /// Reset all internal decoder state (e.g. between utterances).
    fn reset(&mut self);
}

/// Thread-safe reference-counted handle to any `Recognizer` implementor.
#[derive(Clone)]
pub struct RecognizerHandle(pub Arc<Mutex<dyn Recognizer>>);

impl RecognizerHandle {
    /// Wrap any `Recognizer` in a `RecognizerHandle`.
    pub fn new<R: Recognizer>(recognizer: R) -> Self {
        Self(Arc::new(Mutex::new(recognizer)))
    }

    /// Convenience: `generate` + `detokenize` in one locked call.
    pub fn transcribe(&self, samples: &[f32]) -> Result<String> {
        let mut recognizer = self.0.lock();
        let tokens = recognizer.generate(samples)?;
        recognizer.detokenize(&tokens)
    }
}

impl std::fmt::Debug for RecognizerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecognizerHandle").finish_non_exhaustive()
    }
}
