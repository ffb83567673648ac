//! Partial-transcription cadence control.
//!
//! While a segment is recording, the processing loop re-transcribes the
//! accumulated audio every so often to keep the live preview fresh. This
//! controller throttles those partial requests: never more often than the
//! configured refresh interval, and never on segments too short for the
//! recognizer to produce anything useful.

use std::time::{Duration, Instant};

/// Decides when a partial re-transcription is due.
///
/// Time is passed in rather than read internally so tests drive the clock.
#[derive(Debug)]
pub struct CadenceController {
    min_refresh: Duration,
    min_model_samples: usize,
    last_partial_at: Option<Instant>,
}

impl CadenceController {
    pub fn new(min_refresh: Duration, min_model_samples: usize) -> Self {
        Self {
            min_refresh,
            min_model_samples,
            last_partial_at: None,
        }
    }

    /// Whether a partial request should run now for a segment of
    /// `segment_len` samples. A fresh segment (no partial yet) is due as
    /// soon as it is long enough.
    pub fn partial_due(&self, segment_len: usize, now: Instant) -> bool {
        if segment_len < self.min_model_samples {
            return false;
        }
        match self.last_partial_at {
            None => true,
            Some(t) => now.duration_since(t) >= self.min_refresh,
        }
    }

    /// Record that a partial request ran (successfully or not) at `now`.
    ///
    /// Failed partials also reset the timer — retrying faster than the
    /// refresh interval would just hammer a struggling recognizer.
    pub fn mark(&mut self, now: Instant) {
        self.last_partial_at = Some(now);
    }

    /// Clear the timer between utterances.
    pub fn reset(&mut self) {
        self.last_partial_at = None;
    }
}
