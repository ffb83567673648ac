//! Speech segmentation state machine.
//!
//! Consumes per-chunk VAD decisions and turns the continuous sample stream
//! into discrete speech segments:
//!
//! ```text
//!            rms > threshold                silence_run >= limit
//!   Idle ──────────────────────► Recording ──────────────────────► Idle
//!    │  (lookback ⧺ chunk starts     │      or segment at max cap
//!    │   the segment)                │
//!    └── below threshold:            └── every chunk appended,
//!        chunk retained in               silence run counted
//!        bounded lookback queue
//! ```
//!
//! While idle the last few chunks are kept in a lookback queue and prepended
//! to a new segment, so the onset of speech is not clipped by the one-chunk
//! detection latency. The silence-run limit and the hard sample cap bound
//! worst-case latency and memory even when the noise floor never drops
//! below threshold.
//!
//! The accumulation buffer is preallocated to the cap and logically
//! truncated between segments — no reallocation while recording.

use std::collections::VecDeque;

use crate::config::EngineConfig;

/// Why a segment was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentEnd {
    /// Enough consecutive below-threshold chunks were seen.
    Silence,
    /// The segment hit the hard sample cap.
    MaxLength,
}

/// Outcome of feeding one chunk to the segmenter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// No boundary crossed.
    None,
    /// Speech onset: a new segment began with this chunk (plus lookback).
    Started,
    /// The segment ended; read it with [`Segmenter::take`].
    Ended(SegmentEnd),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Recording,
}

/// Streaming speech segmenter.
pub struct Segmenter {
    state: State,
    /// Pre-speech chunks retained while idle, oldest first.
    lookback: VecDeque<Vec<f32>>,
    lookback_chunks: usize,
    silence_run: u32,
    silence_chunks_to_end: u32,
    max_samples: usize,
    /// Accumulated segment samples; capacity reserved once.
    segment: Vec<f32>,
}

impl Segmenter {
    pub fn new(config: &EngineConfig) -> Self {
        let max_samples = config.max_speech_samples();
        Self {
            state: State::Idle,
            lookback: VecDeque::with_capacity(config.lookback_chunks + 1),
            lookback_chunks: config.lookback_chunks,
            silence_run: 0,
            silence_chunks_to_end: config.silence_chunks_to_end,
            max_samples,
            segment: Vec::with_capacity(max_samples),
        }
    }

    /// Feed one chunk and its VAD decision through the transition table.
    pub fn push_chunk(&mut self, samples: &[f32], is_speech: bool) -> Transition {
        match self.state {
            State::Idle if is_speech => {
                self.state = State::Recording;
                self.silence_run = 0;
                self.segment.clear();
                for chunk in self.lookback.drain(..) {
                    append_clamped(&mut self.segment, &chunk, self.max_samples);
                }
                append_clamped(&mut self.segment, samples, self.max_samples);
                Transition::Started
            }
            State::Idle => {
                if self.lookback_chunks > 0 {
                    self.lookback.push_back(samples.to_vec());
                    while self.lookback.len() > self.lookback_chunks {
                        self.lookback.pop_front();
                    }
                }
                Transition::None
            }
            State::Recording => {
                if is_speech {
                    self.silence_run = 0;
                } else {
                    self.silence_run += 1;
                }
                append_clamped(&mut self.segment, samples, self.max_samples);

                if self.silence_run >= self.silence_chunks_to_end {
                    self.state = State::Idle;
                    self.silence_run = 0;
                    Transition::Ended(SegmentEnd::Silence)
                } else if self.segment.len() >= self.max_samples {
                    self.state = State::Idle;
                    self.silence_run = 0;
                    Transition::Ended(SegmentEnd::MaxLength)
                } else {
                    Transition::None
                }
            }
        }
    }

    /// The in-progress (or just-ended) segment, non-destructively.
    pub fn samples(&self) -> &[f32] {
        &self.segment
    }

    /// Consume the current segment, logically truncating the accumulator.
    pub fn take(&mut self) -> Vec<f32> {
        let out = self.segment.clone();
        self.segment.clear();
        out
    }

    /// Shutdown rule: surrender whatever partial segment exists.
    ///
    /// Returns `Some(samples)` iff a recording was in progress with at least
    /// one sample; the machine is left idle either way.
    pub fn flush(&mut self) -> Option<Vec<f32>> {
        let had_segment = self.state == State::Recording && !self.segment.is_empty();
        self.state = State::Idle;
        self.silence_run = 0;
        self.lookback.clear();
        if had_segment {
            Some(self.take())
        } else {
            self.segment.clear();
            None
        }
    }

    pub fn is_recording(&self) -> bool {
        self.state == State::Recording
    }

    /// Length of the current segment in samples.
    pub fn segment_len(&self) -> usize {
        self.segment.len()
    }
}

fn append_clamped(segment: &mut Vec<f32>, samples: &[f32], max: usize) {
    let room = max.saturating_sub(segment.len());
    segment.extend_from_slice(&samples[..samples.len().min(room)]);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(chunk_size: usize) -> EngineConfig {
        EngineConfig {
            chunk_size,
            lookback_chunks: 2,
            silence_chunks_to_end: 3,
            // 20 chunks of speech cap at 16 kHz
            max_speech_secs: (chunk_size * 20) as f32 / 16_000.0,
            ..EngineConfig::default()
        }
    }

    fn loud(chunk_size: usize, value: f32) -> Vec<f32> {
        vec![value; chunk_size]
    }

    #[test]
    fn zeros_never_start_a_segment() {
        let mut seg = Segmenter::new(&config(64));
        for _ in 0..100 {
            assert_eq!(seg.push_chunk(&vec![0.0; 64], false), Transition::None);
        }
        assert!(!seg.is_recording());
        assert_eq!(seg.segment_len(), 0);
    }

    #[test]
    fn speech_onset_prepends_lookback() {
        let mut seg = Segmenter::new(&config(4));

        // Three silent chunks; only the last two fit the lookback cap.
        seg.push_chunk(&[0.1, 0.1, 0.1, 0.1], false);
        seg.push_chunk(&[0.2, 0.2, 0.2, 0.2], false);
        seg.push_chunk(&[0.3, 0.3, 0.3, 0.3], false);

        assert_eq!(seg.push_chunk(&[0.9, 0.9, 0.9, 0.9], true), Transition::Started);
        assert!(seg.is_recording());

        let expected: Vec<f32> = [0.2f32, 0.3, 0.9]
            .iter()
            .flat_map(|v| std::iter::repeat(*v).take(4))
            .collect();
        assert_eq!(seg.samples(), &expected[..]);
    }

    #[test]
    fn silence_run_ends_segment_exactly_once() {
        let mut seg = Segmenter::new(&config(8));
        seg.push_chunk(&loud(8, 0.5), true);

        assert_eq!(seg.push_chunk(&loud(8, 0.0), false), Transition::None);
        assert_eq!(seg.push_chunk(&loud(8, 0.0), false), Transition::None);
        assert_eq!(
            seg.push_chunk(&loud(8, 0.0), false),
            Transition::Ended(SegmentEnd::Silence)
        );
        assert!(!seg.is_recording());

        // The ended segment includes the silent tail, and take() truncates.
        assert_eq!(seg.segment_len(), 8 * 4);
        let taken = seg.take();
        assert_eq!(taken.len(), 8 * 4);
        assert_eq!(seg.segment_len(), 0);
    }

    #[test]
    fn speech_resets_the_silence_run() {
        let mut seg = Segmenter::new(&config(8));
        seg.push_chunk(&loud(8, 0.5), true);
        seg.push_chunk(&loud(8, 0.0), false);
        seg.push_chunk(&loud(8, 0.0), false);
        // Speech again — the run starts over.
        seg.push_chunk(&loud(8, 0.5), true);
        seg.push_chunk(&loud(8, 0.0), false);
        seg.push_chunk(&loud(8, 0.0), false);
        assert!(seg.is_recording());
        assert_eq!(
            seg.push_chunk(&loud(8, 0.0), false),
            Transition::Ended(SegmentEnd::Silence)
        );
    }

    #[test]
    fn max_length_forces_end_with_zero_silence_chunks() {
        let cfg = config(8); // cap = 160 samples = 20 chunks
        let max = cfg.max_speech_samples();
        let mut seg = Segmenter::new(&cfg);

        let mut ended = None;
        for i in 0..100 {
            match seg.push_chunk(&loud(8, 0.5), true) {
                Transition::Ended(reason) => {
                    ended = Some((i, reason));
                    break;
                }
                _ => assert!(seg.segment_len() <= max),
            }
        }

        let (at, reason) = ended.expect("cap must force an end");
        assert_eq!(reason, SegmentEnd::MaxLength);
        assert_eq!(seg.segment_len(), max);
        // 20 chunks fill the cap exactly; the end fires on the 20th (i=19).
        assert_eq!(at, 19, "ended at chunk {at}");
    }

    #[test]
    fn segment_never_exceeds_cap_even_with_oversized_chunks() {
        let cfg = config(8);
        let max = cfg.max_speech_samples();
        let mut seg = Segmenter::new(&cfg);
        seg.push_chunk(&vec![0.5; max * 2], true);
        assert_eq!(seg.segment_len(), max);
    }

    #[test]
    fn flush_surrenders_partial_segment() {
        let mut seg = Segmenter::new(&config(8));
        seg.push_chunk(&loud(8, 0.5), true);
        seg.push_chunk(&loud(8, 0.5), true);

        let flushed = seg.flush().expect("recording must flush");
        assert_eq!(flushed.len(), 16);
        assert!(!seg.is_recording());
        assert_eq!(seg.flush(), None, "second flush has nothing to emit");
    }

    #[test]
    fn flush_while_idle_is_empty() {
        let mut seg = Segmenter::new(&config(8));
        seg.push_chunk(&loud(8, 0.0), false);
        assert_eq!(seg.flush(), None);
    }

    #[test]
    fn lookback_disabled_starts_with_current_chunk_only() {
        let cfg = EngineConfig {
            lookback_chunks: 0,
            ..config(4)
        };
        let mut seg = Segmenter::new(&cfg);
        seg.push_chunk(&[0.1, 0.1, 0.1, 0.1], false);
        seg.push_chunk(&[0.9, 0.9, 0.9, 0.9], true);
        assert_eq!(seg.samples(), &[0.9, 0.9, 0.9, 0.9]);
    }
}
