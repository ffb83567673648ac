//! # murmur-core
//!
//! Streaming speech-to-text engine SDK.
//!
//! ## Architecture
//!
//! ```text
//! AudioSource → CaptureLoop → AudioRing → ProcessingLoop
//!                                             │
//!                             EnergyVad → Segmenter → CadenceController
//!                                             │
//!                                    Recognizer::generate/detokenize
//!                                             │
//!                                 broadcast::Sender<SpeechEvent>
//! ```
//!
//! The capture loop never blocks on the recognizer: inference backpressure
//! is absorbed by the ring buffer and its drop-oldest overflow policy. All
//! hot-path buffers are allocated once at start.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod cadence;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod inference;
pub mod segment;
pub mod vad;

// Convenience re-exports for downstream crates
pub use config::EngineConfig;
pub use engine::MurmurEngine;
pub use error::MurmurError;
pub use events::{
    AudioActivityEvent, EndReason, EngineStatus, EngineStatusEvent, SpeechEvent, SpeechPayload,
};
pub use inference::{Recognizer, RecognizerHandle, Token};
