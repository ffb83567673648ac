//! Event types broadcast by the engine.
//!
//! The core emits three independent streams, each with its own
//! `tokio::sync::broadcast` channel and monotonically increasing `seq`:
//!
//! | Event | Purpose |
//! |-------|---------|
//! | `SpeechEvent` | segment lifecycle + transcripts |
//! | `AudioActivityEvent` | per-chunk RMS level / VAD decision |
//! | `EngineStatusEvent` | engine lifecycle changes |
//!
//! Rendering is the host's concern; the console overwrite display in
//! murmur-cli is one consumer, not part of the core.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Speech / transcript events
// ---------------------------------------------------------------------------

/// Emitted by the processing loop at segment boundaries and cadence ticks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    #[serde(flatten)]
    pub payload: SpeechPayload,
}

/// The four speech event kinds, in lifecycle order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SpeechPayload {
    /// Speech onset detected; a segment began accumulating.
    #[serde(rename_all = "camelCase")]
    SpeechStarted { utterance_id: String },
    /// Best-effort transcription of the still-open segment. Text may change
    /// on the next event with the same `utterance_id`.
    #[serde(rename_all = "camelCase")]
    PartialTranscript { utterance_id: String, text: String },
    /// Committed transcription of a completed segment; will not change.
    #[serde(rename_all = "camelCase")]
    FinalTranscript { utterance_id: String, text: String },
    /// The segment was closed and consumed.
    #[serde(rename_all = "camelCase")]
    SpeechEnded {
        utterance_id: String,
        reason: EndReason,
    },
}

impl SpeechPayload {
    pub fn utterance_id(&self) -> &str {
        match self {
            SpeechPayload::SpeechStarted { utterance_id }
            | SpeechPayload::PartialTranscript { utterance_id, .. }
            | SpeechPayload::FinalTranscript { utterance_id, .. }
            | SpeechPayload::SpeechEnded { utterance_id, .. } => utterance_id,
        }
    }
}

/// Why a segment was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EndReason {
    /// The configured run of below-threshold chunks was observed.
    Silence,
    /// The segment hit the hard duration cap.
    MaxLength,
    /// Shutdown flushed an in-progress segment.
    Flush,
}

// ---------------------------------------------------------------------------
// Audio activity events
// ---------------------------------------------------------------------------

/// Emitted for each processed audio chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioActivityEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// Root-mean-square level of the chunk in [0.0, 1.0].
    pub rms: f32,
    /// VAD decision for the current chunk.
    pub is_speech: bool,
}

// ---------------------------------------------------------------------------
// Engine status events
// ---------------------------------------------------------------------------

/// Emitted when the engine state changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatusEvent {
    pub status: EngineStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// Current state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    /// Engine created but `start()` not yet called.
    Idle,
    /// Warming up the recognizer.
    WarmingUp,
    /// Actively capturing audio and transcribing.
    Listening,
    /// Capture stopped; engine may be restarted.
    Stopped,
    /// Unrecoverable error — restart required.
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speech_event_serializes_with_tagged_camel_case_payload() {
        let event = SpeechEvent {
            seq: 7,
            payload: SpeechPayload::PartialTranscript {
                utterance_id: "utt-1".into(),
                text: "hello wor".into(),
            },
        };

        let json = serde_json::to_value(&event).expect("serialize speech event");
        assert_eq!(json["seq"], 7);
        assert_eq!(json["type"], "partialTranscript");
        assert_eq!(json["utteranceId"], "utt-1");
        assert_eq!(json["text"], "hello wor");

        let round_trip: SpeechEvent =
            serde_json::from_value(json).expect("deserialize speech event");
        assert_eq!(round_trip.seq, 7);
        assert_eq!(round_trip.payload, event.payload);
    }

    #[test]
    fn end_reason_serializes_lowercase_camel() {
        let event = SpeechEvent {
            seq: 0,
            payload: SpeechPayload::SpeechEnded {
                utterance_id: "utt-2".into(),
                reason: EndReason::MaxLength,
            },
        };

        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["type"], "speechEnded");
        assert_eq!(json["reason"], "maxLength");
    }

    #[test]
    fn engine_status_event_serializes_with_lowercase_status() {
        let event = EngineStatusEvent {
            status: EngineStatus::WarmingUp,
            detail: Some("loading recognizer".into()),
        };

        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["status"], "warmingup");
        assert_eq!(json["detail"], "loading recognizer");
    }

    #[test]
    fn audio_activity_event_serializes_with_camel_case_fields() {
        let event = AudioActivityEvent {
            seq: 3,
            rms: 0.18,
            is_speech: true,
        };

        let json = serde_json::to_value(&event).expect("serialize activity event");
        assert_eq!(json["seq"], 3);
        assert_eq!(json["isSpeech"], true);
        let rms = json["rms"].as_f64().expect("rms should be a number");
        assert!((rms - 0.18).abs() < 1e-5);
    }

    #[test]
    fn utterance_id_accessor_covers_all_variants() {
        let payloads = [
            SpeechPayload::SpeechStarted {
                utterance_id: "u".into(),
            },
            SpeechPayload::PartialTranscript {
                utterance_id: "u".into(),
                text: String::new(),
            },
            SpeechPayload::FinalTranscript {
                utterance_id: "u".into(),
                text: String::new(),
            },
            SpeechPayload::SpeechEnded {
                utterance_id: "u".into(),
                reason: EndReason::Silence,
            },
        ];
        for p in payloads {
            assert_eq!(p.utterance_id(), "u");
        }
    }
}
