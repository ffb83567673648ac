//! Processing loop: shared ring → VAD → segmenter → cadence → recognizer.
//!
//! ## Stages (per iteration)
//!
//! ```text
//! 1. Pop exactly one chunk from the ring (bounded-sleep when short)
//! 2. RMS + VAD classify → Speech | Silence
//! 3. Segmenter transition → SpeechStarted / segment ended
//! 4. Cadence check → partial transcription of the open segment
//! 5. Broadcast SpeechEvent / AudioActivityEvent
//! ```
//!
//! Recognizer calls are synchronous within the iteration — inference
//! latency delays the next pop, and the ring absorbs the backlog up to its
//! capacity. That simplicity-over-realtime trade is deliberate; the capture
//! loop is never the one waiting.
//!
//! Partial failures are swallowed (logged, counted) and never end a
//! segment. A final failure still consumes the segment and returns the
//! machine to idle, so a broken recognizer cannot pin an ever-growing
//! buffer. On shutdown any in-progress segment is flushed as a final.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::{
    buffering::{chunk::AudioChunk, AudioRing},
    cadence::CadenceController,
    config::EngineConfig,
    engine::EngineDiagnostics,
    events::{AudioActivityEvent, EndReason, SpeechEvent, SpeechPayload},
    inference::RecognizerHandle,
    segment::{SegmentEnd, Segmenter, Transition},
    vad::{energy, VoiceActivityDetector},
};

/// Sleep when the ring has less than one chunk buffered.
const POLL_SLEEP: Duration = Duration::from_millis(5);

/// Everything the processing loop needs, passed as one struct.
pub struct PipelineContext {
    pub config: EngineConfig,
    pub recognizer: RecognizerHandle,
    pub vad: Box<dyn VoiceActivityDetector>,
    pub ring: AudioRing,
    pub running: Arc<AtomicBool>,
    pub speech_tx: broadcast::Sender<SpeechEvent>,
    pub activity_tx: broadcast::Sender<AudioActivityEvent>,
    pub seq: Arc<AtomicU64>,
    pub diagnostics: Arc<EngineDiagnostics>,
}

/// Run the processing loop until the running flag clears.
pub fn run(mut ctx: PipelineContext) {
    info!("processing loop started");

    let mut chunk_buf = vec![0f32; ctx.config.chunk_size];
    let mut segmenter = Segmenter::new(&ctx.config);
    let mut cadence = CadenceController::new(
        ctx.config.min_refresh(),
        ctx.config.min_model_samples,
    );
    let mut activity_seq = 0u64;
    let mut active_utterance: Option<String> = None;
    let mut next_utterance_id = 0u64;

    loop {
        // ── 0. Check running flag ────────────────────────────────────────
        if !ctx.running.load(Ordering::Relaxed) {
            break;
        }

        // ── 1. Pop one chunk ─────────────────────────────────────────────
        if !ctx.ring.pop_exact(&mut chunk_buf) {
            std::thread::sleep(POLL_SLEEP);
            continue;
        }
        ctx.diagnostics
            .chunks_processed
            .fetch_add(1, Ordering::Relaxed);

        // ── 2. Energy + VAD ──────────────────────────────────────────────
        let chunk = AudioChunk::new(chunk_buf.clone(), ctx.config.sample_rate);
        let rms = energy::rms(&chunk.samples);
        let decision = ctx.vad.classify(&chunk);
        let is_speech = decision.is_speech();
        if is_speech {
            ctx.diagnostics.speech_chunks.fetch_add(1, Ordering::Relaxed);
        }

        let _ = ctx.activity_tx.send(AudioActivityEvent {
            seq: activity_seq,
            rms,
            is_speech,
        });
        activity_seq = activity_seq.saturating_add(1);

        if activity_seq % 50 == 0 {
            debug!(
                rms = format_args!("{:.4}", rms),
                is_speech,
                segment_len = segmenter.segment_len(),
                "audio level check"
            );
        }

        // ── 3. Segmentation ──────────────────────────────────────────────
        match segmenter.push_chunk(&chunk.samples, is_speech) {
            Transition::None => {}
            Transition::Started => {
                let uid = format!("utt-{next_utterance_id}");
                next_utterance_id += 1;
                cadence.reset();
                ctx.diagnostics
                    .segments_started
                    .fetch_add(1, Ordering::Relaxed);
                debug!(utterance_id = %uid, "speech started");
                emit_speech(
                    &mut ctx,
                    SpeechPayload::SpeechStarted {
                        utterance_id: uid.clone(),
                    },
                );
                active_utterance = Some(uid);
            }
            Transition::Ended(end) => {
                let reason = match end {
                    SegmentEnd::Silence => EndReason::Silence,
                    SegmentEnd::MaxLength => EndReason::MaxLength,
                };
                if end == SegmentEnd::MaxLength {
                    warn!("segment cap reached — forcing final transcription");
                }
                finish_segment(
                    &mut ctx,
                    &mut segmenter,
                    &mut cadence,
                    &mut active_utterance,
                    reason,
                );
            }
        }

        // ── 4. Cadence: partial transcription ────────────────────────────
        if segmenter.is_recording() && ctx.config.enable_partial_inference {
            let now = Instant::now();
            if cadence.partial_due(segmenter.segment_len(), now) {
                run_partial(&mut ctx, &segmenter, active_utterance.as_deref());
                cadence.mark(now);
            }
        }
    }

    // Shutdown: whatever is still recording becomes one final flush.
    if segmenter.is_recording() {
        info!(
            utterance_id = ?active_utterance,
            segment_len = segmenter.segment_len(),
            "stop requested mid-segment — flushing"
        );
    }
    if let Some(samples) = segmenter.flush() {
        let uid = active_utterance
            .take()
            .unwrap_or_else(|| "utt-flush".to_string());
        transcribe_final(&mut ctx, &samples, &uid);
        emit_speech(
            &mut ctx,
            SpeechPayload::SpeechEnded {
                utterance_id: uid,
                reason: EndReason::Flush,
            },
        );
        ctx.vad.reset();
        ctx.recognizer.0.lock().reset();
    }

    let snap = ctx.diagnostics.snapshot();
    info!(
        samples_captured = snap.samples_captured,
        samples_evicted = snap.samples_evicted,
        chunks_processed = snap.chunks_processed,
        speech_chunks = snap.speech_chunks,
        segments_started = snap.segments_started,
        partials_emitted = snap.partials_emitted,
        finals_emitted = snap.finals_emitted,
        inference_errors = snap.inference_errors,
        "processing loop stopped — diagnostics"
    );
}

/// Close the current segment: final transcription, `FinalTranscript` +
/// `SpeechEnded` events, full state reset. A failed final still consumes
/// the segment.
fn finish_segment(
    ctx: &mut PipelineContext,
    segmenter: &mut Segmenter,
    cadence: &mut CadenceController,
    active_utterance: &mut Option<String>,
    reason: EndReason,
) {
    let samples = segmenter.take();
    let uid = active_utterance
        .take()
        .unwrap_or_else(|| "utt-untracked".to_string());

    debug!(
        utterance_id = %uid,
        samples = samples.len(),
        ?reason,
        "end of segment — running final transcription"
    );
    transcribe_final(ctx, &samples, &uid);
    emit_speech(
        ctx,
        SpeechPayload::SpeechEnded {
            utterance_id: uid,
            reason,
        },
    );

    cadence.reset();
    ctx.vad.reset();
    ctx.recognizer.0.lock().reset();
}

/// Final transcription; emits `FinalTranscript` on success, logs and counts
/// the error otherwise. Never retries — the segment is gone either way.
fn transcribe_final(ctx: &mut PipelineContext, samples: &[f32], uid: &str) {
    match ctx.recognizer.transcribe(samples) {
        Ok(text) => {
            ctx.diagnostics
                .finals_emitted
                .fetch_add(1, Ordering::Relaxed);
            info!(
                utterance_id = %uid,
                samples = samples.len(),
                text_preview = %text.chars().take(50).collect::<String>(),
                "final transcript emitted"
            );
            emit_speech(
                ctx,
                SpeechPayload::FinalTranscript {
                    utterance_id: uid.to_string(),
                    text,
                },
            );
        }
        Err(e) => {
            ctx.diagnostics
                .inference_errors
                .fetch_add(1, Ordering::Relaxed);
            error!(utterance_id = %uid, error = %e, "final transcription failed — segment discarded");
        }
    }
}

/// Partial transcription of the open segment, via non-destructive read.
/// Failures are swallowed: they never end the segment or touch VAD state.
fn run_partial(ctx: &mut PipelineContext, segmenter: &Segmenter, uid: Option<&str>) {
    let uid = uid.unwrap_or("utt-untracked");
    match ctx.recognizer.transcribe(segmenter.samples()) {
        Ok(text) => {
            ctx.diagnostics
                .partials_emitted
                .fetch_add(1, Ordering::Relaxed);
            emit_speech(
                ctx,
                SpeechPayload::PartialTranscript {
                    utterance_id: uid.to_string(),
                    text,
                },
            );
        }
        Err(e) => {
            ctx.diagnostics
                .inference_errors
                .fetch_add(1, Ordering::Relaxed);
            warn!(utterance_id = %uid, error = %e, "partial transcription failed (ignored)");
        }
    }
}

fn emit_speech(ctx: &mut PipelineContext, payload: SpeechPayload) {
    let seq = ctx.seq.fetch_add(1, Ordering::Relaxed);
    let _ = ctx.speech_tx.send(SpeechEvent { seq, payload });
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;
    use std::thread;

    use tokio::sync::broadcast::error::TryRecvError;

    use crate::error::{MurmurError, Result};
    use crate::inference::{Recognizer, Token};
    use crate::vad::VadDecision;

    struct ScriptedVad {
        decisions: Vec<VadDecision>,
        idx: usize,
        resets: Arc<AtomicUsize>,
    }

    impl ScriptedVad {
        fn new(decisions: Vec<VadDecision>, resets: Arc<AtomicUsize>) -> Self {
            Self {
                decisions,
                idx: 0,
                resets,
            }
        }
    }

    impl VoiceActivityDetector for ScriptedVad {
        fn classify(&mut self, _chunk: &AudioChunk) -> VadDecision {
            let decision = self
                .decisions
                .get(self.idx)
                .copied()
                .unwrap_or(VadDecision::Silence);
            self.idx += 1;
            decision
        }

        fn reset(&mut self) {
            self.resets.fetch_add(1, Ordering::Relaxed);
        }
    }

    struct TestRecognizer {
        generate_calls: Arc<AtomicUsize>,
        resets: Arc<AtomicUsize>,
        fail_generate: bool,
    }

    impl Recognizer for TestRecognizer {
        fn warm_up(&mut self) -> Result<()> {
            Ok(())
        }

        fn generate(&mut self, samples: &[f32]) -> Result<Vec<Token>> {
            self.generate_calls.fetch_add(1, Ordering::Relaxed);
            if self.fail_generate {
                return Err(MurmurError::Inference("intentional test failure".into()));
            }
            Ok(vec![samples.len() as Token])
        }

        fn detokenize(&self, tokens: &[Token]) -> Result<String> {
            Ok(format!("len:{}", tokens[0]))
        }

        fn reset(&mut self) {
            self.resets.fetch_add(1, Ordering::Relaxed);
        }
    }

    struct TestHarness {
        ctx: Option<PipelineContext>,
        ring: AudioRing,
        running: Arc<AtomicBool>,
        speech_rx: broadcast::Receiver<SpeechEvent>,
        generate_calls: Arc<AtomicUsize>,
        vad_resets: Arc<AtomicUsize>,
        recognizer_resets: Arc<AtomicUsize>,
    }

    fn harness(
        config: EngineConfig,
        decisions: Vec<VadDecision>,
        fail_generate: bool,
    ) -> TestHarness {
        let ring = AudioRing::with_capacity(config.ring_capacity);
        let (speech_tx, speech_rx) = broadcast::channel(64);
        let (activity_tx, _) = broadcast::channel(64);
        let running = Arc::new(AtomicBool::new(true));

        let generate_calls = Arc::new(AtomicUsize::new(0));
        let recognizer_resets = Arc::new(AtomicUsize::new(0));
        let recognizer = RecognizerHandle::new(TestRecognizer {
            generate_calls: Arc::clone(&generate_calls),
            resets: Arc::clone(&recognizer_resets),
            fail_generate,
        });

        let vad_resets = Arc::new(AtomicUsize::new(0));
        let vad: Box<dyn VoiceActivityDetector> =
            Box::new(ScriptedVad::new(decisions, Arc::clone(&vad_resets)));

        let ctx = PipelineContext {
            config,
            recognizer,
            vad,
            ring: ring.clone(),
            running: Arc::clone(&running),
            speech_tx,
            activity_tx,
            seq: Arc::new(AtomicU64::new(0)),
            diagnostics: Arc::new(EngineDiagnostics::default()),
        };

        TestHarness {
            ctx: Some(ctx),
            ring,
            running,
            speech_rx,
            generate_calls,
            vad_resets,
            recognizer_resets,
        }
    }

    fn test_config() -> EngineConfig {
        EngineConfig {
            sample_rate: 16_000,
            chunk_size: 64,
            lookback_chunks: 2,
            silence_chunks_to_end: 2,
            max_speech_secs: 64.0 * 20.0 / 16_000.0, // 20 chunks
            min_refresh_secs: 0.0,
            min_model_samples: 64,
            ring_capacity: 4_096,
            enable_partial_inference: true,
            ..EngineConfig::default()
        }
    }

    fn recv_event_with_timeout(
        rx: &mut broadcast::Receiver<SpeechEvent>,
        timeout: Duration,
    ) -> SpeechEvent {
        let start = Instant::now();
        loop {
            match rx.try_recv() {
                Ok(ev) => return ev,
                Err(TryRecvError::Empty) => {
                    if start.elapsed() >= timeout {
                        panic!("timed out waiting for speech event");
                    }
                    thread::sleep(Duration::from_millis(5));
                }
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Closed) => panic!("speech channel closed unexpectedly"),
            }
        }
    }

    fn collect_until_ended(
        rx: &mut broadcast::Receiver<SpeechEvent>,
        timeout: Duration,
    ) -> Vec<SpeechPayload> {
        let mut payloads = Vec::new();
        loop {
            let ev = recv_event_with_timeout(rx, timeout);
            let ended = matches!(ev.payload, SpeechPayload::SpeechEnded { .. });
            payloads.push(ev.payload);
            if ended {
                return payloads;
            }
        }
    }

    #[test]
    fn speech_then_silence_emits_started_partial_final_ended() {
        let mut h = harness(
            test_config(),
            vec![
                VadDecision::Speech,
                VadDecision::Silence,
                VadDecision::Silence,
            ],
            false,
        );
        h.ring.push(&vec![0.5; 64]).unwrap();
        h.ring.push(&vec![0.0; 64]).unwrap();
        h.ring.push(&vec![0.0; 64]).unwrap();

        let ctx = h.ctx.take().unwrap();
        let handle = thread::spawn(move || run(ctx));

        let payloads = collect_until_ended(&mut h.speech_rx, Duration::from_secs(1));
        h.running.store(false, Ordering::SeqCst);
        handle.join().expect("pipeline thread panicked");

        assert!(matches!(payloads[0], SpeechPayload::SpeechStarted { .. }));
        assert!(payloads
            .iter()
            .any(|p| matches!(p, SpeechPayload::PartialTranscript { .. })));
        let finals = payloads
            .iter()
            .filter(|p| matches!(p, SpeechPayload::FinalTranscript { .. }))
            .count();
        assert_eq!(finals, 1);
        assert!(matches!(
            payloads.last().unwrap(),
            SpeechPayload::SpeechEnded {
                reason: EndReason::Silence,
                ..
            }
        ));

        // All events share one utterance id.
        let uid = payloads[0].utterance_id().to_string();
        assert!(payloads.iter().all(|p| p.utterance_id() == uid));

        assert_eq!(h.vad_resets.load(Ordering::Relaxed), 1);
        assert_eq!(h.recognizer_resets.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn never_silent_stream_still_finalizes_at_the_cap() {
        let config = test_config();
        let cap_chunks = 20;
        let mut h = harness(
            config,
            vec![VadDecision::Speech; cap_chunks + 10],
            false,
        );
        for _ in 0..cap_chunks + 10 {
            h.ring.push(&vec![0.5; 64]).unwrap();
        }

        let ctx = h.ctx.take().unwrap();
        let handle = thread::spawn(move || run(ctx));

        let payloads = collect_until_ended(&mut h.speech_rx, Duration::from_secs(1));
        h.running.store(false, Ordering::SeqCst);
        handle.join().expect("pipeline thread panicked");

        assert!(matches!(
            payloads.last().unwrap(),
            SpeechPayload::SpeechEnded {
                reason: EndReason::MaxLength,
                ..
            }
        ));
        let finals = payloads
            .iter()
            .filter(|p| matches!(p, SpeechPayload::FinalTranscript { .. }))
            .count();
        assert_eq!(finals, 1);
    }

    #[test]
    fn shutdown_mid_segment_flushes_exactly_once() {
        let mut config = test_config();
        // No partials — isolate the flush path.
        config.enable_partial_inference = false;
        let mut h = harness(config, vec![VadDecision::Speech; 4], false);
        for _ in 0..4 {
            h.ring.push(&vec![0.5; 64]).unwrap();
        }

        let ctx = h.ctx.take().unwrap();
        let handle = thread::spawn(move || run(ctx));

        let first = recv_event_with_timeout(&mut h.speech_rx, Duration::from_secs(1));
        assert!(matches!(first.payload, SpeechPayload::SpeechStarted { .. }));

        // Let the remaining chunks drain, then stop while still recording.
        let deadline = Instant::now() + Duration::from_secs(1);
        while !h.ring.is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        h.running.store(false, Ordering::SeqCst);
        handle.join().expect("pipeline thread panicked");

        let second = recv_event_with_timeout(&mut h.speech_rx, Duration::from_secs(1));
        let third = recv_event_with_timeout(&mut h.speech_rx, Duration::from_secs(1));
        assert!(matches!(
            second.payload,
            SpeechPayload::FinalTranscript { .. }
        ));
        assert!(matches!(
            third.payload,
            SpeechPayload::SpeechEnded {
                reason: EndReason::Flush,
                ..
            }
        ));
        assert!(matches!(
            h.speech_rx.try_recv(),
            Err(TryRecvError::Empty | TryRecvError::Closed)
        ));
    }

    #[test]
    fn partial_failure_never_ends_the_segment() {
        let mut h = harness(test_config(), vec![VadDecision::Speech; 3], true);
        for _ in 0..3 {
            h.ring.push(&vec![0.5; 64]).unwrap();
        }

        let ctx = h.ctx.take().unwrap();
        let diagnostics = Arc::clone(&ctx.diagnostics);
        let handle = thread::spawn(move || run(ctx));

        let first = recv_event_with_timeout(&mut h.speech_rx, Duration::from_secs(1));
        assert!(matches!(first.payload, SpeechPayload::SpeechStarted { .. }));

        let deadline = Instant::now() + Duration::from_secs(1);
        while h.generate_calls.load(Ordering::Relaxed) < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        h.running.store(false, Ordering::SeqCst);
        handle.join().expect("pipeline thread panicked");

        // Partials failed but no FinalTranscript was produced mid-stream;
        // the only terminal event is the shutdown flush.
        let mut ended = 0;
        while let Ok(ev) = h.speech_rx.try_recv() {
            assert!(!matches!(ev.payload, SpeechPayload::FinalTranscript { .. }));
            if let SpeechPayload::SpeechEnded { reason, .. } = ev.payload {
                assert_eq!(reason, EndReason::Flush);
                ended += 1;
            }
        }
        assert_eq!(ended, 1);
        assert!(diagnostics.inference_errors.load(Ordering::Relaxed) >= 2);
    }

    #[test]
    fn final_failure_still_resets_and_emits_speech_ended() {
        let mut config = test_config();
        config.enable_partial_inference = false;
        let mut h = harness(
            config,
            vec![
                VadDecision::Speech,
                VadDecision::Silence,
                VadDecision::Silence,
            ],
            true,
        );
        h.ring.push(&vec![0.5; 64]).unwrap();
        h.ring.push(&vec![0.0; 64]).unwrap();
        h.ring.push(&vec![0.0; 64]).unwrap();

        let ctx = h.ctx.take().unwrap();
        let handle = thread::spawn(move || run(ctx));

        let payloads = collect_until_ended(&mut h.speech_rx, Duration::from_secs(1));
        h.running.store(false, Ordering::SeqCst);
        handle.join().expect("pipeline thread panicked");

        assert!(matches!(payloads[0], SpeechPayload::SpeechStarted { .. }));
        assert!(matches!(
            payloads.last().unwrap(),
            SpeechPayload::SpeechEnded {
                reason: EndReason::Silence,
                ..
            }
        ));
        assert!(!payloads
            .iter()
            .any(|p| matches!(p, SpeechPayload::FinalTranscript { .. })));
        // Segment consumed, state reset for the next utterance.
        assert_eq!(h.vad_resets.load(Ordering::Relaxed), 1);
        assert_eq!(h.recognizer_resets.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn two_utterances_get_distinct_ids() {
        let mut config = test_config();
        config.enable_partial_inference = false;
        let mut h = harness(
            config,
            vec![
                VadDecision::Speech,
                VadDecision::Silence,
                VadDecision::Silence,
                VadDecision::Speech,
                VadDecision::Silence,
                VadDecision::Silence,
            ],
            false,
        );
        for decision in [true, false, false, true, false, false] {
            let value = if decision { 0.5 } else { 0.0 };
            h.ring.push(&vec![value; 64]).unwrap();
        }

        let ctx = h.ctx.take().unwrap();
        let handle = thread::spawn(move || run(ctx));

        let first = collect_until_ended(&mut h.speech_rx, Duration::from_secs(1));
        let second = collect_until_ended(&mut h.speech_rx, Duration::from_secs(1));
        h.running.store(false, Ordering::SeqCst);
        handle.join().expect("pipeline thread panicked");

        assert_ne!(
            first[0].utterance_id(),
            second[0].utterance_id(),
            "each utterance gets a fresh id"
        );
    }
}
