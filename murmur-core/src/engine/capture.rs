//! Capture loop: audio source → shared ring buffer.
//!
//! One chunk per iteration, bounded-sleep polling when the source has less
//! than a chunk queued. The producer never blocks and never stalls on the
//! recognizer: when the processing loop falls behind and the ring fills,
//! the oldest unread audio is evicted (counted and logged) so the newest
//! samples always land.
//!
//! A source read failure is fatal to capture: the loop reports
//! `EngineStatus::Error` and clears the running flag so the processing
//! loop also winds down instead of spinning on a dead device.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::{
    audio::AudioSource,
    buffering::AudioRing,
    engine::EngineDiagnostics,
    events::{EngineStatus, EngineStatusEvent},
};

/// Sleep when the source has less than one chunk queued.
const POLL_SLEEP: Duration = Duration::from_millis(5);

/// Everything the capture loop needs, passed as one struct.
pub struct CaptureContext {
    pub chunk_size: usize,
    pub ring: AudioRing,
    pub running: Arc<AtomicBool>,
    pub status: Arc<Mutex<EngineStatus>>,
    pub status_tx: broadcast::Sender<EngineStatusEvent>,
    pub diagnostics: Arc<EngineDiagnostics>,
}

/// Run the capture loop until the running flag clears or the source dies.
pub fn run(source: &mut dyn AudioSource, ctx: CaptureContext) {
    info!("capture loop started");
    let mut chunk = vec![0f32; ctx.chunk_size];

    loop {
        if !ctx.running.load(Ordering::Relaxed) {
            break;
        }

        if source.available() < ctx.chunk_size {
            std::thread::sleep(POLL_SLEEP);
            continue;
        }

        let n = match source.read(&mut chunk) {
            Ok(n) => n,
            Err(e) => {
                error!("audio source failed: {e}");
                *ctx.status.lock() = EngineStatus::Error;
                let _ = ctx.status_tx.send(EngineStatusEvent {
                    status: EngineStatus::Error,
                    detail: Some(e.to_string()),
                });
                ctx.running.store(false, Ordering::SeqCst);
                break;
            }
        };
        if n == 0 {
            std::thread::sleep(POLL_SLEEP);
            continue;
        }

        ctx.diagnostics
            .samples_captured
            .fetch_add(n, Ordering::Relaxed);

        let evicted = ctx.ring.push_evicting(&chunk[..n]);
        if evicted > 0 {
            ctx.diagnostics
                .samples_evicted
                .fetch_add(evicted, Ordering::Relaxed);
            warn!(evicted, "ring buffer full — evicted oldest unread audio");
        }
    }

    // Unconsumed ring contents are abandoned here; the processing loop owns
    // whatever it already popped.
    info!("capture loop stopped");
}
