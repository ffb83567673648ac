//! Murmur console host.
//!
//! Thin shell around `murmur-core`: argument parsing, logging init, Ctrl-C
//! lifecycle, and an ANSI overwrite renderer for live transcripts. Partials
//! repaint the current line in place; finals commit it and move on.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use murmur_core::audio::device::list_input_devices;
use murmur_core::audio::wav::load_wav_mono;
use murmur_core::inference::stub::StubRecognizer;
use murmur_core::{EngineConfig, MurmurEngine, RecognizerHandle, SpeechEvent, SpeechPayload};

/// Live speech-to-text from the microphone
#[derive(Parser)]
#[command(name = "murmur")]
#[command(about = "Streaming speech transcription", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Transcribe live from a microphone until Ctrl-C
    Listen {
        /// Input device name (system default when omitted)
        #[arg(short, long)]
        device: Option<String>,

        /// Disable live partial transcripts
        #[arg(long)]
        no_partials: bool,
    },
    /// Transcribe a WAV file in one shot
    File {
        /// Path to the WAV file
        path: PathBuf,
    },
    /// List audio input devices
    Devices,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Listen {
            device,
            no_partials,
        } => listen(device, no_partials).await,
        Commands::File { path } => transcribe_file(&path),
        Commands::Devices => {
            let devices = list_input_devices();
            if devices.is_empty() {
                println!("no audio input devices found");
            }
            for d in devices {
                let marker = if d.is_default { " (default)" } else { "" };
                println!("{}{}", d.name, marker);
            }
            Ok(())
        }
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn listen(device: Option<String>, no_partials: bool) -> anyhow::Result<()> {
    let config = EngineConfig {
        enable_partial_inference: !no_partials,
        ..EngineConfig::default()
    };
    let recognizer = RecognizerHandle::new(StubRecognizer::new(config.sample_rate));
    let engine = MurmurEngine::new(config, recognizer);

    engine.warm_up().context("recognizer warm-up failed")?;
    let mut speech_rx = engine.subscribe_speech();
    engine
        .start_with_device(device)
        .context("failed to start capture")?;

    eprintln!("listening — press Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                engine.stop().context("engine stop failed")?;
                break;
            }
            event = speech_rx.recv() => match event {
                Ok(ev) => render(&ev),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "renderer lagged behind transcript events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    // The processing loop flushes any in-progress segment on shutdown;
    // drain those last events before exiting.
    loop {
        match tokio::time::timeout(Duration::from_secs(2), speech_rx.recv()).await {
            Ok(Ok(ev)) => {
                let ended = matches!(ev.payload, SpeechPayload::SpeechEnded { .. });
                render(&ev);
                if ended {
                    break;
                }
            }
            Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            _ => break,
        }
    }

    Ok(())
}

/// Repaint partials in place; commit finals on their own line.
fn render(event: &SpeechEvent) {
    let mut stdout = std::io::stdout().lock();
    match &event.payload {
        SpeechPayload::SpeechStarted { .. } => {}
        SpeechPayload::PartialTranscript { text, .. } => {
            let _ = write!(stdout, "\r\x1b[K… {text}");
            let _ = stdout.flush();
        }
        SpeechPayload::FinalTranscript { text, .. } => {
            let _ = writeln!(stdout, "\r\x1b[K{text}");
        }
        SpeechPayload::SpeechEnded { .. } => {
            let _ = stdout.flush();
        }
    }
}

fn transcribe_file(path: &Path) -> anyhow::Result<()> {
    let config = EngineConfig::default();
    let samples = load_wav_mono(path, config.sample_rate)
        .with_context(|| format!("failed to load {}", path.display()))?;

    let recognizer = RecognizerHandle::new(StubRecognizer::new(config.sample_rate));
    recognizer.0.lock().warm_up().context("warm-up failed")?;
    let text = recognizer
        .transcribe(&samples)
        .context("transcription failed")?;

    println!("{text}");
    Ok(())
}
