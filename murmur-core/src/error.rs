use thiserror::Error;

/// All errors produced by murmur-core.
#[derive(Debug, Error)]
pub enum MurmurError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("ring buffer overflow: requested {requested} samples, {free} free")]
    RingOverflow { requested: usize, free: usize },

    #[error("inference error: {0}")]
    Inference(String),

    #[error("token decode error: {0}")]
    Decode(String),

    #[error("invalid audio input: {0}")]
    InvalidAudio(String),

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("engine is not running")]
    NotRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, MurmurError>;
