use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// All errors produced by hark-core.
#[derive(Debug, Error)]
pub enum HarkError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("invalid channel config: {0}")]
    InvalidChannelConfig(String),

    #[error("audio channel read failed: {0}")]
    ChannelRead(String),

    #[error("audio channel produced no data within {0:?}")]
    ChannelTimeout(Duration),

    #[error("audio channel closed")]
    ChannelClosed,

    #[error("invalid spectrogram config: {0}")]
    InvalidSpectrogram(String),

    #[error("invalid detector config: {0}")]
    InvalidDetectorConfig(String),

    #[error("model is schema version {found}, supported version is {expected}")]
    SchemaMismatch { found: u32, expected: u32 },

    #[error("model input expects {expected} features but the frontend produces {actual}")]
    InputShapeMismatch { expected: usize, actual: usize },

    #[error("tensor arena exhausted: model needs {required} bytes, budget is {budget}")]
    ArenaExhausted { required: usize, budget: usize },

    #[error("invalid model: {0}")]
    InvalidModel(String),

    #[error("model file not found: {}", path.display())]
    ModelNotFound { path: PathBuf },

    #[error("inference error: {0}")]
    Inference(String),

    #[error("ONNX session error: {0}")]
    OnnxSession(String),

    #[error("detector is already running")]
    AlreadyRunning,

    #[error("detector is not running")]
    NotRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, HarkError>;
