use thiserror::Error;

/// All errors produced by readaloud-core.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("invalid audio buffer: {0}")]
    InvalidBuffer(String),

    #[error("unsupported playback speed: {0}")]
    InvalidSpeed(f64),

    #[error("seek offset out of range: {0}s")]
    InvalidOffset(f64),

    #[error("output device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no audio buffer loaded")]
    NotLoaded,

    #[error("playback request superseded by a later command")]
    Cancelled,

    #[error("PCM decode error: {0}")]
    Decode(String),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, PlaybackError>;
