use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PlaybackError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Speed must be positive, got {0}")]
    NonPositiveSpeed(f64),

    #[error("Invalid MIDI channel {0}, must be 0..=15")]
    InvalidChannel(u8),

    #[error("Invalid {name} value {value}, must be 0..=127")]
    InvalidDataByte { name: &'static str, value: u8 },

    #[error("Invalid pitch bend value {0}, must be 0..=16383")]
    InvalidPitchValue(u16),

    #[error("Invalid tempo: {0} microseconds per quarter note")]
    InvalidTempo(u32),

    #[error("Invalid time signature: {numerator}/{denominator}")]
    InvalidTimeSignature { numerator: u8, denominator: u8 },

    #[error("Playback is disposed")]
    Disposed,

    #[error("Failed to start tick thread: {0}")]
    TickThread(String),

    #[error("Unknown snap point")]
    UnknownSnapPoint,

    #[error("Unknown snap points group")]
    UnknownSnapPointsGroup,
}

/// Failure reported by an [`OutputDevice`](crate::OutputDevice).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DeviceError {
    #[error("Output device is not connected")]
    NotConnected,

    #[error("Failed to send event: {0}")]
    Send(String),
}

#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse score: {0}")]
    Parse(#[from] ron::error::SpannedError),

    #[error("Failed to serialize score: {0}")]
    Serialize(#[from] ron::Error),

    #[error("Invalid score: {0}")]
    Invalid(#[from] PlaybackError),
}

pub type Result<T> = std::result::Result<T, PlaybackError>;
