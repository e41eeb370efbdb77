//! Error types for pianola
//!
//! Nothing in here is fatal to the engine: load failures are reported to the
//! caller and sink failures are logged by the scheduler and skipped.

use thiserror::Error;

/// Main error type for the library and the player binary
#[derive(Error, Debug)]
pub enum Error {
    /// Fetching or decoding a track failed; the previous timeline stays installed
    #[error("Failed to load '{url}': {reason}")]
    Load { url: String, reason: String },

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] ron::error::SpannedError),

    #[error("Encode error: {0}")]
    Encode(#[from] ron::Error),

    /// Audio device or stream errors from the software instrument
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// MIDI port enumeration, connection or send errors
    #[error("MIDI output error: {0}")]
    MidiOutput(String),

    /// A library file-name pattern failed to compile
    #[error("Pattern error: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No output sink available: {0}")]
    SinkUnavailable(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by an individual sink operation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// The sink's worker thread or audio stream has gone away
    #[error("sink disconnected")]
    Disconnected,

    /// The sink's event buffer is full and the event was dropped
    #[error("sink event buffer is full")]
    BufferFull,

    #[error("send failed: {0}")]
    Send(String),
}

impl From<cpal::BuildStreamError> for Error {
    fn from(e: cpal::BuildStreamError) -> Self {
        Error::AudioOutput(e.to_string())
    }
}

impl From<cpal::PlayStreamError> for Error {
    fn from(e: cpal::PlayStreamError) -> Self {
        Error::AudioOutput(e.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for Error {
    fn from(e: cpal::DefaultStreamConfigError) -> Self {
        Error::AudioOutput(e.to_string())
    }
}

impl From<midir::InitError> for Error {
    fn from(e: midir::InitError) -> Self {
        Error::MidiOutput(e.to_string())
    }
}

impl<T> From<midir::ConnectError<T>> for Error {
    fn from(e: midir::ConnectError<T>) -> Self {
        Error::MidiOutput(e.to_string())
    }
}
