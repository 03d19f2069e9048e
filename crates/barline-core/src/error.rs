//! Error types for barline-core.

use crate::queue::{Lane, Turn};
use thiserror::Error;

/// Result type alias for barline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while queueing, waiting for or rendering requests.
///
/// Every variant is local to the request that caused it. None of them leave
/// the queue or the clock in a partially mutated state.
#[derive(Debug, Error)]
pub enum Error {
    /// The payload equals the last payload enqueued on the same lane.
    #[error("Duplicate request on {lane}: '{payload}'")]
    DuplicateRequest { lane: Lane, payload: String },

    /// The queued entry vanished before its turn came up.
    #[error("Request {turn} on {lane} was withdrawn")]
    RequestWithdrawn { lane: Lane, turn: Turn },

    /// Malformed duration multiplier or tempo input to the timing calculator.
    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    /// Malformed sweep endpoints or precision.
    #[error("Invalid sweep range: {0}")]
    InvalidSweepRange(String),

    /// Tempo must be a positive, finite number of beats per minute.
    #[error("Invalid tempo: {0}")]
    InvalidTempo(f64),

    /// A progression token could not be resolved to notes.
    #[error("Invalid chord: {0}")]
    InvalidChord(String),

    /// A control change command could not be parsed.
    #[error("Invalid control change: {0}")]
    InvalidControlChange(String),

    /// Requests are not accepted right now.
    #[error("Requests are closed for {0}")]
    IntakeClosed(Lane),

    /// The clock was dropped while a request was waiting for a bar.
    #[error("Clock closed")]
    ClockClosed,

    /// Configuration file error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// JACK connection error
    #[cfg(feature = "jack")]
    #[error("JACK error: {0}")]
    Jack(#[from] jack::Error),
}
