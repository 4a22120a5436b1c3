use std::error::Error as StdError;

use thiserror::Error;

use crate::format::TrackType;

/// Recode's crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Recode's crate-wide error type.
///
/// This is intentionally decoupled from `anyhow` so downstream libraries aren't forced to
/// adopt `anyhow` in their own public APIs.
#[derive(Debug, Error)]
pub enum Error {
    /// The run was configured in a way the engine cannot honor. Never retried.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// An internal ordering rule was broken (e.g. audio queued before its format was known).
    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("container error: {0}")]
    Container(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Other(Box<dyn StdError + Send + Sync>),
}

/// Fatal configuration errors. Re-running with the same inputs fails the same way.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{side} channel count ({count}) not supported")]
    UnsupportedChannelCount { side: ChannelSide, count: i64 },

    #[error("audio sample rate conversion not supported ({decoded} Hz decoded, {target} Hz target)")]
    SampleRateMismatch { decoded: i64, target: i64 },

    #[error("this video is not 16:9 and cannot be transcoded ({width}x{height})")]
    AspectRatio { width: i64, height: i64 },

    #[error("{0} output format changed twice")]
    OutputFormatChangedTwice(TrackType),

    #[error("format is missing required key '{0}'")]
    MissingFormatKey(String),

    #[error("invalid value for {name}: '{value}'")]
    InvalidParameter { name: &'static str, value: String },

    #[error("input contains no video or audio track")]
    NoTracks,

    #[error("no codec available for '{0}'")]
    UnsupportedCodec(String),
}

/// Which side of a remix a channel count belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelSide {
    Input,
    Output,
}

impl std::fmt::Display for ChannelSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelSide::Input => f.write_str("input"),
            ChannelSide::Output => f.write_str("output"),
        }
    }
}

impl Error {
    pub(crate) fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    pub(crate) fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant(message.into())
    }

    pub(crate) fn codec(message: impl Into<String>) -> Self {
        Self::Codec(message.into())
    }

    pub(crate) fn container(message: impl Into<String>) -> Self {
        Self::Container(message.into())
    }

    /// Whether re-invoking the whole run could plausibly succeed.
    ///
    /// Only I/O failures qualify; configuration errors and invariant violations fail the same way
    /// every time.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Io(_))
    }

    /// Whether this is a configuration error.
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Message(format!("{err:#}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Other(Box::new(err))
    }
}

impl From<hound::Error> for Error {
    fn from(err: hound::Error) -> Self {
        match err {
            hound::Error::IoError(io) => Self::Io(io),
            other => Self::Container(other.to_string()),
        }
    }
}
