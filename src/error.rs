//! Crate-wide error taxonomy.
//!
//! Mirrors the shape of a typical `thiserror`-derived error enum with
//! per-domain "kind" sub-enums: a small set of top-level variants, each
//! carrying enough context to log usefully, plus a `Result` alias used
//! everywhere else in the crate.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A feed frame could not be parsed as JSON, or didn't match any
    /// recognized message shape. Recoverable: the caller drops the frame
    /// and keeps reading.
    #[error("malformed feed frame: {0}")]
    FeedMalformed(String),

    /// A price or volume field failed validation (non-numeric, out of
    /// range, non-finite). Recoverable: the caller drops the individual
    /// update.
    #[error("invalid order field: {0}")]
    InvalidOrder(String),

    /// A sink reported an error. Carries a `SinkErrorKind` so callers can
    /// distinguish transient/ignorable failures from ones that should
    /// abort the process.
    #[error("sink error ({kind:?}): {message}")]
    Sink {
        kind: SinkErrorKind,
        message: String,
    },

    /// The feed transport disconnected or failed to connect. Recoverable
    /// at the supervisor level: it triggers a reconnect with backoff.
    #[error("transport disconnected: {0}")]
    TransportDisconnect(String),

    /// Process configuration could not be loaded or was invalid. Fatal.
    #[error("configuration error: {0}")]
    Config(String),

    /// The user requested shutdown (Ctrl-C).
    #[error("interrupted")]
    Interrupt,
}

/// Distinguishes sink failures the caller should silently recover from
/// (drop the row, keep going) from ones that should abort startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkErrorKind {
    /// Storage was locked / busy. Drop the row.
    Transient,
    /// A row with this primary key already exists. Drop the row.
    UniqueViolation,
    /// Could not open or create the sink at startup. Abort the process.
    Fatal,
    /// An unclassified runtime failure (disk full, corruption, a
    /// malformed statement, permissions, ...). Not safe to ignore:
    /// escalated to the operator channel.
    Other,
}

impl Error {
    pub fn sink_transient(message: impl Into<String>) -> Self {
        Error::Sink {
            kind: SinkErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn sink_unique_violation(message: impl Into<String>) -> Self {
        Error::Sink {
            kind: SinkErrorKind::UniqueViolation,
            message: message.into(),
        }
    }

    pub fn sink_fatal(message: impl Into<String>) -> Self {
        Error::Sink {
            kind: SinkErrorKind::Fatal,
            message: message.into(),
        }
    }

    pub fn sink_other(message: impl Into<String>) -> Self {
        Error::Sink {
            kind: SinkErrorKind::Other,
            message: message.into(),
        }
    }

    /// True for sink errors that the caller should drop-and-continue on
    /// rather than escalate to the operator channel.
    pub fn is_quiet_sink_error(&self) -> bool {
        matches!(
            self,
            Error::Sink {
                kind: SinkErrorKind::Transient | SinkErrorKind::UniqueViolation,
                ..
            }
        )
    }
}
