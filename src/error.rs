//! Domain-specific error types for log-surge.
//!
//! Uses `thiserror` for ergonomic error definitions that integrate
//! with the `anyhow` contexts added in `main`.

use thiserror::Error;

/// Why a single log line was not turned into an event.
///
/// Rejections are recovered locally: the line is counted and skipped.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RejectReason {
    #[error("line does not match the access log pattern")]
    PatternMismatch,

    #[error("timestamp is not in '%Y-%m-%d %H:%M:%S%z' form")]
    InvalidTimestamp,

    #[error("numeric field does not fit its type")]
    NumericOverflow,

    #[error("status code outside 100..=599")]
    StatusOutOfRange,

    #[error("line is not valid UTF-8")]
    InvalidEncoding,
}

impl RejectReason {
    /// Stable lowercase label used in exports.
    pub fn label(&self) -> &'static str {
        match self {
            Self::PatternMismatch => "pattern_mismatch",
            Self::InvalidTimestamp => "invalid_timestamp",
            Self::NumericOverflow => "numeric_overflow",
            Self::StatusOutOfRange => "status_out_of_range",
            Self::InvalidEncoding => "invalid_encoding",
        }
    }
}

/// Fatal errors that abort an analysis run.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Failed to read input at line {line}: {source}")]
    Io {
        line: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
