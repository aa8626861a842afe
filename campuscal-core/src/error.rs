//! Error types for campuscal.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur in campuscal operations.
///
/// Expansion never produces these: malformed templates simply yield fewer
/// occurrences. They come from configuration, event sources and argument
/// parsing.
#[derive(Error, Debug)]
pub enum CampusCalError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Calendar not found: {0}")]
    CalendarNotFound(String),

    #[error("Event source error: {0}")]
    Source(String),

    #[error("Event source request timed out after {}", format_timeout(.0))]
    SourceTimeout(Duration),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid window: {from} is after {latest}")]
    InvalidWindow { from: String, latest: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

fn format_timeout(timeout: &Duration) -> humantime::FormattedDuration {
    humantime::format_duration(*timeout)
}

/// Result type alias for campuscal operations.
pub type CampusCalResult<T> = Result<T, CampusCalError>;
