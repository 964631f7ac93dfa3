//! Guardrail error types.

use thiserror::Error;

/// Guardrail errors.
///
/// Classification itself never fails; these only come from loading rules.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Failed to parse a rules file.
    #[error("failed to parse guardrail rules: {0}")]
    Parse(String),

    /// An I/O error occurred while reading rules.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
