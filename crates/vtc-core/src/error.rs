#![forbid(unsafe_code)]

//! Error types for the capability layer.

use thiserror::Error;

/// Errors from loading or parsing a terminal capability entry.
#[derive(Debug, Error)]
pub enum CapError {
    /// No compiled entry exists for the requested terminal type in any
    /// search root. Fatal at startup: without an entry there is no safe
    /// default for the core motion and attribute sequences.
    #[error("no terminfo entry found for terminal type {0:?}")]
    UnknownTerminalType(String),

    /// The entry exists but its binary layout is inconsistent.
    #[error("malformed terminfo entry: {0}")]
    Malformed(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors from expanding a parameterized capability string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParamError {
    /// A `%` escape this interpreter does not implement.
    #[error("unknown %-escape {0:?} in capability string")]
    UnknownEscape(char),

    /// Capability string ended in the middle of a `%` escape.
    #[error("unterminated %-escape at end of capability string")]
    Truncated,

    /// `%?`/`%t`/`%e` without a matching `%;`.
    #[error("conditional without matching %;")]
    UnbalancedConditional,
}
