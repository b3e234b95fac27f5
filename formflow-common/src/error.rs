//! Common error types for formflow

use thiserror::Error;

/// Common result type for formflow operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the formflow crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Error that knows which internal step of a command produced it
///
/// The stage travels as a structured field on `*.error` events so observers
/// never have to parse error strings.
pub trait StagedError: std::error::Error {
    fn stage(&self) -> &'static str;
}
