//! Error taxonomy shared by every LED operation.
//!
//! ## Rust concepts
//! - `derive_more` generates `Display` and `std::error::Error`
//! - A crate-wide `Result` alias keeps signatures short
//! - `From` impls let `?` convert foreign errors at the boundary

use derive_more::{Display, Error};
use serde::Serialize;

/// A specialized `Result` where the error is this crate's `LedError`.
pub type Result<T, E = LedError> = std::result::Result<T, E>;

/// Every failure an LED operation can report.
///
/// The `String` payload is the human-readable message surfaced to callers.
#[derive(Clone, Debug, Display, Error, PartialEq, Eq)]
pub enum LedError {
    #[display("invalid argument: {_0}")]
    InvalidArg(#[error(not(source))] String),

    #[display("not found: {_0}")]
    NotFound(#[error(not(source))] String),

    #[display("invalid state: {_0}")]
    InvalidState(#[error(not(source))] String),

    #[display("out of memory: {_0}")]
    NoMem(#[error(not(source))] String),

    #[display("hardware error: {_0}")]
    Hardware(#[error(not(source))] String),

    #[display("unsupported: {_0}")]
    Unsupported(#[error(not(source))] String),

    /// Payload does not fit the requested container (QR capacity).
    #[display("invalid size: {_0}")]
    InvalidSize(#[error(not(source))] String),
}

/// Tag reported next to the message in structured responses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidArg,
    NotFound,
    InvalidState,
    NoMem,
    Hardware,
    Unsupported,
    InvalidSize,
}

impl LedError {
    pub fn invalid_arg(msg: impl Into<String>) -> Self {
        Self::InvalidArg(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArg(_) => ErrorKind::InvalidArg,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::NoMem(_) => ErrorKind::NoMem,
            Self::Hardware(_) => ErrorKind::Hardware,
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::InvalidSize(_) => ErrorKind::InvalidSize,
        }
    }

    /// The bare message without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::InvalidArg(m)
            | Self::NotFound(m)
            | Self::InvalidState(m)
            | Self::NoMem(m)
            | Self::Hardware(m)
            | Self::Unsupported(m)
            | Self::InvalidSize(m) => m,
        }
    }
}

impl From<std::io::Error> for LedError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            std::io::ErrorKind::OutOfMemory => Self::NoMem(err.to_string()),
            _ => Self::Hardware(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for LedError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidArg(err.to_string())
    }
}

impl From<image::ImageError> for LedError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::IoError(io) => io.into(),
            image::ImageError::Limits(l) => Self::NoMem(l.to_string()),
            image::ImageError::Unsupported(u) => Self::Unsupported(u.to_string()),
            other => Self::InvalidArg(other.to_string()),
        }
    }
}
