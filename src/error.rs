//! Crate-wide error type.
//!
//! Every failure mode the router surfaces maps to a stable string code
//! (see [`Error::code`]) so that callers and logs can match on behaviour
//! rather than message text. Host-side failures (registrar calls, stream
//! negotiation) arrive as opaque [`anyhow::Error`] values and are carried
//! in the [`Error::Registrar`] variant.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The router has not been started yet.
    #[error("router is not started yet")]
    NotStarted,

    /// A topic name was empty or otherwise unusable.
    #[error("invalid topic name")]
    InvalidTopic,

    /// An abstract routing operation was called on the base router.
    #[error("operation is not implemented by this router")]
    NotImplemented,

    /// Strict signing is enabled and an inbound message carried no signature.
    #[error("message has no signature")]
    MissingSignature,

    /// A signature was present but did not verify.
    #[error("message signature is invalid")]
    InvalidSignature,

    /// Router construction was given an unusable configuration.
    #[error("invalid router configuration: {0}")]
    InvalidConfig(String),

    /// A write was attempted on a peer stream with no outbound attached.
    #[error("peer stream is not writable")]
    NotWritable,

    /// The frame decoder hit truncated or oversized input.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// The message decoder hit truncated or unrecognisable input.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Key bytes could not be decoded into a supported public key.
    #[error("invalid public key bytes")]
    InvalidKey,

    /// The explicit key in a message does not derive the claimed origin id.
    #[error("public key does not match message origin")]
    KeyMismatch,

    /// The origin id carries no inlined key and the message has no key field.
    #[error("no public key available for message origin")]
    NoKey,

    /// A registrar interaction failed during start.
    #[error("registrar operation failed: {0}")]
    Registrar(anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotStarted => "ERR_NOT_STARTED_YET",
            Error::InvalidTopic => "ERR_NOT_VALID_TOPIC",
            Error::NotImplemented => "ERR_NOT_IMPLEMENTED",
            Error::MissingSignature => "ERR_MISSING_SIGNATURE",
            Error::InvalidSignature => "ERR_INVALID_SIGNATURE",
            Error::InvalidConfig(_) => "ERR_INVALID_CONFIG",
            Error::NotWritable => "ERR_NOT_WRITABLE",
            Error::MalformedFrame(_) => "ERR_MALFORMED_FRAME",
            Error::MalformedMessage(_) => "ERR_MALFORMED_MESSAGE",
            Error::InvalidKey => "ERR_INVALID_KEY",
            Error::KeyMismatch => "ERR_KEY_MISMATCH",
            Error::NoKey => "ERR_NO_KEY",
            Error::Registrar(_) => "ERR_REGISTRAR",
            Error::Io(_) => "ERR_IO",
        }
    }
}
