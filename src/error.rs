//! Error types shared across the crate.
//!
//! `LocalError` and `RemoteError` follow the shape used throughout the
//! `manul` round-based protocol library: a thin `displaydoc`-derived
//! wrapper around a message string, cheap to construct and to propagate
//! through `?`. The handler- and config-facing errors are richer
//! `thiserror` enums in the style of `felicityin-cggmp21`'s
//! `InvalidKeyShare`/`ErrorReason` and `mpc-sdk-framework`'s driver errors,
//! since those need to carry structured data (culprits, round numbers).

use crate::party::PartyId;
use displaydoc::Display;

/// A bug in the local node's code or environment (RNG failure, a
/// serialization invariant violated, an internal downcast mismatch).
///
/// Unlike [`RemoteError`], this is never attributable to another party.
#[derive(Debug, Clone, Display)]
#[displaydoc("{0}")]
pub struct LocalError(String);

impl LocalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl std::error::Error for LocalError {}

/// An error message received from, or attributed to, a remote party.
#[derive(Debug, Clone, Display)]
#[displaydoc("{0}")]
pub struct RemoteError(String);

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

impl std::error::Error for RemoteError {}

/// The error surfaced by [`crate::handler::MultiHandler::result`] on an
/// aborted session.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HandlerError {
    /// protocol: not finished
    NotFinished,
    /// round {round}: {message}
    Round { round: u32, message: String },
    /// broadcast verification failed
    BroadcastVerificationFailed,
    /// aborted by other party: "{message}"
    RemoteAbort { culprit: PartyId, message: String },
    /// aborted by user
    UserStop,
    /// invalid content
    InvalidContent,
    /// local error: {0}
    Local(#[from] LocalError),
}

impl HandlerError {
    /// The parties implicated by this abort, if any are attributable.
    pub fn culprits(&self) -> Vec<PartyId> {
        match self {
            HandlerError::RemoteAbort { culprit, .. } => vec![culprit.clone()],
            _ => Vec::new(),
        }
    }
}

/// Errors produced while validating a persisted [`crate::config::Config`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// threshold {threshold} out of range for {n} parties
    ThresholdOutOfRange { threshold: u16, n: usize },
    /// missing public share for self ({0:?})
    MissingOwnPublicShare(PartyId),
    /// secret share does not match own public share
    SecretShareMismatch,
    /// non-canonical encoding encountered while validating the config
    NonCanonicalEncoding,
}
