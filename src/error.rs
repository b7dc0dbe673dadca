//! Error types for the Wayfinder routing and verification core.

use thiserror::Error;

/// Reason a verification attempt failed, carried by [`WayfinderError::VerificationFailed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationFailureReason {
    /// The stream digest did not match the digest trusted gateways agreed on.
    DigestMismatch,
    /// Trusted gateways disagreed on the expected value.
    TrustConflict,
    /// No trusted gateway answered within the configured timeout.
    Timeout,
    /// The request or its verification branch was cancelled.
    Cancelled,
    /// A trusted gateway or root-transaction lookup failed transitively.
    SourceError,
}

impl std::fmt::Display for VerificationFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::DigestMismatch => "digest mismatch",
            Self::TrustConflict => "trusted gateways disagree",
            Self::Timeout => "timed out waiting for trusted gateways",
            Self::Cancelled => "cancelled",
            Self::SourceError => "source error",
        };
        f.write_str(s)
    }
}

/// Top-level error type for every fallible operation in this crate.
#[derive(Debug, Error)]
pub enum WayfinderError {
    /// Malformed `ar://` input; fatal for the request that produced it.
    #[error("failed to parse ar:// identifier `{input}`: {reason}")]
    ParseError {
        /// The raw input that failed to parse.
        input: String,
        /// Human-readable reason.
        reason: String,
    },

    /// A [`crate::providers::GatewaysProvider`] produced an empty candidate set
    /// with no fallback available.
    #[error("no gateway available")]
    NoGatewayAvailable,

    /// All retry attempts in [`crate::wayfinder::Wayfinder::request`] failed
    /// with transport errors.
    #[error("routing exhausted after {attempts} attempt(s): {last_error}")]
    RoutingExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The last transport error observed.
        last_error: String,
    },

    /// A root-transaction or trusted-gateway lookup found nothing.
    #[error("not found: {0}")]
    NotFound(String),

    /// Verification could not confirm the observed bytes against a trusted source.
    #[error("verification failed: {reason}")]
    VerificationFailed {
        /// The specific failure reason.
        reason: VerificationFailureReason,
    },

    /// A CDB64 byte-range read returned a non-206 response or the wrong byte count.
    #[error("range not satisfied for offset {offset}, size {size}: {reason}")]
    RangeNotSatisfied {
        /// Requested offset.
        offset: u64,
        /// Requested size.
        size: u64,
        /// Reason the range read failed.
        reason: String,
    },

    /// A CDB64 position exceeds the `2^53 - 1` safe-integer limit.
    #[error("position {0} exceeds the 2^53-1 safe-integer limit (files > ~8 TB unsupported)")]
    PositionOutOfRange(u64),

    /// Invalid configuration detected eagerly at construction time.
    #[error("invalid configuration for `{field}`: {reason}")]
    ConfigError {
        /// Offending configuration field.
        field: String,
        /// Human-readable reason.
        reason: String,
    },

    /// Underlying HTTP transport error, wrapped for context.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Underlying I/O error, wrapped for context (local CDB64 file sources).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result alias used throughout the crate's public API.
pub type Result<T> = std::result::Result<T, WayfinderError>;
