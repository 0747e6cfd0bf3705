//! Typed errors for the noisefs core.
//!
//! Every fallible operation in the workspace returns [`NoiseError`]; the
//! binaries and test harnesses wrap these in `eyre` reports at the boundary.

use crate::Address;
use thiserror::Error;

/// Result type alias used across the noisefs crates.
pub type Result<T> = std::result::Result<T, NoiseError>;

#[derive(Error, Debug)]
pub enum NoiseError {
    /// XOR operands must have equal lengths.
    #[error("size mismatch between XOR operands: {left} bytes vs {right} bytes")]
    SizeMismatch { left: usize, right: usize },

    /// Blocks carry at least one byte.
    #[error("a block must contain at least one byte")]
    EmptyBlock,

    /// Descriptor bytes failed validation on decode.
    #[error("invalid descriptor: {reason}")]
    InvalidDescriptor { reason: String },

    /// The backend reports the address as missing.
    #[error("address not found in backend: {0:?}")]
    NotFound(Address),

    /// Retrieval failed after the gateway exhausted its retries, or the
    /// retrieved bytes did not hash to the requested address.
    #[error("block unavailable: {0:?}")]
    BlockUnavailable(Address),

    /// The system entropy source could not produce bytes.
    #[error("entropy source unavailable: {0}")]
    EntropyUnavailable(String),

    /// A cache or queue budget was exceeded by a single request.
    #[error("resource budget exceeded: {reason}")]
    ResourceExceeded { reason: String },

    /// Cancellation was observed before the operation completed.
    #[error("operation cancelled")]
    Cancelled,

    /// Any gateway failure not captured by a more specific kind.
    #[error("backend error: {0}")]
    BackendError(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl NoiseError {
    /// Wraps an arbitrary gateway failure, preserving it as the cause.
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        NoiseError::BackendError(Box::new(err))
    }

    pub fn invalid_descriptor(reason: impl Into<String>) -> Self {
        NoiseError::InvalidDescriptor {
            reason: reason.into(),
        }
    }

    pub fn resource_exceeded(reason: impl Into<String>) -> Self {
        NoiseError::ResourceExceeded {
            reason: reason.into(),
        }
    }

    /// True when the error was produced by cancellation rather than failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, NoiseError::Cancelled)
    }

    /// Copies the error kind for a second consumer. The boxed backend cause
    /// cannot be cloned, so it is flattened into its display form.
    pub fn clone_kind(&self) -> NoiseError {
        match self {
            NoiseError::SizeMismatch { left, right } => NoiseError::SizeMismatch {
                left: *left,
                right: *right,
            },
            NoiseError::EmptyBlock => NoiseError::EmptyBlock,
            NoiseError::InvalidDescriptor { reason } => NoiseError::InvalidDescriptor {
                reason: reason.clone(),
            },
            NoiseError::NotFound(addr) => NoiseError::NotFound(*addr),
            NoiseError::BlockUnavailable(addr) => NoiseError::BlockUnavailable(*addr),
            NoiseError::EntropyUnavailable(reason) => {
                NoiseError::EntropyUnavailable(reason.clone())
            }
            NoiseError::ResourceExceeded { reason } => NoiseError::ResourceExceeded {
                reason: reason.clone(),
            },
            NoiseError::Cancelled => NoiseError::Cancelled,
            NoiseError::BackendError(cause) => {
                NoiseError::backend(std::io::Error::other(cause.to_string()))
            }
        }
    }
}
