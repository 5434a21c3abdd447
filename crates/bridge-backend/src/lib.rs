// bridge-backend/src/lib.rs

//! Client side of the backend node's JSON-RPC interface
//!
//! This crate provides:
//! - The `BackendClient` call primitive and its HTTP transport
//! - Typed request/response shapes for the backend methods in use
//! - Chain identity detection with a cancellable rendezvous
//! - A facade exposing one typed method per backend call
//! - A scripted in-memory backend for tests, behind the `test-util` feature

pub mod cancel;
pub mod chain;
pub mod facade;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod transport;
pub mod types;

pub use cancel::{CancelHandle, Cancellation};
pub use chain::{ChainDetector, ChainState, Network};
pub use facade::{Backend, BackendOptions};
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockBackend;
pub use transport::{HttpClient, HttpClientConfig};

use async_trait::async_trait;
use bridge_codec::CodecError;
use serde_json::Value;

/// Backend error code: address or object not found
pub const RPC_INVALID_ADDRESS_OR_KEY: i64 = -5;
/// Backend error code: invalid, missing or duplicate parameter
pub const RPC_INVALID_PARAMETER: i64 = -8;
/// Backend error code: transaction already in chain
pub const RPC_VERIFY_ALREADY_IN_CHAIN: i64 = -27;
/// Backend error code: internal error
pub const RPC_INTERNAL_ERROR: i64 = -32603;

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors that can occur talking to the backend node
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    #[error("invalid address or key: {0}")]
    InvalidAddress(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("transaction already in chain: {0}")]
    AlreadyInChain(String),

    #[error("backend internal error: {0}")]
    Internal(String),

    #[error("backend error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("empty response")]
    EmptyResponse,

    #[error("backend unreachable: {0}")]
    Unreachable(String),

    #[error("couldn't decode backend response: {0}")]
    Decode(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("chain type not detected yet")]
    ChainNotDetected,

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl BackendError {
    /// Classify a structured error returned by the backend
    pub fn from_rpc(code: i64, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            RPC_INVALID_ADDRESS_OR_KEY => BackendError::InvalidAddress(message),
            RPC_INVALID_PARAMETER => BackendError::InvalidParameter(message),
            RPC_VERIFY_ALREADY_IN_CHAIN => BackendError::AlreadyInChain(message),
            RPC_INTERNAL_ERROR => BackendError::Internal(message),
            _ => BackendError::Rpc { code, message },
        }
    }

    /// Numeric backend code, when the error came from the backend itself
    pub fn code(&self) -> Option<i64> {
        match self {
            BackendError::InvalidAddress(_) => Some(RPC_INVALID_ADDRESS_OR_KEY),
            BackendError::InvalidParameter(_) => Some(RPC_INVALID_PARAMETER),
            BackendError::AlreadyInChain(_) => Some(RPC_VERIFY_ALREADY_IN_CHAIN),
            BackendError::Internal(_) => Some(RPC_INTERNAL_ERROR),
            BackendError::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// The single call primitive every backend interaction goes through.
///
/// `params` is always a JSON array. A `null` result is returned as
/// `Value::Null`; callers decide whether that is an error.
#[async_trait]
pub trait BackendClient: Send + Sync {
    async fn call(&self, method: &str, params: Value) -> BackendResult<Value>;
}
