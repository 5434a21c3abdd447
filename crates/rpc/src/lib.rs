// rpc/src/lib.rs

//! Ethereum JSON-RPC surface on top of the backend node
//!
//! This crate provides:
//! - JSON-RPC envelopes and the Ethereum response shapes
//! - One transformer per Ethereum method, registered in a dispatch table
//! - Poll-based filters and push-based subscriptions
//! - The HTTP/WebSocket server and its health endpoints

pub mod filter;
pub mod health;
pub mod methods;
pub mod params;
pub mod server;
pub mod subscription;
pub mod transformers;
pub mod types;

pub use filter::{Filter, FilterKind, FilterRegistry};
pub use health::HealthChecker;
pub use methods::{RequestContext, RpcMethods};
pub use server::{RpcConfig, RpcServer};
pub use subscription::{Session, SubscriptionRegistry};
pub use types::*;

use bridge_backend::{BackendError, BackendResult};
use bridge_codec::CodecError;

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("Parse error")]
    ParseError,
    #[error("{0}")]
    InvalidRequest(String),
    #[error("The method {0} does not exist/is not available")]
    MethodNotFound(String),
    #[error("{0}")]
    InvalidParams(String),
    #[error("Invalid filter id {0}")]
    InvalidFilterId(String),
    #[error("{0}")]
    Callback(String),
    #[error("server is shutting down")]
    Shutdown,
    #[error("{0}")]
    Internal(String),
    #[error("server error: {0}")]
    ServerError(String),
    #[error("{context}: {source}")]
    Backend {
        context: String,
        #[source]
        source: BackendError,
    },
}

impl RpcError {
    pub fn code(&self) -> i32 {
        match self {
            RpcError::ParseError => -32700,
            RpcError::InvalidRequest(_) => -32600,
            RpcError::MethodNotFound(_) => -32601,
            RpcError::InvalidParams(_) => -32602,
            RpcError::InvalidFilterId(_) => -32602,
            RpcError::Callback(_) => -32000,
            RpcError::Shutdown => -32000,
            RpcError::Internal(_) => -32603,
            RpcError::ServerError(_) => -32603,
            RpcError::Backend { .. } => -32000,
        }
    }

    /// Backend error behind this one, if any
    pub fn backend_source(&self) -> Option<&BackendError> {
        match self {
            RpcError::Backend { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<CodecError> for RpcError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::PrecisionLoss(_) => RpcError::Internal(err.to_string()),
            other => RpcError::InvalidParams(other.to_string()),
        }
    }
}

/// Codec errors raised on backend data are translation failures, not bad
/// client input
impl From<BackendError> for RpcError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Codec(codec) => RpcError::Callback(codec.to_string()),
            source => RpcError::Backend {
                context: "backend call failed".into(),
                source,
            },
        }
    }
}

/// Attach the failing operation to a backend error
pub trait BackendContext<T> {
    fn context(self, context: &str) -> RpcResult<T>;
    fn with_context<F: FnOnce() -> String>(self, f: F) -> RpcResult<T>;
}

impl<T> BackendContext<T> for BackendResult<T> {
    fn context(self, context: &str) -> RpcResult<T> {
        self.with_context(|| context.to_string())
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> RpcResult<T> {
        self.map_err(|source| match source {
            BackendError::Codec(codec) => RpcError::Callback(format!("{}: {}", f(), codec)),
            source => RpcError::Backend {
                context: f(),
                source,
            },
        })
    }
}

pub type RpcResult<T> = Result<T, RpcError>;
