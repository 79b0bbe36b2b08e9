//! Gateway error types.

use thiserror::Error;

use super::types::error_codes;

/// Errors that can occur during gateway operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Configuration problem: unsupported transport, missing required
    /// field, invalid value. Fatal at construction.
    #[error("config error: {reason}")]
    Config { reason: String },

    /// Transport-level failure talking to a backend: connection refused,
    /// non-2xx HTTP status, broken pipe. Flips the backend unhealthy.
    #[error("backend '{backend}' unavailable: {reason}")]
    Unavailable { backend: String, reason: String },

    /// The backend replied, but the envelope could not be decoded or is
    /// missing its `result`. Flips the backend unhealthy.
    #[error("protocol error from backend '{backend}': {reason}")]
    Protocol { backend: String, reason: String },

    /// The backend returned a well-formed JSON-RPC error. The remote is
    /// reachable, so health is untouched.
    #[error("backend '{backend}' returned error [{code}]: {message}")]
    Remote {
        backend: String,
        code: i64,
        message: String,
    },

    /// A tool, resource, or prompt name is not in the routing table.
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    /// A backend call exceeded its deadline. Flips the backend unhealthy.
    #[error("backend '{backend}' timed out after {timeout_secs}s")]
    Timeout { backend: String, timeout_secs: u64 },

    /// Request parameters are missing or mistyped.
    #[error("invalid params: {reason}")]
    InvalidParams { reason: String },

    /// Client-facing server failure (bind, accept).
    #[error("server error: {reason}")]
    Server { reason: String },
}

impl GatewayError {
    /// Map an error onto the JSON-RPC code surfaced to the client.
    pub fn jsonrpc_code(&self) -> i64 {
        match self {
            GatewayError::InvalidParams { .. } => error_codes::INVALID_PARAMS,
            GatewayError::NotFound { .. } => error_codes::INVALID_PARAMS,
            GatewayError::Remote { code, .. } => *code,
            GatewayError::Config { .. }
            | GatewayError::Unavailable { .. }
            | GatewayError::Protocol { .. }
            | GatewayError::Timeout { .. }
            | GatewayError::Server { .. } => error_codes::INTERNAL_ERROR,
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
