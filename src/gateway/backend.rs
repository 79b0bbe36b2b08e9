//! Backend abstraction over the two transports.
//!
//! A backend is a live connection to one remote MCP server. The two
//! concrete transports share a single contract — initialize, send, info,
//! healthy, close — dispatched through a closed sum type rather than an
//! open trait: the set of transports is fixed by configuration.

use std::time::Duration;

use serde_json::Value;

use super::errors::GatewayError;
use super::http::HttpBackend;
use super::stdio::StdioBackend;
use super::types::InitializeResult;
use crate::config::BackendConfig;

// ─── BackendInfo ─────────────────────────────────────────────────────────────

/// Metadata identifying a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendInfo {
    /// Unique backend name (routing-table key).
    pub name: String,
    /// Transport tag: "http" or "stdio".
    pub transport: String,
    /// Name of the configuration group the backend belongs to.
    pub group: String,
}

// ─── Backend ─────────────────────────────────────────────────────────────────

/// A connection to one remote MCP server.
#[derive(Debug)]
pub enum Backend {
    Http(HttpBackend),
    Stdio(StdioBackend),
}

impl Backend {
    /// Instantiate the right transport variant for a configuration entry.
    pub fn from_config(
        cfg: &BackendConfig,
        group: &str,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        match cfg.transport.as_str() {
            "http" => Ok(Backend::Http(HttpBackend::new(cfg, group, timeout)?)),
            "stdio" => Ok(Backend::Stdio(StdioBackend::new(cfg, group, timeout)?)),
            other => Err(GatewayError::Config {
                reason: format!(
                    "unsupported transport type '{other}' for backend '{}'",
                    cfg.name
                ),
            }),
        }
    }

    /// Perform the `initialize` handshake against the remote server.
    pub async fn initialize(&self) -> Result<InitializeResult, GatewayError> {
        match self {
            Backend::Http(b) => b.initialize().await,
            Backend::Stdio(b) => b.initialize().await,
        }
    }

    /// Send an arbitrary JSON-RPC request and return the raw `result`.
    pub async fn send(&self, method: &str, params: Value) -> Result<Value, GatewayError> {
        match self {
            Backend::Http(b) => b.send(method, params).await,
            Backend::Stdio(b) => b.send(method, params).await,
        }
    }

    /// Backend metadata.
    pub fn info(&self) -> &BackendInfo {
        match self {
            Backend::Http(b) => b.info(),
            Backend::Stdio(b) => b.info(),
        }
    }

    /// Outcome of the most recent request attempt. Advisory: callers may
    /// still attempt requests against an unhealthy backend.
    pub fn healthy(&self) -> bool {
        match self {
            Backend::Http(b) => b.healthy(),
            Backend::Stdio(b) => b.healthy(),
        }
    }

    /// Release transport resources. Idempotent.
    pub async fn close(&self) {
        match self {
            Backend::Http(b) => b.close().await,
            Backend::Stdio(b) => b.close().await,
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
