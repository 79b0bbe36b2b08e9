//! HTTP backend transport.
//!
//! Speaks JSON-RPC 2.0 over HTTP POST to a remote MCP server:
//! - One request per call, per-backend monotonic ids
//! - Configured headers forwarded on every request
//! - Tolerates both plain-JSON and SSE-framed response bodies

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use serde_json::Value;

use super::backend::BackendInfo;
use super::errors::GatewayError;
use super::types::{
    extract_result, InitializeResult, JsonRpcRequest, JsonRpcResponse, GATEWAY_NAME,
    GATEWAY_VERSION, PROTOCOL_VERSION,
};
use crate::config::BackendConfig;

// ─── SSE Response Framing ────────────────────────────────────────────────────

/// Extract the JSON-RPC envelope from a response body that may be SSE-framed.
///
/// Some MCP servers answer a plain POST with an `event: message` /
/// `data: {...}` stream instead of a bare JSON body. This is a
/// compatibility wart of the MCP ecosystem: the gateway must accept both
/// framings, taking the first `data:` line's payload when present.
pub(crate) fn extract_sse_payload(body: &str) -> &str {
    let trimmed = body.trim_start();
    if !trimmed.starts_with("data:") && !trimmed.starts_with("event:") {
        return body;
    }

    for line in body.lines() {
        if let Some(payload) = line.strip_prefix("data:") {
            return payload.trim_start();
        }
    }

    body
}

// ─── HttpBackend ─────────────────────────────────────────────────────────────

/// A backend reached over HTTP JSON-RPC.
#[derive(Debug)]
pub struct HttpBackend {
    info: BackendInfo,
    endpoint: String,
    headers: HashMap<String, String>,
    client: reqwest::Client,
    timeout: Duration,
    next_id: AtomicU64,
    healthy: AtomicBool,
}

impl HttpBackend {
    /// Create an HTTP backend from its configuration entry.
    pub fn new(
        cfg: &BackendConfig,
        group: &str,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let endpoint = cfg
            .endpoint
            .clone()
            .filter(|e| !e.is_empty())
            .ok_or_else(|| GatewayError::Config {
                reason: format!("endpoint is required for http backend '{}'", cfg.name),
            })?;

        // The per-call deadline is enforced by tokio::time::timeout in
        // send(), the same way the stdio transport does it.
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| GatewayError::Config {
                reason: format!("failed to build HTTP client for '{}': {e}", cfg.name),
            })?;

        Ok(Self {
            info: BackendInfo {
                name: cfg.name.clone(),
                transport: "http".to_string(),
                group: group.to_string(),
            },
            endpoint,
            headers: cfg.headers.clone(),
            client,
            timeout,
            next_id: AtomicU64::new(1),
            healthy: AtomicBool::new(true),
        })
    }

    /// Perform the `initialize` handshake.
    pub async fn initialize(&self) -> Result<InitializeResult, GatewayError> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": GATEWAY_NAME,
                "version": GATEWAY_VERSION,
            },
        });

        let result = self.send("initialize", params).await?;

        let init: InitializeResult = serde_json::from_value(result).map_err(|e| {
            self.set_healthy(false);
            GatewayError::Protocol {
                backend: self.info.name.clone(),
                reason: format!("failed to parse initialize result: {e}"),
            }
        })?;

        Ok(init)
    }

    /// Send an arbitrary JSON-RPC request and return the raw `result`.
    pub async fn send(&self, method: &str, params: Value) -> Result<Value, GatewayError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(id, method, Some(params));

        // The whole exchange runs under one deadline, mirroring the stdio
        // transport's discipline.
        let exchange = async {
            let mut builder = self
                .client
                .post(&self.endpoint)
                .header(CONTENT_TYPE, "application/json");
            for (key, value) in &self.headers {
                builder = builder.header(key.as_str(), value.as_str());
            }

            let response = builder.json(&request).send().await.map_err(|e| {
                GatewayError::Unavailable {
                    backend: self.info.name.clone(),
                    reason: format!("HTTP request failed: {e}"),
                }
            })?;

            let status = response.status();
            if !status.is_success() {
                return Err(GatewayError::Unavailable {
                    backend: self.info.name.clone(),
                    reason: format!("HTTP request failed with status {status}"),
                });
            }

            let body =
                response
                    .text()
                    .await
                    .map_err(|e| GatewayError::Unavailable {
                        backend: self.info.name.clone(),
                        reason: format!("failed to read response body: {e}"),
                    })?;

            let payload = extract_sse_payload(&body);
            serde_json::from_str::<JsonRpcResponse>(payload).map_err(|e| {
                GatewayError::Protocol {
                    backend: self.info.name.clone(),
                    reason: format!("failed to decode response envelope: {e}"),
                }
            })
        };

        let envelope = match tokio::time::timeout(self.timeout, exchange).await {
            Ok(Ok(envelope)) => envelope,
            Ok(Err(e)) => {
                self.set_healthy(false);
                return Err(e);
            }
            Err(_) => {
                self.set_healthy(false);
                return Err(GatewayError::Timeout {
                    backend: self.info.name.clone(),
                    timeout_secs: self.timeout.as_secs(),
                });
            }
        };

        match extract_result(&self.info.name, envelope) {
            Ok(result) => {
                self.set_healthy(true);
                Ok(result)
            }
            Err(e @ GatewayError::Protocol { .. }) => {
                self.set_healthy(false);
                Err(e)
            }
            // Remote errors mean the backend is reachable; health untouched.
            Err(e) => Err(e),
        }
    }

    /// Backend metadata.
    pub fn info(&self) -> &BackendInfo {
        &self.info
    }

    /// Outcome of the most recent request attempt.
    pub fn healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// HTTP clients hold no transport resources to release.
    pub async fn close(&self) {}

    fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::testutil::{MockBackendServer, MockSpec};
    use crate::gateway::types::ToolDescriptor;

    fn http_config(name: &str, endpoint: &str) -> BackendConfig {
        BackendConfig {
            name: name.to_string(),
            transport: "http".to_string(),
            endpoint: Some(endpoint.to_string()),
            headers: HashMap::new(),
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    fn tool(name: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: name.to_string(),
            description: format!("Test tool: {name}"),
            input_schema: serde_json::json!({"type": "object"}),
        }
    }

    #[test]
    fn test_extract_sse_payload_plain_json() {
        let body = r#"{"jsonrpc":"2.0","id":1,"result":{}}"#;
        assert_eq!(extract_sse_payload(body), body);
    }

    #[test]
    fn test_extract_sse_payload_data_line() {
        let body = "data: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n\n";
        assert_eq!(
            extract_sse_payload(body),
            "{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}"
        );
    }

    #[test]
    fn test_extract_sse_payload_event_prefixed() {
        let body = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n\n";
        assert_eq!(
            extract_sse_payload(body),
            "{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}"
        );
    }

    #[test]
    fn test_new_requires_endpoint() {
        let mut cfg = http_config("b1", "");
        cfg.endpoint = None;
        let err = HttpBackend::new(&cfg, "g", Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, GatewayError::Config { .. }));
    }

    #[tokio::test]
    async fn test_initialize_parses_capabilities() {
        let server = MockBackendServer::spawn(MockSpec {
            tools: vec![tool("git_commit")],
            ..Default::default()
        })
        .await;

        let backend =
            HttpBackend::new(&http_config("b1", &server.url), "g", Duration::from_secs(5))
                .unwrap();
        let init = backend.initialize().await.unwrap();

        assert!(init.capabilities.tools.is_some());
        assert!(init.capabilities.resources.is_none());
        assert!(backend.healthy());
    }

    #[tokio::test]
    async fn test_send_lists_tools() {
        let server = MockBackendServer::spawn(MockSpec {
            tools: vec![tool("git_commit"), tool("git_log")],
            ..Default::default()
        })
        .await;

        let backend =
            HttpBackend::new(&http_config("b1", &server.url), "g", Duration::from_secs(5))
                .unwrap();
        let result = backend
            .send("tools/list", serde_json::json!({}))
            .await
            .unwrap();

        let tools = result["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 2);
    }

    #[tokio::test]
    async fn test_sse_framed_response() {
        let server = MockBackendServer::spawn(MockSpec {
            tools: vec![tool("git_commit")],
            sse: true,
            ..Default::default()
        })
        .await;

        let backend =
            HttpBackend::new(&http_config("b1", &server.url), "g", Duration::from_secs(5))
                .unwrap();
        let result = backend
            .send("tools/list", serde_json::json!({}))
            .await
            .unwrap();

        assert_eq!(result["tools"][0]["name"], "git_commit");
        assert!(backend.healthy());
    }

    #[tokio::test]
    async fn test_connection_refused_flips_unhealthy() {
        // Port 9 (discard) is not listening in the test environment
        let backend = HttpBackend::new(
            &http_config("b1", "http://127.0.0.1:9/mcp"),
            "g",
            Duration::from_secs(2),
        )
        .unwrap();
        assert!(backend.healthy());

        let err = backend.send("tools/list", serde_json::json!({})).await;
        assert!(matches!(
            err,
            Err(GatewayError::Unavailable { .. }) | Err(GatewayError::Timeout { .. })
        ));
        assert!(!backend.healthy());
    }

    #[tokio::test]
    async fn test_non_2xx_status_flips_unhealthy() {
        let server = MockBackendServer::spawn(MockSpec {
            status_override: Some(500),
            ..Default::default()
        })
        .await;

        let backend =
            HttpBackend::new(&http_config("b1", &server.url), "g", Duration::from_secs(5))
                .unwrap();
        let err = backend
            .send("tools/list", serde_json::json!({}))
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::Unavailable { .. }));
        assert!(!backend.healthy());
    }

    #[tokio::test]
    async fn test_remote_error_leaves_health_intact() {
        let server = MockBackendServer::spawn(MockSpec {
            tools: vec![tool("git_commit")],
            ..Default::default()
        })
        .await;

        let backend =
            HttpBackend::new(&http_config("b1", &server.url), "g", Duration::from_secs(5))
                .unwrap();
        backend
            .send("tools/list", serde_json::json!({}))
            .await
            .unwrap();
        assert!(backend.healthy());

        // The mock answers unknown methods with a JSON-RPC error
        let err = backend
            .send("bogus/method", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Remote { .. }));
        assert!(backend.healthy());
    }

    #[tokio::test]
    async fn test_success_restores_health() {
        let server = MockBackendServer::spawn(MockSpec {
            tools: vec![tool("git_commit")],
            status_override: Some(503),
            ..Default::default()
        })
        .await;

        let backend =
            HttpBackend::new(&http_config("b1", &server.url), "g", Duration::from_secs(5))
                .unwrap();

        let err = backend
            .send("tools/list", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Unavailable { .. }));
        assert!(!backend.healthy());

        // Backend comes back; the next success flips the flag again
        server.set_status_override(None);
        backend
            .send("tools/list", serde_json::json!({}))
            .await
            .unwrap();
        assert!(backend.healthy());
    }
}
