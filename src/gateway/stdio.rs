//! Stdio backend transport.
//!
//! Runs a remote MCP server as a child process and speaks newline-delimited
//! JSON-RPC over its stdin/stdout:
//! - The child is spawned lazily on the first call
//! - One lock guards the whole write-then-read exchange, so concurrent
//!   callers always observe request/response pairing
//! - Shutdown closes stdin first, waits briefly, then kills and reaps

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use super::backend::BackendInfo;
use super::errors::GatewayError;
use super::types::{
    extract_result, InitializeResult, JsonRpcRequest, JsonRpcResponse, GATEWAY_NAME,
    GATEWAY_VERSION, PROTOCOL_VERSION,
};
use crate::config::BackendConfig;

/// How long a closing backend waits for the child to exit on its own
/// after stdin is closed, before killing it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

// ─── StdioBackend ────────────────────────────────────────────────────────────

/// The open pipes of a running child process.
#[derive(Debug)]
struct StdioChannel {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
}

/// A backend reached over a child process's stdio.
#[derive(Debug)]
pub struct StdioBackend {
    info: BackendInfo,
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    timeout: Duration,
    channel: Mutex<Option<StdioChannel>>,
    next_id: AtomicU64,
    healthy: AtomicBool,
}

impl StdioBackend {
    /// Create a stdio backend from its configuration entry.
    ///
    /// The child process is not started here; it spawns on the first call.
    pub fn new(
        cfg: &BackendConfig,
        group: &str,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let command = cfg
            .command
            .clone()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| GatewayError::Config {
                reason: format!("command is required for stdio backend '{}'", cfg.name),
            })?;

        Ok(Self {
            info: BackendInfo {
                name: cfg.name.clone(),
                transport: "stdio".to_string(),
                group: group.to_string(),
            },
            command,
            args: cfg.args.clone(),
            env: cfg.env.clone(),
            timeout,
            channel: Mutex::new(None),
            next_id: AtomicU64::new(1),
            healthy: AtomicBool::new(true),
        })
    }

    /// Perform the `initialize` handshake, spawning the child first if needed.
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

        // The lock covers spawn, write, and read: one outstanding request
        // per backend, responses paired with their requests.
        let mut guard = self.channel.lock().await;
        if guard.is_none() {
            match self.spawn_child() {
                Ok(channel) => *guard = Some(channel),
                Err(e) => {
                    self.set_healthy(false);
                    return Err(e);
                }
            }
        }
        let Some(channel) = guard.as_mut() else {
            self.set_healthy(false);
            return Err(GatewayError::Unavailable {
                backend: self.info.name.clone(),
                reason: "stdio channel unavailable".into(),
            });
        };

        let exchange = async {
            let mut line = serde_json::to_string(&request).map_err(|e| {
                GatewayError::Protocol {
                    backend: self.info.name.clone(),
                    reason: format!("failed to serialize request: {e}"),
                }
            })?;
            line.push('\n');

            channel
                .stdin
                .write_all(line.as_bytes())
                .await
                .map_err(|e| GatewayError::Unavailable {
                    backend: self.info.name.clone(),
                    reason: format!("failed to write to stdin: {e}"),
                })?;
            channel
                .stdin
                .flush()
                .await
                .map_err(|e| GatewayError::Unavailable {
                    backend: self.info.name.clone(),
                    reason: format!("failed to flush stdin: {e}"),
                })?;

            self.read_response(&mut channel.reader, id).await
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
            // Remote errors mean the child is alive and talking; health
            // stays as it was.
            Err(e) => Err(e),
        }
    }

    /// Read envelopes off stdout until one matches the request id.
    ///
    /// Server-initiated notifications (no id) are skipped; anything that
    /// is not valid JSON is a protocol error.
    async fn read_response(
        &self,
        reader: &mut BufReader<ChildStdout>,
        id: u64,
    ) -> Result<JsonRpcResponse, GatewayError> {
        let mut line = String::new();
        loop {
            line.clear();
            let bytes_read =
                reader
                    .read_line(&mut line)
                    .await
                    .map_err(|e| GatewayError::Unavailable {
                        backend: self.info.name.clone(),
                        reason: format!("failed to read from stdout: {e}"),
                    })?;

            if bytes_read == 0 {
                return Err(GatewayError::Unavailable {
                    backend: self.info.name.clone(),
                    reason: "stdout closed (process may have exited)".into(),
                });
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let envelope: JsonRpcResponse =
                serde_json::from_str(trimmed).map_err(|e| GatewayError::Protocol {
                    backend: self.info.name.clone(),
                    reason: format!("failed to decode response envelope: {e}"),
                })?;

            if envelope.id.as_u64() == Some(id) {
                return Ok(envelope);
            }
            // A notification or an envelope for another exchange; skip.
        }
    }

    fn spawn_child(&self) -> Result<StdioChannel, GatewayError> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args);
        // Configured env is merged over the inherited process environment
        cmd.envs(&self.env);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        // Stderr passes through: MCP servers log there by convention
        cmd.stderr(Stdio::inherit());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| GatewayError::Unavailable {
            backend: self.info.name.clone(),
            reason: format!("failed to spawn '{}': {e}", self.command),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| GatewayError::Unavailable {
            backend: self.info.name.clone(),
            reason: "failed to capture stdin".into(),
        })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GatewayError::Unavailable {
                backend: self.info.name.clone(),
                reason: "failed to capture stdout".into(),
            })?;

        tracing::debug!(backend = %self.info.name, command = %self.command, "spawned stdio backend");

        Ok(StdioChannel {
            child,
            stdin,
            reader: BufReader::new(stdout),
        })
    }

    /// Backend metadata.
    pub fn info(&self) -> &BackendInfo {
        &self.info
    }

    /// Outcome of the most recent request attempt.
    pub fn healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// Shut the child down. Idempotent.
    ///
    /// Closes stdin so a well-behaved child exits on EOF, waits briefly,
    /// then kills and reaps so no zombie is left behind.
    pub async fn close(&self) {
        let mut guard = self.channel.lock().await;
        let Some(channel) = guard.take() else {
            return;
        };

        let StdioChannel {
            mut child,
            stdin,
            reader,
        } = channel;
        drop(stdin);
        drop(reader);

        match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(backend = %self.info.name, %status, "stdio backend exited");
            }
            _ => {
                tracing::warn!(backend = %self.info.name, "stdio backend did not exit; killing");
                let _ = child.kill().await;
            }
        }
    }

    fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    /// Build a stdio backend running `/bin/sh -c <script>`.
    fn sh_backend(script: &str) -> StdioBackend {
        let cfg = BackendConfig {
            name: "sh".to_string(),
            transport: "stdio".to_string(),
            endpoint: None,
            headers: HashMap::new(),
            command: Some("/bin/sh".to_string()),
            args: vec!["-c".to_string(), script.to_string()],
            env: HashMap::new(),
        };
        StdioBackend::new(&cfg, "test", Duration::from_secs(5)).unwrap()
    }

    /// A child that prints canned responses for ids 1..=n, then keeps its
    /// pipes open by draining stdin until EOF.
    fn canned(responses: &[&str]) -> String {
        let mut script = String::new();
        for response in responses {
            script.push_str(&format!("printf '%s\\n' '{response}'; "));
        }
        script.push_str("cat > /dev/null");
        script
    }

    #[test]
    fn test_new_requires_command() {
        let cfg = BackendConfig {
            name: "sh".to_string(),
            transport: "stdio".to_string(),
            endpoint: None,
            headers: HashMap::new(),
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
        };
        let err = StdioBackend::new(&cfg, "test", Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, GatewayError::Config { .. }));
    }

    #[tokio::test]
    async fn test_initialize_and_list() {
        let backend = sh_backend(&canned(&[
            r#"{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"mock","version":"0"}}}"#,
            r#"{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"echo","description":"echo","inputSchema":{}}]}}"#,
        ]));

        let init = backend.initialize().await.unwrap();
        assert!(init.capabilities.tools.is_some());
        assert!(backend.healthy());

        let result = backend
            .send("tools/list", serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(result["tools"][0]["name"], "echo");

        backend.close().await;
    }

    #[tokio::test]
    async fn test_notifications_are_skipped() {
        let backend = sh_backend(&canned(&[
            r#"{"jsonrpc":"2.0","method":"notifications/progress","params":{"progress":1}}"#,
            r#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#,
        ]));

        let result = backend.send("ping", serde_json::json!({})).await.unwrap();
        assert_eq!(result["ok"], true);

        backend.close().await;
    }

    #[tokio::test]
    async fn test_garbage_output_is_protocol_error() {
        let backend = sh_backend("printf 'not json at all\\n'; cat > /dev/null");

        let err = backend
            .send("tools/list", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Protocol { .. }));
        assert!(!backend.healthy());

        backend.close().await;
    }

    #[tokio::test]
    async fn test_child_exit_is_unavailable() {
        let backend = sh_backend("exit 0");

        let err = backend
            .send("tools/list", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Unavailable { .. }));
        assert!(!backend.healthy());

        backend.close().await;
    }

    #[tokio::test]
    async fn test_remote_error_forwarded() {
        let backend = sh_backend(&canned(&[
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"no such method"}}"#,
        ]));

        let err = backend
            .send("bogus/method", serde_json::json!({}))
            .await
            .unwrap_err();
        match err {
            GatewayError::Remote { code, message, .. } => {
                assert_eq!(code, -32601);
                assert_eq!(message, "no such method");
            }
            other => panic!("expected Remote, got {other:?}"),
        }
        // The child answered; health is untouched.
        assert!(backend.healthy());

        backend.close().await;
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let backend = sh_backend(&canned(&[r#"{"jsonrpc":"2.0","id":1,"result":{}}"#]));
        backend.send("ping", serde_json::json!({})).await.unwrap();

        backend.close().await;
        backend.close().await;

        // Closing a never-started backend is also safe
        let untouched = sh_backend("cat > /dev/null");
        untouched.close().await;
    }
}
