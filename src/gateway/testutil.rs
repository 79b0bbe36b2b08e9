//! In-process mock MCP backend for transport and federation tests.
//!
//! Binds an axum server to an ephemeral localhost port and answers the
//! MCP methods the gateway exercises. Tests configure the served catalog
//! through [`MockSpec`] and can mutate behavior mid-test (flip an HTTP
//! status, swap the tool-call result) through the shared handle.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::Response;
use axum::routing::post;
use axum::Router;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use super::types::{
    IncomingRequest, JsonRpcResponse, PromptDescriptor, ResourceDescriptor, ToolDescriptor,
    PROTOCOL_VERSION,
};

/// Behavior of a mock backend.
#[derive(Debug, Clone, Default)]
pub struct MockSpec {
    pub tools: Vec<ToolDescriptor>,
    pub resources: Vec<ResourceDescriptor>,
    pub prompts: Vec<PromptDescriptor>,
    /// Frame every response as an SSE `event: message` / `data:` stream.
    pub sse: bool,
    /// Answer `tools/list` with a JSON-RPC error even when tools exist.
    pub fail_tools_list: bool,
    /// Result payload for `tools/call` (defaults to a text "ok" tool result).
    pub call_result: Option<Value>,
    /// Respond to every request with this bare HTTP status instead.
    pub status_override: Option<u16>,
}

#[derive(Clone)]
struct MockState {
    spec: Arc<Mutex<MockSpec>>,
    calls: Arc<Mutex<Vec<Value>>>,
}

/// A running mock backend bound to `127.0.0.1:<ephemeral>`.
pub struct MockBackendServer {
    pub url: String,
    spec: Arc<Mutex<MockSpec>>,
    calls: Arc<Mutex<Vec<Value>>>,
    handle: JoinHandle<()>,
}

impl MockBackendServer {
    pub async fn spawn(spec: MockSpec) -> Self {
        let spec = Arc::new(Mutex::new(spec));
        let calls = Arc::new(Mutex::new(Vec::new()));
        let state = MockState {
            spec: spec.clone(),
            calls: calls.clone(),
        };

        let app = Router::new()
            .route("/mcp", post(handle))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock backend");
        let addr = listener.local_addr().expect("mock backend addr");

        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            url: format!("http://{addr}/mcp"),
            spec,
            calls,
            handle,
        }
    }

    /// Parameters of every `tools/call` the mock has received.
    pub fn recorded_calls(&self) -> Vec<Value> {
        self.calls.lock().clone()
    }

    /// Flip the bare-status override at runtime.
    pub fn set_status_override(&self, status: Option<u16>) {
        self.spec.lock().status_override = status;
    }

    /// Kill the mock so subsequent connections are refused.
    pub fn kill(&self) {
        self.handle.abort();
    }
}

impl Drop for MockBackendServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle(State(state): State<MockState>, body: String) -> Response {
    let spec = state.spec.lock().clone();

    if let Some(status) = spec.status_override {
        return Response::builder()
            .status(StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR))
            .body(Body::from("mock failure"))
            .unwrap();
    }

    let request: IncomingRequest = match serde_json::from_str(&body) {
        Ok(req) => req,
        Err(_) => {
            return frame(
                spec.sse,
                JsonRpcResponse::error(Value::Null, -32700, "parse error"),
            )
        }
    };
    let id = request.response_id();

    let response = match request.method.as_str() {
        "initialize" => {
            let mut capabilities = serde_json::Map::new();
            if !spec.tools.is_empty() || spec.fail_tools_list {
                capabilities.insert("tools".into(), json!({}));
            }
            if !spec.resources.is_empty() {
                capabilities.insert("resources".into(), json!({}));
            }
            if !spec.prompts.is_empty() {
                capabilities.insert("prompts".into(), json!({}));
            }
            JsonRpcResponse::success(
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": capabilities,
                    "serverInfo": {"name": "mock-backend", "version": "0.0.1"},
                }),
            )
        }
        "tools/list" => {
            if spec.fail_tools_list {
                JsonRpcResponse::error(id, -32603, "mock tools/list failure")
            } else {
                JsonRpcResponse::success(id, json!({"tools": spec.tools}))
            }
        }
        "resources/list" => JsonRpcResponse::success(id, json!({"resources": spec.resources})),
        "prompts/list" => JsonRpcResponse::success(id, json!({"prompts": spec.prompts})),
        "tools/call" => {
            state
                .calls
                .lock()
                .push(request.params.clone().unwrap_or(Value::Null));
            let result = spec.call_result.clone().unwrap_or_else(|| {
                json!({"content": [{"type": "text", "text": "ok"}]})
            });
            JsonRpcResponse::success(id, result)
        }
        "resources/read" => {
            let uri = request
                .params
                .as_ref()
                .and_then(|p| p.get("uri"))
                .cloned()
                .unwrap_or(Value::Null);
            JsonRpcResponse::success(
                id,
                json!({"contents": [{"uri": uri, "mimeType": "text/plain", "text": "resource body"}]}),
            )
        }
        "prompts/get" => JsonRpcResponse::success(
            id,
            json!({
                "description": "mock prompt",
                "messages": [{"role": "user", "content": {"type": "text", "text": "hello"}}],
            }),
        ),
        _ => JsonRpcResponse::error(id, -32601, "method not found"),
    };

    frame(spec.sse, response)
}

fn frame(sse: bool, response: JsonRpcResponse) -> Response {
    let json = serde_json::to_string(&response).expect("serialize mock response");
    if sse {
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/event-stream")
            .body(Body::from(format!("event: message\ndata: {json}\n\n")))
            .unwrap()
    } else {
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json))
            .unwrap()
    }
}
