//! Meta-tool facade.
//!
//! Naive federation would advertise every backend tool directly and
//! inflate the client's tool catalog (and context) with the union of all
//! backends. Instead the gateway exposes exactly three synthetic tools,
//! regardless of backend population:
//!
//! - `list_tools` — names of all routed backend tools
//! - `describe_tool` — full descriptor of one backend tool
//! - `call_tool` — invoke one backend tool by name
//!
//! Direct calls to backend-native tool names are rejected by the
//! dispatcher using [`is_meta_tool`].

use std::sync::Arc;

use serde_json::{json, Value};

use super::discovery::RoutingTable;
use super::errors::GatewayError;
use super::registry::BackendRegistry;
use super::types::{ToolDescriptor, ToolsListResult};

/// The three synthetic tool names.
pub const META_TOOL_NAMES: [&str; 3] = ["list_tools", "describe_tool", "call_tool"];

/// Whether a tool name is one of the gateway's own meta-tools.
pub fn is_meta_tool(name: &str) -> bool {
    META_TOOL_NAMES.contains(&name)
}

/// Descriptors for the three meta-tools, as advertised in `tools/list`.
pub fn meta_tool_descriptors() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: "list_tools".to_string(),
            description: "List the names of all tools available from the gateway's backends"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false,
            }),
        },
        ToolDescriptor {
            name: "describe_tool".to_string(),
            description: "Get the full description and input schema of a backend tool"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "tool_name": {
                        "type": "string",
                        "description": "The name of the tool to describe",
                    },
                },
                "required": ["tool_name"],
            }),
        },
        ToolDescriptor {
            name: "call_tool".to_string(),
            description: "Invoke a backend tool by name with the given arguments".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "tool_name": {
                        "type": "string",
                        "description": "The name of the tool to call",
                    },
                    "arguments": {
                        "type": "object",
                        "description": "The arguments to pass to the tool",
                    },
                },
                "required": ["tool_name", "arguments"],
            }),
        },
    ]
}

// ─── Result Payloads ─────────────────────────────────────────────────────────

/// A successful text tool result.
fn text_result(text: impl Into<String>) -> Value {
    json!({"content": [{"type": "text", "text": text.into()}]})
}

/// An error tool result with a human-readable message.
///
/// Downstream failures surface to the client as a well-formed tool result
/// flagged `isError`, not as a JSON-RPC error.
fn error_result(text: impl Into<String>) -> Value {
    json!({"content": [{"type": "text", "text": text.into()}], "isError": true})
}

// ─── MetaToolHandler ─────────────────────────────────────────────────────────

/// Executes meta-tool invocations against the routing table and registry.
#[derive(Debug)]
pub struct MetaToolHandler {
    registry: Arc<BackendRegistry>,
    routing: Arc<RoutingTable>,
}

impl MetaToolHandler {
    pub fn new(registry: Arc<BackendRegistry>, routing: Arc<RoutingTable>) -> Self {
        Self { registry, routing }
    }

    /// Handle a meta-tool invocation. The caller has already established
    /// that `tool` is a meta-tool name.
    ///
    /// Returns the `tools/call` result payload. `Err` is reserved for
    /// malformed parameters; everything downstream becomes an `isError`
    /// tool result.
    pub async fn handle(&self, tool: &str, arguments: &Value) -> Result<Value, GatewayError> {
        match tool {
            "list_tools" => Ok(self.handle_list_tools()),
            "describe_tool" => {
                let tool_name = required_str(arguments, "tool_name")?;
                Ok(self.handle_describe_tool(tool_name).await)
            }
            "call_tool" => {
                let tool_name = required_str(arguments, "tool_name")?;
                let tool_args = arguments
                    .get("arguments")
                    .filter(|v| v.is_object())
                    .cloned()
                    .ok_or_else(|| GatewayError::InvalidParams {
                        reason: "'arguments' object is required".into(),
                    })?;
                Ok(self.handle_call_tool(tool_name, tool_args).await)
            }
            other => Err(GatewayError::InvalidParams {
                reason: format!("'{other}' is not a meta-tool"),
            }),
        }
    }

    fn handle_list_tools(&self) -> Value {
        let mut tools = self.routing.all_tool_names();
        tools.sort();
        // serde_json can always render a Vec<String>
        let listing = serde_json::to_string(&tools).unwrap_or_else(|_| "[]".to_string());
        text_result(listing)
    }

    async fn handle_describe_tool(&self, tool_name: &str) -> Value {
        let Some(backend_name) = self.routing.find_tool_backend(tool_name) else {
            return error_result(format!("Tool '{tool_name}' not found"));
        };

        let Some(backend) = self.registry.get(&backend_name) else {
            return error_result(format!("Backend '{backend_name}' not available"));
        };

        let result = match backend.send("tools/list", json!({})).await {
            Ok(result) => result,
            Err(e) => return error_result(format!("Failed to get tools from backend: {e}")),
        };

        let listing: ToolsListResult = match serde_json::from_value(result) {
            Ok(listing) => listing,
            Err(e) => return error_result(format!("Failed to parse tools response: {e}")),
        };

        match listing.tools.into_iter().find(|t| t.name == tool_name) {
            Some(descriptor) => match serde_json::to_string(&descriptor) {
                Ok(json) => text_result(json),
                Err(e) => error_result(format!("Failed to serialize tool description: {e}")),
            },
            None => error_result(format!(
                "Tool '{tool_name}' not found in backend '{backend_name}'"
            )),
        }
    }

    async fn handle_call_tool(&self, tool_name: &str, arguments: Value) -> Value {
        let Some(backend_name) = self.routing.find_tool_backend(tool_name) else {
            return error_result(format!("Tool '{tool_name}' not found"));
        };

        let Some(backend) = self.registry.get(&backend_name) else {
            return error_result(format!("Backend '{backend_name}' not available"));
        };

        if !backend.healthy() {
            return error_result(format!("Backend '{backend_name}' is not healthy"));
        }

        let params = json!({
            "name": tool_name,
            "arguments": arguments,
        });

        match backend.send("tools/call", params).await {
            // The remote's tool result passes through verbatim.
            Ok(result) if result.is_object() => result,
            Ok(other) => error_result(format!(
                "Unexpected tool result from backend '{backend_name}': {other}"
            )),
            Err(e) => error_result(format!("Failed to call tool on backend: {e}")),
        }
    }
}

fn required_str<'a>(arguments: &'a Value, key: &str) -> Result<&'a str, GatewayError> {
    arguments
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| GatewayError::InvalidParams {
            reason: format!("'{key}' string is required"),
        })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
