//! The gateway server.
//!
//! Wires the registry, discovery, routing table, meta-tool facade, and
//! listing cache together and dispatches client JSON-RPC calls:
//! - `initialize` answers with dynamically-computed capabilities
//! - `tools/*` goes through the meta-tool facade only
//! - `resources/*` and `prompts/*` route by exact key and forward
//!
//! Lifecycle: Constructed → (initialize) → Serving → (close) → Closed,
//! with a terminal Failed state entered when initialize errors. Failed
//! and Closed accept no further lifecycle transitions.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::{json, Value};

use super::cache::ListingCache;
use super::discovery::{CapabilityDiscoverer, GatewayCapabilities, RoutingTable};
use super::errors::GatewayError;
use super::metatools::{is_meta_tool, meta_tool_descriptors, MetaToolHandler};
use super::registry::BackendRegistry;
use super::types::{
    error_codes, IncomingRequest, JsonRpcResponse, GATEWAY_NAME, GATEWAY_VERSION,
    PROTOCOL_VERSION,
};
use crate::config::Config;
use crate::gateway::backend::Backend;

/// Outer deadline for startup capability discovery.
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);

// ─── Lifecycle ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Constructed,
    Serving,
    /// Initialize failed. Terminal.
    Failed,
    Closed,
}

// ─── Gateway ─────────────────────────────────────────────────────────────────

/// The federating MCP gateway.
#[derive(Debug)]
pub struct Gateway {
    registry: Arc<BackendRegistry>,
    routing: Arc<RoutingTable>,
    discoverer: CapabilityDiscoverer,
    metatools: MetaToolHandler,
    cache: ListingCache,
    capabilities: RwLock<GatewayCapabilities>,
    state: RwLock<Lifecycle>,
}

impl Gateway {
    /// Build a gateway from a validated configuration.
    ///
    /// Instantiates one backend per configuration entry and registers it.
    /// An unsupported transport fails construction.
    pub fn new(config: &Config) -> Result<Self, GatewayError> {
        config.validate()?;

        let timeout = Duration::from_secs(config.gateway.timeout);
        let registry = Arc::new(BackendRegistry::new());

        for group in &config.groups {
            for backend_cfg in &group.backends {
                let backend = Backend::from_config(backend_cfg, &group.name, timeout)?;
                tracing::info!(
                    backend = %backend_cfg.name,
                    transport = %backend_cfg.transport,
                    group = %group.name,
                    "added backend"
                );
                registry.add(backend);
            }
        }

        let routing = Arc::new(RoutingTable::new());
        let discoverer = CapabilityDiscoverer::new(registry.clone(), routing.clone());
        let metatools = MetaToolHandler::new(registry.clone(), routing.clone());

        let cache = if config.middleware.caching.enabled {
            ListingCache::new(Duration::from_secs(config.middleware.caching.ttl))
        } else {
            ListingCache::disabled()
        };

        Ok(Self {
            registry,
            routing,
            discoverer,
            metatools,
            cache,
            capabilities: RwLock::new(GatewayCapabilities::default()),
            state: RwLock::new(Lifecycle::Constructed),
        })
    }

    /// Run capability discovery and enter the serving state.
    ///
    /// Discovery tolerates per-backend failures; the gateway serves
    /// whatever federation was established. Calling this twice, or after
    /// close, is an error.
    pub async fn initialize(&self) -> Result<(), GatewayError> {
        {
            let state = self.state.read();
            if *state != Lifecycle::Constructed {
                return Err(GatewayError::Server {
                    reason: format!("cannot initialize gateway in {:?} state", *state),
                });
            }
        }

        tracing::info!("initializing MCP gateway");
        let capabilities = match self.discoverer.discover(DISCOVERY_TIMEOUT).await {
            Ok(capabilities) => capabilities,
            Err(e) => {
                tracing::error!(error = %e, "gateway initialization failed");
                *self.state.write() = Lifecycle::Failed;
                return Err(e);
            }
        };

        *self.capabilities.write() = capabilities;
        *self.state.write() = Lifecycle::Serving;

        tracing::info!(
            tools = capabilities.tools,
            resources = capabilities.resources,
            prompts = capabilities.prompts,
            "gateway serving"
        );
        Ok(())
    }

    /// Aggregated capability flags.
    pub fn capabilities(&self) -> GatewayCapabilities {
        *self.capabilities.read()
    }

    /// The backend registry (exposed for tests and diagnostics).
    pub fn registry(&self) -> Arc<BackendRegistry> {
        self.registry.clone()
    }

    /// The routing table (exposed for tests and diagnostics).
    pub fn routing_table(&self) -> Arc<RoutingTable> {
        self.routing.clone()
    }

    /// Close all backends. Idempotent; safe to call twice.
    ///
    /// Failed is terminal: backends are still released, but the state
    /// does not transition.
    pub async fn close(&self) {
        {
            let mut state = self.state.write();
            match *state {
                Lifecycle::Closed => return,
                Lifecycle::Failed => {}
                _ => *state = Lifecycle::Closed,
            }
        }
        tracing::info!("closing MCP gateway");
        self.registry.close().await;
    }

    // ─── Dispatch ────────────────────────────────────────────────────────

    /// Dispatch one client JSON-RPC message.
    ///
    /// Returns `None` for notifications, which get no response.
    pub async fn handle_request(&self, request: IncomingRequest) -> Option<JsonRpcResponse> {
        if request.is_notification() {
            tracing::debug!(method = %request.method, "dropping notification");
            return None;
        }

        let id = request.response_id();

        {
            let state = self.state.read();
            if *state != Lifecycle::Serving {
                return Some(JsonRpcResponse::error(
                    id,
                    error_codes::INTERNAL_ERROR,
                    "gateway is not serving",
                ));
            }
        }

        let capabilities = self.capabilities();
        let params = request.params.unwrap_or_else(|| json!({}));

        let response = match request.method.as_str() {
            "initialize" => self.handle_initialize(id, capabilities),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" if capabilities.tools => {
                JsonRpcResponse::success(id, json!({"tools": meta_tool_descriptors()}))
            }
            "tools/call" if capabilities.tools => self.handle_tools_call(id, &params).await,
            "resources/list" if capabilities.resources => {
                let payload = self.aggregate_listing("resources/list", "resources").await;
                JsonRpcResponse::success(id, payload)
            }
            "resources/read" if capabilities.resources => {
                self.handle_resources_read(id, &params).await
            }
            "prompts/list" if capabilities.prompts => {
                let payload = self.aggregate_listing("prompts/list", "prompts").await;
                JsonRpcResponse::success(id, payload)
            }
            "prompts/get" if capabilities.prompts => self.handle_prompts_get(id, &params).await,
            method => JsonRpcResponse::error(
                id,
                error_codes::METHOD_NOT_FOUND,
                format!("method '{method}' not found"),
            ),
        };

        Some(response)
    }

    fn handle_initialize(&self, id: Value, capabilities: GatewayCapabilities) -> JsonRpcResponse {
        let mut caps = serde_json::Map::new();
        if capabilities.tools {
            caps.insert("tools".into(), json!({}));
        }
        if capabilities.resources {
            caps.insert("resources".into(), json!({}));
        }
        if capabilities.prompts {
            caps.insert("prompts".into(), json!({}));
        }

        JsonRpcResponse::success(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": caps,
                "serverInfo": {
                    "name": GATEWAY_NAME,
                    "version": GATEWAY_VERSION,
                },
            }),
        )
    }

    async fn handle_tools_call(&self, id: Value, params: &Value) -> JsonRpcResponse {
        let Some(name) = params.get("name").and_then(|v| v.as_str()) else {
            return JsonRpcResponse::error(
                id,
                error_codes::INVALID_PARAMS,
                "tool name is required",
            );
        };

        // Backend-native tool names are not callable directly; the three
        // meta-tools are the only legal entry points.
        if !is_meta_tool(name) {
            tracing::warn!(tool = %name, "rejected direct tool call");
            return JsonRpcResponse::error(
                id,
                error_codes::METHOD_NOT_FOUND,
                format!("direct tool calls are prohibited; use the meta-tools (requested tool: '{name}')"),
            );
        }

        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

        match self.metatools.handle(name, &arguments).await {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(e) => JsonRpcResponse::error(id, e.jsonrpc_code(), e.to_string()),
        }
    }

    async fn handle_resources_read(&self, id: Value, params: &Value) -> JsonRpcResponse {
        let Some(uri) = params.get("uri").and_then(|v| v.as_str()) else {
            return JsonRpcResponse::error(
                id,
                error_codes::INVALID_PARAMS,
                "resource uri is required",
            );
        };

        let Some(backend_name) = self.routing.find_resource_backend(uri) else {
            return JsonRpcResponse::error(
                id,
                error_codes::INVALID_PARAMS,
                format!("resource '{uri}' not found"),
            );
        };

        self.forward(id, &backend_name, "resources/read", json!({"uri": uri}))
            .await
    }

    async fn handle_prompts_get(&self, id: Value, params: &Value) -> JsonRpcResponse {
        let Some(name) = params.get("name").and_then(|v| v.as_str()) else {
            return JsonRpcResponse::error(
                id,
                error_codes::INVALID_PARAMS,
                "prompt name is required",
            );
        };

        let Some(backend_name) = self.routing.find_prompt_backend(name) else {
            return JsonRpcResponse::error(
                id,
                error_codes::INVALID_PARAMS,
                format!("prompt '{name}' not found"),
            );
        };

        let mut forward_params = serde_json::Map::new();
        forward_params.insert("name".into(), json!(name));
        if let Some(arguments) = params.get("arguments") {
            forward_params.insert("arguments".into(), arguments.clone());
        }

        self.forward(id, &backend_name, "prompts/get", Value::Object(forward_params))
            .await
    }

    /// Forward a routed request to its owning backend verbatim.
    async fn forward(
        &self,
        id: Value,
        backend_name: &str,
        method: &str,
        params: Value,
    ) -> JsonRpcResponse {
        let Some(backend) = self.registry.get(backend_name) else {
            return JsonRpcResponse::error(
                id,
                error_codes::INTERNAL_ERROR,
                format!("backend '{backend_name}' not available"),
            );
        };

        match backend.send(method, params).await {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(e) => {
                tracing::warn!(backend = %backend_name, method, error = %e, "routed call failed");
                JsonRpcResponse::error(id, e.jsonrpc_code(), e.to_string())
            }
        }
    }

    /// Aggregate a listing method across all healthy backends, behind the
    /// TTL cache. Per-backend failures are logged and skipped.
    async fn aggregate_listing(&self, method: &str, key: &str) -> Value {
        if let Some(cached) = self.cache.get(method) {
            tracing::debug!(method, "serving aggregate listing from cache");
            return cached;
        }

        let mut items: Vec<Value> = Vec::new();
        for backend in self.registry.healthy() {
            let name = backend.info().name.clone();
            match backend.send(method, json!({})).await {
                Ok(result) => match result.get(key).and_then(|v| v.as_array()) {
                    Some(entries) => items.extend(entries.iter().cloned()),
                    None => {
                        tracing::warn!(backend = %name, method, key, "listing result missing expected array");
                    }
                },
                Err(e) => {
                    tracing::warn!(backend = %name, method, error = %e, "failed to aggregate listing");
                }
            }
        }

        let mut payload = serde_json::Map::new();
        payload.insert(key.to_string(), Value::Array(items));
        let payload = Value::Object(payload);

        self.cache.put(method, payload.clone());
        payload
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
