//! Capability discovery and the routing table.
//!
//! At startup the gateway initializes every healthy backend, aggregates
//! the capabilities they advertise, and records which backend owns each
//! tool name, resource URI, and prompt name. Discovery tolerates partial
//! failure: a backend that cannot initialize or list contributes nothing
//! and stays in the registry as unhealthy.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::RwLock;

use super::backend::Backend;
use super::errors::GatewayError;
use super::registry::BackendRegistry;
use super::types::{PromptsListResult, ResourcesListResult, ToolsListResult};

// ─── GatewayCapabilities ─────────────────────────────────────────────────────

/// Aggregated capabilities across all backends that completed initialize.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayCapabilities {
    pub tools: bool,
    pub resources: bool,
    pub prompts: bool,
}

// ─── RoutingTable ────────────────────────────────────────────────────────────

/// Three mappings from per-capability key to owning backend name.
///
/// Entries store backend *names*, not references: the table stays freely
/// read-concurrent, backends are dereferenced through the registry, and
/// dumping the table for diagnostics is trivial. Written during discovery,
/// read-only afterwards.
#[derive(Default, Debug)]
pub struct RoutingTable {
    tools: RwLock<HashMap<String, String>>,
    resources: RwLock<HashMap<String, String>>,
    prompts: RwLock<HashMap<String, String>>,
}

impl RoutingTable {
    /// Create an empty routing table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The backend owning a tool name.
    pub fn find_tool_backend(&self, name: &str) -> Option<String> {
        self.tools.read().get(name).cloned()
    }

    /// The backend owning a resource URI. Exact match only; pattern URIs
    /// are out of scope.
    pub fn find_resource_backend(&self, uri: &str) -> Option<String> {
        self.resources.read().get(uri).cloned()
    }

    /// The backend owning a prompt name.
    pub fn find_prompt_backend(&self, name: &str) -> Option<String> {
        self.prompts.read().get(name).cloned()
    }

    /// Snapshot of all routed tool names.
    pub fn all_tool_names(&self) -> Vec<String> {
        self.tools.read().keys().cloned().collect()
    }

    /// Snapshot of all routed resource URIs.
    pub fn all_resource_uris(&self) -> Vec<String> {
        self.resources.read().keys().cloned().collect()
    }

    /// Snapshot of all routed prompt names.
    pub fn all_prompt_names(&self) -> Vec<String> {
        self.prompts.read().keys().cloned().collect()
    }

    /// Whether the table holds no routes at all.
    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
            && self.resources.read().is_empty()
            && self.prompts.read().is_empty()
    }

    pub(crate) fn insert_tool(&self, name: String, backend: String) -> Option<String> {
        self.tools.write().insert(name, backend)
    }

    pub(crate) fn insert_resource(&self, uri: String, backend: String) -> Option<String> {
        self.resources.write().insert(uri, backend)
    }

    pub(crate) fn insert_prompt(&self, name: String, backend: String) -> Option<String> {
        self.prompts.write().insert(name, backend)
    }
}

// ─── CapabilityDiscoverer ────────────────────────────────────────────────────

/// Flags accumulated while discovery tasks run, so that an expired
/// deadline still keeps the contributions of the backends that finished.
#[derive(Default)]
struct FlagAccumulator {
    tools: AtomicBool,
    resources: AtomicBool,
    prompts: AtomicBool,
}

impl FlagAccumulator {
    fn snapshot(&self) -> GatewayCapabilities {
        GatewayCapabilities {
            tools: self.tools.load(Ordering::Relaxed),
            resources: self.resources.load(Ordering::Relaxed),
            prompts: self.prompts.load(Ordering::Relaxed),
        }
    }
}

/// Drives initialize + capability listing across all backends and builds
/// the routing table.
#[derive(Debug)]
pub struct CapabilityDiscoverer {
    registry: Arc<BackendRegistry>,
    routing: Arc<RoutingTable>,
}

impl CapabilityDiscoverer {
    pub fn new(registry: Arc<BackendRegistry>, routing: Arc<RoutingTable>) -> Self {
        Self { registry, routing }
    }

    /// Discover capabilities from all currently-healthy backends.
    ///
    /// Backends are probed in parallel under one outer deadline. On
    /// expiry, whatever routes and flags were accumulated are kept and
    /// the gateway proceeds with partial federation. Per-backend failures
    /// are tolerated, so discovery itself currently cannot fail; the
    /// fallible signature is the contract callers hold it to.
    pub async fn discover(&self, deadline: Duration) -> Result<GatewayCapabilities, GatewayError> {
        let backends = self.registry.healthy();
        let flags = FlagAccumulator::default();

        let probes = backends
            .iter()
            .map(|backend| self.discover_backend(backend, &flags));

        if tokio::time::timeout(deadline, join_all(probes)).await.is_err() {
            tracing::warn!(
                deadline_secs = deadline.as_secs(),
                "discovery deadline exceeded; continuing with partial federation"
            );
        }

        let capabilities = flags.snapshot();
        tracing::info!(
            tools = capabilities.tools,
            resources = capabilities.resources,
            prompts = capabilities.prompts,
            "capability discovery complete"
        );
        Ok(capabilities)
    }

    async fn discover_backend(&self, backend: &Arc<Backend>, flags: &FlagAccumulator) {
        let name = backend.info().name.clone();
        tracing::info!(backend = %name, "discovering capabilities");

        let init = match backend.initialize().await {
            Ok(init) => init,
            Err(e) => {
                tracing::warn!(backend = %name, error = %e, "backend initialization failed; skipping");
                return;
            }
        };

        if init.capabilities.tools.is_some() {
            flags.tools.store(true, Ordering::Relaxed);
            if let Err(e) = self.discover_tools(backend).await {
                tracing::warn!(backend = %name, error = %e, "failed to discover tools");
            }
        }

        if init.capabilities.resources.is_some() {
            flags.resources.store(true, Ordering::Relaxed);
            if let Err(e) = self.discover_resources(backend).await {
                tracing::warn!(backend = %name, error = %e, "failed to discover resources");
            }
        }

        if init.capabilities.prompts.is_some() {
            flags.prompts.store(true, Ordering::Relaxed);
            if let Err(e) = self.discover_prompts(backend).await {
                tracing::warn!(backend = %name, error = %e, "failed to discover prompts");
            }
        }
    }

    async fn discover_tools(&self, backend: &Backend) -> Result<(), GatewayError> {
        let name = &backend.info().name;
        let result = backend.send("tools/list", serde_json::json!({})).await?;
        let listing: ToolsListResult =
            serde_json::from_value(result).map_err(|e| GatewayError::Protocol {
                backend: name.clone(),
                reason: format!("failed to parse tools list: {e}"),
            })?;

        for tool in listing.tools {
            let previous = self.routing.insert_tool(tool.name.clone(), name.clone());
            if let Some(previous) = previous.filter(|p| p != name) {
                tracing::warn!(
                    tool = %tool.name,
                    previous_backend = %previous,
                    backend = %name,
                    "tool name collision; last writer wins"
                );
            } else {
                tracing::debug!(tool = %tool.name, backend = %name, "mapped tool");
            }
        }
        Ok(())
    }

    async fn discover_resources(&self, backend: &Backend) -> Result<(), GatewayError> {
        let name = &backend.info().name;
        let result = backend.send("resources/list", serde_json::json!({})).await?;
        let listing: ResourcesListResult =
            serde_json::from_value(result).map_err(|e| GatewayError::Protocol {
                backend: name.clone(),
                reason: format!("failed to parse resources list: {e}"),
            })?;

        for resource in listing.resources {
            let previous = self
                .routing
                .insert_resource(resource.uri.clone(), name.clone());
            if let Some(previous) = previous.filter(|p| p != name) {
                tracing::warn!(
                    uri = %resource.uri,
                    previous_backend = %previous,
                    backend = %name,
                    "resource URI collision; last writer wins"
                );
            } else {
                tracing::debug!(uri = %resource.uri, backend = %name, "mapped resource");
            }
        }
        Ok(())
    }

    async fn discover_prompts(&self, backend: &Backend) -> Result<(), GatewayError> {
        let name = &backend.info().name;
        let result = backend.send("prompts/list", serde_json::json!({})).await?;
        let listing: PromptsListResult =
            serde_json::from_value(result).map_err(|e| GatewayError::Protocol {
                backend: name.clone(),
                reason: format!("failed to parse prompts list: {e}"),
            })?;

        for prompt in listing.prompts {
            let previous = self.routing.insert_prompt(prompt.name.clone(), name.clone());
            if let Some(previous) = previous.filter(|p| p != name) {
                tracing::warn!(
                    prompt = %prompt.name,
                    previous_backend = %previous,
                    backend = %name,
                    "prompt name collision; last writer wins"
                );
            } else {
                tracing::debug!(prompt = %prompt.name, backend = %name, "mapped prompt");
            }
        }
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;
    use crate::gateway::testutil::{MockBackendServer, MockSpec};
    use crate::gateway::types::{PromptDescriptor, ResourceDescriptor, ToolDescriptor};

    fn tool(name: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: name.to_string(),
            description: format!("Test tool: {name}"),
            input_schema: serde_json::json!({"type": "object"}),
        }
    }

    fn resource(uri: &str) -> ResourceDescriptor {
        ResourceDescriptor {
            uri: uri.to_string(),
            name: None,
            description: None,
            mime_type: None,
        }
    }

    fn prompt(name: &str) -> PromptDescriptor {
        PromptDescriptor {
            name: name.to_string(),
            description: None,
            arguments: None,
        }
    }

    fn http_backend(name: &str, url: &str) -> Backend {
        let cfg = BackendConfig {
            name: name.to_string(),
            transport: "http".to_string(),
            endpoint: Some(url.to_string()),
            headers: Default::default(),
            command: None,
            args: Vec::new(),
            env: Default::default(),
        };
        Backend::from_config(&cfg, "test", Duration::from_secs(5)).unwrap()
    }

    fn harness() -> (Arc<BackendRegistry>, Arc<RoutingTable>, CapabilityDiscoverer) {
        let registry = Arc::new(BackendRegistry::new());
        let routing = Arc::new(RoutingTable::new());
        let discoverer = CapabilityDiscoverer::new(registry.clone(), routing.clone());
        (registry, routing, discoverer)
    }

    #[test]
    fn test_routing_table_lookup() {
        let table = RoutingTable::new();
        assert!(table.is_empty());

        table.insert_tool("git_commit".into(), "b1".into());
        table.insert_resource("file://a".into(), "b2".into());
        table.insert_prompt("greeting".into(), "b2".into());

        assert_eq!(table.find_tool_backend("git_commit").as_deref(), Some("b1"));
        assert_eq!(table.find_resource_backend("file://a").as_deref(), Some("b2"));
        assert_eq!(table.find_prompt_backend("greeting").as_deref(), Some("b2"));
        assert!(!table.is_empty());
    }

    #[test]
    fn test_routing_table_resource_match_is_exact() {
        let table = RoutingTable::new();
        table.insert_resource("file://a".into(), "b1".into());

        assert!(table.find_resource_backend("file://a").is_some());
        assert!(table.find_resource_backend("file://a/b").is_none());
        assert!(table.find_resource_backend("file://").is_none());
    }

    #[tokio::test]
    async fn test_discover_two_backends() {
        // S1: B1 advertises tools, B2 advertises tools + resources
        let b1 = MockBackendServer::spawn(MockSpec {
            tools: vec![tool("git_commit")],
            ..Default::default()
        })
        .await;
        let b2 = MockBackendServer::spawn(MockSpec {
            tools: vec![tool("read_file")],
            resources: vec![resource("file://a")],
            ..Default::default()
        })
        .await;

        let (registry, routing, discoverer) = harness();
        registry.add(http_backend("B1", &b1.url));
        registry.add(http_backend("B2", &b2.url));

        let capabilities = discoverer.discover(Duration::from_secs(30)).await.unwrap();

        assert!(capabilities.tools);
        assert!(capabilities.resources);
        assert!(!capabilities.prompts);

        assert_eq!(routing.find_tool_backend("git_commit").as_deref(), Some("B1"));
        assert_eq!(routing.find_tool_backend("read_file").as_deref(), Some("B2"));
        assert_eq!(routing.find_resource_backend("file://a").as_deref(), Some("B2"));

        let mut names = routing.all_tool_names();
        names.sort();
        assert_eq!(names, vec!["git_commit", "read_file"]);
    }

    #[tokio::test]
    async fn test_discover_zero_backends() {
        let (_registry, routing, discoverer) = harness();
        let capabilities = discoverer.discover(Duration::from_secs(5)).await.unwrap();

        assert_eq!(capabilities, GatewayCapabilities::default());
        assert!(routing.is_empty());
    }

    #[tokio::test]
    async fn test_failed_backend_is_skipped() {
        let live = MockBackendServer::spawn(MockSpec {
            tools: vec![tool("git_commit")],
            ..Default::default()
        })
        .await;

        let (registry, routing, discoverer) = harness();
        registry.add(http_backend("live", &live.url));
        registry.add(http_backend("dead", "http://127.0.0.1:9/mcp"));

        let capabilities = discoverer.discover(Duration::from_secs(30)).await.unwrap();

        assert!(capabilities.tools);
        assert_eq!(routing.find_tool_backend("git_commit").as_deref(), Some("live"));

        // The dead backend contributed nothing but is still registered,
        // now unhealthy.
        assert_eq!(registry.len(), 2);
        assert!(!registry.get("dead").unwrap().healthy());
    }

    #[tokio::test]
    async fn test_listing_failure_keeps_flag() {
        let server = MockBackendServer::spawn(MockSpec {
            fail_tools_list: true,
            ..Default::default()
        })
        .await;

        let (registry, routing, discoverer) = harness();
        registry.add(http_backend("b1", &server.url));

        let capabilities = discoverer.discover(Duration::from_secs(30)).await.unwrap();

        // The capability was advertised, so the flag is on even though
        // the listing failed and contributed no routes.
        assert!(capabilities.tools);
        assert!(routing.all_tool_names().is_empty());
    }

    #[tokio::test]
    async fn test_tool_name_collision_last_writer_wins() {
        let b1 = MockBackendServer::spawn(MockSpec {
            tools: vec![tool("shared_tool")],
            ..Default::default()
        })
        .await;
        let b2 = MockBackendServer::spawn(MockSpec {
            tools: vec![tool("shared_tool")],
            ..Default::default()
        })
        .await;

        let (registry, routing, discoverer) = harness();
        registry.add(http_backend("B1", &b1.url));
        registry.add(http_backend("B2", &b2.url));

        discoverer.discover(Duration::from_secs(30)).await.unwrap();

        // Exactly one owner; which one depends on discovery order.
        let owner = routing.find_tool_backend("shared_tool").unwrap();
        assert!(owner == "B1" || owner == "B2");
        assert_eq!(routing.all_tool_names().len(), 1);
    }

    #[tokio::test]
    async fn test_discover_prompts() {
        let server = MockBackendServer::spawn(MockSpec {
            prompts: vec![prompt("greeting")],
            ..Default::default()
        })
        .await;

        let (registry, routing, discoverer) = harness();
        registry.add(http_backend("b1", &server.url));

        let capabilities = discoverer.discover(Duration::from_secs(30)).await.unwrap();

        assert!(capabilities.prompts);
        assert!(!capabilities.tools);
        assert_eq!(routing.find_prompt_backend("greeting").as_deref(), Some("b1"));
    }
}
