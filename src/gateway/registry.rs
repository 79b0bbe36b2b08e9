//! Backend registry — the set of live backends, indexed by unique name.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::backend::Backend;

/// Concurrent-safe collection of backends.
///
/// Reads dominate after construction: lookups during routing take a read
/// lock; writes happen only while the gateway is being built.
#[derive(Default, Debug)]
pub struct BackendRegistry {
    backends: RwLock<HashMap<String, Arc<Backend>>>,
}

impl BackendRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a backend under its own name.
    ///
    /// A later insert with the same name overwrites: the registry trusts
    /// the configuration to have enforced global uniqueness.
    pub fn add(&self, backend: Backend) {
        let name = backend.info().name.clone();
        self.backends.write().insert(name, Arc::new(backend));
    }

    /// Look up a backend by name.
    pub fn get(&self, name: &str) -> Option<Arc<Backend>> {
        self.backends.read().get(name).cloned()
    }

    /// Snapshot of all backends.
    pub fn all(&self) -> Vec<Arc<Backend>> {
        self.backends.read().values().cloned().collect()
    }

    /// Snapshot of the backends whose most recent call succeeded.
    pub fn healthy(&self) -> Vec<Arc<Backend>> {
        self.backends
            .read()
            .values()
            .filter(|b| b.healthy())
            .cloned()
            .collect()
    }

    /// Number of registered backends.
    pub fn len(&self) -> usize {
        self.backends.read().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every backend. Individual failures are logged and do not
    /// stop the remaining backends from closing. Safe to call repeatedly.
    pub async fn close(&self) {
        for backend in self.all() {
            let name = backend.info().name.clone();
            tracing::debug!(backend = %name, "closing backend");
            backend.close().await;
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;
    use std::time::Duration;

    fn http_backend(name: &str, endpoint: &str) -> Backend {
        let cfg = BackendConfig {
            name: name.to_string(),
            transport: "http".to_string(),
            endpoint: Some(endpoint.to_string()),
            headers: Default::default(),
            command: None,
            args: Vec::new(),
            env: Default::default(),
        };
        Backend::from_config(&cfg, "test", Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn test_add_and_get() {
        let registry = BackendRegistry::new();
        registry.add(http_backend("b1", "http://localhost:3000/mcp"));

        assert!(registry.get("b1").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_same_name_overwrites() {
        let registry = BackendRegistry::new();
        registry.add(http_backend("b1", "http://localhost:3000/mcp"));
        registry.add(http_backend("b1", "http://localhost:4000/mcp"));

        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_all_snapshot() {
        let registry = BackendRegistry::new();
        registry.add(http_backend("b1", "http://localhost:3000/mcp"));
        registry.add(http_backend("b2", "http://localhost:4000/mcp"));

        let names: Vec<String> = registry
            .all()
            .iter()
            .map(|b| b.info().name.clone())
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"b1".to_string()));
        assert!(names.contains(&"b2".to_string()));
    }

    #[tokio::test]
    async fn test_healthy_filters_failed_backends() {
        let registry = BackendRegistry::new();
        registry.add(http_backend("up", "http://localhost:3000/mcp"));
        registry.add(http_backend("down", "http://127.0.0.1:9/mcp"));

        // Fresh backends all start healthy
        assert_eq!(registry.healthy().len(), 2);

        // A failed call flips the flag
        let down = registry.get("down").unwrap();
        let _ = down.send("tools/list", serde_json::json!({})).await;

        let healthy: Vec<String> = registry
            .healthy()
            .iter()
            .map(|b| b.info().name.clone())
            .collect();
        assert_eq!(healthy, vec!["up".to_string()]);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let registry = BackendRegistry::new();
        registry.add(http_backend("b1", "http://localhost:3000/mcp"));

        registry.close().await;
        registry.close().await;
        assert_eq!(registry.len(), 1);
    }
}
