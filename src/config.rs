//! Gateway configuration.
//!
//! Loads the YAML configuration file, expands environment variables in
//! backend fields, and validates the result before the gateway consumes
//! it. The structure mirrors the file layout:
//!
//! ```yaml
//! gateway:
//!   host: 0.0.0.0
//!   port: 8080
//!   endpoint: /mcp
//!   timeout: 30
//! groups:
//!   - name: dev-tools
//!     backends:
//!       - name: git
//!         transport: stdio
//!         command: mcp-git
//!       - name: search
//!         transport: http
//!         endpoint: https://search.internal/mcp
//!         headers:
//!           Authorization: Bearer ${SEARCH_TOKEN}
//! middleware:
//!   caching:
//!     enabled: true
//!     ttl: 300
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::gateway::GatewayError;

// ─── Structure ──────────────────────────────────────────────────────────────

/// Top-level gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewaySettings,
    pub groups: Vec<Group>,
    #[serde(default)]
    pub middleware: MiddlewareConfig,
}

/// Settings for the client-facing HTTP surface.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    pub host: String,
    pub port: u16,
    pub endpoint: String,
    /// Per-call backend timeout in seconds.
    pub timeout: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            endpoint: "/mcp".to_string(),
            timeout: 30,
        }
    }
}

/// A named group of backends.
#[derive(Debug, Clone, Deserialize)]
pub struct Group {
    pub name: String,
    pub backends: Vec<BackendConfig>,
}

/// One backend entry inside a group.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub name: String,
    pub transport: String,
    /// HTTP transport: endpoint URL (required).
    #[serde(default)]
    pub endpoint: Option<String>,
    /// HTTP transport: extra request headers.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Stdio transport: executable (required).
    #[serde(default)]
    pub command: Option<String>,
    /// Stdio transport: arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Stdio transport: environment merged over the inherited one.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Middleware knobs consumed by the core.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MiddlewareConfig {
    pub logging: LoggingConfig,
    pub caching: CachingConfig,
}

/// Logging level seed for the tracing subscriber.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
        }
    }
}

/// TTL cache settings for aggregate listings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CachingConfig {
    pub enabled: bool,
    /// Entry lifetime in seconds.
    pub ttl: u64,
}

impl Default for CachingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: 300,
        }
    }
}

// ─── Loading ────────────────────────────────────────────────────────────────

/// Paths searched when no explicit config path is given.
const DEFAULT_SEARCH_PATHS: [&str; 2] = ["./config.yaml", "./config/config.yaml"];

impl Config {
    /// Load, expand, and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, GatewayError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| GatewayError::Config {
            reason: format!("failed to read config file {}: {e}", path.display()),
        })?;
        Self::from_yaml(&content)
    }

    /// Load from the first default search path that exists.
    pub fn load_default() -> Result<Self, GatewayError> {
        for path in DEFAULT_SEARCH_PATHS {
            if Path::new(path).exists() {
                return Self::load(path);
            }
        }
        Err(GatewayError::Config {
            reason: format!(
                "no config file found (searched: {})",
                DEFAULT_SEARCH_PATHS.join(", ")
            ),
        })
    }

    /// Parse a YAML document, expand environment variables, and validate.
    pub fn from_yaml(content: &str) -> Result<Self, GatewayError> {
        let mut config: Config =
            serde_yaml::from_str(content).map_err(|e| GatewayError::Config {
                reason: format!("failed to parse config: {e}"),
            })?;
        config.expand_env();
        config.validate()?;
        Ok(config)
    }

    /// Expand `${VAR}` / `$VAR` references in all backend string fields.
    fn expand_env(&mut self) {
        for group in &mut self.groups {
            for backend in &mut group.backends {
                if let Some(endpoint) = &backend.endpoint {
                    backend.endpoint = Some(expand_env_str(endpoint));
                }
                if let Some(command) = &backend.command {
                    backend.command = Some(expand_env_str(command));
                }
                for arg in &mut backend.args {
                    *arg = expand_env_str(arg);
                }
                for value in backend.env.values_mut() {
                    *value = expand_env_str(value);
                }
                for value in backend.headers.values_mut() {
                    *value = expand_env_str(value);
                }
            }
        }
    }

    /// Validate the configuration. Also re-run by the gateway on ingest.
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.gateway.port == 0 {
            return Err(GatewayError::Config {
                reason: format!("invalid port number: {}", self.gateway.port),
            });
        }

        if !self.gateway.endpoint.starts_with('/') {
            return Err(GatewayError::Config {
                reason: format!(
                    "gateway endpoint must be an absolute path, got '{}'",
                    self.gateway.endpoint
                ),
            });
        }

        if self.groups.is_empty() {
            return Err(GatewayError::Config {
                reason: "at least one group must be defined".into(),
            });
        }

        let mut group_names = std::collections::HashSet::new();
        let mut backend_names = std::collections::HashSet::new();

        for group in &self.groups {
            if group.name.is_empty() {
                return Err(GatewayError::Config {
                    reason: "group name cannot be empty".into(),
                });
            }
            if !group_names.insert(group.name.as_str()) {
                return Err(GatewayError::Config {
                    reason: format!("duplicate group name: {}", group.name),
                });
            }
            if group.backends.is_empty() {
                return Err(GatewayError::Config {
                    reason: format!("group '{}' must have at least one backend", group.name),
                });
            }

            for backend in &group.backends {
                if backend.name.is_empty() {
                    return Err(GatewayError::Config {
                        reason: format!("backend name cannot be empty in group '{}'", group.name),
                    });
                }
                // Backend names are globally unique: the routing table keys
                // on the bare name.
                if !backend_names.insert(backend.name.as_str()) {
                    return Err(GatewayError::Config {
                        reason: format!("duplicate backend name: {}", backend.name),
                    });
                }
                validate_backend(backend, &group.name)?;
            }
        }

        Ok(())
    }
}

fn validate_backend(backend: &BackendConfig, group_name: &str) -> Result<(), GatewayError> {
    match backend.transport.as_str() {
        "stdio" => {
            if backend.command.as_deref().unwrap_or("").is_empty() {
                return Err(GatewayError::Config {
                    reason: format!(
                        "command is required for stdio transport in backend '{}' (group '{}')",
                        backend.name, group_name
                    ),
                });
            }
        }
        "http" => {
            if backend.endpoint.as_deref().unwrap_or("").is_empty() {
                return Err(GatewayError::Config {
                    reason: format!(
                        "endpoint is required for http transport in backend '{}' (group '{}')",
                        backend.name, group_name
                    ),
                });
            }
        }
        other => {
            return Err(GatewayError::Config {
                reason: format!(
                    "unsupported transport type '{other}' in backend '{}' (group '{}')",
                    backend.name, group_name
                ),
            });
        }
    }
    Ok(())
}

// ─── Environment Expansion ──────────────────────────────────────────────────

/// Expand `${VAR}` and `$VAR` references against the process environment.
///
/// Undefined variables expand to the empty string. A literal `$` not
/// followed by a name character is kept as-is.
fn expand_env_str(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }

        match chars.peek() {
            Some((_, '{')) => {
                chars.next();
                let mut name = String::new();
                let mut closed = false;
                for (_, c) in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    name.push(c);
                }
                if closed {
                    out.push_str(&std::env::var(&name).unwrap_or_default());
                } else {
                    // Unterminated ${ — keep the literal text
                    out.push_str("${");
                    out.push_str(&name);
                }
            }
            Some((_, c)) if c.is_ascii_alphanumeric() || *c == '_' => {
                let mut name = String::new();
                while let Some((_, c)) = chars.peek() {
                    if c.is_ascii_alphanumeric() || *c == '_' {
                        name.push(*c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(&std::env::var(&name).unwrap_or_default());
            }
            _ => out.push('$'),
        }
    }

    out
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
groups:
  - name: dev
    backends:
      - name: git
        transport: stdio
        command: mcp-git
"#;

    #[test]
    fn test_minimal_config_with_defaults() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.gateway.host, "0.0.0.0");
        assert_eq!(config.gateway.port, 8080);
        assert_eq!(config.gateway.endpoint, "/mcp");
        assert_eq!(config.gateway.timeout, 30);
        assert!(config.middleware.caching.enabled);
        assert_eq!(config.middleware.caching.ttl, 300);
        assert_eq!(config.middleware.logging.level, "info");
        assert_eq!(config.groups.len(), 1);
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
gateway:
  host: 127.0.0.1
  port: 9090
  endpoint: /gateway
  timeout: 10
groups:
  - name: dev
    backends:
      - name: search
        transport: http
        endpoint: http://localhost:3000/mcp
        headers:
          X-Api-Key: secret
      - name: git
        transport: stdio
        command: mcp-git
        args: ["--repo", "/src"]
        env:
          GIT_DIR: /src/.git
middleware:
  caching:
    enabled: false
    ttl: 60
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.gateway.port, 9090);
        assert!(!config.middleware.caching.enabled);

        let dev = &config.groups[0];
        assert_eq!(dev.backends[0].transport, "http");
        assert_eq!(dev.backends[0].headers["X-Api-Key"], "secret");
        assert_eq!(dev.backends[1].args, vec!["--repo", "/src"]);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.groups[0].backends[0].name, "git");
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load("/nonexistent/config.yaml").unwrap_err();
        assert!(matches!(err, GatewayError::Config { .. }));
    }

    #[test]
    fn test_invalid_port() {
        let yaml = r#"
gateway:
  port: 0
groups:
  - name: dev
    backends:
      - name: git
        transport: stdio
        command: mcp-git
"#;
        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("invalid port"));
    }

    #[test]
    fn test_empty_groups_rejected() {
        let err = Config::from_yaml("groups: []\n").unwrap_err();
        assert!(err.to_string().contains("at least one group"));
    }

    #[test]
    fn test_http_backend_requires_endpoint() {
        let yaml = r#"
groups:
  - name: dev
    backends:
      - name: search
        transport: http
"#;
        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("endpoint is required"));
    }

    #[test]
    fn test_stdio_backend_requires_command() {
        let yaml = r#"
groups:
  - name: dev
    backends:
      - name: git
        transport: stdio
"#;
        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("command is required"));
    }

    #[test]
    fn test_unsupported_transport() {
        let yaml = r#"
groups:
  - name: dev
    backends:
      - name: ws
        transport: websocket
        endpoint: ws://localhost
"#;
        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("unsupported transport"));
    }

    #[test]
    fn test_duplicate_backend_names_rejected() {
        let yaml = r#"
groups:
  - name: a
    backends:
      - name: git
        transport: stdio
        command: mcp-git
  - name: b
    backends:
      - name: git
        transport: stdio
        command: other-git
"#;
        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate backend name"));
    }

    #[test]
    fn test_duplicate_group_names_rejected() {
        let yaml = r#"
groups:
  - name: dev
    backends:
      - name: a
        transport: stdio
        command: x
  - name: dev
    backends:
      - name: b
        transport: stdio
        command: y
"#;
        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate group name"));
    }

    #[test]
    fn test_expand_env_str() {
        std::env::set_var("GATEWAY_TEST_TOKEN", "tok123");

        assert_eq!(expand_env_str("Bearer ${GATEWAY_TEST_TOKEN}"), "Bearer tok123");
        assert_eq!(expand_env_str("$GATEWAY_TEST_TOKEN"), "tok123");
        assert_eq!(expand_env_str("no refs here"), "no refs here");
        // Undefined variables expand to empty
        assert_eq!(expand_env_str("x${GATEWAY_TEST_UNDEFINED}y"), "xy");
        // Bare dollar is preserved
        assert_eq!(expand_env_str("cost: $ 5"), "cost: $ 5");

        std::env::remove_var("GATEWAY_TEST_TOKEN");
    }

    #[test]
    fn test_env_expansion_in_backend_fields() {
        std::env::set_var("GATEWAY_TEST_HOST", "api.example.com");

        let yaml = r#"
groups:
  - name: dev
    backends:
      - name: search
        transport: http
        endpoint: https://${GATEWAY_TEST_HOST}/mcp
        headers:
          Authorization: Bearer ${GATEWAY_TEST_HOST}
"#;
        let config = Config::from_yaml(yaml).unwrap();
        let backend = &config.groups[0].backends[0];
        assert_eq!(backend.endpoint.as_deref(), Some("https://api.example.com/mcp"));
        assert_eq!(backend.headers["Authorization"], "Bearer api.example.com");

        std::env::remove_var("GATEWAY_TEST_HOST");
    }
}
