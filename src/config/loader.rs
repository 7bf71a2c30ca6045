//! Tool service configuration files.
//!
//! The file is a JSON object mapping service name to an entry, optionally
//! wrapped in `{"mcpServers": {...}}`. Invalid entries are logged and
//! skipped so that one bad service never hides the others.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

use super::{ServiceConfig, SseConfig, StdioConfig, TransportConfig, WireProtocol};
use crate::error::{GatewayError, Result};

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "MCP_CONFIG_PATH";

const SERVICE_ENV_PREFIX: &str = "MCP_SERVICE_";
const SERVICE_ENV_SUFFIX: &str = "_SERVER_URL";

#[derive(Debug, Deserialize)]
struct RawServiceEntry {
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    transport: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    #[serde(default)]
    cwd: Option<PathBuf>,
    #[serde(default)]
    protocol: Option<WireProtocol>,
}

/// Locates and parses tool service configuration.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    base_dir: PathBuf,
    explicit_path: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Loader rooted at the process working directory.
    pub fn new() -> Self {
        let base_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::with_base_dir(base_dir)
    }

    /// Loader that resolves relative paths against `base_dir`.
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            explicit_path: None,
        }
    }

    /// Use this file instead of searching.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.explicit_path = Some(path.into());
        self
    }

    /// Candidate locations, in search order.
    pub fn search_paths(&self) -> Vec<PathBuf> {
        let mut paths = vec![
            self.base_dir.join("mcp_config.json"),
            self.base_dir.join("config").join("mcp_config.json"),
        ];
        if let Some(dirs) = directories::BaseDirs::new() {
            paths.push(dirs.home_dir().join(".mcp").join("config.json"));
        }
        paths.push(PathBuf::from("/etc/mcp/config.json"));
        paths
    }

    /// Resolve the config file: explicit path, then `MCP_CONFIG_PATH`, then the search paths.
    pub fn locate(&self, lookup: impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
        if let Some(path) = &self.explicit_path {
            return Some(path.clone());
        }
        if let Some(path) = lookup(CONFIG_PATH_ENV).filter(|p| !p.trim().is_empty()) {
            return Some(PathBuf::from(path));
        }
        self.search_paths().into_iter().find(|p| p.is_file())
    }

    /// Read and parse one config file.
    pub fn load_file(&self, path: &Path) -> Result<Vec<ServiceConfig>> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        tracing::info!(path = %path.display(), "Loading tool service config");
        self.parse_str(&text)
    }

    /// Parse config text. Text that is not a JSON object is an error; bad entries are skipped.
    pub fn parse_str(&self, text: &str) -> Result<Vec<ServiceConfig>> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| GatewayError::config(format!("config is not valid JSON: {e}")))?;
        self.parse_value(&value)
    }

    pub fn parse_value(&self, value: &Value) -> Result<Vec<ServiceConfig>> {
        let root = value
            .as_object()
            .ok_or_else(|| GatewayError::config("config root must be a JSON object"))?;
        let entries = match root.get("mcpServers") {
            Some(Value::Object(servers)) => servers,
            Some(_) => return Err(GatewayError::config("\"mcpServers\" must be a JSON object")),
            None => root,
        };

        let mut services = Vec::with_capacity(entries.len());
        for (name, entry) in entries {
            match self.parse_entry(name, entry) {
                Ok(service) => services.push(service),
                Err(e) => {
                    tracing::warn!(service = %name, error = %e, "Skipping invalid service entry")
                }
            }
        }
        Ok(services)
    }

    fn parse_entry(&self, name: &str, entry: &Value) -> Result<ServiceConfig> {
        if name.trim().is_empty() {
            return Err(GatewayError::config("service name must not be empty"));
        }
        let raw: RawServiceEntry = serde_json::from_value(entry.clone())
            .map_err(|e| GatewayError::config(format!("service '{name}': {e}")))?;

        let transport_name = raw.transport.as_deref().unwrap_or("stdio");
        let transport = match transport_name.to_ascii_lowercase().as_str() {
            "stdio" => {
                let command = raw
                    .command
                    .filter(|c| !c.trim().is_empty())
                    .ok_or_else(|| {
                        GatewayError::config(format!(
                            "service '{name}': stdio requires \"command\""
                        ))
                    })?;
                TransportConfig::Stdio(StdioConfig {
                    command,
                    args: self.resolve_args(raw.args),
                    env: raw.env,
                    cwd: raw.cwd.map(|dir| self.resolve_path(dir)),
                })
            }
            "sse" | "http" => {
                let url = raw.url.filter(|u| !u.trim().is_empty()).ok_or_else(|| {
                    GatewayError::config(format!(
                        "service '{name}': {transport_name} requires \"url\""
                    ))
                })?;
                TransportConfig::Sse(SseConfig {
                    url,
                    headers: raw.headers,
                })
            }
            other => {
                return Err(GatewayError::config(format!(
                    "service '{name}': unknown transport \"{other}\""
                )))
            }
        };

        Ok(ServiceConfig {
            name: name.to_string(),
            transport,
            protocol: raw.protocol.unwrap_or_default(),
            description: raw.description,
        })
    }

    fn resolve_args(&self, mut args: Vec<String>) -> Vec<String> {
        if let Some(first) = args.first_mut() {
            if !first.starts_with('-') && Path::new(first.as_str()).is_relative() {
                *first = self.base_dir.join(&*first).to_string_lossy().into_owned();
            }
        }
        args
    }

    fn resolve_path(&self, path: PathBuf) -> PathBuf {
        if path.is_relative() {
            self.base_dir.join(path)
        } else {
            path
        }
    }

    /// Apply `MCP_SERVICE_<NAME>_SERVER_URL` overrides: each adds an sse service
    /// named `<name>` (lowercased) or replaces the transport of an existing one.
    pub fn apply_env_overrides(
        &self,
        services: &mut Vec<ServiceConfig>,
        vars: impl IntoIterator<Item = (String, String)>,
    ) {
        let mut overrides: Vec<(String, String)> = vars
            .into_iter()
            .filter_map(|(key, value)| {
                let name = key
                    .strip_prefix(SERVICE_ENV_PREFIX)?
                    .strip_suffix(SERVICE_ENV_SUFFIX)?;
                if name.is_empty() || value.trim().is_empty() {
                    return None;
                }
                Some((name.to_ascii_lowercase(), value))
            })
            .collect();
        overrides.sort();

        for (name, url) in overrides {
            match services.iter_mut().find(|s| s.name == name) {
                Some(existing) => {
                    let headers = match &existing.transport {
                        TransportConfig::Sse(sse) => sse.headers.clone(),
                        TransportConfig::Stdio(_) => BTreeMap::new(),
                    };
                    tracing::info!(
                        service = %name,
                        url = %url,
                        "Service URL overridden from environment"
                    );
                    existing.transport = TransportConfig::Sse(SseConfig { url, headers });
                }
                None => {
                    tracing::info!(service = %name, url = %url, "Service added from environment");
                    services.push(ServiceConfig::sse(name, url));
                }
            }
        }
    }

    /// Locate, parse, and apply environment overrides. No config file yields only env services.
    pub fn load(&self) -> Result<Vec<ServiceConfig>> {
        let mut services = match self.locate(|key| std::env::var(key).ok()) {
            Some(path) => self.load_file(&path)?,
            None => {
                tracing::info!("No tool service config file found");
                Vec::new()
            }
        };
        self.apply_env_overrides(&mut services, std::env::vars());
        Ok(services)
    }
}
