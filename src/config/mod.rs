//! Configuration system: gateway settings (code > env) and tool service entries.

pub mod loader;

pub use loader::ConfigLoader;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::stream::{ChunkMode, StreamSettings};
use crate::util::retry::RetryPolicy;

/// How a tool service is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TransportKind {
    Stdio,
    Sse,
}

/// Message shape spoken over the transport.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum WireProtocol {
    /// MCP-style JSON-RPC 2.0 envelopes with an `initialize` handshake.
    #[default]
    JsonRpc,
    /// `{"query": ...}` in, `{"result": ...}` or `{"error": ...}` out.
    Query,
}

/// Parameters for a subprocess speaking over stdin/stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StdioConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
}

/// Parameters for a service reached over HTTP (JSON or event-stream responses).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseConfig {
    pub url: String,
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportConfig {
    Stdio(StdioConfig),
    Sse(SseConfig),
}

impl TransportConfig {
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Stdio(_) => TransportKind::Stdio,
            Self::Sse(_) => TransportKind::Sse,
        }
    }
}

/// One configured tool service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub name: String,
    pub transport: TransportConfig,
    pub protocol: WireProtocol,
    pub description: Option<String>,
}

impl ServiceConfig {
    /// A stdio service speaking JSON-RPC.
    pub fn stdio(
        name: impl Into<String>,
        command: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            transport: TransportConfig::Stdio(StdioConfig {
                command: command.into(),
                args: args.into_iter().map(Into::into).collect(),
                env: BTreeMap::new(),
                cwd: None,
            }),
            protocol: WireProtocol::JsonRpc,
            description: None,
        }
    }

    /// An HTTP/SSE service speaking JSON-RPC.
    pub fn sse(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: TransportConfig::Sse(SseConfig {
                url: url.into(),
                headers: BTreeMap::new(),
            }),
            protocol: WireProtocol::JsonRpc,
            description: None,
        }
    }

    pub fn with_protocol(mut self, protocol: WireProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add an environment variable for a stdio service; ignored for other transports.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let TransportConfig::Stdio(stdio) = &mut self.transport {
            stdio.env.insert(key.into(), value.into());
        }
        self
    }

    /// Add a request header for an HTTP service; ignored for other transports.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let TransportConfig::Sse(sse) = &mut self.transport {
            sse.headers.insert(key.into(), value.into());
        }
        self
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.transport.kind()
    }
}

/// Gateway-wide settings.
///
/// Resolution order: values set in code, then environment variables
/// (see [`GatewayConfig::from_env`]), then the defaults below.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Explicit tool-service config file; `None` searches the default locations.
    pub config_path: Option<PathBuf>,
    /// Deadline for spawn + initialize + tool discovery.
    pub handshake_timeout: Duration,
    /// Deadline for one tool call.
    pub call_timeout: Duration,
    /// Time a tool process gets to exit after SIGTERM before it is killed.
    pub shutdown_grace: Duration,
    /// Policy applied to each service's connect attempt during `connect_all`.
    pub connect_retry: RetryPolicy,
    pub streaming: StreamSettings,
    /// Per-provider default model names, passed through for the agent loop.
    pub default_models: BTreeMap<String, String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            config_path: None,
            handshake_timeout: Duration::from_secs(10),
            call_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_millis(500),
            connect_retry: RetryPolicy::once(),
            streaming: StreamSettings::default(),
            default_models: BTreeMap::new(),
        }
    }
}

const MODEL_ENV_MAPPINGS: [(&str, &str); 4] = [
    ("DEFAULT_OPENAI_MODEL", "openai"),
    ("DEFAULT_ANTHROPIC_MODEL", "anthropic"),
    ("DEFAULT_GOOGLE_MODEL", "google"),
    ("DEFAULT_NVIDIA_MODEL", "nvidia"),
];

impl GatewayConfig {
    /// Load from environment variables (and `.env` if present).
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup; unset or unparsable values keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = lookup(loader::CONFIG_PATH_ENV).filter(|p| !p.trim().is_empty()) {
            config.config_path = Some(PathBuf::from(path));
        }
        if let Some(ms) = parse_u64(&lookup, "TOOLGATE_HANDSHAKE_TIMEOUT_MS") {
            config.handshake_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_u64(&lookup, "TOOLGATE_CALL_TIMEOUT_MS") {
            config.call_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_u64(&lookup, "TOOLGATE_SHUTDOWN_GRACE_MS") {
            config.shutdown_grace = Duration::from_millis(ms);
        }
        if let Some(attempts) = parse_u64(&lookup, "TOOLGATE_CONNECT_ATTEMPTS") {
            config.connect_retry = RetryPolicy::default().with_max_attempts(attempts as u32);
        }
        if let Some(words) = parse_u64(&lookup, "TOOLGATE_STREAM_CHUNK_WORDS") {
            config.streaming.chunking = ChunkMode::Words(words.max(1) as usize);
        }
        if let Some(ms) = parse_u64(&lookup, "TOOLGATE_STREAM_CHUNK_DELAY_MS") {
            config.streaming.delay = Duration::from_millis(ms);
        }

        for (env_var, provider) in MODEL_ENV_MAPPINGS {
            if let Some(model) = lookup(env_var).filter(|m| !m.trim().is_empty()) {
                config.default_models.insert(provider.to_string(), model);
            }
        }

        config
    }

    /// Default model configured for a provider, if any.
    pub fn default_model(&self, provider: &str) -> Option<&str> {
        self.default_models.get(provider).map(String::as_str)
    }
}

fn parse_u64(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring non-numeric config variable");
            None
        }
    }
}
