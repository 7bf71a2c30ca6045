//! Startup and shutdown of the whole gateway.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::{ConfigLoader, GatewayConfig, ServiceConfig};
use crate::dispatch::ToolDispatcher;
use crate::error::Result;
use crate::registry::ServiceRegistry;
use crate::stream::StreamNormalizer;

/// A loaded and connected set of tool services.
///
/// ```no_run
/// use toolgate::prelude::*;
///
/// # async fn example() -> toolgate::error::Result<()> {
/// let gateway = Gateway::start(GatewayConfig::from_env()).await?;
/// let sum = gateway
///     .dispatcher()
///     .invoke("calc_add", serde_json::json!({"a": 2, "b": 3}))
///     .await?;
/// println!("{sum}");
/// gateway.shutdown().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Gateway {
    config: GatewayConfig,
    registry: Arc<ServiceRegistry>,
    dispatcher: ToolDispatcher,
    availability: BTreeMap<String, bool>,
}

impl Gateway {
    /// Load the service config file, register every service, and connect them.
    ///
    /// Services that fail to connect are reported in [`Gateway::availability`]
    /// and retried lazily on their first call.
    pub async fn start(config: GatewayConfig) -> Result<Self> {
        let mut loader = ConfigLoader::new();
        if let Some(path) = &config.config_path {
            loader = loader.with_path(path.clone());
        }
        let services = loader.load()?;
        Ok(Self::with_services(config, services).await)
    }

    /// Start from services built in code.
    pub async fn with_services(config: GatewayConfig, services: Vec<ServiceConfig>) -> Self {
        let registry = Arc::new(ServiceRegistry::from_config(&config));
        Self::with_registry(config, registry, services).await
    }

    pub async fn with_registry(
        config: GatewayConfig,
        registry: Arc<ServiceRegistry>,
        services: Vec<ServiceConfig>,
    ) -> Self {
        for service in services {
            registry.register(service).await;
        }
        let availability = registry.connect_all().await;
        let normalizer = StreamNormalizer::new(config.streaming.clone());
        let dispatcher = ToolDispatcher::new(Arc::clone(&registry), normalizer);
        Self {
            config,
            registry,
            dispatcher,
            availability,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &ToolDispatcher {
        &self.dispatcher
    }

    pub fn normalizer(&self) -> &StreamNormalizer {
        self.dispatcher.normalizer()
    }

    /// Per-service result of the startup `connect_all`.
    pub fn availability(&self) -> &BTreeMap<String, bool> {
        &self.availability
    }

    /// Disconnect every service, terminating tool processes.
    pub async fn shutdown(&self) {
        tracing::info!(services = self.registry.len(), "Shutting down tool services");
        self.registry.disconnect_all().await;
    }
}
