//! Named collection of service connectors.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::config::{GatewayConfig, ServiceConfig};
use crate::connector::{ConnectorSettings, ServiceConnector};
use crate::tools::ToolDescriptor;
use crate::transport::{DefaultTransportFactory, TransportFactory};
use crate::util::retry::RetryPolicy;

/// Connectors in registration order.
///
/// The list lock guards mutation only and is never held across an await;
/// connectors do their own locking.
pub struct ServiceRegistry {
    connectors: RwLock<Vec<Arc<ServiceConnector>>>,
    settings: ConnectorSettings,
    factory: Arc<dyn TransportFactory>,
    connect_retry: RetryPolicy,
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.service_names())
            .field("settings", &self.settings)
            .finish()
    }
}

impl ServiceRegistry {
    pub fn new(settings: ConnectorSettings, factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            connectors: RwLock::new(Vec::new()),
            settings,
            factory,
            connect_retry: RetryPolicy::once(),
        }
    }

    /// Registry that spawns real processes and HTTP sessions per `config`.
    pub fn from_config(config: &GatewayConfig) -> Self {
        let factory = Arc::new(DefaultTransportFactory::new(config.shutdown_grace));
        Self::new(ConnectorSettings::from(config), factory)
            .with_connect_retry(config.connect_retry.clone())
    }

    pub fn with_connect_retry(mut self, policy: RetryPolicy) -> Self {
        self.connect_retry = policy;
        self
    }

    /// Add a service. A service already registered under the same name is
    /// disconnected and replaced in place, keeping its position.
    pub async fn register(&self, config: ServiceConfig) -> Arc<ServiceConnector> {
        let connector = Arc::new(ServiceConnector::new(
            config,
            self.settings,
            Arc::clone(&self.factory),
        ));

        let previous = {
            let mut connectors = self
                .connectors
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            match connectors.iter_mut().find(|c| c.name() == connector.name()) {
                Some(slot) => Some(std::mem::replace(slot, Arc::clone(&connector))),
                None => {
                    connectors.push(Arc::clone(&connector));
                    None
                }
            }
        };

        match previous {
            Some(previous) => {
                tracing::info!(service = %connector.name(), "Replacing registered service");
                previous.disconnect().await;
            }
            None => {
                tracing::debug!(
                    service = %connector.name(),
                    transport = %connector.transport_kind(),
                    "Registered service"
                );
            }
        }
        connector
    }

    /// Disconnect and remove a service. Returns whether it was registered.
    pub async fn unregister(&self, name: &str) -> bool {
        let removed = {
            let mut connectors = self
                .connectors
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let index = connectors.iter().position(|c| c.name() == name);
            index.map(|index| connectors.remove(index))
        };
        match removed {
            Some(connector) => {
                connector.disconnect().await;
                tracing::info!(service = name, "Unregistered service");
                true
            }
            None => false,
        }
    }

    /// Connect every service concurrently. One failure never stops the others.
    pub async fn connect_all(&self) -> BTreeMap<String, bool> {
        let connectors = self.snapshot();
        let attempts = connectors.iter().map(|connector| async move {
            let result = self.connect_retry.execute(|| connector.connect()).await;
            if let Err(e) = &result {
                tracing::warn!(service = %connector.name(), error = %e, "Service unavailable");
            }
            (connector.name().to_string(), result.is_ok())
        });
        let results: BTreeMap<String, bool> =
            futures::future::join_all(attempts).await.into_iter().collect();

        let ready = results.values().filter(|ok| **ok).count();
        tracing::info!(ready, total = results.len(), "Connected tool services");
        results
    }

    pub async fn disconnect_all(&self) {
        let connectors = self.snapshot();
        futures::future::join_all(connectors.iter().map(|c| c.disconnect())).await;
    }

    /// First connector (in registration order) whose catalog holds
    /// `tool_name`, with the name that connector knows the tool by.
    pub fn find_tool(&self, tool_name: &str) -> Option<(Arc<ServiceConnector>, String)> {
        self.snapshot().into_iter().find_map(|connector| {
            let local = connector
                .catalog()
                .into_iter()
                .find(|t| t.name == tool_name)
                .map(|t| t.binding.local_name)?;
            Some((connector, local))
        })
    }

    /// Every discovered tool: registration order, then discovery order.
    pub fn all_tools(&self) -> Vec<ToolDescriptor> {
        self.snapshot().iter().flat_map(|c| c.tools()).collect()
    }

    pub fn connector(&self, name: &str) -> Option<Arc<ServiceConnector>> {
        self.snapshot().into_iter().find(|c| c.name() == name)
    }

    pub fn service_names(&self) -> Vec<String> {
        self.snapshot().iter().map(|c| c.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.connectors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<ServiceConnector>> {
        self.connectors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::ConnectionState;
    use crate::transport::test_support::{
        jsonrpc_service, text_result, tool_entry, MockTransportFactory,
    };
    use pretty_assertions::assert_eq;

    /// Every service advertises `add` and `extra`.
    fn registry() -> (ServiceRegistry, Arc<MockTransportFactory>) {
        let healthy = jsonrpc_service(
            vec![tool_entry("add"), tool_entry("extra")],
            |_, _| Ok(text_result("ok")),
        );
        let factory = Arc::new(MockTransportFactory::new(healthy));
        let registry = ServiceRegistry::new(ConnectorSettings::default(), factory.clone());
        (registry, factory)
    }

    #[tokio::test]
    async fn connect_all_reports_per_service_success() {
        let (registry, _factory) = registry();
        registry.register(ServiceConfig::stdio("calc", "calc-tool", Vec::<String>::new())).await;
        registry.register(ServiceConfig::stdio("math", "math-tool", Vec::<String>::new())).await;

        let results = registry.connect_all().await;
        assert_eq!(
            results,
            BTreeMap::from([("calc".to_string(), true), ("math".to_string(), true)])
        );

        let names: Vec<_> = registry.all_tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["calc_add", "calc_extra", "math_add", "math_extra"]);
    }

    #[tokio::test]
    async fn one_failing_service_does_not_block_the_rest() {
        let inner = jsonrpc_service(vec![tool_entry("add")], |_, _| Ok(text_result("ok")));
        let factory = Arc::new(MockTransportFactory::new(inner).fail_service("broken"));
        let registry = ServiceRegistry::new(ConnectorSettings::default(), factory);
        registry.register(ServiceConfig::stdio("broken", "missing", Vec::<String>::new())).await;
        registry.register(ServiceConfig::stdio("calc", "calc-tool", Vec::<String>::new())).await;

        let results = registry.connect_all().await;
        assert_eq!(
            results,
            BTreeMap::from([("broken".to_string(), false), ("calc".to_string(), true)])
        );
        let names: Vec<_> = registry.all_tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["calc_add"]);
    }

    #[tokio::test]
    async fn find_tool_returns_connector_that_advertises_it() {
        let (registry, _factory) = registry();
        registry.register(ServiceConfig::stdio("calc", "calc-tool", Vec::<String>::new())).await;
        registry.register(ServiceConfig::stdio("math", "math-tool", Vec::<String>::new())).await;
        registry.connect_all().await;

        for tool in registry.all_tools() {
            let (connector, local) = registry.find_tool(&tool.name).expect("registered tool");
            assert!(connector.tools().iter().any(|t| t.name == tool.name));
            assert_eq!(local, tool.binding.local_name);
            assert_eq!(connector.name(), tool.binding.service);
        }
        assert!(registry.find_tool("calc_pow").is_none());
    }

    #[tokio::test]
    async fn reregistering_replaces_in_place_and_disconnects_old() {
        let (registry, factory) = registry();
        registry.register(ServiceConfig::stdio("calc", "calc-tool", Vec::<String>::new())).await;
        registry.register(ServiceConfig::stdio("math", "math-tool", Vec::<String>::new())).await;
        registry.connect_all().await;

        let old = registry.connector("calc").expect("calc");
        let replacement = registry
            .register(ServiceConfig::stdio("calc", "calc-tool-v2", Vec::<String>::new()))
            .await;

        assert_eq!(registry.service_names(), vec!["calc", "math"]);
        assert_eq!(old.state(), ConnectionState::Disconnected);
        assert_eq!(replacement.state(), ConnectionState::Disconnected);
        assert_eq!(factory.counters.closes(), 1);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn unregister_disconnects_and_removes() {
        let (registry, factory) = registry();
        registry.register(ServiceConfig::stdio("calc", "calc-tool", Vec::<String>::new())).await;
        registry.connect_all().await;

        assert!(registry.unregister("calc").await);
        assert!(!registry.unregister("calc").await);
        assert!(registry.is_empty());
        assert!(registry.all_tools().is_empty());
        assert_eq!(factory.counters.closes(), 1);
    }

    #[tokio::test]
    async fn connect_all_retries_under_policy() {
        let factory = Arc::new(MockTransportFactory::failing());
        let registry = ServiceRegistry::new(ConnectorSettings::default(), factory.clone())
            .with_connect_retry(RetryPolicy {
                initial_backoff: std::time::Duration::from_millis(1),
                ..RetryPolicy::default().with_max_attempts(3)
            });
        registry.register(ServiceConfig::stdio("ghost", "missing", Vec::<String>::new())).await;

        let results = registry.connect_all().await;
        assert_eq!(results.get("ghost"), Some(&false));
        assert_eq!(factory.counters.opens(), 3);
    }

    #[tokio::test]
    async fn disconnect_all_clears_every_connector() {
        let (registry, _factory) = registry();
        registry.register(ServiceConfig::stdio("calc", "calc-tool", Vec::<String>::new())).await;
        registry.register(ServiceConfig::stdio("math", "math-tool", Vec::<String>::new())).await;
        registry.connect_all().await;

        registry.disconnect_all().await;
        assert!(registry.all_tools().is_empty());
        for name in registry.service_names() {
            let state = registry.connector(&name).map(|c| c.state());
            assert_eq!(state, Some(ConnectionState::Disconnected));
        }
    }
}
