//! Single entry point for tool calls coming from an agent loop.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{GatewayError, Result};
use crate::registry::ServiceRegistry;
use crate::stream::{ChunkStream, StreamNormalizer};
use crate::tools::{ToolArguments, ToolDescriptor, ToolProvider};

/// Suffix some agent frameworks append to tool names.
const CALL_SUFFIX: &str = ".call";

/// Routes a namespaced tool call to the connector that advertises it.
#[derive(Debug, Clone)]
pub struct ToolDispatcher {
    registry: Arc<ServiceRegistry>,
    normalizer: StreamNormalizer,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ServiceRegistry>, normalizer: StreamNormalizer) -> Self {
        Self {
            registry,
            normalizer,
        }
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn normalizer(&self) -> &StreamNormalizer {
        &self.normalizer
    }

    pub fn tools(&self) -> Vec<ToolDescriptor> {
        self.registry.all_tools()
    }

    /// Tool list in OpenAI function-calling form.
    pub fn openai_tool_definitions(&self) -> Vec<Value> {
        self.tools()
            .iter()
            .map(ToolDescriptor::to_openai_definition)
            .collect()
    }

    /// Call `name` with `args` (an object, `null`, or a JSON-object string).
    ///
    /// Unknown names fail with [`GatewayError::NotFound`] before any
    /// connection is attempted.
    pub async fn invoke(&self, name: &str, args: Value) -> Result<Value> {
        let name = name.strip_suffix(CALL_SUFFIX).unwrap_or(name);
        let Some((connector, local)) = self.registry.find_tool(name) else {
            tracing::debug!(tool = name, "No service advertises tool");
            return Err(GatewayError::NotFound(name.to_string()));
        };
        let args = ToolArguments::coerce(name, args)?;

        tracing::debug!(tool = name, service = %connector.name(), "Dispatching tool call");
        let started = Instant::now();
        let result = connector.invoke(&local, args, None).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => tracing::info!(tool = name, elapsed_ms, "Tool call succeeded"),
            Err(e) => tracing::warn!(
                tool = name,
                elapsed_ms,
                kind = %e.kind(),
                error = %e,
                "Tool call failed"
            ),
        }
        result
    }

    /// Call a tool and replay its result as a chunk stream.
    ///
    /// Failures become one error chunk followed by done.
    pub async fn invoke_streaming(&self, name: &str, args: Value) -> ChunkStream {
        let result = self.invoke(name, args).await;
        self.normalizer.from_result(result)
    }
}

#[async_trait]
impl ToolProvider for ToolDispatcher {
    fn tools(&self) -> Vec<ToolDescriptor> {
        ToolDispatcher::tools(self)
    }

    async fn invoke(&self, name: &str, args: Value) -> Result<Value> {
        ToolDispatcher::invoke(self, name, args).await
    }
}
