use async_trait::async_trait;
use serde_json::Value;

use super::ToolDescriptor;
use crate::error::Result;

/// What an agent loop needs from the gateway: a tool list and a way to call one.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Every tool currently available, in a stable order.
    fn tools(&self) -> Vec<ToolDescriptor>;

    /// Call a tool by its advertised name.
    async fn invoke(&self, name: &str, args: Value) -> Result<Value>;
}
