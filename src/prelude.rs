//! Convenience re-exports for common use.

pub use crate::config::{ConfigLoader, GatewayConfig, ServiceConfig, TransportKind, WireProtocol};
pub use crate::connector::{ConnectionState, ServiceConnector};
pub use crate::dispatch::ToolDispatcher;
pub use crate::error::{ErrorKind, GatewayError, Result};
pub use crate::gateway::Gateway;
pub use crate::registry::ServiceRegistry;
pub use crate::stream::{StreamChunk, StreamNormalizer, StreamSettings};
pub use crate::tools::{ToolArguments, ToolDescriptor, ToolProvider};
