//! Toolgate: tool-service gateway for LLM agent loops.
//!
//! Spawns or connects to external tool services (stdio subprocesses or
//! HTTP/SSE endpoints), discovers their tools over JSON-RPC, and exposes
//! them under namespaced names (`<service>_<tool>`) through a single
//! dispatcher. Results can be replayed as normalized chunk streams.
//!
//! # Quick Start
//!
//! ```no_run
//! use toolgate::prelude::*;
//!
//! # async fn example() -> toolgate::error::Result<()> {
//! let services = vec![ServiceConfig::stdio("calc", "calc-tool", Vec::<String>::new())];
//! let gateway = Gateway::with_services(GatewayConfig::default(), services).await;
//! for tool in gateway.dispatcher().tools() {
//!     println!("{}: {}", tool.name, tool.description);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connector;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod prelude;
pub mod registry;
pub mod stream;
pub mod tools;
pub mod transport;
pub mod util;

#[cfg(feature = "cli")]
pub mod cli;
