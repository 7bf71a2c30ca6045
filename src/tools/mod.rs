//! Tool descriptors, argument handling, and the agent-facing provider trait.

pub mod arguments;
pub mod descriptor;
pub mod provider;

pub use arguments::ToolArguments;
pub use descriptor::{ToolBinding, ToolDescriptor};
pub use provider::ToolProvider;
