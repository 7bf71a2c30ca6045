//! CLI entry point for toolgate.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Toolgate CLI
#[derive(Parser, Debug)]
#[command(name = "toolgate", version, about = "Call tools on configured tool services")]
pub struct Cli {
    /// Tool service config file (defaults to MCP_CONFIG_PATH, then the search paths)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List every discovered tool
    Tools(ToolsArgs),
    /// Call a tool and print its result as JSON
    Call(CallArgs),
    /// Call a tool and print its result as a server-sent event stream
    Stream(CallArgs),
}

/// Arguments for `toolgate tools`.
#[derive(Parser, Debug)]
pub struct ToolsArgs {
    /// Print OpenAI function definitions instead of a summary
    #[arg(long)]
    pub openai: bool,
}

/// Arguments for `toolgate call` and `toolgate stream`.
#[derive(Parser, Debug)]
pub struct CallArgs {
    /// Namespaced tool name, e.g. calc_add
    pub tool: String,

    /// Arguments as a JSON object
    #[arg(default_value = "{}")]
    pub args: String,
}
