//! Toolgate CLI binary entry point.

use std::io::Write;

use clap::Parser;
use futures::StreamExt;
use serde_json::Value;
use toolgate::cli::{CallArgs, Cli, Commands, ToolsArgs};
use toolgate::prelude::*;
use toolgate::stream::sse_frames;
use tracing_subscriber::EnvFilter;

type CliResult = std::result::Result<(), Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = GatewayConfig::from_env();
    if let Some(path) = cli.config {
        config.config_path = Some(path);
    }

    let gateway = match Gateway::start(config).await {
        Ok(gateway) => gateway,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Tools(args) => handle_tools(&gateway, args),
        Commands::Call(args) => handle_call(&gateway, args).await,
        Commands::Stream(args) => handle_stream(&gateway, args).await,
    };
    gateway.shutdown().await;

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn handle_tools(gateway: &Gateway, args: ToolsArgs) -> CliResult {
    for (service, ready) in gateway.availability() {
        if !ready {
            eprintln!("warning: service '{service}' is unavailable");
        }
    }

    let dispatcher = gateway.dispatcher();
    if args.openai {
        let definitions = Value::Array(dispatcher.openai_tool_definitions());
        println!("{}", serde_json::to_string_pretty(&definitions)?);
        return Ok(());
    }
    for tool in dispatcher.tools() {
        println!("{:<32} {}", tool.name, tool.description);
    }
    Ok(())
}

async fn handle_call(gateway: &Gateway, args: CallArgs) -> CliResult {
    let value = gateway
        .dispatcher()
        .invoke(&args.tool, Value::String(args.args))
        .await?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn handle_stream(gateway: &Gateway, args: CallArgs) -> CliResult {
    let chunks = gateway
        .dispatcher()
        .invoke_streaming(&args.tool, Value::String(args.args))
        .await;
    let mut frames = sse_frames(chunks);
    let mut stdout = std::io::stdout();
    while let Some(frame) = frames.next().await {
        stdout.write_all(frame.as_bytes())?;
        stdout.flush()?;
    }
    Ok(())
}
