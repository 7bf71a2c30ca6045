#![cfg(unix)]
//! End-to-end tests against the `calc-tool` binary over stdio.

use std::path::Path;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::time::timeout;
use toolgate::prelude::*;

const CALC_TOOL: &str = env!("CARGO_BIN_EXE_calc-tool");

fn calc_service(args: &[&str]) -> ServiceConfig {
    ServiceConfig::stdio("calc", CALC_TOOL, args.iter().map(|a| a.to_string()))
}

fn fast_config() -> GatewayConfig {
    GatewayConfig {
        handshake_timeout: Duration::from_secs(5),
        call_timeout: Duration::from_secs(5),
        shutdown_grace: Duration::from_millis(200),
        streaming: StreamSettings::immediate(),
        ..GatewayConfig::default()
    }
}

fn process_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

#[tokio::test]
async fn config_file_to_tool_result() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("mcp_config.json");
    let config = json!({
        "calc": {"command": CALC_TOOL, "args": [], "transport": "stdio"}
    });
    std::fs::write(&path, config.to_string()).expect("write config");

    let gateway = Gateway::start(GatewayConfig {
        config_path: Some(path),
        ..fast_config()
    })
    .await
    .expect("gateway starts");

    assert_eq!(gateway.availability().get("calc"), Some(&true));
    assert_eq!(gateway.availability().len(), 1);

    let names: Vec<_> = gateway.dispatcher().tools().into_iter().map(|t| t.name).collect();
    assert_eq!(names, vec!["calc_add", "calc_multiply", "calc_sleep"]);

    let sum = gateway
        .dispatcher()
        .invoke("calc_add", json!({"a": 2, "b": 3}))
        .await
        .expect("calc_add");
    assert_eq!(sum, json!(5));

    let product = gateway
        .dispatcher()
        .invoke("calc_multiply.call", json!("{\"a\": 1.5, \"b\": 4}"))
        .await
        .expect("calc_multiply");
    assert_eq!(product, json!(6.0));

    gateway.shutdown().await;
}

#[tokio::test]
async fn tool_reported_errors_keep_the_process() {
    let gateway = Gateway::with_services(fast_config(), vec![calc_service(&[])]).await;
    let dispatcher = gateway.dispatcher();
    let pid = gateway.registry().connector("calc").and_then(|c| c.pid());

    let err = dispatcher
        .invoke("calc_add", json!({"a": "two", "b": 3}))
        .await
        .expect_err("non-numeric argument");
    assert_eq!(err.kind(), ErrorKind::ToolFailed);
    assert!(err.to_string().contains("must be numbers"), "{err}");

    let sum = dispatcher.invoke("calc_add", json!({"a": 1, "b": 1})).await.expect("add");
    assert_eq!(sum, json!(2));
    assert_eq!(gateway.registry().connector("calc").and_then(|c| c.pid()), pid);

    gateway.shutdown().await;
}

#[tokio::test]
async fn stalled_handshake_times_out_without_orphans() {
    let dir = tempfile::tempdir().expect("tempdir");
    let pid_file = dir.path().join("calc.pid");
    let pid_arg = pid_file.to_string_lossy().to_string();

    let handshake_timeout = Duration::from_millis(500);
    let gateway = Gateway::with_services(
        GatewayConfig {
            handshake_timeout,
            ..fast_config()
        },
        vec![calc_service(&["--stall-handshake", "--pid-file", &pid_arg])],
    )
    .await;
    assert_eq!(gateway.availability().get("calc"), Some(&false));

    let connector = gateway.registry().connector("calc").expect("registered");
    assert_eq!(connector.state(), ConnectionState::Failed);

    let started = Instant::now();
    let err = connector.connect().await.expect_err("handshake never answered");
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(started.elapsed() < handshake_timeout + Duration::from_secs(2));

    let pid: u32 = std::fs::read_to_string(&pid_file)
        .expect("pid file written")
        .trim()
        .parse()
        .expect("numeric pid");
    assert!(!process_alive(pid), "tool process {pid} outlived the failed handshake");
    assert_eq!(connector.pid(), None);
}

#[tokio::test]
async fn killed_process_mid_call_is_connection_lost_then_recovers() {
    let gateway = Gateway::with_services(fast_config(), vec![calc_service(&[])]).await;
    let dispatcher = gateway.dispatcher().clone();
    let pid = gateway
        .registry()
        .connector("calc")
        .and_then(|c| c.pid())
        .expect("live tool process");

    let call = tokio::spawn(async move {
        dispatcher.invoke("calc_sleep", json!({"ms": 30_000})).await
    });
    tokio::time::sleep(Duration::from_millis(300)).await;
    let status = std::process::Command::new("kill")
        .args(["-9", &pid.to_string()])
        .status()
        .expect("run kill");
    assert!(status.success());

    let err = timeout(Duration::from_secs(5), call)
        .await
        .expect("call ends within the call timeout")
        .expect("task joined")
        .expect_err("process was killed");
    assert_eq!(err.kind(), ErrorKind::ConnectionLost);
    assert!(
        err.stderr().is_some_and(|tail| tail.contains("calc-tool: started")),
        "stderr tail missing: {err:?}"
    );

    let sum = gateway
        .dispatcher()
        .invoke("calc_add", json!({"a": 2, "b": 3}))
        .await
        .expect("next call respawns the tool");
    assert_eq!(sum, json!(5));
    let new_pid = gateway.registry().connector("calc").and_then(|c| c.pid());
    assert!(new_pid.is_some_and(|p| p != pid));

    gateway.shutdown().await;
}

#[tokio::test]
async fn shutdown_terminates_tool_processes() {
    let gateway = Gateway::with_services(fast_config(), vec![calc_service(&[])]).await;
    let pid = gateway
        .registry()
        .connector("calc")
        .and_then(|c| c.pid())
        .expect("live tool process");
    assert!(process_alive(pid));

    gateway.shutdown().await;
    assert!(!process_alive(pid));
}

#[tokio::test]
async fn streaming_a_tool_result() {
    use futures::StreamExt;

    let gateway = Gateway::with_services(fast_config(), vec![calc_service(&[])]).await;
    let chunks: Vec<_> = gateway
        .dispatcher()
        .invoke_streaming("calc_sleep", json!({"ms": 1}))
        .await
        .collect()
        .await;
    let text: String = chunks.iter().filter_map(StreamChunk::content).collect();
    assert_eq!(text, "slept 1ms");
    assert_eq!(chunks.last(), Some(&StreamChunk::Done));

    gateway.shutdown().await;
}

#[tokio::test]
async fn calls_to_different_services_run_in_parallel() {
    let services = vec![
        ServiceConfig::stdio("left", CALC_TOOL, Vec::<String>::new()),
        ServiceConfig::stdio("right", CALC_TOOL, Vec::<String>::new()),
    ];
    let gateway = Gateway::with_services(fast_config(), services).await;
    let dispatcher = gateway.dispatcher();

    let started = Instant::now();
    let (left, right) = tokio::join!(
        dispatcher.invoke("left_sleep", json!({"ms": 500})),
        dispatcher.invoke("right_sleep", json!({"ms": 500})),
    );
    let parallel = started.elapsed();
    left.expect("left_sleep");
    right.expect("right_sleep");
    assert!(parallel < Duration::from_millis(900), "took {parallel:?}");

    let started = Instant::now();
    let (first, second) = tokio::join!(
        dispatcher.invoke("left_sleep", json!({"ms": 300})),
        dispatcher.invoke("left_sleep", json!({"ms": 300})),
    );
    let serialized = started.elapsed();
    first.expect("first left_sleep");
    second.expect("second left_sleep");
    assert!(serialized >= Duration::from_millis(600), "took {serialized:?}");

    gateway.shutdown().await;
}
