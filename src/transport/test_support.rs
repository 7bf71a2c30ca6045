use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Transport, TransportError, TransportFactory};
use crate::config::{TransportConfig, TransportKind};

/// What a scripted peer does in answer to one written record.
pub(crate) enum Reply {
    /// Queue these raw lines for `read_line`. An empty list stalls the reader.
    Lines(Vec<Vec<u8>>),
    /// The peer goes away: pending and future reads fail as closed.
    Hangup,
}

impl Reply {
    pub(crate) fn json(values: impl IntoIterator<Item = Value>) -> Self {
        Self::Lines(values.into_iter().map(|v| v.to_string().into_bytes()).collect())
    }

    pub(crate) fn none() -> Self {
        Self::Lines(Vec::new())
    }
}

pub(crate) type Responder = Arc<dyn Fn(&Value) -> Reply + Send + Sync>;

#[derive(Clone, Default)]
pub(crate) struct MockCounters {
    pub(crate) opens: Arc<AtomicUsize>,
    pub(crate) closes: Arc<AtomicUsize>,
    pub(crate) writes: Arc<Mutex<Vec<Value>>>,
}

impl MockCounters {
    pub(crate) fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub(crate) fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub(crate) fn written_methods(&self) -> Vec<String> {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|record| {
                record
                    .get("method")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| record.to_string())
            })
            .collect()
    }
}

/// In-memory transport whose peer is a closure over each written record.
pub(crate) struct ScriptedTransport {
    responder: Responder,
    pending: VecDeque<Vec<u8>>,
    hung_up: bool,
    closed: bool,
    counters: MockCounters,
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    async fn write_line(&mut self, record: &[u8]) -> Result<(), TransportError> {
        if self.closed || self.hung_up {
            return Err(TransportError::Closed { stderr: None });
        }
        let value: Value = serde_json::from_slice(record).unwrap_or(Value::Null);
        self.counters
            .writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(value.clone());
        match (self.responder)(&value) {
            Reply::Lines(lines) => self.pending.extend(lines),
            Reply::Hangup => self.hung_up = true,
        }
        Ok(())
    }

    async fn read_line(&mut self) -> Result<Vec<u8>, TransportError> {
        if self.closed {
            return Err(TransportError::Closed { stderr: None });
        }
        if let Some(line) = self.pending.pop_front() {
            return Ok(line);
        }
        if self.hung_up {
            return Err(TransportError::Closed {
                stderr: Some("peer hung up".into()),
            });
        }
        std::future::pending().await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.closed {
            self.closed = true;
            self.counters.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Factory handing out [`ScriptedTransport`]s that share one responder.
pub(crate) struct MockTransportFactory {
    responder: Responder,
    fail_open: bool,
    failing_services: Vec<String>,
    pub(crate) counters: MockCounters,
}

impl MockTransportFactory {
    pub(crate) fn new(responder: impl Fn(&Value) -> Reply + Send + Sync + 'static) -> Self {
        Self {
            responder: Arc::new(responder),
            fail_open: false,
            failing_services: Vec::new(),
            counters: MockCounters::default(),
        }
    }

    /// `open` fails as a spawn error for this service only.
    pub(crate) fn fail_service(mut self, service: &str) -> Self {
        self.failing_services.push(service.to_string());
        self
    }

    /// Every `open` fails as a spawn error.
    pub(crate) fn failing() -> Self {
        Self {
            fail_open: true,
            ..Self::new(|_| Reply::none())
        }
    }
}

impl TransportFactory for MockTransportFactory {
    fn open(
        &self,
        service: &str,
        _config: &TransportConfig,
    ) -> Result<Box<dyn Transport>, TransportError> {
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_open || self.failing_services.iter().any(|s| s == service) {
            return Err(TransportError::Spawn {
                command: "mock-tool".into(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            });
        }
        Ok(Box::new(ScriptedTransport {
            responder: Arc::clone(&self.responder),
            pending: VecDeque::new(),
            hung_up: false,
            closed: false,
            counters: self.counters.clone(),
        }))
    }
}

/// A well-behaved JSON-RPC tool service. `call` receives the tool name and
/// arguments and returns the `result` (Ok) or `error` object (Err).
pub(crate) fn jsonrpc_service(
    tools: Vec<Value>,
    call: impl Fn(&str, &Value) -> Result<Value, Value> + Send + Sync + 'static,
) -> impl Fn(&Value) -> Reply + Send + Sync + 'static {
    move |request| {
        let id = request.get("id").cloned().unwrap_or(Value::Null);
        match request.get("method").and_then(Value::as_str) {
            Some("initialize") => Reply::json([json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "protocolVersion": "2024-11-05",
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "mock", "version": "0.0.0"}
                }
            })]),
            Some("tools/list") => Reply::json([json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {"tools": tools.clone()}
            })]),
            Some("tools/call") => {
                let params = request.get("params").cloned().unwrap_or(Value::Null);
                let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
                let args = params.get("arguments").cloned().unwrap_or(Value::Null);
                let response = match call(name, &args) {
                    Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
                    Err(error) => json!({"jsonrpc": "2.0", "id": id, "error": error}),
                };
                Reply::json([response])
            }
            _ => Reply::none(),
        }
    }
}

/// MCP text result.
pub(crate) fn text_result(text: &str) -> Value {
    json!({"content": [{"type": "text", "text": text}], "isError": false})
}

pub(crate) fn tool_entry(name: &str) -> Value {
    json!({
        "name": name,
        "description": format!("{name} tool"),
        "inputSchema": {"type": "object", "properties": {}}
    })
}
