//! Service connector: one tool service behind one transport.
//!
//! The connector runs the handshake, discovers tools, and performs calls.
//! Calls on one connector are serialized by an async mutex around the live
//! session; state and tool list are mirrored into a snapshot so that
//! [`ServiceConnector::state`] and [`ServiceConnector::tools`] never wait on
//! an in-flight call.

pub(crate) mod protocol;

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use strum::Display;
use tokio::sync::Mutex;

use self::protocol::Incoming;
use crate::config::{GatewayConfig, ServiceConfig, TransportKind, WireProtocol};
use crate::error::{GatewayError, Result};
use crate::tools::descriptor::qualified_name;
use crate::tools::{ToolArguments, ToolDescriptor};
use crate::transport::{Transport, TransportFactory};
use crate::util::timeout::with_timeout;

/// Upper bound on `tools/list` pages followed during discovery.
const MAX_TOOL_PAGES: usize = 64;

/// Longest slice of an unparsable line quoted in errors.
const MALFORMED_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Discovering,
    Ready,
    /// The last connect attempt failed; the next connect or invoke retries.
    Failed,
}

/// Deadlines applied by a connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectorSettings {
    /// Spawn, initialize, and tool discovery together.
    pub handshake_timeout: Duration,
    /// Default deadline for one tool call.
    pub call_timeout: Duration,
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&GatewayConfig> for ConnectorSettings {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            handshake_timeout: config.handshake_timeout,
            call_timeout: config.call_timeout,
        }
    }
}

struct Snapshot {
    state: ConnectionState,
    tools: Vec<ToolDescriptor>,
    pid: Option<u32>,
}

#[derive(Default)]
struct Session {
    transport: Option<Box<dyn Transport>>,
    next_id: u64,
    /// Set while a call awaits its response. Still set on entry means the
    /// previous caller was cancelled and its response may yet arrive.
    in_flight: bool,
}

pub struct ServiceConnector {
    config: ServiceConfig,
    settings: ConnectorSettings,
    factory: Arc<dyn TransportFactory>,
    snapshot: RwLock<Snapshot>,
    session: Mutex<Session>,
}

impl std::fmt::Debug for ServiceConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceConnector")
            .field("name", &self.config.name)
            .field("transport", &self.transport_kind())
            .field("state", &self.state())
            .finish()
    }
}

impl ServiceConnector {
    pub fn new(
        config: ServiceConfig,
        settings: ConnectorSettings,
        factory: Arc<dyn TransportFactory>,
    ) -> Self {
        Self {
            config,
            settings,
            factory,
            snapshot: RwLock::new(Snapshot {
                state: ConnectionState::Disconnected,
                tools: Vec::new(),
                pid: None,
            }),
            session: Mutex::new(Session::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.config.transport_kind()
    }

    pub fn protocol(&self) -> WireProtocol {
        self.config.protocol
    }

    pub fn state(&self) -> ConnectionState {
        self.read_snapshot(|s| s.state)
    }

    /// Tools of the live connection; empty unless `Ready`.
    pub fn tools(&self) -> Vec<ToolDescriptor> {
        self.read_snapshot(|s| match s.state {
            ConnectionState::Ready => s.tools.clone(),
            _ => Vec::new(),
        })
    }

    /// Tools from the last successful discovery, kept while the connection
    /// is down so calls can still be routed here and reconnect. Cleared by a
    /// failed connect and by `disconnect`.
    pub fn catalog(&self) -> Vec<ToolDescriptor> {
        self.read_snapshot(|s| s.tools.clone())
    }

    /// Whether the live connection advertises `name` (the namespaced name).
    pub fn has_tool(&self, name: &str) -> bool {
        self.read_snapshot(|s| {
            s.state == ConnectionState::Ready && s.tools.iter().any(|t| t.name == name)
        })
    }

    /// Process id of the live tool process, for subprocess services.
    pub fn pid(&self) -> Option<u32> {
        self.read_snapshot(|s| s.pid)
    }

    /// Connect, handshake, and discover tools. Returns at once if already ready.
    pub async fn connect(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        self.ensure_connected(&mut session).await
    }

    /// Call `tool` (the service-local name) and wait for its single response.
    ///
    /// `timeout` defaults to the configured call timeout. A timeout or a lost
    /// connection tears the transport down; the next call reconnects.
    pub async fn invoke(
        &self,
        tool: &str,
        args: ToolArguments,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let timeout = timeout.unwrap_or(self.settings.call_timeout);
        let mut session = self.session.lock().await;
        self.ensure_connected(&mut session).await?;

        let started = Instant::now();
        session.in_flight = true;
        let outcome = with_timeout(
            timeout,
            self.name(),
            "tools/call",
            self.call(&mut session, tool, args),
        )
        .await;
        session.in_flight = false;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(_) => {
                tracing::debug!(service = %self.name(), tool, elapsed_ms, "Tool call completed");
            }
            Err(e @ (GatewayError::Timeout { .. } | GatewayError::ConnectionLost { .. })) => {
                tracing::warn!(
                    service = %self.name(),
                    tool,
                    elapsed_ms,
                    error = %e,
                    "Tool call lost its connection; tearing down transport"
                );
                self.teardown(&mut session).await;
                self.set_state(ConnectionState::Disconnected);
            }
            Err(e) => {
                tracing::debug!(
                    service = %self.name(),
                    tool,
                    elapsed_ms,
                    error = %e,
                    "Tool call failed"
                );
            }
        }
        outcome
    }

    /// Terminate the transport and forget discovered tools. Idempotent.
    pub async fn disconnect(&self) {
        let mut session = self.session.lock().await;
        session.in_flight = false;
        let had_transport = session.transport.is_some();
        self.teardown(&mut session).await;
        self.set_state(ConnectionState::Disconnected);
        self.write_snapshot().tools.clear();
        if had_transport {
            tracing::info!(service = %self.name(), "Service disconnected");
        }
    }

    async fn ensure_connected(&self, session: &mut Session) -> Result<()> {
        if session.in_flight {
            tracing::warn!(
                service = %self.name(),
                "Previous call was abandoned mid-flight; reconnecting"
            );
            session.in_flight = false;
            self.teardown(session).await;
            self.set_state(ConnectionState::Disconnected);
        }
        if session.transport.is_some() && self.state() == ConnectionState::Ready {
            return Ok(());
        }
        self.establish(session).await
    }

    async fn establish(&self, session: &mut Session) -> Result<()> {
        self.teardown(session).await;
        self.set_state(ConnectionState::Connecting);

        let started = Instant::now();
        let outcome = with_timeout(
            self.settings.handshake_timeout,
            self.name(),
            "handshake",
            self.handshake(session),
        )
        .await;

        match outcome {
            Ok(tools) => {
                let count = tools.len();
                {
                    let mut snapshot = self.write_snapshot();
                    snapshot.state = ConnectionState::Ready;
                    snapshot.tools = tools;
                }
                tracing::info!(
                    service = %self.name(),
                    transport = %self.transport_kind(),
                    tools = count,
                    pid = self.pid(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Service ready"
                );
                Ok(())
            }
            Err(e) => {
                let stderr = session.transport.as_ref().and_then(|t| t.diagnostics());
                self.teardown(session).await;
                self.set_state(ConnectionState::Failed);
                let e = self.connect_error(e, stderr);
                tracing::warn!(service = %self.name(), error = %e, "Service failed to connect");
                Err(e)
            }
        }
    }

    /// Handshake failures surface as `ConnectFailed`, except deadlines.
    fn connect_error(&self, error: GatewayError, stderr: Option<String>) -> GatewayError {
        match error {
            GatewayError::Timeout { .. } | GatewayError::ConnectFailed { .. } => error,
            other => {
                let stderr = other.stderr().map(str::to_string).or(stderr);
                let message = match stderr {
                    Some(tail) => format!("{other}; stderr: {tail}"),
                    None => other.to_string(),
                };
                GatewayError::connect_failed(self.name(), message)
            }
        }
    }

    async fn handshake(&self, session: &mut Session) -> Result<Vec<ToolDescriptor>> {
        let transport = self
            .factory
            .open(self.name(), &self.config.transport)
            .map_err(|e| GatewayError::from_transport(self.name(), e))?;
        self.write_snapshot().pid = transport.pid();
        session.transport = Some(transport);

        match self.config.protocol {
            WireProtocol::JsonRpc => {
                let init = self
                    .rpc(session, "initialize", protocol::initialize_params())
                    .await?
                    .map_err(|error| {
                        GatewayError::connect_failed(
                            self.name(),
                            format!("initialize rejected: {}", protocol::rpc_error_message(&error)),
                        )
                    })?;
                let server = init.get("serverInfo").cloned().unwrap_or_default();
                let protocol_version = init.get("protocolVersion").cloned().unwrap_or_default();
                tracing::debug!(
                    service = %self.name(),
                    server = %server,
                    protocol_version = %protocol_version,
                    "Initialize handshake complete"
                );
                self.send(session, &protocol::notification("notifications/initialized"))
                    .await?;

                self.set_state(ConnectionState::Discovering);
                self.list_tools(session).await
            }
            WireProtocol::Query => {
                self.send(session, &json!({"query": "ping"})).await?;
                let line = self.receive(session).await?;
                let reply = self.parse(&line)?;
                if protocol::query_outcome(&reply).is_none() {
                    return Err(GatewayError::malformed(
                        self.name(),
                        "ping reply has neither \"result\" nor \"error\"",
                    ));
                }

                self.set_state(ConnectionState::Discovering);
                Ok(vec![self.query_tool_descriptor()])
            }
        }
    }

    fn query_tool_descriptor(&self) -> ToolDescriptor {
        let description = self
            .config
            .description
            .clone()
            .unwrap_or_else(|| format!("Query the {} service", self.name()));
        ToolDescriptor::new(
            self.name(),
            "query",
            description,
            json!({
                "type": "object",
                "properties": {"query": {"type": "string"}},
                "required": ["query"]
            }),
        )
    }

    async fn list_tools(&self, session: &mut Session) -> Result<Vec<ToolDescriptor>> {
        let mut tools: Vec<ToolDescriptor> = Vec::new();
        let mut seen_cursors = HashSet::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_TOOL_PAGES {
            let params = match &cursor {
                Some(cursor) => json!({"cursor": cursor}),
                None => json!({}),
            };
            let page = self.rpc(session, "tools/list", params).await?.map_err(|error| {
                GatewayError::connect_failed(
                    self.name(),
                    format!("tools/list rejected: {}", protocol::rpc_error_message(&error)),
                )
            })?;
            let entries = page.get("tools").and_then(Value::as_array).ok_or_else(|| {
                GatewayError::malformed(self.name(), "tools/list result has no \"tools\" array")
            })?;

            for entry in entries {
                match ToolDescriptor::from_listing(self.name(), entry) {
                    Some(tool) if tools.iter().any(|t| t.name == tool.name) => {
                        tracing::warn!(
                            service = %self.name(),
                            tool = %tool.name,
                            "Duplicate tool skipped"
                        );
                    }
                    Some(tool) => tools.push(tool),
                    None => {
                        tracing::warn!(
                            service = %self.name(),
                            entry = %entry,
                            "Tool entry without a name skipped"
                        );
                    }
                }
            }

            match page.get("nextCursor").and_then(Value::as_str) {
                Some(next) if !next.is_empty() && seen_cursors.insert(next.to_string()) => {
                    cursor = Some(next.to_string());
                }
                _ => return Ok(tools),
            }
        }

        tracing::warn!(
            service = %self.name(),
            pages = MAX_TOOL_PAGES,
            "Stopped following tools/list pages"
        );
        Ok(tools)
    }

    async fn call(&self, session: &mut Session, tool: &str, args: ToolArguments) -> Result<Value> {
        let qualified = qualified_name(self.name(), tool);
        match self.config.protocol {
            WireProtocol::JsonRpc => {
                let params = json!({"name": tool, "arguments": args.into_value()});
                match self.rpc(session, "tools/call", params).await? {
                    Ok(result) => protocol::tool_result(result)
                        .map_err(|message| GatewayError::tool_failed(&qualified, message)),
                    Err(error) => Err(GatewayError::tool_failed(
                        &qualified,
                        protocol::rpc_error_message(&error),
                    )),
                }
            }
            WireProtocol::Query => {
                let args = args.into_value();
                let query = protocol::query_text(&args).ok_or_else(|| {
                    GatewayError::invalid_arguments(&qualified, "missing \"query\" argument")
                })?;
                self.send(session, &json!({"query": query})).await?;
                let line = self.receive(session).await?;
                let reply = self.parse(&line)?;
                match protocol::query_outcome(&reply) {
                    Some(Ok(result)) => Ok(result),
                    Some(Err(message)) => Err(GatewayError::tool_failed(&qualified, message)),
                    None => Err(GatewayError::malformed(
                        self.name(),
                        "reply has neither \"result\" nor \"error\"",
                    )),
                }
            }
        }
    }

    /// Send one JSON-RPC request and wait for the response carrying its id.
    ///
    /// Responses to other ids and notifications are skipped; server pings are
    /// answered. Returns the `result` or the peer's `error` object.
    async fn rpc(
        &self,
        session: &mut Session,
        method: &str,
        params: Value,
    ) -> Result<std::result::Result<Value, Value>> {
        session.next_id += 1;
        let id = session.next_id;
        self.send(session, &protocol::request(id, method, params)).await?;

        loop {
            let line = self.receive(session).await?;
            let message = self.parse(&line)?;
            match protocol::classify(&message) {
                Some(Incoming::Response { id: got, outcome }) if protocol::id_matches(&got, id) => {
                    return Ok(outcome);
                }
                Some(Incoming::Response { id: got, .. }) => {
                    tracing::debug!(
                        service = %self.name(),
                        expected = id,
                        got = %got,
                        "Skipping response to another request"
                    );
                }
                Some(Incoming::Request { id: request_id, method: server_method }) => {
                    let reply = if server_method == "ping" {
                        protocol::response(request_id, json!({}))
                    } else {
                        protocol::method_not_found(request_id, &server_method)
                    };
                    self.send(session, &reply).await?;
                }
                Some(Incoming::Notification { method: note }) => {
                    tracing::debug!(
                        service = %self.name(),
                        method = %note,
                        "Ignoring notification"
                    );
                }
                None => {
                    return Err(GatewayError::malformed(
                        self.name(),
                        format!("not a JSON-RPC message: {}", preview(&line)),
                    ));
                }
            }
        }
    }

    async fn send(&self, session: &mut Session, message: &Value) -> Result<()> {
        let Some(transport) = session.transport.as_mut() else {
            return Err(self.not_connected());
        };
        let record = message.to_string();
        transport
            .write_line(record.as_bytes())
            .await
            .map_err(|e| GatewayError::from_transport(self.name(), e))
    }

    async fn receive(&self, session: &mut Session) -> Result<Vec<u8>> {
        let Some(transport) = session.transport.as_mut() else {
            return Err(self.not_connected());
        };
        transport
            .read_line()
            .await
            .map_err(|e| GatewayError::from_transport(self.name(), e))
    }

    fn parse(&self, line: &[u8]) -> Result<Value> {
        serde_json::from_slice(line).map_err(|e| {
            GatewayError::malformed(self.name(), format!("{e}: {}", preview(line)))
        })
    }

    fn not_connected(&self) -> GatewayError {
        GatewayError::ConnectionLost {
            service: self.name().to_string(),
            message: "not connected".into(),
            stderr: None,
        }
    }

    async fn teardown(&self, session: &mut Session) {
        if let Some(mut transport) = session.transport.take() {
            if let Err(e) = transport.close().await {
                tracing::warn!(service = %self.name(), error = %e, "Failed to close transport");
            }
        }
        self.write_snapshot().pid = None;
    }

    /// A failed connect forgets the catalog; a dropped connection keeps it so
    /// its tools still resolve and the next call reconnects.
    fn set_state(&self, state: ConnectionState) {
        let mut snapshot = self.write_snapshot();
        snapshot.state = state;
        if state == ConnectionState::Failed {
            snapshot.tools.clear();
        }
    }

    fn read_snapshot<T>(&self, read: impl FnOnce(&Snapshot) -> T) -> T {
        let snapshot = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
        read(&snapshot)
    }

    fn write_snapshot(&self) -> RwLockWriteGuard<'_, Snapshot> {
        self.snapshot.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn preview(line: &[u8]) -> String {
    String::from_utf8_lossy(line)
        .chars()
        .take(MALFORMED_PREVIEW_CHARS)
        .collect()
}
