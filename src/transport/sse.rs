use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{Transport, TransportError};
use crate::config::{SseConfig, TransportKind};

const SESSION_HEADER: &str = "mcp-session-id";
const ACCEPT_VALUE: &str = "application/json, text/event-stream";

type Inbound = Result<Vec<u8>, TransportError>;

/// HTTP transport: each record is POSTed; responses come back as either a
/// JSON body or a `text/event-stream` whose `data:` events are records.
pub struct SseTransport {
    service: String,
    url: String,
    headers: BTreeMap<String, String>,
    client: reqwest::Client,
    session_id: Option<String>,
    inbox_tx: mpsc::UnboundedSender<Inbound>,
    inbox_rx: mpsc::UnboundedReceiver<Inbound>,
    readers: Vec<JoinHandle<()>>,
    closed: bool,
}

impl SseTransport {
    pub fn new(service: &str, config: &SseConfig, client: reqwest::Client) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            service: service.to_string(),
            url: config.url.clone(),
            headers: config.headers.clone(),
            client,
            session_id: None,
            inbox_tx,
            inbox_rx,
            readers: Vec::new(),
            closed: false,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Session id assigned by the server, if any.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    fn request(&self, method: reqwest::Method) -> reqwest::RequestBuilder {
        let mut request = self.client.request(method, &self.url);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }
        if let Some(session) = &self.session_id {
            request = request.header(SESSION_HEADER, session);
        }
        request
    }

    /// Read `response` as an event stream on a background task.
    ///
    /// When the stream answers a request (`expects_reply`) and ends, cleanly
    /// or not, before carrying a reply, a `Closed` error is queued so the
    /// waiting reader fails instead of hanging.
    fn spawn_event_reader(&mut self, response: reqwest::Response, expects_reply: bool) {
        let tx = self.inbox_tx.clone();
        let service = self.service.clone();
        self.readers.retain(|reader| !reader.is_finished());
        self.readers.push(tokio::spawn(async move {
            let mut parser = SseLineParser::default();
            let mut bytes = response.bytes_stream();
            let mut replied = false;
            let mut failure = None;
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        tracing::warn!(service = %service, error = %e, "Event stream read failed");
                        failure = Some(e.to_string());
                        break;
                    }
                };
                for event in parser.push(&chunk) {
                    replied |= is_reply(&event);
                    if tx.send(Ok(event.into_bytes())).is_err() {
                        return;
                    }
                }
            }
            if let Some(event) = parser.finish() {
                replied |= is_reply(&event);
                let _ = tx.send(Ok(event.into_bytes()));
            }
            if expects_reply && !replied {
                let reason = failure.unwrap_or_else(|| "ended without a reply".into());
                tracing::warn!(service = %service, reason = %reason, "Event stream closed early");
                let _ = tx.send(Err(TransportError::Closed { stderr: None }));
            }
        }));
    }
}

/// Anything but a JSON-RPC notification or request waits for an answer.
fn expects_reply(record: &[u8]) -> bool {
    match serde_json::from_slice::<Value>(record) {
        Ok(Value::Object(map)) => !map.contains_key("method") || map.contains_key("id"),
        _ => true,
    }
}

/// Server-initiated messages carry a `method`; replies do not.
fn is_reply(event: &str) -> bool {
    match serde_json::from_str::<Value>(event) {
        Ok(Value::Object(map)) => !map.contains_key("method"),
        _ => true,
    }
}

#[async_trait]
impl Transport for SseTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }

    async fn write_line(&mut self, record: &[u8]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed { stderr: None });
        }

        let response = self
            .request(reqwest::Method::POST)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, ACCEPT_VALUE)
            .body(record.to_vec())
            .send()
            .await?;

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            if self.session_id.as_deref() != Some(session) {
                tracing::debug!(service = %self.service, session, "Captured MCP session id");
                self.session_id = Some(session.to_string());
            }
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));
        if is_event_stream {
            self.spawn_event_reader(response, expects_reply(record));
            return Ok(());
        }

        let body = response.bytes().await?;
        if !body.iter().all(u8::is_ascii_whitespace) {
            let _ = self.inbox_tx.send(Ok(body.to_vec()));
        }
        Ok(())
    }

    async fn read_line(&mut self) -> Result<Vec<u8>, TransportError> {
        if self.closed {
            return Err(TransportError::Closed { stderr: None });
        }
        self.inbox_rx
            .recv()
            .await
            .unwrap_or(Err(TransportError::Closed { stderr: None }))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        for reader in self.readers.drain(..) {
            reader.abort();
        }
        if self.session_id.is_some() {
            // Best effort; servers without session support answer 405.
            if let Err(e) = self.request(reqwest::Method::DELETE).send().await {
                tracing::debug!(
                    service = %self.service,
                    error = %e,
                    "Session close request failed"
                );
            }
        }
        Ok(())
    }
}

/// Incremental `text/event-stream` parser yielding each event's `data` payload.
#[derive(Debug, Default)]
pub(crate) struct SseLineParser {
    buffer: String,
    data: Vec<String>,
}

impl SseLineParser {
    /// Feed raw bytes; returns the events completed by them.
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut events = Vec::new();
        while let Some(line_end) = self.buffer.find('\n') {
            let line = self.buffer[..line_end].trim_end_matches('\r').to_string();
            self.buffer.drain(..=line_end);

            if line.is_empty() {
                events.extend(self.flush());
            } else if let Some(data) = line.strip_prefix("data:") {
                self.data.push(data.strip_prefix(' ').unwrap_or(data).to_string());
            }
            // Comments, `event:`, `id:` and `retry:` lines carry no record.
        }
        events
    }

    /// End of stream: emit any event left without a trailing blank line.
    pub(crate) fn finish(&mut self) -> Option<String> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            if let Some(data) = rest.trim_end_matches('\r').strip_prefix("data:") {
                self.data.push(data.strip_prefix(' ').unwrap_or(data).to_string());
            }
        }
        self.flush()
    }

    fn flush(&mut self) -> Option<String> {
        if self.data.is_empty() {
            return None;
        }
        let event = self.data.join("\n");
        self.data.clear();
        if event.trim().is_empty() || event == "[DONE]" {
            None
        } else {
            Some(event)
        }
    }
}
