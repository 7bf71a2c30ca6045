//! Transport layer: raw record framing to one tool service.
//!
//! A transport moves newline-delimited records and knows nothing about the
//! protocol spoken over them. [`crate::connector::ServiceConnector`] owns
//! exactly one live transport at a time.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{TransportConfig, TransportKind};

mod sse;
mod stdio;

pub use sse::SseTransport;
pub use stdio::StdioTransport;

#[cfg(test)]
pub(crate) mod test_support;

/// Failures below the protocol layer. Translated into
/// [`crate::error::GatewayError`] at the connector boundary.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("transport closed{}", stderr_suffix(.stderr))]
    Closed { stderr: Option<String> },

    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

fn stderr_suffix(stderr: &Option<String>) -> String {
    match stderr {
        Some(tail) => format!(" (stderr: {tail})"),
        None => String::new(),
    }
}

/// One live connection to one tool service.
#[async_trait]
pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    /// Write one record followed by exactly one `\n` delimiter.
    async fn write_line(&mut self, record: &[u8]) -> Result<(), TransportError>;

    /// Wait for the next complete record, without its delimiter.
    ///
    /// Fails with [`TransportError::Closed`] once the peer is gone.
    async fn read_line(&mut self) -> Result<Vec<u8>, TransportError>;

    /// Release the connection. Safe to call any number of times.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Recent diagnostic output of the peer (stderr for subprocesses).
    fn diagnostics(&self) -> Option<String> {
        None
    }

    /// OS process id, for subprocess transports.
    fn pid(&self) -> Option<u32> {
        None
    }
}

/// Opens transports for a service. Swappable so connectors can be tested
/// without real processes or sockets.
pub trait TransportFactory: Send + Sync {
    fn open(
        &self,
        service: &str,
        config: &TransportConfig,
    ) -> Result<Box<dyn Transport>, TransportError>;
}

/// Spawns real subprocesses and HTTP sessions.
#[derive(Debug, Clone)]
pub struct DefaultTransportFactory {
    shutdown_grace: Duration,
    client: reqwest::Client,
}

impl DefaultTransportFactory {
    pub fn new(shutdown_grace: Duration) -> Self {
        Self {
            shutdown_grace,
            client: reqwest::Client::new(),
        }
    }

    /// Share an existing HTTP client across sse transports.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }
}

impl Default for DefaultTransportFactory {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

impl TransportFactory for DefaultTransportFactory {
    fn open(
        &self,
        service: &str,
        config: &TransportConfig,
    ) -> Result<Box<dyn Transport>, TransportError> {
        match config {
            TransportConfig::Stdio(params) => Ok(Box::new(StdioTransport::spawn(
                service,
                params,
                self.shutdown_grace,
            )?)),
            TransportConfig::Sse(params) => Ok(Box::new(SseTransport::new(
                service,
                params,
                self.client.clone(),
            ))),
        }
    }
}
