use std::fmt::Display;
use std::sync::Arc;

use futures::stream::{BoxStream, Stream};
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::chunk::StreamChunk;
use super::chunking::split_chunks;
use super::extract::{default_extractors, extract_text, DeltaExtractor};
use super::transform::{ChunkTransform, ThinkingTransform};
use super::StreamSettings;
use crate::error::GatewayError;

pub type ChunkStream = BoxStream<'static, StreamChunk>;

/// Turns provider deltas or complete results into [`ChunkStream`]s.
///
/// Every stream it returns ends with exactly one [`StreamChunk::Done`],
/// preceded by at most one [`StreamChunk::Error`].
///
/// Thinking blocks are stripped from model text only. Tool results replay
/// byte for byte.
#[derive(Clone)]
pub struct StreamNormalizer {
    settings: StreamSettings,
    extractors: Vec<DeltaExtractor>,
    thinking: Option<Arc<ThinkingTransform>>,
    transforms: Vec<Arc<dyn ChunkTransform>>,
}

impl std::fmt::Debug for StreamNormalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamNormalizer")
            .field("settings", &self.settings)
            .field("extractors", &self.extractors.len())
            .field("strip_thinking", &self.thinking.is_some())
            .field("transforms", &self.transforms.len())
            .finish()
    }
}

impl Default for StreamNormalizer {
    fn default() -> Self {
        Self::new(StreamSettings::default())
    }
}

impl StreamNormalizer {
    pub fn new(settings: StreamSettings) -> Self {
        let thinking = settings
            .strip_thinking
            .then(|| Arc::new(ThinkingTransform::new(settings.thinking.clone())));
        Self {
            settings,
            extractors: default_extractors(),
            thinking,
            transforms: Vec::new(),
        }
    }

    /// Replace the delta extractors. Earlier entries win.
    pub fn with_extractors(mut self, extractors: Vec<DeltaExtractor>) -> Self {
        self.extractors = extractors;
        self
    }

    /// Append a transform, applied after the ones already configured.
    pub fn with_transform(mut self, transform: impl ChunkTransform + 'static) -> Self {
        self.transforms.push(Arc::new(transform));
        self
    }

    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    /// Normalize a genuinely incremental source of provider chunks.
    ///
    /// The source is not polled again after it yields an error.
    pub fn normalize<S, E>(&self, source: S) -> ChunkStream
    where
        S: Stream<Item = Result<Value, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let extractors = self.extractors.clone();
        let cumulative = self.settings.cumulative;
        let normalized = async_stream::stream! {
            let mut source = std::pin::pin!(source);
            let mut previous = String::new();

            while let Some(item) = source.next().await {
                match item {
                    Ok(chunk) => {
                        let mut text = extract_text(&chunk, &extractors);
                        if cumulative {
                            let delta = match text.strip_prefix(previous.as_str()) {
                                Some(suffix) => suffix.to_string(),
                                None => text.clone(),
                            };
                            previous = std::mem::replace(&mut text, delta);
                        }
                        if !text.is_empty() {
                            yield StreamChunk::Content(text);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Stream source failed");
                        yield StreamChunk::Error(e.to_string());
                        break;
                    }
                }
            }
            yield StreamChunk::Done;
        };
        self.apply(self.strip_thinking(Box::pin(normalized)))
    }

    /// Replay a complete model reply as a stream of configured pieces.
    pub fn simulate(&self, text: impl Into<String>) -> ChunkStream {
        self.apply(self.strip_thinking(self.replay(text.into())))
    }

    /// Package a tool result. Strings replay as-is, other values as JSON text.
    pub fn from_result(&self, result: Result<Value, GatewayError>) -> ChunkStream {
        match result {
            Ok(Value::String(text)) => self.apply(self.replay(text)),
            Ok(value) => self.apply(self.replay(value.to_string())),
            Err(e) => {
                let failed = futures::stream::iter([
                    StreamChunk::Error(e.to_string()),
                    StreamChunk::Done,
                ]);
                self.apply(Box::pin(failed))
            }
        }
    }

    fn replay(&self, text: String) -> ChunkStream {
        let pieces = split_chunks(&text, self.settings.chunking);
        let delay = self.settings.delay;
        let simulated = async_stream::stream! {
            for (index, piece) in pieces.into_iter().enumerate() {
                if index > 0 && !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                yield StreamChunk::Content(piece);
            }
            yield StreamChunk::Done;
        };
        Box::pin(simulated)
    }

    fn strip_thinking(&self, stream: ChunkStream) -> ChunkStream {
        match &self.thinking {
            Some(thinking) => thinking.transform(stream),
            None => stream,
        }
    }

    fn apply(&self, stream: ChunkStream) -> ChunkStream {
        self.transforms
            .iter()
            .fold(stream, |stream, transform| transform.transform(stream))
    }
}

/// Pump `stream` into `sender` until it ends or the receiver goes away.
/// The upstream is dropped on return.
pub async fn forward(stream: ChunkStream, sender: mpsc::Sender<StreamChunk>) {
    let mut stream = stream;
    loop {
        let next = tokio::select! {
            _ = sender.closed() => {
                tracing::debug!("Stream consumer went away");
                break;
            }
            next = stream.next() => next,
        };
        let Some(chunk) = next else { break };
        if sender.send(chunk).await.is_err() {
            break;
        }
    }
}

/// Run [`forward`] on a task and hand back the receiving end.
pub fn spawn_forward(stream: ChunkStream, buffer: usize) -> ReceiverStream<StreamChunk> {
    let (sender, receiver) = mpsc::channel(buffer.max(1));
    tokio::spawn(forward(stream, sender));
    ReceiverStream::new(receiver)
}
