//! Text transforms applied to a normalized chunk stream.

use futures::StreamExt;

use super::chunk::StreamChunk;
use super::normalizer::ChunkStream;
use super::thinking::{ThinkingDelimiters, ThinkingFilter};

/// Trait for transforming a normalized chunk stream.
///
/// Transforms rewrite `Content` only. `Error` and `Done` pass through in
/// order, and nothing is yielded after the terminal `Done`.
pub trait ChunkTransform: Send + Sync {
    fn transform(&self, stream: ChunkStream) -> ChunkStream;
}

/// Drops reasoning blocks from content.
pub struct ThinkingTransform {
    delimiters: ThinkingDelimiters,
}

impl ThinkingTransform {
    pub fn new(delimiters: ThinkingDelimiters) -> Self {
        Self { delimiters }
    }
}

impl Default for ThinkingTransform {
    fn default() -> Self {
        Self::new(ThinkingDelimiters::default())
    }
}

impl ChunkTransform for ThinkingTransform {
    fn transform(&self, stream: ChunkStream) -> ChunkStream {
        let mut filter = ThinkingFilter::new(self.delimiters.clone());
        let transformed = async_stream::stream! {
            let mut inner = std::pin::pin!(stream);
            while let Some(chunk) = inner.next().await {
                match chunk {
                    StreamChunk::Content(text) => {
                        let visible = filter.push(&text);
                        if !visible.is_empty() {
                            yield StreamChunk::Content(visible);
                        }
                    }
                    terminal @ (StreamChunk::Error(_) | StreamChunk::Done) => {
                        let rest = filter.finish();
                        if !rest.is_empty() {
                            yield StreamChunk::Content(rest);
                        }
                        let done = terminal.is_done();
                        yield terminal;
                        if done {
                            break;
                        }
                    }
                }
            }
        };
        Box::pin(transformed)
    }
}

/// Coalesce content until at least `min_chars` characters are buffered.
pub struct BufferTransform {
    min_chars: usize,
}

impl BufferTransform {
    pub fn new(min_chars: usize) -> Self {
        Self { min_chars }
    }
}

impl ChunkTransform for BufferTransform {
    fn transform(&self, stream: ChunkStream) -> ChunkStream {
        let min_chars = self.min_chars;
        let transformed = async_stream::stream! {
            let mut buffer = String::new();
            let mut inner = std::pin::pin!(stream);

            while let Some(chunk) = inner.next().await {
                match chunk {
                    StreamChunk::Content(text) => {
                        buffer.push_str(&text);
                        if buffer.chars().count() >= min_chars {
                            yield StreamChunk::Content(std::mem::take(&mut buffer));
                        }
                    }
                    terminal @ (StreamChunk::Error(_) | StreamChunk::Done) => {
                        if !buffer.is_empty() {
                            yield StreamChunk::Content(std::mem::take(&mut buffer));
                        }
                        let done = terminal.is_done();
                        yield terminal;
                        if done {
                            break;
                        }
                    }
                }
            }

            if !buffer.is_empty() {
                yield StreamChunk::Content(buffer);
            }
        };
        Box::pin(transformed)
    }
}
