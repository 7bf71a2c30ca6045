//! Server-sent event framing for normalized streams.

use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::json;

use super::chunk::StreamChunk;
use super::normalizer::ChunkStream;

pub const DONE_FRAME: &str = "data: [DONE]\n\n";

pub fn to_sse_frame(chunk: &StreamChunk) -> String {
    match chunk {
        StreamChunk::Content(text) => format!("data: {}\n\n", json!({ "content": text })),
        StreamChunk::Error(message) => format!("data: {}\n\n", json!({ "error": message })),
        StreamChunk::Done => DONE_FRAME.to_string(),
    }
}

/// Encode a chunk stream as SSE frames, ending after the `[DONE]` frame.
pub fn sse_frames(stream: ChunkStream) -> BoxStream<'static, String> {
    let frames = async_stream::stream! {
        let mut inner = std::pin::pin!(stream);
        while let Some(chunk) = inner.next().await {
            yield to_sse_frame(&chunk);
            if chunk.is_done() {
                break;
            }
        }
    };
    Box::pin(frames)
}
