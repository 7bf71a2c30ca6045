use serde::Serialize;
use strum::Display;

/// One event of a normalized stream.
///
/// A well-formed stream is any number of `Content` chunks followed by either
/// `Done` or `Error` then `Done`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "payload", rename_all = "lowercase")]
pub enum StreamChunk {
    Content(String),
    Error(String),
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ChunkKind {
    Content,
    Error,
    Done,
}

impl StreamChunk {
    pub fn kind(&self) -> ChunkKind {
        match self {
            Self::Content(_) => ChunkKind::Content,
            Self::Error(_) => ChunkKind::Error,
            Self::Done => ChunkKind::Done,
        }
    }

    pub fn content(&self) -> Option<&str> {
        match self {
            Self::Content(text) => Some(text),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_with_kind_and_payload() {
        assert_eq!(
            serde_json::to_value(StreamChunk::Content("hi".into())).expect("serialize"),
            json!({"kind": "content", "payload": "hi"})
        );
        assert_eq!(
            serde_json::to_value(StreamChunk::Done).expect("serialize"),
            json!({"kind": "done"})
        );
        assert_eq!(StreamChunk::Error("x".into()).kind().to_string(), "error");
    }
}
