//! Text delta extraction from provider chunk shapes.

use serde_json::Value;

/// Pulls the text delta out of one chunk shape, or `None` if the shape
/// does not match.
pub type DeltaExtractor = fn(&Value) -> Option<String>;

/// `{"content": "..."}`: tool results and simple providers.
pub fn top_level_content(chunk: &Value) -> Option<String> {
    match chunk.get("content")? {
        Value::String(text) => Some(text.clone()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}

/// `{"choices": [{"delta": {"content": "..."}}]}`: OpenAI-style streaming.
///
/// A delta without text (role announcement, tool-call fragment) yields an
/// empty string so the chunk is skipped rather than stringified.
pub fn choice_delta_content(chunk: &Value) -> Option<String> {
    let delta = chunk.get("choices")?.get(0)?.get("delta")?;
    match delta.get("content") {
        Some(Value::String(text)) => Some(text.clone()),
        _ => Some(String::new()),
    }
}

/// `{"choices": [{"message": {"content": "..."}}]}`: non-streaming completions.
pub fn choice_message_content(chunk: &Value) -> Option<String> {
    chunk
        .get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()
        .map(str::to_string)
}

/// Extractors in priority order.
pub fn default_extractors() -> Vec<DeltaExtractor> {
    vec![top_level_content, choice_delta_content, choice_message_content]
}

/// First extractor match wins. A bare JSON string is its own text; any other
/// unrecognized shape is stringified whole.
pub fn extract_text(chunk: &Value, extractors: &[DeltaExtractor]) -> String {
    if let Some(text) = extractors.iter().find_map(|extract| extract(chunk)) {
        return text;
    }
    match chunk {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
