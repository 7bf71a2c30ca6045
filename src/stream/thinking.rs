//! Removal of reasoning blocks (`<think>...</think>`) from streamed text.

/// Delimiters around a reasoning block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThinkingDelimiters {
    pub open: String,
    pub close: String,
}

impl Default for ThinkingDelimiters {
    fn default() -> Self {
        Self {
            open: "<think>".into(),
            close: "</think>".into(),
        }
    }
}

/// Incremental filter; delimiters may be split across pushes.
#[derive(Debug, Clone)]
pub struct ThinkingFilter {
    delimiters: ThinkingDelimiters,
    /// Tail of the last push that may be the start of a delimiter.
    pending: String,
    inside: bool,
    /// Drop whitespace until the next visible character.
    after_close: bool,
}

impl ThinkingFilter {
    pub fn new(delimiters: ThinkingDelimiters) -> Self {
        Self {
            delimiters,
            pending: String::new(),
            inside: false,
            after_close: false,
        }
    }

    /// Feed text; returns what can be forwarded now.
    pub fn push(&mut self, text: &str) -> String {
        let mut buffer = std::mem::take(&mut self.pending);
        buffer.push_str(text);
        let mut visible = String::new();

        loop {
            if self.inside {
                match buffer.find(&self.delimiters.close) {
                    Some(at) => {
                        buffer.drain(..at + self.delimiters.close.len());
                        self.inside = false;
                        self.after_close = true;
                    }
                    None => {
                        let keep = partial_suffix(&buffer, &self.delimiters.close);
                        self.pending = buffer.split_off(buffer.len() - keep);
                        return visible;
                    }
                }
                continue;
            }

            if self.after_close {
                let trimmed = buffer.trim_start().len();
                buffer.drain(..buffer.len() - trimmed);
                if buffer.is_empty() {
                    return visible;
                }
                self.after_close = false;
            }

            match buffer.find(&self.delimiters.open) {
                Some(at) => {
                    visible.push_str(&buffer[..at]);
                    buffer.drain(..at + self.delimiters.open.len());
                    self.inside = true;
                }
                None => {
                    let keep = partial_suffix(&buffer, &self.delimiters.open);
                    self.pending = buffer.split_off(buffer.len() - keep);
                    visible.push_str(&buffer);
                    return visible;
                }
            }
        }
    }

    /// End of input. An unterminated block is dropped; a dangling partial
    /// opening delimiter was ordinary text after all.
    pub fn finish(&mut self) -> String {
        let pending = std::mem::take(&mut self.pending);
        if self.inside {
            self.inside = false;
            tracing::debug!(dropped_bytes = pending.len(), "Dropping unterminated thinking block");
            return String::new();
        }
        pending
    }

    /// Filter a complete text in one go.
    pub fn strip(delimiters: &ThinkingDelimiters, text: &str) -> String {
        let mut filter = Self::new(delimiters.clone());
        let mut out = filter.push(text);
        out.push_str(&filter.finish());
        out
    }
}

/// Length of the longest proper prefix of `delimiter` that `text` ends with.
fn partial_suffix(text: &str, delimiter: &str) -> usize {
    (1..delimiter.len())
        .rev()
        .filter(|&len| delimiter.is_char_boundary(len))
        .find(|&len| text.ends_with(&delimiter[..len]))
        .unwrap_or(0)
}
