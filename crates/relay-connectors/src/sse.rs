//! Line-buffering SSE `data:` payload extraction shared by every streaming
//! connector. Network chunk boundaries rarely line up with SSE event
//! boundaries, so arrived bytes are buffered until a full line is seen.

/// Feeds raw bytes as they arrive off the wire and yields complete `data:`
/// payloads, in order, stripped of their prefix.
pub struct SseLineSplitter {
    buffer: String,
}

impl SseLineSplitter {
    pub fn new() -> Self {
        SseLineSplitter { buffer: String::new() }
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));
        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line = self.buffer[..pos].trim_end_matches('\r').to_string();
            self.buffer.drain(..=pos);
            let trimmed = line.trim();
            if let Some(data) = trimmed.strip_prefix("data:") {
                payloads.push(data.trim_start().to_string());
            }
        }
        payloads
    }
}

impl Default for SseLineSplitter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_complete_lines_across_feeds() {
        let mut splitter = SseLineSplitter::new();
        let first = splitter.feed(b"data: {\"a\":1}\nda");
        assert_eq!(first, vec!["{\"a\":1}"]);
        let rest = splitter.feed(b"ta: {\"b\":2}\n");
        assert_eq!(rest, vec!["{\"b\":2}"]);
    }

    #[test]
    fn ignores_comment_and_blank_lines() {
        let mut splitter = SseLineSplitter::new();
        let out = splitter.feed(b": keep-alive\n\ndata: [DONE]\n");
        assert_eq!(out, vec!["[DONE]"]);
    }
}
