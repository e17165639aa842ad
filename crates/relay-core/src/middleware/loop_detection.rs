use std::collections::VecDeque;

/// A sliding-window buffer of recent response text, trimmed from the front
/// once it exceeds `max_size`. Grounded on the distilled source's
/// `ResponseBuffer` (deque of chunks, byte-accounted).
pub struct ResponseBuffer {
    max_size: usize,
    chunks: VecDeque<String>,
    stored_len: usize,
}

impl ResponseBuffer {
    pub fn new(max_size: usize) -> Self {
        ResponseBuffer {
            max_size,
            chunks: VecDeque::new(),
            stored_len: 0,
        }
    }

    pub fn append(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.chunks.push_back(text.to_string());
        self.stored_len += text.len();

        while self.stored_len > self.max_size {
            let Some(oldest) = self.chunks.front().cloned() else {
                break;
            };
            let excess = self.stored_len - self.max_size;
            if oldest.len() <= excess {
                self.chunks.pop_front();
                self.stored_len -= oldest.len();
            } else {
                let cut = nearest_char_boundary(&oldest, excess);
                let trimmed = oldest[cut..].to_string();
                self.stored_len -= cut;
                *self.chunks.front_mut().unwrap() = trimmed;
                break;
            }
        }
    }

    pub fn content(&self) -> String {
        self.chunks.iter().cloned().collect::<Vec<_>>().join("")
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.stored_len = 0;
    }

    pub fn size(&self) -> usize {
        self.stored_len
    }
}

fn nearest_char_boundary(s: &str, idx: usize) -> usize {
    let mut idx = idx.min(s.len());
    while idx < s.len() && !s.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

/// Detects a substring of length >= `min_pattern_len` repeating
/// >= `min_repeats` times at the tail of `text`.
pub fn detect_repeat(text: &str, min_pattern_len: usize, min_repeats: usize) -> bool {
    let chars: Vec<char> = text.chars().collect();
    let n = chars.len();
    if min_repeats == 0 || min_pattern_len == 0 {
        return false;
    }
    let max_pattern_len = n / min_repeats;
    for pattern_len in min_pattern_len..=max_pattern_len {
        let span = pattern_len * min_repeats;
        if span > n {
            continue;
        }
        let tail = &chars[n - span..];
        let unit = &tail[..pattern_len];
        let repeats = (1..min_repeats).all(|i| &tail[i * pattern_len..(i + 1) * pattern_len] == unit);
        if repeats {
            return true;
        }
    }
    false
}

/// Stream middleware: maintains a sliding buffer of emitted assistant text and
/// terminates the stream once a loop is detected (4.G item 5).
pub struct LoopDetector {
    buffer: ResponseBuffer,
    min_pattern_len: usize,
    min_repeats: usize,
    triggered: bool,
}

impl LoopDetector {
    pub fn new(window: usize, min_pattern_len: usize, min_repeats: usize) -> Self {
        LoopDetector {
            buffer: ResponseBuffer::new(window),
            min_pattern_len,
            min_repeats,
            triggered: false,
        }
    }

    pub fn default_config() -> Self {
        LoopDetector::new(2048, 8, 3)
    }

    /// Feeds a text delta; returns `true` the first time a loop is detected.
    pub fn feed(&mut self, text: &str) -> bool {
        if self.triggered || text.is_empty() {
            return false;
        }
        self.buffer.append(text);
        if detect_repeat(&self.buffer.content(), self.min_pattern_len, self.min_repeats) {
            self.triggered = true;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_trims_from_front() {
        let mut buf = ResponseBuffer::new(10);
        buf.append("0123456789");
        buf.append("abc");
        assert_eq!(buf.size(), 10);
        assert_eq!(buf.content(), "3456789abc");
    }

    #[test]
    fn detects_simple_repeat() {
        assert!(detect_repeat("abcabcabc", 3, 3));
        assert!(!detect_repeat("abcdefghi", 3, 3));
    }

    #[test]
    fn loop_detector_triggers_once() {
        let mut detector = LoopDetector::new(64, 3, 3);
        assert!(!detector.feed("hello "));
        assert!(detector.feed("foofoofoo"));
        // already triggered, stays quiet
        assert!(!detector.feed("foofoofoo"));
    }
}
