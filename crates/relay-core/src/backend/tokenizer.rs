//! Deterministic prompt-token approximation (4.F input-size enforcement).
//!
//! Not upstream-exact — every backend has its own true tokenizer — but
//! deterministic and local, which is what the input-limit invariant needs.

use std::sync::Arc;

use tiktoken_rs::CoreBPE;

use crate::canonical::{CanonicalChatRequest, Content, Part};

#[derive(Clone)]
pub struct Tokenizer {
    bpe: Arc<CoreBPE>,
}

impl Tokenizer {
    pub fn new() -> Self {
        Tokenizer {
            bpe: tiktoken_rs::cl100k_base_singleton(),
        }
    }

    pub fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }

    /// Sums tokens across every text-bearing part of every message, plus tool
    /// call argument strings, so tool-heavy conversations aren't undercounted.
    pub fn count_request(&self, req: &CanonicalChatRequest) -> usize {
        req.messages
            .iter()
            .map(|m| {
                let mut total = 0;
                if let Some(content) = &m.content {
                    let text = match content {
                        Content::Text(t) => t.clone(),
                        Content::Parts(parts) => parts
                            .iter()
                            .filter_map(Part::as_text)
                            .collect::<Vec<_>>()
                            .join(" "),
                    };
                    total += self.count(&text);
                }
                if let Some(calls) = &m.tool_calls {
                    for c in calls {
                        total += self.count(&c.arguments_json);
                    }
                }
                total
            })
            .sum()
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::Message;

    #[test]
    fn counts_grow_with_content() {
        let tok = Tokenizer::new();
        let short = CanonicalChatRequest {
            model: "m".into(),
            messages: vec![Message::user("hi")],
            sampling: Default::default(),
            stream: false,
            tools: None,
            tool_choice: None,
            reasoning: Default::default(),
            extra_body: Default::default(),
            session_id: None,
        };
        let mut long = short.clone_with_text("hello ".repeat(200));
        assert!(tok.count_request(&long) > tok.count_request(&short));
        long.messages.clear();
        assert_eq!(tok.count_request(&long), 0);
    }

    impl CanonicalChatRequest {
        fn clone_with_text(&self, text: String) -> Self {
            let mut c = self.clone();
            c.messages = vec![Message::user(text)];
            c
        }
    }
}
