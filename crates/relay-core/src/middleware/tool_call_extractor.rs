use regex::Regex;
use serde_json::Value;

use crate::canonical::ToolCall;

/// Detects an agent's plain-text tool-call signature (e.g.
/// `<tool_call>{"name":...,"arguments":{...}}</tool_call>`) in the aggregate
/// assistant text and converts it into an equivalent `ToolCall` (4.G item 4).
pub struct ToolCallExtractor {
    pattern: Regex,
}

impl ToolCallExtractor {
    pub fn new() -> Self {
        ToolCallExtractor {
            pattern: Regex::new(r"(?s)<tool_call>\s*(\{.*?\})\s*</tool_call>")
                .expect("tool call regex is statically valid"),
        }
    }

    /// Returns the leftover text with the tag removed plus any extracted
    /// tool calls, or `None` if no signature was present.
    pub fn extract(&self, text: &str, mut next_id: impl FnMut() -> String) -> Option<(String, Vec<ToolCall>)> {
        let mut calls = Vec::new();
        let mut found = false;
        for cap in self.pattern.captures_iter(text) {
            found = true;
            let raw = cap.get(1).unwrap().as_str();
            if let Ok(value) = serde_json::from_str::<Value>(raw) {
                let name = value
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string();
                let arguments_json = value
                    .get("arguments")
                    .cloned()
                    .unwrap_or(Value::Object(Default::default()))
                    .to_string();
                calls.push(ToolCall {
                    id: next_id(),
                    name,
                    arguments_json,
                    index: None,
                });
            }
        }
        if !found {
            return None;
        }
        let remainder = self.pattern.replace_all(text, "").trim().to_string();
        Some((remainder, calls))
    }
}

impl Default for ToolCallExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_a_single_tool_call() {
        let extractor = ToolCallExtractor::new();
        let mut n = 0;
        let text = r#"before <tool_call>{"name":"lookup","arguments":{"q":"x"}}</tool_call> after"#;
        let (remainder, calls) = extractor
            .extract(text, || {
                n += 1;
                format!("call_{n}")
            })
            .unwrap();
        assert_eq!(remainder, "before  after");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "lookup");
    }
}
