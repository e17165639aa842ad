use regex::Regex;

const REDACTED: &str = "(API_KEY_HAS_BEEN_REDACTED)";

/// Replaces occurrences of any registered API key with a fixed placeholder, and
/// strips any residual `!/command` substring from forwarded text as
/// defence in depth (4.G item 2).
#[derive(Clone)]
pub struct Redactor {
    keys: Vec<String>,
    command_pattern: Regex,
}

impl Redactor {
    pub fn new(keys: Vec<String>, command_prefix: &str) -> Self {
        let escaped = regex::escape(command_prefix);
        let pattern = format!(r"{escaped}[a-zA-Z][a-zA-Z0-9_-]*(?:\([^)]*\))?");
        Redactor {
            keys: keys.into_iter().filter(|k| !k.is_empty()).collect(),
            command_pattern: Regex::new(&pattern).expect("command regex is statically valid"),
        }
    }

    pub fn redact(&self, text: &str) -> String {
        let mut out = text.to_string();
        for key in &self.keys {
            if !key.is_empty() {
                out = out.replace(key.as_str(), REDACTED);
            }
        }
        self.command_pattern.replace_all(&out, "").to_string()
    }
}
