use std::collections::HashMap;

use regex::Regex;

/// Arguments to a parsed command: either `(a, b, …)` positional or
/// `(k=v, k=v, …)` named — never mixed.
#[derive(Debug, Clone, Default)]
pub struct CommandArgs {
    pub positional: Vec<String>,
    pub named: HashMap<String, String>,
}

impl CommandArgs {
    fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() {
            return CommandArgs::default();
        }
        if raw.contains('=') {
            let mut named = HashMap::new();
            for part in raw.split(',') {
                if let Some((k, v)) = part.split_once('=') {
                    named.insert(k.trim().to_string(), v.trim().to_string());
                }
            }
            CommandArgs {
                positional: Vec::new(),
                named,
            }
        } else {
            CommandArgs {
                positional: raw.split(',').map(|s| s.trim().to_string()).collect(),
                named: HashMap::new(),
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.named.get(key).map(|s| s.as_str())
    }

    pub fn nth(&self, i: usize) -> Option<&str> {
        self.positional.get(i).map(|s| s.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ParsedCommand {
    pub name: String,
    pub args: CommandArgs,
    /// Byte range of the whole matched token (`prefix + name [+ (args)]`) within
    /// the text it was found in.
    pub span: (usize, usize),
}

/// A single-pass command scanner. The prefix is configurable (default `!/`).
pub struct CommandParser {
    regex: Regex,
}

impl CommandParser {
    pub fn new(prefix: &str) -> Self {
        let escaped = regex::escape(prefix);
        let pattern = format!(r"{escaped}([a-zA-Z][a-zA-Z0-9_-]*)(?:\(([^)]*)\))?");
        CommandParser {
            regex: Regex::new(&pattern).expect("command regex is statically valid"),
        }
    }

    /// Finds every command occurrence in `text`, left to right.
    pub fn scan<'a>(&self, text: &'a str) -> Vec<ParsedCommand> {
        self.regex
            .captures_iter(text)
            .map(|cap| {
                let whole = cap.get(0).unwrap();
                let name = cap.get(1).unwrap().as_str().to_string();
                let args = cap
                    .get(2)
                    .map(|m| CommandArgs::parse(m.as_str()))
                    .unwrap_or_default();
                ParsedCommand {
                    name,
                    args,
                    span: (whole.start(), whole.end()),
                }
            })
            .collect()
    }

    /// Removes every matched command span from `text`, returning the remainder.
    pub fn strip_all(&self, text: &str) -> String {
        self.regex.replace_all(text, "").to_string()
    }
}

impl Default for CommandParser {
    fn default() -> Self {
        CommandParser::new("!/")
    }
}
