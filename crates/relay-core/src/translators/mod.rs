pub mod anthropic;
pub mod gemini;
pub mod openai;

use serde_json::Value;
use url::Url;

use crate::canonical::{ReasoningEffort, Tool};

/// Validates an image/file URI against the allowed schemes (4.B): only
/// `data:`, `http:`, `https:` are accepted. Anything else is silently
/// dropped — a security boundary, not a bug.
pub fn validate_uri_scheme(uri: &str) -> Option<&str> {
    if uri.starts_with("data:") {
        return Some(uri);
    }
    match Url::parse(uri) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => Some(uri),
        _ => None,
    }
}

/// Serialises canonical function-call arguments to a JSON string exactly
/// once, whatever the source shape. Canonical form always stores arguments
/// as a JSON string, even when an upstream delivered an object.
pub fn arguments_to_json_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn json_string_to_value(arguments_json: &str) -> Value {
    serde_json::from_str(arguments_json).unwrap_or_else(|_| Value::String(arguments_json.to_string()))
}

/// Reasoning-effort -> Gemini `thinkingConfig` mapping (4.B).
pub fn thinking_budget_for_effort(effort: ReasoningEffort, env_override: Option<i64>) -> i64 {
    if let Some(budget) = env_override {
        return budget;
    }
    match effort {
        ReasoningEffort::Low => 512,
        ReasoningEffort::Medium => 2048,
        ReasoningEffort::High => -1,
    }
}

/// Strips schema keys Gemini's `function_declarations` don't support, and
/// merges tool definitions sharing the same declaration group. Applied once,
/// before a tool list reaches the Gemini wire shape.
pub fn sanitize_tools_for_gemini(tools: &[Tool]) -> Vec<Value> {
    let mut seen_names = std::collections::HashSet::new();
    let mut declarations = Vec::new();
    for tool in tools {
        if !seen_names.insert(tool.name.clone()) {
            continue;
        }
        let mut parameters = tool.parameters.clone();
        strip_unsupported_schema_keys(&mut parameters);
        declarations.push(serde_json::json!({
            "name": tool.name,
            "description": tool.description,
            "parameters": parameters,
        }));
    }
    declarations
}

fn strip_unsupported_schema_keys(schema: &mut Value) {
    const UNSUPPORTED: &[&str] = &["$schema", "exclusiveMinimum", "exclusiveMaximum"];
    match schema {
        Value::Object(map) => {
            for key in UNSUPPORTED {
                map.remove(*key);
            }
            if let Some(Value::Bool(_)) = map.get("additionalProperties") {
                // Gemini requires this to already be a boolean; a schema value
                // here would need dropping, but a bool is left as-is.
            } else if map.get("additionalProperties").map(|v| v.is_object()).unwrap_or(false) {
                map.remove("additionalProperties");
            }
            for (_, v) in map.iter_mut() {
                strip_unsupported_schema_keys(v);
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                strip_unsupported_schema_keys(item);
            }
        }
        _ => {}
    }
}
