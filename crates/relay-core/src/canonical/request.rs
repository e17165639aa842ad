use std::collections::HashMap;
use std::fmt;

use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::ProxyError;

use super::message::Message;

/// Definition of a tool the model may call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// How the model is permitted to use tools. Mirrors the three-way OpenAI shape
/// (`"required"` / `"auto"` / `"none"`, or a pinned function) on the wire.
#[derive(Debug, Clone, Default)]
pub enum ToolChoice {
    Any,
    #[default]
    Auto,
    Function(String),
    None,
}

impl Serialize for ToolChoice {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            ToolChoice::Any => serializer.serialize_str("required"),
            ToolChoice::Auto => serializer.serialize_str("auto"),
            ToolChoice::None => serializer.serialize_str("none"),
            ToolChoice::Function(name) => {
                use serde::ser::SerializeMap;
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("type", "function")?;
                let mut func = HashMap::new();
                func.insert("name", name.as_str());
                map.serialize_entry("function", &func)?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for ToolChoice {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ToolChoiceVisitor;

        impl<'de> Visitor<'de> for ToolChoiceVisitor {
            type Value = ToolChoice;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a string (`required`, `auto`, `none`) or `{ type: \"function\", function: { name } }`")
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                match value {
                    "required" => Ok(ToolChoice::Any),
                    "auto" => Ok(ToolChoice::Auto),
                    "none" => Ok(ToolChoice::None),
                    other => Err(de::Error::unknown_variant(
                        other,
                        &["required", "auto", "none"],
                    )),
                }
            }

            fn visit_map<M>(self, mut map: M) -> Result<Self::Value, M::Error>
            where
                M: MapAccess<'de>,
            {
                let mut name = None;
                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "type" => {
                            let _: String = map.next_value()?;
                        }
                        "function" => {
                            let func: serde_json::Map<String, Value> = map.next_value()?;
                            if let Some(Value::String(n)) = func.get("name") {
                                name = Some(n.clone());
                            }
                        }
                        _ => {
                            let _: Value = map.next_value()?;
                        }
                    }
                }
                name.map(ToolChoice::Function)
                    .ok_or_else(|| de::Error::missing_field("function"))
            }
        }

        deserializer.deserialize_any(ToolChoiceVisitor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

impl fmt::Display for ReasoningEffort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReasoningEffort::Low => write!(f, "low"),
            ReasoningEffort::Medium => write!(f, "medium"),
            ReasoningEffort::High => write!(f, "high"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReasoningControls {
    pub effort: Option<ReasoningEffort>,
    pub thinking_budget: Option<i64>,
    pub raw_reasoning: Option<Value>,
    pub generation_config: Option<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct SamplingParams {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<i64>,
    pub max_tokens: Option<u32>,
    pub stop: Option<Vec<String>>,
    pub presence_penalty: Option<f64>,
    pub frequency_penalty: Option<f64>,
    pub seed: Option<i64>,
    pub user: Option<String>,
    pub logit_bias: Option<HashMap<String, f64>>,
}

/// The single request shape every frontend translator produces and every
/// backend connector consumes.
#[derive(Debug, Clone)]
pub struct CanonicalChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub sampling: SamplingParams,
    pub stream: bool,
    pub tools: Option<Vec<Tool>>,
    pub tool_choice: Option<ToolChoice>,
    pub reasoning: ReasoningControls,
    pub extra_body: HashMap<String, Value>,
    pub session_id: Option<String>,
}

impl CanonicalChatRequest {
    /// Validation rules from 4.A: non-empty model, non-empty messages, and
    /// every message carrying at least one of content/tool_calls/tool_call_id.
    pub fn validate(&self) -> Result<(), ProxyError> {
        if self.model.is_empty() {
            return Err(ProxyError::invalid("empty_model", "model must not be empty"));
        }
        if self.messages.is_empty() {
            return Err(ProxyError::invalid(
                "empty_messages",
                "messages must not be empty",
            ));
        }
        for (i, m) in self.messages.iter().enumerate() {
            if !m.is_valid() {
                return Err(ProxyError::invalid(
                    "empty_message",
                    format!("message {i} has no content, tool_calls, or tool_call_id"),
                ));
            }
        }
        Ok(())
    }

    /// Splits `"backend:model"` into its components, if the model is so qualified.
    pub fn explicit_backend(&self) -> Option<(&str, &str)> {
        self.model.split_once(':')
    }
}
