use serde::{Deserialize, Serialize};

use super::message::{FinishReason, Message, ToolCall};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    pub prompt: u32,
    pub completion: u32,
    pub total: u32,
}

#[derive(Debug, Clone)]
pub struct Choice {
    pub index: u32,
    pub message: ResponseMessage,
    pub finish_reason: Option<FinishReason>,
}

#[derive(Debug, Clone)]
pub struct ResponseMessage {
    pub role: super::message::Role,
    pub content: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl From<&ResponseMessage> for Message {
    fn from(m: &ResponseMessage) -> Self {
        Message {
            role: m.role,
            content: m.content.clone().map(super::message::Content::Text),
            name: None,
            tool_call_id: None,
            tool_calls: m.tool_calls.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CanonicalChatResponse {
    pub id: String,
    pub model: String,
    pub created: i64,
    pub object: String,
    pub choices: Vec<Choice>,
    pub usage: Option<Usage>,
    pub system_fingerprint: Option<String>,
}

impl CanonicalChatResponse {
    /// Sentinel id emitted for synthesised command replies (spec 4.C).
    pub const COMMAND_RESPONSE_ID: &'static str = "proxy_cmd_processed";

    pub fn is_empty(&self) -> bool {
        self.choices.iter().all(|c| {
            c.message.content.as_deref().unwrap_or("").is_empty() && c.message.tool_calls.is_none()
        })
    }

    pub fn first_text(&self) -> Option<&str> {
        self.choices.first()?.message.content.as_deref()
    }
}
