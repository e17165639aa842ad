use super::message::{FinishReason, ToolCall};
use super::response::Usage;

#[derive(Debug, Clone, Default)]
pub struct Delta {
    pub role: Option<super::message::Role>,
    pub content: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Clone)]
pub struct StreamChoice {
    pub index: u32,
    pub delta: Delta,
    pub finish_reason: Option<FinishReason>,
}

/// One item of a lazy, finite stream. Terminated by a chunk whose choice carries
/// a `finish_reason`, or by the sentinel `Done`.
#[derive(Debug, Clone)]
pub enum CanonicalStreamChunk {
    Chunk {
        id: String,
        model: String,
        created: i64,
        choices: Vec<StreamChoice>,
        usage: Option<Usage>,
    },
    Done,
}

impl CanonicalStreamChunk {
    pub fn has_finish_reason(&self) -> bool {
        match self {
            CanonicalStreamChunk::Chunk { choices, .. } => {
                choices.iter().any(|c| c.finish_reason.is_some())
            }
            CanonicalStreamChunk::Done => false,
        }
    }

    pub fn choices(&self) -> &[StreamChoice] {
        match self {
            CanonicalStreamChunk::Chunk { choices, .. } => choices,
            CanonicalStreamChunk::Done => &[],
        }
    }
}
