pub mod empty_response;
pub mod json_repair;
pub mod loop_detection;
pub mod redaction;
pub mod tool_call_extractor;

use crate::canonical::{CanonicalChatRequest, CanonicalChatResponse, CanonicalStreamChunk, Content, Delta, FinishReason, Part, StreamChoice};
use crate::error::ProxyError;

pub use empty_response::{needs_recovery, RECOVERY_MESSAGE};
pub use json_repair::{repair_json, JsonRepairBuffer};
pub use loop_detection::{LoopDetector, ResponseBuffer};
pub use redaction::Redactor;
pub use tool_call_extractor::ToolCallExtractor;

/// Redacts every text-bearing message in an outbound request before it is
/// forwarded to a connector (4.G item 2): session history carried on a later
/// turn can still contain a previously-echoed key, so this runs on every
/// dispatch, not just on the response path.
pub fn redact_request(req: &mut CanonicalChatRequest, redactor: &Redactor) {
    for message in &mut req.messages {
        if let Some(content) = &mut message.content {
            match content {
                Content::Text(text) => *text = redactor.redact(text),
                Content::Parts(parts) => {
                    for part in parts {
                        if let Part::Text { text } = part {
                            *text = redactor.redact(text);
                        }
                    }
                }
            }
        }
    }
}

/// Applies the non-streaming half of the response middleware chain (4.G):
/// redaction, text-encoded tool-call extraction, then the empty-response
/// check. JSON repair and loop detection degrade to no-ops over a single
/// final response, per 4.G's closing paragraph.
pub fn apply_to_response(
    mut response: CanonicalChatResponse,
    redactor: &Redactor,
    tool_extractor: &ToolCallExtractor,
) -> Result<CanonicalChatResponse, ProxyError> {
    let mut next_tool_id = 0u32;
    for choice in &mut response.choices {
        if let Some(text) = &choice.message.content {
            let redacted = redactor.redact(text);
            if let Some((remainder, calls)) = tool_extractor.extract(&redacted, || {
                next_tool_id += 1;
                format!("call_{next_tool_id}")
            }) {
                choice.message.content = if remainder.is_empty() { None } else { Some(remainder) };
                let mut existing = choice.message.tool_calls.take().unwrap_or_default();
                existing.extend(calls);
                choice.message.tool_calls = Some(existing);
            } else {
                choice.message.content = Some(redacted);
            }
        }
    }

    if needs_recovery(&response) {
        return Err(ProxyError::EmptyResponse);
    }
    Ok(response)
}

/// Per-call streaming middleware state, run in arrival order over one
/// backend call's chunk sequence (4.G). JSON-shaped content is buffered and
/// re-emitted as a single repaired delta right before the terminal chunk;
/// ordinary prose streams through chunk by chunk once redacted.
pub struct StreamPipeline {
    redactor: Redactor,
    loop_detector: LoopDetector,
    tool_extractor: ToolCallExtractor,
    json_buffer: String,
    json_mode: Option<bool>,
    terminated: bool,
    next_tool_id: u32,
}

impl StreamPipeline {
    pub fn new(redactor: Redactor) -> Self {
        StreamPipeline {
            redactor,
            loop_detector: LoopDetector::default_config(),
            tool_extractor: ToolCallExtractor::new(),
            json_buffer: String::new(),
            json_mode: None,
            terminated: false,
            next_tool_id: 0,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Feeds one upstream chunk; returns the chunks to forward to the client.
    pub fn on_chunk(&mut self, chunk: CanonicalStreamChunk) -> Vec<CanonicalStreamChunk> {
        if self.terminated {
            return vec![];
        }
        match chunk {
            CanonicalStreamChunk::Done => {
                let mut out = self.flush();
                out.push(CanonicalStreamChunk::Done);
                out
            }
            CanonicalStreamChunk::Chunk {
                id,
                model,
                created,
                choices,
                usage,
            } => {
                let mut emitted_choices = Vec::new();
                let mut terminal = false;
                for choice in choices {
                    if let Some(text) = &choice.delta.content {
                        let redacted = self.redactor.redact(text);
                        if self.loop_detector.feed(&redacted) {
                            self.terminated = true;
                            terminal = true;
                            emitted_choices.push(StreamChoice {
                                index: choice.index,
                                delta: Delta::default(),
                                finish_reason: Some(FinishReason::Length),
                            });
                            continue;
                        }
                        let mode = *self.json_mode.get_or_insert_with(|| {
                            redacted.trim_start().starts_with('{') || redacted.trim_start().starts_with('[')
                        });
                        if mode {
                            self.json_buffer.push_str(&redacted);
                            if choice.finish_reason.is_some() {
                                emitted_choices.push(StreamChoice {
                                    index: choice.index,
                                    delta: Delta {
                                        content: Some(self.repaired_content()),
                                        ..Default::default()
                                    },
                                    finish_reason: None,
                                });
                            }
                        } else {
                            self.json_buffer.push_str(&redacted);
                            emitted_choices.push(StreamChoice {
                                index: choice.index,
                                delta: Delta {
                                    content: Some(redacted),
                                    ..choice.delta.clone()
                                },
                                finish_reason: None,
                            });
                        }
                    }
                    if choice.delta.tool_calls.is_some() {
                        emitted_choices.push(StreamChoice {
                            index: choice.index,
                            delta: Delta {
                                tool_calls: choice.delta.tool_calls.clone(),
                                ..Default::default()
                            },
                            finish_reason: None,
                        });
                    }
                    if let Some(reason) = choice.finish_reason {
                        emitted_choices.push(StreamChoice {
                            index: choice.index,
                            delta: Delta::default(),
                            finish_reason: Some(reason),
                        });
                    }
                }
                if terminal {
                    return emitted_choices
                        .into_iter()
                        .map(|c| CanonicalStreamChunk::Chunk {
                            id: id.clone(),
                            model: model.clone(),
                            created,
                            choices: vec![c],
                            usage: usage.clone(),
                        })
                        .collect();
                }
                if emitted_choices.is_empty() {
                    vec![]
                } else {
                    vec![CanonicalStreamChunk::Chunk {
                        id,
                        model,
                        created,
                        choices: emitted_choices,
                        usage,
                    }]
                }
            }
        }
    }

    fn repaired_content(&self) -> String {
        if serde_json::from_str::<serde_json::Value>(&self.json_buffer).is_ok() {
            self.json_buffer.clone()
        } else {
            repair_json(&self.json_buffer)
        }
    }

    fn flush(&mut self) -> Vec<CanonicalStreamChunk> {
        if let Some((remainder, calls)) = self.tool_extractor.extract(&self.json_buffer, || {
            self.next_tool_id += 1;
            format!("call_{}", self.next_tool_id)
        }) {
            let delta = Delta {
                content: if remainder.is_empty() { None } else { Some(remainder) },
                tool_calls: Some(calls),
                ..Default::default()
            };
            vec![CanonicalStreamChunk::Chunk {
                id: "stream".to_string(),
                model: String::new(),
                created: 0,
                choices: vec![StreamChoice {
                    index: 0,
                    delta,
                    finish_reason: None,
                }],
                usage: None,
            }]
        } else {
            vec![]
        }
    }
}
