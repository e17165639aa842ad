//! OpenAI Chat Completions wire connector (4.E), reused as-is by OpenRouter
//! and (via [`send_chat_completions`]) by the Qwen OAuth connector, which all
//! speak this wire format with only auth and headers differing.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::StreamExt;
use relay_core::auth::ApiKeyResolver;
use relay_core::backend::{BackendResponse, ChunkStream, Connector, PerCallOverrides};
use relay_core::canonical::{CanonicalChatRequest, CanonicalStreamChunk};
use relay_core::translators::openai as wire;
use relay_core::ProxyError;

use crate::http_util::classify_error;
use crate::sse::SseLineSplitter;

pub struct OpenAiConnector {
    name: String,
    client: reqwest::Client,
    default_base_url: String,
    extra_headers: Vec<(String, String)>,
}

impl OpenAiConnector {
    pub fn new(
        name: impl Into<String>,
        client: reqwest::Client,
        default_base_url: impl Into<String>,
        extra_headers: Vec<(String, String)>,
    ) -> Self {
        OpenAiConnector {
            name: name.into(),
            client,
            default_base_url: default_base_url.into(),
            extra_headers,
        }
    }
}

#[async_trait]
impl Connector for OpenAiConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat_completions(
        &self,
        req: &CanonicalChatRequest,
        effective_model: &str,
        key: Arc<dyn ApiKeyResolver>,
        overrides: &PerCallOverrides,
    ) -> Result<BackendResponse, ProxyError> {
        key.resolve().await?;
        let base_url = overrides.base_url.clone().unwrap_or_else(|| self.default_base_url.clone());
        tracing::debug!(backend = %self.name, model = effective_model, "dispatching chat completion");
        send_chat_completions(
            &self.client,
            &base_url,
            ("authorization", format!("Bearer {}", key.current())),
            &self.extra_headers,
            req,
            effective_model,
            overrides,
        )
        .await
    }
}

/// Builds and sends one OpenAI-wire chat completion, shared by every
/// OpenAI-compatible connector. `auth_header` is `(header name, value)` since
/// Qwen's DashScope-compatible endpoint and OpenAI/OpenRouter all use plain
/// bearer auth but with a token sourced differently.
pub(crate) async fn send_chat_completions(
    client: &reqwest::Client,
    base_url: &str,
    auth_header: (&'static str, String),
    extra_headers: &[(String, String)],
    req: &CanonicalChatRequest,
    effective_model: &str,
    overrides: &PerCallOverrides,
) -> Result<BackendResponse, ProxyError> {
    let mut body = wire::request_to_wire(req);
    body["model"] = serde_json::json!(effective_model);
    apply_overrides(&mut body, overrides);

    let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
    let mut builder = client.post(&url).header(auth_header.0, auth_header.1).json(&body);
    for (k, v) in extra_headers {
        builder = builder.header(k.as_str(), v.as_str());
    }

    let response = builder.send().await?;
    let status = response.status();
    if !status.is_success() {
        let headers = response.headers().clone();
        let text = response.text().await.unwrap_or_default();
        return Err(classify_error(status, &headers, &text));
    }

    if req.stream {
        Ok(BackendResponse::Stream(stream_response(response)))
    } else {
        let parsed: serde_json::Value = response.json().await?;
        Ok(BackendResponse::Single(wire::response_from_wire(&parsed)?))
    }
}

fn apply_overrides(body: &mut serde_json::Value, overrides: &PerCallOverrides) {
    if let Some(effort) = overrides.reasoning_effort {
        body["reasoning_effort"] = serde_json::json!(effort.to_string());
    }
    if let Some(t) = overrides.temperature {
        body["temperature"] = serde_json::json!(t);
    }
    if let Some(t) = overrides.top_p {
        body["top_p"] = serde_json::json!(t);
    }
    if let (Some(prefix), Some(messages)) = (&overrides.prompt_prefix, body.get_mut("messages")) {
        prepend_to_last_user(messages, prefix, true);
    }
    if let (Some(suffix), Some(messages)) = (&overrides.prompt_suffix, body.get_mut("messages")) {
        prepend_to_last_user(messages, suffix, false);
    }
}

/// Wraps the last user message's text content with a reasoning-mode prompt
/// prefix/suffix (4.F `build_overrides`), leaving every other message alone.
fn prepend_to_last_user(messages: &mut serde_json::Value, text: &str, is_prefix: bool) {
    let Some(arr) = messages.as_array_mut() else { return };
    if let Some(last_user) = arr.iter_mut().rev().find(|m| m.get("role").and_then(|r| r.as_str()) == Some("user")) {
        if let Some(content) = last_user.get("content").and_then(|c| c.as_str()) {
            let merged = if is_prefix {
                format!("{text}\n{content}")
            } else {
                format!("{content}\n{text}")
            };
            last_user["content"] = serde_json::json!(merged);
        }
    }
}

/// Per-choice-index tool-call accumulator: OpenAI only repeats a call's
/// `id`/`name` on the first delta that introduces it, so the stream loop
/// (not the stateless translator) has to remember them for every later
/// fragment belonging to the same index.
#[derive(Default, Clone)]
struct ToolAccum {
    id: String,
    name: String,
}

fn stream_response(response: reqwest::Response) -> ChunkStream {
    let byte_stream = response.bytes_stream();
    Box::pin(futures::stream::unfold(
        (byte_stream, SseLineSplitter::new(), HashMap::<usize, ToolAccum>::new(), false),
        |(mut byte_stream, mut splitter, mut accum, mut done)| async move {
            if done {
                return None;
            }
            loop {
                match byte_stream.next().await {
                    Some(Ok(bytes)) => {
                        let payloads = splitter.feed(&bytes);
                        for payload in payloads {
                            if payload == "[DONE]" {
                                done = true;
                                return Some((Ok(CanonicalStreamChunk::Done), (byte_stream, splitter, accum, done)));
                            }
                            let Ok(json) = serde_json::from_str::<serde_json::Value>(&payload) else {
                                continue;
                            };
                            let Some(mut chunk) = wire::stream_chunk_from_wire(&json) else {
                                continue;
                            };
                            normalize_tool_calls(&mut chunk, &mut accum);
                            return Some((Ok(chunk), (byte_stream, splitter, accum, done)));
                        }
                        continue;
                    }
                    Some(Err(e)) => return Some((Err(ProxyError::from(e)), (byte_stream, splitter, accum, done))),
                    None => return None,
                }
            }
        },
    ))
}

fn normalize_tool_calls(chunk: &mut CanonicalStreamChunk, accum: &mut HashMap<usize, ToolAccum>) {
    let CanonicalStreamChunk::Chunk { choices, .. } = chunk else { return };
    for choice in choices {
        let Some(tool_calls) = choice.delta.tool_calls.as_mut() else { continue };
        for (array_pos, tc) in tool_calls.iter_mut().enumerate() {
            // Key by the wire's own `tool_calls[].index`, not this delta's
            // array position: OpenAI sends one-element arrays per SSE event,
            // so array position collapses every parallel call onto slot 0.
            let wire_index = tc.index.map(|n| n as usize).unwrap_or(array_pos);
            let key = choice.index as usize * 64 + wire_index;
            let entry = accum.entry(key).or_default();
            if !tc.id.is_empty() {
                entry.id = tc.id.clone();
            }
            if !tc.name.is_empty() {
                entry.name = tc.name.clone();
            }
            tc.id = entry.id.clone();
            tc.name = entry.name.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::canonical::{CanonicalStreamChunk, Delta, StreamChoice, ToolCall};

    #[test]
    fn normalizes_id_and_name_across_fragments() {
        let mut accum = HashMap::new();
        let mut first = CanonicalStreamChunk::Chunk {
            id: "1".into(),
            model: "m".into(),
            created: 0,
            choices: vec![StreamChoice {
                index: 0,
                delta: Delta {
                    role: None,
                    content: None,
                    tool_calls: Some(vec![ToolCall { id: "call_1".into(), name: "lookup".into(), arguments_json: "{\"a\":".into(), index: Some(0) }]),
                },
                finish_reason: None,
            }],
            usage: None,
        };
        normalize_tool_calls(&mut first, &mut accum);

        let mut second = CanonicalStreamChunk::Chunk {
            id: "1".into(),
            model: "m".into(),
            created: 0,
            choices: vec![StreamChoice {
                index: 0,
                delta: Delta {
                    role: None,
                    content: None,
                    tool_calls: Some(vec![ToolCall { id: "".into(), name: "".into(), arguments_json: "1}".into(), index: Some(0) }]),
                },
                finish_reason: None,
            }],
            usage: None,
        };
        normalize_tool_calls(&mut second, &mut accum);

        let CanonicalStreamChunk::Chunk { choices, .. } = second else { unreachable!() };
        let tc = &choices[0].delta.tool_calls.as_ref().unwrap()[0];
        assert_eq!(tc.id, "call_1");
        assert_eq!(tc.name, "lookup");
        assert_eq!(tc.arguments_json, "1}");
    }

    /// A single choice emitting two parallel tool calls, one fragment per
    /// SSE event (OpenAI's real wire shape), must not collide into the same
    /// accumulator slot even though both arrive as a one-element array.
    #[test]
    fn parallel_tool_calls_on_one_choice_do_not_collide() {
        let mut accum = HashMap::new();
        let mut first_call_start = CanonicalStreamChunk::Chunk {
            id: "1".into(),
            model: "m".into(),
            created: 0,
            choices: vec![StreamChoice {
                index: 0,
                delta: Delta {
                    role: None,
                    content: None,
                    tool_calls: Some(vec![ToolCall { id: "call_a".into(), name: "lookup".into(), arguments_json: "{".into(), index: Some(0) }]),
                },
                finish_reason: None,
            }],
            usage: None,
        };
        normalize_tool_calls(&mut first_call_start, &mut accum);

        let mut second_call_start = CanonicalStreamChunk::Chunk {
            id: "1".into(),
            model: "m".into(),
            created: 0,
            choices: vec![StreamChoice {
                index: 0,
                delta: Delta {
                    role: None,
                    content: None,
                    tool_calls: Some(vec![ToolCall { id: "call_b".into(), name: "convert".into(), arguments_json: "{".into(), index: Some(1) }]),
                },
                finish_reason: None,
            }],
            usage: None,
        };
        normalize_tool_calls(&mut second_call_start, &mut accum);

        let mut first_call_continuation = CanonicalStreamChunk::Chunk {
            id: "1".into(),
            model: "m".into(),
            created: 0,
            choices: vec![StreamChoice {
                index: 0,
                delta: Delta {
                    role: None,
                    content: None,
                    tool_calls: Some(vec![ToolCall { id: "".into(), name: "".into(), arguments_json: "\"a\":1}".into(), index: Some(0) }]),
                },
                finish_reason: None,
            }],
            usage: None,
        };
        normalize_tool_calls(&mut first_call_continuation, &mut accum);

        let CanonicalStreamChunk::Chunk { choices, .. } = first_call_continuation else { unreachable!() };
        let tc = &choices[0].delta.tool_calls.as_ref().unwrap()[0];
        assert_eq!(tc.id, "call_a");
        assert_eq!(tc.name, "lookup");
    }
}
