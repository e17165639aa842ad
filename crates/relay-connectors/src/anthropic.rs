//! Anthropic Messages wire connector (4.E). Also backs the Z.ai connector,
//! which speaks the same Messages shape against a coding-plan endpoint that
//! only accepts one fixed model id.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::StreamExt;
use relay_core::auth::ApiKeyResolver;
use relay_core::backend::{BackendResponse, ChunkStream, Connector, PerCallOverrides};
use relay_core::canonical::{CanonicalChatRequest, CanonicalStreamChunk, Delta, StreamChoice, ToolCall};
use relay_core::translators::anthropic as wire;
use relay_core::ProxyError;

use crate::http_util::classify_error;
use crate::sse::SseLineSplitter;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// How the upstream wants the credential carried.
#[derive(Clone, Copy)]
pub enum AuthStyle {
    XApiKey,
    Bearer,
}

pub struct AnthropicConnector {
    name: String,
    client: reqwest::Client,
    default_base_url: String,
    auth_style: AuthStyle,
    /// When set, every call forwards this model id regardless of what the
    /// caller requested (Z.ai's coding-plan endpoint serves exactly one).
    forced_model: Option<String>,
    extra_headers: Vec<(String, String)>,
}

impl AnthropicConnector {
    pub fn new(
        name: impl Into<String>,
        client: reqwest::Client,
        default_base_url: impl Into<String>,
        auth_style: AuthStyle,
        forced_model: Option<String>,
        extra_headers: Vec<(String, String)>,
    ) -> Self {
        AnthropicConnector {
            name: name.into(),
            client,
            default_base_url: default_base_url.into(),
            auth_style,
            forced_model,
            extra_headers,
        }
    }
}

#[async_trait]
impl Connector for AnthropicConnector {
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
        let model = self.forced_model.as_deref().unwrap_or(effective_model);
        tracing::debug!(backend = %self.name, model, "dispatching chat completion");

        let mut body = wire::request_to_wire(req);
        body["model"] = serde_json::json!(model);
        if let Some(t) = overrides.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        if let Some(t) = overrides.top_p {
            body["top_p"] = serde_json::json!(t);
        }
        if let Some(budget) = overrides.thinking_budget {
            body["thinking"] = serde_json::json!({ "type": "enabled", "budget_tokens": budget });
        }

        let url = format!("{}/v1/messages", base_url.trim_end_matches('/'));
        let mut builder = self
            .client
            .post(&url)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body);
        builder = match self.auth_style {
            AuthStyle::XApiKey => builder.header("x-api-key", key.current()),
            AuthStyle::Bearer => builder.header("authorization", format!("Bearer {}", key.current())),
        };
        for (k, v) in &self.extra_headers {
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
}

/// Anthropic streams one `event:`/`data:` pair per line, with content
/// delivered incrementally through `content_block_delta` events rather than
/// one `delta` object per choice (4.B). The accumulator here tracks the
/// single in-flight tool-use block's id/name the same way the OpenAI
/// connector tracks them per index, since Anthropic never repeats them after
/// `content_block_start`.
fn stream_response(response: reqwest::Response) -> ChunkStream {
    let byte_stream = response.bytes_stream();
    Box::pin(futures::stream::unfold(
        (byte_stream, SseLineSplitter::new(), None::<ToolCall>, String::new(), false),
        |(mut byte_stream, mut splitter, mut pending_tool, mut model, mut done)| async move {
            if done {
                return None;
            }
            loop {
                match byte_stream.next().await {
                    Some(Ok(bytes)) => {
                        let payloads = splitter.feed(&bytes);
                        for payload in payloads {
                            let Ok(event) = serde_json::from_str::<serde_json::Value>(&payload) else {
                                continue;
                            };
                            let event_type = event.get("type").and_then(|v| v.as_str()).unwrap_or("");
                            match event_type {
                                "message_start" => {
                                    if let Some(m) = event.pointer("/message/model").and_then(|v| v.as_str()) {
                                        model = m.to_string();
                                    }
                                    continue;
                                }
                                "content_block_start" => {
                                    if event.pointer("/content_block/type").and_then(|v| v.as_str()) == Some("tool_use") {
                                        pending_tool = Some(ToolCall {
                                            id: event.pointer("/content_block/id").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                                            name: event.pointer("/content_block/name").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                                            arguments_json: String::new(),
                                            index: None,
                                        });
                                    }
                                    continue;
                                }
                                "content_block_delta" => {
                                    let delta = event.get("delta").cloned().unwrap_or_default();
                                    match delta.get("type").and_then(|v| v.as_str()) {
                                        Some("text_delta") => {
                                            let text = delta.get("text").and_then(|v| v.as_str()).unwrap_or("").to_string();
                                            let chunk = text_chunk(&model, text);
                                            return Some((Ok(chunk), (byte_stream, splitter, pending_tool, model, done)));
                                        }
                                        Some("input_json_delta") => {
                                            let partial = delta.get("partial_json").and_then(|v| v.as_str()).unwrap_or("");
                                            if let Some(tool) = pending_tool.as_mut() {
                                                tool.arguments_json.push_str(partial);
                                            }
                                            continue;
                                        }
                                        _ => continue,
                                    }
                                }
                                "content_block_stop" => {
                                    if let Some(tool) = pending_tool.take() {
                                        let chunk = tool_call_chunk(&model, tool);
                                        return Some((Ok(chunk), (byte_stream, splitter, None, model, done)));
                                    }
                                    continue;
                                }
                                "message_delta" => {
                                    let stop_reason = event.pointer("/delta/stop_reason").and_then(|v| v.as_str());
                                    if stop_reason.is_some() {
                                        done = true;
                                        return Some((Ok(CanonicalStreamChunk::Done), (byte_stream, splitter, pending_tool, model, done)));
                                    }
                                    continue;
                                }
                                "message_stop" => {
                                    done = true;
                                    return Some((Ok(CanonicalStreamChunk::Done), (byte_stream, splitter, pending_tool, model, done)));
                                }
                                _ => continue,
                            }
                        }
                        continue;
                    }
                    Some(Err(e)) => return Some((Err(ProxyError::from(e)), (byte_stream, splitter, pending_tool, model, done))),
                    None => return None,
                }
            }
        },
    ))
}

fn text_chunk(model: &str, text: String) -> CanonicalStreamChunk {
    CanonicalStreamChunk::Chunk {
        id: String::new(),
        model: model.to_string(),
        created: 0,
        choices: vec![StreamChoice {
            index: 0,
            delta: Delta { role: None, content: Some(text), tool_calls: None },
            finish_reason: None,
        }],
        usage: None,
    }
}

fn tool_call_chunk(model: &str, tool: ToolCall) -> CanonicalStreamChunk {
    CanonicalStreamChunk::Chunk {
        id: String::new(),
        model: model.to_string(),
        created: 0,
        choices: vec![StreamChoice {
            index: 0,
            delta: Delta { role: None, content: None, tool_calls: Some(vec![tool]) },
            finish_reason: None,
        }],
        usage: None,
    }
}
