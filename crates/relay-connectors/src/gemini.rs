//! Gemini GenerateContent wire connector (4.E), in three variants sharing
//! one payload shape via [`translators::gemini`]: a plain API key, a
//! personal-account OAuth token against the same public endpoint, and the
//! internal Code Assist API, which wraps the payload in a `project`/`request`
//! envelope and lives at a different path entirely.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::StreamExt;
use relay_core::auth::ApiKeyResolver;
use relay_core::backend::tokenizer::Tokenizer;
use relay_core::backend::{BackendResponse, ChunkStream, Connector, PerCallOverrides};
use relay_core::canonical::{CanonicalChatRequest, CanonicalStreamChunk, Usage};
use relay_core::translators::gemini as wire;
use relay_core::ProxyError;

use crate::http_util::classify_error;
use crate::sse::SseLineSplitter;

#[derive(Clone)]
pub enum GeminiMode {
    ApiKey,
    OAuthPersonal,
    CodeAssist { project: String },
}

pub struct GeminiConnector {
    name: String,
    client: reqwest::Client,
    default_base_url: String,
    mode: GeminiMode,
    thinking_budget_env_override: Option<i64>,
    tokenizer: Tokenizer,
}

impl GeminiConnector {
    pub fn new(
        name: impl Into<String>,
        client: reqwest::Client,
        default_base_url: impl Into<String>,
        mode: GeminiMode,
        thinking_budget_env_override: Option<i64>,
    ) -> Self {
        GeminiConnector {
            name: name.into(),
            client,
            default_base_url: default_base_url.into(),
            mode,
            thinking_budget_env_override,
            tokenizer: Tokenizer::new(),
        }
    }
}

#[async_trait]
impl Connector for GeminiConnector {
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
        let env_override = overrides.thinking_budget.or(self.thinking_budget_env_override);
        let inner = wire::request_to_wire(req, env_override);

        let (url, body) = match &self.mode {
            GeminiMode::ApiKey | GeminiMode::OAuthPersonal => {
                let verb = if req.stream { "streamGenerateContent?alt=sse" } else { "generateContent" };
                (
                    format!("{}/v1beta/models/{effective_model}:{verb}", base_url.trim_end_matches('/')),
                    inner,
                )
            }
            GeminiMode::CodeAssist { project } => {
                let verb = if req.stream { "streamGenerateContent?alt=sse" } else { "generateContent" };
                (
                    format!("{}/v1internal:{verb}", base_url.trim_end_matches('/')),
                    serde_json::json!({ "model": effective_model, "project": project, "request": inner }),
                )
            }
        };

        let mut builder = self.client.post(&url).json(&body);
        builder = match self.mode {
            GeminiMode::ApiKey => builder.header("x-goog-api-key", key.current()),
            GeminiMode::OAuthPersonal | GeminiMode::CodeAssist { .. } => {
                builder.header("authorization", format!("Bearer {}", key.current()))
            }
        };

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let text = response.text().await.unwrap_or_default();
            return Err(classify_error(status, &headers, &text));
        }

        if req.stream {
            let prompt_tokens = self.tokenizer.count_request(req) as u32;
            Ok(BackendResponse::Stream(stream_response(
                response,
                matches!(self.mode, GeminiMode::CodeAssist { .. }),
                prompt_tokens,
                self.tokenizer.clone(),
            )))
        } else {
            let parsed: serde_json::Value = response.json().await?;
            let payload = if matches!(self.mode, GeminiMode::CodeAssist { .. }) {
                parsed.get("response").cloned().unwrap_or(parsed)
            } else {
                parsed
            };
            let mut parsed_resp = wire::response_from_wire(&payload)?;
            parsed_resp.model = effective_model.to_string();
            Ok(BackendResponse::Single(parsed_resp))
        }
    }
}

/// Gemini's streaming responses are whole `GenerateContentResponse` objects
/// per SSE event (not deltas), so each event maps to exactly one canonical
/// chunk and there is no cross-event tool-call accumulation to do here.
///
/// Gemini frequently omits `usageMetadata` on streamed events entirely. When
/// the terminal event carries no usage, a synthetic usage-only chunk is
/// emitted immediately before it (prompt tokens counted once up front,
/// completion tokens counted over the text accumulated across the stream),
/// so downstream consumers still see a usage chunk even though upstream gave
/// none.
fn stream_response(
    response: reqwest::Response,
    code_assist_envelope: bool,
    prompt_tokens: u32,
    tokenizer: Tokenizer,
) -> ChunkStream {
    let byte_stream = response.bytes_stream();
    Box::pin(futures::stream::unfold(
        (byte_stream, SseLineSplitter::new(), String::new(), false, None::<CanonicalStreamChunk>),
        move |(mut byte_stream, mut splitter, mut completion_text, mut done, mut pending)| {
            let tokenizer = tokenizer.clone();
            async move {
                if let Some(chunk) = pending.take() {
                    return Some((Ok(chunk), (byte_stream, splitter, completion_text, done, None)));
                }
                if done {
                    return None;
                }
                loop {
                    match byte_stream.next().await {
                        Some(Ok(bytes)) => {
                            let payloads = splitter.feed(&bytes);
                            for payload in payloads {
                                let Ok(raw) = serde_json::from_str::<serde_json::Value>(&payload) else {
                                    continue;
                                };
                                let event = if code_assist_envelope {
                                    raw.get("response").cloned().unwrap_or(raw)
                                } else {
                                    raw
                                };
                                let has_finish = event
                                    .get("candidates")
                                    .and_then(|c| c.as_array())
                                    .map(|arr| arr.iter().all(|c| c.get("finishReason").is_some()))
                                    .unwrap_or(false);
                                let Ok(resp) = wire::response_from_wire(&event) else { continue };
                                let chunk = response_to_stream_chunk(&resp);
                                for choice in chunk.choices() {
                                    if let Some(text) = &choice.delta.content {
                                        completion_text.push_str(text);
                                    }
                                }
                                if has_finish {
                                    done = true;
                                    if resp.usage.is_none() {
                                        let completion = tokenizer.count(&completion_text) as u32;
                                        let synthesized = Usage { prompt: prompt_tokens, completion, total: prompt_tokens + completion };
                                        let usage_chunk = CanonicalStreamChunk::Chunk {
                                            id: resp.id.clone(),
                                            model: resp.model.clone(),
                                            created: resp.created,
                                            choices: Vec::new(),
                                            usage: Some(synthesized),
                                        };
                                        pending = Some(chunk);
                                        return Some((Ok(usage_chunk), (byte_stream, splitter, completion_text, done, pending)));
                                    }
                                }
                                return Some((Ok(chunk), (byte_stream, splitter, completion_text, done, None)));
                            }
                            continue;
                        }
                        Some(Err(e)) => {
                            return Some((Err(ProxyError::from(e)), (byte_stream, splitter, completion_text, done, None)))
                        }
                        None => return None,
                    }
                }
            }
        },
    ))
}

fn response_to_stream_chunk(resp: &relay_core::canonical::CanonicalChatResponse) -> CanonicalStreamChunk {
    use relay_core::canonical::{Delta, StreamChoice};
    CanonicalStreamChunk::Chunk {
        id: resp.id.clone(),
        model: resp.model.clone(),
        created: resp.created,
        choices: resp
            .choices
            .iter()
            .map(|c| StreamChoice {
                index: c.index,
                delta: Delta {
                    role: None,
                    content: c.message.content.clone(),
                    tool_calls: c.message.tool_calls.clone(),
                },
                finish_reason: c.finish_reason,
            })
            .collect(),
        usage: resp.usage.clone(),
    }
}
