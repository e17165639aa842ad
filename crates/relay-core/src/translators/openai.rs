//! OpenAI Chat Completions <-> canonical. Near-identity: multimodal content
//! parts map 1:1 (4.B).

use serde_json::{json, Map, Value};

use crate::canonical::{
    CanonicalChatRequest, CanonicalChatResponse, CanonicalStreamChunk, Choice, Content, Delta,
    FinishReason, Message, Part, ReasoningControls, ReasoningEffort, ResponseMessage, Role,
    SamplingParams, StreamChoice, Tool, ToolCall, ToolChoice, Usage,
};
use crate::error::ProxyError;

use super::{arguments_to_json_string, validate_uri_scheme};

pub fn request_from_wire(body: &Value) -> Result<CanonicalChatRequest, ProxyError> {
    let model = body
        .get("model")
        .and_then(Value::as_str)
        .ok_or_else(|| ProxyError::invalid("missing_model", "model is required"))?
        .to_string();

    let messages = body
        .get("messages")
        .and_then(Value::as_array)
        .ok_or_else(|| ProxyError::invalid("missing_messages", "messages is required"))?
        .iter()
        .map(message_from_wire)
        .collect::<Result<Vec<_>, _>>()?;

    let tools = body.get("tools").and_then(Value::as_array).map(|arr| {
        arr.iter()
            .filter_map(|t| {
                let f = t.get("function")?;
                Some(Tool {
                    name: f.get("name")?.as_str()?.to_string(),
                    description: f
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                    parameters: f.get("parameters").cloned().unwrap_or(json!({})),
                })
            })
            .collect()
    });

    let tool_choice = body
        .get("tool_choice")
        .map(|v| serde_json::from_value::<ToolChoice>(v.clone()))
        .transpose()
        .map_err(ProxyError::from)?;

    let reasoning_effort = body
        .get("reasoning_effort")
        .and_then(Value::as_str)
        .and_then(parse_effort);

    Ok(CanonicalChatRequest {
        model,
        messages,
        sampling: SamplingParams {
            temperature: body.get("temperature").and_then(Value::as_f64),
            top_p: body.get("top_p").and_then(Value::as_f64),
            top_k: None,
            max_tokens: body
                .get("max_tokens")
                .or_else(|| body.get("max_completion_tokens"))
                .and_then(Value::as_u64)
                .map(|v| v as u32),
            stop: stop_from_wire(body.get("stop")),
            presence_penalty: body.get("presence_penalty").and_then(Value::as_f64),
            frequency_penalty: body.get("frequency_penalty").and_then(Value::as_f64),
            seed: body.get("seed").and_then(Value::as_i64),
            user: body.get("user").and_then(Value::as_str).map(String::from),
            logit_bias: None,
        },
        stream: body.get("stream").and_then(Value::as_bool).unwrap_or(false),
        tools,
        tool_choice,
        reasoning: ReasoningControls {
            effort: reasoning_effort,
            thinking_budget: None,
            raw_reasoning: body.get("reasoning").cloned(),
            generation_config: None,
        },
        extra_body: body
            .as_object()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|(k, _)| !KNOWN_FIELDS.contains(&k.as_str()))
            .collect(),
        session_id: None,
    })
}

const KNOWN_FIELDS: &[&str] = &[
    "model", "messages", "temperature", "top_p", "max_tokens", "max_completion_tokens", "stop",
    "presence_penalty", "frequency_penalty", "seed", "user", "stream", "tools", "tool_choice",
    "reasoning_effort", "reasoning",
];

fn parse_effort(s: &str) -> Option<ReasoningEffort> {
    match s {
        "low" => Some(ReasoningEffort::Low),
        "medium" => Some(ReasoningEffort::Medium),
        "high" => Some(ReasoningEffort::High),
        _ => None,
    }
}

fn stop_from_wire(value: Option<&Value>) -> Option<Vec<String>> {
    match value? {
        Value::String(s) => Some(vec![s.clone()]),
        Value::Array(arr) => Some(arr.iter().filter_map(|v| v.as_str().map(String::from)).collect()),
        _ => None,
    }
}

fn message_from_wire(m: &Value) -> Result<Message, ProxyError> {
    let role = match m.get("role").and_then(Value::as_str) {
        Some("system") => Role::System,
        Some("user") => Role::User,
        Some("assistant") => Role::Assistant,
        Some("tool") => Role::Tool,
        other => {
            return Err(ProxyError::invalid(
                "invalid_role",
                format!("unknown role: {other:?}"),
            ))
        }
    };

    let content = match m.get("content") {
        Some(Value::String(s)) => Some(Content::Text(s.clone())),
        Some(Value::Array(parts)) => Some(Content::Parts(
            parts.iter().filter_map(part_from_wire).collect(),
        )),
        _ => None,
    };

    let tool_calls = m.get("tool_calls").and_then(Value::as_array).map(|arr| {
        arr.iter()
            .filter_map(|tc| {
                let function = tc.get("function")?;
                Some(ToolCall {
                    id: tc.get("id")?.as_str()?.to_string(),
                    name: function.get("name")?.as_str()?.to_string(),
                    arguments_json: arguments_to_json_string(function.get("arguments")?),
                    index: None,
                })
            })
            .collect()
    });

    Ok(Message {
        role,
        content,
        name: m.get("name").and_then(Value::as_str).map(String::from),
        tool_call_id: m.get("tool_call_id").and_then(Value::as_str).map(String::from),
        tool_calls,
    })
}

fn part_from_wire(p: &Value) -> Option<Part> {
    match p.get("type").and_then(Value::as_str)? {
        "text" => Some(Part::Text {
            text: p.get("text")?.as_str()?.to_string(),
        }),
        "image_url" => {
            let url = p.get("image_url")?.get("url")?.as_str()?;
            let valid = validate_uri_scheme(url)?;
            Some(Part::ImageUrl {
                url: valid.to_string(),
                detail: p
                    .get("image_url")
                    .and_then(|v| v.get("detail"))
                    .and_then(Value::as_str)
                    .map(String::from),
            })
        }
        _ => None,
    }
}

/// Renders a canonical request into the OpenAI Chat Completions wire shape.
/// Reused by the OpenAI/OpenRouter/ZAI connectors, which all speak this wire
/// format (4.E).
pub fn request_to_wire(req: &CanonicalChatRequest) -> Value {
    let mut body = Map::new();
    body.insert("model".to_string(), json!(req.model));
    body.insert(
        "messages".to_string(),
        Value::Array(req.messages.iter().map(message_to_wire).collect()),
    );
    if let Some(t) = req.sampling.temperature {
        body.insert("temperature".to_string(), json!(t));
    }
    if let Some(t) = req.sampling.top_p {
        body.insert("top_p".to_string(), json!(t));
    }
    if let Some(t) = req.sampling.max_tokens {
        body.insert("max_tokens".to_string(), json!(t));
    }
    if let Some(stop) = &req.sampling.stop {
        body.insert("stop".to_string(), json!(stop));
    }
    if let Some(p) = req.sampling.presence_penalty {
        body.insert("presence_penalty".to_string(), json!(p));
    }
    if let Some(p) = req.sampling.frequency_penalty {
        body.insert("frequency_penalty".to_string(), json!(p));
    }
    if let Some(seed) = req.sampling.seed {
        body.insert("seed".to_string(), json!(seed));
    }
    if let Some(user) = &req.sampling.user {
        body.insert("user".to_string(), json!(user));
    }
    body.insert("stream".to_string(), json!(req.stream));
    if let Some(tools) = &req.tools {
        body.insert(
            "tools".to_string(),
            json!(tools
                .iter()
                .map(|t| json!({
                    "type": "function",
                    "function": { "name": t.name, "description": t.description, "parameters": t.parameters },
                }))
                .collect::<Vec<_>>()),
        );
    }
    if let Some(choice) = &req.tool_choice {
        body.insert("tool_choice".to_string(), serde_json::to_value(choice).unwrap());
    }
    for (k, v) in &req.extra_body {
        body.entry(k.clone()).or_insert_with(|| v.clone());
    }
    Value::Object(body)
}

fn message_to_wire(m: &Message) -> Value {
    let mut obj = Map::new();
    obj.insert("role".to_string(), json!(role_str(m.role)));
    if let Some(content) = &m.content {
        obj.insert("content".to_string(), content_to_wire(content));
    }
    if let Some(name) = &m.name {
        obj.insert("name".to_string(), json!(name));
    }
    if let Some(id) = &m.tool_call_id {
        obj.insert("tool_call_id".to_string(), json!(id));
    }
    if let Some(calls) = &m.tool_calls {
        obj.insert(
            "tool_calls".to_string(),
            json!(calls
                .iter()
                .map(|c| json!({
                    "id": c.id,
                    "type": "function",
                    "function": { "name": c.name, "arguments": c.arguments_json },
                }))
                .collect::<Vec<_>>()),
        );
    }
    Value::Object(obj)
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn content_to_wire(content: &Content) -> Value {
    match content {
        Content::Text(t) => json!(t),
        Content::Parts(parts) => json!(parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(json!({"type": "text", "text": text})),
                Part::ImageUrl { url, detail } => Some(json!({
                    "type": "image_url",
                    "image_url": { "url": url, "detail": detail },
                })),
                _ => None,
            })
            .collect::<Vec<_>>()),
    }
}

/// Parses an OpenAI-shaped chat completion response (used both to answer an
/// OpenAI frontend caller directly and to decode an OpenAI-wire backend's
/// response into canonical form).
pub fn response_from_wire(body: &Value) -> Result<CanonicalChatResponse, ProxyError> {
    let choices = body
        .get("choices")
        .and_then(Value::as_array)
        .ok_or_else(|| ProxyError::invalid("bad_upstream_response", "missing choices"))?
        .iter()
        .enumerate()
        .map(|(i, c)| choice_from_wire(i as u32, c))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CanonicalChatResponse {
        id: body.get("id").and_then(Value::as_str).unwrap_or("").to_string(),
        model: body.get("model").and_then(Value::as_str).unwrap_or("").to_string(),
        created: body.get("created").and_then(Value::as_i64).unwrap_or(0),
        object: body
            .get("object")
            .and_then(Value::as_str)
            .unwrap_or("chat.completion")
            .to_string(),
        choices,
        usage: body.get("usage").map(usage_from_wire),
        system_fingerprint: body
            .get("system_fingerprint")
            .and_then(Value::as_str)
            .map(String::from),
    })
}

fn choice_from_wire(index: u32, c: &Value) -> Result<Choice, ProxyError> {
    let message = c
        .get("message")
        .ok_or_else(|| ProxyError::invalid("bad_upstream_response", "choice missing message"))?;
    let tool_calls = message.get("tool_calls").and_then(Value::as_array).map(|arr| {
        arr.iter()
            .filter_map(|tc| {
                let function = tc.get("function")?;
                Some(ToolCall {
                    id: tc.get("id")?.as_str()?.to_string(),
                    name: function.get("name")?.as_str()?.to_string(),
                    arguments_json: arguments_to_json_string(function.get("arguments")?),
                    index: None,
                })
            })
            .collect()
    });
    Ok(Choice {
        index,
        message: ResponseMessage {
            role: Role::Assistant,
            content: message.get("content").and_then(Value::as_str).map(String::from),
            tool_calls,
        },
        finish_reason: c
            .get("finish_reason")
            .and_then(Value::as_str)
            .and_then(finish_reason_from_wire),
    })
}

fn finish_reason_from_wire(s: &str) -> Option<FinishReason> {
    match s {
        "stop" => Some(FinishReason::Stop),
        "length" => Some(FinishReason::Length),
        "content_filter" => Some(FinishReason::ContentFilter),
        "tool_calls" => Some(FinishReason::ToolCalls),
        _ => None,
    }
}

fn finish_reason_to_wire(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::Stop => "stop",
        FinishReason::Length => "length",
        FinishReason::ContentFilter => "content_filter",
        FinishReason::ToolCalls => "tool_calls",
        FinishReason::Error => "stop",
    }
}

fn usage_from_wire(u: &Value) -> Usage {
    Usage {
        prompt: u.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
        completion: u.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
        total: u.get("total_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
    }
}

/// Renders a canonical response back into the OpenAI wire shape, for an
/// OpenAI-protocol frontend caller.
pub fn response_to_wire(resp: &CanonicalChatResponse) -> Value {
    json!({
        "id": resp.id,
        "object": resp.object,
        "created": resp.created,
        "model": resp.model,
        "choices": resp.choices.iter().map(|c| json!({
            "index": c.index,
            "message": {
                "role": "assistant",
                "content": c.message.content,
                "tool_calls": c.message.tool_calls.as_ref().map(|calls| json!(calls
                    .iter()
                    .map(|tc| json!({
                        "id": tc.id,
                        "type": "function",
                        "function": { "name": tc.name, "arguments": tc.arguments_json },
                    }))
                    .collect::<Vec<_>>())),
            },
            "finish_reason": c.finish_reason.map(finish_reason_to_wire),
        })).collect::<Vec<_>>(),
        "usage": resp.usage.as_ref().map(|u| json!({
            "prompt_tokens": u.prompt,
            "completion_tokens": u.completion,
            "total_tokens": u.total,
        })),
        "system_fingerprint": resp.system_fingerprint,
    })
}

/// Translates one upstream OpenAI SSE chunk (`choices[0].delta`) into zero or
/// one canonical stream chunks. Stateless per 4.B: tool-call-delta
/// accumulation across chunks is the caller's responsibility.
pub fn stream_chunk_from_wire(body: &Value) -> Option<CanonicalStreamChunk> {
    let choices = body.get("choices")?.as_array()?;
    let mapped: Vec<StreamChoice> = choices
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let delta = c.get("delta").cloned().unwrap_or(json!({}));
            let tool_calls = delta.get("tool_calls").and_then(Value::as_array).map(|arr| {
                arr.iter()
                    .filter_map(|tc| {
                        let function = tc.get("function")?;
                        Some(ToolCall {
                            id: tc.get("id").and_then(Value::as_str).unwrap_or("").to_string(),
                            name: function.get("name").and_then(Value::as_str).unwrap_or("").to_string(),
                            arguments_json: function
                                .get("arguments")
                                .map(arguments_to_json_string)
                                .unwrap_or_default(),
                            index: tc.get("index").and_then(Value::as_u64).map(|n| n as u32),
                        })
                    })
                    .collect()
            });
            StreamChoice {
                index: i as u32,
                delta: Delta {
                    role: None,
                    content: delta.get("content").and_then(Value::as_str).map(String::from),
                    tool_calls,
                },
                finish_reason: c
                    .get("finish_reason")
                    .and_then(Value::as_str)
                    .and_then(finish_reason_from_wire),
            }
        })
        .collect();

    Some(CanonicalStreamChunk::Chunk {
        id: body.get("id").and_then(Value::as_str).unwrap_or("").to_string(),
        model: body.get("model").and_then(Value::as_str).unwrap_or("").to_string(),
        created: body.get("created").and_then(Value::as_i64).unwrap_or(0),
        choices: mapped,
        usage: body.get("usage").map(usage_from_wire),
    })
}

/// Renders one canonical stream chunk into an OpenAI-protocol SSE payload.
pub fn stream_chunk_to_wire(chunk: &CanonicalStreamChunk) -> Value {
    match chunk {
        CanonicalStreamChunk::Chunk {
            id,
            model,
            created,
            choices,
            usage,
        } => json!({
            "id": id,
            "object": "chat.completion.chunk",
            "created": created,
            "model": model,
            "choices": choices.iter().map(|c| json!({
                "index": c.index,
                "delta": {
                    "content": c.delta.content,
                    "tool_calls": c.delta.tool_calls.as_ref().map(|calls| json!(calls
                        .iter()
                        .map(|tc| json!({
                            "id": tc.id,
                            "type": "function",
                            "function": { "name": tc.name, "arguments": tc.arguments_json },
                        }))
                        .collect::<Vec<_>>())),
                },
                "finish_reason": c.finish_reason.map(finish_reason_to_wire),
            })).collect::<Vec<_>>(),
            "usage": usage.as_ref().map(|u| json!({
                "prompt_tokens": u.prompt,
                "completion_tokens": u.completion,
                "total_tokens": u.total,
            })),
        }),
        CanonicalStreamChunk::Done => json!("[DONE]"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_simple_request() {
        let body = json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "Hi"}],
        });
        let req = request_from_wire(&body).unwrap();
        assert_eq!(req.model, "gpt-4");
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.messages[0].content.as_ref().unwrap().text_concat(), "Hi");
    }

    #[test]
    fn parses_non_streaming_response() {
        let body = json!({
            "id": "chatcmpl-1",
            "model": "gpt-4",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Hello!"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7},
        });
        let resp = response_from_wire(&body).unwrap();
        assert_eq!(resp.first_text(), Some("Hello!"));
        assert_eq!(resp.usage.unwrap().total, 7);
    }
}
