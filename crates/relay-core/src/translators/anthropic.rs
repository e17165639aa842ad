//! Anthropic Messages <-> canonical (4.B).

use serde_json::{json, Map, Value};

use crate::canonical::{
    CanonicalChatRequest, CanonicalChatResponse, Choice, Content, FinishReason, Message, Part,
    ReasoningControls, ResponseMessage, Role, SamplingParams, Tool, ToolCall, Usage,
};
use crate::error::ProxyError;

use super::{arguments_to_json_string, validate_uri_scheme};

/// Default `max_tokens` when the caller omits it (4.E: Anthropic requires it).
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

pub fn request_from_wire(body: &Value) -> Result<CanonicalChatRequest, ProxyError> {
    let model = body
        .get("model")
        .and_then(Value::as_str)
        .ok_or_else(|| ProxyError::invalid("missing_model", "model is required"))?
        .to_string();

    let mut messages = Vec::new();
    if let Some(system) = body.get("system") {
        if let Some(text) = system.as_str() {
            messages.push(Message::system(text));
        } else if let Some(blocks) = system.as_array() {
            let text: String = blocks
                .iter()
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n");
            if !text.is_empty() {
                messages.push(Message::system(text));
            }
        }
    }

    for m in body
        .get("messages")
        .and_then(Value::as_array)
        .ok_or_else(|| ProxyError::invalid("missing_messages", "messages is required"))?
    {
        messages.push(message_from_wire(m)?);
    }

    let tools = body.get("tools").and_then(Value::as_array).map(|arr| {
        arr.iter()
            .filter_map(|t| {
                Some(Tool {
                    name: t.get("name")?.as_str()?.to_string(),
                    description: t.get("description").and_then(Value::as_str).unwrap_or("").to_string(),
                    parameters: t.get("input_schema").cloned().unwrap_or(json!({})),
                })
            })
            .collect()
    });

    Ok(CanonicalChatRequest {
        model,
        messages,
        sampling: SamplingParams {
            temperature: body.get("temperature").and_then(Value::as_f64),
            top_p: body.get("top_p").and_then(Value::as_f64),
            top_k: body.get("top_k").and_then(Value::as_i64),
            max_tokens: body.get("max_tokens").and_then(Value::as_u64).map(|v| v as u32),
            stop: body.get("stop_sequences").and_then(Value::as_array).map(|arr| {
                arr.iter().filter_map(|v| v.as_str().map(String::from)).collect()
            }),
            presence_penalty: None,
            frequency_penalty: None,
            seed: None,
            user: None,
            logit_bias: None,
        },
        stream: body.get("stream").and_then(Value::as_bool).unwrap_or(false),
        tools,
        tool_choice: None,
        reasoning: ReasoningControls {
            effort: None,
            thinking_budget: body
                .get("thinking")
                .and_then(|t| t.get("budget_tokens"))
                .and_then(Value::as_i64),
            raw_reasoning: body.get("thinking").cloned(),
            generation_config: None,
        },
        extra_body: body
            .get("metadata")
            .map(|m| {
                let mut map = std::collections::HashMap::new();
                map.insert("metadata".to_string(), m.clone());
                map
            })
            .unwrap_or_default(),
        session_id: None,
    })
}

fn message_from_wire(m: &Value) -> Result<Message, ProxyError> {
    let role = match m.get("role").and_then(Value::as_str) {
        Some("user") => Role::User,
        Some("assistant") => Role::Assistant,
        other => {
            return Err(ProxyError::invalid("invalid_role", format!("unknown role: {other:?}")))
        }
    };

    match m.get("content") {
        Some(Value::String(s)) => Ok(Message {
            role,
            content: Some(Content::Text(s.clone())),
            name: None,
            tool_call_id: None,
            tool_calls: None,
        }),
        Some(Value::Array(blocks)) => {
            let mut parts = Vec::new();
            let mut tool_calls = Vec::new();
            for block in blocks {
                match block.get("type").and_then(Value::as_str) {
                    Some("text") => {
                        if let Some(text) = block.get("text").and_then(Value::as_str) {
                            parts.push(Part::Text { text: text.to_string() });
                        }
                    }
                    Some("image") => {
                        let source = block.get("source");
                        match source.and_then(|s| s.get("type")).and_then(Value::as_str) {
                            Some("base64") => {
                                if let (Some(media_type), Some(data)) = (
                                    source.and_then(|s| s.get("media_type")).and_then(Value::as_str),
                                    source.and_then(|s| s.get("data")).and_then(Value::as_str),
                                ) {
                                    parts.push(Part::InlineData {
                                        mime_type: media_type.to_string(),
                                        base64: data.to_string(),
                                    });
                                }
                            }
                            Some("url") => {
                                if let Some(url) = source.and_then(|s| s.get("url")).and_then(Value::as_str) {
                                    if let Some(valid) = validate_uri_scheme(url) {
                                        parts.push(Part::ImageUrl {
                                            url: valid.to_string(),
                                            detail: None,
                                        });
                                    }
                                }
                            }
                            _ => {}
                        }
                    }
                    Some("tool_use") => {
                        if let (Some(id), Some(name)) = (
                            block.get("id").and_then(Value::as_str),
                            block.get("name").and_then(Value::as_str),
                        ) {
                            tool_calls.push(ToolCall {
                                id: id.to_string(),
                                name: name.to_string(),
                                arguments_json: block
                                    .get("input")
                                    .map(arguments_to_json_string)
                                    .unwrap_or_else(|| "{}".to_string()),
                                index: None,
                            });
                        }
                    }
                    Some("tool_result") => {
                        let tool_call_id = block
                            .get("tool_use_id")
                            .and_then(Value::as_str)
                            .unwrap_or("")
                            .to_string();
                        let payload = block.get("content").cloned().unwrap_or(Value::Null);
                        parts.push(Part::FunctionResponse {
                            name: String::new(),
                            tool_call_id,
                            payload,
                        });
                    }
                    _ => {}
                }
            }
            Ok(Message {
                role,
                content: if parts.is_empty() { None } else { Some(Content::Parts(parts)) },
                name: None,
                tool_call_id: None,
                tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
            })
        }
        _ => Err(ProxyError::invalid("invalid_content", "message has no content")),
    }
}

/// Renders a canonical request into the Anthropic Messages wire shape, for
/// the Anthropic backend connector.
pub fn request_to_wire(req: &CanonicalChatRequest) -> Value {
    let mut body = Map::new();
    body.insert("model".to_string(), json!(req.model));
    body.insert(
        "max_tokens".to_string(),
        json!(req.sampling.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
    );

    let mut system_text = String::new();
    let mut messages = Vec::new();
    for m in &req.messages {
        if m.role == Role::System {
            if let Some(content) = &m.content {
                if !system_text.is_empty() {
                    system_text.push('\n');
                }
                system_text.push_str(&content.text_concat());
            }
            continue;
        }
        messages.push(message_to_wire(m));
    }
    if !system_text.is_empty() {
        body.insert("system".to_string(), json!(system_text));
    }
    body.insert("messages".to_string(), Value::Array(messages));

    if let Some(t) = req.sampling.temperature {
        body.insert("temperature".to_string(), json!(t));
    }
    if let Some(t) = req.sampling.top_p {
        body.insert("top_p".to_string(), json!(t));
    }
    if let Some(t) = req.sampling.top_k {
        body.insert("top_k".to_string(), json!(t));
    }
    if let Some(stop) = &req.sampling.stop {
        body.insert("stop_sequences".to_string(), json!(stop));
    }
    body.insert("stream".to_string(), json!(req.stream));
    if let Some(tools) = &req.tools {
        body.insert(
            "tools".to_string(),
            json!(tools
                .iter()
                .map(|t| json!({ "name": t.name, "description": t.description, "input_schema": t.parameters }))
                .collect::<Vec<_>>()),
        );
    }

    // Caller-supplied extra_body.metadata wins per key over {project, user}.
    let mut metadata = Map::new();
    if let Some(user) = &req.sampling.user {
        metadata.insert("user_id".to_string(), json!(user));
    }
    if let Some(Value::Object(extra_meta)) = req.extra_body.get("metadata") {
        for (k, v) in extra_meta {
            metadata.insert(k.clone(), v.clone());
        }
    }
    if !metadata.is_empty() {
        body.insert("metadata".to_string(), Value::Object(metadata));
    }

    Value::Object(body)
}

fn message_to_wire(m: &Message) -> Value {
    let role = match m.role {
        Role::Assistant => "assistant",
        _ => "user",
    };
    let mut blocks = Vec::new();
    if let Some(content) = &m.content {
        match content {
            Content::Text(t) => blocks.push(json!({"type": "text", "text": t})),
            Content::Parts(parts) => {
                for p in parts {
                    match p {
                        Part::Text { text } => blocks.push(json!({"type": "text", "text": text})),
                        Part::ImageUrl { url, .. } => blocks.push(json!({
                            "type": "image",
                            "source": { "type": "url", "url": url },
                        })),
                        Part::InlineData { mime_type, base64 } => blocks.push(json!({
                            "type": "image",
                            "source": { "type": "base64", "media_type": mime_type, "data": base64 },
                        })),
                        Part::FunctionResponse { tool_call_id, payload, .. } => blocks.push(json!({
                            "type": "tool_result",
                            "tool_use_id": tool_call_id,
                            "content": payload,
                        })),
                        Part::FunctionCall { .. } => {}
                    }
                }
            }
        }
    }
    if let Some(calls) = &m.tool_calls {
        for c in calls {
            blocks.push(json!({
                "type": "tool_use",
                "id": c.id,
                "name": c.name,
                "input": super::json_string_to_value(&c.arguments_json),
            }));
        }
    }
    json!({ "role": role, "content": blocks })
}

/// Renders a canonical response into an Anthropic Messages response (4.B):
/// first choice only; text deltas collapsed to one text block, each tool
/// call as a `tool_use` block.
pub fn response_to_wire(resp: &CanonicalChatResponse) -> Value {
    let Some(choice) = resp.choices.first() else {
        return json!({ "id": resp.id, "type": "message", "role": "assistant", "content": [] });
    };
    let mut content = Vec::new();
    if let Some(text) = &choice.message.content {
        if !text.is_empty() {
            content.push(json!({"type": "text", "text": text}));
        }
    }
    if let Some(calls) = &choice.message.tool_calls {
        for c in calls {
            content.push(json!({
                "type": "tool_use",
                "id": c.id,
                "name": c.name,
                "input": super::json_string_to_value(&c.arguments_json),
            }));
        }
    }
    json!({
        "id": resp.id,
        "type": "message",
        "role": "assistant",
        "model": resp.model,
        "content": content,
        "stop_reason": choice.finish_reason.map(stop_reason_to_wire),
        "usage": resp.usage.as_ref().map(|u| json!({
            "input_tokens": u.prompt,
            "output_tokens": u.completion,
        })),
    })
}

fn stop_reason_to_wire(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::Stop => "end_turn",
        FinishReason::Length => "max_tokens",
        FinishReason::ToolCalls => "tool_use",
        FinishReason::ContentFilter => "stop_sequence",
        FinishReason::Error => "end_turn",
    }
}

/// Parses an Anthropic Messages upstream response into canonical form, for
/// the Anthropic backend connector.
pub fn response_from_wire(body: &Value) -> Result<CanonicalChatResponse, ProxyError> {
    let blocks = body
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| ProxyError::invalid("bad_upstream_response", "missing content"))?;

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(t) = block.get("text").and_then(Value::as_str) {
                    text.push_str(t);
                }
            }
            Some("tool_use") => {
                if let (Some(id), Some(name)) = (
                    block.get("id").and_then(Value::as_str),
                    block.get("name").and_then(Value::as_str),
                ) {
                    tool_calls.push(ToolCall {
                        id: id.to_string(),
                        name: name.to_string(),
                        arguments_json: block
                            .get("input")
                            .map(arguments_to_json_string)
                            .unwrap_or_else(|| "{}".to_string()),
                        index: None,
                    });
                }
            }
            _ => {}
        }
    }

    let finish_reason = body
        .get("stop_reason")
        .and_then(Value::as_str)
        .map(|s| match s {
            "max_tokens" => FinishReason::Length,
            "tool_use" => FinishReason::ToolCalls,
            _ => FinishReason::Stop,
        });

    Ok(CanonicalChatResponse {
        id: body.get("id").and_then(Value::as_str).unwrap_or("").to_string(),
        model: body.get("model").and_then(Value::as_str).unwrap_or("").to_string(),
        created: 0,
        object: "message".to_string(),
        choices: vec![Choice {
            index: 0,
            message: ResponseMessage {
                role: Role::Assistant,
                content: if text.is_empty() { None } else { Some(text) },
                tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
            },
            finish_reason,
        }],
        usage: body.get("usage").map(|u| Usage {
            prompt: u.get("input_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
            completion: u.get("output_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
            total: u.get("input_tokens").and_then(Value::as_u64).unwrap_or(0) as u32
                + u.get("output_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
        }),
        system_fingerprint: None,
    })
}
