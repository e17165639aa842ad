//! Gemini GenerateContent <-> canonical (4.B).

use serde_json::{json, Map, Value};

use crate::canonical::{
    CanonicalChatRequest, CanonicalChatResponse, Choice, Content, FinishReason, Message, Part,
    ReasoningControls, ResponseMessage, Role, SamplingParams, Tool, ToolCall, Usage,
};
use crate::error::ProxyError;

use super::{arguments_to_json_string, sanitize_tools_for_gemini, thinking_budget_for_effort, validate_uri_scheme};

pub fn request_from_wire(body: &Value) -> Result<CanonicalChatRequest, ProxyError> {
    let mut messages = Vec::new();

    if let Some(instr) = body.get("systemInstruction") {
        let text = parts_text_concat(instr.get("parts"));
        if !text.is_empty() {
            messages.push(Message::system(text));
        }
    }

    for c in body
        .get("contents")
        .and_then(Value::as_array)
        .ok_or_else(|| ProxyError::invalid("missing_contents", "contents is required"))?
    {
        messages.push(message_from_wire(c)?);
    }

    let tools = body
        .get("tools")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .flat_map(|t| t.get("function_declarations").and_then(Value::as_array).cloned().unwrap_or_default())
                .filter_map(|decl| {
                    Some(Tool {
                        name: decl.get("name")?.as_str()?.to_string(),
                        description: decl.get("description").and_then(Value::as_str).unwrap_or("").to_string(),
                        parameters: decl.get("parameters").cloned().unwrap_or(json!({})),
                    })
                })
                .collect::<Vec<_>>()
        })
        .filter(|v: &Vec<Tool>| !v.is_empty());

    let gen_config = body.get("generationConfig");
    let sampling = SamplingParams {
        temperature: gen_config.and_then(|c| c.get("temperature")).and_then(Value::as_f64),
        top_p: gen_config.and_then(|c| c.get("topP")).and_then(Value::as_f64),
        top_k: gen_config.and_then(|c| c.get("topK")).and_then(Value::as_i64),
        max_tokens: gen_config
            .and_then(|c| c.get("maxOutputTokens"))
            .and_then(Value::as_u64)
            .map(|v| v as u32),
        stop: gen_config.and_then(|c| c.get("stopSequences")).and_then(Value::as_array).map(|arr| {
            arr.iter().filter_map(|v| v.as_str().map(String::from)).collect()
        }),
        presence_penalty: gen_config.and_then(|c| c.get("presencePenalty")).and_then(Value::as_f64),
        frequency_penalty: gen_config.and_then(|c| c.get("frequencyPenalty")).and_then(Value::as_f64),
        seed: gen_config.and_then(|c| c.get("seed")).and_then(Value::as_i64),
        user: None,
        logit_bias: None,
    };

    Ok(CanonicalChatRequest {
        model: body.get("model").and_then(Value::as_str).unwrap_or("").to_string(),
        messages,
        sampling,
        stream: false,
        tools,
        tool_choice: None,
        reasoning: ReasoningControls {
            effort: None,
            thinking_budget: gen_config
                .and_then(|c| c.get("thinkingConfig"))
                .and_then(|t| t.get("thinkingBudget"))
                .and_then(Value::as_i64),
            raw_reasoning: gen_config.and_then(|c| c.get("thinkingConfig")).cloned(),
            generation_config: gen_config.cloned(),
        },
        extra_body: Default::default(),
        session_id: None,
    })
}

fn parts_text_concat(parts: Option<&Value>) -> String {
    parts
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}

fn message_from_wire(c: &Value) -> Result<Message, ProxyError> {
    let role = match c.get("role").and_then(Value::as_str) {
        Some("model") => Role::Assistant,
        _ => Role::User,
    };

    let mut parts = Vec::new();
    let mut tool_calls = Vec::new();
    for p in c.get("parts").and_then(Value::as_array).into_iter().flatten() {
        if let Some(text) = p.get("text").and_then(Value::as_str) {
            parts.push(Part::Text { text: text.to_string() });
        } else if let Some(fc) = p.get("functionCall") {
            let name = fc.get("name").and_then(Value::as_str).unwrap_or("").to_string();
            let args = fc.get("args").cloned().unwrap_or(json!({}));
            tool_calls.push(ToolCall {
                id: format!("call_{name}"),
                name,
                arguments_json: arguments_to_json_string(&args),
                index: None,
            });
        } else if let Some(fr) = p.get("functionResponse") {
            let name = fr.get("name").and_then(Value::as_str).unwrap_or("").to_string();
            parts.push(Part::FunctionResponse {
                tool_call_id: format!("call_{name}"),
                name,
                payload: fr.get("response").cloned().unwrap_or(Value::Null),
            });
        } else if let Some(inline) = p.get("inlineData") {
            if let (Some(mime), Some(data)) = (
                inline.get("mimeType").and_then(Value::as_str),
                inline.get("data").and_then(Value::as_str),
            ) {
                parts.push(Part::InlineData { mime_type: mime.to_string(), base64: data.to_string() });
            }
        } else if let Some(uri) = p.get("fileData").and_then(|f| f.get("fileUri")).and_then(Value::as_str) {
            if let Some(valid) = validate_uri_scheme(uri) {
                parts.push(Part::ImageUrl { url: valid.to_string(), detail: None });
            }
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

/// Renders a canonical request into the Gemini GenerateContent wire shape,
/// for the Gemini backend connector.
pub fn request_to_wire(req: &CanonicalChatRequest, env_thinking_override: Option<i64>) -> Value {
    let mut system_text = String::new();
    let mut contents = Vec::new();
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
        contents.push(message_to_wire(m));
    }

    let mut body = Map::new();
    if !system_text.is_empty() {
        body.insert(
            "systemInstruction".to_string(),
            json!({ "parts": [{ "text": system_text }] }),
        );
    }
    body.insert("contents".to_string(), Value::Array(contents));

    if let Some(tools) = &req.tools {
        body.insert(
            "tools".to_string(),
            json!([{ "function_declarations": sanitize_tools_for_gemini(tools) }]),
        );
    }

    let mut gen_config = req.reasoning.generation_config.clone().unwrap_or_else(|| json!({}));
    if let Value::Object(ref mut gc) = gen_config {
        if let Some(t) = req.sampling.temperature {
            gc.insert("temperature".to_string(), json!(t));
        }
        if let Some(t) = req.sampling.top_p {
            gc.insert("topP".to_string(), json!(t));
        }
        if let Some(t) = req.sampling.top_k {
            gc.insert("topK".to_string(), json!(t));
        }
        if let Some(t) = req.sampling.max_tokens {
            gc.insert("maxOutputTokens".to_string(), json!(t));
        }
        if let Some(stop) = &req.sampling.stop {
            gc.insert("stopSequences".to_string(), json!(stop));
        }
        if let Some(effort) = req.reasoning.effort {
            let budget = thinking_budget_for_effort(effort, env_thinking_override);
            gc.insert(
                "thinkingConfig".to_string(),
                json!({ "thinkingBudget": budget, "includeThoughts": budget != 0 }),
            );
        }
    }
    if gen_config.as_object().map(|m| !m.is_empty()).unwrap_or(false) {
        body.insert("generationConfig".to_string(), gen_config);
    }

    Value::Object(body)
}

fn message_to_wire(m: &Message) -> Value {
    let role = match m.role {
        Role::Assistant => "model",
        _ => "user",
    };
    let mut parts = Vec::new();
    if let Some(content) = &m.content {
        match content {
            Content::Text(t) => parts.push(json!({ "text": t })),
            Content::Parts(ps) => {
                for p in ps {
                    match p {
                        Part::Text { text } => parts.push(json!({ "text": text })),
                        Part::InlineData { mime_type, base64 } => {
                            parts.push(json!({ "inlineData": { "mimeType": mime_type, "data": base64 } }))
                        }
                        Part::ImageUrl { url, .. } => parts.push(json!({ "fileData": { "fileUri": url } })),
                        Part::FunctionResponse { name, payload, .. } => {
                            parts.push(json!({ "functionResponse": { "name": name, "response": payload } }))
                        }
                        Part::FunctionCall { name, args_json } => parts.push(json!({
                            "functionCall": { "name": name, "args": super::json_string_to_value(args_json) }
                        })),
                    }
                }
            }
        }
    }
    if let Some(calls) = &m.tool_calls {
        for c in calls {
            parts.push(json!({
                "functionCall": { "name": c.name, "args": super::json_string_to_value(&c.arguments_json) }
            }));
        }
    }
    json!({ "role": role, "parts": parts })
}

/// Renders a canonical response into a Gemini GenerateContent response
/// (4.B): one `candidate` per choice, tool calls appended as `functionCall`
/// parts after any text, `finishReason` upper-cased.
pub fn response_to_wire(resp: &CanonicalChatResponse) -> Value {
    let candidates: Vec<Value> = resp
        .choices
        .iter()
        .map(|choice| {
            let mut parts = Vec::new();
            if let Some(text) = &choice.message.content {
                if !text.is_empty() {
                    parts.push(json!({ "text": text }));
                }
            }
            if let Some(calls) = &choice.message.tool_calls {
                for c in calls {
                    parts.push(json!({
                        "functionCall": { "name": c.name, "args": super::json_string_to_value(&c.arguments_json) }
                    }));
                }
            }
            // Code-Assist quirk: a candidate carrying a functionCall is always
            // reported as tool_calls, regardless of the upstream's own reason.
            let finish_reason = if choice.message.tool_calls.is_some() {
                FinishReason::ToolCalls
            } else {
                choice.finish_reason.unwrap_or(FinishReason::Stop)
            };
            json!({
                "content": { "role": "model", "parts": parts },
                "finishReason": finish_reason_to_wire(finish_reason),
                "index": choice.index,
            })
        })
        .collect();

    json!({
        "candidates": candidates,
        "usageMetadata": resp.usage.as_ref().map(|u| json!({
            "promptTokenCount": u.prompt,
            "candidatesTokenCount": u.completion,
            "totalTokenCount": u.total,
        })),
    })
}

fn finish_reason_to_wire(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::Stop => "STOP",
        FinishReason::Length => "MAX_TOKENS",
        FinishReason::ToolCalls => "STOP",
        FinishReason::ContentFilter => "SAFETY",
        FinishReason::Error => "OTHER",
    }
}

/// Parses a Gemini GenerateContent upstream response into canonical form,
/// for the Gemini backend connector.
pub fn response_from_wire(body: &Value) -> Result<CanonicalChatResponse, ProxyError> {
    let candidates = body
        .get("candidates")
        .and_then(Value::as_array)
        .ok_or_else(|| ProxyError::invalid("bad_upstream_response", "missing candidates"))?;

    let choices = candidates
        .iter()
        .enumerate()
        .map(|(i, cand)| {
            let mut text = String::new();
            let mut tool_calls = Vec::new();
            for p in cand
                .get("content")
                .and_then(|c| c.get("parts"))
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
            {
                if let Some(t) = p.get("text").and_then(Value::as_str) {
                    text.push_str(t);
                } else if let Some(fc) = p.get("functionCall") {
                    let name = fc.get("name").and_then(Value::as_str).unwrap_or("").to_string();
                    let args = fc.get("args").cloned().unwrap_or(json!({}));
                    tool_calls.push(ToolCall {
                        id: format!("call_{name}"),
                        name,
                        arguments_json: arguments_to_json_string(&args),
                        index: None,
                    });
                }
            }

            let finish_reason = if !tool_calls.is_empty() {
                Some(FinishReason::ToolCalls)
            } else {
                cand.get("finishReason").and_then(Value::as_str).map(|s| match s {
                    "MAX_TOKENS" => FinishReason::Length,
                    "SAFETY" | "RECITATION" => FinishReason::ContentFilter,
                    "STOP" => FinishReason::Stop,
                    _ => FinishReason::Error,
                })
            };

            Choice {
                index: i as u32,
                message: ResponseMessage {
                    role: Role::Assistant,
                    content: if text.is_empty() { None } else { Some(text) },
                    tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
                },
                finish_reason,
            }
        })
        .collect();

    let usage = body.get("usageMetadata").map(|u| Usage {
        prompt: u.get("promptTokenCount").and_then(Value::as_u64).unwrap_or(0) as u32,
        completion: u.get("candidatesTokenCount").and_then(Value::as_u64).unwrap_or(0) as u32,
        total: u.get("totalTokenCount").and_then(Value::as_u64).unwrap_or(0) as u32,
    });

    Ok(CanonicalChatResponse {
        id: String::new(),
        model: String::new(),
        created: 0,
        object: "generateContentResponse".to_string(),
        choices,
        usage,
        system_fingerprint: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_forces_finish_reason() {
        let resp = CanonicalChatResponse {
            id: "x".into(),
            model: "gemini-2.5-pro".into(),
            created: 0,
            object: "chat.completion".into(),
            choices: vec![Choice {
                index: 0,
                message: ResponseMessage {
                    role: Role::Assistant,
                    content: None,
                    tool_calls: Some(vec![ToolCall {
                        id: "call_x".into(),
                        name: "x".into(),
                        arguments_json: "{}".into(),
                        index: None,
                    }]),
                },
                finish_reason: Some(FinishReason::Stop),
            }],
            usage: None,
            system_fingerprint: None,
        };
        let wire = response_to_wire(&resp);
        assert_eq!(wire["candidates"][0]["finishReason"], "STOP");
    }
}
