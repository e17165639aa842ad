mod config;
mod error;
mod state;

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use relay_core::backend::RequestContext;
use relay_core::canonical::CanonicalStreamChunk;
use relay_core::processor::ProcessorOutcome;
use relay_core::session::SessionState;
use relay_core::translators::{anthropic, gemini, openai};
use relay_core::ProxyError;

use config::{build_relay_config, load_file_config, Args};
use error::ApiError;
use state::ServerState;

const SESSION_HEADER: &str = "x-session-id";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let args = Args::parse();
    let file_config = load_file_config(args.config.as_ref())?;
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(args.proxy_timeout_secs))
        .build()?;
    let relay_config = build_relay_config(&args, file_config, client)?;
    let state = ServerState::new(&args, relay_config);
    state.spawn_session_sweep(args.session_ttl_secs);

    let router = Router::new()
        .route("/health", get(health))
        .route("/v1/chat/completions", post(openai_chat_completions))
        .route("/v1/responses", post(openai_chat_completions))
        .route("/v1/models", get(list_models))
        .route("/anthropic/v1/messages", post(anthropic_messages))
        .route("/anthropic/v1/models", get(list_anthropic_models))
        .route("/v1beta/models/:model", post(gemini_generate_content))
        .layer(CorsLayer::permissive())
        .with_state(state);

    info!(addr = %args.addr, "starting relay-service");
    let listener = tokio::net::TcpListener::bind(&args.addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn list_models(State(state): State<ServerState>) -> impl IntoResponse {
    let mut models = Vec::new();
    for connector in state.config.connectors.values() {
        if let Ok(names) = connector.list_models().await {
            models.extend(names);
        }
    }
    models.sort();
    models.dedup();
    Json(json!({
        "object": "list",
        "data": models.into_iter().map(|id| json!({ "id": id, "object": "model" })).collect::<Vec<_>>(),
    }))
}

async fn list_anthropic_models(State(state): State<ServerState>) -> impl IntoResponse {
    let mut models = Vec::new();
    if let Some(connector) = state.config.connectors.get("anthropic") {
        if let Ok(names) = connector.list_models().await {
            models = names;
        }
    }
    Json(json!({
        "data": models.into_iter().map(|id| json!({ "id": id, "type": "model" })).collect::<Vec<_>>(),
        "has_more": false,
    }))
}

/// Front-door auth gate (6. Persisted state / env vars): a Bearer token
/// check independent of per-backend upstream credentials, skipped entirely
/// under `DISABLE_AUTH` or when no key is configured.
fn check_auth(state: &ServerState, headers: &HeaderMap) -> Result<(), Response> {
    if state.disable_auth {
        return Ok(());
    }
    let Some(expected) = &state.auth_key else { return Ok(()) };
    let presented = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if presented == Some(expected.as_str()) {
        Ok(())
    } else {
        Err(ApiError::from(ProxyError::AuthenticationFailed("missing or invalid bearer token".to_string())).into_response())
    }
}

fn session_id_from(headers: &HeaderMap) -> String {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

fn echo_session_header(mut response: Response, session_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(session_id) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

/// Shared dispatch for the OpenAI-protocol endpoints (`/v1/chat/completions`
/// and `/v1/responses`): the Responses API's `response_format.json_schema`
/// rides through the canonical request's `extra_body` unchanged, so both
/// endpoints share one handler (4.A translation, 4.H orchestration).
async fn openai_chat_completions(State(state): State<ServerState>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if let Err(denied) = check_auth(&state, &headers) {
        return denied;
    }
    run_request(state, headers, body, openai::request_from_wire, true).await
}

async fn anthropic_messages(State(state): State<ServerState>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if let Err(denied) = check_auth(&state, &headers) {
        return denied;
    }
    run_request(state, headers, body, anthropic::request_from_wire, false).await
}

async fn gemini_generate_content(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Path(model_and_verb): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    if let Err(denied) = check_auth(&state, &headers) {
        return denied;
    }
    let (model, streaming) = match model_and_verb.split_once(':') {
        Some((m, "streamGenerateContent")) => (m.to_string(), true),
        Some((m, "generateContent")) => (m.to_string(), false),
        _ => return ApiError::from(ProxyError::invalid("bad_path", "expected {model}:generateContent")).into_response(),
    };

    let session_id = session_id_from(&headers);
    let mut req = match gemini::request_from_wire(&body) {
        Ok(req) => req,
        Err(e) => return echo_session_header(ApiError::from(e).into_response(), &session_id),
    };
    req.model = model;
    req.stream = streaming;
    req.session_id = Some(session_id.clone());

    let outcome = dispatch(&state, req, &session_id, false).await;
    let response = match outcome {
        Ok(ProcessorOutcome::Response(resp)) => Json(gemini::response_to_wire(&resp)).into_response(),
        Ok(ProcessorOutcome::Stream(stream)) => sse_response(stream, |chunk| gemini_stream_chunk_to_wire(chunk)),
        Err(e) => ApiError::from(e).into_response(),
    };
    echo_session_header(response, &session_id)
}

/// Gemini has no dedicated stream-chunk wire encoder (only whole
/// `GenerateContentResponse` objects); the connector already shapes each
/// upstream event that way, so a streamed chunk is re-expressed as a
/// one-candidate `GenerateContentResponse` envelope for the frontend.
fn gemini_stream_chunk_to_wire(chunk: &CanonicalStreamChunk) -> Value {
    let parts: Vec<Value> = chunk
        .choices()
        .iter()
        .flat_map(|c| {
            let mut parts = Vec::new();
            if let Some(text) = &c.delta.content {
                parts.push(json!({ "text": text }));
            }
            if let Some(calls) = &c.delta.tool_calls {
                for call in calls {
                    parts.push(json!({
                        "functionCall": { "name": call.name, "args": relay_core::translators::json_string_to_value(&call.arguments_json) }
                    }));
                }
            }
            parts
        })
        .collect();
    let finish_reason = chunk.choices().iter().find_map(|c| c.finish_reason.as_ref());
    let usage = match chunk {
        CanonicalStreamChunk::Chunk { usage, .. } => usage.as_ref(),
        CanonicalStreamChunk::Done => None,
    };
    json!({
        "candidates": [{
            "content": { "role": "model", "parts": parts },
            "finishReason": finish_reason.map(|_| "STOP"),
            "index": 0,
        }],
        "usageMetadata": usage.map(|u| json!({
            "promptTokenCount": u.prompt,
            "candidatesTokenCount": u.completion,
            "totalTokenCount": u.total,
        })),
    })
}

async fn run_request<F>(state: ServerState, headers: HeaderMap, body: Value, from_wire: F, is_openai_protocol: bool) -> Response
where
    F: Fn(&Value) -> Result<relay_core::canonical::CanonicalChatRequest, ProxyError>,
{
    let session_id = session_id_from(&headers);
    let mut req = match from_wire(&body) {
        Ok(req) => req,
        Err(e) => return echo_session_header(ApiError::from(e).into_response(), &session_id),
    };
    req.session_id = Some(session_id.clone());

    let outcome = dispatch(&state, req, &session_id, is_openai_protocol).await;
    let response = match outcome {
        Ok(ProcessorOutcome::Response(resp)) if is_openai_protocol => Json(openai::response_to_wire(&resp)).into_response(),
        Ok(ProcessorOutcome::Response(resp)) => Json(anthropic::response_to_wire(&resp)).into_response(),
        Ok(ProcessorOutcome::Stream(stream)) if is_openai_protocol => sse_response(stream, |c| openai::stream_chunk_to_wire(c)),
        Ok(ProcessorOutcome::Stream(stream)) => sse_response(stream, anthropic_stream_chunk_to_wire),
        Err(e) => ApiError::from(e).into_response(),
    };
    echo_session_header(response, &session_id)
}

/// Anthropic's wire protocol has no single canonical stream-chunk shape
/// either; the connector already consumes/produces its event types
/// internally, so outward-facing re-encoding is kept to the minimal
/// `content_block_delta` shape clients actually read text/tool args from.
fn anthropic_stream_chunk_to_wire(chunk: &CanonicalStreamChunk) -> Value {
    let choice = chunk.choices().first();
    let text = choice.and_then(|c| c.delta.content.clone()).unwrap_or_default();
    json!({
        "type": "content_block_delta",
        "index": 0,
        "delta": { "type": "text_delta", "text": text },
    })
}

async fn dispatch(
    state: &ServerState,
    req: relay_core::canonical::CanonicalChatRequest,
    session_id: &str,
    is_openai_cline: bool,
) -> Result<ProcessorOutcome, ProxyError> {
    let handle = state.sessions.get_or_create(session_id.to_string()).await;
    let mut session = handle.lock().await;
    let ctx = RequestContext {
        session_id: session_id.to_string(),
        agent: agent_hint(&session.state),
    };
    state.processor.process(&mut session, req, ctx, is_openai_cline).await
}

fn agent_hint(state: &SessionState) -> Option<String> {
    state.agent.clone()
}

fn sse_response<F>(stream: relay_core::backend::ChunkStream, to_wire: F) -> Response
where
    F: Fn(&CanonicalStreamChunk) -> Value + Send + 'static,
{
    let events = stream.map(move |item| -> Result<Event, Infallible> {
        match item {
            Ok(chunk) => Ok(Event::default().data(to_wire(&chunk).to_string())),
            Err(e) => Ok(Event::default().data(json!({ "error": e.to_string() }).to_string())),
        }
    });
    let done = futures::stream::once(async { Ok::<_, Infallible>(Event::default().data("[DONE]")) });
    let body: std::pin::Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>> = Box::pin(events.chain(done));
    Sse::new(body)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("keep-alive"))
        .into_response()
}
