//! Request Processor (4.H): orchestrates the command engine, backend
//! service, and response middleware over one already-session-resolved
//! request. Frontend<->canonical translation (steps 2 and 7 of 4.H) is
//! delegated to the caller, which owns the protocol-specific endpoint and
//! already has the translator functions in scope — the processor stays
//! protocol-agnostic, matching the Translators/Request-Processor split in
//! 2. SYSTEM OVERVIEW.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::StreamExt;

use crate::backend::{BackendResponse, ChunkStream, RelayConfig, RequestContext};
use crate::backend::service::BackendService;
use crate::canonical::{CanonicalChatRequest, CanonicalChatResponse, CanonicalStreamChunk, Choice, Message, ResponseMessage, Role};
use crate::commands::{render_command_reply, CommandEngine};
use crate::error::ProxyError;
use crate::middleware::{self, Redactor, StreamPipeline, ToolCallExtractor, RECOVERY_MESSAGE};
use crate::session::{Interaction, Session};

const DEFAULT_MAX_RECOVERY_RETRIES: u32 = 1;

pub enum ProcessorOutcome {
    Response(CanonicalChatResponse),
    Stream(ChunkStream),
}

pub struct Processor {
    command_engine: CommandEngine,
    backend: BackendService,
    redactor: Redactor,
    tool_extractor: ToolCallExtractor,
    max_recovery_retries: u32,
}

impl Processor {
    pub fn new(config: Arc<RelayConfig>, command_engine: CommandEngine, redactor: Redactor) -> Self {
        Processor {
            command_engine,
            backend: BackendService::new(config),
            redactor,
            tool_extractor: ToolCallExtractor::new(),
            max_recovery_retries: DEFAULT_MAX_RECOVERY_RETRIES,
        }
    }

    /// Runs steps 3-6 of 4.H over a request whose session lock the caller
    /// already holds for the duration of this call.
    pub async fn process(
        &self,
        session: &mut Session,
        mut req: CanonicalChatRequest,
        ctx: RequestContext,
        is_openai_cline: bool,
    ) -> Result<ProcessorOutcome, ProxyError> {
        session.touch();

        if let Some(outcome) = self.command_engine.process(&mut req.messages, &mut session.state) {
            if outcome.suppress_forwarding {
                let reply = render_command_reply(&outcome.user_message, session.state.agent.as_deref(), is_openai_cline);
                let response = synthesize_command_response(reply);
                session.record(Interaction {
                    handler: "proxy".to_string(),
                    backend: None,
                    model: None,
                    tokens: None,
                    at: crate::session::now_epoch_secs(),
                });
                return Ok(ProcessorOutcome::Response(response));
            }
        }

        req.validate()?;
        middleware::redact_request(&mut req, &self.redactor);

        if req.stream {
            let stream = self.dispatch_stream(req, &ctx, session).await?;
            Ok(ProcessorOutcome::Stream(stream))
        } else {
            let response = self.dispatch_with_recovery(req, &ctx, session).await?;
            session.record(Interaction {
                handler: "backend".to_string(),
                backend: None,
                model: Some(response.model.clone()),
                tokens: response.usage.as_ref().map(|u| u.total),
                at: crate::session::now_epoch_secs(),
            });
            Ok(ProcessorOutcome::Response(response))
        }
    }

    async fn dispatch_with_recovery(
        &self,
        mut req: CanonicalChatRequest,
        ctx: &RequestContext,
        session: &mut Session,
    ) -> Result<CanonicalChatResponse, ProxyError> {
        let mut retries = 0;
        loop {
            let outcome = self
                .backend
                .call_completion(req.clone(), true, ctx, &mut session.state)
                .await?;
            let BackendResponse::Single(response) = outcome else {
                return Err(ProxyError::Internal("streaming response from non-streaming call".into()));
            };
            match middleware::apply_to_response(response, &self.redactor, &self.tool_extractor) {
                Ok(final_response) => return Ok(final_response),
                Err(ProxyError::EmptyResponse) if retries < self.max_recovery_retries => {
                    retries += 1;
                    req.messages.push(Message::user(RECOVERY_MESSAGE));
                }
                Err(ProxyError::EmptyResponse) => {
                    return Ok(CanonicalChatResponse {
                        id: "proxy_empty_response".to_string(),
                        model: req.model.clone(),
                        created: crate::session::now_epoch_secs() as i64,
                        object: "chat.completion".to_string(),
                        choices: vec![Choice {
                            index: 0,
                            message: ResponseMessage { role: Role::Assistant, content: None, tool_calls: None },
                            finish_reason: Some(crate::canonical::FinishReason::Stop),
                        }],
                        usage: None,
                        system_fingerprint: None,
                    });
                }
                Err(other) => return Err(other),
            }
        }
    }

    async fn dispatch_stream(
        &self,
        req: CanonicalChatRequest,
        ctx: &RequestContext,
        session: &mut Session,
    ) -> Result<ChunkStream, ProxyError> {
        let outcome = self.backend.call_completion(req, true, ctx, &mut session.state).await?;
        let BackendResponse::Stream(upstream) = outcome else {
            return Err(ProxyError::Internal("non-streaming response from streaming call".into()));
        };
        let pipeline = StreamPipeline::new(self.redactor.clone());
        Ok(pipe_stream(upstream, pipeline))
    }
}

fn synthesize_command_response(message: ResponseMessage) -> CanonicalChatResponse {
    CanonicalChatResponse {
        id: CanonicalChatResponse::COMMAND_RESPONSE_ID.to_string(),
        model: String::new(),
        created: crate::session::now_epoch_secs() as i64,
        object: "chat.completion".to_string(),
        choices: vec![Choice { index: 0, message, finish_reason: Some(crate::canonical::FinishReason::Stop) }],
        usage: None,
        system_fingerprint: None,
    }
}

/// Runs every upstream chunk through the streaming middleware pipeline,
/// preserving arrival order (5. Ordering guarantees).
fn pipe_stream(upstream: ChunkStream, pipeline: StreamPipeline) -> ChunkStream {
    Box::pin(futures::stream::unfold(
        (upstream, pipeline, VecDeque::<CanonicalStreamChunk>::new()),
        |(mut upstream, mut pipeline, mut queue)| async move {
            loop {
                if let Some(item) = queue.pop_front() {
                    return Some((Ok(item), (upstream, pipeline, queue)));
                }
                match upstream.next().await {
                    Some(Ok(chunk)) => {
                        queue.extend(pipeline.on_chunk(chunk));
                        if queue.is_empty() && !pipeline.is_terminated() {
                            continue;
                        }
                        if queue.is_empty() {
                            return None;
                        }
                    }
                    Some(Err(e)) => return Some((Err(e), (upstream, pipeline, queue))),
                    None => return None,
                }
            }
        },
    ))
}
