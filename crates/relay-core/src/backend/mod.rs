pub mod rate_limit;
pub mod service;
pub mod tokenizer;

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::Stream;

use crate::auth::ApiKeyResolver;
use crate::canonical::{CanonicalChatRequest, CanonicalChatResponse, CanonicalStreamChunk, ReasoningEffort};
use crate::error::ProxyError;
use crate::session::Route;

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<CanonicalStreamChunk, ProxyError>> + Send>>;

/// What a connector call yields: one response, or a lazy chunk sequence.
pub enum BackendResponse {
    Single(CanonicalChatResponse),
    Stream(ChunkStream),
}

/// Per-call overrides the backend service computes and hands to a connector
/// before it builds the outbound payload (4.E, 4.F step 2): reasoning mode,
/// prompt wrapping, a per-session base-URL override, and raw provider escape
/// hatches.
#[derive(Debug, Clone, Default)]
pub struct PerCallOverrides {
    pub base_url: Option<String>,
    pub prompt_prefix: Option<String>,
    pub prompt_suffix: Option<String>,
    pub reasoning_effort: Option<ReasoningEffort>,
    pub thinking_budget: Option<i64>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_output_tokens: Option<u32>,
}

/// One upstream wire protocol (4.E). Each backend (`openai`, `openrouter`,
/// `anthropic`, `gemini`, `gemini-oauth-personal`, `gemini-code-assist`,
/// `qwen-oauth`, `zai`) is one implementation, selected by name from the
/// registry in [`RelayConfig`]. Implementations share one HTTP client handed
/// to them at construction (5. Shared resources).
#[async_trait]
pub trait Connector: Send + Sync {
    fn name(&self) -> &str;

    async fn chat_completions(
        &self,
        req: &CanonicalChatRequest,
        effective_model: &str,
        key: Arc<dyn ApiKeyResolver>,
        overrides: &PerCallOverrides,
    ) -> Result<BackendResponse, ProxyError>;

    async fn list_models(&self) -> Result<Vec<String>, ProxyError> {
        Ok(Vec::new())
    }
}

/// Per-model context window / output cap, consulted before dispatch (4.F).
#[derive(Debug, Clone, Default)]
pub struct ModelLimits {
    pub max_input_tokens: Option<u32>,
    pub max_output_tokens: Option<u32>,
}

/// Process-wide, immutable dispatch configuration: connectors, their
/// registered keys in rotation order, app-global failover routes, and
/// per-model limits. Built once at startup; hot-reloaded only via an
/// explicit config reload (5. Shared resources).
pub struct RelayConfig {
    pub default_backend: String,
    pub connectors: HashMap<String, Arc<dyn Connector>>,
    pub keys: HashMap<String, Vec<Arc<dyn ApiKeyResolver>>>,
    pub app_failover_routes: HashMap<String, Route>,
    pub model_limits: HashMap<String, ModelLimits>,
    pub reasoning: Arc<crate::commands::reasoning::ReasoningAliasesConfig>,
    pub thinking_budget_env_override: Option<i64>,
}

impl RelayConfig {
    pub fn key_count(&self, backend: &str) -> usize {
        self.keys.get(backend).map(Vec::len).unwrap_or(0)
    }

    pub fn key_for(&self, backend: &str, index: usize) -> Option<Arc<dyn ApiKeyResolver>> {
        self.keys.get(backend)?.get(index).cloned()
    }

    pub fn key_name(&self, backend: &str, index: usize) -> String {
        format!("{backend}#{index}")
    }
}

/// Request-scoped context threaded through the backend service (4.F, 4.H).
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub session_id: String,
    pub agent: Option<String>,
}
