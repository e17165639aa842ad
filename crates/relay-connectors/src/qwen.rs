//! Qwen OAuth connector (4.E): speaks the same OpenAI-compatible
//! chat-completions wire as [`crate::openai`], differing only in that its
//! credential is an OAuth token that needs refreshing before use.

use std::sync::Arc;

use async_trait::async_trait;
use relay_core::auth::ApiKeyResolver;
use relay_core::backend::{BackendResponse, Connector, PerCallOverrides};
use relay_core::canonical::CanonicalChatRequest;
use relay_core::ProxyError;

use crate::openai::send_chat_completions;

pub struct QwenConnector {
    name: String,
    client: reqwest::Client,
    default_base_url: String,
}

impl QwenConnector {
    pub fn new(name: impl Into<String>, client: reqwest::Client, default_base_url: impl Into<String>) -> Self {
        QwenConnector {
            name: name.into(),
            client,
            default_base_url: default_base_url.into(),
        }
    }
}

#[async_trait]
impl Connector for QwenConnector {
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
        send_chat_completions(
            &self.client,
            &base_url,
            ("authorization", format!("Bearer {}", key.current())),
            &[],
            req,
            effective_model,
            overrides,
        )
        .await
    }
}
