//! CLI arguments and TOML configuration loading (10.3), grounded on
//! `querymt-service`'s `Args` struct: a small `clap::Parser` surface for
//! process-wide settings, plus a config file for the larger tables
//! (backends, failover routes, reasoning aliases) that don't belong on a
//! command line.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use serde::Deserialize;

use relay_connectors::anthropic::{AnthropicConnector, AuthStyle};
use relay_connectors::gemini::{GeminiConnector, GeminiMode};
use relay_connectors::oauth::HttpOAuthRefresher;
use relay_connectors::openai::OpenAiConnector;
use relay_connectors::qwen::QwenConnector;
use relay_connectors::zai;
use relay_core::auth::{static_key, ApiKeyResolver, OAuthKeyResolver};
use relay_core::backend::{Connector, ModelLimits, RelayConfig};
use relay_core::commands::reasoning::ReasoningAliasesConfig;
use relay_core::session::{Route, RoutePolicy};

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Args {
    /// Address to bind the service to.
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub addr: String,
    /// Path to the backend/routes/reasoning TOML config.
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long, env = "COMMAND_PREFIX", default_value = "!/")]
    pub command_prefix: String,
    #[arg(long, env = "LLM_BACKEND", default_value = "openai")]
    pub default_backend: String,
    #[arg(long, env = "DISABLE_AUTH")]
    pub disable_auth: bool,
    /// Bearer token clients must present; unset (or `--disable-auth`) accepts any caller.
    #[arg(long, env = "PROXY_AUTH_KEY")]
    pub auth_key: Option<String>,
    /// Override thinking-budget token count for `thinkingConfig`-capable models.
    #[arg(long, env = "THINKING_BUDGET")]
    pub thinking_budget: Option<i64>,
    #[arg(long, env = "PROXY_TIMEOUT", default_value_t = 60)]
    pub proxy_timeout_secs: u64,
    #[arg(long, default_value_t = 3600)]
    pub session_ttl_secs: u64,
}

#[derive(Debug, Deserialize, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub backends: HashMap<String, BackendFileConfig>,
    #[serde(default)]
    pub failover_routes: Vec<RouteFileConfig>,
    #[serde(default)]
    pub model_limits: HashMap<String, ModelLimitsFileConfig>,
    #[serde(flatten)]
    pub reasoning: ReasoningAliasesConfig,
}

#[derive(Debug, Deserialize, Default)]
pub struct BackendFileConfig {
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_keys: Vec<String>,
    pub oauth_credentials_path: Option<PathBuf>,
    pub oauth_token_url: Option<String>,
    pub oauth_client_id: Option<String>,
    pub oauth_client_secret: Option<String>,
    /// Gemini Code Assist only: the backing Cloud project id.
    pub gemini_project: Option<String>,
    /// OpenRouter-style attribution header value.
    pub app_title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RouteFileConfig {
    pub name: String,
    pub policy: String,
    pub elements: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ModelLimitsFileConfig {
    pub max_input_tokens: Option<u32>,
    pub max_output_tokens: Option<u32>,
}

pub fn load_file_config(path: Option<&PathBuf>) -> anyhow::Result<FileConfig> {
    let Some(path) = path else { return Ok(FileConfig::default()) };
    let raw = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&raw)?)
}

/// Builds the process-wide dispatch configuration (4.F, 6.) from CLI args
/// plus the loaded file config: one connector and one key list per
/// configured backend.
pub fn build_relay_config(args: &Args, file: FileConfig, client: reqwest::Client) -> anyhow::Result<Arc<RelayConfig>> {
    let mut connectors: HashMap<String, Arc<dyn Connector>> = HashMap::new();
    let mut keys: HashMap<String, Vec<Arc<dyn ApiKeyResolver>>> = HashMap::new();

    for (name, backend) in &file.backends {
        let key_list = build_keys(name, backend, &client)?;
        if let Some(connector) = build_connector(name, backend, &client, args) {
            connectors.insert(name.clone(), connector);
            keys.insert(name.clone(), key_list);
        }
    }

    let mut app_failover_routes = HashMap::new();
    for route in file.failover_routes {
        let policy = RoutePolicy::parse(&route.policy)
            .ok_or_else(|| anyhow::anyhow!("unknown route policy {:?} for route {:?}", route.policy, route.name))?;
        app_failover_routes.insert(
            route.name.clone(),
            Route {
                name: route.name,
                policy,
                ordered_elements: route.elements,
            },
        );
    }

    let model_limits = file
        .model_limits
        .into_iter()
        .map(|(model, limit)| {
            (
                model,
                ModelLimits {
                    max_input_tokens: limit.max_input_tokens,
                    max_output_tokens: limit.max_output_tokens,
                },
            )
        })
        .collect();

    Ok(Arc::new(RelayConfig {
        default_backend: args.default_backend.clone(),
        connectors,
        keys,
        app_failover_routes,
        model_limits,
        reasoning: Arc::new(file.reasoning),
        thinking_budget_env_override: args.thinking_budget,
    }))
}

fn build_keys(name: &str, backend: &BackendFileConfig, client: &reqwest::Client) -> anyhow::Result<Vec<Arc<dyn ApiKeyResolver>>> {
    if !backend.api_keys.is_empty() {
        return Ok(backend.api_keys.iter().map(|k| static_key(k.clone())).collect());
    }
    if let Some(path) = &backend.oauth_credentials_path {
        let token_url = backend
            .oauth_token_url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("backend {name:?} has oauth_credentials_path but no oauth_token_url"))?;
        let client_id = backend.oauth_client_id.clone().unwrap_or_default();
        let refresher = Arc::new(HttpOAuthRefresher::new(client.clone(), token_url, client_id, backend.oauth_client_secret.clone()));
        return Ok(vec![Arc::new(OAuthKeyResolver::new(path.clone(), refresher))]);
    }
    Ok(Vec::new())
}

fn build_connector(name: &str, backend: &BackendFileConfig, client: &reqwest::Client, args: &Args) -> Option<Arc<dyn Connector>> {
    let base_url = backend.base_url.clone();
    match name {
        "openai" => Some(Arc::new(OpenAiConnector::new(
            name,
            client.clone(),
            base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            Vec::new(),
        ))),
        "openrouter" => {
            let mut extra = Vec::new();
            if let Some(title) = &backend.app_title {
                extra.push(("X-Title".to_string(), title.clone()));
            }
            Some(Arc::new(OpenAiConnector::new(
                name,
                client.clone(),
                base_url.unwrap_or_else(|| "https://openrouter.ai/api/v1".to_string()),
                extra,
            )))
        }
        "anthropic" => Some(Arc::new(AnthropicConnector::new(
            name,
            client.clone(),
            base_url.unwrap_or_else(|| "https://api.anthropic.com".to_string()),
            AuthStyle::XApiKey,
            None,
            Vec::new(),
        ))),
        "gemini" => Some(Arc::new(GeminiConnector::new(
            name,
            client.clone(),
            base_url.unwrap_or_else(|| "https://generativelanguage.googleapis.com".to_string()),
            GeminiMode::ApiKey,
            args.thinking_budget,
        ))),
        "gemini-oauth-personal" => Some(Arc::new(GeminiConnector::new(
            name,
            client.clone(),
            base_url.unwrap_or_else(|| "https://generativelanguage.googleapis.com".to_string()),
            GeminiMode::OAuthPersonal,
            args.thinking_budget,
        ))),
        "gemini-code-assist" => {
            let project = backend.gemini_project.clone()?;
            Some(Arc::new(GeminiConnector::new(
                name,
                client.clone(),
                base_url.unwrap_or_else(|| "https://cloudcode-pa.googleapis.com".to_string()),
                GeminiMode::CodeAssist { project },
                args.thinking_budget,
            )))
        }
        "qwen-oauth" => Some(Arc::new(QwenConnector::new(
            name,
            client.clone(),
            base_url.unwrap_or_else(|| "https://dashscope.aliyuncs.com/compatible-mode/v1".to_string()),
        ))),
        "zai" => Some(Arc::new(zai::connector(
            client.clone(),
            base_url.unwrap_or_else(|| "https://api.z.ai/api/anthropic".to_string()),
        ))),
        _ => None,
    }
}
