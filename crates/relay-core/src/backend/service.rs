//! Backend Service (4.F): resolves a dispatch plan, applies per-step config,
//! consults the rate limiter, and walks failover on persistent failure.

use std::time::Duration;

use tracing::{info, warn};

use crate::canonical::ReasoningEffort;
use crate::error::ProxyError;
use crate::session::{Route, RoutePolicy, SessionState};

use super::rate_limit::RateLimiter;
use super::tokenizer::Tokenizer;
use super::{BackendResponse, PerCallOverrides, RelayConfig, RequestContext};
use crate::canonical::CanonicalChatRequest;

/// One candidate (backend, model, key index) the dispatch loop will try.
#[derive(Debug, Clone)]
struct Attempt {
    backend: String,
    model: String,
    key_index: usize,
}

pub struct BackendService {
    config: std::sync::Arc<RelayConfig>,
    rate_limiter: std::sync::Arc<RateLimiter>,
    tokenizer: Tokenizer,
}

impl BackendService {
    pub fn new(config: std::sync::Arc<RelayConfig>) -> Self {
        BackendService {
            config,
            rate_limiter: std::sync::Arc::new(RateLimiter::new()),
            tokenizer: Tokenizer::new(),
        }
    }

    /// `callCompletion` (4.F). `allow_failover=false` restricts the dispatch
    /// loop to the first resolved attempt only.
    pub async fn call_completion(
        &self,
        mut req: CanonicalChatRequest,
        allow_failover: bool,
        ctx: &RequestContext,
        state: &mut SessionState,
    ) -> Result<BackendResponse, ProxyError> {
        if let Some(limit) = self.config.model_limits.get(&req.model) {
            if let Some(max_in) = limit.max_input_tokens {
                let measured = self.tokenizer.count_request(&req);
                if measured as u32 > max_in {
                    return Err(ProxyError::invalid(
                        "input_limit_exceeded",
                        format!("measured {measured} tokens exceeds limit {max_in} for model {}", req.model),
                    ));
                }
            }
            if let Some(max_out) = limit.max_output_tokens {
                req.sampling.max_tokens = Some(match req.sampling.max_tokens {
                    Some(caller) => caller.min(max_out),
                    None => max_out,
                });
            }
        }

        let route = resolve_route(&req.model, state, &self.config);
        let mut attempts = expand_route(&route, &self.config);
        if !allow_failover {
            attempts.truncate(1);
        }
        if attempts.is_empty() {
            return Err(ProxyError::ModelNotSupported(req.model.clone()));
        }

        let mut failures = Vec::new();
        for attempt in &attempts {
            let key_name = self.config.key_name(&attempt.backend, attempt.key_index);
            if self.rate_limiter.is_limited(&attempt.backend, &key_name) {
                failures.push(format!("{}:{} skipped (rate limited)", attempt.backend, attempt.model));
                continue;
            }
            let Some(connector) = self.config.connectors.get(&attempt.backend).cloned() else {
                failures.push(format!("{}: no connector registered", attempt.backend));
                continue;
            };
            let Some(key) = self.config.key_for(&attempt.backend, attempt.key_index) else {
                failures.push(format!("{}: no key at index {}", attempt.backend, attempt.key_index));
                continue;
            };

            let overrides = self.build_overrides(state, &attempt.backend, &attempt.model);

            let mut transient_retried = false;
            loop {
                let result = connector
                    .chat_completions(&req, &attempt.model, key.clone(), &overrides)
                    .await;
                match result {
                    Ok(resp) => {
                        self.rate_limiter.record_success(&attempt.backend, &key_name);
                        info!(backend = %attempt.backend, model = %attempt.model, session_id = %ctx.session_id, "backend call succeeded");
                        return Ok(resp);
                    }
                    Err(ProxyError::RateLimited { retry_after }) => {
                        let wait = Duration::from_secs(retry_after.unwrap_or(1));
                        self.rate_limiter.mark_limited(&attempt.backend, &key_name, wait);
                        warn!(backend = %attempt.backend, wait_secs = wait.as_secs(), "rate limited, advancing to next attempt");
                        failures.push(format!("{}:{} rate limited", attempt.backend, attempt.model));
                        break;
                    }
                    Err(ProxyError::UpstreamTransient(e)) => {
                        if !transient_retried {
                            transient_retried = true;
                            warn!(backend = %attempt.backend, error = %e, "transient upstream error, retrying once");
                            continue;
                        }
                        failures.push(format!("{}:{} upstream transient: {e}", attempt.backend, attempt.model));
                        break;
                    }
                    Err(e) => {
                        failures.push(format!("{}:{} {e}", attempt.backend, attempt.model));
                        break;
                    }
                }
            }
        }

        Err(ProxyError::BackendExhausted { attempts: failures })
    }

    fn build_overrides(&self, state: &SessionState, target_backend: &str, target_model: &str) -> PerCallOverrides {
        let mut overrides = PerCallOverrides::default();
        if let Some(url) = state.api_url_overrides.get(target_backend) {
            overrides.base_url = Some(url.clone());
        }
        if let Some(mode_name) = &state.reasoning_mode {
            if let Some(mode) = self.config.reasoning.mode_for(target_model, mode_name) {
                overrides.thinking_budget = mode.max_reasoning_tokens;
                overrides.reasoning_effort = mode
                    .reasoning_effort
                    .as_deref()
                    .and_then(parse_effort);
                overrides.prompt_prefix = mode.user_prompt_prefix.clone();
                overrides.prompt_suffix = mode.user_prompt_suffix.clone();
                overrides.temperature = mode.temperature;
                overrides.top_p = mode.top_p;
            }
        }
        overrides
    }
}

fn parse_effort(s: &str) -> Option<ReasoningEffort> {
    match s {
        "low" => Some(ReasoningEffort::Low),
        "medium" => Some(ReasoningEffort::Medium),
        "high" => Some(ReasoningEffort::High),
        _ => None,
    }
}

/// Resolves the dispatch plan's route (4.F step 1). Precedence, highest
/// first: a pending one-off override (cleared on use), an explicit
/// `set(backend=…)` session override, a session-scoped failover route whose
/// name matches the requested model, an app-global route of that name, an
/// explicit `backend:model` in the request, then the configured default
/// backend. A session route with the same name as an app-global route
/// shadows it entirely rather than extending it — the open question from
/// 9. DESIGN NOTES, resolved this way and recorded in DESIGN.md.
fn resolve_route(req_model: &str, state: &mut SessionState, config: &RelayConfig) -> Route {
    if let Some(oneoff) = state.oneoff_route.take() {
        return route_for_target(&oneoff, state, config);
    }
    if let Some(backend) = state.override_backend.clone() {
        let model = state.override_model.clone().unwrap_or_else(|| req_model.to_string());
        return Route {
            name: req_model.to_string(),
            policy: RoutePolicy::RotateKeys,
            ordered_elements: vec![format!("{backend}:{model}")],
        };
    }
    route_for_target(req_model, state, config)
}

fn route_for_target(target: &str, state: &SessionState, config: &RelayConfig) -> Route {
    if let Some(route) = state.failover_routes.get(target).or_else(|| config.app_failover_routes.get(target)) {
        return route.clone();
    }
    let (backend, model) = split_element(target, &config.default_backend);
    Route {
        name: target.to_string(),
        policy: RoutePolicy::RotateKeys,
        ordered_elements: vec![format!("{backend}:{model}")],
    }
}

fn split_element(element: &str, default_backend: &str) -> (String, String) {
    match element.split_once(':') {
        Some((b, m)) => (b.to_string(), m.to_string()),
        None => (default_backend.to_string(), element.to_string()),
    }
}

/// Expands a route's elements against registered key counts per its policy
/// (4.F "key rotation policies"): `k` rotates keys over the route's single
/// element, `m` rotates elements with a fixed key, `km`/`mk` nest the two
/// loops in the stated order.
fn expand_route(route: &Route, config: &RelayConfig) -> Vec<Attempt> {
    if route.ordered_elements.is_empty() {
        return Vec::new();
    }
    let key_count = |backend: &str| config.key_count(backend).max(1);

    match route.policy {
        RoutePolicy::RotateKeys => {
            let (backend, model) = split_element(&route.ordered_elements[0], &config.default_backend);
            (0..key_count(&backend))
                .map(|key_index| Attempt { backend: backend.clone(), model: model.clone(), key_index })
                .collect()
        }
        RoutePolicy::RotateModel => route
            .ordered_elements
            .iter()
            .map(|e| {
                let (backend, model) = split_element(e, &config.default_backend);
                Attempt { backend, model, key_index: 0 }
            })
            .collect(),
        RoutePolicy::KeyThenModel => {
            let max_keys = route
                .ordered_elements
                .iter()
                .map(|e| key_count(&split_element(e, &config.default_backend).0))
                .max()
                .unwrap_or(1);
            let mut out = Vec::new();
            for key_index in 0..max_keys {
                for e in &route.ordered_elements {
                    let (backend, model) = split_element(e, &config.default_backend);
                    if key_index < key_count(&backend) {
                        out.push(Attempt { backend, model, key_index });
                    }
                }
            }
            out
        }
        RoutePolicy::ModelThenKey => {
            let mut out = Vec::new();
            for e in &route.ordered_elements {
                let (backend, model) = split_element(e, &config.default_backend);
                for key_index in 0..key_count(&backend) {
                    out.push(Attempt { backend: backend.clone(), model: model.clone(), key_index });
                }
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotate_keys_expands_single_element_by_key_count() {
        let mut config = bare_config();
        config.keys.insert("openrouter".to_string(), vec![crate::auth::static_key("k1"), crate::auth::static_key("k2")]);
        let route = Route {
            name: "r".into(),
            policy: RoutePolicy::RotateKeys,
            ordered_elements: vec!["openrouter:model-x".into()],
        };
        let attempts = expand_route(&route, &config);
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].key_index, 0);
        assert_eq!(attempts[1].key_index, 1);
    }

    #[test]
    fn rotate_model_expands_elements_with_fixed_key() {
        let config = bare_config();
        let route = Route {
            name: "r".into(),
            policy: RoutePolicy::RotateModel,
            ordered_elements: vec!["openrouter:a".into(), "openrouter:b".into()],
        };
        let attempts = expand_route(&route, &config);
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].model, "a");
        assert_eq!(attempts[1].model, "b");
    }

    fn bare_config() -> RelayConfig {
        RelayConfig {
            default_backend: "openai".to_string(),
            connectors: Default::default(),
            keys: Default::default(),
            app_failover_routes: Default::default(),
            model_limits: Default::default(),
            reasoning: std::sync::Arc::new(Default::default()),
            thinking_budget_env_override: None,
        }
    }
}
