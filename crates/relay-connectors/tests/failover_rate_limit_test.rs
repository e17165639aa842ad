//! Covers the 429-then-200 key failover scenario: a rate limit on the first
//! registered key must advance to the next key immediately, issuing exactly
//! one upstream call per key rather than retrying the failing key in place.

use std::collections::HashMap;
use std::sync::Arc;

use relay_core::auth::static_key;
use relay_core::backend::service::BackendService;
use relay_core::backend::{BackendResponse, RelayConfig, RequestContext};
use relay_core::canonical::{CanonicalChatRequest, Message};
use relay_core::session::SessionState;
use relay_connectors::openai::OpenAiConnector;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn bare_request(model: &str) -> CanonicalChatRequest {
    CanonicalChatRequest {
        model: model.to_string(),
        messages: vec![Message::user("hi")],
        sampling: Default::default(),
        stream: false,
        tools: None,
        tool_choice: None,
        reasoning: Default::default(),
        extra_body: HashMap::new(),
        session_id: None,
    }
}

#[tokio::test]
async fn rate_limit_on_first_key_advances_to_second_key() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer key1"))
        .respond_with(ResponseTemplate::new(429))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer key2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "chatcmpl-1",
            "model": "model-x",
            "created": 0,
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": "hello" },
                "finish_reason": "stop",
            }],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let connector = OpenAiConnector::new("openai", reqwest::Client::new(), server.uri(), Vec::new());

    let mut connectors: HashMap<String, Arc<dyn relay_core::backend::Connector>> = HashMap::new();
    connectors.insert("openai".to_string(), Arc::new(connector));

    let mut keys: HashMap<String, Vec<Arc<dyn relay_core::auth::ApiKeyResolver>>> = HashMap::new();
    keys.insert("openai".to_string(), vec![static_key("key1"), static_key("key2")]);

    let config = Arc::new(RelayConfig {
        default_backend: "openai".to_string(),
        connectors,
        keys,
        app_failover_routes: HashMap::new(),
        model_limits: HashMap::new(),
        reasoning: Arc::new(Default::default()),
        thinking_budget_env_override: None,
    });

    let service = BackendService::new(config);
    let ctx = RequestContext { session_id: "s1".to_string(), agent: None };
    let mut state = SessionState::default();

    let outcome = service
        .call_completion(bare_request("model-x"), true, &ctx, &mut state)
        .await
        .expect("second key should succeed after first key is rate limited");

    let BackendResponse::Single(response) = outcome else {
        panic!("expected a non-streaming response");
    };
    assert_eq!(response.choices[0].message.content.as_deref(), Some("hello"));

    let requests = server.received_requests().await.expect("request recording enabled");
    assert_eq!(requests.len(), 2, "exactly one call to each key, no in-place retry on the rate-limited key");
}
