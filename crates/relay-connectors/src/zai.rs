//! Z.ai connector (4.E): a thin preset over [`crate::anthropic::AnthropicConnector`].
//! Z.ai's coding-plan endpoint speaks the Anthropic Messages wire but serves
//! exactly one fixed model id no matter what the caller asked for.

use crate::anthropic::{AnthropicConnector, AuthStyle};

/// The only model Z.ai's coding-plan endpoint accepts.
pub const ZAI_FORCED_MODEL: &str = "claude-sonnet-4-20250514";

pub fn connector(client: reqwest::Client, base_url: impl Into<String>) -> AnthropicConnector {
    AnthropicConnector::new(
        "zai",
        client,
        base_url,
        AuthStyle::Bearer,
        Some(ZAI_FORCED_MODEL.to_string()),
        Vec::new(),
    )
}
