use std::collections::HashMap;

use serde::Deserialize;

/// A named bundle of sampling and prompt-wrapping parameters tied to one model
/// (spec glossary: "Reasoning mode"). Field shape grounded on the distilled
/// source's `ReasoningMode` pydantic model.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReasoningMode {
    pub max_reasoning_tokens: Option<i64>,
    pub reasoning_effort: Option<String>,
    pub user_prompt_prefix: Option<String>,
    pub user_prompt_suffix: Option<String>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelReasoningAliases {
    pub model: String,
    pub modes: HashMap<String, ReasoningMode>,
}

/// Loaded from a `reasoning_aliases.toml` config file at startup; consulted by
/// the `max`/`medium`/`low`/`no-think` commands.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReasoningAliasesConfig {
    #[serde(default)]
    pub reasoning_alias_settings: Vec<ModelReasoningAliases>,
}

impl ReasoningAliasesConfig {
    pub fn mode_for(&self, model: &str, mode: &str) -> Option<&ReasoningMode> {
        self.reasoning_alias_settings
            .iter()
            .find(|m| m.model == model)?
            .modes
            .get(mode)
    }
}
