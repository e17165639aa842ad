pub mod store;

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

pub type SessionId = String;

/// A named, ordered list of `backend:model` elements that substitutes for
/// `model` when the incoming model name matches the route name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutePolicy {
    RotateKeys,
    RotateModel,
    KeyThenModel,
    ModelThenKey,
}

impl RoutePolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "k" => Some(RoutePolicy::RotateKeys),
            "m" => Some(RoutePolicy::RotateModel),
            "km" => Some(RoutePolicy::KeyThenModel),
            "mk" => Some(RoutePolicy::ModelThenKey),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Route {
    pub name: String,
    pub policy: RoutePolicy,
    pub ordered_elements: Vec<String>,
}

impl Route {
    pub fn new(name: impl Into<String>, policy: RoutePolicy) -> Self {
        Route {
            name: name.into(),
            policy,
            ordered_elements: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PlanningPhase {
    pub tool_call_count: u32,
    pub file_write_count: u32,
}

/// Per-session mutable state. Every mutating command call produces a new
/// version of this value (cloned then replaced under the session's lock).
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub override_backend: Option<String>,
    pub override_model: Option<String>,
    /// One level of undo for `unset(backend)`: the value immediately prior to
    /// the most recent `set(backend=…)`.
    pub prior_override_backend: Option<Option<String>>,
    /// One level of undo for `unset(model)`.
    pub prior_override_model: Option<Option<String>>,
    pub project: Option<String>,
    pub project_dir: Option<String>,
    pub interactive_mode: bool,
    pub reasoning_mode: Option<String>,
    pub failover_routes: HashMap<String, Route>,
    pub oneoff_route: Option<String>,
    pub api_url_overrides: HashMap<String, String>,
    pub planning_phase: PlanningPhase,
    pub agent: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Interaction {
    pub handler: String,
    pub backend: Option<String>,
    pub model: Option<String>,
    pub tokens: Option<u32>,
    pub at: u64,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub created_at: u64,
    pub last_activity: u64,
    pub state: SessionState,
    pub history: Vec<Interaction>,
}

impl Session {
    pub fn new(id: SessionId) -> Self {
        let now = now_epoch_secs();
        Session {
            id,
            created_at: now,
            last_activity: now,
            state: SessionState::default(),
            history: Vec::new(),
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = now_epoch_secs();
    }

    pub fn record(&mut self, interaction: Interaction) {
        self.history.push(interaction);
    }
}

pub fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
