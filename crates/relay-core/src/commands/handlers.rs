use crate::session::{RoutePolicy, Route, SessionState};

use super::parser::{CommandArgs, ParsedCommand};
use super::reasoning::ReasoningAliasesConfig;

/// Result of executing one command handler.
pub struct HandlerResult {
    pub user_message: String,
    pub suppress_forwarding: bool,
}

impl HandlerResult {
    fn reply(msg: impl Into<String>) -> Self {
        HandlerResult {
            user_message: msg.into(),
            suppress_forwarding: true,
        }
    }
}

pub const BANNER: &str = "Interactive LLM proxy ready. Type !/help for commands.";
pub const HELP: &str = "Commands: set(backend=,model=,openai_url=,project-dir=), unset(backend|model), oneoff(backend/model), create-failover-route, delete-failover-route, route-append, route-prepend, route-clear, route-list, list-failover-routes, max, medium, low, no-think, hello, help";

/// Dispatches one parsed command against session state. Mirrors the category
/// table in 4.C.
pub fn dispatch(
    cmd: &ParsedCommand,
    state: &mut SessionState,
    reasoning: &ReasoningAliasesConfig,
) -> HandlerResult {
    match cmd.name.as_str() {
        "set" => handle_set(&cmd.args, state),
        "unset" => handle_unset(&cmd.args, state),
        "oneoff" => handle_oneoff(&cmd.args, state),
        "create-failover-route" => handle_create_route(&cmd.args, state),
        "delete-failover-route" => handle_delete_route(&cmd.args, state),
        "route-append" => handle_route_edit(&cmd.args, state, RouteEdit::Append),
        "route-prepend" => handle_route_edit(&cmd.args, state, RouteEdit::Prepend),
        "route-clear" => handle_route_clear(&cmd.args, state),
        "route-list" => handle_route_list(&cmd.args, state),
        "list-failover-routes" => handle_list_routes(state),
        "max" | "medium" | "low" | "no-think" => handle_reasoning(&cmd.name, state, reasoning),
        "hello" => HandlerResult::reply(BANNER),
        "help" => HandlerResult::reply(HELP),
        other => HandlerResult::reply(format!("unknown command: {other}")),
    }
}

fn handle_set(args: &CommandArgs, state: &mut SessionState) -> HandlerResult {
    let mut applied = Vec::new();
    if let Some(backend) = args.get("backend") {
        state.prior_override_backend = Some(state.override_backend.clone());
        state.override_backend = Some(backend.to_string());
        applied.push(format!("backend={backend}"));
    }
    if let Some(model) = args.get("model") {
        state.prior_override_model = Some(state.override_model.clone());
        state.override_model = Some(model.to_string());
        applied.push(format!("model={model}"));
    }
    if let Some(url) = args.get("openai_url") {
        state
            .api_url_overrides
            .insert("openai".to_string(), url.to_string());
        applied.push(format!("openai_url={url}"));
    }
    if let Some(dir) = args.get("project-dir") {
        state.project_dir = Some(dir.to_string());
        applied.push(format!("project-dir={dir}"));
    }
    if applied.is_empty() {
        HandlerResult::reply("set: no recognised key")
    } else {
        HandlerResult::reply(format!("set {}", applied.join(", ")))
    }
}

fn handle_unset(args: &CommandArgs, state: &mut SessionState) -> HandlerResult {
    match args.nth(0) {
        Some("backend") => {
            state.override_backend = state.prior_override_backend.take().flatten();
            HandlerResult::reply("unset backend")
        }
        Some("model") => {
            state.override_model = state.prior_override_model.take().flatten();
            HandlerResult::reply("unset model")
        }
        _ => HandlerResult::reply("unset: expected backend or model"),
    }
}

fn handle_oneoff(args: &CommandArgs, state: &mut SessionState) -> HandlerResult {
    match args.nth(0) {
        Some(route) => {
            state.oneoff_route = Some(route.to_string());
            HandlerResult::reply(format!("one-off route set to {route}"))
        }
        None => HandlerResult::reply("oneoff: expected backend/model"),
    }
}

fn handle_create_route(args: &CommandArgs, state: &mut SessionState) -> HandlerResult {
    let (Some(name), Some(policy_raw)) = (args.nth(0), args.nth(1)) else {
        return HandlerResult::reply("create-failover-route: expected (name, policy)");
    };
    let Some(policy) = RoutePolicy::parse(policy_raw) else {
        return HandlerResult::reply(format!("unknown policy: {policy_raw}"));
    };
    state
        .failover_routes
        .insert(name.to_string(), Route::new(name, policy));
    HandlerResult::reply(format!("created route {name}"))
}

fn handle_delete_route(args: &CommandArgs, state: &mut SessionState) -> HandlerResult {
    match args.nth(0) {
        Some(name) => {
            state.failover_routes.remove(name);
            HandlerResult::reply(format!("deleted route {name}"))
        }
        None => HandlerResult::reply("delete-failover-route: expected (name)"),
    }
}

enum RouteEdit {
    Append,
    Prepend,
}

fn handle_route_edit(args: &CommandArgs, state: &mut SessionState, edit: RouteEdit) -> HandlerResult {
    let (Some(name), Some(element)) = (args.nth(0), args.nth(1)) else {
        return HandlerResult::reply("expected (name, element)");
    };
    let Some(route) = state.failover_routes.get_mut(name) else {
        return HandlerResult::reply(format!("no such route: {name}"));
    };
    match edit {
        RouteEdit::Append => route.ordered_elements.push(element.to_string()),
        RouteEdit::Prepend => route.ordered_elements.insert(0, element.to_string()),
    }
    HandlerResult::reply(format!("route {name} updated"))
}

fn handle_route_clear(args: &CommandArgs, state: &mut SessionState) -> HandlerResult {
    match args.nth(0) {
        Some(name) => match state.failover_routes.get_mut(name) {
            Some(route) => {
                route.ordered_elements.clear();
                HandlerResult::reply(format!("cleared route {name}"))
            }
            None => HandlerResult::reply(format!("no such route: {name}")),
        },
        None => HandlerResult::reply("route-clear: expected (name)"),
    }
}

fn handle_route_list(args: &CommandArgs, state: &mut SessionState) -> HandlerResult {
    match args.nth(0).and_then(|name| state.failover_routes.get(name)) {
        Some(route) => HandlerResult::reply(format!(
            "{}: [{}]",
            route.name,
            route.ordered_elements.join(", ")
        )),
        None => HandlerResult::reply("no such route"),
    }
}

fn handle_list_routes(state: &mut SessionState) -> HandlerResult {
    if state.failover_routes.is_empty() {
        return HandlerResult::reply("no failover routes defined");
    }
    let names: Vec<_> = state.failover_routes.keys().cloned().collect();
    HandlerResult::reply(names.join(", "))
}

fn handle_reasoning(
    mode: &str,
    state: &mut SessionState,
    reasoning: &ReasoningAliasesConfig,
) -> HandlerResult {
    let model = state
        .override_model
        .clone()
        .unwrap_or_else(|| "default".to_string());
    match reasoning.mode_for(&model, mode) {
        Some(_) => {
            state.reasoning_mode = Some(mode.to_string());
            HandlerResult::reply(format!("reasoning mode set to {mode} for {model}"))
        }
        None => {
            // Open question resolved in DESIGN.md: the session is not invalidated,
            // the reasoning mode simply isn't applied.
            HandlerResult::reply(format!("no reasoning alias for model {model}"))
        }
    }
}
