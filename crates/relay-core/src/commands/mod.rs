pub mod handlers;
pub mod parser;
pub mod reasoning;

use crate::canonical::{Content, Message, Part, ResponseMessage, Role, ToolCall};
use crate::session::SessionState;

use handlers::dispatch;
use parser::CommandParser;
use reasoning::ReasoningAliasesConfig;

/// Outcome of running the command engine over one request's message list.
pub struct CommandOutcome {
    pub user_message: String,
    pub suppress_forwarding: bool,
}

pub struct CommandEngine {
    parser: CommandParser,
    enabled: bool,
    reasoning: ReasoningAliasesConfig,
}

impl CommandEngine {
    pub fn new(prefix: &str, enabled: bool, reasoning: ReasoningAliasesConfig) -> Self {
        CommandEngine {
            parser: CommandParser::new(prefix),
            enabled,
            reasoning,
        }
    }

    /// Scans `messages` in place: strips every command occurrence, executes at
    /// most the first one against `state`, and deletes messages left empty.
    /// Returns `Some` only when a command was actually executed.
    pub fn process(&self, messages: &mut Vec<Message>, state: &mut SessionState) -> Option<CommandOutcome> {
        let outcome = if self.enabled {
            self.find_first_command(messages)
                .map(|cmd| dispatch(&cmd, state, &self.reasoning))
                .map(|result| CommandOutcome {
                    user_message: result.user_message,
                    suppress_forwarding: result.suppress_forwarding,
                })
        } else {
            None
        };

        self.strip_all_commands(messages);
        outcome
    }

    fn find_first_command(&self, messages: &[Message]) -> Option<parser::ParsedCommand> {
        for message in messages {
            let Some(content) = &message.content else {
                continue;
            };
            match content {
                Content::Text(text) => {
                    if let Some(cmd) = self.parser.scan(text).into_iter().next() {
                        return Some(cmd);
                    }
                }
                Content::Parts(parts) => {
                    for part in parts {
                        if let Part::Text { text } = part {
                            if let Some(cmd) = self.parser.scan(text).into_iter().next() {
                                return Some(cmd);
                            }
                        }
                    }
                }
            }
        }
        None
    }

    fn strip_all_commands(&self, messages: &mut Vec<Message>) {
        messages.retain_mut(|message| {
            let Some(content) = message.content.take() else {
                return true;
            };
            let stripped = match content {
                Content::Text(text) => {
                    let stripped = self.parser.strip_all(&text);
                    if stripped.trim().is_empty() {
                        None
                    } else {
                        Some(Content::Text(stripped))
                    }
                }
                Content::Parts(parts) => {
                    let remaining: Vec<Part> = parts
                        .into_iter()
                        .filter_map(|part| match part {
                            Part::Text { text } => {
                                let stripped = self.parser.strip_all(&text);
                                if stripped.trim().is_empty() {
                                    None
                                } else {
                                    Some(Part::Text { text: stripped })
                                }
                            }
                            other => Some(other),
                        })
                        .collect();
                    if remaining.is_empty() {
                        None
                    } else {
                        Some(Content::Parts(remaining))
                    }
                }
            };
            message.content = stripped;
            message.content.is_some() || message.tool_calls.is_some() || message.tool_call_id.is_some()
        });
    }
}

/// Agent-aware rendering of a command reply (4.C): `cline` over the OpenAI
/// protocol needs the reply as a tool call invoking `attempt_completion`, or
/// the agent drops it as plain assistant text.
pub fn render_command_reply(message: &str, agent: Option<&str>, is_openai_protocol: bool) -> ResponseMessage {
    if agent == Some("cline") && is_openai_protocol {
        let args = serde_json::json!({ "result": message }).to_string();
        ResponseMessage {
            role: Role::Assistant,
            content: None,
            tool_calls: Some(vec![ToolCall {
                id: "proxy_cmd_tool_call".to_string(),
                name: "attempt_completion".to_string(),
                arguments_json: args,
                index: None,
            }]),
        }
    } else {
        ResponseMessage {
            role: Role::Assistant,
            content: Some(message.to_string()),
            tool_calls: None,
        }
    }
}
