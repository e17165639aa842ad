use crate::canonical::CanonicalChatResponse;

pub const RECOVERY_MESSAGE: &str = "Please provide a valid response.";

/// If the fully assembled response has empty content and no tool calls, the
/// caller should append `RECOVERY_MESSAGE` as a user turn and re-dispatch, up
/// to `max_retries` times (4.G item 6).
pub fn needs_recovery(response: &CanonicalChatResponse) -> bool {
    response.is_empty()
}
