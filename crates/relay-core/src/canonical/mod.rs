pub mod message;
pub mod request;
pub mod response;
pub mod stream;

pub use message::{Content, FinishReason, Message, Part, Role, ToolCall};
pub use request::{CanonicalChatRequest, ReasoningControls, ReasoningEffort, SamplingParams, Tool, ToolChoice};
pub use response::{CanonicalChatResponse, Choice, ResponseMessage, Usage};
pub use stream::{CanonicalStreamChunk, Delta, StreamChoice};
