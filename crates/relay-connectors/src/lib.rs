//! Upstream backend connectors (4.E): one [`relay_core::backend::Connector`]
//! implementation per wire protocol, sharing one reqwest client handed in at
//! construction and the HTTP-error classification in [`http_util`].

pub mod anthropic;
pub mod gemini;
pub mod http_util;
pub mod oauth;
pub mod openai;
pub mod qwen;
pub mod sse;
pub mod zai;
