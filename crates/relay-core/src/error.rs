use std::fmt;

/// The proxy's single error taxonomy. Every component tags failures with one of
/// these variants; only the request processor and backend service branch on them.
#[derive(Debug)]
pub enum ProxyError {
    /// Validation failure, malformed schema, or input over a model's token limit.
    InvalidRequest { code: String, details: String },
    /// Missing/invalid API key, or an OAuth refresh that failed.
    AuthenticationFailed(String),
    /// 429 from upstream. `retry_after` is the upstream-reported backoff in seconds.
    RateLimited { retry_after: Option<u64> },
    /// 5xx, network failure, or timeout talking to an upstream.
    UpstreamTransient(String),
    /// The requested model is not served by the resolved connector.
    ModelNotSupported(String),
    /// Every step of a dispatch plan failed.
    BackendExhausted { attempts: Vec<String> },
    /// The loop detector terminated a stream mid-flight.
    LoopDetected,
    /// The assembled response had no content and no tool calls after recovery retries.
    EmptyResponse,
    /// The request-scoped cancel signal fired; no body is sent.
    Cancelled,
    /// Anything else. Message is redacted before it reaches a client.
    Internal(String),
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::InvalidRequest { code, details } => {
                write!(f, "invalid request ({code}): {details}")
            }
            ProxyError::AuthenticationFailed(e) => write!(f, "authentication failed: {e}"),
            ProxyError::RateLimited { retry_after } => match retry_after {
                Some(s) => write!(f, "rate limited, retry after {s}s"),
                None => write!(f, "rate limited"),
            },
            ProxyError::UpstreamTransient(e) => write!(f, "upstream transient error: {e}"),
            ProxyError::ModelNotSupported(m) => write!(f, "model not supported: {m}"),
            ProxyError::BackendExhausted { attempts } => {
                write!(f, "backend exhausted after attempts: {}", attempts.join("; "))
            }
            ProxyError::LoopDetected => write!(f, "loop detected in streamed response"),
            ProxyError::EmptyResponse => write!(f, "empty response from backend"),
            ProxyError::Cancelled => write!(f, "request cancelled"),
            ProxyError::Internal(e) => write!(f, "internal error: {e}"),
        }
    }
}

impl std::error::Error for ProxyError {}

impl ProxyError {
    pub fn invalid(code: &str, details: impl Into<String>) -> Self {
        ProxyError::InvalidRequest {
            code: code.to_string(),
            details: details.into(),
        }
    }

    /// HTTP status code this error maps to at the service edge (spec error taxonomy table).
    pub fn status_code(&self) -> u16 {
        match self {
            ProxyError::InvalidRequest { .. } => 400,
            ProxyError::AuthenticationFailed(_) => 401,
            ProxyError::RateLimited { .. } => 429,
            ProxyError::UpstreamTransient(_) => 502,
            ProxyError::ModelNotSupported(_) => 404,
            ProxyError::BackendExhausted { .. } => 503,
            ProxyError::LoopDetected => 200,
            ProxyError::EmptyResponse => 200,
            ProxyError::Cancelled => 499,
            ProxyError::Internal(_) => 500,
        }
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            ProxyError::UpstreamTransient(err.to_string())
        } else {
            ProxyError::Internal(err.to_string())
        }
    }
}

impl From<http::Error> for ProxyError {
    fn from(err: http::Error) -> Self {
        ProxyError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for ProxyError {
    fn from(err: serde_json::Error) -> Self {
        ProxyError::invalid(
            "invalid_json",
            format!("{err} at line {} column {}", err.line(), err.column()),
        )
    }
}

impl From<url::ParseError> for ProxyError {
    fn from(err: url::ParseError) -> Self {
        ProxyError::invalid("invalid_url", err.to_string())
    }
}
