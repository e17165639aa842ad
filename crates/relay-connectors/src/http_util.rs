//! Upstream HTTP-error classification, grounded on the teacher's
//! `handle_http_error!` macro: turn a non-2xx response into the proxy's
//! error taxonomy, pulling a retry hint and a human message out of whatever
//! shape the upstream gave us.

use reqwest::header::HeaderMap;
use reqwest::StatusCode;

use relay_core::ProxyError;

pub fn classify_error(status: StatusCode, headers: &HeaderMap, body: &str) -> ProxyError {
    let message = extract_message(body).unwrap_or_else(|| body.to_string());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProxyError::AuthenticationFailed(message),
        StatusCode::TOO_MANY_REQUESTS => ProxyError::RateLimited {
            retry_after: retry_after_secs(headers),
        },
        StatusCode::BAD_REQUEST => ProxyError::invalid("upstream_rejected", message),
        s if s.is_server_error() => ProxyError::UpstreamTransient(message),
        other => ProxyError::UpstreamTransient(format!("http {other}: {message}")),
    }
}

fn extract_message(body: &str) -> Option<String> {
    let parsed: serde_json::Value = serde_json::from_str(body).ok()?;
    parsed
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(String::from)
}

fn retry_after_secs(headers: &HeaderMap) -> Option<u64> {
    if let Some(v) = headers.get("retry-after").and_then(|v| v.to_str().ok()) {
        if let Ok(secs) = v.parse::<u64>() {
            return Some(secs);
        }
    }
    headers
        .get("x-ratelimit-reset-requests")
        .and_then(|v| v.to_str().ok())
        .and_then(parse_duration_string)
}

/// Some providers report quota resets as a duration string ("1.5s", "20ms")
/// rather than a plain second count.
fn parse_duration_string(s: &str) -> Option<u64> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        return ms.parse::<f64>().ok().map(|v| (v / 1000.0).ceil() as u64);
    }
    if let Some(secs) = s.strip_suffix('s') {
        return secs.parse::<f64>().ok().map(|v| v.ceil() as u64);
    }
    s.parse::<u64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_429_with_retry_after() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", "3".parse().unwrap());
        let err = classify_error(StatusCode::TOO_MANY_REQUESTS, &headers, "{}");
        match err {
            ProxyError::RateLimited { retry_after } => assert_eq!(retry_after, Some(3)),
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn extracts_nested_error_message() {
        let body = r#"{"error": {"message": "bad key", "type": "invalid_request_error"}}"#;
        let err = classify_error(StatusCode::UNAUTHORIZED, &HeaderMap::new(), body);
        match err {
            ProxyError::AuthenticationFailed(msg) => assert_eq!(msg, "bad key"),
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn parses_millisecond_reset_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-reset-requests", "500ms".parse().unwrap());
        let err = classify_error(StatusCode::TOO_MANY_REQUESTS, &headers, "{}");
        match err {
            ProxyError::RateLimited { retry_after } => assert_eq!(retry_after, Some(1)),
            other => panic!("unexpected: {other}"),
        }
    }
}
