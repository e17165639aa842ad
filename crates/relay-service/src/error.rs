//! Maps [`ProxyError`] onto the HTTP error surface (7. Error taxonomy):
//! the only place in the workspace that turns the canonical error enum into
//! a status code and a JSON body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::warn;

use relay_core::ProxyError;

pub struct ApiError(ProxyError);

impl From<ProxyError> for ApiError {
    fn from(err: ProxyError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            warn!(error = %self.0, "request failed");
        }
        let body = Json(json!({
            "error": {
                "message": self.0.to_string(),
                "type": error_type(&self.0),
            }
        }));
        (status, body).into_response()
    }
}

fn error_type(err: &ProxyError) -> &'static str {
    match err {
        ProxyError::InvalidRequest { .. } => "invalid_request_error",
        ProxyError::AuthenticationFailed(_) => "authentication_error",
        ProxyError::RateLimited { .. } => "rate_limit_error",
        ProxyError::UpstreamTransient(_) => "upstream_error",
        ProxyError::ModelNotSupported(_) => "model_not_found",
        ProxyError::BackendExhausted { .. } => "backend_exhausted",
        ProxyError::LoopDetected => "loop_detected",
        ProxyError::EmptyResponse => "empty_response",
        ProxyError::Cancelled => "cancelled",
        ProxyError::Internal(_) => "internal_error",
    }
}
