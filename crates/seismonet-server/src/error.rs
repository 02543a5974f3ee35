//! Taxonomy-to-HTTP error mapping with `{error, message, request_id}`
//! bodies.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

use seismonet_models::SeismoError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
    /// Seconds for the Retry-After header on 429s
    pub retry_after_s: Option<u64>,
}

impl ApiError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            kind: "unauthorized",
            message: message.into(),
            retry_after_s: None,
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            kind: "forbidden",
            message: message.into(),
            retry_after_s: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "validation",
            message: message.into(),
            retry_after_s: None,
        }
    }
}

impl From<SeismoError> for ApiError {
    fn from(err: SeismoError) -> Self {
        let (status, kind, retry_after_s) = match &err {
            SeismoError::Validation(_) => (StatusCode::BAD_REQUEST, "validation", None),
            SeismoError::RateLimited { retry_after } => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                Some(retry_after.as_secs().max(1)),
            ),
            SeismoError::Unavailable(_) | SeismoError::DeadlineExceeded => {
                (StatusCode::SERVICE_UNAVAILABLE, "unavailable", None)
            }
            SeismoError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", None),
            SeismoError::SchemaMismatch { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "schema_mismatch", None)
            }
            SeismoError::Transient(_) => (StatusCode::SERVICE_UNAVAILABLE, "transient", None),
            SeismoError::Corruption(_) | SeismoError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal", None)
            }
        };
        Self {
            status,
            kind,
            message: err.to_string(),
            retry_after_s,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let request_id = Uuid::new_v4();
        if self.status.is_server_error() {
            tracing::error!(%request_id, kind = self.kind, "{}", self.message);
        }
        let body = Json(serde_json::json!({
            "error": self.kind,
            "message": self.message,
            "request_id": request_id,
        }));
        let mut response = (self.status, body).into_response();
        if let Some(secs) = self.retry_after_s {
            if let Ok(value) = secs.to_string().parse() {
                response.headers_mut().insert("Retry-After", value);
            }
        }
        response
    }
}
