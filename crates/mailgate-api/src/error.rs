//! HTTP error mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use mailgate_common::Error;
use serde::Serialize;
use tracing::{error, warn};

/// JSON error body
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
}

/// Error wrapper carrying the response status
pub struct ApiError {
    error: Error,
    status: StatusCode,
}

impl ApiError {
    /// Remap missing resources to 404; used by the message endpoints only
    pub fn not_found_as_404(error: Error) -> Self {
        let status = match &error {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            other => status_of(other),
        };
        Self { error, status }
    }
}

fn status_of(error: &Error) -> StatusCode {
    StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let status = status_of(&error);
        Self { error, status }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("request failed: {}", self.error);
        } else {
            warn!("request rejected: {}", self.error);
        }

        let body = ErrorBody {
            error: self.error.to_string(),
            code: self.error.code(),
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_status_mapping() {
        let api: ApiError = Error::Validation("bad".to_string()).into();
        assert_eq!(api.status, StatusCode::BAD_REQUEST);

        let api: ApiError = Error::NotFound("gone".to_string()).into();
        assert_eq!(api.status, StatusCode::BAD_REQUEST);

        let api: ApiError = Error::Internal("boom".to_string()).into();
        assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_message_endpoints_remap_not_found() {
        let api = ApiError::not_found_as_404(Error::NotFound("gone".to_string()));
        assert_eq!(api.status, StatusCode::NOT_FOUND);

        let api = ApiError::not_found_as_404(Error::Validation("bad".to_string()));
        assert_eq!(api.status, StatusCode::BAD_REQUEST);
    }
}
