use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::catalog::CatalogError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Content-Type must be application/json")]
    UnsupportedMediaType,

    #[error("Request body too large")]
    PayloadTooLarge,

    #[error("Too many requests")]
    TooManyRequests,

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// Maps a catalog failure. Store errors are logged and reported as
    /// "Failed to <action>" without details.
    pub fn catalog(err: CatalogError, action: &str) -> Self {
        match err {
            CatalogError::NotFound(noun) => ApiError::NotFound(format!("{noun} not found")),
            CatalogError::Invalid(e) => ApiError::BadRequest(e.to_string()),
            CatalogError::Conflict(msg) => ApiError::Conflict(msg),
            CatalogError::Store(e) => {
                error!("Failed to {}: {:?}", action, e);
                ApiError::Internal(format!("Failed to {action}"))
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ValidationError;

    #[test]
    fn maps_catalog_errors_to_status_codes() {
        let cases = [
            (CatalogError::NotFound("Movie"), StatusCode::NOT_FOUND),
            (
                CatalogError::Invalid(ValidationError("title is required".into())),
                StatusCode::BAD_REQUEST,
            ),
            (CatalogError::Conflict("taken".into()), StatusCode::CONFLICT),
            (
                CatalogError::Store(anyhow::anyhow!("connection reset")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::catalog(err, "fetch movie").into_response().status(), status);
        }
    }

    #[test]
    fn hides_store_details() {
        let err = ApiError::catalog(
            CatalogError::Store(anyhow::anyhow!("password in uri")),
            "fetch movies",
        );
        assert_eq!(err.to_string(), "Failed to fetch movies");
    }
}
