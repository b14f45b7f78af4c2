//! Error mapping shared by every handler.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tether_exchange::ExchangeError;
use thiserror::Error;

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("partner unavailable: {0}")]
    BadGateway(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<ExchangeError> for ApiError {
    fn from(e: ExchangeError) -> Self {
        match e {
            ExchangeError::Validation(msg) => ApiError::BadRequest(msg),
            ExchangeError::Precondition(msg) => ApiError::Conflict(msg),
            ExchangeError::NotFound(msg) => ApiError::NotFound(msg),
            ExchangeError::RemoteDelivery(e) => ApiError::BadGateway(e.to_string()),
            other => {
                tracing::error!(error = %other, "request failed");
                ApiError::InternalServerError(other.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_exchange::RemoteError;

    fn status_of(e: ExchangeError) -> StatusCode {
        ApiError::from(e).into_response().status()
    }

    #[test]
    fn exchange_errors_map_to_status_codes() {
        assert_eq!(
            status_of(ExchangeError::Validation("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(ExchangeError::Precondition("x".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(ExchangeError::NotFound("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(ExchangeError::RemoteDelivery(RemoteError::Timeout {
                url: "http://partner.example".into()
            })),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(ExchangeError::Database(rusqlite::Error::QueryReturnedNoRows)),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn error_body_is_json() {
        let response = ApiError::Conflict("already accepted".into()).into_response();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "already accepted");
    }
}
