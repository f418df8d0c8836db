use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use parlor_shared::IdentifierError;
use thiserror::Error;

/// Why the router rejected a single inbound event.
///
/// Rejections are local: no shared state is touched and nothing is
/// delivered.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("Invalid sender: {0}")]
    InvalidSender(IdentifierError),

    #[error("Invalid receiver: {0}")]
    InvalidReceiver(IdentifierError),

    /// Only raised by a history backend that lives outside the process.
    #[allow(dead_code)]
    #[error("History storage unavailable: {0}")]
    StorageUnavailable(String),
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("File too large: {size} bytes (max {max})")]
    FileTooLarge { size: usize, max: usize },

    #[error("File storage error: {0}")]
    FileStorage(String),

    #[error("Routing rejected: {0}")]
    Route(#[from] RouteError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::FileNotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::FileTooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, self.to_string()),
            ServerError::FileStorage(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "File storage error".to_string(),
            ),
            ServerError::Route(RouteError::StorageUnavailable(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            ServerError::Route(_) | ServerError::BadRequest(_) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            ServerError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let not_found = ServerError::FileNotFound("x".into()).into_response();
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);

        let route = ServerError::from(RouteError::InvalidSender(IdentifierError::Empty));
        assert_eq!(route.into_response().status(), StatusCode::BAD_REQUEST);

        let storage = ServerError::from(RouteError::StorageUnavailable("down".into()));
        assert_eq!(
            storage.into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
