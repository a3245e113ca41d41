// Error types: AppError for HTTP handlers, FetchError for the remote car fetch

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;

// Errors surfaced by the remote filtered-fetch operation.
// The Display text is what the listing shows the user, so keep it readable.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    // The reqwest error names the Firestore URL; it is logged, never shown
    #[error("Could not reach the car service. Please check your connection and try again.")]
    Network(#[from] reqwest::Error),
    #[error("The car service returned an error ({status}). Please try again later.")]
    Backend { status: u16 },
    #[error("Received an unexpected response from the car service.")]
    Decode(#[source] serde_json::Error),
    #[error("Error fetching cars. Please try again later.")]
    Other(#[from] anyhow::Error),
}

// Application error type returned by axum handlers
#[derive(Debug)]
pub enum AppError {
    InternalServerError(anyhow::Error),
    Unauthorized(String),
    NotFound(String),
    BadRequest(String),
}

// Implement conversion from anyhow::Error for easier error propagation
impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::InternalServerError(error)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::InternalServerError(e) => {
                // Log the detailed error here, don't expose it to the client
                tracing::error!("Internal server error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
            }
            AppError::Unauthorized(message) => {
                tracing::warn!("Unauthorized access attempt: {}", message);
                (StatusCode::UNAUTHORIZED, message)
            }
            AppError::NotFound(message) => {
                tracing::debug!("Not found: {}", message);
                (StatusCode::NOT_FOUND, message)
            }
            AppError::BadRequest(message) => {
                tracing::debug!("Bad request: {}", message);
                (StatusCode::BAD_REQUEST, message)
            }
        };

        (status, Json(json!({ "success": false, "error": error_message }))).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_error_messages_are_user_facing() {
        let err = FetchError::Backend { status: 503 };
        assert_eq!(
            err.to_string(),
            "The car service returned an error (503). Please try again later."
        );
        let err = FetchError::Other(anyhow::anyhow!("token refresh failed"));
        assert_eq!(err.to_string(), "Error fetching cars. Please try again later.");
    }

    #[test]
    fn network_error_message_hides_request_details() {
        let source = reqwest::Client::new()
            .get("https://secret-project:notaport/documents")
            .build()
            .unwrap_err();
        let message = FetchError::from(source).to_string();
        assert_eq!(message, "Could not reach the car service. Please check your connection and try again.");
        assert!(!message.contains("secret-project"));
    }

    #[test]
    fn app_error_status_codes() {
        assert_eq!(AppError::NotFound("x".into()).into_response().status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::BadRequest("x".into()).into_response().status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::Unauthorized("x".into()).into_response().status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AppError::InternalServerError(anyhow::anyhow!("boom")).into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
