//! HTTP mapping for the engine error taxonomy.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use intake_core::{IntakeError, IntakeErrorCode};
use serde_json::json;

/// Wrapper turning engine errors into JSON error responses.
#[derive(Debug)]
pub struct ApiError(pub IntakeError);

impl From<IntakeError> for ApiError {
    fn from(err: IntakeError) -> Self {
        Self(err)
    }
}

fn status_for(code: IntakeErrorCode) -> StatusCode {
    match code {
        IntakeErrorCode::SourceUnknown => StatusCode::NOT_FOUND,
        IntakeErrorCode::AlreadyExists => StatusCode::CONFLICT,
        IntakeErrorCode::FsmInvalidTransition | IntakeErrorCode::InvalidConfig => {
            StatusCode::UNPROCESSABLE_ENTITY
        },
        IntakeErrorCode::QueueSaturated => StatusCode::TOO_MANY_REQUESTS,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.0.code();
        let body = Json(json!({
            "error": {
                "code": code.as_str(),
                "message": self.0.to_string(),
            }
        }));
        (status_for(code), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(status_for(IntakeErrorCode::SourceUnknown), StatusCode::NOT_FOUND);
        assert_eq!(status_for(IntakeErrorCode::AlreadyExists), StatusCode::CONFLICT);
        assert_eq!(
            status_for(IntakeErrorCode::FsmInvalidTransition),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(status_for(IntakeErrorCode::QueueSaturated), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(status_for(IntakeErrorCode::Database), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
