use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;

use crate::model::InferenceError;

/// Request-boundary error type. Validation failures are client-caused and
/// map to 400 with the bare `{"error": ...}` body; everything else is a
/// processing failure and maps to 500 with the `{"success": false, ...}`
/// envelope. Messages are the typed errors' Display text, never a backtrace.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Inference(#[from] InferenceError),
    #[error("Failed to store upload: {0}")]
    Upload(#[from] std::io::Error),
}

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::Inference(_) | ServiceError::Upload(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            ServiceError::Validation(message) => {
                HttpResponse::BadRequest().json(json!({ "error": message }))
            }
            other => HttpResponse::InternalServerError().json(json!({
                "success": false,
                "error": other.to_string(),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_bad_request() {
        let err = ServiceError::Validation("No image file provided".to_string());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn inference_maps_to_internal_error() {
        let err = ServiceError::Inference(InferenceError::Unavailable("model failed".to_string()));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn io_maps_to_internal_error() {
        let err = ServiceError::Upload(std::io::Error::other("disk full"));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
