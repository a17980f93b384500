use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::{model::ClassifierError, nutrition::LookupError, storage::StorageError};

/// Terminal failures of a capture request.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("request carried no image data")]
    MissingImage,
    #[error("request body exceeds the configured limit")]
    PayloadTooLarge,
    #[error("image payload is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Prediction(#[from] ClassifierError),
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error("classification task aborted: {0}")]
    Internal(#[from] tokio::task::JoinError),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::MissingImage | AppError::PayloadTooLarge => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message exposed to the client; internal detail stays in the logs.
    pub fn public_message(&self) -> &'static str {
        match self {
            AppError::MissingImage => "Image data is required",
            AppError::PayloadTooLarge => "Image payload is too large",
            AppError::Decode(_) | AppError::Storage(_) => "Failed to save image",
            AppError::Prediction(_) => "Food prediction failed",
            AppError::Lookup(LookupError::NotFound(_)) => "No food items found",
            AppError::Lookup(_) => "Unable to fetch nutrition information",
            AppError::Internal(_) => "Internal server error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "capture request failed");
        } else {
            warn!(error = %self, "capture request rejected");
        }

        (status, Json(json!({ "error": self.public_message() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_and_messages() {
        let missing = AppError::MissingImage;
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
        assert_eq!(missing.public_message(), "Image data is required");

        let too_large = AppError::PayloadTooLarge;
        assert_eq!(too_large.status(), StatusCode::BAD_REQUEST);
        assert_eq!(too_large.public_message(), "Image payload is too large");

        let not_found = AppError::from(LookupError::NotFound("apple_pie".into()));
        assert_eq!(not_found.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(not_found.public_message(), "No food items found");

        let prediction = AppError::from(ClassifierError::EmptyOutput);
        assert_eq!(prediction.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(prediction.public_message(), "Food prediction failed");

        let storage = AppError::from(StorageError::Write {
            path: "/nowhere/x.jpg".into(),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        });
        assert_eq!(storage.public_message(), "Failed to save image");
    }
}
