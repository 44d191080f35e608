use axum::{
    extract::rejection::BytesRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectHumanError {
    #[error("failed to decode image: {0}")]
    DecodeFailed(image::ImageError),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("failed to encode image: {0}")]
    EncodeFailed(image::ImageError),
    #[error("failed to read request body: {0}")]
    RequestBody(#[from] BytesRejection),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<tokio::task::JoinError> for DetectHumanError {
    fn from(err: tokio::task::JoinError) -> Self {
        DetectHumanError::Internal(format!("detection task failed: {}", err))
    }
}

impl From<ort::Error> for DetectHumanError {
    fn from(err: ort::Error) -> Self {
        DetectHumanError::InferenceFailed(err.to_string())
    }
}

/// Body returned on any failure; it never carries `image` or `personFound`.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for DetectHumanError {
    fn into_response(self) -> Response {
        tracing::error!("Request failed: {}", self);
        let status = match &self {
            DetectHumanError::RequestBody(rejection) => rejection.status(),
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorResponse {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
