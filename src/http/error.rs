use crate::error::{LoadError, ReadFailure, ResolutionError};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("method not implemented")]
    NotImplemented,
    #[error("{0}")]
    Unavailable(String),
    #[error("timed out waiting for the node")]
    Timeout,
}

impl HttpError {
    pub fn status(&self) -> StatusCode {
        match self {
            HttpError::NotFound(_) => StatusCode::NOT_FOUND,
            HttpError::BadRequest(_) => StatusCode::BAD_REQUEST,
            HttpError::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            HttpError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            HttpError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.to_string() });
        (self.status(), Json(body)).into_response()
    }
}

impl From<ResolutionError> for HttpError {
    fn from(e: ResolutionError) -> Self {
        HttpError::NotFound(e.to_string())
    }
}

impl From<ReadFailure> for HttpError {
    fn from(e: ReadFailure) -> Self {
        HttpError::Unavailable(e.to_string())
    }
}

impl From<LoadError> for HttpError {
    fn from(e: LoadError) -> Self {
        match e {
            LoadError::Resolution(r) => r.into(),
            other => HttpError::BadRequest(other.to_string()),
        }
    }
}
