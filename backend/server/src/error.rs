use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::warn;

use crate::views;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found")]
    NotFound,

    #[error("{message}")]
    Payload { status: StatusCode, message: String },

    #[error("Invalid anti-forgery token")]
    InvalidToken,
}

impl From<MultipartError> for AppError {
    fn from(e: MultipartError) -> Self {
        AppError::Payload {
            status: e.status(),
            message: e.body_text(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound => {
                return (StatusCode::NOT_FOUND, views::not_found()).into_response();
            }
            AppError::Payload { status, .. } => *status,
            AppError::InvalidToken => StatusCode::BAD_REQUEST,
        };

        warn!("Rejected request: {self}");
        (status, views::error_page(&self.to_string())).into_response()
    }
}
