//! Error type returned by handlers.
//!
//! Client-facing messages stay generic for authentication and dependency
//! failures; details only go to the log.

use crate::{otp::OtpError, store::StoreError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Authentication required")]
    Unauthorized,

    #[error("Account locked")]
    Locked,

    #[error("Not found")]
    NotFound,

    #[error("OTP verification unavailable")]
    OtpUnavailable(#[source] OtpError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<OtpError> for AppError {
    fn from(err: OtpError) -> Self {
        Self::OtpUnavailable(err)
    }
}

impl AppError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) | Self::Store(StoreError::Conflict(_)) => StatusCode::CONFLICT,
            Self::InvalidCredentials | Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Locked => StatusCode::LOCKED,
            Self::NotFound | Self::Store(StoreError::NotFound) => StatusCode::NOT_FOUND,
            Self::OtpUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Store(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::OtpUnavailable(source) => {
                error!("OTP verification failed: {source}");
                self.to_string()
            }
            Self::Store(StoreError::Conflict(_)) => "Conflict".to_string(),
            Self::Store(StoreError::NotFound) => "Not found".to_string(),
            Self::Store(source) => {
                error!("Storage failure: {source:?}");
                "Internal server error".to_string()
            }
            Self::Internal(source) => {
                error!("Internal failure: {source:?}");
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        };

        (status, Json(json!({ "message": message }))).into_response()
    }
}
