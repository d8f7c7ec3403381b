use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt::Display;
use thiserror::Error;

use crate::store::StoreError;

pub type AppResult<T> = Result<T, AppError>;

pub type CrmResult<T> = Result<T, CrmError>;

/// Failures of engine operations. Everything except `Store` is terminal for
/// the request that produced it.
#[derive(Debug, Error)]
pub enum CrmError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Forbidden(String),
    #[error("authentication required")]
    Unauthenticated,
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error("store unavailable: {0}")]
    Store(#[from] StoreError),
}

impl CrmError {
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            CrmError::NotFound(_) => "not_found",
            CrmError::Forbidden(_) => "forbidden",
            CrmError::Unauthenticated => "unauthenticated",
            CrmError::Conflict(_) => "conflict",
            CrmError::InvalidInput(_) => "invalid_input",
            CrmError::Store(_) => "store_unavailable",
        }
    }

    /// Conflicts may succeed after a re-read; store failures after a backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CrmError::Store(_) | CrmError::Conflict(_))
    }
}

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_input", message)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthenticated", "unauthorized")
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", "resource not found")
    }

    /// Logs the cause; the client only sees a generic message.
    pub fn internal<E: Display>(error: E) -> Self {
        tracing::error!(error = %error, "internal error");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            "internal error",
        )
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.message,
            code: self.code,
        });
        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
}

impl From<CrmError> for AppError {
    fn from(value: CrmError) -> Self {
        let code = value.code();
        let status = match &value {
            CrmError::NotFound(_) => StatusCode::NOT_FOUND,
            CrmError::Forbidden(_) => StatusCode::FORBIDDEN,
            CrmError::Unauthenticated => StatusCode::UNAUTHORIZED,
            CrmError::Conflict(_) => StatusCode::CONFLICT,
            CrmError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            CrmError::Store(err) => {
                tracing::error!(error = %err, "store operation failed");
                return AppError::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    code,
                    "store temporarily unavailable, retry later",
                );
            }
        };
        AppError::new(status, code, value.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(value: StoreError) -> Self {
        AppError::from(CrmError::from(value))
    }
}

impl From<JsonRejection> for AppError {
    fn from(value: JsonRejection) -> Self {
        AppError::bad_request(value.body_text())
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(value: jsonwebtoken::errors::Error) -> Self {
        AppError::internal(value)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        AppError::internal(value)
    }
}
