//! Unified application error model and mapping helpers.
//! This module provides a common error enum used across the WebDAV surface,
//! the shard router and the remote forwarder, along with the single mapping
//! to HTTP responses applied at the protocol boundary.

use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    Auth { code: String, message: String },
    NotConfigured { code: String, message: String },
    NotFound { code: String, message: String },
    BadRequest { code: String, message: String },
    Conflict { code: String, message: String },
    Upstream { code: String, message: String },
    Config { code: String, message: String },
    Io { code: String, message: String },
    Internal { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::Auth { code, .. }
            | AppError::NotConfigured { code, .. }
            | AppError::NotFound { code, .. }
            | AppError::BadRequest { code, .. }
            | AppError::Conflict { code, .. }
            | AppError::Upstream { code, .. }
            | AppError::Config { code, .. }
            | AppError::Io { code, .. }
            | AppError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::Auth { message, .. }
            | AppError::NotConfigured { message, .. }
            | AppError::NotFound { message, .. }
            | AppError::BadRequest { message, .. }
            | AppError::Conflict { message, .. }
            | AppError::Upstream { message, .. }
            | AppError::Config { message, .. }
            | AppError::Io { message, .. }
            | AppError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn auth<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::Auth { code: code.into(), message: msg.into() } }
    pub fn not_configured<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::NotConfigured { code: code.into(), message: msg.into() } }
    pub fn not_found<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::NotFound { code: code.into(), message: msg.into() } }
    pub fn bad_request<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::BadRequest { code: code.into(), message: msg.into() } }
    pub fn conflict<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::Conflict { code: code.into(), message: msg.into() } }
    pub fn upstream<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::Upstream { code: code.into(), message: msg.into() } }
    pub fn config<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::Config { code: code.into(), message: msg.into() } }
    pub fn io<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::Io { code: code.into(), message: msg.into() } }
    pub fn internal<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::Internal { code: code.into(), message: msg.into() } }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::Auth { .. } => 401,
            AppError::NotConfigured { .. } => 503,
            AppError::NotFound { .. } => 404,
            AppError::BadRequest { .. } => 400,
            // Duplicate collection creation and unsupported methods both
            // surface as 405 on the DAV wire.
            AppError::Conflict { .. } => 405,
            AppError::Upstream { .. } => 502,
            AppError::Config { .. } => 500,
            AppError::Io { .. } => 503,
            AppError::Internal { .. } => 500,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<AppError>() {
            Ok(app) => app,
            Err(err) => AppError::Internal { code: "internal_error".into(), message: err.to_string() },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut headers = HeaderMap::new();
        if matches!(self, AppError::Auth { .. }) {
            headers.insert("www-authenticate", HeaderValue::from_static("Basic realm=\"davshard\""));
        }
        let body = Json(serde_json::json!({
            "status": "error",
            "code": self.code_str(),
            "message": self.message(),
        }));
        (status, headers, body).into_response()
    }
}
