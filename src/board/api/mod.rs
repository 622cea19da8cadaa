//! HTTP surface of the board.
//!
//! Each resource lives in its own submodule exposing a `routes()` router;
//! [`api_router`] merges them. Handlers authenticate through the
//! [`AuthUser`](super::auth::AuthUser) extractor, hop onto the blocking pool
//! through [`DbHandle::call`], and let `?` turn store errors into
//! [`ApiError`] responses.

mod auth;
mod projects;
mod sprints;
mod tasks;
mod teams;

use std::sync::{Arc, LazyLock};

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

use super::auth::JwtKeys;
use super::clock;
use super::db::DbHandle;
use crate::errors::BoardError;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub jwt: JwtKeys,
}

pub type SharedState = Arc<AppState>;

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    BadRequest(String),
    Validation(Vec<FieldError>),
    Internal(String),
}

impl ApiError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::BadRequest(_) | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            Self::Validation(errors) => {
                serde_json::json!({"errors": errors, "status": status.as_u16()})
            }
            Self::Internal(detail) => {
                tracing::error!(error = %detail, "request failed");
                serde_json::json!({"error": "Internal server error", "status": status.as_u16()})
            }
            Self::Unauthorized(msg)
            | Self::Forbidden(msg)
            | Self::NotFound(msg)
            | Self::Conflict(msg)
            | Self::BadRequest(msg) => {
                serde_json::json!({"error": msg, "status": status.as_u16()})
            }
        };
        (status, Json(body)).into_response()
    }
}

impl From<BoardError> for ApiError {
    fn from(err: BoardError) -> Self {
        let msg = err.to_string();
        match err {
            BoardError::UserNotFound
            | BoardError::TeamNotFound
            | BoardError::ProjectNotFound
            | BoardError::SprintNotFound
            | BoardError::TaskNotFound
            | BoardError::MemberNotFound => Self::NotFound(msg),
            BoardError::Unauthorized(_) => Self::Unauthorized(msg),
            BoardError::Forbidden(_) => Self::Forbidden(msg),
            BoardError::Conflict(_) => Self::Conflict(msg),
            BoardError::Invalid(_) => Self::BadRequest(msg),
            BoardError::LockPoisoned => Self::Internal(msg),
        }
    }
}

/// Store calls return `anyhow::Error`; business-rule failures inside it
/// carry a `BoardError` that picks the status code.
impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<BoardError>() {
            Ok(board) => board.into(),
            Err(other) => Self::Internal(format!("{:#}", other)),
        }
    }
}

// ── Validation ────────────────────────────────────────────────────────

static EMAIL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());

pub fn is_valid_email(value: &str) -> bool {
    EMAIL_REGEX.is_match(value)
}

/// Collects field errors so a request reports all of them at once.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<FieldError>,
}

impl Validator {
    pub fn check(&mut self, ok: bool, field: &str, message: &str) -> &mut Self {
        if !ok {
            self.errors.push(FieldError {
                field: field.to_string(),
                message: message.to_string(),
            });
        }
        self
    }

    pub fn not_blank(&mut self, field: &str, value: &str, message: &str) -> &mut Self {
        self.check(!value.trim().is_empty(), field, message)
    }

    pub fn email(&mut self, field: &str, value: &str) -> &mut Self {
        self.check(is_valid_email(value), field, "Valid email is required")
    }

    /// A date in any form `clock::parse_instant` accepts.
    pub fn instant(&mut self, field: &str, value: &str, message: &str) -> &mut Self {
        self.check(clock::parse_instant(value).is_ok(), field, message)
    }

    pub fn finish(&mut self) -> Result<(), ApiError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ApiError::Validation(std::mem::take(&mut self.errors)))
        }
    }
}

/// Distinguishes an absent field (`None`) from an explicit `null`
/// (`Some(None)`). Use with `#[serde(default, deserialize_with = ...)]`.
pub(crate) fn double_option<'de, D, T>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

/// Trim a free-text field; blank becomes `None`.
pub(crate) fn clean_optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .merge(auth::routes())
        .merge(teams::routes())
        .merge(projects::routes())
        .merge(sprints::routes())
        .merge(tasks::routes())
        .route("/health", get(health_check))
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok", "timestamp": clock::now()}))
}

// ── Test support ──────────────────────────────────────────────────────
