//! Typed domain errors for the sprint board.
//!
//! The storage layer works in `anyhow::Result`; business-rule failures are
//! raised as `BoardError` inside that `anyhow::Error` so the HTTP layer can
//! downcast and pick a status code.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BoardError {
    #[error("User not found")]
    UserNotFound,

    #[error("Team not found")]
    TeamNotFound,

    #[error("Project not found")]
    ProjectNotFound,

    #[error("Sprint not found")]
    SprintNotFound,

    #[error("Task not found")]
    TaskNotFound,

    #[error("Team member not found")]
    MemberNotFound,

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Invalid(String),

    #[error("Database lock poisoned")]
    LockPoisoned,
}

impl BoardError {
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}
