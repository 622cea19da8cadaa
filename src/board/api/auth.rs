use anyhow::Context;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use super::{ApiError, SharedState, Validator};
use crate::board::auth::{AuthUser, hash_password, verify_password};
use crate::board::models::User;
use crate::errors::BoardError;

#[derive(Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Serialize)]
pub struct AuthResponse {
    pub user: User,
    pub token: String,
}

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/me", get(me))
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Run password hashing on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let result = tokio::task::spawn_blocking(f)
        .await
        .context("Password task panicked")?;
    Ok(result?)
}

async fn register(
    State(state): State<SharedState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = normalize_email(&req.email);
    Validator::default()
        .email("email", &email)
        .not_blank("name", &req.name, "Name is required")
        .check(
            req.password.chars().count() >= 6,
            "password",
            "Password must be at least 6 characters",
        )
        .finish()?;

    let password = req.password;
    let hash = blocking(move || hash_password(&password)).await?;
    let name = req.name.trim().to_string();
    let user = state
        .db
        .call(move |db| db.create_user(&email, &name, &hash))
        .await?;
    let token = state.jwt.issue(&user.id, &user.email)?;

    tracing::info!(user_id = %user.id, "user registered");
    Ok((StatusCode::CREATED, Json(AuthResponse { user, token })))
}

async fn login(
    State(state): State<SharedState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = normalize_email(&req.email);
    Validator::default()
        .email("email", &email)
        .check(!req.password.is_empty(), "password", "Password is required")
        .finish()?;

    let invalid = || ApiError::from(BoardError::Unauthorized("Invalid credentials".into()));
    let credentials = state
        .db
        .call(move |db| db.find_credentials(&email))
        .await?
        .ok_or_else(invalid)?;

    let password = req.password;
    let stored = credentials.password_hash;
    let matches = blocking(move || verify_password(&password, &stored)).await?;
    if !matches {
        tracing::debug!(user_id = %credentials.user.id, "login rejected");
        return Err(invalid());
    }

    let user = credentials.user;
    let token = state.jwt.issue(&user.id, &user.email)?;
    Ok(Json(AuthResponse { user, token }))
}

async fn me(
    State(state): State<SharedState>,
    auth: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .db
        .call(move |db| db.get_user(&auth.user_id))
        .await?
        .ok_or(BoardError::UserNotFound)?;
    Ok(Json(serde_json::json!({ "user": user })))
}
