use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
};
use serde::Deserialize;

use super::{ApiError, SharedState, Validator, clean_optional, double_option};
use crate::board::auth::AuthUser;
use crate::board::models::{TeamPatch, TeamRole};

#[derive(Deserialize)]
pub struct CreateTeamRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub slug: String,
    pub description: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateTeamRequest {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
}

#[derive(Deserialize)]
pub struct AddMemberRequest {
    #[serde(default)]
    pub email: String,
    pub role: Option<TeamRole>,
}

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/api/teams", get(list_teams).post(create_team))
        .route(
            "/api/teams/{id}",
            get(get_team).patch(update_team).delete(delete_team),
        )
        .route("/api/teams/{id}/members", post(add_member))
        .route("/api/teams/{id}/members/{member_id}", delete(remove_member))
}

async fn create_team(
    State(state): State<SharedState>,
    auth: AuthUser,
    Json(req): Json<CreateTeamRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Validator::default()
        .not_blank("name", &req.name, "Team name is required")
        .not_blank("slug", &req.slug, "Team slug is required")
        .finish()?;

    let name = req.name.trim().to_string();
    let slug = req.slug.trim().to_string();
    let description = clean_optional(req.description);
    let team = state
        .db
        .call(move |db| db.create_team(&auth.user_id, &name, &slug, description.as_deref()))
        .await?;

    tracing::info!(team_id = %team.id, slug = %team.slug, "team created");
    Ok((StatusCode::CREATED, Json(team)))
}

async fn list_teams(
    State(state): State<SharedState>,
    auth: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let teams = state
        .db
        .call(move |db| db.list_teams(&auth.user_id))
        .await?;
    Ok(Json(teams))
}

async fn get_team(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let team = state
        .db
        .call(move |db| db.get_team_detail(&id, &auth.user_id))
        .await?;
    Ok(Json(team))
}

async fn update_team(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateTeamRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(name) = &req.name {
        Validator::default()
            .not_blank("name", name, "Team name is required")
            .finish()?;
    }
    let patch = TeamPatch {
        name: req.name.map(|n| n.trim().to_string()),
        description: req.description.map(clean_optional),
    };
    let team = state
        .db
        .call(move |db| db.update_team(&id, &auth.user_id, &patch))
        .await?;
    Ok(Json(team))
}

async fn delete_team(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .call(move |db| db.delete_team(&id, &auth.user_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_member(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<AddMemberRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.trim().to_lowercase();
    Validator::default().email("email", &email).finish()?;

    let role = req.role.unwrap_or(TeamRole::Member);
    let member = state
        .db
        .call(move |db| db.add_member(&id, &auth.user_id, &email, role))
        .await?;
    Ok((StatusCode::CREATED, Json(member)))
}

async fn remove_member(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path((id, member_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .call(move |db| db.remove_member(&id, &auth.user_id, &member_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
