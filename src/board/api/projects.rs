use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;

use super::{ApiError, SharedState, Validator, clean_optional, double_option};
use crate::board::auth::AuthUser;
use crate::board::models::ProjectPatch;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectRequest {
    #[serde(default)]
    pub team_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub key: String,
    pub description: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProjectRequest {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    pub is_archived: Option<bool>,
}

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/api/projects", post(create_project))
        .route("/api/projects/team/{team_id}", get(list_projects))
        .route(
            "/api/projects/{id}",
            get(get_project).patch(update_project).delete(delete_project),
        )
}

async fn create_project(
    State(state): State<SharedState>,
    auth: AuthUser,
    Json(req): Json<CreateProjectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Validator::default()
        .not_blank("name", &req.name, "Project name is required")
        .not_blank("key", &req.key, "Project key is required")
        .not_blank("teamId", &req.team_id, "Team ID is required")
        .finish()?;

    let name = req.name.trim().to_string();
    let description = clean_optional(req.description);
    let project = state
        .db
        .call(move |db| {
            db.create_project(
                &auth.user_id,
                &req.team_id,
                &name,
                &req.key,
                description.as_deref(),
            )
        })
        .await?;

    tracing::info!(project_id = %project.project.id, key = %project.project.key, "project created");
    Ok((StatusCode::CREATED, Json(project)))
}

async fn list_projects(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(team_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let projects = state
        .db
        .call(move |db| db.list_projects(&team_id, &auth.user_id))
        .await?;
    Ok(Json(projects))
}

async fn get_project(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let project = state
        .db
        .call(move |db| db.get_project_detail(&id, &auth.user_id))
        .await?;
    Ok(Json(project))
}

async fn update_project(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateProjectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(name) = &req.name {
        Validator::default()
            .not_blank("name", name, "Project name is required")
            .finish()?;
    }
    let patch = ProjectPatch {
        name: req.name.map(|n| n.trim().to_string()),
        description: req.description.map(clean_optional),
        is_archived: req.is_archived,
    };
    let project = state
        .db
        .call(move |db| db.update_project(&id, &auth.user_id, &patch))
        .await?;
    Ok(Json(project))
}

async fn delete_project(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .call(move |db| db.delete_project(&id, &auth.user_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
