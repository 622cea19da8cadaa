use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;
use serde::Deserialize;

use super::{ApiError, SharedState, Validator, clean_optional, double_option};
use crate::board::auth::AuthUser;
use crate::board::clock;
use crate::board::models::{NewSprint, SprintPatch, SprintStatus};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSprintRequest {
    #[serde(default)]
    pub name: String,
    pub goal: Option<String>,
    #[serde(default)]
    pub start_date: String,
    #[serde(default)]
    pub end_date: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSprintRequest {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub goal: Option<Option<String>>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub status: Option<SprintStatus>,
}

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route(
            "/api/sprints/project/{project_id}",
            get(list_sprints).post(create_sprint),
        )
        .route(
            "/api/sprints/{id}",
            get(get_sprint).patch(update_sprint).delete(delete_sprint),
        )
        .route("/api/sprints/{id}/start", post(start_sprint))
        .route("/api/sprints/{id}/complete", post(complete_sprint))
        .route("/api/sprints/{id}/burndown", get(sprint_burndown))
}

async fn create_sprint(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(project_id): Path<String>,
    Json(req): Json<CreateSprintRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Validator::default()
        .not_blank("name", &req.name, "Sprint name is required")
        .instant("startDate", &req.start_date, "Valid start date is required")
        .instant("endDate", &req.end_date, "Valid end date is required")
        .finish()?;

    let input = NewSprint {
        name: req.name.trim().to_string(),
        goal: clean_optional(req.goal),
        start_date: clock::normalize_instant(&req.start_date)?,
        end_date: clock::normalize_instant(&req.end_date)?,
    };
    let sprint = state
        .db
        .call(move |db| db.create_sprint(&project_id, &auth.user_id, &input))
        .await?;

    tracing::info!(sprint_id = %sprint.id, project_id = %sprint.project_id, "sprint created");
    Ok((StatusCode::CREATED, Json(sprint)))
}

async fn list_sprints(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(project_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let sprints = state
        .db
        .call(move |db| db.list_sprints(&project_id, &auth.user_id))
        .await?;
    Ok(Json(sprints))
}

async fn get_sprint(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let sprint = state
        .db
        .call(move |db| db.get_sprint(&id, &auth.user_id))
        .await?;
    Ok(Json(sprint))
}

async fn update_sprint(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateSprintRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut v = Validator::default();
    if let Some(name) = &req.name {
        v.not_blank("name", name, "Sprint name is required");
    }
    if let Some(start) = &req.start_date {
        v.instant("startDate", start, "Valid start date is required");
    }
    if let Some(end) = &req.end_date {
        v.instant("endDate", end, "Valid end date is required");
    }
    v.finish()?;

    let patch = SprintPatch {
        name: req.name.map(|n| n.trim().to_string()),
        goal: req.goal.map(clean_optional),
        start_date: req
            .start_date
            .as_deref()
            .map(clock::normalize_instant)
            .transpose()?,
        end_date: req
            .end_date
            .as_deref()
            .map(clock::normalize_instant)
            .transpose()?,
        status: req.status,
    };
    let sprint = state
        .db
        .call(move |db| db.update_sprint(&id, &auth.user_id, &patch))
        .await?;
    Ok(Json(sprint))
}

async fn delete_sprint(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .call(move |db| db.delete_sprint(&id, &auth.user_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn start_sprint(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let sprint = state
        .db
        .call(move |db| db.start_sprint(&id, &auth.user_id))
        .await?;
    tracing::info!(sprint_id = %sprint.id, "sprint started");
    Ok(Json(sprint))
}

async fn complete_sprint(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let sprint = state
        .db
        .call(move |db| db.complete_sprint(&id, &auth.user_id))
        .await?;
    Ok(Json(sprint))
}

async fn sprint_burndown(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let chart = state
        .db
        .call(move |db| db.sprint_burndown(&id, &auth.user_id, Utc::now()))
        .await?;
    Ok(Json(chart))
}
