use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use serde::Deserialize;

use super::{ApiError, SharedState, Validator, clean_optional, double_option};
use crate::board::auth::AuthUser;
use crate::board::models::{NewTask, TaskFilter, TaskPatch, TaskPriority, TaskStatus, TaskType};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    #[serde(default)]
    pub title: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub task_type: Option<TaskType>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub story_points: Option<i32>,
    pub assignee_id: Option<String>,
    pub labels: Option<Vec<String>>,
    pub sprint_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(rename = "type")]
    pub task_type: Option<TaskType>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    #[serde(default, deserialize_with = "double_option")]
    pub story_points: Option<Option<i32>>,
    #[serde(default, deserialize_with = "double_option")]
    pub assignee_id: Option<Option<String>>,
    pub labels: Option<Vec<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub sprint_id: Option<Option<String>>,
    pub position: Option<i32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveTaskRequest {
    pub status: Option<TaskStatus>,
    pub position: Option<i32>,
    #[serde(default, deserialize_with = "double_option")]
    pub sprint_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub assignee_id: Option<Option<String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropTaskRequest {
    #[serde(default)]
    pub over_id: String,
    #[serde(default)]
    pub viewing_active_sprint: bool,
    /// Sprint whose cards fill the columns, when not the active one.
    pub sprint_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskListQuery {
    pub status: Option<TaskStatus>,
    pub sprint_id: Option<String>,
    pub assignee_id: Option<String>,
}

#[derive(Deserialize)]
pub struct CommentRequest {
    #[serde(default)]
    pub content: String,
}

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route(
            "/api/tasks/project/{project_id}",
            get(list_tasks).post(create_task),
        )
        .route("/api/tasks/sprint/{sprint_id}", get(sprint_tasks))
        .route(
            "/api/tasks/{id}",
            get(get_task).patch(update_task).delete(delete_task),
        )
        .route("/api/tasks/{id}/move", patch(move_task))
        .route("/api/tasks/{id}/drop", post(drop_task))
        .route(
            "/api/tasks/{id}/comments",
            get(list_comments).post(add_comment),
        )
}

async fn create_task(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(project_id): Path<String>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Validator::default()
        .not_blank("title", &req.title, "Task title is required")
        .finish()?;

    let input = NewTask {
        project_id,
        sprint_id: req.sprint_id,
        title: req.title.trim().to_string(),
        description: clean_optional(req.description),
        task_type: req.task_type.unwrap_or(TaskType::Task),
        status: req.status.unwrap_or(TaskStatus::Todo),
        priority: req.priority.unwrap_or(TaskPriority::Medium),
        story_points: req.story_points,
        assignee_id: req.assignee_id,
        labels: req.labels.unwrap_or_default(),
        creator_id: auth.user_id,
    };
    let task = state.db.call(move |db| db.create_task(&input)).await?;

    tracing::info!(
        task_id = %task.task.id,
        number = task.task.task_number,
        project = %task.project_key,
        "task created"
    );
    Ok((StatusCode::CREATED, Json(task)))
}

async fn list_tasks(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(project_id): Path<String>,
    Query(query): Query<TaskListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = TaskFilter {
        status: query.status,
        sprint_id: query.sprint_id,
        assignee_id: query.assignee_id,
    };
    let tasks = state
        .db
        .call(move |db| db.list_tasks(&project_id, &auth.user_id, &filter))
        .await?;
    Ok(Json(tasks))
}

async fn sprint_tasks(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(sprint_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let tasks = state
        .db
        .call(move |db| db.sprint_tasks(&sprint_id, &auth.user_id))
        .await?;
    Ok(Json(tasks))
}

async fn get_task(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state
        .db
        .call(move |db| db.get_task_detail(&id, &auth.user_id))
        .await?;
    Ok(Json(task))
}

async fn update_task(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(title) = &req.title {
        Validator::default()
            .not_blank("title", title, "Task title is required")
            .finish()?;
    }
    let patch = TaskPatch {
        title: req.title.map(|t| t.trim().to_string()),
        description: req.description.map(clean_optional),
        task_type: req.task_type,
        status: req.status,
        priority: req.priority,
        story_points: req.story_points,
        assignee_id: req.assignee_id,
        labels: req.labels,
        sprint_id: req.sprint_id,
        position: req.position,
    };
    let task = state
        .db
        .call(move |db| db.update_task(&id, &auth.user_id, &patch))
        .await?;
    Ok(Json(task))
}

async fn move_task(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<MoveTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let patch = TaskPatch {
        status: req.status,
        position: req.position,
        sprint_id: req.sprint_id,
        assignee_id: req.assignee_id,
        ..Default::default()
    };
    let outcome = state
        .db
        .call(move |db| db.move_task(&id, &auth.user_id, &patch))
        .await?;
    Ok(Json(outcome))
}

async fn drop_task(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<DropTaskRequest>,
) -> Result<Response, ApiError> {
    Validator::default()
        .not_blank("overId", &req.over_id, "Drop target is required")
        .finish()?;

    let outcome = state
        .db
        .call(move |db| {
            db.drop_task(
                &id,
                &auth.user_id,
                &req.over_id,
                req.viewing_active_sprint,
                req.sprint_id.as_deref(),
            )
        })
        .await?;
    Ok(match outcome {
        Some(outcome) => Json(outcome).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

async fn delete_task(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .call(move |db| db.delete_task(&id, &auth.user_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_comment(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<CommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Validator::default()
        .not_blank("content", &req.content, "Comment content is required")
        .finish()?;

    let content = req.content.trim().to_string();
    let comment = state
        .db
        .call(move |db| db.add_comment(&id, &auth.user_id, &content))
        .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

async fn list_comments(
    State(state): State<SharedState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let comments = state
        .db
        .call(move |db| db.list_comments(&id, &auth.user_id))
        .await?;
    Ok(Json(comments))
}
