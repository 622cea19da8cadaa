use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ── Enumerations ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TeamRole {
    Admin,
    Member,
}

impl TeamRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::Member => "MEMBER",
        }
    }
}

impl std::fmt::Display for TeamRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TeamRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADMIN" => Ok(Self::Admin),
            "MEMBER" => Ok(Self::Member),
            _ => Err(format!("Invalid team role: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SprintStatus {
    Planned,
    Active,
    Completed,
}

impl SprintStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planned => "PLANNED",
            Self::Active => "ACTIVE",
            Self::Completed => "COMPLETED",
        }
    }
}

impl std::fmt::Display for SprintStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SprintStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PLANNED" => Ok(Self::Planned),
            "ACTIVE" => Ok(Self::Active),
            "COMPLETED" => Ok(Self::Completed),
            _ => Err(format!("Invalid sprint status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    Epic,
    Story,
    Task,
    Bug,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Epic => "EPIC",
            Self::Story => "STORY",
            Self::Task => "TASK",
            Self::Bug => "BUG",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EPIC" => Ok(Self::Epic),
            "STORY" => Ok(Self::Story),
            "TASK" => Ok(Self::Task),
            "BUG" => Ok(Self::Bug),
            _ => Err(format!("Invalid task type: {}", s)),
        }
    }
}

/// Workflow state of a task. `Backlog` is a status in its own right; a task
/// with no sprint is "in the backlog" regardless of status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Backlog,
    Todo,
    InProgress,
    InReview,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backlog => "BACKLOG",
            Self::Todo => "TODO",
            Self::InProgress => "IN_PROGRESS",
            Self::InReview => "IN_REVIEW",
            Self::Done => "DONE",
        }
    }

    /// Sort key matching the board's column order.
    pub fn ordinal(&self) -> u8 {
        match self {
            Self::Backlog => 0,
            Self::Todo => 1,
            Self::InProgress => 2,
            Self::InReview => 3,
            Self::Done => 4,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BACKLOG" => Ok(Self::Backlog),
            "TODO" => Ok(Self::Todo),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "IN_REVIEW" => Ok(Self::InReview),
            "DONE" => Ok(Self::Done),
            _ => Err(format!("Invalid task status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Urgent => "URGENT",
        }
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            "URGENT" => Ok(Self::Urgent),
            _ => Err(format!("Invalid task priority: {}", s)),
        }
    }
}

// ── Users ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub avatar_url: Option<String>,
    pub created_at: String,
}

/// The slice of a user embedded in other resources.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    pub email: String,
    pub name: String,
    pub avatar_url: Option<String>,
}

impl From<User> for UserSummary {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            name: user.name,
            avatar_url: user.avatar_url,
        }
    }
}

/// A user row together with its password hash. Never serialized.
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user: User,
    pub password_hash: String,
}

// ── Teams ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamMember {
    pub id: String,
    pub team_id: String,
    pub role: TeamRole,
    pub joined_at: String,
    pub user: UserSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub created_at: String,
    pub members: Vec<TeamMember>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamListItem {
    #[serde(flatten)]
    pub team: Team,
    pub project_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamDetail {
    #[serde(flatten)]
    pub team: Team,
    pub projects: Vec<ProjectWithCounts>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TeamRef {
    pub id: String,
    pub name: String,
    pub slug: String,
}

/// Editable team fields.
#[derive(Debug, Clone, Default)]
pub struct TeamPatch {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
}

// ── Projects ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub team_id: String,
    pub name: String,
    pub key: String,
    pub description: Option<String>,
    pub is_archived: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectWithCounts {
    #[serde(flatten)]
    pub project: Project,
    pub task_count: i64,
    pub sprint_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDetail {
    #[serde(flatten)]
    pub project: ProjectWithCounts,
    pub team: TeamRef,
}

#[derive(Debug, Clone, Default)]
pub struct ProjectPatch {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub is_archived: Option<bool>,
}

// ── Sprints ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Sprint {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub goal: Option<String>,
    pub start_date: String,
    pub end_date: String,
    pub status: SprintStatus,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SprintWithCounts {
    #[serde(flatten)]
    pub sprint: Sprint,
    pub task_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SprintRef {
    pub id: String,
    pub name: String,
    pub status: SprintStatus,
}

/// Input for a new sprint. Dates are canonical instants (see `clock`).
#[derive(Debug, Clone)]
pub struct NewSprint {
    pub name: String,
    pub goal: Option<String>,
    pub start_date: String,
    pub end_date: String,
}

/// Editable sprint fields. `None` leaves a field unchanged; `goal` uses a
/// nested option so it can be cleared.
#[derive(Debug, Clone, Default)]
pub struct SprintPatch {
    pub name: Option<String>,
    pub goal: Option<Option<String>>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub status: Option<SprintStatus>,
}

// ── Tasks ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub project_id: String,
    pub sprint_id: Option<String>,
    pub task_number: i64,
    pub title: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub story_points: Option<i32>,
    pub labels: Vec<String>,
    pub position: i32,
    pub creator_id: String,
    pub assignee_id: Option<String>,
    pub completed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Input for a new task. Task number, position and timestamps are assigned
/// by the store.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub project_id: String,
    pub sprint_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub story_points: Option<i32>,
    pub assignee_id: Option<String>,
    pub labels: Vec<String>,
    pub creator_id: String,
}

/// A partial update to a task. Outer `None` means "leave unchanged"; for
/// nullable fields `Some(None)` clears the value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub task_type: Option<TaskType>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub story_points: Option<Option<i32>>,
    pub assignee_id: Option<Option<String>>,
    pub labels: Option<Vec<String>>,
    pub sprint_id: Option<Option<String>>,
    pub position: Option<i32>,
}

impl TaskPatch {
    /// Produce the task as it will look after this patch. `now` stamps
    /// `updated_at` and, when the task enters `DONE`, `completed_at`.
    pub fn apply(&self, task: &Task, now: &str) -> Task {
        let mut next = task.clone();
        if let Some(title) = &self.title {
            next.title = title.clone();
        }
        if let Some(description) = &self.description {
            next.description = description.clone();
        }
        if let Some(task_type) = self.task_type {
            next.task_type = task_type;
        }
        if let Some(status) = self.status {
            next.status = status;
        }
        if let Some(priority) = self.priority {
            next.priority = priority;
        }
        if let Some(points) = self.story_points {
            next.story_points = points;
        }
        if let Some(assignee) = &self.assignee_id {
            next.assignee_id = assignee.clone();
        }
        if let Some(labels) = &self.labels {
            next.labels = labels.clone();
        }
        if let Some(sprint) = &self.sprint_id {
            next.sprint_id = sprint.clone();
        }
        if let Some(position) = self.position {
            next.position = position;
        }

        match (task.status, next.status) {
            (TaskStatus::Done, TaskStatus::Done) => {}
            (_, TaskStatus::Done) => next.completed_at = Some(now.to_string()),
            (_, _) => next.completed_at = None,
        }
        next.updated_at = now.to_string();
        next
    }
}

/// One changed field between two versions of a task, rendered the way the
/// activity log stores it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub field: &'static str,
    pub old_value: String,
    pub new_value: String,
}

fn render_opt<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(ToString::to_string).unwrap_or_default()
}

impl Task {
    /// Fields that differ between `self` and `after`, in a stable order.
    pub fn field_changes(&self, after: &Task) -> Vec<FieldChange> {
        let candidates = [
            ("title", self.title.clone(), after.title.clone()),
            (
                "description",
                render_opt(&self.description),
                render_opt(&after.description),
            ),
            (
                "type",
                self.task_type.to_string(),
                after.task_type.to_string(),
            ),
            ("status", self.status.to_string(), after.status.to_string()),
            (
                "priority",
                self.priority.to_string(),
                after.priority.to_string(),
            ),
            (
                "storyPoints",
                render_opt(&self.story_points),
                render_opt(&after.story_points),
            ),
            (
                "assigneeId",
                render_opt(&self.assignee_id),
                render_opt(&after.assignee_id),
            ),
            ("labels", self.labels.join(", "), after.labels.join(", ")),
            (
                "sprintId",
                render_opt(&self.sprint_id),
                render_opt(&after.sprint_id),
            ),
            (
                "position",
                self.position.to_string(),
                after.position.to_string(),
            ),
        ];

        candidates
            .into_iter()
            .filter(|(_, old, new)| old != new)
            .map(|(field, old_value, new_value)| FieldChange {
                field,
                old_value,
                new_value,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskView {
    #[serde(flatten)]
    pub task: Task,
    pub creator: UserSummary,
    pub assignee: Option<UserSummary>,
    pub project_key: String,
    pub comment_count: i64,
}

/// Optional filters for listing a project's tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub sprint_id: Option<String>,
    pub assignee_id: Option<String>,
}

/// Result of a kanban move. `candidates` is filled only when the move
/// should prompt for an assignee.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveOutcome {
    pub task: TaskView,
    pub assignment_required: bool,
    pub candidates: Vec<UserSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDetail {
    #[serde(flatten)]
    pub view: TaskView,
    pub sprint: Option<SprintRef>,
    pub comments: Vec<Comment>,
    pub activity_log: Vec<ActivityEntry>,
}

// ── Comments & activity ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub task_id: String,
    pub content: String,
    pub created_at: String,
    pub user: UserSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub id: String,
    pub task_id: String,
    pub user_id: String,
    pub action: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub created_at: String,
}

/// An activity entry waiting to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewActivity {
    pub action: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

impl NewActivity {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            old_value: None,
            new_value: None,
        }
    }

    pub fn change(action: impl Into<String>, old: impl Into<String>, new: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            old_value: Some(old.into()),
            new_value: Some(new.into()),
        }
    }

    pub fn with_new_value(mut self, value: impl Into<String>) -> Self {
        self.new_value = Some(value.into());
        self
    }
}

impl From<FieldChange> for NewActivity {
    fn from(change: FieldChange) -> Self {
        Self::change(
            format!("updated {}", change.field),
            change.old_value,
            change.new_value,
        )
    }
}
