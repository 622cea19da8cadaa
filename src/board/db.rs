use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Params, Row, params};
use uuid::Uuid;

use super::burndown::{self, Burndown, PointSample};
use super::clock;
use super::kanban::{self, BoardSnapshot};
use super::models::*;
use crate::errors::BoardError;

/// Async-safe handle to the board database.
///
/// Wraps `BoardDb` behind `Arc<Mutex>` and runs every access on tokio's
/// blocking pool via `spawn_blocking`, so synchronous SQLite I/O never ties
/// up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<BoardDb>>,
}

impl DbHandle {
    pub fn new(db: BoardDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&BoardDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| BoardError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }
}

pub struct BoardDb {
    conn: Connection,
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

impl BoardDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS users (
                    id TEXT PRIMARY KEY,
                    email TEXT NOT NULL UNIQUE,
                    name TEXT NOT NULL,
                    password_hash TEXT NOT NULL,
                    avatar_url TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS teams (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    slug TEXT NOT NULL UNIQUE,
                    description TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS team_members (
                    id TEXT PRIMARY KEY,
                    team_id TEXT NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
                    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    role TEXT NOT NULL DEFAULT 'MEMBER',
                    joined_at TEXT NOT NULL,
                    UNIQUE(team_id, user_id)
                );

                CREATE TABLE IF NOT EXISTS projects (
                    id TEXT PRIMARY KEY,
                    team_id TEXT NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    key TEXT NOT NULL,
                    description TEXT,
                    is_archived INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    UNIQUE(team_id, key)
                );

                CREATE TABLE IF NOT EXISTS sprints (
                    id TEXT PRIMARY KEY,
                    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    goal TEXT,
                    start_date TEXT NOT NULL,
                    end_date TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'PLANNED',
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS tasks (
                    id TEXT PRIMARY KEY,
                    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    sprint_id TEXT REFERENCES sprints(id) ON DELETE SET NULL,
                    task_number INTEGER NOT NULL,
                    title TEXT NOT NULL,
                    description TEXT,
                    task_type TEXT NOT NULL DEFAULT 'TASK',
                    status TEXT NOT NULL DEFAULT 'TODO',
                    priority TEXT NOT NULL DEFAULT 'MEDIUM',
                    story_points INTEGER,
                    labels TEXT NOT NULL DEFAULT '[]',
                    position INTEGER NOT NULL DEFAULT 0,
                    creator_id TEXT NOT NULL REFERENCES users(id),
                    assignee_id TEXT REFERENCES users(id) ON DELETE SET NULL,
                    completed_at TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    UNIQUE(project_id, task_number)
                );

                CREATE TABLE IF NOT EXISTS comments (
                    id TEXT PRIMARY KEY,
                    task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    content TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS activity_log (
                    id TEXT PRIMARY KEY,
                    task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    action TEXT NOT NULL,
                    old_value TEXT,
                    new_value TEXT,
                    created_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_team_members_user ON team_members(user_id);
                CREATE INDEX IF NOT EXISTS idx_projects_team ON projects(team_id);
                CREATE INDEX IF NOT EXISTS idx_sprints_project ON sprints(project_id);
                CREATE INDEX IF NOT EXISTS idx_tasks_project ON tasks(project_id);
                CREATE INDEX IF NOT EXISTS idx_tasks_sprint ON tasks(sprint_id);
                CREATE INDEX IF NOT EXISTS idx_comments_task ON comments(task_id);
                CREATE INDEX IF NOT EXISTS idx_activity_task ON activity_log(task_id);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Users ─────────────────────────────────────────────────────────

    pub fn create_user(&self, email: &str, name: &str, password_hash: &str) -> Result<User> {
        if self.find_user_by_email(email)?.is_some() {
            return Err(BoardError::conflict("Email already registered").into());
        }
        let id = new_id();
        let now = clock::now();
        self.conn
            .execute(
                "INSERT INTO users (id, email, name, password_hash, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![id, email, name, password_hash, now],
            )
            .context("Failed to insert user")?;
        self.get_user(&id)?.context("User not found after insert")
    }

    pub fn get_user(&self, id: &str) -> Result<Option<User>> {
        self.conn
            .query_row(
                "SELECT id, email, name, avatar_url, created_at FROM users WHERE id = ?1",
                params![id],
                read_user,
            )
            .optional()
            .context("Failed to query user")
    }

    pub fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.conn
            .query_row(
                "SELECT id, email, name, avatar_url, created_at FROM users WHERE email = ?1",
                params![email],
                read_user,
            )
            .optional()
            .context("Failed to query user by email")
    }

    /// The user plus stored password hash, for login.
    pub fn find_credentials(&self, email: &str) -> Result<Option<UserCredentials>> {
        self.conn
            .query_row(
                "SELECT id, email, name, avatar_url, created_at, password_hash
                 FROM users WHERE email = ?1",
                params![email],
                |row| {
                    Ok(UserCredentials {
                        user: read_user(row)?,
                        password_hash: row.get(5)?,
                    })
                },
            )
            .optional()
            .context("Failed to query credentials")
    }

    // ── Teams ─────────────────────────────────────────────────────────

    /// Create a team with `owner_id` as its first admin.
    pub fn create_team(
        &self,
        owner_id: &str,
        name: &str,
        slug: &str,
        description: Option<&str>,
    ) -> Result<Team> {
        let taken: bool = self
            .conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM teams WHERE slug = ?1",
                params![slug],
                |row| row.get(0),
            )
            .context("Failed to check team slug")?;
        if taken {
            return Err(BoardError::conflict("Team slug already exists").into());
        }

        let id = new_id();
        let now = clock::now();
        // Safety: DbHandle's Mutex already guarantees single-threaded access.
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute(
            "INSERT INTO teams (id, name, slug, description, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![id, name, slug, description, now],
        )
        .context("Failed to insert team")?;
        tx.execute(
            "INSERT INTO team_members (id, team_id, user_id, role, joined_at)
             VALUES (?1, ?2, ?3, 'ADMIN', ?4)",
            params![new_id(), id, owner_id, now],
        )
        .context("Failed to insert team owner")?;
        tx.commit().context("Failed to commit team creation")?;

        self.load_team(&id)?.context("Team not found after insert")
    }

    /// Teams the user belongs to, newest first.
    pub fn list_teams(&self, user_id: &str) -> Result<Vec<TeamListItem>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT t.id, t.name, t.slug, t.description, t.created_at,
                        (SELECT COUNT(*) FROM projects p WHERE p.team_id = t.id)
                 FROM teams t
                 JOIN team_members m ON m.team_id = t.id
                 WHERE m.user_id = ?1
                 ORDER BY t.created_at DESC, t.rowid DESC",
            )
            .context("Failed to prepare list_teams")?;
        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok((read_team(row)?, row.get::<_, i64>(5)?))
            })
            .context("Failed to query teams")?;

        let mut teams = Vec::new();
        for row in rows {
            let (mut team, project_count) = row.context("Failed to read team row")?;
            team.members = self.team_members(&team.id)?;
            teams.push(TeamListItem {
                team,
                project_count,
            });
        }
        Ok(teams)
    }

    /// Team with members and projects. Non-members see `TeamNotFound`.
    pub fn get_team_detail(&self, team_id: &str, user_id: &str) -> Result<TeamDetail> {
        if self.team_role(team_id, user_id)?.is_none() {
            return Err(BoardError::TeamNotFound.into());
        }
        let team = self.load_team(team_id)?.ok_or(BoardError::TeamNotFound)?;
        let projects = self.team_projects(team_id)?;
        Ok(TeamDetail { team, projects })
    }

    pub fn update_team(&self, team_id: &str, user_id: &str, patch: &TeamPatch) -> Result<Team> {
        self.require_admin(team_id, user_id, "Only team admins can update team details")?;

        let now = clock::now();
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        if let Some(name) = &patch.name {
            tx.execute(
                "UPDATE teams SET name = ?1, updated_at = ?2 WHERE id = ?3",
                params![name, now, team_id],
            )
            .context("Failed to update team name")?;
        }
        if let Some(description) = &patch.description {
            tx.execute(
                "UPDATE teams SET description = ?1, updated_at = ?2 WHERE id = ?3",
                params![description, now, team_id],
            )
            .context("Failed to update team description")?;
        }
        tx.commit().context("Failed to commit team update")?;

        self.load_team(team_id)?
            .ok_or_else(|| BoardError::TeamNotFound.into())
    }

    pub fn delete_team(&self, team_id: &str, user_id: &str) -> Result<()> {
        self.require_admin(team_id, user_id, "Only team admins can delete teams")?;
        self.conn
            .execute("DELETE FROM teams WHERE id = ?1", params![team_id])
            .context("Failed to delete team")?;
        Ok(())
    }

    pub fn add_member(
        &self,
        team_id: &str,
        actor_id: &str,
        email: &str,
        role: TeamRole,
    ) -> Result<TeamMember> {
        self.require_admin(team_id, actor_id, "Only team admins can add members")?;
        let user = self
            .find_user_by_email(email)?
            .ok_or(BoardError::UserNotFound)?;
        if self.team_role(team_id, &user.id)?.is_some() {
            return Err(BoardError::conflict("User is already a team member").into());
        }

        let id = new_id();
        self.conn
            .execute(
                "INSERT INTO team_members (id, team_id, user_id, role, joined_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, team_id, user.id, role.as_str(), clock::now()],
            )
            .context("Failed to insert team member")?;

        self.team_members(team_id)?
            .into_iter()
            .find(|m| m.id == id)
            .context("Team member not found after insert")
    }

    /// Remove a member. A team always keeps at least one admin.
    pub fn remove_member(&self, team_id: &str, actor_id: &str, user_id: &str) -> Result<()> {
        self.require_admin(team_id, actor_id, "Only team admins can remove members")?;
        let role = self
            .team_role(team_id, user_id)?
            .ok_or(BoardError::MemberNotFound)?;

        if role == TeamRole::Admin {
            let admins: i64 = self
                .conn
                .query_row(
                    "SELECT COUNT(*) FROM team_members WHERE team_id = ?1 AND role = 'ADMIN'",
                    params![team_id],
                    |row| row.get(0),
                )
                .context("Failed to count team admins")?;
            if admins <= 1 {
                return Err(BoardError::invalid("Cannot remove the last team admin").into());
            }
        }

        self.conn
            .execute(
                "DELETE FROM team_members WHERE team_id = ?1 AND user_id = ?2",
                params![team_id, user_id],
            )
            .context("Failed to delete team member")?;
        Ok(())
    }

    pub fn team_members(&self, team_id: &str) -> Result<Vec<TeamMember>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT m.id, m.team_id, m.role, m.joined_at, u.id, u.email, u.name, u.avatar_url
                 FROM team_members m
                 JOIN users u ON u.id = m.user_id
                 WHERE m.team_id = ?1
                 ORDER BY m.joined_at, m.rowid",
            )
            .context("Failed to prepare team_members")?;
        let rows = stmt
            .query_map(params![team_id], |row| {
                Ok(MemberRow {
                    id: row.get(0)?,
                    team_id: row.get(1)?,
                    role: row.get(2)?,
                    joined_at: row.get(3)?,
                    user: UserSummary {
                        id: row.get(4)?,
                        email: row.get(5)?,
                        name: row.get(6)?,
                        avatar_url: row.get(7)?,
                    },
                })
            })
            .context("Failed to query team members")?;
        let mut members = Vec::new();
        for row in rows {
            let r = row.context("Failed to read team member row")?;
            members.push(r.into_member()?);
        }
        Ok(members)
    }

    pub fn team_role(&self, team_id: &str, user_id: &str) -> Result<Option<TeamRole>> {
        let role: Option<String> = self
            .conn
            .query_row(
                "SELECT role FROM team_members WHERE team_id = ?1 AND user_id = ?2",
                params![team_id, user_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query team role")?;
        role.map(|r| parse_enum::<TeamRole>(&r, "team role"))
            .transpose()
    }

    fn require_admin(&self, team_id: &str, user_id: &str, message: &str) -> Result<()> {
        match self.team_role(team_id, user_id)? {
            Some(TeamRole::Admin) => Ok(()),
            _ => Err(BoardError::forbidden(message).into()),
        }
    }

    fn load_team(&self, team_id: &str) -> Result<Option<Team>> {
        let team = self
            .conn
            .query_row(
                "SELECT id, name, slug, description, created_at FROM teams WHERE id = ?1",
                params![team_id],
                read_team,
            )
            .optional()
            .context("Failed to query team")?;
        match team {
            Some(mut team) => {
                team.members = self.team_members(team_id)?;
                Ok(Some(team))
            }
            None => Ok(None),
        }
    }

    // ── Projects ──────────────────────────────────────────────────────

    /// Create a project. The key is stored upper-cased and is unique per team.
    pub fn create_project(
        &self,
        user_id: &str,
        team_id: &str,
        name: &str,
        key: &str,
        description: Option<&str>,
    ) -> Result<ProjectWithCounts> {
        if self.team_role(team_id, user_id)?.is_none() {
            return Err(
                BoardError::forbidden("You must be a team member to create projects").into(),
            );
        }
        let key = key.trim().to_uppercase();
        let taken: bool = self
            .conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM projects WHERE team_id = ?1 AND key = ?2",
                params![team_id, key],
                |row| row.get(0),
            )
            .context("Failed to check project key")?;
        if taken {
            return Err(BoardError::conflict("Project key already exists in this team").into());
        }

        let id = new_id();
        self.conn
            .execute(
                "INSERT INTO projects (id, team_id, name, key, description, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![id, team_id, name, key, description, clock::now()],
            )
            .context("Failed to insert project")?;
        self.project_with_counts(&id)?
            .context("Project not found after insert")
    }

    /// Projects of a team, newest first. Members only.
    pub fn list_projects(&self, team_id: &str, user_id: &str) -> Result<Vec<ProjectWithCounts>> {
        if self.team_role(team_id, user_id)?.is_none() {
            return Err(BoardError::forbidden("Access denied").into());
        }
        self.team_projects(team_id)
    }

    pub fn get_project_detail(&self, project_id: &str, user_id: &str) -> Result<ProjectDetail> {
        let (project, _) = self.project_access(project_id, user_id)?;
        let counts = self
            .project_with_counts(project_id)?
            .ok_or(BoardError::ProjectNotFound)?;
        let team = self
            .conn
            .query_row(
                "SELECT id, name, slug FROM teams WHERE id = ?1",
                params![project.team_id],
                |row| {
                    Ok(TeamRef {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        slug: row.get(2)?,
                    })
                },
            )
            .context("Failed to query project team")?;
        Ok(ProjectDetail {
            project: counts,
            team,
        })
    }

    pub fn update_project(
        &self,
        project_id: &str,
        user_id: &str,
        patch: &ProjectPatch,
    ) -> Result<ProjectWithCounts> {
        let (_, role) = self.project_access(project_id, user_id)?;
        if role != TeamRole::Admin {
            return Err(BoardError::forbidden("Only team admins can update projects").into());
        }

        let now = clock::now();
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        if let Some(name) = &patch.name {
            tx.execute(
                "UPDATE projects SET name = ?1, updated_at = ?2 WHERE id = ?3",
                params![name, now, project_id],
            )
            .context("Failed to update project name")?;
        }
        if let Some(description) = &patch.description {
            tx.execute(
                "UPDATE projects SET description = ?1, updated_at = ?2 WHERE id = ?3",
                params![description, now, project_id],
            )
            .context("Failed to update project description")?;
        }
        if let Some(archived) = patch.is_archived {
            tx.execute(
                "UPDATE projects SET is_archived = ?1, updated_at = ?2 WHERE id = ?3",
                params![archived, now, project_id],
            )
            .context("Failed to update project archive flag")?;
        }
        tx.commit().context("Failed to commit project update")?;

        self.project_with_counts(project_id)?
            .ok_or_else(|| BoardError::ProjectNotFound.into())
    }

    pub fn delete_project(&self, project_id: &str, user_id: &str) -> Result<()> {
        let (_, role) = self.project_access(project_id, user_id)?;
        if role != TeamRole::Admin {
            return Err(BoardError::forbidden("Only team admins can delete projects").into());
        }
        self.conn
            .execute("DELETE FROM projects WHERE id = ?1", params![project_id])
            .context("Failed to delete project")?;
        Ok(())
    }

    /// Resolve a project the user may see: missing is 404, foreign is 403.
    pub fn project_access(&self, project_id: &str, user_id: &str) -> Result<(Project, TeamRole)> {
        let project = self
            .find_project(project_id)?
            .ok_or(BoardError::ProjectNotFound)?;
        let role = self
            .team_role(&project.team_id, user_id)?
            .ok_or_else(|| BoardError::forbidden("Access denied"))?;
        Ok((project, role))
    }

    fn find_project(&self, project_id: &str) -> Result<Option<Project>> {
        self.conn
            .query_row(
                "SELECT p.id, p.team_id, p.name, p.key, p.description, p.is_archived,
                        p.created_at, p.updated_at
                 FROM projects p WHERE p.id = ?1",
                params![project_id],
                read_project,
            )
            .optional()
            .context("Failed to query project")
    }

    fn project_with_counts(&self, project_id: &str) -> Result<Option<ProjectWithCounts>> {
        self.conn
            .query_row(
                &format!("{PROJECT_COUNTS_SELECT} WHERE p.id = ?1"),
                params![project_id],
                read_project_with_counts,
            )
            .optional()
            .context("Failed to query project counts")
    }

    fn team_projects(&self, team_id: &str) -> Result<Vec<ProjectWithCounts>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{PROJECT_COUNTS_SELECT} WHERE p.team_id = ?1 ORDER BY p.created_at DESC, p.rowid DESC"
            ))
            .context("Failed to prepare team_projects")?;
        let rows = stmt
            .query_map(params![team_id], read_project_with_counts)
            .context("Failed to query projects")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read project row")
    }

    // ── Sprints ───────────────────────────────────────────────────────

    pub fn create_sprint(
        &self,
        project_id: &str,
        user_id: &str,
        input: &NewSprint,
    ) -> Result<Sprint> {
        self.project_access(project_id, user_id)?;
        check_date_order(&input.start_date, &input.end_date)?;

        let id = new_id();
        self.conn
            .execute(
                "INSERT INTO sprints (id, project_id, name, goal, start_date, end_date, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'PLANNED', ?7, ?7)",
                params![
                    id,
                    project_id,
                    input.name,
                    input.goal,
                    input.start_date,
                    input.end_date,
                    clock::now()
                ],
            )
            .context("Failed to insert sprint")?;
        self.find_sprint(&id)?.context("Sprint not found after insert")
    }

    /// Sprints of a project, latest start first.
    pub fn list_sprints(&self, project_id: &str, user_id: &str) -> Result<Vec<SprintWithCounts>> {
        self.project_access(project_id, user_id)?;
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {SPRINT_COLUMNS}, (SELECT COUNT(*) FROM tasks t WHERE t.sprint_id = s.id)
                 FROM sprints s WHERE s.project_id = ?1
                 ORDER BY s.start_date DESC, s.rowid DESC"
            ))
            .context("Failed to prepare list_sprints")?;
        let rows = stmt
            .query_map(params![project_id], |row| {
                Ok((SprintRow::read(row)?, row.get::<_, i64>(9)?))
            })
            .context("Failed to query sprints")?;
        let mut sprints = Vec::new();
        for row in rows {
            let (r, task_count) = row.context("Failed to read sprint row")?;
            sprints.push(SprintWithCounts {
                sprint: r.into_sprint()?,
                task_count,
            });
        }
        Ok(sprints)
    }

    pub fn get_sprint(&self, sprint_id: &str, user_id: &str) -> Result<SprintWithCounts> {
        let sprint = self.sprint_access(sprint_id, user_id)?;
        let task_count = self.count_sprint_tasks(sprint_id)?;
        Ok(SprintWithCounts { sprint, task_count })
    }

    /// Edit a sprint. A status change obeys the same rules as `start_sprint`
    /// and `complete_sprint`. A completed sprint keeps its status.
    pub fn update_sprint(
        &self,
        sprint_id: &str,
        user_id: &str,
        patch: &SprintPatch,
    ) -> Result<Sprint> {
        let sprint = self.sprint_access(sprint_id, user_id)?;
        let start = patch.start_date.as_deref().unwrap_or(&sprint.start_date);
        let end = patch.end_date.as_deref().unwrap_or(&sprint.end_date);
        check_date_order(start, end)?;

        let status_change = patch.status.filter(|status| *status != sprint.status);
        match status_change {
            Some(_) if sprint.status == SprintStatus::Completed => {
                return Err(BoardError::invalid("Cannot reopen a completed sprint").into());
            }
            Some(SprintStatus::Active) => self.ensure_no_active_sprint(&sprint.project_id)?,
            _ => {}
        }
        let unfinished = if status_change == Some(SprintStatus::Completed) {
            self.unfinished_tasks(sprint_id)?
        } else {
            Vec::new()
        };

        let now = clock::now();
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute(
            "UPDATE sprints SET name = ?1, goal = ?2, start_date = ?3, end_date = ?4,
                    status = ?5, updated_at = ?6
             WHERE id = ?7",
            params![
                patch.name.as_deref().unwrap_or(&sprint.name),
                patch.goal.clone().unwrap_or(sprint.goal),
                start,
                end,
                status_change.unwrap_or(sprint.status).as_str(),
                now,
                sprint_id
            ],
        )
        .context("Failed to update sprint")?;
        release_to_backlog(&tx, &unfinished, sprint_id, user_id, &now)?;
        tx.commit().context("Failed to commit sprint update")?;

        self.find_sprint(sprint_id)?
            .ok_or_else(|| BoardError::SprintNotFound.into())
    }

    /// Delete a sprint; its tasks return to the backlog.
    pub fn delete_sprint(&self, sprint_id: &str, user_id: &str) -> Result<()> {
        self.sprint_access(sprint_id, user_id)?;
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute(
            "UPDATE tasks SET sprint_id = NULL, updated_at = ?1 WHERE sprint_id = ?2",
            params![clock::now(), sprint_id],
        )
        .context("Failed to release sprint tasks")?;
        tx.execute("DELETE FROM sprints WHERE id = ?1", params![sprint_id])
            .context("Failed to delete sprint")?;
        tx.commit().context("Failed to commit sprint deletion")?;
        Ok(())
    }

    /// Activate a sprint. A project has at most one active sprint.
    pub fn start_sprint(&self, sprint_id: &str, user_id: &str) -> Result<Sprint> {
        let sprint = self.sprint_access(sprint_id, user_id)?;
        if sprint.status == SprintStatus::Completed {
            return Err(BoardError::invalid("Cannot start a completed sprint").into());
        }
        self.ensure_no_active_sprint(&sprint.project_id)?;
        self.set_sprint_status(sprint_id, SprintStatus::Active)
    }

    /// Close a sprint. Unfinished tasks leave it for the backlog, with a
    /// `sprint changed` entry in each task's activity log; DONE tasks stay.
    pub fn complete_sprint(&self, sprint_id: &str, user_id: &str) -> Result<Sprint> {
        let sprint = self.sprint_access(sprint_id, user_id)?;
        if sprint.status == SprintStatus::Completed {
            return Err(BoardError::invalid("Sprint is already completed").into());
        }

        let unfinished = self.unfinished_tasks(sprint_id)?;
        let now = clock::now();
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute(
            "UPDATE sprints SET status = 'COMPLETED', updated_at = ?1 WHERE id = ?2",
            params![now, sprint_id],
        )
        .context("Failed to complete sprint")?;
        release_to_backlog(&tx, &unfinished, sprint_id, user_id, &now)?;
        tx.commit().context("Failed to commit sprint completion")?;

        tracing::info!(
            sprint_id,
            returned_to_backlog = unfinished.len(),
            "sprint completed"
        );
        self.find_sprint(sprint_id)?
            .ok_or_else(|| BoardError::SprintNotFound.into())
    }

    pub fn sprint_burndown(
        &self,
        sprint_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Burndown> {
        let sprint = self.sprint_access(sprint_id, user_id)?;
        let tasks = self.query_tasks("WHERE t.sprint_id = ?1", params![sprint_id])?;
        let samples: Vec<PointSample> = tasks.iter().map(PointSample::from_task).collect();
        let start = clock::parse_instant(&sprint.start_date).context("Bad sprint start date")?;
        let end = clock::parse_instant(&sprint.end_date).context("Bad sprint end date")?;
        Ok(burndown::compute(&samples, start, end, now))
    }

    pub fn active_sprint(&self, project_id: &str) -> Result<Option<Sprint>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {SPRINT_COLUMNS} FROM sprints s
                     WHERE s.project_id = ?1 AND s.status = 'ACTIVE'
                     ORDER BY s.start_date LIMIT 1"
                ),
                params![project_id],
                SprintRow::read,
            )
            .optional()
            .context("Failed to query active sprint")?;
        row.map(SprintRow::into_sprint).transpose()
    }

    /// Resolve a sprint the user may see: missing is 404, foreign is 403.
    pub fn sprint_access(&self, sprint_id: &str, user_id: &str) -> Result<Sprint> {
        let sprint = self
            .find_sprint(sprint_id)?
            .ok_or(BoardError::SprintNotFound)?;
        self.project_access(&sprint.project_id, user_id)?;
        Ok(sprint)
    }

    fn find_sprint(&self, sprint_id: &str) -> Result<Option<Sprint>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {SPRINT_COLUMNS} FROM sprints s WHERE s.id = ?1"),
                params![sprint_id],
                SprintRow::read,
            )
            .optional()
            .context("Failed to query sprint")?;
        row.map(SprintRow::into_sprint).transpose()
    }

    fn ensure_no_active_sprint(&self, project_id: &str) -> Result<()> {
        if self.active_sprint(project_id)?.is_some() {
            return Err(
                BoardError::invalid("There is already an active sprint for this project").into(),
            );
        }
        Ok(())
    }

    fn unfinished_tasks(&self, sprint_id: &str) -> Result<Vec<Task>> {
        self.query_tasks(
            "WHERE t.sprint_id = ?1 AND t.status != 'DONE'",
            params![sprint_id],
        )
    }

    fn set_sprint_status(&self, sprint_id: &str, status: SprintStatus) -> Result<Sprint> {
        self.conn
            .execute(
                "UPDATE sprints SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), clock::now(), sprint_id],
            )
            .context("Failed to update sprint status")?;
        self.find_sprint(sprint_id)?
            .ok_or_else(|| BoardError::SprintNotFound.into())
    }

    fn count_sprint_tasks(&self, sprint_id: &str) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM tasks WHERE sprint_id = ?1",
                params![sprint_id],
                |row| row.get(0),
            )
            .context("Failed to count sprint tasks")
    }

    // ── Tasks ─────────────────────────────────────────────────────────

    /// Create a task at the end of its status column and log `created`.
    pub fn create_task(&self, input: &NewTask) -> Result<TaskView> {
        let (project, _) = self.project_access(&input.project_id, &input.creator_id)?;
        if let Some(sprint_id) = &input.sprint_id {
            let sprint = self.find_sprint(sprint_id)?;
            if sprint.is_none_or(|s| s.project_id != project.id) {
                return Err(BoardError::invalid("Sprint does not belong to this project").into());
            }
        }
        if let Some(assignee_id) = &input.assignee_id {
            self.ensure_member_assignee(&project.team_id, assignee_id)?;
        }

        let id = new_id();
        let now = clock::now();
        let completed_at = (input.status == TaskStatus::Done).then(|| now.clone());
        let labels = serde_json::to_string(&input.labels).context("Failed to encode labels")?;

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let task_number: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(task_number), 0) + 1 FROM tasks WHERE project_id = ?1",
                params![input.project_id],
                |row| row.get(0),
            )
            .context("Failed to get next task number")?;
        let position: i32 = tx
            .query_row(
                "SELECT COALESCE(MAX(position), -1) + 1 FROM tasks WHERE project_id = ?1 AND status = ?2",
                params![input.project_id, input.status.as_str()],
                |row| row.get(0),
            )
            .context("Failed to get next position")?;
        tx.execute(
            "INSERT INTO tasks (id, project_id, sprint_id, task_number, title, description, task_type,
                                status, priority, story_points, labels, position, creator_id, assignee_id,
                                completed_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?16)",
            params![
                id,
                input.project_id,
                input.sprint_id,
                task_number,
                input.title,
                input.description,
                input.task_type.as_str(),
                input.status.as_str(),
                input.priority.as_str(),
                input.story_points,
                labels,
                position,
                input.creator_id,
                input.assignee_id,
                completed_at,
                now
            ],
        )
        .context("Failed to insert task")?;
        insert_activity(
            &tx,
            &id,
            &input.creator_id,
            &NewActivity::new("created").with_new_value("Task created"),
            &now,
        )?;
        tx.commit().context("Failed to commit task creation")?;

        self.task_view(&id)
    }

    /// Tasks of a project ordered by position, newest first within a position.
    pub fn list_tasks(
        &self,
        project_id: &str,
        user_id: &str,
        filter: &TaskFilter,
    ) -> Result<Vec<TaskView>> {
        self.project_access(project_id, user_id)?;
        self.query_task_views(
            "WHERE t.project_id = ?1
               AND (?2 IS NULL OR t.status = ?2)
               AND (?3 IS NULL OR t.sprint_id = ?3)
               AND (?4 IS NULL OR t.assignee_id = ?4)
             ORDER BY t.position ASC, t.created_at DESC, t.rowid DESC",
            params![
                project_id,
                filter.status.map(|s| s.as_str()),
                filter.sprint_id,
                filter.assignee_id
            ],
        )
    }

    /// Tasks of a sprint grouped by workflow column, then position.
    pub fn sprint_tasks(&self, sprint_id: &str, user_id: &str) -> Result<Vec<TaskView>> {
        self.sprint_access(sprint_id, user_id)?;
        let mut tasks = self.query_task_views(
            "WHERE t.sprint_id = ?1 ORDER BY t.position ASC, t.rowid ASC",
            params![sprint_id],
        )?;
        tasks.sort_by_key(|v| (v.task.status.ordinal(), v.task.position));
        Ok(tasks)
    }

    pub fn get_task_detail(&self, task_id: &str, user_id: &str) -> Result<TaskDetail> {
        let task = self.task_access(task_id, user_id)?;
        let view = self.task_view(task_id)?;
        let sprint = match &task.sprint_id {
            Some(id) => self.find_sprint(id)?.map(|s| SprintRef {
                id: s.id,
                name: s.name,
                status: s.status,
            }),
            None => None,
        };
        Ok(TaskDetail {
            view,
            sprint,
            comments: self.comments_for(task_id)?,
            activity_log: self.recent_activity(task_id, 20)?,
        })
    }

    /// Edit task fields. Every changed field gets an `updated <field>` entry.
    pub fn update_task(&self, task_id: &str, user_id: &str, patch: &TaskPatch) -> Result<TaskView> {
        let task = self.task_access(task_id, user_id)?;
        let target = self.target_sprint(patch)?;
        kanban::check_sprint_target(&task, patch, target.as_ref())?;
        self.check_patch_assignee(&task, patch)?;

        let after = patch.apply(&task, &clock::now());
        let activity: Vec<NewActivity> = task
            .field_changes(&after)
            .into_iter()
            .map(NewActivity::from)
            .collect();
        self.persist_task_change(&after, user_id, &activity)?;
        self.task_view(task_id)
    }

    /// Move a task on the board: status, position, sprint or assignee.
    pub fn move_task(&self, task_id: &str, user_id: &str, patch: &TaskPatch) -> Result<MoveOutcome> {
        let task = self.task_access(task_id, user_id)?;
        self.apply_move(task, user_id, patch)
    }

    /// Resolve a board drop and apply it. `Ok(None)` means the drop changes
    /// nothing. `sprint_view` is the sprint whose tasks fill the columns;
    /// when absent the columns show the active sprint (if viewing it) or
    /// every task.
    pub fn drop_task(
        &self,
        task_id: &str,
        user_id: &str,
        over_id: &str,
        viewing_active_sprint: bool,
        sprint_view: Option<&str>,
    ) -> Result<Option<MoveOutcome>> {
        let task = self.task_access(task_id, user_id)?;
        let all = self.query_tasks(
            "WHERE t.project_id = ?1 ORDER BY t.position ASC, t.created_at DESC",
            params![task.project_id],
        )?;
        let active = self.active_sprint(&task.project_id)?;
        let active_id = active.as_ref().map(|s| s.id.as_str());

        let shown = sprint_view.or(if viewing_active_sprint { active_id } else { None });
        let visible: Vec<Task> = match shown {
            Some(sid) => all
                .iter()
                .filter(|t| t.sprint_id.as_deref() == Some(sid))
                .cloned()
                .collect(),
            None => all.clone(),
        };

        let board = BoardSnapshot {
            visible: &visible,
            all: &all,
            active_sprint_id: active_id,
            viewing_active_sprint,
        };
        let Some(drop) = kanban::resolve_drop(&board, task_id, over_id) else {
            tracing::debug!(task_id, over_id, "drop resolved to no-op");
            return Ok(None);
        };
        self.apply_move(task, user_id, &drop.into_patch()).map(Some)
    }

    pub fn delete_task(&self, task_id: &str, user_id: &str) -> Result<()> {
        self.task_access(task_id, user_id)?;
        self.conn
            .execute("DELETE FROM tasks WHERE id = ?1", params![task_id])
            .context("Failed to delete task")?;
        Ok(())
    }

    /// Resolve a task the user may see: missing is 404, foreign is 403.
    pub fn task_access(&self, task_id: &str, user_id: &str) -> Result<Task> {
        let task = self
            .query_tasks("WHERE t.id = ?1", params![task_id])?
            .into_iter()
            .next()
            .ok_or(BoardError::TaskNotFound)?;
        self.project_access(&task.project_id, user_id)?;
        Ok(task)
    }

    fn apply_move(&self, task: Task, user_id: &str, patch: &TaskPatch) -> Result<MoveOutcome> {
        let current = match &task.sprint_id {
            Some(id) => self.find_sprint(id)?,
            None => None,
        };
        let target = self.target_sprint(patch)?;
        kanban::check_move(&task, patch, current.as_ref(), target.as_ref())?;
        self.check_patch_assignee(&task, patch)?;

        let after = patch.apply(&task, &clock::now());
        let activity = kanban::move_activity(&task, &after);
        self.persist_task_change(&after, user_id, &activity)?;

        let assignment_required = kanban::assignment_required(&task, &after);
        let candidates = if assignment_required {
            let team_id = self.project_team_id(&task.project_id)?;
            self.team_members(&team_id)?
                .into_iter()
                .map(|m| m.user)
                .collect()
        } else {
            Vec::new()
        };
        tracing::debug!(
            task_id = %task.id,
            status = %after.status,
            assignment_required,
            "task moved"
        );

        Ok(MoveOutcome {
            task: self.task_view(&task.id)?,
            assignment_required,
            candidates,
        })
    }

    fn target_sprint(&self, patch: &TaskPatch) -> Result<Option<Sprint>> {
        match &patch.sprint_id {
            Some(Some(id)) => self.find_sprint(id),
            _ => Ok(None),
        }
    }

    fn check_patch_assignee(&self, task: &Task, patch: &TaskPatch) -> Result<()> {
        let Some(Some(assignee_id)) = &patch.assignee_id else {
            return Ok(());
        };
        let team_id = self.project_team_id(&task.project_id)?;
        self.ensure_member_assignee(&team_id, assignee_id)
    }

    fn ensure_member_assignee(&self, team_id: &str, assignee_id: &str) -> Result<()> {
        if self.team_role(team_id, assignee_id)?.is_none() {
            return Err(
                BoardError::invalid("Assignee must be a member of the project's team").into(),
            );
        }
        Ok(())
    }

    fn project_team_id(&self, project_id: &str) -> Result<String> {
        self.conn
            .query_row(
                "SELECT team_id FROM projects WHERE id = ?1",
                params![project_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query project team")?
            .ok_or_else(|| BoardError::ProjectNotFound.into())
    }

    /// Write the task row and its activity entries atomically.
    fn persist_task_change(&self, task: &Task, user_id: &str, activity: &[NewActivity]) -> Result<()> {
        let labels = serde_json::to_string(&task.labels).context("Failed to encode labels")?;
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute(
            "UPDATE tasks SET sprint_id = ?1, title = ?2, description = ?3, task_type = ?4,
                    status = ?5, priority = ?6, story_points = ?7, labels = ?8, position = ?9,
                    assignee_id = ?10, completed_at = ?11, updated_at = ?12
             WHERE id = ?13",
            params![
                task.sprint_id,
                task.title,
                task.description,
                task.task_type.as_str(),
                task.status.as_str(),
                task.priority.as_str(),
                task.story_points,
                labels,
                task.position,
                task.assignee_id,
                task.completed_at,
                task.updated_at,
                task.id
            ],
        )
        .context("Failed to update task")?;
        for entry in activity {
            insert_activity(&tx, &task.id, user_id, entry, &task.updated_at)?;
        }
        tx.commit().context("Failed to commit task update")?;
        Ok(())
    }

    fn task_view(&self, task_id: &str) -> Result<TaskView> {
        self.query_task_views("WHERE t.id = ?1", params![task_id])?
            .into_iter()
            .next()
            .ok_or_else(|| BoardError::TaskNotFound.into())
    }

    fn query_tasks<P: Params>(&self, tail: &str, params: P) -> Result<Vec<Task>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {TASK_COLUMNS} FROM tasks t {tail}"))
            .context("Failed to prepare task query")?;
        let rows = stmt
            .query_map(params, |row| TaskRow::read(row))
            .context("Failed to query tasks")?;
        let mut tasks = Vec::new();
        for row in rows {
            let r = row.context("Failed to read task row")?;
            tasks.push(r.into_task()?);
        }
        Ok(tasks)
    }

    fn query_task_views<P: Params>(&self, tail: &str, params: P) -> Result<Vec<TaskView>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{TASK_VIEW_SELECT} {tail}"))
            .context("Failed to prepare task view query")?;
        let rows = stmt
            .query_map(params, TaskViewRow::read)
            .context("Failed to query task views")?;
        let mut views = Vec::new();
        for row in rows {
            let r = row.context("Failed to read task view row")?;
            views.push(r.into_view()?);
        }
        Ok(views)
    }

    // ── Comments & activity ───────────────────────────────────────────

    /// Add a comment and log `commented` with a 100-character excerpt.
    pub fn add_comment(&self, task_id: &str, user_id: &str, content: &str) -> Result<Comment> {
        self.task_access(task_id, user_id)?;
        let id = new_id();
        let now = clock::now();
        let excerpt: String = content.chars().take(100).collect();

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute(
            "INSERT INTO comments (id, task_id, user_id, content, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![id, task_id, user_id, content, now],
        )
        .context("Failed to insert comment")?;
        insert_activity(
            &tx,
            task_id,
            user_id,
            &NewActivity::new("commented").with_new_value(excerpt),
            &now,
        )?;
        tx.commit().context("Failed to commit comment")?;

        self.comments_for(task_id)?
            .into_iter()
            .find(|c| c.id == id)
            .context("Comment not found after insert")
    }

    pub fn list_comments(&self, task_id: &str, user_id: &str) -> Result<Vec<Comment>> {
        self.task_access(task_id, user_id)?;
        self.comments_for(task_id)
    }

    fn comments_for(&self, task_id: &str) -> Result<Vec<Comment>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT c.id, c.task_id, c.content, c.created_at, u.id, u.email, u.name, u.avatar_url
                 FROM comments c
                 JOIN users u ON u.id = c.user_id
                 WHERE c.task_id = ?1
                 ORDER BY c.created_at DESC, c.rowid DESC",
            )
            .context("Failed to prepare comments query")?;
        let rows = stmt
            .query_map(params![task_id], |row| {
                Ok(Comment {
                    id: row.get(0)?,
                    task_id: row.get(1)?,
                    content: row.get(2)?,
                    created_at: row.get(3)?,
                    user: UserSummary {
                        id: row.get(4)?,
                        email: row.get(5)?,
                        name: row.get(6)?,
                        avatar_url: row.get(7)?,
                    },
                })
            })
            .context("Failed to query comments")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read comment row")
    }

    /// Most recent activity first.
    pub fn recent_activity(&self, task_id: &str, limit: i64) -> Result<Vec<ActivityEntry>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, task_id, user_id, action, old_value, new_value, created_at
                 FROM activity_log
                 WHERE task_id = ?1
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?2",
            )
            .context("Failed to prepare activity query")?;
        let rows = stmt
            .query_map(params![task_id, limit], |row| {
                Ok(ActivityEntry {
                    id: row.get(0)?,
                    task_id: row.get(1)?,
                    user_id: row.get(2)?,
                    action: row.get(3)?,
                    old_value: row.get(4)?,
                    new_value: row.get(5)?,
                    created_at: row.get(6)?,
                })
            })
            .context("Failed to query activity")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read activity row")
    }

    /// Row counts per table, for `sprintboard init`.
    pub fn table_counts(&self) -> Result<Vec<(&'static str, i64)>> {
        let tables = [
            "users",
            "teams",
            "team_members",
            "projects",
            "sprints",
            "tasks",
            "comments",
            "activity_log",
        ];
        tables
            .into_iter()
            .map(|table| -> Result<(&'static str, i64)> {
                let count: i64 = self
                    .conn
                    .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
                    .with_context(|| format!("Failed to count {table}"))?;
                Ok((table, count))
            })
            .collect()
    }
}

fn check_date_order(start: &str, end: &str) -> Result<()> {
    let start = clock::parse_instant(start).map_err(|e| BoardError::invalid(e.to_string()))?;
    let end = clock::parse_instant(end).map_err(|e| BoardError::invalid(e.to_string()))?;
    if end < start {
        return Err(BoardError::invalid("End date must be on or after the start date").into());
    }
    Ok(())
}

fn release_to_backlog(
    conn: &Connection,
    tasks: &[Task],
    sprint_id: &str,
    user_id: &str,
    at: &str,
) -> Result<()> {
    for task in tasks {
        conn.execute(
            "UPDATE tasks SET sprint_id = NULL, updated_at = ?1 WHERE id = ?2",
            params![at, task.id],
        )
        .context("Failed to return task to backlog")?;
        insert_activity(
            conn,
            &task.id,
            user_id,
            &NewActivity::change("sprint changed", sprint_id, "backlog"),
            at,
        )?;
    }
    Ok(())
}

fn insert_activity(
    conn: &Connection,
    task_id: &str,
    user_id: &str,
    entry: &NewActivity,
    at: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO activity_log (id, task_id, user_id, action, old_value, new_value, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            new_id(),
            task_id,
            user_id,
            entry.action,
            entry.old_value,
            entry.new_value,
            at
        ],
    )
    .context("Failed to insert activity entry")?;
    Ok(())
}

fn parse_enum<T: FromStr<Err = String>>(value: &str, what: &str) -> Result<T> {
    T::from_str(value)
        .map_err(|e| anyhow!(e))
        .with_context(|| format!("Failed to parse {what}"))
}

// ── Internal row helpers ──────────────────────────────────────────────

const SPRINT_COLUMNS: &str = "s.id, s.project_id, s.name, s.goal, s.start_date, s.end_date, \
                              s.status, s.created_at, s.updated_at";

const TASK_COLUMNS: &str = "t.id, t.project_id, t.sprint_id, t.task_number, t.title, \
                            t.description, t.task_type, t.status, t.priority, t.story_points, \
                            t.labels, t.position, t.creator_id, t.assignee_id, t.completed_at, \
                            t.created_at, t.updated_at";

const TASK_VIEW_SELECT: &str = "SELECT t.id, t.project_id, t.sprint_id, t.task_number, t.title, \
            t.description, t.task_type, t.status, t.priority, t.story_points, t.labels, \
            t.position, t.creator_id, t.assignee_id, t.completed_at, t.created_at, t.updated_at, \
            c.email, c.name, c.avatar_url, a.email, a.name, a.avatar_url, p.key, \
            (SELECT COUNT(*) FROM comments cm WHERE cm.task_id = t.id) \
     FROM tasks t \
     JOIN users c ON c.id = t.creator_id \
     LEFT JOIN users a ON a.id = t.assignee_id \
     JOIN projects p ON p.id = t.project_id";

const PROJECT_COUNTS_SELECT: &str = "SELECT p.id, p.team_id, p.name, p.key, p.description, \
            p.is_archived, p.created_at, p.updated_at, \
            (SELECT COUNT(*) FROM tasks t WHERE t.project_id = p.id), \
            (SELECT COUNT(*) FROM sprints s WHERE s.project_id = p.id) \
     FROM projects p";

fn read_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        avatar_url: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn read_team(row: &Row<'_>) -> rusqlite::Result<Team> {
    Ok(Team {
        id: row.get(0)?,
        name: row.get(1)?,
        slug: row.get(2)?,
        description: row.get(3)?,
        created_at: row.get(4)?,
        members: Vec::new(),
    })
}

fn read_project(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        team_id: row.get(1)?,
        name: row.get(2)?,
        key: row.get(3)?,
        description: row.get(4)?,
        is_archived: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn read_project_with_counts(row: &Row<'_>) -> rusqlite::Result<ProjectWithCounts> {
    Ok(ProjectWithCounts {
        project: read_project(row)?,
        task_count: row.get(8)?,
        sprint_count: row.get(9)?,
    })
}

struct MemberRow {
    id: String,
    team_id: String,
    role: String,
    joined_at: String,
    user: UserSummary,
}

impl MemberRow {
    fn into_member(self) -> Result<TeamMember> {
        Ok(TeamMember {
            id: self.id,
            team_id: self.team_id,
            role: parse_enum(&self.role, "team role")?,
            joined_at: self.joined_at,
            user: self.user,
        })
    }
}

struct SprintRow {
    id: String,
    project_id: String,
    name: String,
    goal: Option<String>,
    start_date: String,
    end_date: String,
    status: String,
    created_at: String,
    updated_at: String,
}

impl SprintRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project_id: row.get(1)?,
            name: row.get(2)?,
            goal: row.get(3)?,
            start_date: row.get(4)?,
            end_date: row.get(5)?,
            status: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn into_sprint(self) -> Result<Sprint> {
        Ok(Sprint {
            id: self.id,
            project_id: self.project_id,
            name: self.name,
            goal: self.goal,
            start_date: self.start_date,
            end_date: self.end_date,
            status: parse_enum(&self.status, "sprint status")?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Intermediate row struct for reading tasks from SQLite before converting
/// enum strings and the labels JSON into typed values.
struct TaskRow {
    id: String,
    project_id: String,
    sprint_id: Option<String>,
    task_number: i64,
    title: String,
    description: Option<String>,
    task_type: String,
    status: String,
    priority: String,
    story_points: Option<i32>,
    labels: String,
    position: i32,
    creator_id: String,
    assignee_id: Option<String>,
    completed_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TaskRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project_id: row.get(1)?,
            sprint_id: row.get(2)?,
            task_number: row.get(3)?,
            title: row.get(4)?,
            description: row.get(5)?,
            task_type: row.get(6)?,
            status: row.get(7)?,
            priority: row.get(8)?,
            story_points: row.get(9)?,
            labels: row.get(10)?,
            position: row.get(11)?,
            creator_id: row.get(12)?,
            assignee_id: row.get(13)?,
            completed_at: row.get(14)?,
            created_at: row.get(15)?,
            updated_at: row.get(16)?,
        })
    }

    fn into_task(self) -> Result<Task> {
        let labels: Vec<String> =
            serde_json::from_str(&self.labels).context("Failed to parse task labels JSON")?;
        Ok(Task {
            id: self.id,
            project_id: self.project_id,
            sprint_id: self.sprint_id,
            task_number: self.task_number,
            title: self.title,
            description: self.description,
            task_type: parse_enum(&self.task_type, "task type")?,
            status: parse_enum(&self.status, "task status")?,
            priority: parse_enum(&self.priority, "task priority")?,
            story_points: self.story_points,
            labels,
            position: self.position,
            creator_id: self.creator_id,
            assignee_id: self.assignee_id,
            completed_at: self.completed_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

struct TaskViewRow {
    task: TaskRow,
    creator: UserSummary,
    assignee: Option<UserSummary>,
    project_key: String,
    comment_count: i64,
}

impl TaskViewRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        let task = TaskRow::read(row)?;
        let creator = UserSummary {
            id: task.creator_id.clone(),
            email: row.get(17)?,
            name: row.get(18)?,
            avatar_url: row.get(19)?,
        };
        let assignee_email: Option<String> = row.get(20)?;
        let assignee_name: Option<String> = row.get(21)?;
        let assignee = match (task.assignee_id.clone(), assignee_email, assignee_name) {
            (Some(id), Some(email), Some(name)) => Some(UserSummary {
                id,
                email,
                name,
                avatar_url: row.get(22)?,
            }),
            _ => None,
        };
        Ok(Self {
            task,
            creator,
            assignee,
            project_key: row.get(23)?,
            comment_count: row.get(24)?,
        })
    }

    fn into_view(self) -> Result<TaskView> {
        Ok(TaskView {
            task: self.task.into_task()?,
            creator: self.creator,
            assignee: self.assignee,
            project_key: self.project_key,
            comment_count: self.comment_count,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct Fixture {
        db: BoardDb,
        owner: User,
        team: Team,
        project: ProjectWithCounts,
    }

    fn fixture() -> Result<Fixture> {
        let db = BoardDb::new_in_memory()?;
        let owner = db.create_user("owner@example.com", "Owner", "hash")?;
        let team = db.create_team(&owner.id, "Platform", "platform", None)?;
        let project = db.create_project(&owner.id, &team.id, "Web", "web", None)?;
        Ok(Fixture {
            db,
            owner,
            team,
            project,
        })
    }

    fn new_task(f: &Fixture, title: &str) -> NewTask {
        NewTask {
            project_id: f.project.project.id.clone(),
            sprint_id: None,
            title: title.into(),
            description: None,
            task_type: TaskType::Task,
            status: TaskStatus::Todo,
            priority: TaskPriority::Medium,
            story_points: None,
            assignee_id: None,
            labels: vec![],
            creator_id: f.owner.id.clone(),
        }
    }

    fn new_sprint(name: &str) -> NewSprint {
        NewSprint {
            name: name.into(),
            goal: None,
            start_date: "2024-01-01T00:00:00.000Z".into(),
            end_date: "2024-01-14T00:00:00.000Z".into(),
        }
    }

    fn board_error(err: &anyhow::Error) -> &BoardError {
        err.downcast_ref::<BoardError>()
            .unwrap_or_else(|| panic!("expected BoardError, got {err:?}"))
    }

    #[test]
    fn test_create_database_and_run_migrations() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let table_count: i32 = db.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN
             ('users', 'teams', 'team_members', 'projects', 'sprints', 'tasks', 'comments', 'activity_log')",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(table_count, 8);

        // Migrations are idempotent.
        db.run_migrations()?;
        Ok(())
    }

    #[test]
    fn test_duplicate_email_conflicts() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        db.create_user("a@example.com", "A", "hash")?;
        let err = db.create_user("a@example.com", "B", "hash").unwrap_err();
        assert!(matches!(board_error(&err), BoardError::Conflict(_)));

        let creds = db.find_credentials("a@example.com")?.expect("credentials");
        assert_eq!(creds.user.name, "A");
        assert_eq!(creds.password_hash, "hash");
        Ok(())
    }

    #[test]
    fn test_team_creator_is_admin() -> Result<()> {
        let f = fixture()?;
        assert_eq!(f.team.members.len(), 1);
        assert_eq!(f.team.members[0].role, TeamRole::Admin);
        assert_eq!(f.team.members[0].user.id, f.owner.id);

        let err = f
            .db
            .create_team(&f.owner.id, "Again", "platform", None)
            .unwrap_err();
        assert!(matches!(board_error(&err), BoardError::Conflict(_)));
        Ok(())
    }

    #[test]
    fn test_list_and_detail_are_member_scoped() -> Result<()> {
        let f = fixture()?;
        let outsider = f.db.create_user("out@example.com", "Out", "hash")?;

        let teams = f.db.list_teams(&f.owner.id)?;
        assert_eq!(teams.len(), 1);
        assert_eq!(teams[0].project_count, 1);
        assert!(f.db.list_teams(&outsider.id)?.is_empty());

        let detail = f.db.get_team_detail(&f.team.id, &f.owner.id)?;
        assert_eq!(detail.projects.len(), 1);
        assert_eq!(detail.projects[0].project.key, "WEB");

        let err = f.db.get_team_detail(&f.team.id, &outsider.id).unwrap_err();
        assert!(matches!(board_error(&err), BoardError::TeamNotFound));
        Ok(())
    }

    #[test]
    fn test_member_management_rules() -> Result<()> {
        let f = fixture()?;
        let dev = f.db.create_user("dev@example.com", "Dev", "hash")?;

        let member = f
            .db
            .add_member(&f.team.id, &f.owner.id, "dev@example.com", TeamRole::Member)?;
        assert_eq!(member.user.id, dev.id);
        assert_eq!(member.role, TeamRole::Member);

        let err = f
            .db
            .add_member(&f.team.id, &f.owner.id, "dev@example.com", TeamRole::Member)
            .unwrap_err();
        assert!(matches!(board_error(&err), BoardError::Conflict(_)));

        let err = f
            .db
            .add_member(&f.team.id, &f.owner.id, "ghost@example.com", TeamRole::Member)
            .unwrap_err();
        assert!(matches!(board_error(&err), BoardError::UserNotFound));

        // Members cannot manage the team.
        let err = f
            .db
            .remove_member(&f.team.id, &dev.id, &f.owner.id)
            .unwrap_err();
        assert!(matches!(board_error(&err), BoardError::Forbidden(_)));

        // The only admin cannot be removed.
        let err = f
            .db
            .remove_member(&f.team.id, &f.owner.id, &f.owner.id)
            .unwrap_err();
        assert!(matches!(board_error(&err), BoardError::Invalid(_)));

        f.db.remove_member(&f.team.id, &f.owner.id, &dev.id)?;
        let err = f
            .db
            .remove_member(&f.team.id, &f.owner.id, &dev.id)
            .unwrap_err();
        assert!(matches!(board_error(&err), BoardError::MemberNotFound));
        Ok(())
    }

    #[test]
    fn test_update_and_delete_team_require_admin() -> Result<()> {
        let f = fixture()?;
        let dev = f.db.create_user("dev@example.com", "Dev", "hash")?;
        f.db.add_member(&f.team.id, &f.owner.id, &dev.email, TeamRole::Member)?;

        let patch = TeamPatch {
            name: Some("Core".into()),
            description: Some(Some("Core services".into())),
        };
        let err = f.db.update_team(&f.team.id, &dev.id, &patch).unwrap_err();
        assert!(matches!(board_error(&err), BoardError::Forbidden(_)));

        let updated = f.db.update_team(&f.team.id, &f.owner.id, &patch)?;
        assert_eq!(updated.name, "Core");
        assert_eq!(updated.description.as_deref(), Some("Core services"));
        assert_eq!(updated.slug, "platform");

        f.db.delete_team(&f.team.id, &f.owner.id)?;
        assert!(f.db.list_teams(&f.owner.id)?.is_empty());
        let err = f
            .db
            .get_project_detail(&f.project.project.id, &f.owner.id)
            .unwrap_err();
        assert!(matches!(board_error(&err), BoardError::ProjectNotFound));
        Ok(())
    }

    #[test]
    fn test_project_key_is_uppercased_and_unique() -> Result<()> {
        let f = fixture()?;
        assert_eq!(f.project.project.key, "WEB");

        let err = f
            .db
            .create_project(&f.owner.id, &f.team.id, "Web 2", "Web", None)
            .unwrap_err();
        assert!(matches!(board_error(&err), BoardError::Conflict(_)));

        let outsider = f.db.create_user("out@example.com", "Out", "hash")?;
        let err = f
            .db
            .create_project(&outsider.id, &f.team.id, "Api", "API", None)
            .unwrap_err();
        assert!(matches!(board_error(&err), BoardError::Forbidden(_)));

        let err = f
            .db
            .get_project_detail(&f.project.project.id, &outsider.id)
            .unwrap_err();
        assert!(matches!(board_error(&err), BoardError::Forbidden(_)));
        Ok(())
    }

    #[test]
    fn test_project_detail_counts_and_update() -> Result<()> {
        let f = fixture()?;
        let pid = f.project.project.id.clone();
        f.db.create_sprint(&pid, &f.owner.id, &new_sprint("S1"))?;
        f.db.create_task(&new_task(&f, "one"))?;
        f.db.create_task(&new_task(&f, "two"))?;

        let detail = f.db.get_project_detail(&pid, &f.owner.id)?;
        assert_eq!(detail.project.task_count, 2);
        assert_eq!(detail.project.sprint_count, 1);
        assert_eq!(detail.team.slug, "platform");

        let updated = f.db.update_project(
            &pid,
            &f.owner.id,
            &ProjectPatch {
                is_archived: Some(true),
                ..Default::default()
            },
        )?;
        assert!(updated.project.is_archived);
        assert_eq!(updated.project.name, "Web");
        Ok(())
    }

    #[test]
    fn test_sprint_dates_must_be_ordered() -> Result<()> {
        let f = fixture()?;
        let pid = &f.project.project.id;
        let backwards = NewSprint {
            start_date: "2024-02-01T00:00:00.000Z".into(),
            end_date: "2024-01-01T00:00:00.000Z".into(),
            ..new_sprint("Backwards")
        };
        let err = f.db.create_sprint(pid, &f.owner.id, &backwards).unwrap_err();
        assert!(matches!(board_error(&err), BoardError::Invalid(_)));

        let sprint = f.db.create_sprint(pid, &f.owner.id, &new_sprint("S1"))?;
        let err = f
            .db
            .update_sprint(
                &sprint.id,
                &f.owner.id,
                &SprintPatch {
                    end_date: Some("2023-12-01T00:00:00.000Z".into()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(board_error(&err), BoardError::Invalid(_)));
        Ok(())
    }

    #[test]
    fn test_only_one_active_sprint_per_project() -> Result<()> {
        let f = fixture()?;
        let pid = &f.project.project.id;
        let s1 = f.db.create_sprint(pid, &f.owner.id, &new_sprint("S1"))?;
        let s2 = f.db.create_sprint(pid, &f.owner.id, &new_sprint("S2"))?;
        assert_eq!(s1.status, SprintStatus::Planned);

        let started = f.db.start_sprint(&s1.id, &f.owner.id)?;
        assert_eq!(started.status, SprintStatus::Active);

        let err = f.db.start_sprint(&s2.id, &f.owner.id).unwrap_err();
        assert_eq!(
            err.to_string(),
            "There is already an active sprint for this project"
        );

        f.db.complete_sprint(&s1.id, &f.owner.id)?;
        let err = f.db.start_sprint(&s1.id, &f.owner.id).unwrap_err();
        assert!(matches!(board_error(&err), BoardError::Invalid(_)));
        f.db.start_sprint(&s2.id, &f.owner.id)?;
        Ok(())
    }

    #[test]
    fn test_complete_sprint_returns_unfinished_work_to_backlog() -> Result<()> {
        let f = fixture()?;
        let pid = &f.project.project.id;
        let sprint = f.db.create_sprint(pid, &f.owner.id, &new_sprint("S1"))?;
        let open = f.db.create_task(&NewTask {
            sprint_id: Some(sprint.id.clone()),
            ..new_task(&f, "open")
        })?;
        let done = f.db.create_task(&NewTask {
            sprint_id: Some(sprint.id.clone()),
            status: TaskStatus::Done,
            ..new_task(&f, "done")
        })?;
        f.db.start_sprint(&sprint.id, &f.owner.id)?;

        let completed = f.db.complete_sprint(&sprint.id, &f.owner.id)?;
        assert_eq!(completed.status, SprintStatus::Completed);

        let open = f.db.task_access(&open.task.id, &f.owner.id)?;
        assert_eq!(open.sprint_id, None);
        let done = f.db.task_access(&done.task.id, &f.owner.id)?;
        assert_eq!(done.sprint_id.as_deref(), Some(sprint.id.as_str()));

        let log = f.db.recent_activity(&open.id, 20)?;
        assert_eq!(log[0].action, "sprint changed");
        assert_eq!(log[0].new_value.as_deref(), Some("backlog"));
        Ok(())
    }

    #[test]
    fn test_delete_sprint_releases_tasks() -> Result<()> {
        let f = fixture()?;
        let pid = &f.project.project.id;
        let sprint = f.db.create_sprint(pid, &f.owner.id, &new_sprint("S1"))?;
        let task = f.db.create_task(&NewTask {
            sprint_id: Some(sprint.id.clone()),
            ..new_task(&f, "t")
        })?;
        assert_eq!(f.db.get_sprint(&sprint.id, &f.owner.id)?.task_count, 1);

        f.db.delete_sprint(&sprint.id, &f.owner.id)?;
        let task = f.db.task_access(&task.task.id, &f.owner.id)?;
        assert_eq!(task.sprint_id, None);
        let err = f.db.get_sprint(&sprint.id, &f.owner.id).unwrap_err();
        assert!(matches!(board_error(&err), BoardError::SprintNotFound));
        Ok(())
    }

    #[test]
    fn test_create_task_numbers_and_logs() -> Result<()> {
        let f = fixture()?;
        let first = f.db.create_task(&new_task(&f, "first"))?;
        let second = f.db.create_task(&new_task(&f, "second"))?;

        assert_eq!(first.task.task_number, 1);
        assert_eq!(second.task.task_number, 2);
        assert_eq!(first.task.position, 0);
        assert_eq!(second.task.position, 1);
        assert_eq!(first.project_key, "WEB");
        assert_eq!(first.creator.id, f.owner.id);

        let log = f.db.recent_activity(&first.task.id, 20)?;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].action, "created");
        assert_eq!(log[0].new_value.as_deref(), Some("Task created"));
        Ok(())
    }

    #[test]
    fn test_create_task_checks_sprint_and_assignee() -> Result<()> {
        let f = fixture()?;
        let outsider = f.db.create_user("out@example.com", "Out", "hash")?;

        let err = f
            .db
            .create_task(&NewTask {
                assignee_id: Some(outsider.id.clone()),
                ..new_task(&f, "t")
            })
            .unwrap_err();
        assert!(matches!(board_error(&err), BoardError::Invalid(_)));

        let other = f
            .db
            .create_project(&f.owner.id, &f.team.id, "Api", "API", None)?;
        let foreign = f
            .db
            .create_sprint(&other.project.id, &f.owner.id, &new_sprint("S"))?;
        let err = f
            .db
            .create_task(&NewTask {
                sprint_id: Some(foreign.id),
                ..new_task(&f, "t")
            })
            .unwrap_err();
        assert!(matches!(board_error(&err), BoardError::Invalid(_)));
        Ok(())
    }

    #[test]
    fn test_list_tasks_filters() -> Result<()> {
        let f = fixture()?;
        let pid = f.project.project.id.clone();
        f.db.create_task(&new_task(&f, "todo"))?;
        f.db.create_task(&NewTask {
            status: TaskStatus::InProgress,
            assignee_id: Some(f.owner.id.clone()),
            ..new_task(&f, "doing")
        })?;

        let all = f.db.list_tasks(&pid, &f.owner.id, &TaskFilter::default())?;
        assert_eq!(all.len(), 2);

        let doing = f.db.list_tasks(
            &pid,
            &f.owner.id,
            &TaskFilter {
                status: Some(TaskStatus::InProgress),
                ..Default::default()
            },
        )?;
        assert_eq!(doing.len(), 1);
        assert_eq!(doing[0].task.title, "doing");
        assert_eq!(
            doing[0].assignee.as_ref().map(|a| a.name.as_str()),
            Some("Owner")
        );

        let mine = f.db.list_tasks(
            &pid,
            &f.owner.id,
            &TaskFilter {
                assignee_id: Some(f.owner.id.clone()),
                ..Default::default()
            },
        )?;
        assert_eq!(mine.len(), 1);
        Ok(())
    }

    #[test]
    fn test_sprint_tasks_ordered_by_column() -> Result<()> {
        let f = fixture()?;
        let sprint = f
            .db
            .create_sprint(&f.project.project.id, &f.owner.id, &new_sprint("S1"))?;
        for (title, status) in [
            ("done", TaskStatus::Done),
            ("todo", TaskStatus::Todo),
            ("review", TaskStatus::InReview),
        ] {
            f.db.create_task(&NewTask {
                sprint_id: Some(sprint.id.clone()),
                status,
                ..new_task(&f, title)
            })?;
        }
        let titles: Vec<String> = f
            .db
            .sprint_tasks(&sprint.id, &f.owner.id)?
            .into_iter()
            .map(|v| v.task.title)
            .collect();
        assert_eq!(titles, vec!["todo", "review", "done"]);
        Ok(())
    }

    #[test]
    fn test_update_task_logs_each_changed_field() -> Result<()> {
        let f = fixture()?;
        let task = f.db.create_task(&new_task(&f, "first"))?;

        let patch = TaskPatch {
            title: Some("renamed".into()),
            priority: Some(TaskPriority::High),
            story_points: Some(Some(5)),
            ..Default::default()
        };
        let updated = f.db.update_task(&task.task.id, &f.owner.id, &patch)?;
        assert_eq!(updated.task.title, "renamed");
        assert_eq!(updated.task.story_points, Some(5));

        let actions: Vec<String> = f
            .db
            .recent_activity(&task.task.id, 20)?
            .into_iter()
            .map(|a| a.action)
            .collect();
        assert!(actions.contains(&"updated title".to_string()));
        assert!(actions.contains(&"updated priority".to_string()));
        assert!(actions.contains(&"updated storyPoints".to_string()));
        assert_eq!(actions.len(), 4);
        Ok(())
    }

    #[test]
    fn test_move_into_progress_prompts_for_assignee() -> Result<()> {
        let f = fixture()?;
        let task = f.db.create_task(&new_task(&f, "t"))?;

        let outcome = f.db.move_task(
            &task.task.id,
            &f.owner.id,
            &TaskPatch {
                status: Some(TaskStatus::InProgress),
                ..Default::default()
            },
        )?;
        assert!(outcome.assignment_required);
        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(outcome.candidates[0].id, f.owner.id);
        assert_eq!(outcome.task.task.status, TaskStatus::InProgress);

        let log = f.db.recent_activity(&task.task.id, 20)?;
        assert_eq!(log[0].action, "status changed");
        assert_eq!(log[0].old_value.as_deref(), Some("TODO"));
        assert_eq!(log[0].new_value.as_deref(), Some("IN_PROGRESS"));

        let assigned = f.db.move_task(
            &task.task.id,
            &f.owner.id,
            &TaskPatch {
                assignee_id: Some(Some(f.owner.id.clone())),
                ..Default::default()
            },
        )?;
        assert!(!assigned.assignment_required);
        assert!(assigned.candidates.is_empty());
        assert_eq!(
            assigned.task.assignee.map(|a| a.id),
            Some(f.owner.id.clone())
        );
        Ok(())
    }

    #[test]
    fn test_done_task_in_finished_sprint_cannot_move() -> Result<()> {
        let f = fixture()?;
        let sprint = f
            .db
            .create_sprint(&f.project.project.id, &f.owner.id, &new_sprint("S1"))?;
        let task = f.db.create_task(&NewTask {
            sprint_id: Some(sprint.id.clone()),
            status: TaskStatus::Done,
            ..new_task(&f, "t")
        })?;
        f.db.complete_sprint(&sprint.id, &f.owner.id)?;

        let err = f
            .db
            .move_task(
                &task.task.id,
                &f.owner.id,
                &TaskPatch {
                    status: Some(TaskStatus::Todo),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot move completed tasks from a finished sprint"
        );
        Ok(())
    }

    #[test]
    fn test_drop_onto_backlog_zone_and_columns() -> Result<()> {
        let f = fixture()?;
        let sprint = f
            .db
            .create_sprint(&f.project.project.id, &f.owner.id, &new_sprint("S1"))?;
        f.db.start_sprint(&sprint.id, &f.owner.id)?;
        let in_sprint = f.db.create_task(&NewTask {
            sprint_id: Some(sprint.id.clone()),
            ..new_task(&f, "in sprint")
        })?;
        let backlog = f.db.create_task(&new_task(&f, "backlog"))?;

        // Same column, same sprint: nothing to do.
        let none = f
            .db
            .drop_task(&in_sprint.task.id, &f.owner.id, "TODO", true, None)?;
        assert!(none.is_none());

        // Backlog card onto the active sprint's review column joins the sprint.
        let moved = f
            .db
            .drop_task(&backlog.task.id, &f.owner.id, "IN_REVIEW", true, None)?
            .expect("move");
        assert_eq!(moved.task.task.status, TaskStatus::InReview);
        assert_eq!(moved.task.task.sprint_id.as_deref(), Some(sprint.id.as_str()));

        // Dropping on another card takes that card's column.
        let moved = f
            .db
            .drop_task(&in_sprint.task.id, &f.owner.id, &backlog.task.id, true, None)?
            .expect("move");
        assert_eq!(moved.task.task.status, TaskStatus::InReview);

        let to_backlog = f
            .db
            .drop_task(&in_sprint.task.id, &f.owner.id, "BACKLOG", true, None)?
            .expect("move");
        assert_eq!(to_backlog.task.task.sprint_id, None);
        assert_eq!(to_backlog.task.task.status, TaskStatus::InReview);
        Ok(())
    }

    #[test]
    fn test_drop_leaves_finished_sprint_record_alone() -> Result<()> {
        let f = fixture()?;
        let pid = &f.project.project.id;
        let old = f.db.create_sprint(pid, &f.owner.id, &new_sprint("S1"))?;
        let shipped = f.db.create_task(&NewTask {
            sprint_id: Some(old.id.clone()),
            status: TaskStatus::Done,
            story_points: Some(5),
            ..new_task(&f, "shipped")
        })?;
        f.db.start_sprint(&old.id, &f.owner.id)?;
        f.db.complete_sprint(&old.id, &f.owner.id)?;
        let now = Utc.with_ymd_and_hms(2024, 1, 20, 0, 0, 0).unwrap();
        let before = f.db.sprint_burndown(&old.id, &f.owner.id, now)?;

        let current = f.db.create_sprint(pid, &f.owner.id, &new_sprint("S2"))?;
        f.db.start_sprint(&current.id, &f.owner.id)?;

        let outcome = f
            .db
            .drop_task(&shipped.task.id, &f.owner.id, "DONE", true, None)?;
        assert!(outcome.is_none());

        let task = f.db.task_access(&shipped.task.id, &f.owner.id)?;
        assert_eq!(task.sprint_id.as_deref(), Some(old.id.as_str()));
        let after = f.db.sprint_burndown(&old.id, &f.owner.id, now)?;
        assert_eq!(after.total_points, before.total_points);
        assert_eq!(after.completed_points, 5);
        Ok(())
    }

    #[test]
    fn test_drop_keeps_planned_sprint_cards_in_their_sprint() -> Result<()> {
        let f = fixture()?;
        let pid = &f.project.project.id;
        let active = f.db.create_sprint(pid, &f.owner.id, &new_sprint("S1"))?;
        f.db.start_sprint(&active.id, &f.owner.id)?;
        let planned = f.db.create_sprint(pid, &f.owner.id, &new_sprint("S2"))?;
        let later = f.db.create_task(&NewTask {
            sprint_id: Some(planned.id.clone()),
            ..new_task(&f, "later")
        })?;

        let moved = f
            .db
            .drop_task(&later.task.id, &f.owner.id, "IN_PROGRESS", true, None)?
            .expect("move");
        assert_eq!(moved.task.task.status, TaskStatus::InProgress);
        assert_eq!(
            moved.task.task.sprint_id.as_deref(),
            Some(planned.id.as_str())
        );
        Ok(())
    }

    #[test]
    fn test_drop_resolves_cards_within_the_shown_sprint() -> Result<()> {
        let f = fixture()?;
        let pid = &f.project.project.id;
        let active = f.db.create_sprint(pid, &f.owner.id, &new_sprint("S1"))?;
        f.db.start_sprint(&active.id, &f.owner.id)?;
        let planned = f.db.create_sprint(pid, &f.owner.id, &new_sprint("S2"))?;
        let mover = f.db.create_task(&NewTask {
            sprint_id: Some(planned.id.clone()),
            ..new_task(&f, "mover")
        })?;
        let reviewed = f.db.create_task(&NewTask {
            sprint_id: Some(planned.id.clone()),
            status: TaskStatus::InReview,
            ..new_task(&f, "reviewed")
        })?;
        let elsewhere = f.db.create_task(&NewTask {
            sprint_id: Some(active.id.clone()),
            status: TaskStatus::Done,
            ..new_task(&f, "elsewhere")
        })?;
        let shown = Some(planned.id.as_str());

        // A card outside the shown sprint is neither a target nor draggable.
        let outcome = f.db.drop_task(
            &mover.task.id,
            &f.owner.id,
            &elsewhere.task.id,
            false,
            shown,
        )?;
        assert!(outcome.is_none());
        let outcome = f
            .db
            .drop_task(&elsewhere.task.id, &f.owner.id, "TODO", false, shown)?;
        assert!(outcome.is_none());

        let moved = f
            .db
            .drop_task(&mover.task.id, &f.owner.id, &reviewed.task.id, false, shown)?
            .expect("move");
        assert_eq!(moved.task.task.status, TaskStatus::InReview);
        assert_eq!(
            moved.task.task.sprint_id.as_deref(),
            Some(planned.id.as_str())
        );

        // With no sprint shown every card of the project is on the board.
        let moved = f
            .db
            .drop_task(&mover.task.id, &f.owner.id, &elsewhere.task.id, false, None)?
            .expect("move");
        assert_eq!(moved.task.task.status, TaskStatus::Done);
        Ok(())
    }

    #[test]
    fn test_sprint_status_patch_follows_lifecycle_rules() -> Result<()> {
        let f = fixture()?;
        let pid = &f.project.project.id;
        let s1 = f.db.create_sprint(pid, &f.owner.id, &new_sprint("S1"))?;
        let s2 = f.db.create_sprint(pid, &f.owner.id, &new_sprint("S2"))?;
        let open = f.db.create_task(&NewTask {
            sprint_id: Some(s1.id.clone()),
            ..new_task(&f, "open")
        })?;
        let activate = SprintPatch {
            status: Some(SprintStatus::Active),
            ..Default::default()
        };

        let started = f.db.update_sprint(&s1.id, &f.owner.id, &activate)?;
        assert_eq!(started.status, SprintStatus::Active);
        let err = f.db.update_sprint(&s2.id, &f.owner.id, &activate).unwrap_err();
        assert_eq!(
            err.to_string(),
            "There is already an active sprint for this project"
        );

        let completed = f.db.update_sprint(
            &s1.id,
            &f.owner.id,
            &SprintPatch {
                name: Some("S1 done".into()),
                status: Some(SprintStatus::Completed),
                ..Default::default()
            },
        )?;
        assert_eq!(completed.status, SprintStatus::Completed);
        assert_eq!(completed.name, "S1 done");
        let open = f.db.task_access(&open.task.id, &f.owner.id)?;
        assert_eq!(open.sprint_id, None);
        let log = f.db.recent_activity(&open.id, 20)?;
        assert_eq!(log[0].action, "sprint changed");
        assert_eq!(log[0].new_value.as_deref(), Some("backlog"));

        for status in [SprintStatus::Active, SprintStatus::Planned] {
            let reopen = SprintPatch {
                status: Some(status),
                ..Default::default()
            };
            let err = f.db.update_sprint(&s1.id, &f.owner.id, &reopen).unwrap_err();
            assert_eq!(err.to_string(), "Cannot reopen a completed sprint");
        }

        // Restating the current status is not a transition.
        let renamed = f.db.update_sprint(
            &s1.id,
            &f.owner.id,
            &SprintPatch {
                goal: Some(Some("Retro notes".into())),
                status: Some(SprintStatus::Completed),
                ..Default::default()
            },
        )?;
        assert_eq!(renamed.goal.as_deref(), Some("Retro notes"));
        f.db.start_sprint(&s2.id, &f.owner.id)?;
        Ok(())
    }

    #[test]
    fn test_comments_newest_first_and_logged() -> Result<()> {
        let f = fixture()?;
        let task = f.db.create_task(&new_task(&f, "t"))?;
        let long = "x".repeat(150);
        f.db.add_comment(&task.task.id, &f.owner.id, "first")?;
        f.db.add_comment(&task.task.id, &f.owner.id, &long)?;

        let comments = f.db.list_comments(&task.task.id, &f.owner.id)?;
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].content, long);
        assert_eq!(comments[1].content, "first");
        assert_eq!(comments[0].user.name, "Owner");

        let log = f.db.recent_activity(&task.task.id, 1)?;
        assert_eq!(log[0].action, "commented");
        assert_eq!(log[0].new_value.as_deref().map(str::len), Some(100));

        let detail = f.db.get_task_detail(&task.task.id, &f.owner.id)?;
        assert_eq!(detail.view.comment_count, 2);
        assert_eq!(detail.comments.len(), 2);
        assert_eq!(detail.activity_log.len(), 3);
        Ok(())
    }

    #[test]
    fn test_task_access_for_outsiders() -> Result<()> {
        let f = fixture()?;
        let task = f.db.create_task(&new_task(&f, "t"))?;
        let outsider = f.db.create_user("out@example.com", "Out", "hash")?;

        let err = f.db.task_access(&task.task.id, &outsider.id).unwrap_err();
        assert!(matches!(board_error(&err), BoardError::Forbidden(_)));
        let err = f.db.task_access("missing", &f.owner.id).unwrap_err();
        assert!(matches!(board_error(&err), BoardError::TaskNotFound));

        f.db.delete_task(&task.task.id, &f.owner.id)?;
        let err = f.db.task_access(&task.task.id, &f.owner.id).unwrap_err();
        assert!(matches!(board_error(&err), BoardError::TaskNotFound));
        Ok(())
    }

    #[test]
    fn test_burndown_reads_sprint_tasks() -> Result<()> {
        let f = fixture()?;
        let sprint = f
            .db
            .create_sprint(&f.project.project.id, &f.owner.id, &new_sprint("S1"))?;
        f.db.create_task(&NewTask {
            sprint_id: Some(sprint.id.clone()),
            story_points: Some(5),
            ..new_task(&f, "a")
        })?;
        f.db.create_task(&NewTask {
            sprint_id: Some(sprint.id.clone()),
            story_points: Some(3),
            status: TaskStatus::Done,
            ..new_task(&f, "b")
        })?;

        let now = Utc.with_ymd_and_hms(2024, 1, 3, 12, 0, 0).unwrap();
        let chart = f.db.sprint_burndown(&sprint.id, &f.owner.id, now)?;
        assert_eq!(chart.total_points, 8);
        assert_eq!(chart.completed_points, 3);
        assert_eq!(chart.remaining_points, 5);
        assert_eq!(chart.daily_progress.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_handle_runs_on_blocking_pool() -> Result<()> {
        let handle = DbHandle::new(BoardDb::new_in_memory()?);
        let user = handle
            .call(|db| db.create_user("h@example.com", "H", "hash"))
            .await?;
        let found = handle
            .call(move |db| db.get_user(&user.id))
            .await?
            .expect("user");
        assert_eq!(found.email, "h@example.com");
        Ok(())
    }
}
