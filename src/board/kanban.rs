//! Kanban move rules.
//!
//! Two layers live here:
//!
//! 1. **Drop resolution** turns "task X was dropped over element Y" into a
//!    concrete [`DropMove`]. Y is one of the board's drop zones (`BACKLOG`,
//!    `SPRINT`), a status column, or another task card.
//! 2. **Move checks** decide whether a requested [`TaskPatch`] may be applied
//!    and which activity entries it produces, including whether the move
//!    should prompt for an assignee.
//!
//! Everything is pure; the store and HTTP layers feed in tasks and sprints.

use super::models::{NewActivity, Sprint, SprintStatus, Task, TaskPatch, TaskStatus};
use crate::errors::BoardError;

/// Drop-zone id for "remove from sprint".
pub const BACKLOG_ZONE: &str = "BACKLOG";
/// Drop-zone id for "add to the active sprint".
pub const SPRINT_ZONE: &str = "SPRINT";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropTarget {
    BacklogZone,
    SprintZone,
    Column(TaskStatus),
    Task(String),
}

impl DropTarget {
    /// Classify a droppable id. Zone ids win over the `BACKLOG` status;
    /// anything that is neither a zone nor a status is a task id.
    pub fn parse(over_id: &str) -> Self {
        match over_id {
            BACKLOG_ZONE => Self::BacklogZone,
            SPRINT_ZONE => Self::SprintZone,
            other => match other.parse::<TaskStatus>() {
                Ok(status) => Self::Column(status),
                Err(_) => Self::Task(other.to_string()),
            },
        }
    }
}

/// What the board currently shows.
#[derive(Debug, Clone, Copy)]
pub struct BoardSnapshot<'a> {
    /// Cards rendered in the status columns.
    pub visible: &'a [Task],
    /// Every task in the project, backlog included.
    pub all: &'a [Task],
    pub active_sprint_id: Option<&'a str>,
    /// The active-sprint view adds a backlog column fed from `all`.
    pub viewing_active_sprint: bool,
}

impl<'a> BoardSnapshot<'a> {
    fn pool(&self) -> &'a [Task] {
        if self.viewing_active_sprint {
            self.all
        } else {
            self.visible
        }
    }

    fn find_in<'t>(tasks: &'t [Task], id: &str) -> Option<&'t Task> {
        tasks.iter().find(|t| t.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SprintChange {
    Keep,
    Clear,
    Set(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropMove {
    pub status: TaskStatus,
    pub sprint: SprintChange,
}

impl DropMove {
    pub fn into_patch(self) -> TaskPatch {
        TaskPatch {
            status: Some(self.status),
            sprint_id: match self.sprint {
                SprintChange::Keep => None,
                SprintChange::Clear => Some(None),
                SprintChange::Set(id) => Some(Some(id)),
            },
            ..Default::default()
        }
    }
}

/// Resolve a drop into a move, or `None` when the drop changes nothing.
///
/// Dropping a backlog card on a column while the active sprint is shown
/// also pulls the card into that sprint. Cards that already belong to a
/// sprint keep it; only the backlog and sprint zones change membership.
pub fn resolve_drop(board: &BoardSnapshot<'_>, task_id: &str, over_id: &str) -> Option<DropMove> {
    let task = BoardSnapshot::find_in(board.pool(), task_id)?;

    let new_status = match DropTarget::parse(over_id) {
        DropTarget::BacklogZone => {
            return Some(DropMove {
                status: task.status,
                sprint: SprintChange::Clear,
            });
        }
        DropTarget::SprintZone => {
            let active = board.active_sprint_id?;
            return Some(DropMove {
                status: task.status,
                sprint: SprintChange::Set(active.to_string()),
            });
        }
        DropTarget::Column(status) => status,
        DropTarget::Task(over_task_id) => BoardSnapshot::find_in(board.visible, &over_task_id)?.status,
    };

    // A backlog card dragged onto a column of the active sprint joins it.
    let sprint = match board.active_sprint_id {
        Some(active) if board.viewing_active_sprint && task.sprint_id.is_none() => {
            SprintChange::Set(active.to_string())
        }
        _ => SprintChange::Keep,
    };

    if new_status == task.status && sprint == SprintChange::Keep {
        return None;
    }
    Some(DropMove {
        status: new_status,
        sprint,
    })
}

/// Validate a move against the task's current sprint and, when the patch
/// assigns a sprint, the target sprint.
pub fn check_move(
    task: &Task,
    patch: &TaskPatch,
    current_sprint: Option<&Sprint>,
    target_sprint: Option<&Sprint>,
) -> Result<(), BoardError> {
    let target_status = patch.status.unwrap_or(task.status);
    let in_finished_sprint = current_sprint.is_some_and(|s| s.status == SprintStatus::Completed);
    if task.status == TaskStatus::Done && in_finished_sprint && target_status != TaskStatus::Done {
        return Err(BoardError::invalid(
            "Cannot move completed tasks from a finished sprint",
        ));
    }
    check_sprint_target(task, patch, target_sprint)
}

/// A patch that sets a sprint must name a live sprint of the task's project.
pub fn check_sprint_target(
    task: &Task,
    patch: &TaskPatch,
    target_sprint: Option<&Sprint>,
) -> Result<(), BoardError> {
    let Some(Some(sprint_id)) = &patch.sprint_id else {
        return Ok(());
    };
    if task.sprint_id.as_deref() == Some(sprint_id.as_str()) {
        return Ok(());
    }
    match target_sprint {
        Some(sprint) if sprint.id == *sprint_id && sprint.project_id == task.project_id => {
            if sprint.status == SprintStatus::Completed {
                Err(BoardError::invalid("Cannot add tasks to a completed sprint"))
            } else {
                Ok(())
            }
        }
        _ => Err(BoardError::invalid("Sprint does not belong to this project")),
    }
}

/// Activity entries describing a move.
pub fn move_activity(before: &Task, after: &Task) -> Vec<NewActivity> {
    let mut entries = Vec::new();
    if before.status != after.status {
        entries.push(NewActivity::change(
            "status changed",
            before.status.as_str(),
            after.status.as_str(),
        ));
    }
    if before.sprint_id != after.sprint_id {
        entries.push(NewActivity::change(
            "sprint changed",
            before.sprint_id.as_deref().unwrap_or("backlog"),
            after.sprint_id.as_deref().unwrap_or("backlog"),
        ));
    }
    if before.assignee_id != after.assignee_id {
        entries.push(NewActivity::change(
            "assignee changed",
            before.assignee_id.as_deref().unwrap_or("unassigned"),
            after.assignee_id.as_deref().unwrap_or("unassigned"),
        ));
    }
    entries
}

/// Work that starts without an owner should prompt the mover to pick one.
pub fn assignment_required(before: &Task, after: &Task) -> bool {
    after.status == TaskStatus::InProgress
        && before.status != TaskStatus::InProgress
        && after.assignee_id.is_none()
}
