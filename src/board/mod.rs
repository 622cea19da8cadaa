//! Sprint board back-end.
//!
//! ## Overview
//!
//! Teams own projects, projects own sprints and tasks, and tasks move across
//! a kanban board whose columns are the task statuses. Every request is
//! authenticated with a bearer JWT and checked against team membership.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (Router, TraceLayer, CORS, shutdown) │
//! │  (board) │ <─────── │    └─ api/   (route handlers, ApiError)          │
//! └──────────┘   JSON   │         │ AuthUser extractor  ── auth.rs         │
//!                       │         │                                        │
//!                       │         │ DbHandle::call()                       │
//!                       │         v                                        │
//!                       │  db.rs   (BoardDb: access rules, transactions)   │
//!                       │         │                                        │
//!                       │         ├─ kanban.rs    (drop resolution, guard) │
//!                       │         └─ burndown.rs  (daily remaining points) │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module     | Responsibility                                          |
//! |------------|---------------------------------------------------------|
//! | `models`   | Shared types: `Task`, `Sprint`, patches, view types     |
//! | `clock`    | Canonical RFC 3339 timestamps and date parsing          |
//! | `auth`     | Argon2 password hashes, HS256 tokens, `AuthUser`        |
//!
//! ## Typical Request Flow (drop a card on "In Progress")
//!
//! 1. `POST /api/tasks/{id}/drop` → `api::tasks::drop_task()`
//! 2. `BoardDb::drop_task` loads the project's tasks and active sprint and
//!    asks `kanban::resolve_drop` what the drop means.
//! 3. The resulting patch goes through `kanban::check_move`, is written with
//!    its activity entries in one transaction, and the handler returns the
//!    task plus the assignee candidates when the card has no owner.

pub mod api;
pub mod auth;
pub mod burndown;
pub mod clock;
pub mod db;
pub mod kanban;
pub mod models;
pub mod server;
