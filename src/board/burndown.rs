//! Sprint burndown.
//!
//! The chart walks the sprint one UTC day at a time, from the start date up
//! to today (or the end date, whichever comes first), and reports for each
//! day how many story points were still open at its last millisecond next
//! to the straight-line "ideal" burn.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::models::{Task, TaskStatus};

/// The per-task inputs the chart needs.
#[derive(Debug, Clone, PartialEq)]
pub struct PointSample {
    pub story_points: Option<i32>,
    pub status: TaskStatus,
    /// When the task last entered `DONE`. Only meaningful for done tasks.
    pub completed_at: Option<DateTime<Utc>>,
}

impl PointSample {
    fn points(&self) -> i64 {
        i64::from(self.story_points.unwrap_or(0))
    }

    fn is_done(&self) -> bool {
        self.status == TaskStatus::Done
    }

    /// Build a sample from a stored task. Done tasks without a recorded
    /// completion time fall back to their last update.
    pub fn from_task(task: &Task) -> Self {
        let completed_at = task
            .completed_at
            .as_deref()
            .or((task.status == TaskStatus::Done).then_some(task.updated_at.as_str()))
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|at| at.with_timezone(&Utc));
        Self {
            story_points: task.story_points,
            status: task.status,
            completed_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BurndownDay {
    pub date: NaiveDate,
    pub remaining: i64,
    pub ideal: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Burndown {
    pub total_points: i64,
    pub completed_points: i64,
    pub remaining_points: i64,
    pub daily_progress: Vec<BurndownDay>,
}

const DAY_MILLIS: i64 = 24 * 60 * 60 * 1000;

/// Whole days covered by the sprint, rounded up, never less than one.
pub fn sprint_length_days(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    let millis = (end - start).num_milliseconds();
    let days = millis.div_euclid(DAY_MILLIS) + i64::from(millis.rem_euclid(DAY_MILLIS) != 0);
    days.max(1)
}

fn end_of_day(at: DateTime<Utc>) -> DateTime<Utc> {
    at.date_naive()
        .and_hms_milli_opt(23, 59, 59, 999)
        .map(|dt| dt.and_utc())
        .unwrap_or(at)
}

pub fn compute(
    samples: &[PointSample],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Burndown {
    let total_points: i64 = samples.iter().map(PointSample::points).sum();
    let completed_points: i64 = samples
        .iter()
        .filter(|s| s.is_done())
        .map(PointSample::points)
        .sum();

    let ideal_rate = total_points as f64 / sprint_length_days(start, end) as f64;
    let last_day = now.min(end);

    let mut daily_progress = Vec::new();
    let mut day = start;
    let mut elapsed: i64 = 0;
    while day <= last_day {
        let cutoff = end_of_day(day);
        let completed_by_day: i64 = samples
            .iter()
            .filter(|s| s.is_done() && s.completed_at.is_some_and(|at| at <= cutoff))
            .map(PointSample::points)
            .sum();

        daily_progress.push(BurndownDay {
            date: day.date_naive(),
            remaining: total_points - completed_by_day,
            ideal: (total_points as f64 - ideal_rate * elapsed as f64).max(0.0),
        });

        day += Duration::days(1);
        elapsed += 1;
    }

    Burndown {
        total_points,
        completed_points,
        remaining_points: total_points - completed_points,
        daily_progress,
    }
}
