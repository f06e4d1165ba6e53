use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::utils::percentage::Percentage;

pub type TaskId = i64;

/// What the user said they're working on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl Task {
    pub fn is_current(&self) -> bool {
        self.is_active && self.completed_at.is_none()
    }
}

/// A check waiting to be appended to the log.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCheck {
    pub task_id: Option<TaskId>,
    pub on_task: bool,
    pub is_idle: bool,
    pub rationale: String,
    pub confidence: f64,
}

/// One row of the check log. Never updated after it's written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckResult {
    pub id: i64,
    pub task_id: Option<TaskId>,
    pub timestamp: DateTime<Utc>,
    pub on_task: bool,
    pub is_idle: bool,
    pub rationale: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckCategory {
    OnTask,
    OffTask,
    Idle,
}

impl CheckResult {
    /// Idle wins over the verdict, so the three categories partition the log.
    pub fn category(&self) -> CheckCategory {
        match (self.is_idle, self.on_task) {
            (true, _) => CheckCategory::Idle,
            (false, true) => CheckCategory::OnTask,
            (false, false) => CheckCategory::OffTask,
        }
    }
}

/// A check joined with the description of the task it was made against.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckRecord {
    #[serde(flatten)]
    pub check: CheckResult,
    pub task_description: Option<String>,
}

/// Per-day aggregate of the check log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyRollup {
    pub date: NaiveDate,
    pub total_checks: u32,
    pub on_task_count: u32,
    pub off_task_count: u32,
    pub idle_count: u32,
    pub on_task_percentage: f64,
}

impl DailyRollup {
    pub fn empty(date: NaiveDate) -> Self {
        Self::from_counts(date, 0, 0, 0)
    }

    pub fn from_counts(date: NaiveDate, on_task: u32, off_task: u32, idle: u32) -> Self {
        let total_checks = on_task + off_task + idle;
        Self {
            date,
            total_checks,
            on_task_count: on_task,
            off_task_count: off_task,
            idle_count: idle,
            on_task_percentage: *Percentage::of(on_task, total_checks),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};

    use super::{CheckCategory, CheckResult, DailyRollup};

    fn check(on_task: bool, is_idle: bool) -> CheckResult {
        CheckResult {
            id: 0,
            task_id: Some(1),
            timestamp: Utc::now(),
            on_task,
            is_idle,
            rationale: String::new(),
            confidence: 0.5,
        }
    }

    #[test]
    fn test_idle_takes_precedence() {
        assert_eq!(check(true, true).category(), CheckCategory::Idle);
        assert_eq!(check(false, true).category(), CheckCategory::Idle);
        assert_eq!(check(true, false).category(), CheckCategory::OnTask);
        assert_eq!(check(false, false).category(), CheckCategory::OffTask);
    }

    #[test]
    fn test_rollup_from_counts() {
        let date = NaiveDate::from_ymd_opt(2018, 7, 4).unwrap();
        let rollup = DailyRollup::from_counts(date, 3, 1, 1);
        assert_eq!(rollup.total_checks, 5);
        assert_eq!(rollup.on_task_percentage, 60.0);

        let all_idle = DailyRollup::from_counts(date, 0, 0, 4);
        assert_eq!(all_idle.total_checks, 4);
        assert_eq!(all_idle.on_task_percentage, 0.0);
    }

    #[test]
    fn test_empty_rollup() {
        let date = NaiveDate::from_ymd_opt(2018, 7, 4).unwrap();
        let rollup = DailyRollup::empty(date);
        assert_eq!(rollup.total_checks, 0);
        assert_eq!(rollup.on_task_percentage, 0.0);
    }
}
