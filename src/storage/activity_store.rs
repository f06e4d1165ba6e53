use std::{path::PathBuf, sync::Arc};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use crate::utils::{
    clock::Clock,
    time::{date_to_key, key_to_date, parse_optional_timestamp, parse_timestamp},
};

use super::{
    connection::Database,
    entities::{CheckRecord, CheckResult, DailyRollup, NewCheck, Task, TaskId},
};

/// Interface for abstracting persistence of tasks, checks and rollups. Every failure is returned
/// to the caller; deciding whether a read failure may be shown as "nothing yet" is up to them.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActivityStore: Send + Sync {
    /// Most recently started task that is active and not completed.
    async fn get_active_task(&self) -> Result<Option<Task>>;

    /// Deactivates whatever is active and inserts `description` as the new active task, in one
    /// transaction.
    async fn create_task(&self, description: &str) -> Result<TaskId>;

    async fn complete_task(&self, id: TaskId) -> Result<()>;

    /// Appends a check and rebuilds the rollup of the day it was stamped on from the full log.
    async fn log_check(&self, check: NewCheck) -> Result<CheckResult>;

    /// Rebuilds the stored rollup for `date` from the check log.
    async fn recompute_rollup(&self, date: NaiveDate) -> Result<DailyRollup>;

    /// [ActivityStore::recompute_rollup] for the store's own notion of today.
    async fn recompute_today_rollup(&self) -> Result<DailyRollup>;

    /// Today's rollup, or an all-zero rollup when nothing was logged yet.
    async fn get_today_summary(&self) -> Result<DailyRollup>;

    async fn get_summary_for(&self, date: NaiveDate) -> Result<DailyRollup>;

    /// Newest first.
    async fn get_recent_checks(&self, limit: usize) -> Result<Vec<CheckRecord>>;
}

/// The main realization of [ActivityStore], backed by SQLite.
pub struct SqliteActivityStore {
    db: Database,
    clock: Arc<dyn Clock>,
}

fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn to_count(value: i64, field: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| anyhow!("{field} holds out of range count {value}"))
}

fn row_to_task(row: &Row) -> Result<Task> {
    let started_at: String = row.get("started_at")?;
    let completed_at: Option<String> = row.get("completed_at")?;

    Ok(Task {
        id: row.get("id")?,
        description: row.get("description")?,
        started_at: parse_timestamp(&started_at, "started_at")?,
        completed_at: parse_optional_timestamp(completed_at, "completed_at")?,
        is_active: row.get("is_active")?,
    })
}

fn row_to_check_record(row: &Row) -> Result<CheckRecord> {
    let timestamp: String = row.get("timestamp")?;

    Ok(CheckRecord {
        check: CheckResult {
            id: row.get("id")?,
            task_id: row.get("task_id")?,
            timestamp: parse_timestamp(&timestamp, "timestamp")?,
            on_task: row.get("on_task")?,
            is_idle: row.get("is_idle")?,
            rationale: row.get("rationale")?,
            confidence: row.get("confidence")?,
        },
        task_description: row.get("task_description")?,
    })
}

fn row_to_rollup(row: &Row) -> Result<DailyRollup> {
    let date: String = row.get("date")?;

    Ok(DailyRollup {
        date: key_to_date(&date)?,
        total_checks: to_count(row.get("total_checks")?, "total_checks")?,
        on_task_count: to_count(row.get("on_task_count")?, "on_task_count")?,
        off_task_count: to_count(row.get("off_task_count")?, "off_task_count")?,
        idle_count: to_count(row.get("idle_count")?, "idle_count")?,
        on_task_percentage: row.get("on_task_percentage")?,
    })
}

/// Rebuilds the rollup for `date` from every check logged on that day and upserts it. Running it
/// twice over the same log writes the same row.
fn recompute_rollup_in(conn: &Connection, date: NaiveDate) -> Result<DailyRollup> {
    let key = date_to_key(date);

    let (on_task, off_task, idle): (i64, i64, i64) = conn.query_row(
        "SELECT
            COALESCE(SUM(CASE WHEN is_idle = 0 AND on_task = 1 THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN is_idle = 0 AND on_task = 0 THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN is_idle = 1 THEN 1 ELSE 0 END), 0)
         FROM check_results
         WHERE check_date = ?1",
        params![key],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;

    let rollup = DailyRollup::from_counts(
        date,
        to_count(on_task, "on_task_count")?,
        to_count(off_task, "off_task_count")?,
        to_count(idle, "idle_count")?,
    );

    conn.execute(
        "INSERT INTO daily_rollups
            (date, total_checks, on_task_count, off_task_count, idle_count, on_task_percentage)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(date) DO UPDATE SET
            total_checks = excluded.total_checks,
            on_task_count = excluded.on_task_count,
            off_task_count = excluded.off_task_count,
            idle_count = excluded.idle_count,
            on_task_percentage = excluded.on_task_percentage",
        params![
            key,
            rollup.total_checks,
            rollup.on_task_count,
            rollup.off_task_count,
            rollup.idle_count,
            rollup.on_task_percentage,
        ],
    )?;

    Ok(rollup)
}

impl SqliteActivityStore {
    pub fn open(db_path: PathBuf, clock: Arc<dyn Clock>) -> Result<Self> {
        let db = Database::open(db_path)?;
        Ok(Self { db, clock })
    }
}

#[async_trait]
impl ActivityStore for SqliteActivityStore {
    async fn get_active_task(&self) -> Result<Option<Task>> {
        self.db
            .execute(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, description, started_at, completed_at, is_active
                     FROM tasks
                     WHERE is_active = 1 AND completed_at IS NULL
                     ORDER BY started_at DESC, id DESC
                     LIMIT 1",
                )?;

                let mut rows = stmt.query([])?;
                let task = match rows.next()? {
                    Some(row) => Some(row_to_task(row)?),
                    None => None,
                };
                Ok(task)
            })
            .await
            .context("failed to read active task")
    }

    async fn create_task(&self, description: &str) -> Result<TaskId> {
        let description = description.trim().to_string();
        if description.is_empty() {
            bail!("task description must not be empty");
        }
        let started_at = format_timestamp(self.clock.time());

        let id = self
            .db
            .execute(move |conn| {
                let tx = conn.transaction()?;
                let deactivated = tx.execute(
                    "UPDATE tasks SET is_active = 0
                     WHERE is_active = 1 AND completed_at IS NULL",
                    [],
                )?;
                tx.execute(
                    "INSERT INTO tasks (description, started_at, is_active) VALUES (?1, ?2, 1)",
                    params![description, started_at],
                )?;
                let id = tx.last_insert_rowid();
                tx.commit()?;
                debug!("Created task {id}, deactivated {deactivated} previous");
                Ok(id)
            })
            .await
            .context("failed to create task")?;

        Ok(id)
    }

    async fn complete_task(&self, id: TaskId) -> Result<()> {
        let completed_at = format_timestamp(self.clock.time());
        self.db
            .execute(move |conn| {
                let rows_affected = conn.execute(
                    "UPDATE tasks SET completed_at = ?1, is_active = 0 WHERE id = ?2",
                    params![completed_at, id],
                )?;
                if rows_affected == 0 {
                    bail!("task {id} not found");
                }
                Ok(())
            })
            .await
            .with_context(|| format!("failed to complete task {id}"))
    }

    async fn log_check(&self, check: NewCheck) -> Result<CheckResult> {
        let timestamp = self.clock.time();
        let day = self.clock.date_of(timestamp);

        self.db
            .execute(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO check_results
                        (task_id, timestamp, check_date, on_task, is_idle, rationale, confidence)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        check.task_id,
                        format_timestamp(timestamp),
                        date_to_key(day),
                        check.on_task,
                        check.is_idle,
                        check.rationale,
                        check.confidence,
                    ],
                )?;
                let id = tx.last_insert_rowid();
                let rollup = recompute_rollup_in(&tx, day)?;
                tx.commit()?;
                debug!("Logged check {id}, rollup now {rollup:?}");

                Ok(CheckResult {
                    id,
                    task_id: check.task_id,
                    timestamp,
                    on_task: check.on_task,
                    is_idle: check.is_idle,
                    rationale: check.rationale,
                    confidence: check.confidence,
                })
            })
            .await
            .context("failed to log check")
    }

    async fn recompute_rollup(&self, date: NaiveDate) -> Result<DailyRollup> {
        self.db
            .execute(move |conn| {
                let tx = conn.transaction()?;
                let rollup = recompute_rollup_in(&tx, date)?;
                tx.commit()?;
                Ok(rollup)
            })
            .await
            .with_context(|| format!("failed to recompute rollup for {date}"))
    }

    async fn recompute_today_rollup(&self) -> Result<DailyRollup> {
        self.recompute_rollup(self.clock.today()).await
    }

    async fn get_today_summary(&self) -> Result<DailyRollup> {
        self.get_summary_for(self.clock.today()).await
    }

    async fn get_summary_for(&self, date: NaiveDate) -> Result<DailyRollup> {
        self.db
            .execute(move |conn| {
                let rollup = conn
                    .query_row(
                        "SELECT date, total_checks, on_task_count, off_task_count, idle_count, on_task_percentage
                         FROM daily_rollups
                         WHERE date = ?1",
                        params![date_to_key(date)],
                        |row| Ok(row_to_rollup(row)),
                    )
                    .optional()?
                    .transpose()?;
                Ok(rollup.unwrap_or_else(|| DailyRollup::empty(date)))
            })
            .await
            .with_context(|| format!("failed to read summary for {date}"))
    }

    async fn get_recent_checks(&self, limit: usize) -> Result<Vec<CheckRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT c.id, c.task_id, c.timestamp, c.on_task, c.is_idle, c.rationale, c.confidence,
                            t.description AS task_description
                     FROM check_results c
                     LEFT JOIN tasks t ON c.task_id = t.id
                     ORDER BY c.timestamp DESC, c.id DESC
                     LIMIT ?1",
                )?;

                let mut rows = stmt.query(params![limit])?;
                let mut records = Vec::new();
                while let Some(row) = rows.next()? {
                    records.push(row_to_check_record(row)?);
                }
                Ok(records)
            })
            .await
            .context("failed to read recent checks")
    }
}
