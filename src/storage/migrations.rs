use anyhow::{anyhow, Context, Result};
use rusqlite::Connection;
use tracing::info;

/// Schema scripts in the order they were introduced. `user_version` holds how many of them a
/// database has already run, so a new script only ever gets appended here.
const MIGRATIONS: &[&str] = &[include_str!("schemas/schema_v1.sql")];

fn applied_count(conn: &Connection) -> Result<usize> {
    let version: i64 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read schema version")?;
    usize::try_from(version).map_err(|_| anyhow!("schema version {version} is invalid"))
}

/// Brings the schema up to date in a single transaction. Refuses databases written by a newer
/// build.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    let applied = applied_count(conn)?;
    let pending = MIGRATIONS.get(applied..).ok_or_else(|| {
        anyhow!(
            "database schema version {applied} is newer than the supported {}",
            MIGRATIONS.len()
        )
    })?;
    if pending.is_empty() {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for (offset, script) in pending.iter().enumerate() {
        let version = applied + offset + 1;
        tx.execute_batch(script)
            .with_context(|| format!("failed to apply schema version {version}"))?;
    }
    tx.pragma_update(None, "user_version", i64::try_from(MIGRATIONS.len())?)?;
    tx.commit().context("failed to commit schema changes")?;

    info!("Schema migrated from version {applied} to {}", MIGRATIONS.len());
    Ok(())
}
