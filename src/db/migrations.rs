//! Schema upgrades keyed on SQLite's `user_version`.

use anyhow::{bail, Context, Result};
use rusqlite::Connection;

/// Embedded schema scripts; entry `i` upgrades version `i` to `i + 1`.
const MIGRATIONS: &[(&str, &str)] = &[
    ("schema_v1.sql", include_str!("schemas/schema_v1.sql")),
    ("schema_v2.sql", include_str!("schemas/schema_v2.sql")),
];

pub(crate) const CURRENT_SCHEMA_VERSION: i32 = MIGRATIONS.len() as i32;

pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read user_version pragma")?;

    if version > CURRENT_SCHEMA_VERSION {
        bail!("database schema v{version} is newer than this build understands (v{CURRENT_SCHEMA_VERSION})");
    }
    if version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    // All pending steps commit together or not at all.
    let tx = conn
        .transaction()
        .context("failed to open migration transaction")?;
    for (name, script) in &MIGRATIONS[version as usize..] {
        tx.execute_batch(script)
            .with_context(|| format!("failed to apply {name}"))?;
    }
    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)
        .context("failed to update user_version pragma")?;
    tx.commit().context("failed to commit migrations")?;

    log::info!("database schema upgraded v{version} -> v{CURRENT_SCHEMA_VERSION}");
    Ok(())
}
