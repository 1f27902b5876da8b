// ABOUTME: Restore command implementation - replay a backup file into a database
// ABOUTME: Accepts portable .sql dumps and PostgreSQL custom archives

use crate::config::{ConnectionConfig, EngineKind};
use crate::driver::{create_driver, Driver, PostgresDriver, Progress};
use crate::utils::check_required_tools;
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::io::Read;
use std::path::Path;

/// Leading bytes of a pg_dump custom-format archive
const ARCHIVE_MAGIC: &[u8] = b"PGDMP";

#[derive(Debug, Serialize)]
struct RestoreSummary {
    target: String,
    input: String,
    statements: Option<usize>,
}

/// Replay the backup at `input` into the database at `url`
///
/// Existing tables with the same names are dropped by the dump, so the user
/// is asked to confirm unless `yes` is set.
pub async fn restore(url: &str, input: &Path, yes: bool, json: bool) -> Result<()> {
    let config = ConnectionConfig::from_url(url).context("Invalid connection string")?;
    config.validate().context("Invalid connection settings")?;

    crate::commands::confirm(
        &format!(
            "Restore {} into {}? Existing tables with the same names will be replaced.",
            input.display(),
            config.display_name()
        ),
        yes,
    )?;

    let summary = if is_archive(input)? {
        restore_archive(config, input).await?
    } else {
        restore_sql(config, input, json).await?
    };

    if json {
        crate::commands::print_json(&summary)?;
    } else {
        tracing::info!("✓ Restore into {} complete", summary.target);
    }
    Ok(())
}

fn is_archive(input: &Path) -> Result<bool> {
    let mut file = std::fs::File::open(input)
        .with_context(|| format!("Failed to open {}", input.display()))?;
    let mut head = [0u8; 5];
    let read = file
        .read(&mut head)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    Ok(&head[..read] == ARCHIVE_MAGIC)
}

async fn restore_sql(config: ConnectionConfig, input: &Path, json: bool) -> Result<RestoreSummary> {
    let sql = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read {} as UTF-8 SQL", input.display()))?;

    let target = config.display_name();
    let mut driver = create_driver(config).context("Invalid connection settings")?;
    let progress = crate::commands::progress_bar(json);

    let statements = crate::sql::statements(&sql).count();
    let on_progress = |p: Progress| {
        if let Progress::Restore(r) = p {
            progress.set_length(r.total_statements as u64);
            progress.set_position(r.current_statement as u64);
            progress.set_message("Restoring");
        }
    };

    let restored = driver.restore(&sql, &on_progress).await;
    progress.finish_and_clear();
    if let Err(e) = driver.close().await {
        tracing::warn!("⚠ Failed to close connection: {}", e);
    }
    restored.context("Restore failed")?;

    Ok(RestoreSummary {
        target,
        input: input.display().to_string(),
        statements: Some(statements),
    })
}

async fn restore_archive(config: ConnectionConfig, input: &Path) -> Result<RestoreSummary> {
    if config.kind != Some(EngineKind::Postgres) {
        bail!("Custom archives can only be restored into PostgreSQL");
    }
    check_required_tools(&["pg_restore"])?;

    let target = config.display_name();
    let mut driver = PostgresDriver::new(config);
    let restored = driver.restore_archive(input).await;
    if let Err(e) = driver.close().await {
        tracing::warn!("⚠ Failed to close connection: {}", e);
    }
    restored.context("Restore failed")?;

    Ok(RestoreSummary {
        target,
        input: input.display().to_string(),
        statements: None,
    })
}
