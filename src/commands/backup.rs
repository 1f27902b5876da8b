// ABOUTME: Backup command implementation - dump a database to a file
// ABOUTME: Writes a portable .sql dump or a PostgreSQL custom archive

use crate::config::{ConnectionConfig, EngineKind};
use crate::driver::{create_driver, PostgresDriver, Progress};
use crate::migration::dump::{BackupOptions, BackupResult};
use crate::utils::{check_required_tools, sanitize_identifier};
use anyhow::{bail, Context, Result};
use std::path::Path;

/// Output format of a backup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum BackupFormat {
    /// Portable SQL text, restorable into any engine
    #[default]
    Sql,
    /// pg_dump custom archive (PostgreSQL only)
    Custom,
}

/// Dump the database at `url` into `output`
///
/// # Examples
///
/// ```no_run
/// # use anyhow::Result;
/// # use sqlferry::commands::{backup, BackupFormat};
/// # use sqlferry::migration::dump::BackupOptions;
/// # async fn example() -> Result<()> {
/// backup(
///     "sqlite:///var/lib/app.db",
///     std::path::Path::new("app.sql"),
///     BackupOptions::default(),
///     BackupFormat::Sql,
///     false,
/// )
/// .await?;
/// # Ok(())
/// # }
/// ```
pub async fn backup(
    url: &str,
    output: &Path,
    options: BackupOptions,
    format: BackupFormat,
    json: bool,
) -> Result<()> {
    let config = ConnectionConfig::from_url(url).context("Invalid connection string")?;
    config.validate().context("Invalid connection settings")?;

    let result = match format {
        BackupFormat::Sql => backup_sql(config, output, options, json).await?,
        BackupFormat::Custom => backup_archive(config, output, options).await?,
    };

    if json {
        crate::commands::print_json(&result)?;
    } else {
        tracing::info!(
            "✓ Backup complete: {} table(s), {} bytes written to {}",
            result.tables_count,
            result.size_bytes,
            result.path.display()
        );
    }
    Ok(())
}

async fn backup_sql(
    config: ConnectionConfig,
    output: &Path,
    options: BackupOptions,
    json: bool,
) -> Result<BackupResult> {
    let mut driver = create_driver(config).context("Invalid connection settings")?;
    let progress = crate::commands::progress_bar(json);

    let on_progress = |p: Progress| {
        if let Progress::Backup(b) = p {
            progress.set_length(b.total_tables as u64);
            progress.set_position(b.processed_tables as u64);
            match b.current_table {
                Some(table) => progress.set_message(format!("Dumping {}", sanitize_identifier(&table))),
                None => progress.set_message("Dump complete"),
            }
        }
    };

    let dumped = driver.dump(&options, &on_progress).await;
    progress.finish_and_clear();
    if let Err(e) = driver.close().await {
        tracing::warn!("⚠ Failed to close connection: {}", e);
    }

    let document = dumped.context("Backup failed")?;
    let result = document
        .write_to(output)
        .with_context(|| format!("Failed to write backup to {}", output.display()))?;
    Ok(result)
}

async fn backup_archive(
    config: ConnectionConfig,
    output: &Path,
    options: BackupOptions,
) -> Result<BackupResult> {
    if config.kind != Some(EngineKind::Postgres) {
        bail!("The custom archive format is only available for PostgreSQL");
    }
    check_required_tools(&["pg_dump"])?;

    let mut driver = PostgresDriver::new(config);
    let result = driver.dump_archive(output, &options).await;
    if let Err(e) = crate::driver::Driver::close(&mut driver).await {
        tracing::warn!("⚠ Failed to close connection: {}", e);
    }
    result.context("Backup failed")
}
