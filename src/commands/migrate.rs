// ABOUTME: Migrate command implementation - copy a database into another engine
// ABOUTME: Resolves endpoints from URLs or a TOML file and renders staged progress

use crate::config::{ConnectionConfig, MigrationConfig};
use crate::driver::Progress;
use crate::migration::{MigrationProgress, Migrator, Stage};
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

/// Where the endpoints of a migration come from
#[derive(Debug, Clone)]
pub enum MigrationTarget {
    Urls { source: String, target: String },
    ConfigFile(PathBuf),
}

/// Resolve the endpoints and artifact directory of a migration
pub fn resolve(
    endpoints: &MigrationTarget,
    work_dir: Option<&Path>,
) -> Result<(ConnectionConfig, ConnectionConfig, Option<PathBuf>)> {
    match endpoints {
        MigrationTarget::Urls { source, target } => {
            let source = ConnectionConfig::from_url(source).context("Invalid source connection string")?;
            let target = ConnectionConfig::from_url(target).context("Invalid target connection string")?;
            Ok((source, target, work_dir.map(Path::to_path_buf)))
        }
        MigrationTarget::ConfigFile(path) => {
            let config = MigrationConfig::load(path)
                .with_context(|| format!("Failed to load migration config {}", path.display()))?;
            // The command-line flag wins over the file
            let work_dir = work_dir.map(Path::to_path_buf).or(config.options.work_dir);
            Ok((config.source, config.target, work_dir))
        }
    }
}

/// Copy every table of the source database into the target database
///
/// # Examples
///
/// ```no_run
/// # use anyhow::Result;
/// # use sqlferry::commands::migrate::{migrate, MigrationTarget};
/// # async fn example() -> Result<()> {
/// let endpoints = MigrationTarget::Urls {
///     source: "mysql://root:pw@localhost/shop".to_string(),
///     target: "sqlite:///tmp/shop.db".to_string(),
/// };
/// migrate(&endpoints, None, true, false).await?;
/// # Ok(())
/// # }
/// ```
pub async fn migrate(
    endpoints: &MigrationTarget,
    work_dir: Option<&Path>,
    yes: bool,
    json: bool,
) -> Result<()> {
    let (source, target, work_dir) = resolve(endpoints, work_dir)?;

    if let Some(dir) = &work_dir {
        if !dir.is_dir() {
            bail!("Work directory does not exist: {}", dir.display());
        }
    }

    crate::commands::confirm(
        &format!(
            "Migrate {} into {}? Existing tables with the same names will be replaced.",
            source.display_name(),
            target.display_name()
        ),
        yes,
    )?;

    let mut migrator = Migrator::new();
    if let Some(dir) = work_dir {
        migrator = migrator.work_dir(dir);
    }

    let progress = crate::commands::progress_bar(json);
    let on_progress = |p: MigrationProgress| match p.detail {
        Some(Progress::Backup(b)) => {
            progress.set_length(b.total_tables as u64);
            progress.set_position(b.processed_tables as u64);
            if let Some(table) = b.current_table {
                progress.set_message(format!(
                    "{}: {}",
                    p.stage,
                    crate::utils::sanitize_identifier(&table)
                ));
            }
        }
        Some(Progress::Restore(r)) => {
            progress.set_length(r.total_statements as u64);
            progress.set_position(r.current_statement as u64);
        }
        None => {
            if matches!(p.stage, Stage::Complete | Stage::Failed) {
                progress.finish_and_clear();
            } else {
                progress.set_position(0);
                progress.set_message(p.stage.to_string());
            }
        }
    };

    let report = migrator
        .migrate(&source, &target, &on_progress)
        .await
        .context("Migration failed")?;

    if json {
        crate::commands::print_json(&report)?;
    } else {
        tracing::info!(
            "✓ Migrated {} table(s) ({} statements, {} bytes) in {}ms",
            report.tables.len(),
            report.statements,
            report.dump_bytes,
            report.elapsed_ms
        );
    }
    Ok(())
}
