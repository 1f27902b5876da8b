// ABOUTME: Cross-engine migration: probe both ends, dump, translate, restore
// ABOUTME: Reports staged progress and always releases drivers and the dump artifact

use crate::config::ConnectionConfig;
use crate::driver::{create_driver, Driver, Progress};
use crate::error::{Error, Result};
use crate::migration::dump::BackupOptions;
use crate::sql::{rewrite, statements};
use serde::Serialize;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tempfile::NamedTempFile;

/// Where a migration run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    ProbingSource,
    ProbingTarget,
    Dumping,
    Translating,
    Restoring,
    Complete,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Idle => "idle",
            Stage::ProbingSource => "probing source",
            Stage::ProbingTarget => "probing target",
            Stage::Dumping => "dumping",
            Stage::Translating => "translating",
            Stage::Restoring => "restoring",
            Stage::Complete => "complete",
            Stage::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Progress snapshot tagged with the stage that produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationProgress {
    pub stage: Stage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Progress>,
}

impl MigrationProgress {
    pub fn stage(stage: Stage) -> Self {
        Self {
            stage,
            detail: None,
        }
    }
}

/// Callback receiving migration progress
pub type MigrationProgressFn<'a> = dyn Fn(MigrationProgress) + Send + Sync + 'a;

/// Summary of a completed migration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationReport {
    pub source_version: Option<String>,
    pub target_version: Option<String>,
    pub tables: Vec<String>,
    pub statements: usize,
    pub dump_bytes: u64,
    pub elapsed_ms: u64,
}

/// Builds drivers for the orchestrator
pub trait DriverFactory: Send + Sync {
    fn create(&self, config: ConnectionConfig) -> Result<Box<dyn Driver>>;
}

/// Factory backed by [`create_driver`]
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineDriverFactory;

impl DriverFactory for EngineDriverFactory {
    fn create(&self, config: ConnectionConfig) -> Result<Box<dyn Driver>> {
        create_driver(config)
    }
}

/// Reject configs that are invalid or point at the same database
pub fn check_distinct(source: &ConnectionConfig, target: &ConnectionConfig) -> Result<()> {
    source.validate()?;
    target.validate()?;
    if source.identity()? == target.identity()? {
        return Err(Error::Configuration(format!(
            "Source and target are the same database ({})",
            source.display_name()
        )));
    }
    Ok(())
}

/// Runs migrations with a configurable factory and artifact directory
#[derive(Debug, Clone, Default)]
pub struct Migrator<F = EngineDriverFactory> {
    factory: F,
    work_dir: Option<PathBuf>,
}

impl Migrator<EngineDriverFactory> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<F: DriverFactory> Migrator<F> {
    pub fn with_factory(factory: F) -> Self {
        Self {
            factory,
            work_dir: None,
        }
    }

    /// Directory for the transient `.sql` artifact instead of the system temp dir
    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    /// Copy every table from `source` into `target`
    ///
    /// Both drivers are closed and the dump artifact is deleted whether the
    /// run succeeds or fails. Nothing is retried.
    pub async fn migrate(
        &self,
        source: &ConnectionConfig,
        target: &ConnectionConfig,
        on_progress: &MigrationProgressFn<'_>,
    ) -> Result<MigrationReport> {
        check_distinct(source, target)?;

        tracing::info!(
            "Starting migration: {} → {}",
            source.display_name(),
            target.display_name()
        );

        let mut source_driver = self.factory.create(source.clone())?;
        let mut target_driver = match self.factory.create(target.clone()) {
            Ok(driver) => driver,
            Err(e) => {
                close_driver(source_driver.as_mut(), "source").await;
                return Err(e);
            }
        };

        let outcome = self
            .run(source_driver.as_mut(), target_driver.as_mut(), on_progress)
            .await;

        close_driver(source_driver.as_mut(), "source").await;
        close_driver(target_driver.as_mut(), "target").await;

        match outcome {
            Ok(report) => {
                tracing::info!(
                    "✓ Migration complete: {} table(s), {} statement(s) in {}ms",
                    report.tables.len(),
                    report.statements,
                    report.elapsed_ms
                );
                Ok(report)
            }
            Err(e) => {
                tracing::error!("Migration failed: {}", e);
                on_progress(MigrationProgress::stage(Stage::Failed));
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        source: &mut dyn Driver,
        target: &mut dyn Driver,
        on_progress: &MigrationProgressFn<'_>,
    ) -> Result<MigrationReport> {
        let started = Instant::now();

        on_progress(MigrationProgress::stage(Stage::ProbingSource));
        let source_health = source.health_check().await;
        if !source_health.ok {
            return Err(Error::Connectivity(format!(
                "source unreachable: {}",
                source_health.error.unwrap_or_default()
            )));
        }
        tracing::info!("✓ Source reachable ({}ms)", source_health.latency_ms);

        on_progress(MigrationProgress::stage(Stage::ProbingTarget));
        let target_health = target.health_check().await;
        if !target_health.ok {
            return Err(Error::Connectivity(format!(
                "target unreachable: {}",
                target_health.error.unwrap_or_default()
            )));
        }
        tracing::info!("✓ Target reachable ({}ms)", target_health.latency_ms);

        on_progress(MigrationProgress::stage(Stage::Dumping));
        let document = source
            .dump(&BackupOptions::default(), &|p| {
                on_progress(MigrationProgress {
                    stage: Stage::Dumping,
                    detail: Some(p),
                })
            })
            .await?;
        let tables = document.tables().to_vec();

        // Deleted when dropped, including when this future is abandoned
        let mut artifact = self.create_artifact()?;
        write_artifact(&mut artifact, document.as_str())?;
        drop(document);
        let dump_bytes = artifact
            .as_file()
            .metadata()
            .map_err(|e| Error::io("Failed to stat dump artifact", e))?
            .len();
        tracing::info!(
            "✓ Dump written to {} ({} bytes)",
            artifact.path().display(),
            dump_bytes
        );

        on_progress(MigrationProgress::stage(Stage::Translating));
        let text = read_artifact(artifact.path())?;
        let text = if source.kind() != target.kind() {
            let translated = rewrite(&text, source.kind(), target.kind())?;
            artifact = self.create_artifact()?;
            write_artifact(&mut artifact, &translated)?;
            tracing::info!("✓ Translated dump from {} to {}", source.kind(), target.kind());
            translated
        } else {
            text
        };

        on_progress(MigrationProgress::stage(Stage::Restoring));
        let statement_count = statements(&text).count();
        target
            .restore(&text, &|p| {
                on_progress(MigrationProgress {
                    stage: Stage::Restoring,
                    detail: Some(p),
                })
            })
            .await?;

        on_progress(MigrationProgress::stage(Stage::Complete));
        Ok(MigrationReport {
            source_version: source_health.version,
            target_version: target_health.version,
            tables,
            statements: statement_count,
            dump_bytes,
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }

    fn create_artifact(&self) -> Result<NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("sqlferry-").suffix(".sql");
        match &self.work_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(|e| Error::io("Failed to create dump artifact", e))
    }
}

/// Migrate with the default driver factory and the system temp dir
pub async fn migrate(
    source: &ConnectionConfig,
    target: &ConnectionConfig,
    on_progress: &MigrationProgressFn<'_>,
) -> Result<MigrationReport> {
    Migrator::new().migrate(source, target, on_progress).await
}

fn write_artifact(artifact: &mut NamedTempFile, text: &str) -> Result<()> {
    artifact
        .write_all(text.as_bytes())
        .and_then(|_| artifact.flush())
        .map_err(|e| Error::io(format!("Failed to write {}", artifact.path().display()), e))
}

fn read_artifact(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| Error::io(format!("Failed to read {}", path.display()), e))
}

async fn close_driver(driver: &mut dyn Driver, role: &str) {
    if let Err(e) = driver.close().await {
        tracing::warn!("⚠ Failed to close {} connection: {}", role, e);
    }
}
