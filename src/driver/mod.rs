// ABOUTME: Uniform driver contract implemented once per database engine
// ABOUTME: Defines health results, progress snapshots and the engine factory

pub mod mysql;
pub mod postgres;
pub mod sqlite;

pub use mysql::MysqlDriver;
pub use postgres::PostgresDriver;
pub use sqlite::SqliteDriver;

use crate::config::{ConnectionConfig, EngineKind};
use crate::error::Result;
use crate::migration::dump::{BackupOptions, DumpDocument};
use async_trait::async_trait;
use serde::Serialize;
use std::time::{Duration, Instant};

/// Upper bound for opening a connection during a health probe
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of a connectivity probe
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthResult {
    pub fn connected(version: impl Into<String>, started: Instant) -> Self {
        Self {
            ok: true,
            version: Some(version.into()),
            latency_ms: elapsed_ms(started),
            message: Some("Connected successfully".to_string()),
            error: None,
        }
    }

    pub fn failed(error: impl ToString, started: Instant) -> Self {
        Self {
            ok: false,
            version: None,
            latency_ms: elapsed_ms(started),
            message: Some("Connection failed".to_string()),
            error: Some(error.to_string()),
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Progress while a dump walks through tables
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupProgress {
    pub current_table: Option<String>,
    pub processed_tables: usize,
    pub total_tables: usize,
    pub percentage: u8,
}

/// Progress while a restore replays statements
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreProgress {
    pub current_statement: usize,
    pub total_statements: usize,
    pub percentage: u8,
}

/// One immutable progress snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "lowercase")]
pub enum Progress {
    Backup(BackupProgress),
    Restore(RestoreProgress),
}

impl Progress {
    pub fn table(current: Option<&str>, processed: usize, total: usize) -> Self {
        Progress::Backup(BackupProgress {
            current_table: current.map(str::to_string),
            processed_tables: processed,
            total_tables: total,
            percentage: percentage(processed, total),
        })
    }

    pub fn statement(current: usize, total: usize) -> Self {
        Progress::Restore(RestoreProgress {
            current_statement: current,
            total_statements: total,
            percentage: percentage(current, total),
        })
    }

    pub fn percentage(&self) -> u8 {
        match self {
            Progress::Backup(p) => p.percentage,
            Progress::Restore(p) => p.percentage,
        }
    }
}

/// Rounded completion percentage; an empty workload counts as done
pub fn percentage(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = (done.min(total) as f64 / total as f64 * 100.0).round();
    pct as u8
}

/// Callback receiving progress snapshots
pub type ProgressFn<'a> = dyn Fn(Progress) + Send + Sync + 'a;

/// Progress callback that drops every snapshot
pub fn no_progress(_: Progress) {}

/// Capabilities every engine driver provides.
///
/// One instance serves one run: methods take `&mut self`, and the instance is
/// discarded after [`Driver::close`].
#[async_trait]
pub trait Driver: Send {
    fn kind(&self) -> EngineKind;

    fn config(&self) -> &ConnectionConfig;

    /// Open a handle, run a version query, and release the handle.
    ///
    /// Never fails: problems are reported through `ok: false`.
    async fn health_check(&mut self) -> HealthResult;

    /// Render schema and/or data of all user tables as SQL text
    async fn dump(&mut self, options: &BackupOptions, on_progress: &ProgressFn<'_>) -> Result<DumpDocument>;

    /// Replay a dump document statement by statement
    async fn restore(&mut self, sql: &str, on_progress: &ProgressFn<'_>) -> Result<()>;

    /// Release any held handle. Safe to call more than once.
    async fn close(&mut self) -> Result<()>;
}

/// Build the driver for `config`, validating it first
///
/// The engine is chosen here, once; callers only see the [`Driver`] trait.
///
/// # Examples
///
/// ```no_run
/// # use sqlferry::config::ConnectionConfig;
/// # use sqlferry::driver::{create_driver, no_progress};
/// # use sqlferry::migration::dump::BackupOptions;
/// # async fn example() -> sqlferry::Result<()> {
/// let mut driver = create_driver(ConnectionConfig::sqlite("app.db"))?;
/// let health = driver.health_check().await;
/// if health.ok {
///     let dump = driver.dump(&BackupOptions::default(), &no_progress).await?;
///     println!("{}", dump.as_str());
/// }
/// driver.close().await?;
/// # Ok(())
/// # }
/// ```
pub fn create_driver(config: ConnectionConfig) -> Result<Box<dyn Driver>> {
    config.validate()?;
    let driver: Box<dyn Driver> = match config.engine()? {
        EngineKind::Postgres => Box::new(PostgresDriver::new(config)),
        EngineKind::Mysql => Box::new(MysqlDriver::new(config)),
        EngineKind::Sqlite => Box::new(SqliteDriver::new(config)),
    };
    Ok(driver)
}
