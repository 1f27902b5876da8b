// ABOUTME: Embedded SQLite driver backed by rusqlite
// ABOUTME: Runs dumps and restores on a blocking thread, restores inside one transaction

use super::{Driver, HealthResult, Progress, ProgressFn};
use crate::config::{ConnectionConfig, EngineKind};
use crate::error::{Error, Result};
use crate::migration::dump::{
    drop_table_statement, insert_statement, quote_ident, BackupOptions, DumpDocument, DumpScope,
    DumpWriter, SqlValue,
};
use crate::sql::statements;
use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::sync::mpsc;

const DIALECT: EngineKind = EngineKind::Sqlite;

const CANCELLED: &str = "cancelled by caller";

/// How a held connection was opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    ReadOnly,
    ReadWrite,
}

impl Access {
    fn flags(self) -> OpenFlags {
        match self {
            Access::ReadOnly => OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            Access::ReadWrite => {
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX
            }
        }
    }

    fn covers(self, wanted: Access) -> bool {
        self == Access::ReadWrite || wanted == Access::ReadOnly
    }
}

/// Only read-write opens may create the file
fn open(path: &Path, access: Access) -> Result<Connection> {
    if access == Access::ReadOnly && !path.is_file() {
        return Err(Error::Connectivity(format!(
            "Database file not found: {}",
            path.display()
        )));
    }
    let conn = Connection::open_with_flags(path, access.flags()).map_err(|e| {
        Error::Connectivity(format!("Failed to open {}: {}", path.display(), e))
    })?;
    tracing::debug!("Opened SQLite database {} ({:?})", path.display(), access);
    Ok(conn)
}

/// Carries progress from the blocking worker back to the awaiting task
struct Reporter(mpsc::UnboundedSender<Progress>);

impl Reporter {
    /// Returns false once the awaiting task has gone away
    fn send(&self, progress: Progress) -> bool {
        self.0.send(progress).is_ok()
    }

    fn listening(&self) -> bool {
        !self.0.is_closed()
    }
}

/// Driver for a single SQLite database file
pub struct SqliteDriver {
    config: ConnectionConfig,
    conn: Option<(Connection, Access)>,
}

impl SqliteDriver {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config, conn: None }
    }

    fn path(&self) -> Result<PathBuf> {
        self.config
            .file_path
            .clone()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| Error::Configuration("No database file path provided".to_string()))
    }

    /// Run `work` on the blocking pool with a connection opened for at least `access`.
    ///
    /// Progress sent by the worker is forwarded to `on_progress` from the
    /// calling task. Dropping the returned future closes the channel, and the
    /// worker stops at its next check.
    async fn with_connection<T, W>(
        &mut self,
        access: Access,
        on_progress: &ProgressFn<'_>,
        work: W,
    ) -> Result<T>
    where
        T: Send + 'static,
        W: FnOnce(&mut Connection, &Reporter) -> Result<T> + Send + 'static,
    {
        let path = self.path()?;
        let held = self.conn.take().filter(|(_, opened)| opened.covers(access));
        let (sender, mut receiver) = mpsc::unbounded_channel();

        let worker = tokio::task::spawn_blocking(move || -> Result<(Connection, Access, Result<T>)> {
            let (mut conn, opened) = match held {
                Some(held) => held,
                None => (open(&path, access)?, access),
            };
            let outcome = work(&mut conn, &Reporter(sender));
            Ok((conn, opened, outcome))
        });

        // Ends when the worker drops its sender
        while let Some(progress) = receiver.recv().await {
            on_progress(progress);
        }

        let (conn, opened, outcome) = worker
            .await
            .map_err(|e| Error::Connectivity(format!("SQLite worker failed: {}", e)))??;
        self.conn = Some((conn, opened));
        outcome
    }
}

fn probe(path: &Path) -> std::result::Result<String, String> {
    if !path.is_file() {
        return Err(format!("Database file not found: {}", path.display()));
    }
    let conn = Connection::open_with_flags(path, Access::ReadOnly.flags())
        .map_err(|e| e.to_string())?;
    let version: String = conn
        .query_row("SELECT sqlite_version()", [], |row| row.get(0))
        .map_err(|e| e.to_string())?;
    conn.close().map_err(|(_, e)| e.to_string())?;
    Ok(format!("SQLite {}", version))
}

/// User tables in creation order, skipping sqlite internals
pub fn list_tables(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
         ORDER BY rowid",
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}

fn create_statement(conn: &Connection, table: &str) -> rusqlite::Result<String> {
    conn.query_row(
        "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get(0),
    )
}

fn dump_rows(
    conn: &Connection,
    table: &str,
    writer: &mut DumpWriter,
    reporter: &Reporter,
) -> Result<usize> {
    let failed = |e: rusqlite::Error| Error::dump(table, e);
    let query = format!("SELECT * FROM {}", quote_ident(table, DIALECT));
    let mut stmt = conn.prepare(&query).map_err(failed)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let mut rows = stmt.query([]).map_err(failed)?;
    let mut count = 0;

    while let Some(row) = rows.next().map_err(failed)? {
        if !reporter.listening() {
            return Err(Error::dump(table, CANCELLED));
        }
        let mut values = Vec::with_capacity(columns.len());
        for idx in 0..columns.len() {
            values.push(match row.get_ref(idx).map_err(failed)? {
                ValueRef::Null => SqlValue::Null,
                ValueRef::Integer(i) => SqlValue::Int(i),
                ValueRef::Real(f) => SqlValue::Float(f),
                ValueRef::Text(bytes) => SqlValue::Text(String::from_utf8_lossy(bytes).into_owned()),
                ValueRef::Blob(bytes) => SqlValue::Bytes(bytes.to_vec()),
            });
        }
        writer.statement(&insert_statement(table, &columns, &values, DIALECT));
        count += 1;
    }

    Ok(count)
}

fn dump_database(
    conn: &Connection,
    scope: DumpScope,
    label: &str,
    reporter: &Reporter,
) -> Result<DumpDocument> {
    let tables = list_tables(conn).map_err(Error::dump_general)?;
    let total = tables.len();
    tracing::info!("Dumping {} table(s) from {}", total, label);

    let mut writer = DumpWriter::new(DIALECT, label);
    for (idx, table) in tables.iter().enumerate() {
        if !reporter.send(Progress::table(Some(table), idx, total)) {
            return Err(Error::dump(table, CANCELLED));
        }
        writer.begin_table(table);

        if scope.includes_schema() {
            let create = create_statement(conn, table).map_err(|e| Error::dump(table, e))?;
            writer.statement(&drop_table_statement(table, DIALECT));
            writer.statement(&create);
        }

        if scope.includes_data() {
            let rows = dump_rows(conn, table, &mut writer, reporter)?;
            tracing::debug!("  {} row(s) from '{}'", rows, table);
        }
    }
    reporter.send(Progress::table(None, total, total));

    tracing::info!("✓ Dumped {} table(s) from {}", total, label);
    Ok(writer.finish())
}

fn restore_script(conn: &mut Connection, sql: &str, label: &str, reporter: &Reporter) -> Result<()> {
    let total = statements(sql).count();
    tracing::info!("Restoring {} statement(s) into {}", total, label);

    let tx = conn
        .transaction()
        .map_err(|e| Error::restore_general(format!("Failed to begin transaction: {}", e)))?;

    // Dropping `tx` on any early return rolls everything back
    for (idx, statement) in statements(sql).enumerate() {
        let index = idx + 1;
        if !reporter.listening() {
            return Err(Error::restore(index, &statement, CANCELLED));
        }
        tracing::debug!("Executing statement {}/{}", index, total);
        tx.execute_batch(&statement)
            .map_err(|e| Error::restore(index, &statement, e))?;
        reporter.send(Progress::statement(index, total));
    }

    if !reporter.listening() {
        return Err(Error::restore_general(CANCELLED));
    }
    tx.commit()
        .map_err(|e| Error::restore_general(format!("Failed to commit: {}", e)))?;

    tracing::info!("✓ Restored {} statement(s) into {}", total, label);
    Ok(())
}

#[async_trait]
impl Driver for SqliteDriver {
    fn kind(&self) -> EngineKind {
        DIALECT
    }

    fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    async fn health_check(&mut self) -> HealthResult {
        let started = Instant::now();
        let path = match self.path() {
            Ok(path) => path,
            Err(e) => return HealthResult::failed(e, started),
        };

        let probe_path = path.clone();
        let outcome = tokio::time::timeout(
            super::HEALTH_CHECK_TIMEOUT,
            tokio::task::spawn_blocking(move || probe(&probe_path)),
        )
        .await;

        match outcome {
            Ok(Ok(Ok(version))) => {
                tracing::debug!("✓ SQLite probe succeeded for {}", path.display());
                HealthResult::connected(version, started)
            }
            Ok(Ok(Err(e))) => HealthResult::failed(e, started),
            Ok(Err(join_err)) => HealthResult::failed(join_err, started),
            Err(_) => HealthResult::failed(
                format!(
                    "Timed out after {}s opening {}",
                    super::HEALTH_CHECK_TIMEOUT.as_secs(),
                    path.display()
                ),
                started,
            ),
        }
    }

    async fn dump(&mut self, options: &BackupOptions, on_progress: &ProgressFn<'_>) -> Result<DumpDocument> {
        let scope = options.scope();
        let label = self.config.display_name();
        self.with_connection(Access::ReadOnly, on_progress, move |conn, reporter| {
            dump_database(conn, scope, &label, reporter)
        })
        .await
    }

    async fn restore(&mut self, sql: &str, on_progress: &ProgressFn<'_>) -> Result<()> {
        let label = self.config.display_name();
        let sql = sql.to_string();
        self.with_connection(Access::ReadWrite, on_progress, move |conn, reporter| {
            restore_script(conn, &sql, &label, reporter)
        })
        .await
    }

    async fn close(&mut self) -> Result<()> {
        if let Some((conn, _)) = self.conn.take() {
            conn.close().map_err(|(_, e)| {
                Error::Connectivity(format!("Failed to close SQLite database: {}", e))
            })?;
        }
        Ok(())
    }
}
