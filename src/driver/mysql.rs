// ABOUTME: MySQL/MariaDB driver built on a single sqlx connection
// ABOUTME: Dumps via SHOW CREATE TABLE and replays statements best-effort in order

use super::{Driver, HealthResult, Progress, ProgressFn};
use crate::config::{ConnectionConfig, EngineKind};
use crate::error::{Error, Result};
use crate::migration::dump::{
    drop_table_statement, insert_statement, quote_ident, BackupOptions, DumpDocument, DumpWriter,
    SqlValue,
};
use crate::sql::statements;
use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow, MySqlSslMode};
use sqlx::{ConnectOptions, Connection, Executor, Row};
use std::time::Instant;

const DIALECT: EngineKind = EngineKind::Mysql;

/// Session settings applied before a restore
///
/// Dumps escape quotes by doubling them, so backslashes must stay literal.
/// Foreign key checks are off so tables can be recreated in any order.
const RESTORE_SESSION: &[&str] = &[
    "SET SESSION sql_mode = CONCAT_WS(',', NULLIF(@@SESSION.sql_mode, ''), 'NO_BACKSLASH_ESCAPES')",
    "SET FOREIGN_KEY_CHECKS = 0",
];

/// Driver for one MySQL or MariaDB database
pub struct MysqlDriver {
    config: ConnectionConfig,
    conn: Option<MySqlConnection>,
}

impl MysqlDriver {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config, conn: None }
    }

    async fn connection(&mut self) -> Result<&mut MySqlConnection> {
        if self.conn.is_none() {
            let conn = connect(&self.config).await?;
            self.conn = Some(conn);
        }
        self.conn
            .as_mut()
            .ok_or_else(|| Error::Connectivity("MySQL connection unavailable".to_string()))
    }
}

fn connect_options(config: &ConnectionConfig) -> MySqlConnectOptions {
    let ssl_mode = if config.ssl {
        MySqlSslMode::Required
    } else {
        MySqlSslMode::Preferred
    };

    MySqlConnectOptions::new()
        .host(config.host())
        .port(config.port().unwrap_or(3306))
        .database(config.database.as_deref().unwrap_or_default())
        .username(config.user.as_deref().unwrap_or_default())
        .password(config.password.as_deref().unwrap_or_default())
        .ssl_mode(ssl_mode)
        .disable_statement_logging()
}

async fn connect(config: &ConnectionConfig) -> Result<MySqlConnection> {
    let conn = connect_options(config)
        .connect()
        .await
        .map_err(|e| Error::Connectivity(mysql_message(&e)))?;
    tracing::debug!("Connected to {}", config.display_name());
    Ok(conn)
}

/// Server message for database errors, the client error otherwise
fn mysql_message(e: &sqlx::Error) -> String {
    match e {
        sqlx::Error::Database(db) => match db.code() {
            Some(code) => format!("{} ({})", db.message(), code),
            None => db.message().to_string(),
        },
        other => other.to_string(),
    }
}

async fn probe(config: &ConnectionConfig) -> Result<String> {
    let mut conn = connect(config).await?;
    let version: String = sqlx::query_scalar("SELECT CAST(VERSION() AS CHAR(255))")
        .fetch_one(&mut conn)
        .await
        .map_err(|e| Error::Connectivity(mysql_message(&e)))?;
    if let Err(e) = conn.close().await {
        tracing::warn!("Failed to close probe connection: {}", e);
    }
    Ok(version_label(&version))
}

fn version_label(version: &str) -> String {
    if version.contains("MariaDB") {
        format!("MariaDB {}", version.split('-').next().unwrap_or(version))
    } else {
        format!("MySQL {}", version)
    }
}

/// Base tables of the connected database, by name
pub async fn list_tables(conn: &mut MySqlConnection) -> Result<Vec<String>> {
    let rows: Vec<MySqlRow> = sqlx::query(
        "SELECT CAST(TABLE_NAME AS CHAR(255)) AS TABLE_NAME
         FROM INFORMATION_SCHEMA.TABLES
         WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'BASE TABLE'
         ORDER BY TABLE_NAME",
    )
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| Error::dump_general(format!("Failed to list tables: {}", mysql_message(&e))))?;

    rows.iter()
        .map(|row| row.try_get::<String, _>("TABLE_NAME"))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::dump_general(mysql_message(&e)))
}

#[derive(Debug, Clone, PartialEq)]
struct MysqlColumn {
    name: String,
    data_type: String,
    unsigned: bool,
}

impl MysqlColumn {
    fn value_kind(&self) -> ValueKind {
        match self.data_type.to_lowercase().as_str() {
            "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" | "year" => {
                if self.unsigned {
                    ValueKind::Decimal
                } else {
                    ValueKind::Int
                }
            }
            "float" => ValueKind::Float32,
            "double" | "real" => ValueKind::Float64,
            "decimal" | "numeric" => ValueKind::Decimal,
            "bit" => ValueKind::Bit,
            "binary" | "varbinary" | "tinyblob" | "blob" | "mediumblob" | "longblob" => {
                ValueKind::Bytes
            }
            _ => ValueKind::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    Int,
    Float32,
    Float64,
    Decimal,
    Bit,
    Bytes,
    Text,
}

impl ValueKind {
    fn select_expr(self, column: &str) -> String {
        let column = quote_ident(column, DIALECT);
        match self {
            ValueKind::Int => format!("CAST({} AS SIGNED)", column),
            ValueKind::Float32 | ValueKind::Float64 | ValueKind::Bytes => column,
            ValueKind::Bit => format!("CAST({} + 0 AS CHAR)", column),
            ValueKind::Decimal | ValueKind::Text => format!("CAST({} AS CHAR)", column),
        }
    }

    fn read(self, row: &MySqlRow, idx: usize) -> std::result::Result<SqlValue, sqlx::Error> {
        Ok(match self {
            ValueKind::Int => row.try_get::<Option<i64>, _>(idx)?.map_or(SqlValue::Null, SqlValue::Int),
            ValueKind::Float32 => row
                .try_get::<Option<f32>, _>(idx)?
                .map_or(SqlValue::Null, |f| SqlValue::Float(f64::from(f))),
            ValueKind::Float64 => row
                .try_get::<Option<f64>, _>(idx)?
                .map_or(SqlValue::Null, SqlValue::Float),
            ValueKind::Decimal | ValueKind::Bit => row
                .try_get::<Option<String>, _>(idx)?
                .map_or(SqlValue::Null, SqlValue::Decimal),
            ValueKind::Bytes => row
                .try_get::<Option<Vec<u8>>, _>(idx)?
                .map_or(SqlValue::Null, SqlValue::Bytes),
            ValueKind::Text => row
                .try_get::<Option<String>, _>(idx)?
                .map_or(SqlValue::Null, SqlValue::Text),
        })
    }
}

async fn table_columns(conn: &mut MySqlConnection, table: &str) -> std::result::Result<Vec<MysqlColumn>, sqlx::Error> {
    let rows: Vec<MySqlRow> = sqlx::query(
        "SELECT CAST(COLUMN_NAME AS CHAR(255)) AS COLUMN_NAME,
                CAST(DATA_TYPE AS CHAR(255)) AS DATA_TYPE,
                IF(COLUMN_TYPE LIKE '%unsigned%', 1, 0) AS is_unsigned
         FROM INFORMATION_SCHEMA.COLUMNS
         WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
         ORDER BY ORDINAL_POSITION",
    )
    .bind(table)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(MysqlColumn {
                name: row.try_get("COLUMN_NAME")?,
                data_type: row.try_get("DATA_TYPE")?,
                unsigned: row.try_get::<i64, _>("is_unsigned")? == 1,
            })
        })
        .collect()
}

async fn show_create_table(conn: &mut MySqlConnection, table: &str) -> std::result::Result<String, sqlx::Error> {
    let row: MySqlRow = sqlx::query(&format!("SHOW CREATE TABLE {}", quote_ident(table, DIALECT)))
        .fetch_one(&mut *conn)
        .await?;
    let ddl: Vec<u8> = row.try_get(1)?;
    Ok(String::from_utf8_lossy(&ddl).into_owned())
}

async fn dump_rows(
    conn: &mut MySqlConnection,
    table: &str,
    columns: &[MysqlColumn],
    writer: &mut DumpWriter,
) -> std::result::Result<usize, sqlx::Error> {
    if columns.is_empty() {
        return Ok(0);
    }

    let kinds: Vec<ValueKind> = columns.iter().map(MysqlColumn::value_kind).collect();
    let names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
    let select_list = columns
        .iter()
        .zip(&kinds)
        .map(|(col, kind)| kind.select_expr(&col.name))
        .collect::<Vec<_>>()
        .join(", ");
    let query = format!("SELECT {} FROM {}", select_list, quote_ident(table, DIALECT));

    let mut rows = sqlx::query(&query).fetch(&mut *conn);
    let mut count = 0;
    while let Some(row) = rows.try_next().await? {
        let values = kinds
            .iter()
            .enumerate()
            .map(|(idx, kind)| kind.read(&row, idx))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        writer.statement(&insert_statement(table, &names, &values, DIALECT));
        count += 1;
    }

    Ok(count)
}

#[async_trait]
impl Driver for MysqlDriver {
    fn kind(&self) -> EngineKind {
        DIALECT
    }

    fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    async fn health_check(&mut self) -> HealthResult {
        let started = Instant::now();
        match tokio::time::timeout(super::HEALTH_CHECK_TIMEOUT, probe(&self.config)).await {
            Ok(Ok(version)) => {
                tracing::debug!("✓ MySQL probe succeeded: {}", version);
                HealthResult::connected(version, started)
            }
            Ok(Err(e)) => HealthResult::failed(e, started),
            Err(_) => HealthResult::failed(
                format!(
                    "Connection timeout after {}s",
                    super::HEALTH_CHECK_TIMEOUT.as_secs()
                ),
                started,
            ),
        }
    }

    async fn dump(&mut self, options: &BackupOptions, on_progress: &ProgressFn<'_>) -> Result<DumpDocument> {
        let scope = options.scope();
        let label = self.config.display_name();
        let database = self.config.database.clone().unwrap_or_default();
        let conn = self.connection().await?;

        let tables = list_tables(conn).await?;
        let total = tables.len();
        tracing::info!("Dumping {} table(s) from {}", total, label);

        let mut writer = DumpWriter::new(DIALECT, &database);
        for (idx, table) in tables.iter().enumerate() {
            on_progress(Progress::table(Some(table), idx, total));
            writer.begin_table(table);

            if scope.includes_schema() {
                let create = show_create_table(conn, table)
                    .await
                    .map_err(|e| Error::dump(table, mysql_message(&e)))?;
                writer.statement(&drop_table_statement(table, DIALECT));
                writer.statement(&create);
            }

            if scope.includes_data() {
                let columns = table_columns(conn, table)
                    .await
                    .map_err(|e| Error::dump(table, mysql_message(&e)))?;
                let rows = dump_rows(conn, table, &columns, &mut writer)
                    .await
                    .map_err(|e| Error::dump(table, mysql_message(&e)))?;
                tracing::debug!("  {} row(s) from '{}'", rows, table);
            }
        }
        on_progress(Progress::table(None, total, total));

        tracing::info!("✓ Dumped {} table(s) from {}", total, label);
        Ok(writer.finish())
    }

    async fn restore(&mut self, sql: &str, on_progress: &ProgressFn<'_>) -> Result<()> {
        let label = self.config.display_name();
        let conn = self.connection().await?;
        let total = statements(sql).count();
        tracing::info!("Restoring {} statement(s) into {}", total, label);

        for setting in RESTORE_SESSION {
            Executor::execute(&mut *conn, *setting).await.map_err(|e| {
                Error::restore_general(format!("Failed to prepare session: {}", mysql_message(&e)))
            })?;
        }

        // DDL commits implicitly, so statements already applied stay applied
        let mut outcome = Ok(());
        for (idx, statement) in statements(sql).enumerate() {
            let index = idx + 1;
            tracing::debug!("Executing statement {}/{}", index, total);
            if let Err(e) = Executor::execute(&mut *conn, statement.as_str()).await {
                outcome = Err(Error::restore(index, &statement, mysql_message(&e)));
                break;
            }
            on_progress(Progress::statement(index, total));
        }

        if let Err(e) = Executor::execute(&mut *conn, "SET FOREIGN_KEY_CHECKS = 1").await {
            tracing::warn!("Failed to re-enable foreign key checks: {}", mysql_message(&e));
        }

        outcome?;
        tracing::info!("✓ Restored {} statement(s) into {}", total, label);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.close().await.map_err(|e| {
                Error::Connectivity(format!("Failed to close MySQL connection: {}", mysql_message(&e)))
            })?;
        }
        Ok(())
    }
}
