// ABOUTME: PostgreSQL driver built on tokio-postgres with native TLS
// ABOUTME: Reconstructs table DDL from information_schema and restores in one transaction

use super::{Driver, HealthResult, Progress, ProgressFn};
use crate::config::{ConnectionConfig, EngineKind};
use crate::error::{Error, Result};
use crate::migration::dump::{
    drop_table_statement, insert_statement, quote_ident, BackupOptions, BackupResult,
    DumpDocument, DumpWriter, SqlValue,
};
use crate::migration::tools;
use crate::sql::statements;
use async_trait::async_trait;
use futures::{pin_mut, TryStreamExt};
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use std::path::Path;
use std::time::Instant;
use tokio_postgres::{Client, NoTls, Row};

const DIALECT: EngineKind = EngineKind::Postgres;

/// Driver for one PostgreSQL database
pub struct PostgresDriver {
    config: ConnectionConfig,
    client: Option<Client>,
}

impl PostgresDriver {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            client: None,
        }
    }

    async fn client(&mut self) -> Result<&mut Client> {
        if self.client.is_none() {
            let client = connect(&self.config).await?;
            self.client = Some(client);
        }
        self.client
            .as_mut()
            .ok_or_else(|| Error::Connectivity("PostgreSQL client unavailable".to_string()))
    }

    /// Write a `pg_dump` custom-format archive to `path`
    ///
    /// Requires the PostgreSQL client tools in PATH.
    pub async fn dump_archive(&mut self, path: &Path, options: &BackupOptions) -> Result<BackupResult> {
        tracing::info!("Dumping {} to archive {}", self.config.display_name(), path.display());

        let tables = list_tables(self.client().await?).await?;
        let command = tools::pg_dump_command(&self.config, path, options.scope());
        tools::run_tool(&command).await.map_err(Error::dump_general)?;

        let size_bytes = std::fs::metadata(path)
            .map_err(|e| Error::io(format!("Failed to stat {}", path.display()), e))?
            .len();

        tracing::info!("✓ Archive written ({} bytes)", size_bytes);
        Ok(BackupResult {
            path: path.to_path_buf(),
            size_bytes,
            tables_count: tables.len(),
        })
    }

    /// Replay a custom-format archive with `pg_restore`
    pub async fn restore_archive(&mut self, path: &Path) -> Result<()> {
        tracing::info!("Restoring archive {} into {}", path.display(), self.config.display_name());

        let command = tools::pg_restore_command(&self.config, path);
        tools::run_tool(&command)
            .await
            .map_err(Error::restore_general)?;

        tracing::info!("✓ Archive restored");
        Ok(())
    }
}

fn pg_config(config: &ConnectionConfig) -> tokio_postgres::Config {
    let mut pg = tokio_postgres::Config::new();
    pg.host(config.host())
        .port(config.port().unwrap_or(5432))
        .dbname(config.database.as_deref().unwrap_or_default())
        .user(config.user.as_deref().unwrap_or_default())
        .connect_timeout(super::HEALTH_CHECK_TIMEOUT)
        .application_name("sqlferry");
    if let Some(password) = &config.password {
        pg.password(password);
    }
    pg
}

/// Connect and spawn the connection task
async fn connect(config: &ConnectionConfig) -> Result<Client> {
    let pg = pg_config(config);

    let client = if config.ssl {
        let tls_connector = TlsConnector::builder()
            .danger_accept_invalid_certs(false)
            .build()
            .map_err(|e| Error::Connectivity(format!("Failed to build TLS connector: {}", e)))?;
        let tls = MakeTlsConnector::new(tls_connector);

        let (client, connection) = pg.connect(tls).await.map_err(describe_connect_error)?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("Connection error: {}", e);
            }
        });
        client
    } else {
        let (client, connection) = pg.connect(NoTls).await.map_err(describe_connect_error)?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("Connection error: {}", e);
            }
        });
        client
    };

    tracing::debug!("Connected to {}", config.display_name());
    Ok(client)
}

fn describe_connect_error(e: tokio_postgres::Error) -> Error {
    let error_msg = pg_message(&e);

    let message = if error_msg.contains("password authentication failed") {
        format!("Authentication failed: invalid username or password ({})", error_msg)
    } else if error_msg.contains("database") && error_msg.contains("does not exist") {
        format!(
            "Database does not exist: {}. Create it first or check the connection settings.",
            error_msg
        )
    } else if error_msg.contains("Connection refused") || error_msg.contains("could not connect") {
        format!(
            "Connection refused: unable to reach database server. \
             Check that the host and port are correct and the server is running. Error: {}",
            error_msg
        )
    } else if error_msg.contains("timeout") || error_msg.contains("timed out") {
        format!("Connection timeout: database server did not respond in time. Error: {}", error_msg)
    } else if error_msg.contains("SSL") || error_msg.contains("TLS") {
        format!("TLS/SSL error: failed to establish secure connection. Error: {}", error_msg)
    } else if error_msg.contains("no pg_hba.conf entry") {
        format!(
            "Access denied: the server's pg_hba.conf does not accept connections from this host. Error: {}",
            error_msg
        )
    } else {
        error_msg
    };

    Error::Connectivity(message)
}

/// Server-side message when there is one, the client error otherwise
fn pg_message(e: &tokio_postgres::Error) -> String {
    match e.as_db_error() {
        Some(db) => db.message().to_string(),
        None => match std::error::Error::source(e) {
            Some(source) => format!("{}: {}", e, source),
            None => e.to_string(),
        },
    }
}

async fn probe(config: &ConnectionConfig) -> Result<String> {
    let client = connect(config).await?;
    let row = client
        .query_one("SELECT version()", &[])
        .await
        .map_err(|e| Error::Connectivity(pg_message(&e)))?;
    let full: String = row.get(0);
    // "PostgreSQL 16.2 on x86_64-pc-linux-gnu, compiled by ..."
    Ok(full.split(',').next().unwrap_or(&full).trim().to_string())
}

/// Tables in the `public` schema, by name
pub async fn list_tables(client: &Client) -> Result<Vec<String>> {
    let rows = client
        .query(
            "SELECT tablename::text
             FROM pg_catalog.pg_tables
             WHERE schemaname = 'public'
             ORDER BY tablename",
            &[],
        )
        .await
        .map_err(|e| Error::dump_general(format!("Failed to list tables: {}", pg_message(&e))))?;

    Ok(rows.iter().map(|row| row.get(0)).collect())
}

/// Column metadata from information_schema
#[derive(Debug, Clone, PartialEq)]
struct PgColumn {
    name: String,
    data_type: String,
    udt_name: String,
    max_length: Option<i32>,
    precision: Option<i32>,
    scale: Option<i32>,
    nullable: bool,
    sequence_backed: bool,
}

impl PgColumn {
    fn from_row(row: &Row) -> Self {
        let default: Option<String> = row.get("column_default");
        let is_identity: Option<String> = row.get("is_identity");
        Self {
            name: row.get("column_name"),
            data_type: row.get("data_type"),
            udt_name: row.get("udt_name"),
            max_length: row.get("character_maximum_length"),
            precision: row.get("numeric_precision"),
            scale: row.get("numeric_scale"),
            nullable: row.get::<_, String>("is_nullable") == "YES",
            sequence_backed: default.is_some_and(|d| d.starts_with("nextval("))
                || is_identity.as_deref() == Some("YES"),
        }
    }

    /// DDL type as the column is declared
    fn declared_type(&self) -> String {
        if self.sequence_backed {
            match self.data_type.as_str() {
                "integer" => return "serial".to_string(),
                "bigint" => return "bigserial".to_string(),
                "smallint" => return "smallserial".to_string(),
                _ => {}
            }
        }

        match self.data_type.as_str() {
            "character varying" => match self.max_length {
                Some(n) => format!("character varying({})", n),
                None => "character varying".to_string(),
            },
            "character" => format!("character({})", self.max_length.unwrap_or(1)),
            "numeric" => match (self.precision, self.scale) {
                (Some(p), Some(s)) => format!("numeric({},{})", p, s),
                (Some(p), None) => format!("numeric({})", p),
                _ => "numeric".to_string(),
            },
            "ARRAY" => format!("{}[]", self.udt_name.trim_start_matches('_')),
            "USER-DEFINED" => self.udt_name.clone(),
            other => other.to_string(),
        }
    }

    /// How the column is selected and decoded during a data dump
    fn value_kind(&self) -> ValueKind {
        match self.data_type.as_str() {
            "smallint" | "integer" | "bigint" => ValueKind::Int,
            "real" | "double precision" => ValueKind::Float,
            "numeric" => ValueKind::Decimal,
            "boolean" => ValueKind::Bool,
            "bytea" => ValueKind::Bytes,
            _ => ValueKind::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    Int,
    Float,
    Decimal,
    Bool,
    Bytes,
    Text,
}

impl ValueKind {
    fn select_expr(self, column: &str) -> String {
        let column = quote_ident(column, DIALECT);
        match self {
            ValueKind::Int => format!("{}::bigint", column),
            ValueKind::Float => format!("{}::float8", column),
            ValueKind::Bool | ValueKind::Bytes => column,
            ValueKind::Decimal | ValueKind::Text => format!("{}::text", column),
        }
    }

    fn read(self, row: &Row, idx: usize) -> std::result::Result<SqlValue, tokio_postgres::Error> {
        Ok(match self {
            ValueKind::Int => row.try_get::<_, Option<i64>>(idx)?.map_or(SqlValue::Null, SqlValue::Int),
            ValueKind::Float => row
                .try_get::<_, Option<f64>>(idx)?
                .map_or(SqlValue::Null, SqlValue::Float),
            ValueKind::Decimal => row
                .try_get::<_, Option<String>>(idx)?
                .map_or(SqlValue::Null, SqlValue::Decimal),
            ValueKind::Bool => row
                .try_get::<_, Option<bool>>(idx)?
                .map_or(SqlValue::Null, SqlValue::Bool),
            ValueKind::Bytes => row
                .try_get::<_, Option<Vec<u8>>>(idx)?
                .map_or(SqlValue::Null, SqlValue::Bytes),
            ValueKind::Text => row
                .try_get::<_, Option<String>>(idx)?
                .map_or(SqlValue::Null, SqlValue::Text),
        })
    }
}

async fn table_columns(client: &Client, table: &str) -> std::result::Result<Vec<PgColumn>, tokio_postgres::Error> {
    let rows = client
        .query(
            "SELECT column_name::text AS column_name,
                    data_type::text AS data_type,
                    udt_name::text AS udt_name,
                    character_maximum_length::int4 AS character_maximum_length,
                    numeric_precision::int4 AS numeric_precision,
                    numeric_scale::int4 AS numeric_scale,
                    is_nullable::text AS is_nullable,
                    column_default::text AS column_default,
                    is_identity::text AS is_identity
             FROM information_schema.columns
             WHERE table_schema = 'public' AND table_name = $1
             ORDER BY ordinal_position",
            &[&table],
        )
        .await?;
    Ok(rows.iter().map(PgColumn::from_row).collect())
}

async fn primary_key(client: &Client, table: &str) -> std::result::Result<Vec<String>, tokio_postgres::Error> {
    let rows = client
        .query(
            "SELECT kcu.column_name::text
             FROM information_schema.table_constraints tc
             JOIN information_schema.key_column_usage kcu
               ON tc.constraint_name = kcu.constraint_name
              AND tc.table_schema = kcu.table_schema
              AND tc.table_name = kcu.table_name
             WHERE tc.constraint_type = 'PRIMARY KEY'
               AND tc.table_schema = 'public'
               AND tc.table_name = $1
             ORDER BY kcu.ordinal_position",
            &[&table],
        )
        .await?;
    Ok(rows.iter().map(|row| row.get(0)).collect())
}

/// Assemble `CREATE TABLE` from column metadata
///
/// A single-column primary key is declared inline; a composite key becomes a
/// table constraint. Column defaults are not carried over.
fn create_table_statement(table: &str, columns: &[PgColumn], primary_key: &[String]) -> String {
    let inline_pk = match primary_key {
        [single] => Some(single.as_str()),
        _ => None,
    };

    let mut lines: Vec<String> = columns
        .iter()
        .map(|col| {
            let mut line = format!("    {} {}", quote_ident(&col.name, DIALECT), col.declared_type());
            if inline_pk == Some(col.name.as_str()) {
                line.push_str(" PRIMARY KEY");
            } else if !col.nullable && !col.sequence_backed {
                line.push_str(" NOT NULL");
            }
            line
        })
        .collect();

    if primary_key.len() > 1 {
        let key = primary_key
            .iter()
            .map(|c| quote_ident(c, DIALECT))
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!("    PRIMARY KEY ({})", key));
    }

    format!(
        "CREATE TABLE {} (\n{}\n);",
        quote_ident(table, DIALECT),
        lines.join(",\n")
    )
}

async fn dump_rows(
    client: &Client,
    table: &str,
    columns: &[PgColumn],
    writer: &mut DumpWriter,
) -> std::result::Result<usize, tokio_postgres::Error> {
    if columns.is_empty() {
        return Ok(0);
    }

    let kinds: Vec<ValueKind> = columns.iter().map(PgColumn::value_kind).collect();
    let names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
    let select_list = columns
        .iter()
        .zip(&kinds)
        .map(|(col, kind)| kind.select_expr(&col.name))
        .collect::<Vec<_>>()
        .join(", ");
    let query = format!("SELECT {} FROM {}", select_list, quote_ident(table, DIALECT));

    let rows = client.query_raw(query.as_str(), Vec::<String>::new()).await?;
    pin_mut!(rows);

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
impl Driver for PostgresDriver {
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
                tracing::debug!("✓ PostgreSQL probe succeeded: {}", version);
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
        let client = self.client().await?;

        let tables = list_tables(client).await?;
        let total = tables.len();
        tracing::info!("Dumping {} table(s) from {}", total, label);

        let mut writer = DumpWriter::new(DIALECT, &database);
        for (idx, table) in tables.iter().enumerate() {
            on_progress(Progress::table(Some(table), idx, total));
            writer.begin_table(table);

            let columns = table_columns(client, table)
                .await
                .map_err(|e| Error::dump(table, pg_message(&e)))?;

            if scope.includes_schema() {
                let key = primary_key(client, table)
                    .await
                    .map_err(|e| Error::dump(table, pg_message(&e)))?;
                writer.statement(&drop_table_statement(table, DIALECT));
                writer.statement(&create_table_statement(table, &columns, &key));
            }

            if scope.includes_data() {
                let rows = dump_rows(client, table, &columns, &mut writer)
                    .await
                    .map_err(|e| Error::dump(table, pg_message(&e)))?;
                tracing::debug!("  {} row(s) from '{}'", rows, table);
            }
        }
        on_progress(Progress::table(None, total, total));

        tracing::info!("✓ Dumped {} table(s) from {}", total, label);
        Ok(writer.finish())
    }

    async fn restore(&mut self, sql: &str, on_progress: &ProgressFn<'_>) -> Result<()> {
        let label = self.config.display_name();
        let client = self.client().await?;
        let total = statements(sql).count();
        tracing::info!("Restoring {} statement(s) into {}", total, label);

        let tx = client.transaction().await.map_err(|e| {
            Error::restore_general(format!("Failed to begin transaction: {}", pg_message(&e)))
        })?;

        for (idx, statement) in statements(sql).enumerate() {
            let index = idx + 1;
            tracing::debug!("Executing statement {}/{}", index, total);
            // Dropping `tx` on the error path rolls everything back
            tx.batch_execute(&statement)
                .await
                .map_err(|e| Error::restore(index, &statement, pg_message(&e)))?;
            on_progress(Progress::statement(index, total));
        }

        tx.commit().await.map_err(|e| {
            Error::restore_general(format!("Failed to commit: {}", pg_message(&e)))
        })?;

        tracing::info!("✓ Restored {} statement(s) into {}", total, label);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        // Dropping the client ends the spawned connection task
        self.client.take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::no_progress;

    fn column(name: &str, data_type: &str) -> PgColumn {
        PgColumn {
            name: name.to_string(),
            data_type: data_type.to_string(),
            udt_name: String::new(),
            max_length: None,
            precision: None,
            scale: None,
            nullable: true,
            sequence_backed: false,
        }
    }

    #[test]
    fn test_declared_types() {
        let mut id = column("id", "integer");
        id.sequence_backed = true;
        assert_eq!(id.declared_type(), "serial");

        let mut big = column("id", "bigint");
        big.sequence_backed = true;
        assert_eq!(big.declared_type(), "bigserial");

        let mut name = column("name", "character varying");
        name.max_length = Some(120);
        assert_eq!(name.declared_type(), "character varying(120)");

        let mut price = column("price", "numeric");
        price.precision = Some(10);
        price.scale = Some(2);
        assert_eq!(price.declared_type(), "numeric(10,2)");

        let mut tags = column("tags", "ARRAY");
        tags.udt_name = "_text".to_string();
        assert_eq!(tags.declared_type(), "text[]");

        let mut mood = column("mood", "USER-DEFINED");
        mood.udt_name = "mood".to_string();
        assert_eq!(mood.declared_type(), "mood");

        assert_eq!(
            column("at", "timestamp without time zone").declared_type(),
            "timestamp without time zone"
        );
    }

    #[test]
    fn test_create_table_inline_primary_key() {
        let mut id = column("id", "integer");
        id.sequence_backed = true;
        id.nullable = false;
        let mut email = column("email", "text");
        email.nullable = false;
        let columns = vec![id, email, column("name", "text")];

        let sql = create_table_statement("users", &columns, &["id".to_string()]);
        assert_eq!(
            sql,
            "CREATE TABLE users (\n    id serial PRIMARY KEY,\n    email text NOT NULL,\n    name text\n);"
        );
    }

    #[test]
    fn test_create_table_composite_key_and_quoting() {
        let mut a = column("orderId", "integer");
        a.nullable = false;
        let mut b = column("line", "integer");
        b.nullable = false;
        let columns = vec![a, b];

        let sql = create_table_statement(
            "Order Lines",
            &columns,
            &["orderId".to_string(), "line".to_string()],
        );
        assert_eq!(
            sql,
            "CREATE TABLE \"Order Lines\" (\n    \"orderId\" integer NOT NULL,\n    line integer NOT NULL,\n    PRIMARY KEY (\"orderId\", line)\n);"
        );
    }

    #[test]
    fn test_select_expressions() {
        assert_eq!(ValueKind::Int.select_expr("id"), "id::bigint");
        assert_eq!(ValueKind::Decimal.select_expr("price"), "price::text");
        assert_eq!(ValueKind::Bytes.select_expr("data"), "data");
        assert_eq!(ValueKind::Text.select_expr("User"), "\"User\"::text");
        assert_eq!(column("x", "jsonb").value_kind(), ValueKind::Text);
        assert_eq!(column("x", "real").value_kind(), ValueKind::Float);
    }

    #[tokio::test]
    async fn test_health_check_unreachable_server() {
        let config = ConnectionConfig::server(EngineKind::Postgres, "127.0.0.1", Some(1), "db", "u", "p");
        let mut driver = PostgresDriver::new(config);
        let health = driver.health_check().await;
        assert!(!health.ok);
        assert!(health.error.is_some());
        assert!(health.version.is_none());
    }

    #[tokio::test]
    async fn test_close_without_connection() {
        let config = ConnectionConfig::server(EngineKind::Postgres, "localhost", None, "db", "u", "p");
        let mut driver = PostgresDriver::new(config);
        driver.close().await.unwrap();
        driver.close().await.unwrap();
    }

    // NOTE: Requires a real PostgreSQL instance; the test creates and drops
    // its own tables.
    #[tokio::test]
    #[ignore]
    async fn test_round_trip_against_server() {
        let url = std::env::var("TEST_POSTGRES_URL")
            .expect("TEST_POSTGRES_URL must be set for integration tests");
        let config = ConnectionConfig::from_url(&url).unwrap();
        let mut driver = PostgresDriver::new(config);

        let health = driver.health_check().await;
        assert!(health.ok, "{:?}", health.error);
        assert!(health.version.unwrap().starts_with("PostgreSQL"));

        driver
            .restore(
                "DROP TABLE IF EXISTS sqlferry_rt CASCADE;
                 CREATE TABLE sqlferry_rt (id serial PRIMARY KEY, name text, price numeric(8,2), ok boolean, raw bytea);
                 INSERT INTO sqlferry_rt (name, price, ok, raw) VALUES ('it''s', 9.50, true, '\\x00ff');
                 INSERT INTO sqlferry_rt (name, price, ok, raw) VALUES (NULL, NULL, NULL, NULL);",
                &no_progress,
            )
            .await
            .unwrap();

        let doc = driver.dump(&BackupOptions::default(), &no_progress).await.unwrap();
        assert!(doc.tables().contains(&"sqlferry_rt".to_string()));
        assert!(doc.as_str().contains("id serial PRIMARY KEY"));
        assert!(doc
            .as_str()
            .contains("VALUES (1, 'it''s', 9.50, TRUE, '\\x00ff');"));
        assert!(doc.as_str().contains("VALUES (2, NULL, NULL, NULL, NULL);"));

        driver.restore(doc.as_str(), &no_progress).await.unwrap();
        driver.restore("DROP TABLE sqlferry_rt;", &no_progress).await.unwrap();
        driver.close().await.unwrap();
    }
}
