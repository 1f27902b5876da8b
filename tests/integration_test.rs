// ABOUTME: Integration tests for backup, restore, and migration workflows
// ABOUTME: SQLite runs offline; server engines need TEST_POSTGRES_URL / TEST_MYSQL_URL

use rusqlite::Connection;
use sqlferry::config::{ConnectionConfig, EngineKind};
use sqlferry::driver::{create_driver, no_progress, Progress};
use sqlferry::migration::{migrate, BackupOptions, Migrator, Stage};
use sqlferry::sql::{rewrite, split_statements};
use std::env;
use std::path::Path;
use std::sync::Mutex;
use tempfile::tempdir;

fn seed_shop(path: &Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT NOT NULL, note TEXT);
         CREATE TABLE orders (id INTEGER PRIMARY KEY, customer_id INTEGER, total REAL, receipt BLOB);
         INSERT INTO customers VALUES (1, 'Ann', NULL);
         INSERT INTO customers VALUES (2, 'Bob', 'likes ''quotes''; and semicolons');
         INSERT INTO customers VALUES (3, 'Zoë', '-- not a comment');
         INSERT INTO orders VALUES (10, 1, 19.99, X'cafe');
         INSERT INTO orders VALUES (11, 2, 0.5, NULL);",
    )
    .unwrap();
}

fn table_dump(path: &Path, query: &str) -> Vec<Vec<String>> {
    let conn = Connection::open(path).unwrap();
    let mut stmt = conn.prepare(query).unwrap();
    let columns = stmt.column_count();
    let rows = stmt
        .query_map([], |row| {
            (0..columns)
                .map(|i| {
                    let value: rusqlite::types::Value = row.get(i)?;
                    Ok(format!("{:?}", value))
                })
                .collect::<rusqlite::Result<Vec<_>>>()
        })
        .unwrap()
        .collect::<rusqlite::Result<Vec<_>>>()
        .unwrap();
    rows
}

#[tokio::test]
async fn test_sqlite_backup_file_round_trip() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("shop.db");
    let target = dir.path().join("copy.db");
    let backup_file = dir.path().join("shop.sql");
    seed_shop(&source);

    let mut driver = create_driver(ConnectionConfig::sqlite(&source)).unwrap();
    let document = driver
        .dump(&BackupOptions::default(), &no_progress)
        .await
        .unwrap();
    driver.close().await.unwrap();

    let written = document.write_to(&backup_file).unwrap();
    assert_eq!(written.tables_count, 2);
    assert!(written.size_bytes > 0);

    // Two tables: DROP + CREATE each, plus five rows
    let text = std::fs::read_to_string(&backup_file).unwrap();
    assert_eq!(split_statements(&text).len(), 9);

    let mut restorer = create_driver(ConnectionConfig::sqlite(&target)).unwrap();
    restorer.restore(&text, &no_progress).await.unwrap();
    restorer.close().await.unwrap();

    for query in [
        "SELECT * FROM customers ORDER BY id",
        "SELECT * FROM orders ORDER BY id",
    ] {
        assert_eq!(table_dump(&source, query), table_dump(&target, query));
    }
}

#[tokio::test]
async fn test_sqlite_schema_and_data_dumps_compose() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("shop.db");
    let target = dir.path().join("copy.db");
    seed_shop(&source);

    let mut driver = create_driver(ConnectionConfig::sqlite(&source)).unwrap();
    let schema = driver
        .dump(&BackupOptions::schema_only(), &no_progress)
        .await
        .unwrap();
    let data = driver
        .dump(&BackupOptions::data_only(), &no_progress)
        .await
        .unwrap();
    driver.close().await.unwrap();

    assert!(!schema.as_str().contains("INSERT"));
    assert!(!data.as_str().contains("CREATE TABLE"));

    let mut restorer = create_driver(ConnectionConfig::sqlite(&target)).unwrap();
    restorer.restore(schema.as_str(), &no_progress).await.unwrap();
    restorer.restore(data.as_str(), &no_progress).await.unwrap();
    restorer.close().await.unwrap();

    let query = "SELECT * FROM customers ORDER BY id";
    assert_eq!(table_dump(&source, query), table_dump(&target, query));
}

#[tokio::test]
async fn test_empty_database_dump_reports_full_progress() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("empty.db");
    Connection::open(&path).unwrap();

    let seen = Mutex::new(Vec::new());
    let mut driver = create_driver(ConnectionConfig::sqlite(&path)).unwrap();
    let document = driver
        .dump(&BackupOptions::default(), &|p| seen.lock().unwrap().push(p))
        .await
        .unwrap();

    assert!(document.tables().is_empty());
    assert!(split_statements(document.as_str()).is_empty());
    assert_eq!(seen.into_inner().unwrap(), vec![Progress::table(None, 0, 0)]);
}

#[tokio::test]
async fn test_migrate_sqlite_users_scenario() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("users.db");
    let target = dir.path().join("users-copy.db");
    // Migration targets must exist; an empty file is an empty database
    std::fs::File::create(&target).unwrap();
    {
        let conn = Connection::open(&source).unwrap();
        conn.execute_batch(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);
             INSERT INTO users VALUES (1, NULL);",
        )
        .unwrap();
    }

    let stages = Mutex::new(Vec::new());
    let report = migrate(
        &ConnectionConfig::sqlite(&source),
        &ConnectionConfig::sqlite(&target),
        &|p| stages.lock().unwrap().push(p.stage),
    )
    .await
    .unwrap();

    assert_eq!(report.tables, vec!["users".to_string()]);
    assert_eq!(stages.lock().unwrap().last(), Some(&Stage::Complete));
    assert_eq!(
        table_dump(&target, "SELECT id, name FROM users"),
        vec![vec!["Integer(1)".to_string(), "Null".to_string()]]
    );
}

#[test]
fn test_rewrite_is_identity_for_same_engine() {
    let sql = "CREATE TABLE `t` (id SERIAL PRIMARY KEY, flag BOOLEAN) ENGINE=InnoDB;";
    for kind in [EngineKind::Postgres, EngineKind::Mysql, EngineKind::Sqlite] {
        assert_eq!(rewrite(sql, kind, kind).unwrap(), sql);
    }
}

/// Helper to get a server URL from the environment
fn server_url(var: &str) -> String {
    env::var(var).unwrap_or_else(|_| panic!("{} must be set for integration tests", var))
}

#[tokio::test]
#[ignore]
async fn test_migrate_postgres_into_sqlite() {
    let url = server_url("TEST_POSTGRES_URL");
    let source = ConnectionConfig::from_url(&url).unwrap();
    let dir = tempdir().unwrap();

    let mut driver = create_driver(source.clone()).unwrap();
    driver
        .restore(
            "DROP TABLE IF EXISTS sqlferry_it CASCADE;
             CREATE TABLE sqlferry_it (id serial PRIMARY KEY, title varchar(40), done boolean);
             INSERT INTO sqlferry_it (title, done) VALUES ('write tests', true);",
            &no_progress,
        )
        .await
        .unwrap();
    driver.close().await.unwrap();

    let target = dir.path().join("from-pg.db");
    std::fs::File::create(&target).unwrap();
    let report = Migrator::new()
        .work_dir(dir.path())
        .migrate(&source, &ConnectionConfig::sqlite(&target), &|_| {})
        .await
        .unwrap();
    assert!(report.tables.contains(&"sqlferry_it".to_string()));

    assert_eq!(
        table_dump(&target, "SELECT id, title, done FROM sqlferry_it"),
        vec![vec![
            "Integer(1)".to_string(),
            "Text(\"write tests\")".to_string(),
            "Integer(1)".to_string(),
        ]]
    );
}

#[tokio::test]
#[ignore]
async fn test_migrate_sqlite_into_mysql() {
    let url = server_url("TEST_MYSQL_URL");
    let target = ConnectionConfig::from_url(&url).unwrap();
    let dir = tempdir().unwrap();
    let source = dir.path().join("to-mysql.db");
    {
        let conn = Connection::open(&source).unwrap();
        conn.execute_batch(
            "CREATE TABLE sqlferry_it (id INTEGER PRIMARY KEY AUTOINCREMENT, title TEXT, price REAL);
             INSERT INTO sqlferry_it (title, price) VALUES ('back\\slash', 2.5);",
        )
        .unwrap();
    }

    let report = migrate(&ConnectionConfig::sqlite(&source), &target, &|_| {})
        .await
        .unwrap();
    assert_eq!(report.tables, vec!["sqlferry_it".to_string()]);

    let mut driver = create_driver(target).unwrap();
    let document = driver
        .dump(&BackupOptions::data_only(), &no_progress)
        .await
        .unwrap();
    assert!(document
        .as_str()
        .contains("INSERT INTO sqlferry_it (id, title, price) VALUES (1, 'back\\slash', 2.5);"));
    driver.restore("DROP TABLE sqlferry_it;", &no_progress).await.unwrap();
    driver.close().await.unwrap();
}
