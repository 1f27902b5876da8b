// ABOUTME: Portable SQL dump format shared by every engine driver
// ABOUTME: Renders values and identifiers per dialect and assembles dump documents

use crate::config::EngineKind;
use crate::error::{Error, Result};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Which parts of each table a dump contains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpScope {
    Full,
    SchemaOnly,
    DataOnly,
}

impl DumpScope {
    pub fn includes_schema(self) -> bool {
        matches!(self, DumpScope::Full | DumpScope::SchemaOnly)
    }

    pub fn includes_data(self) -> bool {
        matches!(self, DumpScope::Full | DumpScope::DataOnly)
    }
}

/// Backup flags as collaborators store them
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackupOptions {
    pub schema_only: bool,
    pub data_only: bool,
}

impl BackupOptions {
    pub fn schema_only() -> Self {
        Self {
            schema_only: true,
            data_only: false,
        }
    }

    pub fn data_only() -> Self {
        Self {
            schema_only: false,
            data_only: true,
        }
    }

    /// Resolve the flags into one scope
    ///
    /// `schema_only` is checked first, so setting both flags yields a
    /// schema-only dump.
    pub fn scope(&self) -> DumpScope {
        if self.schema_only {
            DumpScope::SchemaOnly
        } else if self.data_only {
            DumpScope::DataOnly
        } else {
            DumpScope::Full
        }
    }
}

/// A single column value read from a source database
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Exact numeric kept as its textual form
    Decimal(String),
    Text(String),
    Bytes(Vec<u8>),
}

/// Render a value as a SQL literal in the `dialect` of the emitting engine
///
/// # Examples
///
/// ```
/// # use sqlferry::config::EngineKind;
/// # use sqlferry::migration::dump::{render_value, SqlValue};
/// assert_eq!(render_value(&SqlValue::Null, EngineKind::Sqlite), "NULL");
/// assert_eq!(render_value(&SqlValue::Text("it's".into()), EngineKind::Mysql), "'it''s'");
/// assert_eq!(render_value(&SqlValue::Bool(true), EngineKind::Postgres), "TRUE");
/// assert_eq!(render_value(&SqlValue::Bool(true), EngineKind::Mysql), "1");
/// ```
pub fn render_value(value: &SqlValue, dialect: EngineKind) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Bool(b) => match dialect {
            EngineKind::Postgres => (if *b { "TRUE" } else { "FALSE" }).to_string(),
            EngineKind::Mysql | EngineKind::Sqlite => (if *b { "1" } else { "0" }).to_string(),
        },
        SqlValue::Int(i) => i.to_string(),
        SqlValue::Float(f) => render_float(*f),
        SqlValue::Decimal(d) => d.clone(),
        SqlValue::Text(s) => quote_literal(s),
        SqlValue::Bytes(bytes) => {
            let hex = to_hex(bytes);
            match dialect {
                EngineKind::Postgres => format!("'\\x{}'", hex),
                EngineKind::Mysql | EngineKind::Sqlite => format!("X'{}'", hex),
            }
        }
    }
}

fn render_float(f: f64) -> String {
    if f.is_nan() {
        "'NaN'".to_string()
    } else if f.is_infinite() {
        (if f > 0.0 { "'Infinity'" } else { "'-Infinity'" }).to_string()
    } else {
        // Debug keeps a fractional part so the value is not read back as an integer
        format!("{:?}", f)
    }
}

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

/// Single-quoted string literal with embedded quotes doubled
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Words that always need quoting when used as identifiers
const RESERVED_WORDS: &[&str] = &[
    "add", "all", "alter", "analyze", "and", "any", "array", "as", "asc", "between", "both",
    "by", "case", "cast", "check", "collate", "column", "constraint", "create", "cross",
    "current_date", "current_time", "current_timestamp", "current_user", "database", "default",
    "delete", "desc", "distinct", "drop", "else", "end", "except", "exists", "false", "fetch",
    "for", "foreign", "from", "full", "grant", "group", "having", "if", "in", "index", "inner",
    "insert", "intersect", "interval", "into", "is", "join", "key", "keys", "leading", "left",
    "like", "limit", "match", "natural", "not", "null", "offset", "on", "only", "or", "order",
    "outer", "primary", "range", "references", "regexp", "rename", "replace", "returning",
    "right", "row", "rows", "select", "set", "show", "some", "table", "then", "to", "trailing",
    "true", "union", "unique", "update", "usage", "user", "using", "values", "when", "where",
    "window", "with",
];

/// Quote an identifier for `dialect` only when needed
///
/// Plain lowercase identifiers that are not reserved words are emitted bare;
/// everything else is wrapped in the dialect's quote character (`"` for
/// PostgreSQL and SQLite, backtick for MySQL) with that character doubled.
///
/// # Examples
///
/// ```
/// # use sqlferry::config::EngineKind;
/// # use sqlferry::migration::dump::quote_ident;
/// assert_eq!(quote_ident("users", EngineKind::Postgres), "users");
/// assert_eq!(quote_ident("Users", EngineKind::Postgres), "\"Users\"");
/// assert_eq!(quote_ident("order", EngineKind::Mysql), "`order`");
/// ```
pub fn quote_ident(name: &str, dialect: EngineKind) -> String {
    if is_plain_identifier(name) {
        return name.to_string();
    }
    let quote = match dialect {
        EngineKind::Mysql => '`',
        EngineKind::Postgres | EngineKind::Sqlite => '"',
    };
    let doubled = format!("{}{}", quote, quote);
    format!(
        "{}{}{}",
        quote,
        name.replace(quote, &doubled),
        quote
    )
}

fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let starts_ok = matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_');
    starts_ok
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && RESERVED_WORDS.binary_search(&name).is_err()
}

/// `INSERT` statement for one row, terminated by `;`
pub fn insert_statement(
    table: &str,
    columns: &[String],
    values: &[SqlValue],
    dialect: EngineKind,
) -> String {
    let columns = columns
        .iter()
        .map(|c| quote_ident(c, dialect))
        .collect::<Vec<_>>()
        .join(", ");
    let values = values
        .iter()
        .map(|v| render_value(v, dialect))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({});",
        quote_ident(table, dialect),
        columns,
        values
    )
}

/// `DROP TABLE IF EXISTS` statement, terminated by `;`
pub fn drop_table_statement(table: &str, dialect: EngineKind) -> String {
    match dialect {
        EngineKind::Postgres => format!(
            "DROP TABLE IF EXISTS {} CASCADE;",
            quote_ident(table, dialect)
        ),
        EngineKind::Mysql | EngineKind::Sqlite => {
            format!("DROP TABLE IF EXISTS {};", quote_ident(table, dialect))
        }
    }
}

/// A portable SQL dump of zero or more tables
#[derive(Debug, Clone, PartialEq)]
pub struct DumpDocument {
    dialect: EngineKind,
    text: String,
    tables: Vec<String>,
}

impl DumpDocument {
    pub fn dialect(&self) -> EngineKind {
        self.dialect
    }

    /// Tables covered, in the order they appear
    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }

    /// Persist the dump as a UTF-8 `.sql` file
    pub fn write_to(&self, path: &Path) -> Result<BackupResult> {
        std::fs::write(path, &self.text)
            .map_err(|e| Error::io(format!("Failed to write dump to {}", path.display()), e))?;
        let size_bytes = std::fs::metadata(path)
            .map_err(|e| Error::io(format!("Failed to stat {}", path.display()), e))?
            .len();

        Ok(BackupResult {
            path: path.to_path_buf(),
            size_bytes,
            tables_count: self.tables.len(),
        })
    }
}

/// Summary of a dump written to disk
#[derive(Debug, Clone, Serialize)]
pub struct BackupResult {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub tables_count: usize,
}

/// Incremental builder used by drivers while enumerating tables
#[derive(Debug)]
pub struct DumpWriter {
    dialect: EngineKind,
    text: String,
    tables: Vec<String>,
}

impl DumpWriter {
    /// Start a dump with the standard header comment
    pub fn new(dialect: EngineKind, database: &str) -> Self {
        let mut writer = Self {
            dialect,
            text: String::new(),
            tables: Vec::new(),
        };
        let title = match dialect {
            EngineKind::Postgres => "PostgreSQL",
            EngineKind::Mysql => "MySQL",
            EngineKind::Sqlite => "SQLite",
        };
        writer.comment(&format!("{} Database Backup", title));
        writer.comment(&format!("Database: {}", database));
        writer.comment(&format!("Generated: {}", chrono::Utc::now().to_rfc3339()));
        writer.blank();
        writer
    }

    pub fn dialect(&self) -> EngineKind {
        self.dialect
    }

    /// Single-line comment; line breaks in `text` are flattened
    pub fn comment(&mut self, text: &str) {
        self.text.push_str("-- ");
        self.text.push_str(&text.replace(['\r', '\n'], " "));
        self.text.push('\n');
    }

    pub fn blank(&mut self) {
        self.text.push('\n');
    }

    /// Append a statement, adding the terminating `;` when missing
    pub fn statement(&mut self, sql: &str) {
        let sql = sql.trim_end();
        self.text.push_str(sql);
        if !sql.ends_with(';') {
            self.text.push(';');
        }
        self.text.push('\n');
    }

    /// Mark the start of a table's section
    pub fn begin_table(&mut self, table: &str) {
        self.tables.push(table.to_string());
        self.blank();
        self.comment(&format!("Table: {}", table));
    }

    pub fn finish(self) -> DumpDocument {
        DumpDocument {
            dialect: self.dialect,
            text: self.text,
            tables: self.tables,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::split_statements;

    #[test]
    fn test_scope_precedence() {
        assert_eq!(BackupOptions::default().scope(), DumpScope::Full);
        assert_eq!(BackupOptions::schema_only().scope(), DumpScope::SchemaOnly);
        assert_eq!(BackupOptions::data_only().scope(), DumpScope::DataOnly);
        let both = BackupOptions {
            schema_only: true,
            data_only: true,
        };
        assert_eq!(both.scope(), DumpScope::SchemaOnly);
    }

    #[test]
    fn test_null_renders_as_keyword() {
        let stmt = insert_statement(
            "users",
            &["id".to_string(), "name".to_string()],
            &[SqlValue::Int(1), SqlValue::Null],
            EngineKind::Sqlite,
        );
        assert_eq!(stmt, "INSERT INTO users (id, name) VALUES (1, NULL);");
    }

    #[test]
    fn test_text_that_says_null_stays_quoted() {
        assert_eq!(
            render_value(&SqlValue::Text("NULL".into()), EngineKind::Postgres),
            "'NULL'"
        );
    }

    #[test]
    fn test_numbers_unquoted() {
        assert_eq!(render_value(&SqlValue::Int(-42), EngineKind::Mysql), "-42");
        assert_eq!(render_value(&SqlValue::Float(1.0), EngineKind::Sqlite), "1.0");
        assert_eq!(render_value(&SqlValue::Float(2.5), EngineKind::Sqlite), "2.5");
        assert_eq!(
            render_value(&SqlValue::Decimal("12.50".into()), EngineKind::Postgres),
            "12.50"
        );
        assert_eq!(
            render_value(&SqlValue::Float(f64::NAN), EngineKind::Postgres),
            "'NaN'"
        );
    }

    #[test]
    fn test_booleans_per_dialect() {
        assert_eq!(render_value(&SqlValue::Bool(false), EngineKind::Postgres), "FALSE");
        assert_eq!(render_value(&SqlValue::Bool(false), EngineKind::Sqlite), "0");
        assert_eq!(render_value(&SqlValue::Bool(true), EngineKind::Mysql), "1");
    }

    #[test]
    fn test_bytes_per_dialect() {
        let bytes = SqlValue::Bytes(vec![0xde, 0xad, 0x01]);
        assert_eq!(render_value(&bytes, EngineKind::Sqlite), "X'dead01'");
        assert_eq!(render_value(&bytes, EngineKind::Postgres), "'\\xdead01'");
    }

    #[test]
    fn test_quote_ident_rules() {
        assert_eq!(quote_ident("user_id2", EngineKind::Sqlite), "user_id2");
        assert_eq!(quote_ident("user", EngineKind::Postgres), "\"user\"");
        assert_eq!(quote_ident("my table", EngineKind::Mysql), "`my table`");
        assert_eq!(quote_ident("we\"ird", EngineKind::Postgres), "\"we\"\"ird\"");
        assert_eq!(quote_ident("we`ird", EngineKind::Mysql), "`we``ird`");
        assert_eq!(quote_ident("1st", EngineKind::Sqlite), "\"1st\"");
        assert_eq!(quote_ident("", EngineKind::Sqlite), "\"\"");
    }

    #[test]
    fn test_reserved_words_are_sorted() {
        let mut sorted = RESERVED_WORDS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, RESERVED_WORDS);
    }

    #[test]
    fn test_writer_output_tokenizes_cleanly() {
        let mut writer = DumpWriter::new(EngineKind::Sqlite, "app.db");
        writer.begin_table("notes");
        writer.statement(&drop_table_statement("notes", EngineKind::Sqlite));
        writer.statement("CREATE TABLE notes (body TEXT)");
        writer.statement(&insert_statement(
            "notes",
            &["body".to_string()],
            &[SqlValue::Text("semi; colon 'quoted' -- dash".into())],
            EngineKind::Sqlite,
        ));
        let doc = writer.finish();

        assert_eq!(doc.tables(), ["notes".to_string()]);
        let statements = split_statements(doc.as_str());
        assert_eq!(
            statements,
            vec![
                "DROP TABLE IF EXISTS notes",
                "CREATE TABLE notes (body TEXT)",
                "INSERT INTO notes (body) VALUES ('semi; colon ''quoted'' -- dash')",
            ]
        );
    }

    #[test]
    fn test_write_to_reports_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = DumpWriter::new(EngineKind::Postgres, "shop");
        writer.begin_table("a");
        writer.begin_table("b");
        let doc = writer.finish();
        let path = dir.path().join("shop.sql");

        let result = doc.write_to(&path).unwrap();
        assert_eq!(result.tables_count, 2);
        assert_eq!(result.size_bytes, doc.as_str().len() as u64);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), doc.as_str());
    }
}
