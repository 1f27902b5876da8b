// ABOUTME: Best-effort textual translation of dump documents between SQL dialects
// ABOUTME: Driven by an ordered, versioned table of regex substitution rules

use crate::config::EngineKind;
use crate::error::{Error, Result};
use regex::{Regex, RegexBuilder};
use std::borrow::Cow;
use std::sync::OnceLock;

use EngineKind::{Mysql, Postgres, Sqlite};

/// Bumped whenever a rule is added, removed or reordered.
pub const RULESET_VERSION: u32 = 4;

/// One substitution applied to dumps moving from `source` to `target`.
///
/// Patterns are case-insensitive regular expressions. Replacements may use
/// `$1`-style group references. Rules for a pair run in table order, each one
/// over the output of the previous.
#[derive(Debug, Clone, Copy)]
pub struct RewriteRule {
    pub source: EngineKind,
    pub target: EngineKind,
    pub pattern: &'static str,
    pub replacement: &'static str,
    pub note: &'static str,
}

const fn rule(
    source: EngineKind,
    target: EngineKind,
    pattern: &'static str,
    replacement: &'static str,
    note: &'static str,
) -> RewriteRule {
    RewriteRule {
        source,
        target,
        pattern,
        replacement,
        note,
    }
}

/// Translation rules. Translation is syntactic: patterns also match inside
/// string literals, and the output is not guaranteed to be valid DDL for
/// arbitrary schemas.
pub const RULES: &[RewriteRule] = &[
    // PostgreSQL -> SQLite
    rule(Postgres, Sqlite, r"\b(?:big|small)?serial\s+PRIMARY\s+KEY\b", "INTEGER PRIMARY KEY AUTOINCREMENT", "serial key becomes rowid alias"),
    rule(Postgres, Sqlite, r"\b(?:big|small)?serial\b", "INTEGER", "non-key serial loses its sequence"),
    rule(Postgres, Sqlite, r"\bpublic\.", "", "schema qualifier"),
    rule(Postgres, Sqlite, r"\bboolean\b", "INTEGER", "no boolean type"),
    rule(Postgres, Sqlite, r"\btimestamp(?:tz)?(?:\s*\(\d+\))?(?:\s+with(?:out)?\s+time\s+zone)?", "TEXT", "timestamps stored as ISO text"),
    rule(Postgres, Sqlite, r"\b(\w+)\[\]", "TEXT", "arrays stored as text"),
    rule(Postgres, Sqlite, r"\bONLY\s+", "", "inheritance keyword"),
    rule(Postgres, Sqlite, r"(\bDROP\s+TABLE\s+IF\s+EXISTS\s+\S+)\s+CASCADE\b", "$1", "no CASCADE on DROP"),
    rule(Postgres, Sqlite, r"\bbytea\b", "BLOB", "binary type"),
    // SQLite -> PostgreSQL
    rule(Sqlite, Postgres, r"\bINTEGER\s+PRIMARY\s+KEY\s+AUTOINCREMENT\b", "SERIAL PRIMARY KEY", "rowid alias becomes serial"),
    rule(Sqlite, Postgres, r"\bAUTOINCREMENT\b", "", "stray autoincrement"),
    rule(Sqlite, Postgres, r"\bCREATE\s+TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?", "CREATE TABLE IF NOT EXISTS ", "idempotent create"),
    rule(Sqlite, Postgres, r"\bDATETIME\b", "TIMESTAMP", "date-time type"),
    rule(Sqlite, Postgres, r"\bBLOB\b", "BYTEA", "binary type"),
    rule(Sqlite, Postgres, r"\bREAL\b", "DOUBLE PRECISION", "floating point type"),
    // MySQL -> SQLite
    rule(Mysql, Sqlite, r"^\s*SET\s+FOREIGN_KEY_CHECKS\s*=\s*\d+\s*;\s*$", "", "session setting"),
    rule(Mysql, Sqlite, r"\s*\bAUTO_INCREMENT\s*=\s*\d+", "", "table counter option"),
    rule(Mysql, Sqlite, r"\b(?:tiny|small|medium|big)?int(?:eger)?(?:\(\d+\))?(?:\s+unsigned)?(?:\s+zerofill)?\s+NOT\s+NULL\s+AUTO_INCREMENT\b", "INTEGER NOT NULL", "auto-increment column keyed by the separate PRIMARY KEY line"),
    rule(Mysql, Sqlite, r"\s*\bAUTO_INCREMENT\b", "", "stray auto-increment"),
    rule(Mysql, Sqlite, r"`", "\"", "identifier quote"),
    rule(Mysql, Sqlite, r"\s*\bENGINE\s*=\s*\w+", "", "storage engine"),
    rule(Mysql, Sqlite, r"\s*\bDEFAULT\s+CHARSET\s*=\s*\w+", "", "table charset"),
    rule(Mysql, Sqlite, r"\s*\bCOLLATE\s*=?\s*\w+", "", "collation"),
    rule(Mysql, Sqlite, r"\s*\bCHARACTER\s+SET\s+\w+", "", "column charset"),
    rule(Mysql, Sqlite, r"\s+unsigned\b", "", "unsigned modifier"),
    rule(Mysql, Sqlite, r"^([ \t]*)UNIQUE\s+(?:KEY|INDEX)\s+\S+\s*\(", "${1}UNIQUE (", "named unique key becomes a table constraint"),
    rule(Mysql, Sqlite, r",\n[ \t]*(?:(?:FULLTEXT|SPATIAL)[ \t]+)?(?:KEY|INDEX)\b[^\n]*[^,\n]", "", "secondary index lines"),
    rule(Mysql, Sqlite, r"\s+USING\s+(?:BTREE|HASH)\b", "", "index method"),
    rule(Mysql, Sqlite, r"\s+ON\s+UPDATE\s+CURRENT_TIMESTAMP(?:\(\d*\))?", "", "on-update timestamp"),
    rule(Mysql, Sqlite, r"\s+COMMENT\s*=?\s*'(?:[^']|'')*'", "", "column and table comments"),
    // MySQL -> PostgreSQL
    rule(Mysql, Postgres, r"^\s*SET\s+FOREIGN_KEY_CHECKS\s*=\s*\d+\s*;\s*$", "", "session setting"),
    rule(Mysql, Postgres, r"\s*\bAUTO_INCREMENT\s*=\s*\d+", "", "table counter option"),
    rule(Mysql, Postgres, r"\bbigint(?:\(\d+\))?(?:\s+unsigned)?\s+NOT\s+NULL\s+AUTO_INCREMENT\b", "BIGSERIAL NOT NULL", "big auto-increment"),
    rule(Mysql, Postgres, r"\bint(?:eger)?(?:\(\d+\))?(?:\s+unsigned)?\s+NOT\s+NULL\s+AUTO_INCREMENT\b", "SERIAL NOT NULL", "auto-increment"),
    rule(Mysql, Postgres, r"\s*\bAUTO_INCREMENT\b", "", "stray auto-increment"),
    rule(Mysql, Postgres, r"`", "\"", "identifier quote"),
    rule(Mysql, Postgres, r"\s*\bENGINE\s*=\s*\w+", "", "storage engine"),
    rule(Mysql, Postgres, r"\s*\bDEFAULT\s+CHARSET\s*=\s*\w+", "", "table charset"),
    rule(Mysql, Postgres, r"\s*\bCOLLATE\s*=?\s*\w+", "", "collation"),
    rule(Mysql, Postgres, r"\s*\bCHARACTER\s+SET\s+\w+", "", "column charset"),
    rule(Mysql, Postgres, r"\s+unsigned\b", "", "unsigned modifier"),
    rule(Mysql, Postgres, r"^([ \t]*)UNIQUE\s+(?:KEY|INDEX)\s+\S+\s*\(", "${1}UNIQUE (", "named unique key becomes a table constraint"),
    rule(Mysql, Postgres, r",\n[ \t]*(?:(?:FULLTEXT|SPATIAL)[ \t]+)?(?:KEY|INDEX)\b[^\n]*[^,\n]", "", "secondary index lines"),
    rule(Mysql, Postgres, r"\s+USING\s+(?:BTREE|HASH)\b", "", "index method"),
    rule(Mysql, Postgres, r"\s+ON\s+UPDATE\s+CURRENT_TIMESTAMP(?:\(\d*\))?", "", "on-update timestamp"),
    rule(Mysql, Postgres, r"\s+COMMENT\s*=?\s*'(?:[^']|'')*'", "", "column and table comments"),
    rule(Mysql, Postgres, r"\btinyint\(1\)", "SMALLINT", "boolean-ish tinyint keeps 0/1 values"),
    rule(Mysql, Postgres, r"\b(?:tiny|medium)?int\(\d+\)", "INTEGER", "display width"),
    rule(Mysql, Postgres, r"\btinyint\b", "SMALLINT", "tiny integer"),
    rule(Mysql, Postgres, r"\bdatetime(?:\(\d+\))?", "TIMESTAMP", "date-time type"),
    rule(Mysql, Postgres, r"\bdouble\b", "DOUBLE PRECISION", "floating point type"),
    rule(Mysql, Postgres, r"\b(?:tiny|medium|long)text\b", "TEXT", "text variants"),
    rule(Mysql, Postgres, r"\b(?:tiny|medium|long)?blob\b", "BYTEA", "binary type"),
    // PostgreSQL -> MySQL
    rule(Postgres, Mysql, r"\bbigserial\b", "BIGINT AUTO_INCREMENT", "big serial"),
    rule(Postgres, Mysql, r"\b(?:small)?serial\b", "INT AUTO_INCREMENT", "serial"),
    rule(Postgres, Mysql, "\"", "`", "identifier quote"),
    rule(Postgres, Mysql, r"\bpublic\.", "", "schema qualifier"),
    rule(Postgres, Mysql, r"\bboolean\b", "TINYINT(1)", "no boolean type"),
    rule(Postgres, Mysql, r"\bcharacter\s+varying\s*\((\d+)\)", "VARCHAR($1)", "varchar"),
    rule(Postgres, Mysql, r"\bcharacter\s+varying\b", "TEXT", "unbounded varchar"),
    rule(Postgres, Mysql, r"\btimestamp(?:\s*\(\d+\))?\s+with(?:out)?\s+time\s+zone\b", "DATETIME", "timestamps"),
    rule(Postgres, Mysql, r"\btimestamptz\b", "DATETIME", "timestamps"),
    rule(Postgres, Mysql, r"\bdouble\s+precision\b", "DOUBLE", "floating point type"),
    rule(Postgres, Mysql, r"\bbytea\b", "LONGBLOB", "binary type"),
    rule(Postgres, Mysql, r"\bjsonb\b", "JSON", "json type"),
    // SQLite -> MySQL
    rule(Sqlite, Mysql, "\"", "`", "identifier quote"),
    rule(Sqlite, Mysql, r"\bAUTOINCREMENT\b", "AUTO_INCREMENT", "auto-increment keyword"),
    rule(Sqlite, Mysql, r"\bREAL\b", "DOUBLE", "floating point type"),
];

struct CompiledRule {
    rule: &'static RewriteRule,
    regex: std::result::Result<Regex, String>,
}

fn compiled_rules() -> &'static [CompiledRule] {
    static COMPILED: OnceLock<Vec<CompiledRule>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        RULES
            .iter()
            .map(|rule| CompiledRule {
                rule,
                regex: RegexBuilder::new(rule.pattern)
                    .case_insensitive(true)
                    .multi_line(true)
                    .build()
                    .map_err(|e| e.to_string()),
            })
            .collect()
    })
}

/// Rules that apply to one ordered engine pair, in application order
pub fn rules_for(source: EngineKind, target: EngineKind) -> impl Iterator<Item = &'static RewriteRule> {
    RULES
        .iter()
        .filter(move |rule| rule.source == source && rule.target == target)
}

/// Translate a dump document from the `source` dialect to the `target` dialect
///
/// Returns the input untouched when both kinds are equal.
///
/// # Examples
///
/// ```
/// # use sqlferry::config::EngineKind;
/// # use sqlferry::sql::rewrite;
/// let sql = "CREATE TABLE `t` (\n  `id` int NOT NULL AUTO_INCREMENT,\n  PRIMARY KEY (`id`)\n) ENGINE=InnoDB;";
/// let out = rewrite(sql, EngineKind::Mysql, EngineKind::Sqlite).unwrap();
/// assert_eq!(out, "CREATE TABLE \"t\" (\n  \"id\" INTEGER NOT NULL,\n  PRIMARY KEY (\"id\")\n);");
/// ```
pub fn rewrite(text: &str, source: EngineKind, target: EngineKind) -> Result<String> {
    if source == target {
        return Ok(text.to_string());
    }

    let mut output: Cow<'_, str> = Cow::Borrowed(text);
    let mut applied = 0usize;

    for compiled in compiled_rules()
        .iter()
        .filter(|c| c.rule.source == source && c.rule.target == target)
    {
        let regex = compiled.regex.as_ref().map_err(|e| Error::Translation {
            source_kind: source,
            target_kind: target,
            message: format!("rule '{}' does not compile: {}", compiled.rule.note, e),
        })?;

        let replaced = match regex.replace_all(&output, compiled.rule.replacement) {
            Cow::Owned(replaced) => Some(replaced),
            Cow::Borrowed(_) => None,
        };
        if let Some(replaced) = replaced {
            applied += 1;
            output = Cow::Owned(replaced);
        }
    }

    tracing::debug!(
        "Rewrote dump from {} to {} ({} rule(s) matched, ruleset v{})",
        source,
        target,
        applied,
        RULESET_VERSION
    );

    Ok(output.into_owned())
}
