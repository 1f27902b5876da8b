// ABOUTME: Error taxonomy for dump, restore and migration operations
// ABOUTME: Every variant keeps the lower-level driver or process message

use crate::config::EngineKind;
use thiserror::Error;

/// Longest statement excerpt carried in a restore error message.
const STATEMENT_EXCERPT_LEN: usize = 200;

/// Errors raised by drivers, the rewriter and the migration orchestrator.
#[derive(Error, Debug)]
pub enum Error {
    /// Host unreachable, authentication rejected, or timeout
    #[error("Connection failed: {0}")]
    Connectivity(String),

    /// Table enumeration or row serialization failed
    #[error("Dump failed{}: {message}", table_suffix(.table))]
    Dump {
        table: Option<String>,
        message: String,
    },

    /// Rewriter could not translate the document
    #[error("Translation from {source_kind} to {target_kind} failed: {message}")]
    Translation {
        source_kind: EngineKind,
        target_kind: EngineKind,
        message: String,
    },

    /// Statement execution failed during restore
    #[error("Restore failed{}: {message}", statement_suffix(.index, .statement))]
    Restore {
        index: Option<usize>,
        statement: Option<String>,
        message: String,
    },

    /// Identical source and target, or missing required fields
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// File handling around dump artifacts
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Dump failure attributed to a specific table
    pub fn dump(table: impl Into<String>, message: impl ToString) -> Self {
        Error::Dump {
            table: Some(table.into()),
            message: message.to_string(),
        }
    }

    /// Dump failure that happened before any table was reached
    pub fn dump_general(message: impl ToString) -> Self {
        Error::Dump {
            table: None,
            message: message.to_string(),
        }
    }

    /// Restore failure at a 1-based statement index
    pub fn restore(index: usize, statement: &str, message: impl ToString) -> Self {
        Error::Restore {
            index: Some(index),
            statement: Some(statement.to_string()),
            message: message.to_string(),
        }
    }

    /// Restore failure that cannot be pinned to a statement
    pub fn restore_general(message: impl ToString) -> Self {
        Error::Restore {
            index: None,
            statement: None,
            message: message.to_string(),
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }
}

fn table_suffix(table: &Option<String>) -> String {
    match table {
        Some(table) => format!(" for table '{}'", table),
        None => String::new(),
    }
}

fn statement_suffix(index: &Option<usize>, statement: &Option<String>) -> String {
    match (index, statement) {
        (Some(index), Some(statement)) => {
            format!(" at statement {} ({})", index, excerpt(statement))
        }
        (Some(index), None) => format!(" at statement {}", index),
        _ => String::new(),
    }
}

fn excerpt(statement: &str) -> String {
    if statement.chars().count() <= STATEMENT_EXCERPT_LEN {
        return statement.to_string();
    }
    let cut: String = statement.chars().take(STATEMENT_EXCERPT_LEN).collect();
    format!("{}...", cut)
}

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, Error>;
