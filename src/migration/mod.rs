// ABOUTME: Migration module: dump format, migration orchestration and external tools
// ABOUTME: Re-exports the orchestrator entry points used by the CLI

pub mod dump;
pub mod orchestrator;
pub mod tools;

pub use dump::{BackupOptions, BackupResult, DumpDocument, DumpScope, SqlValue};
pub use orchestrator::{
    check_distinct, migrate, DriverFactory, EngineDriverFactory, MigrationProgress,
    MigrationProgressFn, MigrationReport, Migrator, Stage,
};
