// ABOUTME: CLI entry point for sqlferry
// ABOUTME: Parses commands and routes to appropriate handlers

use clap::{Parser, Subcommand};
use sqlferry::commands::{self, migrate::MigrationTarget, BackupFormat};
use sqlferry::migration::BackupOptions;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sqlferry")]
#[command(about = "Back up, restore, and migrate PostgreSQL, MySQL, and SQLite databases", long_about = None)]
#[command(version)]
struct Cli {
    /// Print results as JSON and hide progress bars
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that a database is reachable and report its version
    Health {
        /// Connection URL (postgresql://, mysql://, or sqlite://)
        url: String,
    },
    /// Dump a database to a file
    Backup {
        /// Connection URL of the database to dump
        url: String,
        #[arg(short, long)]
        output: PathBuf,
        /// Dump table definitions only (wins over --data-only)
        #[arg(long)]
        schema_only: bool,
        /// Dump rows only
        #[arg(long)]
        data_only: bool,
        #[arg(long, value_enum, default_value_t = BackupFormat::Sql)]
        format: BackupFormat,
    },
    /// Replay a backup file into a database
    Restore {
        /// Connection URL of the database to restore into
        url: String,
        #[arg(short, long)]
        input: PathBuf,
        /// Skip confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// Copy every table from one database into another, across engines
    Migrate {
        #[arg(long, required_unless_present = "config", requires = "target")]
        source: Option<String>,
        #[arg(long, required_unless_present = "config", requires = "source")]
        target: Option<String>,
        /// TOML file with [source], [target] and optional [options] tables
        #[arg(long, conflicts_with_all = ["source", "target"])]
        config: Option<PathBuf>,
        /// Directory for the transient dump file (defaults to the system temp dir)
        #[arg(long)]
        work_dir: Option<PathBuf>,
        /// Skip confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging - default to INFO level if RUST_LOG not set.
    // Logs go to stderr so --json output on stdout stays parseable.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Health { url } => commands::health(&url, cli.json).await,
        Commands::Backup {
            url,
            output,
            schema_only,
            data_only,
            format,
        } => {
            let options = BackupOptions {
                schema_only,
                data_only,
            };
            commands::backup(&url, &output, options, format, cli.json).await
        }
        Commands::Restore { url, input, yes } => {
            commands::restore(&url, &input, yes, cli.json).await
        }
        Commands::Migrate {
            source,
            target,
            config,
            work_dir,
            yes,
        } => {
            let endpoints = match (config, source, target) {
                (Some(path), _, _) => MigrationTarget::ConfigFile(path),
                (None, Some(source), Some(target)) => MigrationTarget::Urls { source, target },
                _ => anyhow::bail!("Provide --source and --target, or --config"),
            };
            commands::migrate(&endpoints, work_dir.as_deref(), yes, cli.json).await
        }
    }
}
