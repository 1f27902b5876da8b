// ABOUTME: Wrapper for pg_dump and pg_restore used by the custom archive format
// ABOUTME: Runs client binaries with captured stderr and kills them when abandoned

use crate::config::ConnectionConfig;
use crate::migration::dump::DumpScope;
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use which::which;

/// Failure while running an external client tool
#[derive(Error, Debug)]
pub enum ToolError {
    #[error(
        "{program} not found in PATH. Is the PostgreSQL client installed?\n\
         Install with:\n\
         - Ubuntu/Debian: sudo apt-get install postgresql-client\n\
         - macOS: brew install postgresql"
    )]
    NotFound { program: String },

    #[error("Failed to execute {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} failed ({status}): {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
}

/// An external program invocation with its arguments and extra environment
#[derive(Debug, Clone, Default)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<OsString>,
    pub envs: Vec<(String, String)>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }
}

/// Run `command` to completion and return its stdout
///
/// stdout and stderr are both drained while the child is awaited, so a chatty
/// tool cannot block on a full pipe. The child is killed if the returned
/// future is dropped before it finishes.
pub async fn run_tool(command: &ToolCommand) -> Result<String, ToolError> {
    if which(&command.program).is_err() {
        return Err(ToolError::NotFound {
            program: command.program.clone(),
        });
    }

    tracing::debug!("Running {} with {} argument(s)", command.program, command.args.len());

    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in &command.envs {
        cmd.env(key, value);
    }

    let child = cmd.spawn().map_err(|source| ToolError::Spawn {
        program: command.program.clone(),
        source,
    })?;
    let output = child
        .wait_with_output()
        .await
        .map_err(|source| ToolError::Spawn {
            program: command.program.clone(),
            source,
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ToolError::Failed {
            program: command.program.clone(),
            status: output.status.to_string(),
            stderr: stderr.trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn with_connection(mut cmd: ToolCommand, config: &ConnectionConfig) -> ToolCommand {
    cmd = cmd
        .arg("--host")
        .arg(config.host())
        .arg("--port")
        .arg(config.port().unwrap_or(5432).to_string())
        .arg("--dbname")
        .arg(config.database.clone().unwrap_or_default());
    if let Some(user) = &config.user {
        cmd = cmd.arg("--username").arg(user.clone());
    }
    // Keeps the password off the command line
    if let Some(password) = &config.password {
        cmd = cmd.env("PGPASSWORD", password.clone());
    }
    if config.ssl {
        cmd = cmd.env("PGSSLMODE", "require");
    }
    cmd
}

/// `pg_dump` invocation writing a custom-format archive to `output`
pub fn pg_dump_command(config: &ConnectionConfig, output: &Path, scope: DumpScope) -> ToolCommand {
    let mut cmd = ToolCommand::new("pg_dump")
        .arg("--format=custom")
        .arg("--no-owner")
        .arg("--no-privileges");
    cmd = match scope {
        DumpScope::SchemaOnly => cmd.arg("--schema-only"),
        DumpScope::DataOnly => cmd.arg("--data-only"),
        DumpScope::Full => cmd,
    };
    let mut file_arg = OsString::from("--file=");
    file_arg.push(output.as_os_str());
    with_connection(cmd.arg(file_arg), config)
}

/// `pg_restore` invocation replaying the archive at `input`
pub fn pg_restore_command(config: &ConnectionConfig, input: &Path) -> ToolCommand {
    let cmd = ToolCommand::new("pg_restore")
        .arg("--no-owner")
        .arg("--no-privileges")
        .arg("--clean")
        .arg("--if-exists")
        .arg("--single-transaction")
        .arg("--exit-on-error");
    with_connection(cmd, config).arg(input.as_os_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineKind;
    use tempfile::tempdir;

    fn config() -> ConnectionConfig {
        ConnectionConfig::server(
            EngineKind::Postgres,
            "db.internal",
            Some(6543),
            "shop",
            "app",
            "s3cret",
        )
    }

    fn args(cmd: &ToolCommand) -> Vec<String> {
        cmd.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_pg_dump_command_keeps_password_in_env() {
        let cmd = pg_dump_command(&config(), Path::new("/tmp/shop.dump"), DumpScope::SchemaOnly);
        let args = args(&cmd);

        assert_eq!(cmd.program, "pg_dump");
        assert!(args.contains(&"--format=custom".to_string()));
        assert!(args.contains(&"--schema-only".to_string()));
        assert!(args.contains(&"--file=/tmp/shop.dump".to_string()));
        assert!(args.windows(2).any(|w| w == ["--port", "6543"]));
        assert!(args.windows(2).any(|w| w == ["--username", "app"]));
        assert!(!args.iter().any(|a| a.contains("s3cret")));
        assert!(cmd
            .envs
            .contains(&("PGPASSWORD".to_string(), "s3cret".to_string())));
    }

    #[test]
    fn test_pg_dump_command_full_scope_has_no_scope_flag() {
        let cmd = pg_dump_command(&config(), Path::new("out.dump"), DumpScope::Full);
        let args = args(&cmd);
        assert!(!args.contains(&"--schema-only".to_string()));
        assert!(!args.contains(&"--data-only".to_string()));
    }

    #[test]
    fn test_pg_restore_command_ends_with_input() {
        let mut cfg = config();
        cfg.ssl = true;
        let cmd = pg_restore_command(&cfg, Path::new("in.dump"));
        let args = args(&cmd);

        assert_eq!(cmd.program, "pg_restore");
        assert_eq!(args.last().map(String::as_str), Some("in.dump"));
        assert!(args.contains(&"--single-transaction".to_string()));
        assert!(cmd
            .envs
            .contains(&("PGSSLMODE".to_string(), "require".to_string())));
    }

    #[tokio::test]
    async fn test_run_tool_missing_binary() {
        let err = run_tool(&ToolCommand::new("definitely-not-a-real-binary-xyz"))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_tool_captures_stdout() {
        let cmd = ToolCommand::new("sh")
            .arg("-c")
            .arg("printf \"$GREETING\"")
            .env("GREETING", "hello");
        assert_eq!(run_tool(&cmd).await.unwrap(), "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_tool_reports_stderr_on_failure() {
        let cmd = ToolCommand::new("sh")
            .arg("-c")
            .arg("echo 'relation missing' >&2; exit 3");
        match run_tool(&cmd).await.unwrap_err() {
            ToolError::Failed {
                program, stderr, ..
            } => {
                assert_eq!(program, "sh");
                assert_eq!(stderr, "relation missing");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_tool_drains_large_stderr() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("done");
        // Writes well past a pipe buffer before exiting
        let script = format!(
            "i=0; while [ $i -lt 20000 ]; do echo 'noise noise noise' >&2; i=$((i+1)); done; touch {}",
            marker.display()
        );
        let cmd = ToolCommand::new("sh").arg("-c").arg(script);
        run_tool(&cmd).await.unwrap();
        assert!(marker.exists());
    }
}
