// ABOUTME: Utility functions shared by the CLI commands
// ABOUTME: Checks for external client tools and sanitizes names for display

use anyhow::{bail, Result};
use which::which;

/// Check that the given client tools are available in PATH
///
/// # Errors
///
/// Returns an error with installation instructions if any tool is missing.
///
/// # Examples
///
/// ```no_run
/// # use sqlferry::utils::check_required_tools;
/// # use anyhow::Result;
/// # fn example() -> Result<()> {
/// // Needed for the custom archive format
/// check_required_tools(&["pg_dump"])?;
/// # Ok(())
/// # }
/// ```
pub fn check_required_tools(tools: &[&str]) -> Result<()> {
    let missing: Vec<&str> = tools
        .iter()
        .copied()
        .filter(|tool| which(tool).is_err())
        .collect();

    if !missing.is_empty() {
        bail!(
            "Missing required PostgreSQL client tools: {}\n\
             \n\
             Please install PostgreSQL client tools:\n\
             - Ubuntu/Debian: sudo apt-get install postgresql-client\n\
             - macOS: brew install postgresql\n\
             - RHEL/CentOS: sudo yum install postgresql\n\
             - Windows: Download from https://www.postgresql.org/download/windows/",
            missing.join(", ")
        );
    }

    Ok(())
}

/// Sanitize an identifier (table name, file name) for display
///
/// Removes control characters and limits length so names read from a
/// database cannot inject fake lines into logs or terminal output.
///
/// # Examples
///
/// ```
/// # use sqlferry::utils::sanitize_identifier;
/// assert_eq!(sanitize_identifier("normal_table"), "normal_table");
/// assert_eq!(sanitize_identifier("table\x00name"), "tablename");
/// assert_eq!(sanitize_identifier("table\nname"), "tablename");
///
/// let long_name = "a".repeat(200);
/// assert_eq!(sanitize_identifier(&long_name).len(), 100);
/// ```
pub fn sanitize_identifier(identifier: &str) -> String {
    identifier
        .chars()
        .filter(|c| !c.is_control())
        .take(100)
        .collect()
}
