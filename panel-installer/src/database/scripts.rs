// Product SQL scripts
//
// The enterprise server package ships its schema as T-SQL files with `GO` separators. The
// engine does not interpret them; it only splits batches, makes sure the target database
// exists, and runs the batches in file order.

use anyhow::{Context, Result};
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::database::connection::DbConnector;
use crate::utils::validation::quote_sql_server_identifier;

/// Folder of the component package holding the SQL scripts.
pub const SCRIPTS_DIR: &str = "Setup";
/// Full schema for a fresh database.
pub const INSTALL_SCRIPT: &str = "install_db.sql";
/// Incremental changes applied on maintain.
pub const UPDATE_SCRIPT: &str = "update_db.sql";

/// Which script of a package to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    Install,
    Update,
}

impl ScriptKind {
    pub fn file_name(self) -> &'static str {
        match self {
            ScriptKind::Install => INSTALL_SCRIPT,
            ScriptKind::Update => UPDATE_SCRIPT,
        }
    }

    pub fn path_in(self, package_folder: &Path) -> PathBuf {
        package_folder.join(SCRIPTS_DIR).join(self.file_name())
    }
}

/// Split a SQL Server script on `GO` batch separators.
///
/// A separator is a line that is only `GO` (case-insensitive, surrounding whitespace allowed).
/// Blank batches are dropped.
pub fn split_sql_server_batches(script: &str) -> Vec<String> {
    let mut batches = Vec::new();
    let mut current = String::new();

    for line in script.lines() {
        if line.trim().eq_ignore_ascii_case("GO") {
            if !current.trim().is_empty() {
                batches.push(current.trim().to_string());
            }
            current.clear();
            continue;
        }
        current.push_str(line);
        current.push('\n');
    }

    if !current.trim().is_empty() {
        batches.push(current.trim().to_string());
    }
    batches
}

/// Batch creating `database` when the server does not have it yet.
pub fn create_database_batch(database: &str) -> Result<String> {
    let quoted = quote_sql_server_identifier(database)?;
    let literal = database.replace('\'', "''");
    Ok(format!(
        "IF DB_ID(N'{}') IS NULL CREATE DATABASE {}",
        literal, quoted
    ))
}

/// Create `database` through the server-level (install) connection if it is missing.
pub async fn ensure_database(
    connector: &dyn DbConnector,
    install_connection_string: &str,
    database: &str,
) -> Result<()> {
    let batch = create_database_batch(database)?;
    connector
        .execute_batches(install_connection_string, &[batch])
        .await
        .with_context(|| format!("Failed to create database '{}'", database))?;
    info!(
        "[PHASE: database] [STEP: ensure_database] Database ready (name={})",
        database
    );
    Ok(())
}

/// Run every batch of the script at `path` against `connection_string`. Returns the batch count.
pub async fn run_script_file(
    connector: &dyn DbConnector,
    connection_string: &str,
    path: &Path,
) -> Result<usize> {
    let started = Instant::now();
    debug!(
        "[PHASE: database] [STEP: run_script] run_script_file entered (path={:?})",
        path
    );

    let script = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read SQL script {:?}", path))?;
    let batches = split_sql_server_batches(&script);
    if batches.is_empty() {
        info!(
            "[PHASE: database] [STEP: run_script] Script has no batches (path={:?})",
            path
        );
        return Ok(0);
    }

    connector
        .execute_batches(connection_string, &batches)
        .await
        .with_context(|| format!("SQL script {:?} failed", path))?;

    info!(
        "[PHASE: database] [STEP: run_script] Script applied (path={:?}, batches={}, duration_ms={})",
        path,
        batches.len(),
        started.elapsed().as_millis()
    );
    Ok(batches.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::connection::testing::StubDbConnector;

    #[test]
    fn splits_on_go_lines_only() {
        let script = "SELECT 1;\nGO\nSELECT 2;\n  go  \nSELECT 3;\n";
        let batches = split_sql_server_batches(script);
        assert_eq!(batches, vec!["SELECT 1;", "SELECT 2;", "SELECT 3;"]);

        let script = "SELECT 'GO' AS word;\nGOTO label;\nGO\n\nGO\n";
        let batches = split_sql_server_batches(script);
        assert_eq!(batches.len(), 1);
        assert!(batches[0].contains("GOTO label;"));
    }

    #[test]
    fn create_batch_quotes_and_rejects_injection() {
        assert_eq!(
            create_database_batch("WebsitePanel").expect("batch"),
            "IF DB_ID(N'WebsitePanel') IS NULL CREATE DATABASE [WebsitePanel]"
        );
        assert!(create_database_batch("x]; DROP DATABASE master; --").is_err());
    }

    #[test]
    fn script_paths_live_under_package_setup_folder() {
        let p = ScriptKind::Update.path_in(Path::new("pkg"));
        assert_eq!(p, Path::new("pkg").join("Setup").join("update_db.sql"));
    }

    #[tokio::test]
    async fn script_batches_are_sent_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(INSTALL_SCRIPT);
        tokio::fs::write(&path, "CREATE TABLE a (x int)\nGO\nCREATE TABLE b (y int)\nGO\n")
            .await
            .expect("write");

        let stub = StubDbConnector::reachable();
        let n = run_script_file(&stub, "Server=.;Database=wsp;", &path)
            .await
            .expect("run");
        assert_eq!(n, 2);
        assert_eq!(
            *stub.executed.lock().expect("lock"),
            vec!["CREATE TABLE a (x int)".to_string(), "CREATE TABLE b (y int)".to_string()]
        );
    }

    #[tokio::test]
    async fn missing_script_and_failing_server_are_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let stub = StubDbConnector::reachable();
        assert!(run_script_file(&stub, "x", &dir.path().join("nope.sql")).await.is_err());

        let path = dir.path().join("a.sql");
        tokio::fs::write(&path, "SELECT 1").await.expect("write");
        let failing = StubDbConnector::default();
        assert!(run_script_file(&failing, "x", &path).await.is_err());
    }
}
