// SQL Server access
//
// DbConnector is the seam between the installer and SQL Server so the connection-check, database
// listing and legacy-password paths can be tested without a server. Every call opens its own
// connection and drops it before returning; nothing is pooled or held across actions.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use std::time::{Duration, Instant};
use tiberius::{Client, Config, SqlBrowser};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use crate::utils::logging::mask_connection_string;

pub type SqlClient = Client<Compat<TcpStream>>;

/// Error returned by connection attempts.
/// Keeps user-friendly messages separate from internal details.
#[derive(Debug, Clone)]
pub struct ConnectError {
    /// User-friendly message (safe to show in UI)
    pub user_message: String,
    /// Internal details for logging (may contain masked info)
    pub internal_details: String,
}

impl std::fmt::Display for ConnectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.user_message)
    }
}

impl std::error::Error for ConnectError {}

/// Trait for SQL Server round-trips.
/// Production code uses RealDbConnector; tests use stubs.
#[async_trait]
pub trait DbConnector: Send + Sync {
    /// Connect and run a trivial query.
    async fn connect(&self, connection_string: &str) -> Result<(), ConnectError>;

    /// Names of every database on the server, system ones included.
    async fn database_names(&self, connection_string: &str) -> Result<Vec<String>>;

    /// First column of the first row of `sql`, if any.
    async fn query_first_string(&self, connection_string: &str, sql: &str) -> Result<Option<String>>;

    /// Run each batch in order on one connection; stops at the first failing batch.
    async fn execute_batches(&self, connection_string: &str, batches: &[String]) -> Result<()>;
}

/// Production connector backed by tiberius.
#[derive(Debug, Clone)]
pub struct RealDbConnector {
    connect_timeout: Duration,
}

impl RealDbConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for RealDbConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(20))
    }
}

/// Open a SQL Server connection. Named instances are resolved through the SQL Server Browser.
pub async fn open_sql_server(connection_string: &str, connect_timeout: Duration) -> Result<SqlClient> {
    let started = Instant::now();
    debug!(
        "[PHASE: database] [STEP: connect] open_sql_server entered (conn={})",
        mask_connection_string(connection_string)
    );

    let config = Config::from_ado_string(connection_string)
        .context("Connection string is not valid")?;

    let connect = async {
        let tcp = TcpStream::connect_named(&config).await?;
        tcp.set_nodelay(true)?;
        // tiberius expects a futures::io::AsyncWrite, so we use compat_write
        let client = Client::connect(config, tcp.compat_write()).await?;
        Ok::<SqlClient, anyhow::Error>(client)
    };

    let client = timeout(connect_timeout, connect)
        .await
        .map_err(|_| anyhow::anyhow!("Connection timed out after {}s", connect_timeout.as_secs()))??;

    debug!(
        "[PHASE: database] [STEP: connect] open_sql_server exit (duration_ms={})",
        started.elapsed().as_millis()
    );
    Ok(client)
}

#[async_trait]
impl DbConnector for RealDbConnector {
    async fn connect(&self, connection_string: &str) -> Result<(), ConnectError> {
        let round_trip = async {
            let mut client = open_sql_server(connection_string, self.connect_timeout).await?;
            client.simple_query("SELECT 1").await?.into_row().await?;
            Ok::<(), anyhow::Error>(())
        };

        round_trip.await.map_err(|e| {
            let timed_out = e.to_string().contains("timed out");
            ConnectError {
                user_message: if timed_out {
                    "Connection timed out. Check network connectivity and firewall.".to_string()
                } else {
                    "Unable to connect. Verify server name, credentials, and network access."
                        .to_string()
                },
                internal_details: format!("Connection error: {:#}", e),
            }
        })
    }

    async fn database_names(&self, connection_string: &str) -> Result<Vec<String>> {
        let mut client = open_sql_server(connection_string, self.connect_timeout).await?;
        let rows = client
            .simple_query("SELECT name FROM master..sysdatabases")
            .await?
            .into_first_result()
            .await?;
        Ok(rows
            .iter()
            .filter_map(|r| r.get::<&str, _>(0).map(str::to_string))
            .collect())
    }

    async fn query_first_string(&self, connection_string: &str, sql: &str) -> Result<Option<String>> {
        let mut client = open_sql_server(connection_string, self.connect_timeout).await?;
        let row = client.simple_query(sql).await?.into_row().await?;
        match row {
            Some(r) => Ok(r.try_get::<&str, _>(0)?.map(str::to_string)),
            None => Ok(None),
        }
    }

    async fn execute_batches(&self, connection_string: &str, batches: &[String]) -> Result<()> {
        use futures::TryStreamExt;

        let mut client = open_sql_server(connection_string, self.connect_timeout).await?;
        for (idx, batch) in batches.iter().enumerate() {
            let sql = batch.trim();
            if sql.is_empty() {
                continue;
            }
            let mut stream = client.simple_query(sql).await.with_context(|| {
                format!("Failed to execute SQL batch {} of {}", idx + 1, batches.len())
            })?;
            // Drain all result sets.
            while stream
                .try_next()
                .await
                .with_context(|| format!("Failed reading results of SQL batch {}", idx + 1))?
                .is_some()
            {}
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::StubDbConnector;
    use super::*;

    #[test]
    fn connect_error_display_is_user_friendly() {
        let err = ConnectError {
            user_message: "Connection refused by server.".to_string(),
            internal_details: "tcp connect failed: errno=111".to_string(),
        };
        let displayed = format!("{}", err);
        assert_eq!(displayed, "Connection refused by server.");
        assert!(!displayed.contains("errno"));
    }

    #[test]
    fn connect_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ConnectError>();
    }

    #[tokio::test]
    async fn stub_failure_keeps_password_out_of_user_message() {
        let stub = StubDbConnector::default();
        let err = stub.connect("ignored").await.expect_err("unreachable");
        assert!(!err.user_message.contains("PASSWORD_SHOULD_BE_REDACTED"));
        assert!(err.internal_details.contains("Login failed"));
        assert_eq!(stub.calls(), 1);
    }

    #[tokio::test]
    async fn invalid_connection_string_fails_fast() {
        let started = Instant::now();
        let res = open_sql_server("Server=tcp:localhost,notaport", Duration::from_millis(200)).await;
        assert!(res.is_err());
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
