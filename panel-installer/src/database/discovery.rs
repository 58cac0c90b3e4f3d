// SQL Server discovery and validation
//
// Connection-string building, connectivity checks, database listing, and instance enumeration
// through the SQL Server Browser (SSRP over UDP 1434).

use anyhow::Result;
use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;

use crate::database::connection::DbConnector;
use crate::utils::logging::mask_connection_string;

/// `DB_AUTH` value selecting integrated (Windows) authentication.
pub const SQL_AUTH_WINDOWS: &str = "Windows Authentication";
/// `DB_AUTH` value selecting SQL Server login authentication.
pub const SQL_AUTH_SERVER: &str = "SQL Server Authentication";

/// Never offered as an installation target.
pub const SYSTEM_DATABASES: [&str; 4] = ["tempdb", "master", "model", "msdb"];

const SSRP_PORT: u16 = 1434;
const SSRP_CLNT_BCAST_EX: u8 = 0x02;
const SSRP_SVR_RESP: u8 = 0x05;

pub const MSG_CONNECTION_OK: &str = "Connection to the SQL Server was established successfully.";

/// Integrated security when `login` is absent or blank, SQL login otherwise.
pub fn build_connection_string(
    server: &str,
    database: &str,
    login: Option<&str>,
    password: Option<&str>,
) -> String {
    match login.map(str::trim).filter(|l| !l.is_empty()) {
        Some(login) => format!(
            "Server={};Database={};User id={};Password={};",
            server.trim(),
            database.trim(),
            login,
            password.unwrap_or_default()
        ),
        None => format!(
            "Server={};Database={};Integrated Security=SSPI;",
            server.trim(),
            database.trim()
        ),
    }
}

/// Value of `key` in a `key=value;` connection string (case-insensitive key match).
pub fn connection_string_value(conn: &str, keys: &[&str]) -> Option<String> {
    conn.split(';').find_map(|part| {
        let (k, v) = part.split_once('=')?;
        let k = k.trim();
        keys.iter()
            .any(|want| want.eq_ignore_ascii_case(k))
            .then(|| v.trim().to_string())
    })
}

/// Database named by a connection string (`Database` or `Initial Catalog`).
pub fn connection_string_database(conn: &str) -> Option<String> {
    connection_string_value(conn, &["Database", "Initial Catalog"]).filter(|d| !d.is_empty())
}

/// Attempt a round-trip. Never errors: any failure becomes `(false, message)`.
pub async fn validate_connection(connector: &dyn DbConnector, connection_string: &str) -> (bool, String) {
    let started = Instant::now();
    if connection_string.trim().is_empty() {
        return (false, "Connection string is empty.".to_string());
    }

    match connector.connect(connection_string).await {
        Ok(()) => {
            info!(
                "[PHASE: database] [STEP: validate] Connection ok (conn={}, duration_ms={})",
                mask_connection_string(connection_string),
                started.elapsed().as_millis()
            );
            (true, MSG_CONNECTION_OK.to_string())
        }
        Err(e) => {
            warn!(
                "[PHASE: database] [STEP: validate] Connection failed (conn={}, details={}, duration_ms={})",
                mask_connection_string(connection_string),
                e.internal_details,
                started.elapsed().as_millis()
            );
            (false, e.user_message)
        }
    }
}

/// Drop system databases and `forbidden` names (case-insensitive), keeping server order.
pub fn filter_user_databases(names: Vec<String>, forbidden: &[&str]) -> Vec<String> {
    names
        .into_iter()
        .filter(|n| {
            let n = n.trim();
            !n.is_empty()
                && !SYSTEM_DATABASES
                    .iter()
                    .chain(forbidden.iter())
                    .any(|f| f.eq_ignore_ascii_case(n))
        })
        .collect()
}

/// User databases on the server behind `connection_string`.
///
/// The connection is opened and released inside the connector call, including on error.
pub async fn list_databases(
    connector: &dyn DbConnector,
    connection_string: &str,
    forbidden: &[&str],
) -> Result<Vec<String>> {
    let names = connector.database_names(connection_string).await?;
    let out = filter_user_databases(names, forbidden);
    debug!(
        "[PHASE: database] [STEP: list_databases] Listed user databases (count={})",
        out.len()
    );
    Ok(out)
}

/// Parse one SSRP response datagram into `SERVER` or `SERVER\INSTANCE` names.
///
/// Layout: `0x05`, little-endian u16 length, then `;`-separated key/value pairs with one
/// instance per `;;`-terminated record.
pub fn parse_ssrp_response(datagram: &[u8]) -> Vec<String> {
    if datagram.len() < 3 || datagram[0] != SSRP_SVR_RESP {
        return Vec::new();
    }
    let declared = u16::from_le_bytes([datagram[1], datagram[2]]) as usize;
    let body = &datagram[3..];
    let body = &body[..declared.min(body.len())];
    let text = String::from_utf8_lossy(body);

    let mut out = Vec::new();
    for record in text.split(";;") {
        let fields: Vec<&str> = record.split(';').collect();
        let mut server = None;
        let mut instance = None;
        for pair in fields.chunks(2) {
            if let [k, v] = pair {
                match k.trim() {
                    k if k.eq_ignore_ascii_case("ServerName") => server = Some(v.trim()),
                    k if k.eq_ignore_ascii_case("InstanceName") => instance = Some(v.trim()),
                    _ => {}
                }
            }
        }
        let Some(server) = server.filter(|s| !s.is_empty()) else {
            continue;
        };
        match instance {
            Some(i) if !i.is_empty() && !i.eq_ignore_ascii_case("MSSQLSERVER") => {
                out.push(format!("{}\\{}", server, i))
            }
            _ => out.push(server.to_string()),
        }
    }
    out
}

/// SQL Server instances answering a browser broadcast within `wait`. May be empty.
pub async fn list_sql_instances(wait: Duration) -> Vec<String> {
    let started = Instant::now();
    match broadcast_ssrp(wait).await {
        Ok(found) => {
            info!(
                "[PHASE: database] [STEP: list_instances] Instance discovery finished (count={}, duration_ms={})",
                found.len(),
                started.elapsed().as_millis()
            );
            found
        }
        Err(e) => {
            warn!(
                "[PHASE: database] [STEP: list_instances] Instance discovery failed: {:#}",
                e
            );
            Vec::new()
        }
    }
}

async fn broadcast_ssrp(wait: Duration) -> Result<Vec<String>> {
    let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
    socket.set_broadcast(true)?;
    socket
        .send_to(&[SSRP_CLNT_BCAST_EX], ("255.255.255.255", SSRP_PORT))
        .await?;

    let deadline = tokio::time::Instant::now() + wait;
    let mut names: BTreeSet<String> = BTreeSet::new();
    let mut buf = vec![0u8; 65535];
    loop {
        match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
            Ok(Ok((n, from))) => {
                let parsed = parse_ssrp_response(&buf[..n]);
                debug!(
                    "[PHASE: database] [STEP: list_instances] SSRP response (from={}, instances={})",
                    from,
                    parsed.len()
                );
                names.extend(parsed);
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => break,
        }
    }
    Ok(names.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::connection::testing::StubDbConnector;

    fn ssrp(body: &str) -> Vec<u8> {
        let mut d = vec![SSRP_SVR_RESP];
        d.extend_from_slice(&(body.len() as u16).to_le_bytes());
        d.extend_from_slice(body.as_bytes());
        d
    }

    #[test]
    fn login_selects_server_authentication() {
        let s = build_connection_string("sql01", "WebsitePanel", Some("sa"), Some("pw"));
        assert_eq!(s, "Server=sql01;Database=WebsitePanel;User id=sa;Password=pw;");
        assert!(!s.contains("Integrated Security"));
    }

    #[test]
    fn missing_or_blank_login_selects_integrated() {
        for login in [None, Some(""), Some("  ")] {
            let s = build_connection_string("sql01\\SQLEXPRESS", "master", login, Some("ignored"));
            assert_eq!(s, "Server=sql01\\SQLEXPRESS;Database=master;Integrated Security=SSPI;");
        }
    }

    #[test]
    fn database_read_back_from_connection_string() {
        let s = build_connection_string("sql01", "WebsitePanel", None, None);
        assert_eq!(connection_string_database(&s).as_deref(), Some("WebsitePanel"));
        assert_eq!(
            connection_string_database("Data Source=x;Initial Catalog=wsp;").as_deref(),
            Some("wsp")
        );
        assert_eq!(connection_string_database("Server=x;"), None);
    }

    #[test]
    fn system_databases_never_listed() {
        let names = vec![
            "master".to_string(),
            "TempDB".to_string(),
            "WebsitePanel".to_string(),
            "model".to_string(),
            "msdb".to_string(),
            "Reports".to_string(),
        ];
        assert_eq!(
            filter_user_databases(names, &["reports"]),
            vec!["WebsitePanel".to_string()]
        );
    }

    #[tokio::test]
    async fn only_system_databases_yields_empty_list() {
        let stub = StubDbConnector {
            databases: SYSTEM_DATABASES.iter().map(|s| s.to_string()).collect(),
            ..StubDbConnector::reachable()
        };
        let got = list_databases(&stub, "Server=.;", &[]).await.expect("list");
        assert!(got.is_empty());
    }

    #[tokio::test]
    async fn validation_never_errors() {
        let (ok, msg) = validate_connection(&StubDbConnector::default(), "Server=x;").await;
        assert!(!ok);
        assert!(msg.starts_with("Unable to connect"));

        let (ok, msg) = validate_connection(&StubDbConnector::reachable(), "Server=x;").await;
        assert!(ok);
        assert_eq!(msg, MSG_CONNECTION_OK);

        let (ok, _) = validate_connection(&StubDbConnector::reachable(), "  ").await;
        assert!(!ok);
    }

    #[test]
    fn ssrp_named_and_default_instances() {
        let d = ssrp("ServerName;SQL01;InstanceName;SQLEXPRESS;IsClustered;No;Version;15.0.2000.5;tcp;49172;;ServerName;SQL01;InstanceName;MSSQLSERVER;IsClustered;No;Version;15.0.2000.5;tcp;1433;;");
        assert_eq!(
            parse_ssrp_response(&d),
            vec!["SQL01\\SQLEXPRESS".to_string(), "SQL01".to_string()]
        );
    }

    #[test]
    fn ssrp_garbage_is_ignored() {
        assert!(parse_ssrp_response(&[0x04, 0, 0]).is_empty());
        assert!(parse_ssrp_response(&[]).is_empty());
        assert!(parse_ssrp_response(&ssrp("nonsense")).is_empty());
    }
}
