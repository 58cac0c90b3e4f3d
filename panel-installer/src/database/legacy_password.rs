// Administrator password pre-fill from an existing enterprise-server database.
//
// Best effort: every failure is logged and turned into `None`. The query runs with the
// installation login (`InstallConnectionString`); the operational connection string only
// names the database.

use log::{debug, warn};

use crate::database::connection::DbConnector;
use crate::database::discovery::connection_string_database;
use crate::models::variables::SetupVariables;
use crate::security::secret_protector::SecretProtector;
use crate::utils::validation::quote_sql_server_identifier;

/// Query reading the stored password of the built-in administrator (`UserID = 1`).
pub fn admin_password_query(database: &str) -> anyhow::Result<String> {
    Ok(format!(
        "USE {}; SELECT [Password] FROM [dbo].[Users] WHERE [UserID] = 1",
        quote_sql_server_identifier(database)?
    ))
}

/// Stored administrator password of the installation described by `vars`, decrypted with the
/// component's crypto key when the configuration says values are encrypted.
pub async fn fetch_admin_password(connector: &dyn DbConnector, vars: &SetupVariables) -> Option<String> {
    let install_conn = vars.install_connection_string.trim();
    if install_conn.is_empty() {
        debug!("[PHASE: discovery] [STEP: legacy_password] No install connection string; skipping");
        return None;
    }

    let result = read_admin_password(connector, vars, install_conn).await;

    match result {
        Ok(v) => {
            debug!(
                "[PHASE: discovery] [STEP: legacy_password] Administrator password read (found={})",
                v.is_some()
            );
            v
        }
        Err(e) => {
            warn!(
                "[PHASE: discovery] [STEP: legacy_password] Ignoring failure to read administrator password: {:#}",
                e
            );
            None
        }
    }
}

async fn read_admin_password(
    connector: &dyn DbConnector,
    vars: &SetupVariables,
    install_conn: &str,
) -> anyhow::Result<Option<String>> {
    let database = connection_string_database(&vars.connection_string)
        .ok_or_else(|| anyhow::anyhow!("Connection string names no database"))?;
    let sql = admin_password_query(&database)?;
    let Some(stored) = connector
        .query_first_string(install_conn, &sql)
        .await?
        .filter(|s| !s.is_empty())
    else {
        return Ok(None);
    };
    if vars.encryption_enabled {
        if !SecretProtector::is_encrypted(&stored) {
            debug!(
                "[PHASE: discovery] [STEP: legacy_password] Stored password uses a cipher this engine cannot read; skipping"
            );
            return Ok(None);
        }
        let protector = SecretProtector::from_crypto_key(&vars.crypto_key)?;
        return protector.decrypt(&stored).map(Some);
    }
    Ok(Some(stored))
}
