// Database dialog actions
//
// Connection test, database drop-down and SQL Server drop-down. Connection problems end up in
// bag properties for the dialog to show; none of these fail the action.

use log::{info, warn};
use std::time::Duration;

use crate::database::connection::DbConnector;
use crate::database::discovery::{
    build_connection_string, list_databases, list_sql_instances, validate_connection, SQL_AUTH_WINDOWS,
};
use crate::models::bag::PropertyBag;
use crate::models::responses::ActionResult;

/// Server-level connection string for the credentials entered in the dialog.
pub fn dialog_connection_string(bag: &PropertyBag) -> String {
    let server = bag.get("DB_SERVER");
    if bag.get("DB_AUTH") == SQL_AUTH_WINDOWS {
        build_connection_string(server, "master", None, None)
    } else {
        build_connection_string(server, "master", Some(bag.get("DB_LOGIN")), Some(bag.get("DB_PASSWORD")))
    }
}

pub async fn check_connection_ui(connector: &dyn DbConnector, bag: &mut PropertyBag) -> ActionResult {
    let conn = dialog_connection_string(bag);
    let (ok, message) = validate_connection(connector, &conn).await;
    bag.set_flag("DB_CONN_CORRECT", ok);
    bag.set("DB_CONN", if ok { conn } else { String::new() });
    bag.set("DB_CONN_MSG", message);
    ActionResult::Success
}

/// Fill the `DB_SELECT` drop-down with the user databases behind `DB_CONN`, selecting the last.
pub async fn db_list_ui(connector: &dyn DbConnector, bag: &mut PropertyBag) -> ActionResult {
    let conn = bag.get("DB_CONN").to_string();
    bag.clear_options("DB_SELECT");

    let (ok, _) = validate_connection(connector, &conn).await;
    if !ok {
        bag.set("DB_SELECT", "");
        return ActionResult::Success;
    }

    match list_databases(connector, &conn, &[]).await {
        Ok(names) => {
            let last = names.last().cloned().unwrap_or_default();
            for name in names {
                bag.add_option("DB_SELECT", name);
            }
            bag.set("DB_SELECT", last);
        }
        Err(e) => {
            warn!(
                "[PHASE: database] [STEP: db_list_ui] Database listing failed: {:#}",
                e
            );
            bag.set("DB_SELECT", "");
        }
    }
    ActionResult::Success
}

pub async fn sql_server_list_ui(wait: Duration, bag: &mut PropertyBag) -> ActionResult {
    bag.clear_options("DB_SERVER");
    let instances = list_sql_instances(wait).await;
    info!(
        "[PHASE: database] [STEP: sql_server_list_ui] SQL Server instances found (count={})",
        instances.len()
    );
    for instance in instances {
        bag.add_option("DB_SERVER", instance);
    }
    ActionResult::Success
}
