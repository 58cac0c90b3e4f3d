// Settings pre-fill
//
// Runs before the first dialog. Blank passwords get random values, then an existing
// installation is looked up and its settings are offered as defaults so an upgrade keeps the
// same endpoints, accounts and database.

use anyhow::Result;
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::api::Engine;
use crate::database::discovery::{connection_string_value, SQL_AUTH_SERVER, SQL_AUTH_WINDOWS};
use crate::database::legacy_password::fetch_admin_password;
use crate::discovery::config_store::ConfigValueStore;
use crate::discovery::version::version_guard;
use crate::models::bag::PropertyBag;
use crate::models::components::{default_enterprise_server_url, ComponentKind};
use crate::models::errors::SetupError;
use crate::models::responses::ActionResult;
use crate::models::variables::SetupVariables;
use crate::security::crypto::generate_password;

/// Password properties filled with a random value when blank.
pub const AUTO_PASSWORD_KEYS: [&str; 5] = [
    "PI_SERVER_PASSWORD",
    "PI_ESERVER_PASSWORD",
    "PI_PORTAL_PASSWORD",
    "SERVER_ACCESS_PASSWORD",
    "SERVERADMIN_PASSWORD",
];

const AUTO_PASSWORD_LEN: usize = 20;

/// Fill `key` and `<key>_CONFIRM` with a fresh password when `key` is blank.
pub fn apply_new_password(bag: &mut PropertyBag, key: &str) -> Result<bool> {
    if bag.get_non_blank(key).is_some() {
        return Ok(false);
    }
    let password = generate_password(AUTO_PASSWORD_LEN)?;
    bag.set(key, password.clone());
    bag.set(format!("{}_CONFIRM", key), password);
    info!(
        "[PHASE: prefill] [STEP: passwords] New password was applied to {}",
        key
    );
    Ok(true)
}

pub async fn prefill_settings(engine: &Engine, bag: &mut PropertyBag) -> ActionResult {
    let started = Instant::now();
    info!("[PHASE: prefill] [STEP: start] prefill_settings entered");

    match run_prefill(engine, bag).await {
        Ok(()) => {
            info!(
                "[PHASE: prefill] [STEP: end] prefill_settings exit ok (duration_ms={})",
                started.elapsed().as_millis()
            );
            ActionResult::Success
        }
        Err(e) => {
            if let Some(declared) = e.downcast_ref::<SetupError>() {
                // Shown to the user by the host as an error dialog.
                engine.progress("prefill").error(declared.to_string(), None);
            }
            error!(
                "[PHASE: prefill] [STEP: end] prefill_settings failed (duration_ms={}): {:#}",
                started.elapsed().as_millis(),
                e
            );
            ActionResult::Failure
        }
    }
}

async fn run_prefill(engine: &Engine, bag: &mut PropertyBag) -> Result<()> {
    for key in AUTO_PASSWORD_KEYS {
        apply_new_password(bag, key)?;
    }

    let install_root = bag
        .get_non_blank("WSP_INSTALL_DIR")
        .map(|s| PathBuf::from(s.trim()));
    let candidates = engine
        .locator
        .candidate_dirs(install_root.as_deref(), engine.drives.as_ref());
    let Some(cfg_path) = engine.locator.find_main_config(&candidates).await else {
        info!("[PHASE: prefill] [STEP: discovery] No previous installation found");
        return Ok(());
    };

    let store = ConfigValueStore::load(&cfg_path).await?;
    let target_version = bag.get("ProductVersion").trim().to_string();
    let mut eserver_url = String::new();

    for kind in ComponentKind::all() {
        let Some(id) = store.component_id(kind.code()) else {
            debug!(
                "[PHASE: prefill] [STEP: discovery] Component not installed (component={})",
                kind
            );
            continue;
        };

        let mut vars = SetupVariables {
            component_id: id.clone(),
            ..Default::default()
        };
        store.load_component_settings(&mut vars)?;
        version_guard(&vars.version, &target_version, vars.installer_kind)?;

        info!(
            "[PHASE: prefill] [STEP: discovery] Found installed component (component={}, id={}, version={})",
            kind, id, vars.version
        );
        publish_common(bag, kind, &vars, &cfg_path);

        match kind {
            ComponentKind::Server => {
                bag.set("SERVER_ACCESS_PASSWORD", "");
                bag.set("SERVER_ACCESS_PASSWORD_CONFIRM", "");
            }
            ComponentKind::EnterpriseServer => {
                eserver_url = format!("http://{}:{}", vars.web_site_ip, vars.web_site_port);
                publish_database(bag, &vars);
                if let Some(password) = fetch_admin_password(engine.db.as_ref(), &vars).await {
                    bag.set("SERVERADMIN_PASSWORD", password.clone());
                    bag.set("SERVERADMIN_PASSWORD_CONFIRM", password);
                }
            }
            ComponentKind::Portal => {
                let _ = bag.set_if_not_blank("PI_ESERVER_URL", &vars.enterprise_server_url)
                    || bag.set_if_not_blank("PI_ESERVER_URL", &eserver_url)
                    || bag.set_if_not_blank("PI_ESERVER_URL", default_enterprise_server_url());
            }
        }

        let found = component_in_place(engine, &vars).await;
        bag.set_flag(&format!("COMPFOUND_{}", kind.bag_prefix()), found);
    }
    Ok(())
}

fn publish_common(bag: &mut PropertyBag, kind: ComponentKind, vars: &SetupVariables, cfg_path: &Path) {
    let prefix = kind.bag_prefix();
    bag.set_if_not_blank(&format!("COMPFOUND_{}_ID", prefix), &vars.component_id);
    bag.set_if_not_blank(
        &format!("COMPFOUND_{}_MAIN_CFG", prefix),
        &cfg_path.to_string_lossy(),
    );

    bag.set_if_not_blank(&kind.bag_key("IP"), &vars.web_site_ip);
    bag.set_if_not_blank(&kind.bag_key("PORT"), &vars.web_site_port);
    bag.set_if_not_blank(&kind.bag_key("HOST"), &vars.web_site_domain);
    bag.set_if_not_blank(&kind.bag_key("LOGIN"), &vars.user_account);
    bag.set_if_not_blank(&kind.bag_key("DOMAIN"), &vars.user_domain);

    bag.set_if_not_blank(&kind.bag_key("INSTALL_DIR"), &vars.install_folder.to_string_lossy());
    if let Some(parent) = vars.install_folder.parent() {
        bag.set_if_not_blank("WSP_INSTALL_DIR", &parent.to_string_lossy());
    }
}

/// Database settings of an installed enterprise server, split back into dialog fields.
fn publish_database(bag: &mut PropertyBag, vars: &SetupVariables) {
    let install_conn = vars.install_connection_string.trim();
    bag.set_if_not_blank("DB_CONN", install_conn);
    if let Some(server) = connection_string_value(
        install_conn,
        &["Server", "Data Source", "Address", "Addr", "Network Address"],
    ) {
        bag.set_if_not_blank("DB_SERVER", &server);
    }

    if !install_conn.is_empty() {
        let integrated = connection_string_value(install_conn, &["Integrated Security", "Trusted_Connection"])
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "yes" | "sspi"))
            .unwrap_or(false);
        if integrated {
            bag.set("DB_AUTH", SQL_AUTH_WINDOWS);
        } else {
            bag.set("DB_AUTH", SQL_AUTH_SERVER);
            if let Some(login) = connection_string_value(install_conn, &["User ID", "UID", "User"]) {
                bag.set_if_not_blank("DB_LOGIN", &login);
            }
            if let Some(password) = connection_string_value(install_conn, &["Password", "PWD"]) {
                bag.set_if_not_blank("DB_PASSWORD", &password);
            }
        }
    }

    if let Some(database) = connection_string_value(&vars.connection_string, &["Database", "Initial Catalog"]) {
        bag.set_if_not_blank("DB_DATABASE", &database);
    }
}

/// An installation counts as present only when its service account and pool both still exist.
async fn component_in_place(engine: &Engine, vars: &SetupVariables) -> bool {
    let account = match engine.host.user_exists(&vars.user_domain, &vars.user_account).await {
        Ok(v) => v,
        Err(e) => {
            warn!(
                "[PHASE: prefill] [STEP: probe] Account lookup failed (login={}): {:#}",
                vars.user_account, e
            );
            false
        }
    };
    let pool = match engine.host.app_pool_exists(&vars.application_pool).await {
        Ok(v) => v,
        Err(e) => {
            warn!(
                "[PHASE: prefill] [STEP: probe] Application pool lookup failed (pool={}): {:#}",
                vars.application_pool, e
            );
            false
        }
    };
    account && pool
}
