// SetupVariables: everything one workflow run needs.
//
// Filled progressively (main configuration first, then the property bag) and then only read.
// Never persisted; the main configuration file is the durable record.

use crate::database::discovery::{build_connection_string, SQL_AUTH_SERVER};
use crate::models::bag::PropertyBag;
use crate::models::components::{default_enterprise_server_url, ComponentKind};
use crate::models::errors::SetupError;
use crate::utils::paired_values::{decode_pairs, encode_pairs};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// How the previous installation was performed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallerKind {
    /// Interactive installer application (in-place updates).
    #[default]
    Interactive,
    /// Full MSI package installation.
    Msi,
}

impl InstallerKind {
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("msi") {
            InstallerKind::Msi
        } else {
            InstallerKind::Interactive
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InstallerKind::Interactive => "interactive",
            InstallerKind::Msi => "msi",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupVariables {
    pub component_id: String,
    pub component_code: String,
    /// Version recorded by the existing installation (`Release` setting).
    pub version: String,
    /// Version about to be installed.
    pub target_version: String,
    pub install_folder: PathBuf,
    pub web_site_ip: String,
    pub web_site_port: String,
    pub web_site_domain: String,
    pub user_account: String,
    pub user_domain: String,
    pub user_password: String,
    /// Server access password (server) or serveradmin password (enterprise server).
    pub admin_password: String,
    pub application_pool: String,
    pub service_name: String,
    pub service_file: String,
    pub install_connection_string: String,
    pub connection_string: String,
    pub crypto_key: String,
    pub encryption_enabled: bool,
    pub installer_kind: InstallerKind,
    pub enterprise_server_url: String,
    /// Root of the unpacked package; component files live in a sub-folder.
    pub setup_source: PathBuf,
    pub main_config: PathBuf,
    /// Discovered file name -> name used inside backups.
    pub file_name_map: BTreeMap<String, String>,
}

impl SetupVariables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(&self) -> Option<ComponentKind> {
        ComponentKind::from_code(&self.component_code)
    }

    pub fn has_service(&self) -> bool {
        !self.service_name.trim().is_empty()
    }

    pub fn package_folder(&self) -> Option<PathBuf> {
        let kind = self.kind()?;
        Some(self.setup_source.join(kind.registration().package_folder))
    }

    /// Rebuild variables for `kind` from the deferred-phase payload.
    ///
    /// Values taken from the main configuration (when present) are loaded separately; this only
    /// consumes what the immediate phase committed to the bag.
    pub fn from_bag(kind: ComponentKind, bag: &PropertyBag) -> Result<Self> {
        let mut v = SetupVariables {
            component_code: kind.code().to_string(),
            component_id: bag.get("ComponentId").trim().to_string(),
            target_version: bag.get("ProductVersion").trim().to_string(),
            web_site_ip: bag.get(&kind.bag_key("IP")).trim().to_string(),
            web_site_port: bag.get(&kind.bag_key("PORT")).trim().to_string(),
            web_site_domain: bag.get(&kind.bag_key("HOST")).trim().to_string(),
            user_account: bag.get(&kind.bag_key("LOGIN")).trim().to_string(),
            user_domain: bag.get(&kind.bag_key("DOMAIN")).trim().to_string(),
            user_password: bag.get(&kind.bag_key("PASSWORD")).to_string(),
            service_name: bag.get(&kind.bag_key("SERVICE_NAME")).trim().to_string(),
            service_file: bag.get(&kind.bag_key("SERVICE_FILE")).trim().to_string(),
            setup_source: PathBuf::from(bag.get("INSTALLER_SOURCE_DIR").trim()),
            main_config: PathBuf::from(bag.get("MainConfig").trim()),
            ..Default::default()
        };

        v.install_folder = match bag.get_non_blank(&kind.bag_key("INSTALL_DIR")) {
            Some(dir) => PathBuf::from(dir.trim()),
            None => {
                let root = bag
                    .get_non_blank("WSP_INSTALL_DIR")
                    .ok_or_else(|| SetupError::MissingProperty(kind.bag_key("INSTALL_DIR")))?;
                PathBuf::from(root.trim()).join(kind.registration().package_folder)
            }
        };

        v.application_pool = bag
            .get_non_blank(&kind.bag_key("POOL"))
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| format!("WebsitePanel {} Pool", kind.name()));

        match kind {
            ComponentKind::Server => {
                v.admin_password = bag.get("SERVER_ACCESS_PASSWORD").to_string();
            }
            ComponentKind::EnterpriseServer => {
                v.admin_password = bag.get("SERVERADMIN_PASSWORD").to_string();
                v.install_connection_string = bag.get("DB_CONN").trim().to_string();
                let sql_auth = bag.get("DB_AUTH") == SQL_AUTH_SERVER;
                v.connection_string = build_connection_string(
                    bag.get("DB_SERVER").trim(),
                    bag.get("DB_DATABASE").trim(),
                    sql_auth.then(|| bag.get("DB_LOGIN")),
                    sql_auth.then(|| bag.get("DB_PASSWORD")),
                );
            }
            ComponentKind::Portal => {
                v.enterprise_server_url = bag
                    .get_non_blank("PI_ESERVER_URL")
                    .map(|s| s.trim().to_string())
                    .unwrap_or_else(|| default_enterprise_server_url().to_string());
            }
        }

        v.file_name_map = decode_pairs(bag.get("FileNameMap"))
            .context("FileNameMap property is malformed")?
            .into_iter()
            .collect();

        Ok(v)
    }

    pub fn encoded_file_name_map(&self) -> String {
        encode_pairs(
            self.file_name_map
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str())),
        )
    }
}
