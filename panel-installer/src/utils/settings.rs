// Engine settings.
//
// Layered with the `config` crate: built-in defaults, then an optional `panel-installer.toml`
// next to the executable (or an explicit file), then `PANEL_INSTALLER__*` environment variables.

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use log::info;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::path_resolver::resolve_deployment_folder;

pub const SETTINGS_FILE_NAME: &str = "panel-installer.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Product folder name under each fixed drive root and inside backup trees.
    pub product_name: String,
    /// File name of the main configuration inside an install root or backup.
    pub main_config_name: String,
    /// Folder under Program Files used by very old installer releases.
    pub legacy_installer_dir: String,
    pub log_dir: Option<PathBuf>,
    pub sql_connect_timeout_secs: u64,
    pub sql_browser_timeout_ms: u64,
    pub command_timeout_secs: u64,
    pub default_enterprise_server_url: String,
    /// Package source used when the host passes no `INSTALLER_SOURCE_DIR`.
    pub package_source_dir: Option<PathBuf>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            product_name: "WebsitePanel".to_string(),
            main_config_name: "WebsitePanel.Installer.json".to_string(),
            legacy_installer_dir: "WebsitePanel Installer".to_string(),
            log_dir: None,
            sql_connect_timeout_secs: 20,
            sql_browser_timeout_ms: 3000,
            command_timeout_secs: 300,
            default_enterprise_server_url: crate::models::components::default_enterprise_server_url()
                .to_string(),
            package_source_dir: None,
        }
    }
}

impl EngineSettings {
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let file_source = match explicit {
            Some(p) => File::from(p.to_path_buf()).required(true),
            None => File::from(resolve_deployment_folder()?.join(SETTINGS_FILE_NAME)).required(false),
        };

        let settings: EngineSettings = Config::builder()
            .add_source(file_source)
            .add_source(Environment::with_prefix("PANEL_INSTALLER").separator("__"))
            .build()
            .context("Failed to load engine settings")?
            .try_deserialize()
            .context("Engine settings are invalid")?;

        info!(
            "[PHASE: initialization] [STEP: settings] Settings loaded (product_name={}, main_config_name={}, explicit_file={:?})",
            settings.product_name, settings.main_config_name, explicit
        );
        Ok(settings)
    }

    pub fn sql_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.sql_connect_timeout_secs.max(1))
    }

    pub fn sql_browser_timeout(&self) -> Duration {
        Duration::from_millis(self.sql_browser_timeout_ms.max(100))
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs.max(1))
    }
}
