// Per-component workflows
//
// Each (component, operation) pair maps to one named script builder. The registry is the
// only place that decides which builder runs; the dispatcher never matches on components.

use anyhow::Result;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::database::scripts::ScriptKind;
use crate::discovery::config_store::ConfigValueStore;
use crate::installation::pipeline::{InstallAction, SetupScript};
use crate::models::bag::PropertyBag;
use crate::models::components::ComponentKind;
use crate::models::errors::SetupError;
use crate::models::variables::SetupVariables;
use crate::security::crypto::generate_password;
use crate::utils::settings::EngineSettings;

const CRYPTO_KEY_LEN: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SetupOperation {
    Install,
    Remove,
    Maintain,
}

impl SetupOperation {
    pub fn all() -> [SetupOperation; 3] {
        [
            SetupOperation::Install,
            SetupOperation::Remove,
            SetupOperation::Maintain,
        ]
    }
}

impl fmt::Display for SetupOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SetupOperation::Install => "install",
            SetupOperation::Remove => "remove",
            SetupOperation::Maintain => "maintain",
        })
    }
}

impl FromStr for SetupOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "install" => Ok(SetupOperation::Install),
            "remove" | "uninstall" => Ok(SetupOperation::Remove),
            "maintain" | "update" => Ok(SetupOperation::Maintain),
            _ => Err(format!(
                "unknown operation '{}' (expected install, remove or maintain)",
                s
            )),
        }
    }
}

/// Builds the action list for one (component, operation).
pub type ScriptBuilder = fn(&SetupVariables) -> Result<SetupScript>;

#[derive(Debug, Clone)]
pub struct WorkflowRegistry {
    entries: HashMap<(ComponentKind, SetupOperation), ScriptBuilder>,
}

impl WorkflowRegistry {
    pub fn standard() -> Self {
        let table: [((ComponentKind, SetupOperation), ScriptBuilder); 9] = [
            ((ComponentKind::Server, SetupOperation::Install), server_install),
            ((ComponentKind::Server, SetupOperation::Remove), server_remove),
            ((ComponentKind::Server, SetupOperation::Maintain), server_maintain),
            ((ComponentKind::EnterpriseServer, SetupOperation::Install), enterprise_server_install),
            ((ComponentKind::EnterpriseServer, SetupOperation::Remove), enterprise_server_remove),
            ((ComponentKind::EnterpriseServer, SetupOperation::Maintain), enterprise_server_maintain),
            ((ComponentKind::Portal, SetupOperation::Install), portal_install),
            ((ComponentKind::Portal, SetupOperation::Remove), portal_remove),
            ((ComponentKind::Portal, SetupOperation::Maintain), portal_maintain),
        ];
        Self {
            entries: table.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn builder(&self, kind: ComponentKind, op: SetupOperation) -> Option<ScriptBuilder> {
        self.entries.get(&(kind, op)).copied()
    }
}

impl Default for WorkflowRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

/// Rebuild the variables a workflow runs with from the deferred payload.
///
/// Remove and maintain act on what is installed, so the component's persisted settings are
/// loaded from the main configuration on top of the payload.
pub async fn resolve_variables(
    kind: ComponentKind,
    op: SetupOperation,
    bag: &PropertyBag,
    settings: &EngineSettings,
) -> Result<SetupVariables> {
    let mut vars = SetupVariables::from_bag(kind, bag)?;
    if vars.setup_source.as_os_str().is_empty() {
        if let Some(dir) = settings.package_source_dir.as_ref() {
            vars.setup_source = dir.clone();
        }
    }

    if vars.main_config.as_os_str().is_empty() {
        let root = vars
            .install_folder
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| vars.install_folder.clone());
        vars.main_config = root.join(&settings.main_config_name);
    }

    if op != SetupOperation::Install {
        let store = ConfigValueStore::load(&vars.main_config).await?;
        if vars.component_id.is_empty() {
            vars.component_id = store
                .component_id(kind.code())
                .ok_or_else(|| SetupError::ComponentNotRegistered(kind.code().to_string()))?;
        }
        store.load_component_settings(&mut vars)?;
    }

    if vars.component_id.is_empty() {
        vars.component_id = kind.code().to_string();
    }
    if kind == ComponentKind::EnterpriseServer && vars.crypto_key.trim().is_empty() {
        vars.crypto_key = generate_password(CRYPTO_KEY_LEN)?;
        debug!("[PHASE: deferred] [STEP: resolve_variables] Generated a new crypto key");
    }

    info!(
        "[PHASE: deferred] [STEP: resolve_variables] Variables ready (component={}, operation={}, id={}, version={}, target_version={}, install_folder={:?})",
        kind, op, vars.component_id, vars.version, vars.target_version, vars.install_folder
    );
    Ok(vars)
}

fn package_folder(vars: &SetupVariables) -> Result<PathBuf> {
    if vars.setup_source.as_os_str().is_empty() {
        return Err(SetupError::MissingProperty("INSTALLER_SOURCE_DIR".to_string()).into());
    }
    vars.package_folder()
        .ok_or_else(|| SetupError::ComponentNotRegistered(vars.component_code.clone()).into())
}

fn copy_package(vars: &SetupVariables) -> Result<InstallAction> {
    Ok(InstallAction::CopyFiles {
        from: package_folder(vars)?,
        to: vars.install_folder.clone(),
    })
}

fn install_script(vars: &SetupVariables, database: bool) -> Result<SetupScript> {
    let mut script = SetupScript::new(vars.clone());
    script
        .push(InstallAction::VersionGuard)
        .push(copy_package(vars)?)
        .push(InstallAction::ConfigureWebSite);
    if database {
        let package = package_folder(vars)?;
        script
            .push(InstallAction::CreateDatabase)
            .push(InstallAction::RunSqlScript(ScriptKind::Install.path_in(&package)));
    }
    if vars.has_service() {
        script
            .push(InstallAction::InstallWindowsService)
            .push(InstallAction::StartWindowsService);
    }
    script.push(InstallAction::RegisterComponent);
    Ok(script)
}

fn remove_script(vars: &SetupVariables) -> SetupScript {
    let mut script = SetupScript::new(vars.clone());
    script.push(InstallAction::StopApplicationPool);
    if vars.has_service() {
        script
            .push(InstallAction::StopWindowsService)
            .push(InstallAction::RemoveWindowsService);
    }
    script
        .push(InstallAction::RemoveWebSite)
        .push(InstallAction::DeleteDirectory(vars.install_folder.clone()))
        .push(InstallAction::UnregisterComponent);
    script
}

fn maintain_script(vars: &SetupVariables, database: bool) -> Result<SetupScript> {
    let mut script = SetupScript::new(vars.clone());
    script
        .push(InstallAction::VersionGuard)
        .push(InstallAction::StopApplicationPool)
        .push(InstallAction::Backup);
    if vars.has_service() {
        script.push(InstallAction::StopWindowsService);
    }
    script.push(copy_package(vars)?);
    if database {
        let package = package_folder(vars)?;
        script.push(InstallAction::RunSqlScript(ScriptKind::Update.path_in(&package)));
    }
    if vars.has_service() {
        script.push(InstallAction::StartWindowsService);
    }
    script
        .push(InstallAction::StartApplicationPool)
        .push(InstallAction::RegisterComponent);
    Ok(script)
}

pub fn server_install(vars: &SetupVariables) -> Result<SetupScript> {
    install_script(vars, false)
}

pub fn server_remove(vars: &SetupVariables) -> Result<SetupScript> {
    Ok(remove_script(vars))
}

pub fn server_maintain(vars: &SetupVariables) -> Result<SetupScript> {
    maintain_script(vars, false)
}

pub fn enterprise_server_install(vars: &SetupVariables) -> Result<SetupScript> {
    install_script(vars, true)
}

/// The database is left in place; only the web application and its service go.
pub fn enterprise_server_remove(vars: &SetupVariables) -> Result<SetupScript> {
    Ok(remove_script(vars))
}

pub fn enterprise_server_maintain(vars: &SetupVariables) -> Result<SetupScript> {
    maintain_script(vars, true)
}

pub fn portal_install(vars: &SetupVariables) -> Result<SetupScript> {
    install_script(vars, false)
}

pub fn portal_remove(vars: &SetupVariables) -> Result<SetupScript> {
    Ok(remove_script(vars))
}

pub fn portal_maintain(vars: &SetupVariables) -> Result<SetupScript> {
    maintain_script(vars, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::Path;

    fn names(script: &SetupScript) -> Vec<&'static str> {
        script.actions().iter().map(InstallAction::name).collect()
    }

    fn vars(code: &str) -> SetupVariables {
        SetupVariables {
            component_id: code.into(),
            component_code: code.into(),
            install_folder: PathBuf::from("/wsp").join(code),
            setup_source: PathBuf::from("/pkg"),
            main_config: PathBuf::from("/wsp/WebsitePanel.Installer.json"),
            ..Default::default()
        }
    }

    #[test]
    fn registry_covers_every_pair() {
        let reg = WorkflowRegistry::standard();
        assert_eq!(reg.len(), 9);
        for kind in ComponentKind::all() {
            for op in SetupOperation::all() {
                assert!(reg.builder(kind, op).is_some(), "{} {}", kind, op);
            }
        }
    }

    #[test]
    fn enterprise_install_runs_database_scripts_before_registering() {
        let v = vars("enterpriseserver");
        let script = enterprise_server_install(&v).expect("script");
        assert_eq!(
            names(&script),
            [
                "VersionGuard",
                "CopyFiles",
                "ConfigureWebSite",
                "CreateDatabase",
                "RunSqlScript",
                "RegisterComponent"
            ]
        );
        assert!(script.actions().contains(&InstallAction::RunSqlScript(
            Path::new("/pkg/EnterpriseServer").join("Setup").join("install_db.sql")
        )));
    }

    #[test]
    fn service_steps_follow_service_name() {
        let mut v = vars("server");
        v.service_name = "WebsitePanel Agent".into();
        assert_eq!(
            names(&server_remove(&v).expect("script")),
            [
                "StopApplicationPool",
                "StopWindowsService",
                "RemoveWindowsService",
                "RemoveWebSite",
                "DeleteDirectory",
                "UnregisterComponent"
            ]
        );
        assert_eq!(
            names(&server_maintain(&v).expect("script")),
            [
                "VersionGuard",
                "StopApplicationPool",
                "Backup",
                "StopWindowsService",
                "CopyFiles",
                "StartWindowsService",
                "StartApplicationPool",
                "RegisterComponent"
            ]
        );
    }

    #[test]
    fn install_without_package_source_is_declared_failure() {
        let mut v = vars("portal");
        v.setup_source = PathBuf::new();
        let err = portal_install(&v).expect_err("no source");
        assert!(crate::models::errors::is_declared(&err));
    }

    #[test]
    fn operation_spellings() {
        assert_eq!("Uninstall".parse::<SetupOperation>(), Ok(SetupOperation::Remove));
        assert_eq!(SetupOperation::Maintain.to_string(), "maintain");
        assert!("repair".parse::<SetupOperation>().is_err());
    }

    #[tokio::test]
    async fn maintain_loads_installed_settings_from_main_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = dir.path().join("WebsitePanel.Installer.json");
        tokio::fs::write(
            &cfg,
            serde_json::to_vec(&json!({
                "components": [ { "id": "portal-1", "settings": {
                    "ComponentCode": "portal",
                    "Release": "2.0.0",
                    "ApplicationPool": "Legacy Portal Pool",
                    "WebSitePort": "9001"
                } } ]
            }))
            .expect("json"),
        )
        .await
        .expect("write");

        let bag = PropertyBag::from_pairs([
            ("PI_PORTAL_INSTALL_DIR", dir.path().join("Portal").to_string_lossy().to_string()),
            ("ProductVersion", "2.1.0".to_string()),
        ]);
        let settings = EngineSettings::default();
        let v = resolve_variables(ComponentKind::Portal, SetupOperation::Maintain, &bag, &settings)
            .await
            .expect("vars");
        assert_eq!(v.component_id, "portal-1");
        assert_eq!(v.version, "2.0.0");
        assert_eq!(v.target_version, "2.1.0");
        assert_eq!(v.application_pool, "Legacy Portal Pool");
        assert_eq!(v.main_config, cfg);
    }

    #[tokio::test]
    async fn install_defaults_id_and_generates_crypto_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bag = PropertyBag::from_pairs([(
            "WSP_INSTALL_DIR",
            dir.path().to_string_lossy().to_string(),
        )]);
        let v = resolve_variables(
            ComponentKind::EnterpriseServer,
            SetupOperation::Install,
            &bag,
            &EngineSettings::default(),
        )
        .await
        .expect("vars");
        assert_eq!(v.component_id, "enterpriseserver");
        assert_eq!(v.crypto_key.len(), CRYPTO_KEY_LEN);
        assert_eq!(v.main_config, dir.path().join("WebsitePanel.Installer.json"));
    }

    #[tokio::test]
    async fn package_source_falls_back_to_settings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = EngineSettings {
            package_source_dir: Some(PathBuf::from("/media/wsp")),
            ..Default::default()
        };
        let mut bag = PropertyBag::from_pairs([(
            "WSP_INSTALL_DIR",
            dir.path().to_string_lossy().to_string(),
        )]);
        let v = resolve_variables(ComponentKind::Portal, SetupOperation::Install, &bag, &settings)
            .await
            .expect("vars");
        assert_eq!(v.setup_source, PathBuf::from("/media/wsp"));

        bag.set("INSTALLER_SOURCE_DIR", "/pkg");
        let v = resolve_variables(ComponentKind::Portal, SetupOperation::Install, &bag, &settings)
            .await
            .expect("vars");
        assert_eq!(v.setup_source, PathBuf::from("/pkg"));
    }

    #[tokio::test]
    async fn remove_of_unregistered_component_is_declared() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = dir.path().join("WebsitePanel.Installer.json");
        tokio::fs::write(&cfg, br#"{ "components": [] }"#).await.expect("write");
        let bag = PropertyBag::from_pairs([(
            "PI_SERVER_INSTALL_DIR",
            dir.path().join("Server").to_string_lossy().to_string(),
        )]);
        let err = resolve_variables(
            ComponentKind::Server,
            SetupOperation::Remove,
            &bag,
            &EngineSettings::default(),
        )
        .await
        .expect_err("not registered");
        assert!(crate::models::errors::is_declared(&err));
    }
}
