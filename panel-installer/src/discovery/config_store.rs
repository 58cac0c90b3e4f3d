// ConfigValueStore
//
// Reads and writes the installer's main configuration: a JSON document whose `components`
// array holds one entry per installed component, each with a flat `settings` map.

use crate::models::errors::SetupError;
use crate::models::variables::{InstallerKind, SetupVariables};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

pub mod keys {
    pub const COMPONENT_CODE: &str = "ComponentCode";
    pub const COMPONENT_NAME: &str = "ComponentName";
    pub const RELEASE: &str = "Release";
    pub const INSTALL_FOLDER: &str = "InstallFolder";
    pub const WEB_SITE_IP: &str = "WebSiteIP";
    pub const WEB_SITE_PORT: &str = "WebSitePort";
    pub const WEB_SITE_DOMAIN: &str = "WebSiteDomain";
    pub const USER_ACCOUNT: &str = "UserAccount";
    pub const USER_DOMAIN: &str = "UserDomain";
    pub const APPLICATION_POOL: &str = "ApplicationPool";
    pub const SERVICE_NAME: &str = "ServiceName";
    pub const SERVICE_FILE: &str = "ServiceFile";
    pub const INSTALL_CONNECTION_STRING: &str = "InstallConnectionString";
    pub const CONNECTION_STRING: &str = "ConnectionString";
    pub const CRYPTO_KEY: &str = "CryptoKey";
    pub const ENCRYPTION_ENABLED: &str = "EncryptionEnabled";
    pub const ENTERPRISE_SERVER_URL: &str = "EnterpriseServerUrl";
    pub const INSTALLER_TYPE: &str = "InstallerType";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentEntry {
    pub id: String,
    #[serde(default)]
    pub settings: BTreeMap<String, Value>,
}

impl ComponentEntry {
    /// Setting rendered as text; strings verbatim, other scalars via their JSON form.
    pub fn setting(&self, key: &str) -> Option<String> {
        match self.settings.get(key)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MainConfigDocument {
    #[serde(default)]
    pub components: Vec<ComponentEntry>,
    /// Anything else the file carries is preserved on save.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Validity predicate for a candidate main configuration.
///
/// Accepted only when the file parses and its `components` node has at least one child.
pub async fn has_installed_components(path: &Path) -> bool {
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(_) => return false,
    };
    let doc: Value = match serde_json::from_slice(&bytes) {
        Ok(v) => v,
        Err(e) => {
            debug!(
                "[PHASE: discovery] [STEP: validity] Ignoring unparsable config (path={:?}, err={})",
                path, e
            );
            return false;
        }
    };
    match doc.get("components") {
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(items)) => !items.is_empty(),
        _ => false,
    }
}

#[derive(Debug, Clone)]
pub struct ConfigValueStore {
    path: PathBuf,
    doc: MainConfigDocument,
}

impl ConfigValueStore {
    /// Empty store bound to `path`; used for first-time installs.
    pub fn empty(path: PathBuf) -> Self {
        Self {
            path,
            doc: MainConfigDocument::default(),
        }
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let started = Instant::now();
        debug!(
            "[PHASE: discovery] [STEP: config_store] load entered (path={:?})",
            path
        );

        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read main configuration {:?}", path))?;
        let doc: MainConfigDocument = serde_json::from_slice(&bytes)
            .with_context(|| format!("Main configuration {:?} is not valid", path))?;

        debug!(
            "[PHASE: discovery] [STEP: config_store] load exit (components={}, duration_ms={})",
            doc.components.len(),
            started.elapsed().as_millis()
        );
        Ok(Self {
            path: path.to_path_buf(),
            doc,
        })
    }

    /// Load `path` if it exists, otherwise start empty.
    pub async fn load_or_empty(path: &Path) -> Result<Self> {
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            Self::load(path).await
        } else {
            Ok(Self::empty(path.to_path_buf()))
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn components(&self) -> &[ComponentEntry] {
        &self.doc.components
    }

    fn entry(&self, id: &str) -> Option<&ComponentEntry> {
        self.doc
            .components
            .iter()
            .find(|c| c.id.eq_ignore_ascii_case(id))
    }

    /// Id of the first installed component whose `ComponentCode` matches `code`.
    pub fn component_id(&self, code: &str) -> Option<String> {
        self.doc
            .components
            .iter()
            .find(|c| {
                c.setting(keys::COMPONENT_CODE)
                    .map(|v| v.eq_ignore_ascii_case(code))
                    .unwrap_or(false)
            })
            .map(|c| c.id.clone())
    }

    pub fn setting(&self, id: &str, key: &str) -> Option<String> {
        self.entry(id)?.setting(key)
    }

    /// Copy the persisted settings of `vars.component_id` into `vars`.
    ///
    /// Only settings present in the file overwrite fields.
    pub fn load_component_settings(&self, vars: &mut SetupVariables) -> Result<()> {
        let entry = self
            .entry(&vars.component_id)
            .ok_or_else(|| SetupError::ComponentNotRegistered(vars.component_id.clone()))?;

        let apply = |key: &str, field: &mut String| {
            if let Some(v) = entry.setting(key) {
                *field = v;
            }
        };
        apply(keys::COMPONENT_CODE, &mut vars.component_code);
        apply(keys::RELEASE, &mut vars.version);
        apply(keys::WEB_SITE_IP, &mut vars.web_site_ip);
        apply(keys::WEB_SITE_PORT, &mut vars.web_site_port);
        apply(keys::WEB_SITE_DOMAIN, &mut vars.web_site_domain);
        apply(keys::USER_ACCOUNT, &mut vars.user_account);
        apply(keys::USER_DOMAIN, &mut vars.user_domain);
        apply(keys::APPLICATION_POOL, &mut vars.application_pool);
        apply(keys::SERVICE_NAME, &mut vars.service_name);
        apply(keys::SERVICE_FILE, &mut vars.service_file);
        apply(keys::INSTALL_CONNECTION_STRING, &mut vars.install_connection_string);
        apply(keys::CONNECTION_STRING, &mut vars.connection_string);
        apply(keys::CRYPTO_KEY, &mut vars.crypto_key);
        apply(keys::ENTERPRISE_SERVER_URL, &mut vars.enterprise_server_url);

        if let Some(folder) = entry.setting(keys::INSTALL_FOLDER) {
            vars.install_folder = PathBuf::from(folder);
        }
        if let Some(kind) = entry.setting(keys::INSTALLER_TYPE) {
            vars.installer_kind = InstallerKind::parse(&kind);
        }
        if let Some(flag) = entry.setting(keys::ENCRYPTION_ENABLED) {
            vars.encryption_enabled = flag.trim().eq_ignore_ascii_case("true");
        }
        Ok(())
    }

    /// Insert or replace the entry for `vars`, stamping the target version as `Release`.
    pub fn register_component(&mut self, vars: &SetupVariables) {
        let mut settings = BTreeMap::new();
        let mut put = |key: &str, value: &str| {
            if !value.trim().is_empty() {
                settings.insert(key.to_string(), Value::String(value.to_string()));
            }
        };
        let name = vars.kind().map(|k| k.name()).unwrap_or_default();
        let release = if vars.target_version.trim().is_empty() {
            vars.version.as_str()
        } else {
            vars.target_version.as_str()
        };
        put(keys::COMPONENT_CODE, &vars.component_code);
        put(keys::COMPONENT_NAME, name);
        put(keys::RELEASE, release);
        put(keys::INSTALL_FOLDER, &vars.install_folder.to_string_lossy());
        put(keys::WEB_SITE_IP, &vars.web_site_ip);
        put(keys::WEB_SITE_PORT, &vars.web_site_port);
        put(keys::WEB_SITE_DOMAIN, &vars.web_site_domain);
        put(keys::USER_ACCOUNT, &vars.user_account);
        put(keys::USER_DOMAIN, &vars.user_domain);
        put(keys::APPLICATION_POOL, &vars.application_pool);
        put(keys::SERVICE_NAME, &vars.service_name);
        put(keys::SERVICE_FILE, &vars.service_file);
        put(keys::INSTALL_CONNECTION_STRING, &vars.install_connection_string);
        put(keys::CONNECTION_STRING, &vars.connection_string);
        put(keys::CRYPTO_KEY, &vars.crypto_key);
        put(keys::ENTERPRISE_SERVER_URL, &vars.enterprise_server_url);
        put(keys::INSTALLER_TYPE, vars.installer_kind.as_str());
        settings.insert(
            keys::ENCRYPTION_ENABLED.to_string(),
            Value::Bool(vars.encryption_enabled),
        );

        let id = vars.component_id.clone();
        match self
            .doc
            .components
            .iter_mut()
            .find(|c| c.id.eq_ignore_ascii_case(&id))
        {
            Some(existing) => existing.settings = settings,
            None => self.doc.components.push(ComponentEntry { id, settings }),
        }
    }

    /// Returns whether an entry was removed.
    pub fn unregister_component(&mut self, id: &str) -> bool {
        let before = self.doc.components.len();
        self.doc.components.retain(|c| !c.id.eq_ignore_ascii_case(id));
        before != self.doc.components.len()
    }

    /// Write through a temp file and rename so a crash never leaves a half-written config.
    pub async fn save(&self) -> Result<()> {
        let started = Instant::now();
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }

        let json = serde_json::to_vec_pretty(&self.doc).context("Failed to serialize main configuration")?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json)
            .await
            .with_context(|| format!("Failed to write {:?}", tmp))?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            warn!(
                "[PHASE: discovery] [STEP: config_store] rename failed, writing in place (path={:?}, err={})",
                self.path, e
            );
            tokio::fs::write(&self.path, &json)
                .await
                .with_context(|| format!("Failed to write {:?}", self.path))?;
            let _ = tokio::fs::remove_file(&tmp).await;
        }

        info!(
            "[PHASE: discovery] [STEP: config_store] Main configuration saved (path={:?}, components={}, duration_ms={})",
            self.path,
            self.doc.components.len(),
            started.elapsed().as_millis()
        );
        Ok(())
    }
}
