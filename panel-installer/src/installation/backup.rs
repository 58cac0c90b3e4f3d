// BackupRegistry
//
// Layout:
//   {root}/Backup/{product}/{component}/{stamp}/
//       files/          copy of the install folder
//       <main config>   copy of the main configuration (renamed through the file-name map)
//       backup.info     paired-value manifest
//
// `stamp` is a UTC `YYYYMMDDhhmmssfff` timestamp with an optional `-NNN` collision suffix, so
// the lexicographically greatest directory is always the newest one.

use crate::installation::files::{copy_dir_recursive, copy_file_with_retries, dir_has_content};
use crate::models::variables::SetupVariables;
use crate::utils::paired_values::{decode_pairs, encode_pairs};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

pub const BACKUP_DIR: &str = "Backup";
pub const MANIFEST_FILE: &str = "backup.info";
pub const FILES_DIR: &str = "files";

mod manifest_keys {
    pub const PRODUCT: &str = "Product";
    pub const COMPONENT: &str = "Component";
    pub const VERSION: &str = "Version";
    pub const INSTALL_FOLDER: &str = "InstallFolder";
    pub const MAIN_CONFIG: &str = "MainConfig";
    pub const BACKUP_MAIN_CONFIG: &str = "BackupMainConfig";
    pub const CREATED: &str = "Created";
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRecord {
    pub product: String,
    pub component: String,
    /// The `{stamp}` directory.
    pub root: PathBuf,
    /// Backed-up main configuration inside `root`.
    pub main_config_file: PathBuf,
    pub version: String,
    /// Where the files came from; restore writes back here.
    pub install_folder: PathBuf,
    /// Original main configuration path, if one was backed up.
    pub original_main_config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct BackupRegistry {
    product: String,
    main_config_name: String,
}

impl BackupRegistry {
    pub fn new(product: impl Into<String>, main_config_name: impl Into<String>) -> Self {
        Self {
            product: product.into(),
            main_config_name: main_config_name.into(),
        }
    }

    pub fn component_dir(&self, root: &Path, component: &str) -> PathBuf {
        root.join(BACKUP_DIR).join(&self.product).join(component)
    }

    /// Back up the install folder and main configuration of `vars`.
    ///
    /// Returns `None` when there is nothing to back up. Backups land next to the main
    /// configuration (the product root), falling back to the install folder's parent.
    pub async fn backup(&self, vars: &SetupVariables) -> Result<Option<BackupRecord>> {
        let started = Instant::now();
        let component = vars
            .kind()
            .map(|k| k.name().to_string())
            .unwrap_or_else(|| vars.component_code.clone());
        info!(
            "[PHASE: installation] [STEP: backup] backup entered (component={}, install_folder={:?}, main_config={:?})",
            component, vars.install_folder, vars.main_config
        );

        let has_files = !vars.install_folder.as_os_str().is_empty()
            && dir_has_content(&vars.install_folder).await;
        let main_config = (!vars.main_config.as_os_str().is_empty()
            && tokio::fs::try_exists(&vars.main_config).await.unwrap_or(false))
        .then(|| vars.main_config.clone());

        if !has_files && main_config.is_none() {
            info!(
                "[PHASE: installation] [STEP: backup] Nothing to back up (component={})",
                component
            );
            return Ok(None);
        }

        let base = main_config
            .as_deref()
            .and_then(Path::parent)
            .or_else(|| vars.install_folder.parent())
            .map(Path::to_path_buf)
            .ok_or_else(|| anyhow::anyhow!("Cannot determine backup location for {}", component))?;

        let dir = self.create_stamp_dir(&base, &component).await?;

        if has_files {
            copy_dir_recursive(&vars.install_folder, &dir.join(FILES_DIR), "backup").await?;
        } else {
            tokio::fs::create_dir_all(dir.join(FILES_DIR)).await?;
        }

        let mut backup_cfg_name = String::new();
        if let Some(cfg) = main_config.as_deref() {
            backup_cfg_name = self.backup_name_for(cfg, &vars.file_name_map);
            copy_file_with_retries(cfg, &dir.join(&backup_cfg_name), "backup_main_config").await?;
        }

        let created = chrono::Utc::now().to_rfc3339();
        let install_folder = vars.install_folder.to_string_lossy();
        let original_cfg = main_config
            .as_deref()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default();
        let manifest = encode_pairs([
            (manifest_keys::PRODUCT, self.product.as_str()),
            (manifest_keys::COMPONENT, component.as_str()),
            (manifest_keys::VERSION, vars.version.as_str()),
            (manifest_keys::INSTALL_FOLDER, install_folder.as_ref()),
            (manifest_keys::MAIN_CONFIG, original_cfg.as_str()),
            (manifest_keys::BACKUP_MAIN_CONFIG, backup_cfg_name.as_str()),
            (manifest_keys::CREATED, created.as_str()),
        ]);
        // Written last: a stamp directory without a manifest is an incomplete backup.
        tokio::fs::write(dir.join(MANIFEST_FILE), manifest)
            .await
            .with_context(|| format!("Failed to write backup manifest in {:?}", dir))?;

        let record = self.read_record(&dir).await?;
        info!(
            "[PHASE: installation] [STEP: backup] backup exit (component={}, dir={:?}, duration_ms={})",
            component,
            dir,
            started.elapsed().as_millis()
        );
        Ok(Some(record))
    }

    fn backup_name_for(&self, cfg: &Path, map: &BTreeMap<String, String>) -> String {
        let file_name = cfg
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.main_config_name.clone());
        map.iter()
            .find(|(from, _)| from.eq_ignore_ascii_case(&file_name))
            .map(|(_, to)| to.clone())
            .unwrap_or(file_name)
    }

    async fn create_stamp_dir(&self, base: &Path, component: &str) -> Result<PathBuf> {
        let parent = self.component_dir(base, component);
        tokio::fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("Failed to create backup directory {:?}", parent))?;

        let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S%3f").to_string();
        for n in 0..1000u32 {
            let name = if n == 0 {
                stamp.clone()
            } else {
                format!("{}-{:03}", stamp, n)
            };
            let candidate = parent.join(name);
            match tokio::fs::create_dir(&candidate).await {
                Ok(()) => return Ok(candidate),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(anyhow::Error::new(e))
                        .with_context(|| format!("Failed to create {:?}", candidate))
                }
            }
        }
        anyhow::bail!("Too many backups created within one millisecond in {:?}", parent)
    }

    /// Newest complete backup of `component` under `root`, if any.
    pub async fn find(&self, root: &Path, component: &str) -> Result<Option<BackupRecord>> {
        let parent = self.component_dir(root, component);
        let mut rd = match tokio::fs::read_dir(&parent).await {
            Ok(rd) => rd,
            Err(_) => return Ok(None),
        };

        let mut stamps: Vec<PathBuf> = Vec::new();
        while let Some(ent) = rd.next_entry().await? {
            let p = ent.path();
            if ent.metadata().await.map(|m| m.is_dir()).unwrap_or(false)
                && tokio::fs::try_exists(p.join(MANIFEST_FILE)).await.unwrap_or(false)
            {
                stamps.push(p);
            }
        }

        let Some(newest) = stamps.into_iter().max_by(|a, b| a.file_name().cmp(&b.file_name()))
        else {
            return Ok(None);
        };
        debug!(
            "[PHASE: discovery] [STEP: backup_find] newest backup (component={}, dir={:?})",
            component, newest
        );
        self.read_record(&newest).await.map(Some)
    }

    async fn read_record(&self, dir: &Path) -> Result<BackupRecord> {
        let raw = tokio::fs::read_to_string(dir.join(MANIFEST_FILE))
            .await
            .with_context(|| format!("Failed to read backup manifest in {:?}", dir))?;
        let fields: BTreeMap<String, String> = decode_pairs(&raw)
            .with_context(|| format!("Backup manifest in {:?} is malformed", dir))?
            .into_iter()
            .collect();
        let get = |k: &str| fields.get(k).cloned().unwrap_or_default();

        let cfg_name = match get(manifest_keys::BACKUP_MAIN_CONFIG) {
            n if n.is_empty() => self.main_config_name.clone(),
            n => n,
        };
        let original_cfg = get(manifest_keys::MAIN_CONFIG);

        Ok(BackupRecord {
            product: get(manifest_keys::PRODUCT),
            component: get(manifest_keys::COMPONENT),
            root: dir.to_path_buf(),
            main_config_file: dir.join(cfg_name),
            version: get(manifest_keys::VERSION),
            install_folder: PathBuf::from(get(manifest_keys::INSTALL_FOLDER)),
            original_main_config: (!original_cfg.is_empty()).then(|| PathBuf::from(original_cfg)),
        })
    }

    /// Copy a backup back to where it came from, creating missing directories.
    pub async fn restore(&self, record: &BackupRecord) -> Result<()> {
        let started = Instant::now();
        info!(
            "[PHASE: installation] [STEP: restore] restore entered (component={}, from={:?}, to={:?})",
            record.component, record.root, record.install_folder
        );

        if record.install_folder.as_os_str().is_empty() {
            anyhow::bail!("Backup {:?} does not record an install folder", record.root);
        }
        copy_dir_recursive(&record.root.join(FILES_DIR), &record.install_folder, "restore").await?;

        match record.original_main_config.as_deref() {
            Some(target) if tokio::fs::try_exists(&record.main_config_file).await.unwrap_or(false) => {
                if let Some(parent) = target.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                copy_file_with_retries(&record.main_config_file, target, "restore_main_config").await?;
            }
            Some(target) => warn!(
                "[PHASE: installation] [STEP: restore] Backup has no main configuration copy (expected={:?}, target={:?})",
                record.main_config_file, target
            ),
            None => {}
        }

        info!(
            "[PHASE: installation] [STEP: restore] restore exit (component={}, duration_ms={})",
            record.component,
            started.elapsed().as_millis()
        );
        Ok(())
    }
}
