// ComponentLocator
//
// Search order for a previously installed main configuration:
//   1. each candidate directory, in order: its direct main config, then the newest backup of
//      every registered component under it
//   2. the legacy installer folder under Program Files, once, after all candidates
// First valid path wins.

use crate::discovery::config_store::has_installed_components;
use crate::installation::backup::BackupRegistry;
use crate::models::components::ComponentKind;
use crate::utils::path_resolver::legacy_program_files;
use crate::utils::settings::EngineSettings;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Source of fixed local drive roots (`C:\`, `D:\`, ...).
pub trait DriveProvider: Send + Sync {
    fn fixed_drive_roots(&self) -> Vec<PathBuf>;
}

/// Fixed drives of the running host.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDrives;

impl DriveProvider for SystemDrives {
    #[cfg(windows)]
    fn fixed_drive_roots(&self) -> Vec<PathBuf> {
        use std::os::windows::ffi::OsStrExt;
        use winapi::um::fileapi::{GetDriveTypeW, GetLogicalDrives};
        use winapi::um::winbase::DRIVE_FIXED;

        // SAFETY: no arguments; returns a bitmask of present drive letters.
        let mask = unsafe { GetLogicalDrives() };
        let mut roots = Vec::new();
        for i in 0..26u32 {
            if mask & (1 << i) == 0 {
                continue;
            }
            let letter = char::from(b'A' + i as u8);
            let root = format!("{}:\\", letter);
            let wide: Vec<u16> = std::ffi::OsStr::new(&root)
                .encode_wide()
                .chain(std::iter::once(0))
                .collect();
            // SAFETY: `wide` is a NUL-terminated UTF-16 buffer that outlives the call.
            if unsafe { GetDriveTypeW(wide.as_ptr()) } == DRIVE_FIXED {
                roots.push(PathBuf::from(root));
            }
        }
        roots
    }

    #[cfg(not(windows))]
    fn fixed_drive_roots(&self) -> Vec<PathBuf> {
        vec![PathBuf::from("/")]
    }
}

#[derive(Debug, Clone)]
pub struct ComponentLocator {
    product_name: String,
    main_config_name: String,
    legacy_installer_dir: String,
    legacy_root: Option<PathBuf>,
    backups: BackupRegistry,
}

impl ComponentLocator {
    pub fn new(settings: &EngineSettings) -> Self {
        Self {
            product_name: settings.product_name.clone(),
            main_config_name: settings.main_config_name.clone(),
            legacy_installer_dir: settings.legacy_installer_dir.clone(),
            legacy_root: legacy_program_files(),
            backups: BackupRegistry::new(&settings.product_name, &settings.main_config_name),
        }
    }

    /// Override the Program Files root used for the legacy fallback (`None` disables it).
    pub fn with_legacy_root(mut self, root: Option<PathBuf>) -> Self {
        self.legacy_root = root;
        self
    }

    pub fn main_config_name(&self) -> &str {
        &self.main_config_name
    }

    /// Ordered candidates: the declared install root first, then `{drive}/{product}` for
    /// every fixed drive. Duplicates keep their first position.
    pub fn candidate_dirs(
        &self,
        install_root: Option<&Path>,
        drives: &dyn DriveProvider,
    ) -> Vec<PathBuf> {
        let mut out: Vec<PathBuf> = Vec::new();
        let declared = install_root.filter(|p| !p.as_os_str().is_empty());
        for dir in declared
            .map(Path::to_path_buf)
            .into_iter()
            .chain(drives.fixed_drive_roots().into_iter().map(|d| d.join(&self.product_name)))
        {
            if !out.contains(&dir) {
                out.push(dir);
            }
        }
        out
    }

    /// First valid main configuration across `candidates`, then the legacy fallback.
    pub async fn find_main_config(&self, candidates: &[PathBuf]) -> Option<PathBuf> {
        let started = Instant::now();
        info!(
            "[PHASE: discovery] [STEP: locate] find_main_config entered (candidates={})",
            candidates.len()
        );

        for dir in candidates {
            if let Some(found) = self.check_dir(dir).await {
                info!(
                    "[PHASE: discovery] [STEP: locate] Main configuration found (path={:?}, duration_ms={})",
                    found,
                    started.elapsed().as_millis()
                );
                return Some(found);
            }
        }

        let legacy = self.legacy_config_path();
        if let Some(path) = legacy {
            if has_installed_components(&path).await {
                info!(
                    "[PHASE: discovery] [STEP: locate] Legacy main configuration found (path={:?})",
                    path
                );
                return Some(path);
            }
        }

        info!(
            "[PHASE: discovery] [STEP: locate] No main configuration found (duration_ms={})",
            started.elapsed().as_millis()
        );
        None
    }

    fn legacy_config_path(&self) -> Option<PathBuf> {
        self.legacy_root.as_ref().map(|root| {
            root.join(&self.legacy_installer_dir)
                .join(&self.main_config_name)
        })
    }

    async fn check_dir(&self, dir: &Path) -> Option<PathBuf> {
        let direct = dir.join(&self.main_config_name);
        debug!(
            "[PHASE: discovery] [STEP: locate] Checking {:?}",
            direct
        );
        if has_installed_components(&direct).await {
            return Some(direct);
        }

        for kind in ComponentKind::all() {
            match self.backups.find(dir, kind.name()).await {
                Ok(Some(record)) => {
                    if has_installed_components(&record.main_config_file).await {
                        return Some(record.main_config_file);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(
                    "[PHASE: discovery] [STEP: locate] Skipping unreadable backup (dir={:?}, component={}, err={:#})",
                    dir,
                    kind.name(),
                    e
                ),
            }
        }
        None
    }
}
