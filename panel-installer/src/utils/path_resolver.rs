use anyhow::Result;
use std::path::PathBuf;

use crate::utils::settings::EngineSettings;

/// Resolve deployment folder (absolute path)
pub fn resolve_deployment_folder() -> Result<PathBuf> {
    // Prefer the folder where the EXE is running from
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(dir) = exe_path.parent() {
            return Ok(dir.to_path_buf());
        }
    }

    Ok(std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

/// Resolve log folder (absolute path), creating it when needed.
///
/// Order: explicit `log_dir` setting, `<deployment>/Logs`, then the per-user local data dir.
pub fn resolve_log_folder(settings: &EngineSettings) -> Result<PathBuf> {
    if let Some(dir) = settings.log_dir.as_ref() {
        std::fs::create_dir_all(dir)
            .map_err(|e| anyhow::anyhow!("Failed to create log folder {:?}: {}", dir, e))?;
        return Ok(dir.clone());
    }

    let deployment_logs = resolve_deployment_folder()?.join("Logs");
    if std::fs::create_dir_all(&deployment_logs).is_ok() {
        return Ok(deployment_logs);
    }

    // Program Files is read-only for unprivileged immediate-phase runs.
    let fallback = dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(&settings.product_name)
        .join("Installer Logs");
    std::fs::create_dir_all(&fallback)
        .map_err(|e| anyhow::anyhow!("Failed to create log folder {:?}: {}", fallback, e))?;
    Ok(fallback)
}

/// Program Files root used by legacy installer releases (the x86 variant on 64-bit Windows).
pub fn legacy_program_files() -> Option<PathBuf> {
    #[cfg(windows)]
    {
        std::env::var_os("ProgramFiles(x86)")
            .or_else(|| std::env::var_os("ProgramFiles"))
            .map(PathBuf::from)
    }

    #[cfg(not(windows))]
    {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_log_dir_is_created() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("nested").join("logs");
        let settings = EngineSettings {
            log_dir: Some(target.clone()),
            ..Default::default()
        };
        let resolved = resolve_log_folder(&settings).expect("resolve");
        assert_eq!(resolved, target);
        assert!(target.is_dir());
    }

    #[cfg(not(windows))]
    #[test]
    fn no_legacy_program_files_off_windows() {
        assert!(legacy_program_files().is_none());
    }
}
