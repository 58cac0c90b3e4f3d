//! File helpers for the action pipeline and backups.
//!
//! - Async I/O only (tokio)
//! - Retry transient lock errors (antivirus and indexers hold files briefly on Windows)
//! - Directory operations are idempotent where the pipeline needs them to be

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::time::{timeout, Duration};

/// Recursively collect all regular files under `root`.
pub async fn collect_files_recursive(root: &Path) -> Result<Vec<PathBuf>> {
    let (files, _dirs) = walk(root).await?;
    Ok(files)
}

/// Files and sub-directories under `root`, depth-first.
async fn walk(root: &Path) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
    let started = Instant::now();
    let mut files: Vec<PathBuf> = Vec::new();
    let mut dirs: Vec<PathBuf> = Vec::new();
    let mut stack: Vec<PathBuf> = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut rd = tokio::fs::read_dir(&dir)
            .await
            .with_context(|| format!("read_dir failed: {:?}", dir))?;
        while let Some(ent) = rd.next_entry().await? {
            let p = ent.path();
            let meta = ent.metadata().await?;
            if meta.is_dir() {
                dirs.push(p.clone());
                stack.push(p);
            } else if meta.is_file() {
                files.push(p);
            }
        }
    }

    debug!(
        "[PHASE: installation] [STEP: files] walk exit (root={:?}, files={}, dirs={}, duration_ms={})",
        root,
        files.len(),
        dirs.len(),
        started.elapsed().as_millis()
    );
    Ok((files, dirs))
}

fn is_transient_fs_error(e: &anyhow::Error) -> bool {
    let msg = e.to_string().to_ascii_lowercase();
    msg.contains("used by another process")
        || msg.contains("in use")
        || msg.contains("access is denied")
        || msg.contains("resource busy")
        || msg.contains("temporarily")
        || msg.contains("timed out")
}

/// Copy one file with retries + timeout. Caller must create the parent directory.
pub async fn copy_file_with_retries(src: &Path, dst: &Path, label: &str) -> Result<u64> {
    let mut last_err: Option<anyhow::Error> = None;
    for attempt in 1..=3u32 {
        match timeout(Duration::from_secs(60), tokio::fs::copy(src, dst)).await {
            Ok(Ok(n)) => return Ok(n),
            Ok(Err(e)) => {
                let err = anyhow::Error::new(e)
                    .context(format!("copy failed ({:?} -> {:?})", src, dst));
                let transient = is_transient_fs_error(&err);
                warn!(
                    "[PHASE: installation] [STEP: files] copy failed (label={}, attempt={}, transient={}, err={:#})",
                    label, attempt, transient, err
                );
                last_err = Some(err);
                if !transient {
                    break;
                }
            }
            Err(_) => {
                warn!(
                    "[PHASE: installation] [STEP: files] copy timeout (label={}, attempt={}, src={:?})",
                    label, attempt, src
                );
                last_err = Some(anyhow::anyhow!("copy timed out after 60s ({:?})", src));
            }
        }

        let backoff_ms = 200_u64.saturating_mul(1_u64 << (attempt - 1));
        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("copy failed ({:?})", src)))
}

/// Mirror the tree under `src` into `dst`, creating `dst` and any empty sub-directories.
///
/// Returns the number of files copied.
pub async fn copy_dir_recursive(src: &Path, dst: &Path, label: &str) -> Result<usize> {
    let started = Instant::now();
    info!(
        "[PHASE: installation] [STEP: files] copy_dir_recursive entered (label={}, src={:?}, dst={:?})",
        label, src, dst
    );

    tokio::fs::create_dir_all(dst)
        .await
        .with_context(|| format!("Failed to create {:?}", dst))?;

    let (files, dirs) = walk(src).await?;
    for d in &dirs {
        let rel = d.strip_prefix(src).context("walked outside source root")?;
        tokio::fs::create_dir_all(dst.join(rel))
            .await
            .with_context(|| format!("Failed to create {:?}", dst.join(rel)))?;
    }
    for f in &files {
        let rel = f.strip_prefix(src).context("walked outside source root")?;
        let target = dst.join(rel);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        copy_file_with_retries(f, &target, label).await?;
    }

    info!(
        "[PHASE: installation] [STEP: files] copy_dir_recursive exit (label={}, files={}, duration_ms={})",
        label,
        files.len(),
        started.elapsed().as_millis()
    );
    Ok(files.len())
}

/// Delete `path` and everything below it. A missing directory is a successful no-op.
///
/// Returns whether anything was removed.
pub async fn remove_dir_if_exists(path: &Path) -> Result<bool> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        debug!(
            "[PHASE: installation] [STEP: files] remove_dir_if_exists no-op (path={:?})",
            path
        );
        return Ok(false);
    }

    let mut last_err: Option<anyhow::Error> = None;
    for attempt in 1..=3u32 {
        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => return Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => {
                let err = anyhow::Error::new(e).context(format!("Failed to delete {:?}", path));
                let transient = is_transient_fs_error(&err);
                warn!(
                    "[PHASE: installation] [STEP: files] delete failed (attempt={}, transient={}, err={:#})",
                    attempt, transient, err
                );
                last_err = Some(err);
                if !transient {
                    break;
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(250 * u64::from(attempt))).await;
    }
    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Failed to delete {:?}", path)))
}

/// True when `path` is a directory holding at least one entry.
pub async fn dir_has_content(path: &Path) -> bool {
    match tokio::fs::read_dir(path).await {
        Ok(mut rd) => matches!(rd.next_entry().await, Ok(Some(_))),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn copy_dir_mirrors_tree_including_empty_dirs() {
        let src = tempfile::tempdir().expect("src");
        let dst = tempfile::tempdir().expect("dst");
        tokio::fs::create_dir_all(src.path().join("bin").join("x86"))
            .await
            .expect("mkdir");
        tokio::fs::create_dir_all(src.path().join("App_Data"))
            .await
            .expect("mkdir");
        tokio::fs::write(src.path().join("web.config"), b"<configuration/>")
            .await
            .expect("write");
        tokio::fs::write(src.path().join("bin").join("x86").join("a.dll"), [0u8, 1, 2])
            .await
            .expect("write");

        let target = dst.path().join("copy");
        let n = copy_dir_recursive(src.path(), &target, "test").await.expect("copy");
        assert_eq!(n, 2);
        assert!(target.join("App_Data").is_dir());
        assert_eq!(
            tokio::fs::read(target.join("bin").join("x86").join("a.dll"))
                .await
                .expect("read"),
            vec![0u8, 1, 2]
        );
    }

    #[tokio::test]
    async fn removing_missing_dir_is_noop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("nope");
        assert!(!remove_dir_if_exists(&missing).await.expect("noop"));

        let present = dir.path().join("there");
        tokio::fs::create_dir_all(present.join("deep")).await.expect("mkdir");
        assert!(remove_dir_if_exists(&present).await.expect("delete"));
        assert!(!present.exists());
    }

    #[tokio::test]
    async fn content_detection() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(!dir_has_content(dir.path()).await);
        tokio::fs::write(dir.path().join("f"), b"x").await.expect("write");
        assert!(dir_has_content(dir.path()).await);
        assert!(!dir_has_content(&dir.path().join("missing")).await);
    }
}
