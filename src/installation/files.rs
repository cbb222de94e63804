//! Filesystem helpers for the install runner.
//!
//! - Async I/O only (tokio)
//! - Writes go to a temp file and are renamed into place
//! - Transient errors (locks, busy resources) are retried with backoff

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::time::{timeout, Duration};

pub fn is_transient_fs_error(e: &anyhow::Error) -> bool {
    let msg = format!("{:#}", e).to_ascii_lowercase();
    msg.contains("used by another process")
        || msg.contains("in use")
        || msg.contains("resource busy")
        || msg.contains("temporarily")
        || msg.contains("temporary")
        || msg.contains("timed out")
        || msg.contains("timeout")
}

async fn write_once(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = temp_sibling(path);
    let mut file = tokio::fs::File::create(&tmp)
        .await
        .with_context(|| format!("create failed: {:?}", tmp))?;
    file.write_all(contents)
        .await
        .with_context(|| format!("write failed: {:?}", tmp))?;
    file.flush().await?;
    file.sync_all().await.ok();
    drop(file);

    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e).with_context(|| format!("rename failed: {:?} -> {:?}", tmp, path));
    }
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    path.with_file_name(format!(".{}.{}.tmp", name, std::process::id()))
}

/// Replace `path` atomically with `contents`, retrying transient failures.
///
/// Caller must create the parent directory.
pub async fn write_file_with_retries(path: &Path, contents: &[u8], label: &str) -> Result<()> {
    let started = Instant::now();
    debug!(
        "[PHASE: installation] [STEP: files] write_file_with_retries entered (label={}, path={:?}, bytes={})",
        label,
        path,
        contents.len()
    );

    let mut last_err: Option<anyhow::Error> = None;
    for attempt in 1..=3_u32 {
        match timeout(Duration::from_secs(60), write_once(path, contents)).await {
            Ok(Ok(())) => {
                debug!(
                    "[PHASE: installation] [STEP: files] write_file_with_retries exit ok (label={}, attempt={}, duration_ms={})",
                    label,
                    attempt,
                    started.elapsed().as_millis()
                );
                return Ok(());
            }
            Ok(Err(e)) => {
                let transient = is_transient_fs_error(&e);
                warn!(
                    "[PHASE: installation] [STEP: files] write failed (label={}, attempt={}, transient={}, err={:#})",
                    label, attempt, transient, e
                );
                last_err = Some(e);
                if !transient {
                    break;
                }
            }
            Err(_) => {
                warn!(
                    "[PHASE: installation] [STEP: files] write timeout (label={}, attempt={})",
                    label, attempt
                );
                last_err = Some(anyhow::anyhow!("write timed out after 60s"));
            }
        }

        let backoff_ms = 200_u64.saturating_mul(1_u64 << (attempt - 1));
        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("write failed")))
        .with_context(|| format!("Failed to write {} ({:?})", label, path))
}

/// Check that `dir` exists (creating it if needed) and accepts new files.
pub async fn probe_writable(dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("cannot create {:?}", dir))?;
    let probe = dir.join(format!(".write-probe-{}", std::process::id()));
    tokio::fs::write(&probe, b"probe")
        .await
        .with_context(|| format!("cannot write into {:?}", dir))?;
    tokio::fs::remove_file(&probe).await.ok();
    Ok(())
}

/// Check that `file` can be rewritten: the file itself when present, its directory otherwise.
pub async fn probe_file_writable(file: &Path) -> Result<()> {
    match tokio::fs::metadata(file).await {
        Ok(meta) => {
            if meta.permissions().readonly() {
                anyhow::bail!("{:?} is read-only", file);
            }
            tokio::fs::OpenOptions::new()
                .append(true)
                .open(file)
                .await
                .with_context(|| format!("cannot open {:?} for writing", file))?;
            Ok(())
        }
        Err(_) => {
            let parent = file
                .parent()
                .ok_or_else(|| anyhow::anyhow!("{:?} has no parent directory", file))?;
            probe_writable(parent).await
        }
    }
}

// =============================================================================
// Storage link
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    Created,
    AlreadyPresent,
}

/// Link `<public>/storage` to `<storage>/app/public`.
pub async fn ensure_storage_link(storage_dir: &Path, public_dir: &Path) -> Result<LinkOutcome> {
    let target = storage_dir.join("app").join("public");
    let link = public_dir.join("storage");

    tokio::fs::create_dir_all(&target)
        .await
        .with_context(|| format!("cannot create {:?}", target))?;
    tokio::fs::create_dir_all(public_dir)
        .await
        .with_context(|| format!("cannot create {:?}", public_dir))?;

    if tokio::fs::symlink_metadata(&link).await.is_ok() {
        debug!(
            "[PHASE: installation] [STEP: storage] {:?} already exists",
            link
        );
        return Ok(LinkOutcome::AlreadyPresent);
    }

    create_link(&target, &link).await?;
    debug!(
        "[PHASE: installation] [STEP: storage] linked {:?} -> {:?}",
        link, target
    );
    Ok(LinkOutcome::Created)
}

#[cfg(unix)]
async fn create_link(target: &Path, link: &Path) -> Result<()> {
    tokio::fs::symlink(target, link)
        .await
        .with_context(|| format!("symlink failed: {:?} -> {:?}", link, target))
}

// No unprivileged symlinks elsewhere: a directory with a pointer file stands in.
#[cfg(not(unix))]
async fn create_link(target: &Path, link: &Path) -> Result<()> {
    tokio::fs::create_dir_all(link)
        .await
        .with_context(|| format!("cannot create {:?}", link))?;
    let pointer = link.join(".storage-link");
    write_file_with_retries(
        &pointer,
        target.to_string_lossy().as_bytes(),
        "storage link pointer",
    )
    .await
}

// =============================================================================
// Installed marker
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstalledMarker {
    pub installed_at: DateTime<Utc>,
    pub version: String,
}

impl InstalledMarker {
    pub fn now() -> Self {
        Self {
            installed_at: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

pub async fn write_installed_marker(path: &Path, marker: &InstalledMarker) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("cannot create {:?}", parent))?;
    }
    let json = serde_json::to_vec_pretty(marker)?;
    write_file_with_retries(path, &json, "installed marker").await
}

pub async fn read_installed_marker(path: &Path) -> Result<Option<InstalledMarker>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let marker = serde_json::from_slice(&bytes)
                .with_context(|| format!("invalid installed marker {:?}", path))?;
            Ok(Some(marker))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("cannot read {:?}", path)),
    }
}

/// The marker's presence alone decides whether the application counts as installed.
pub fn is_installed(marker_path: &Path) -> bool {
    marker_path.exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        tokio::fs::write(&path, "OLD=1\n").await.unwrap();

        write_file_with_retries(&path, b"NEW=2\n", "env").await.unwrap();

        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "NEW=2\n");
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn write_into_missing_directory_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope").join("file.txt");
        let err = write_file_with_retries(&path, b"x", "missing dir")
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("missing dir"));
    }

    #[test]
    fn transient_detection() {
        assert!(is_transient_fs_error(&anyhow::anyhow!(
            "The process cannot access the file because it is being used by another process"
        )));
        assert!(is_transient_fs_error(&anyhow::anyhow!("Resource busy (os error 16)")));
        assert!(!is_transient_fs_error(&anyhow::anyhow!("No such file or directory")));
    }

    #[tokio::test]
    async fn probe_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let storage = dir.path().join("storage").join("logs");
        probe_writable(&storage).await.unwrap();
        assert!(storage.is_dir());
        assert_eq!(std::fs::read_dir(&storage).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn probe_file_uses_parent_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        probe_file_writable(&dir.path().join(".env")).await.unwrap();
    }

    #[tokio::test]
    async fn storage_link_is_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let storage = dir.path().join("storage");
        let public = dir.path().join("public");

        assert_eq!(
            ensure_storage_link(&storage, &public).await.unwrap(),
            LinkOutcome::Created
        );
        assert!(storage.join("app").join("public").is_dir());
        assert!(public.join("storage").exists());
        assert_eq!(
            ensure_storage_link(&storage, &public).await.unwrap(),
            LinkOutcome::AlreadyPresent
        );
    }

    #[tokio::test]
    async fn installed_marker_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage").join(".installed");
        assert!(!is_installed(&path));
        assert_eq!(read_installed_marker(&path).await.unwrap(), None);

        let marker = InstalledMarker::now();
        write_installed_marker(&path, &marker).await.unwrap();

        assert!(is_installed(&path));
        assert_eq!(read_installed_marker(&path).await.unwrap(), Some(marker));
    }
}
