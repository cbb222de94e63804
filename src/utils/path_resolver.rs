use anyhow::Result;
use std::path::{Path, PathBuf};

/// Resolve deployment folder (absolute path)
pub fn resolve_deployment_folder() -> Result<PathBuf> {
    // Prefer the current working directory: the installer is launched from the app root.
    if let Ok(cwd) = std::env::current_dir() {
        return Ok(cwd);
    }

    // Fallback: folder the binary lives in
    let exe = std::env::current_exe()?;
    Ok(exe
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(".")))
}

/// Resolve `path` against `base` unless it is already absolute.
pub fn resolve_against(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Resolve log folder (absolute path)
///
/// Uses the configured folder when given; otherwise `<app_root>/storage/logs/installer`,
/// and as a last resort the per-user data directory.
pub fn resolve_log_folder(app_root: &Path, configured: Option<&Path>) -> PathBuf {
    if let Some(dir) = configured {
        return resolve_against(app_root, dir);
    }

    let candidate = app_root.join("storage").join("logs").join("installer");
    if std::fs::create_dir_all(&candidate).is_ok() {
        return candidate;
    }

    dirs::data_local_dir()
        .map(|d| d.join("licensehub-installer").join("logs"))
        .unwrap_or(candidate)
}
