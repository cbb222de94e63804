//! Free-space detection for the requirements check.

use anyhow::{Context, Result};
use log::debug;
use std::path::Path;
use tokio::time::Duration;

/// Best-effort free-space check for a given filesystem path (returns bytes).
///
/// Uses `df -Pk <path>` (located with `which`) and parses the available KB column.
pub async fn get_free_space_bytes_for_path(path: &Path) -> Result<u64> {
    let df = which::which("df").context("`df` not found on PATH")?;
    let df = df
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid df path"))?
        .to_string();
    let path_str = path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid path"))?
        .to_string();

    let out = super::command::run_cmd_with_timeout(
        &df,
        &["-Pk".to_string(), path_str],
        Duration::from_secs(10),
        "free_space_df",
    )
    .await?;

    if out.exit_code != Some(0) {
        anyhow::bail!("Failed to query free space (exit_code={:?})", out.exit_code);
    }

    let bytes = parse_df_available_bytes(&out.stdout)?;
    debug!(
        "[PHASE: requirements] [STEP: free_space] {:?} has {} bytes available",
        path, bytes
    );
    Ok(bytes)
}

/// Parse POSIX `df -Pk` output:
///
/// ```text
/// Filesystem 1024-blocks Used Available Capacity Mounted on
/// /dev/sda1  102400      1024 101376    1%       /
/// ```
pub fn parse_df_available_bytes(stdout: &str) -> Result<u64> {
    let mut lines = stdout.lines();
    let _header = lines.next();
    let data = lines
        .next()
        .ok_or_else(|| anyhow::anyhow!("df output missing data row"))?;
    let cols: Vec<&str> = data.split_whitespace().collect();
    if cols.len() < 4 {
        anyhow::bail!("df output parse error");
    }
    let avail_kb: u64 = cols[3]
        .parse()
        .with_context(|| format!("Unable to parse df available KB '{}'", cols[3]))?;
    Ok(avail_kb.saturating_mul(1024))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_df_output() {
        let out = "Filesystem 1024-blocks Used Available Capacity Mounted on\n/dev/sda1 102400 1024 2048 1% /\n";
        assert_eq!(parse_df_available_bytes(out).unwrap(), 2048 * 1024);
    }

    #[test]
    fn parse_df_output_rejects_garbage() {
        assert!(parse_df_available_bytes("").is_err());
        assert!(parse_df_available_bytes("header\nonly two").is_err());
        assert!(parse_df_available_bytes("header\na b c notanumber").is_err());
    }
}
