// Host requirements check
//
// Produces a Pass/Warn/Fail report. `strict_mode` escalates warnings to failures, and any
// failure keeps the wizard from moving past the requirements step.

use async_trait::async_trait;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::config::{PathsConfig, RequirementsConfig};
use crate::installation::files::{probe_file_writable, probe_writable};
use crate::utils::disk::get_free_space_bytes_for_path;
use crate::utils::os_detection::{detect_platform, os_description};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

impl CheckStatus {
    fn escalate(self, strict_mode: bool) -> Self {
        match self {
            CheckStatus::Warn if strict_mode => CheckStatus::Fail,
            other => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementCheck {
    /// Stable id; also the translation key suffix under `requirements.`.
    pub key: String,
    pub status: CheckStatus,
    pub detail: String,
}

impl RequirementCheck {
    pub fn new(key: &str, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            status,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementsReport {
    pub checks: Vec<RequirementCheck>,
    pub overall: CheckStatus,
}

impl RequirementsReport {
    pub fn from_checks(checks: Vec<RequirementCheck>, strict_mode: bool) -> Self {
        let checks: Vec<RequirementCheck> = checks
            .into_iter()
            .map(|mut c| {
                c.status = c.status.escalate(strict_mode);
                c
            })
            .collect();
        let overall = checks
            .iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(CheckStatus::Pass);
        Self { checks, overall }
    }

    /// Forward navigation is allowed unless a check failed.
    pub fn passed(&self) -> bool {
        self.overall != CheckStatus::Fail
    }
}

#[async_trait]
pub trait RequirementsProbe: Send + Sync {
    async fn check(&self) -> RequirementsReport;
}

/// Probes the machine the installer runs on.
pub struct HostProbe {
    paths: PathsConfig,
    cfg: RequirementsConfig,
}

impl HostProbe {
    pub fn new(paths: PathsConfig, cfg: RequirementsConfig) -> Self {
        Self { paths, cfg }
    }

    fn check_os(&self) -> RequirementCheck {
        let platform = detect_platform();
        let status = if platform.is_supported() {
            CheckStatus::Pass
        } else {
            CheckStatus::Warn
        };
        RequirementCheck::new("os", status, os_description())
    }

    async fn check_dir(&self, key: &str, dir: &std::path::Path) -> RequirementCheck {
        match probe_writable(dir).await {
            Ok(()) => RequirementCheck::new(key, CheckStatus::Pass, dir.display().to_string()),
            Err(e) => {
                warn!("[PHASE: requirements] [STEP: {}] {:#}", key, e);
                RequirementCheck::new(key, CheckStatus::Fail, format!("{:#}", e))
            }
        }
    }

    async fn check_env(&self) -> RequirementCheck {
        let env_file = self.paths.env_file();
        match probe_file_writable(&env_file).await {
            Ok(()) => RequirementCheck::new(
                "env_writable",
                CheckStatus::Pass,
                env_file.display().to_string(),
            ),
            Err(e) => {
                warn!("[PHASE: requirements] [STEP: env_writable] {:#}", e);
                RequirementCheck::new("env_writable", CheckStatus::Fail, format!("{:#}", e))
            }
        }
    }

    async fn check_disk(&self) -> RequirementCheck {
        let min_bytes = self.cfg.min_free_disk_mb.saturating_mul(1024 * 1024);
        match get_free_space_bytes_for_path(&self.paths.app_root).await {
            Ok(bytes) => {
                let free_mb = bytes / (1024 * 1024);
                let status = if bytes >= min_bytes {
                    CheckStatus::Pass
                } else {
                    CheckStatus::Fail
                };
                RequirementCheck::new(
                    "disk_space",
                    status,
                    format!("{} MB free (minimum {} MB)", free_mb, self.cfg.min_free_disk_mb),
                )
            }
            Err(e) => {
                warn!("[PHASE: requirements] [STEP: disk_space] {:#}", e);
                RequirementCheck::new(
                    "disk_space",
                    CheckStatus::Warn,
                    "Unable to determine free disk space.",
                )
            }
        }
    }

    fn check_binaries(&self) -> RequirementCheck {
        let missing: Vec<&str> = self
            .cfg
            .required_binaries
            .iter()
            .map(String::as_str)
            .filter(|bin| which::which(bin).is_err())
            .collect();
        if missing.is_empty() {
            let detail = if self.cfg.required_binaries.is_empty() {
                "None required".to_string()
            } else {
                self.cfg.required_binaries.join(", ")
            };
            RequirementCheck::new("binaries", CheckStatus::Pass, detail)
        } else {
            RequirementCheck::new(
                "binaries",
                CheckStatus::Fail,
                format!("Not found on PATH: {}", missing.join(", ")),
            )
        }
    }
}

#[async_trait]
impl RequirementsProbe for HostProbe {
    async fn check(&self) -> RequirementsReport {
        let storage = self.paths.storage();
        let public = self.paths.public();

        let checks = vec![
            self.check_os(),
            self.check_dir("storage_writable", &storage).await,
            self.check_env().await,
            self.check_dir("public_writable", &public).await,
            self.check_disk().await,
            self.check_binaries(),
        ];
        let report = RequirementsReport::from_checks(checks, self.cfg.strict_mode);

        info!(
            "[PHASE: requirements] [STEP: summary] overall={:?} (strict_mode={})",
            report.overall, self.cfg.strict_mode
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe_for(root: &std::path::Path, cfg: RequirementsConfig) -> HostProbe {
        HostProbe::new(
            PathsConfig {
                app_root: root.to_path_buf(),
                ..PathsConfig::default()
            },
            cfg,
        )
    }

    #[test]
    fn strict_mode_turns_warnings_into_failures() {
        let checks = vec![
            RequirementCheck::new("os", CheckStatus::Warn, "windows"),
            RequirementCheck::new("binaries", CheckStatus::Pass, ""),
        ];
        let relaxed = RequirementsReport::from_checks(checks.clone(), false);
        assert_eq!(relaxed.overall, CheckStatus::Warn);
        assert!(relaxed.passed());

        let strict = RequirementsReport::from_checks(checks, true);
        assert_eq!(strict.overall, CheckStatus::Fail);
        assert_eq!(strict.checks[0].status, CheckStatus::Fail);
        assert!(!strict.passed());
    }

    #[test]
    fn empty_report_passes() {
        let report = RequirementsReport::from_checks(Vec::new(), true);
        assert!(report.passed());
    }

    #[tokio::test]
    async fn host_probe_reports_every_check() {
        let dir = tempfile::tempdir().unwrap();
        let probe = probe_for(
            dir.path(),
            RequirementsConfig {
                min_free_disk_mb: 0,
                ..RequirementsConfig::default()
            },
        );

        let report = probe.check().await;
        let keys: Vec<&str> = report.checks.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "os",
                "storage_writable",
                "env_writable",
                "public_writable",
                "disk_space",
                "binaries"
            ]
        );
        let storage = report.checks.iter().find(|c| c.key == "storage_writable").unwrap();
        assert_eq!(storage.status, CheckStatus::Pass);
        assert!(dir.path().join("storage").is_dir());
    }

    #[tokio::test]
    async fn missing_binary_fails_the_report() {
        let dir = tempfile::tempdir().unwrap();
        let probe = probe_for(
            dir.path(),
            RequirementsConfig {
                min_free_disk_mb: 0,
                required_binaries: vec!["definitely-not-a-real-binary-7f3a".to_string()],
                ..RequirementsConfig::default()
            },
        );

        let report = probe.check().await;
        let binaries = report.checks.iter().find(|c| c.key == "binaries").unwrap();
        assert_eq!(binaries.status, CheckStatus::Fail);
        assert!(binaries.detail.contains("definitely-not-a-real-binary-7f3a"));
        assert!(!report.passed());
    }
}
