//! Installer configuration.
//!
//! Layers (lowest precedence first): compiled defaults, an optional TOML file,
//! then `LICENSEHUB_*` environment variables (`__` separates sections, e.g.
//! `LICENSEHUB_SERVER__PORT=8090`).

use crate::utils::path_resolver::resolve_against;
use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

pub const ENV_PREFIX: &str = "LICENSEHUB";
pub const DEFAULT_CONFIG_FILE: &str = "installer.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerConfig {
    pub server: ServerConfig,
    pub paths: PathsConfig,
    pub license_server: LicenseServerConfig,
    pub database: DatabaseConfig,
    pub requirements: RequirementsConfig,
    pub locale: LocaleConfig,
    pub app: AppConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// How long a finished job stays visible on the status and event routes.
    pub finished_job_grace_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8090,
            finished_job_grace_secs: 600,
        }
    }
}

/// Filesystem layout of the application being installed.
/// Relative paths resolve against `app_root`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub app_root: PathBuf,
    pub storage_dir: PathBuf,
    pub public_dir: PathBuf,
    pub env_file: PathBuf,
    pub log_dir: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            app_root: PathBuf::from("."),
            storage_dir: PathBuf::from("storage"),
            public_dir: PathBuf::from("public"),
            env_file: PathBuf::from(".env"),
            log_dir: None,
        }
    }
}

impl PathsConfig {
    pub fn storage(&self) -> PathBuf {
        resolve_against(&self.app_root, &self.storage_dir)
    }

    pub fn public(&self) -> PathBuf {
        resolve_against(&self.app_root, &self.public_dir)
    }

    pub fn env_file(&self) -> PathBuf {
        resolve_against(&self.app_root, &self.env_file)
    }

    /// `storage/.installed`, written by the final install step.
    pub fn installed_marker(&self) -> PathBuf {
        self.storage().join(".installed")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LicenseServerConfig {
    pub base_url: String,
    pub product: String,
    pub timeout_secs: u64,
}

impl Default for LicenseServerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://license.licensehub.app".to_string(),
            product: "licensehub".to_string(),
            timeout_secs: 12,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub connect_timeout_secs: u64,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            max_connections: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RequirementsConfig {
    pub strict_mode: bool,
    pub min_free_disk_mb: u64,
    pub required_binaries: Vec<String>,
}

impl Default for RequirementsConfig {
    fn default() -> Self {
        Self {
            strict_mode: false,
            min_free_disk_mb: 512,
            required_binaries: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocaleConfig {
    pub default: String,
}

impl Default for LocaleConfig {
    fn default() -> Self {
        Self {
            default: "en".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Public URL written to `APP_URL`; derived from the request host when empty.
    pub url: String,
    /// bcrypt cost for the admin password; must match the application's `BCRYPT_ROUNDS`.
    pub bcrypt_rounds: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            bcrypt_rounds: crate::security::crypto::BCRYPT_COST,
        }
    }
}

impl InstallerConfig {
    /// Load configuration. An explicit `path` must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file_source = match path {
            Some(p) => File::from(p).format(FileFormat::Toml).required(true),
            None => File::new(DEFAULT_CONFIG_FILE, FileFormat::Toml).required(false),
        };

        let cfg: InstallerConfig = Config::builder()
            .add_source(file_source)
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .context("Failed to read installer configuration")?
            .try_deserialize()
            .context("Invalid installer configuration")?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.license_server.base_url).with_context(|| {
            format!(
                "license_server.base_url is not a valid URL: {}",
                self.license_server.base_url
            )
        })?;
        if !self.app.url.is_empty() {
            url::Url::parse(&self.app.url)
                .with_context(|| format!("app.url is not a valid URL: {}", self.app.url))?;
        }
        if !(4..=31).contains(&self.app.bcrypt_rounds) {
            anyhow::bail!("app.bcrypt_rounds must be between 4 and 31");
        }
        if crate::i18n::Locale::parse(&self.locale.default).is_none() {
            anyhow::bail!("locale.default must be one of: en, ar");
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .with_context(|| {
                format!(
                    "Invalid listen address {}:{}",
                    self.server.host, self.server.port
                )
            })
    }
}
