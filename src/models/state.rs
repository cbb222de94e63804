// Application state shared by every request.
//
// Runtime only; nothing here is persisted. Collaborators sit behind traits so tests can
// swap the license server, the database connector, the requirements probe and the install
// engine for deterministic stubs.

use anyhow::{Context, Result};
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::InstallerConfig;
use crate::database::connection::{DbConnector, RealDbConnector};
use crate::i18n::{Locale, Translator};
use crate::installation::steps::DefaultEngine;
use crate::installation::{InstallEngine, InstallManager};
use crate::licensing::{LicenseVerifier, RemoteLicenseServer};
use crate::requirements::{HostProbe, RequirementsProbe};
use crate::security::secret_protector::SecretProtector;

pub struct AppStateInner {
    pub config: InstallerConfig,
    pub translator: Translator,
    pub default_locale: Locale,
    pub secrets: SecretProtector,
    pub db_connector: Arc<dyn DbConnector>,
    pub license_verifier: Arc<dyn LicenseVerifier>,
    pub requirements: Arc<dyn RequirementsProbe>,
    pub engine: Arc<dyn InstallEngine>,
    pub installs: InstallManager,
}

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

impl Deref for AppState {
    type Target = AppStateInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl AppState {
    pub fn builder(config: InstallerConfig) -> AppStateBuilder {
        AppStateBuilder {
            config,
            secrets_key: None,
            db_connector: None,
            license_verifier: None,
            requirements: None,
            engine: None,
        }
    }

    pub fn is_installed(&self) -> bool {
        crate::installation::files::is_installed(&self.config.paths.installed_marker())
    }
}

pub struct AppStateBuilder {
    config: InstallerConfig,
    secrets_key: Option<PathBuf>,
    db_connector: Option<Arc<dyn DbConnector>>,
    license_verifier: Option<Arc<dyn LicenseVerifier>>,
    requirements: Option<Arc<dyn RequirementsProbe>>,
    engine: Option<Arc<dyn InstallEngine>>,
}

impl AppStateBuilder {
    /// Persist the session secret key here; without it the key lives for the process only.
    pub fn secrets_key(mut self, path: PathBuf) -> Self {
        self.secrets_key = Some(path);
        self
    }

    pub fn db_connector(mut self, connector: Arc<dyn DbConnector>) -> Self {
        self.db_connector = Some(connector);
        self
    }

    pub fn license_verifier(mut self, verifier: Arc<dyn LicenseVerifier>) -> Self {
        self.license_verifier = Some(verifier);
        self
    }

    pub fn requirements(mut self, probe: Arc<dyn RequirementsProbe>) -> Self {
        self.requirements = Some(probe);
        self
    }

    pub fn engine(mut self, engine: Arc<dyn InstallEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn build(self) -> Result<AppState> {
        let config = self.config;
        let translator = Translator::embedded()?;
        let default_locale = Locale::parse(&config.locale.default).unwrap_or_default();

        let license_verifier: Arc<dyn LicenseVerifier> = match self.license_verifier {
            Some(v) => v,
            None => Arc::new(
                RemoteLicenseServer::new(&config.license_server)
                    .context("Failed to create license server client")?,
            ),
        };
        let db_connector = self.db_connector.unwrap_or_else(|| {
            Arc::new(RealDbConnector::new(Duration::from_secs(
                config.database.connect_timeout_secs,
            )))
        });
        let requirements = self.requirements.unwrap_or_else(|| {
            Arc::new(HostProbe::new(
                config.paths.clone(),
                config.requirements.clone(),
            ))
        });
        let engine = self.engine.unwrap_or_else(|| Arc::new(DefaultEngine));
        let secrets = match self.secrets_key {
            Some(path) => SecretProtector::new(path),
            None => SecretProtector::ephemeral(),
        };

        let installs = InstallManager::with_grace(Duration::from_secs(
            config.server.finished_job_grace_secs,
        ));

        Ok(AppState {
            inner: Arc::new(AppStateInner {
                config,
                translator,
                default_locale,
                secrets,
                db_connector,
                license_verifier,
                requirements,
                engine,
                installs,
            }),
        })
    }
}
