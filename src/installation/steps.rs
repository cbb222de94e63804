//! Production install steps.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;
use std::path::Path;
use std::time::Duration;

use crate::config::{DatabaseConfig, PathsConfig};
use crate::database::connection::{connect_with_retry, DatabaseConnection};
use crate::database::migrations::MigrationRunner;
use crate::database::provisioning::{
    ensure_roles_and_permissions, seed_email_templates, upsert_admin, upsert_settings,
    UpsertOutcome,
};
use crate::utils::path_resolver::resolve_against;

use super::env_file::update_env_file;
use super::files::{ensure_storage_link, write_installed_marker, InstalledMarker, LinkOutcome};
use super::plan::InstallPlan;
use super::{InstallEngine, InstallStepName, InstallSummary};

#[async_trait]
pub trait InstallStep: Send + Sync {
    fn name(&self) -> InstallStepName;

    /// Run the step; the optional string is a short detail shown next to the step.
    async fn run(&self, ctx: &mut InstallContext) -> Result<Option<String>>;
}

/// State shared by the steps of one job.
pub struct InstallContext {
    plan: InstallPlan,
    paths: PathsConfig,
    db: DatabaseConfig,
    connection: Option<DatabaseConnection>,
    installed_at: Option<DateTime<Utc>>,
}

impl InstallContext {
    pub fn new(plan: InstallPlan, paths: PathsConfig, db: DatabaseConfig) -> Self {
        Self {
            plan,
            paths,
            db,
            connection: None,
            installed_at: None,
        }
    }

    pub fn plan(&self) -> &InstallPlan {
        &self.plan
    }

    pub fn paths(&self) -> &PathsConfig {
        &self.paths
    }

    /// Connection to the target database, opened on first use.
    pub async fn connection(&mut self) -> Result<&DatabaseConnection> {
        if self.connection.is_none() {
            let conn = connect_with_retry(
                &self.plan.database,
                self.db.max_connections,
                Duration::from_secs(self.db.connect_timeout_secs),
            )
            .await
            .context("Unable to connect to the database")?;
            self.connection = Some(conn);
        }
        self.connection
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("database connection unavailable"))
    }

    pub async fn close(&mut self) {
        if let Some(conn) = self.connection.take() {
            conn.close().await;
        }
    }

    pub fn summary(&self) -> InstallSummary {
        InstallSummary {
            admin_name: self.plan.admin.name.clone(),
            admin_email: self.plan.admin.email.clone(),
            site_name: self.plan.settings.site_name.clone(),
            installed_at: self.installed_at.unwrap_or_else(Utc::now),
        }
    }
}

// =============================================================================
// Steps
// =============================================================================

pub struct EnvStep;

#[async_trait]
impl InstallStep for EnvStep {
    fn name(&self) -> InstallStepName {
        InstallStepName::Env
    }

    async fn run(&self, ctx: &mut InstallContext) -> Result<Option<String>> {
        let env_path = ctx.paths.env_file();
        let example = resolve_against(&ctx.paths.app_root, Path::new(".env.example"));
        let values = ctx.plan.env_values();
        update_env_file(&env_path, &example, &values).await?;
        Ok(Some(format!("{} keys written", values.len())))
    }
}

pub struct MigrateStep;

#[async_trait]
impl InstallStep for MigrateStep {
    fn name(&self) -> InstallStepName {
        InstallStepName::Migrate
    }

    async fn run(&self, ctx: &mut InstallContext) -> Result<Option<String>> {
        let conn = ctx.connection().await?;
        let applied = MigrationRunner::new(conn).apply_all_pending().await?;
        Ok(Some(if applied.is_empty() {
            "Schema already up to date".to_string()
        } else {
            format!("{} migrations applied", applied.len())
        }))
    }
}

pub struct SeedStep;

#[async_trait]
impl InstallStep for SeedStep {
    fn name(&self) -> InstallStepName {
        InstallStepName::Seed
    }

    async fn run(&self, ctx: &mut InstallContext) -> Result<Option<String>> {
        let created = seed_email_templates(ctx.connection().await?).await?;
        Ok(Some(format!("{} email templates created", created)))
    }
}

pub struct RolesStep;

#[async_trait]
impl InstallStep for RolesStep {
    fn name(&self) -> InstallStepName {
        InstallStepName::Roles
    }

    async fn run(&self, ctx: &mut InstallContext) -> Result<Option<String>> {
        ensure_roles_and_permissions(ctx.connection().await?).await?;
        Ok(None)
    }
}

pub struct AdminStep;

#[async_trait]
impl InstallStep for AdminStep {
    fn name(&self) -> InstallStepName {
        InstallStepName::Admin
    }

    async fn run(&self, ctx: &mut InstallContext) -> Result<Option<String>> {
        let admin = ctx.plan.admin.clone();
        let outcome = upsert_admin(ctx.connection().await?, &admin).await?;
        Ok(Some(match outcome {
            UpsertOutcome::Created => format!("{} created", admin.email),
            UpsertOutcome::Updated => format!("{} updated", admin.email),
        }))
    }
}

pub struct SettingsStep;

#[async_trait]
impl InstallStep for SettingsStep {
    fn name(&self) -> InstallStepName {
        InstallStepName::Settings
    }

    async fn run(&self, ctx: &mut InstallContext) -> Result<Option<String>> {
        let settings = ctx.plan.settings.clone();
        let license = ctx.plan.license.clone();
        let admin_email = ctx.plan.admin.email.clone();
        upsert_settings(ctx.connection().await?, &settings, &license, &admin_email).await?;
        Ok(None)
    }
}

pub struct StorageStep;

#[async_trait]
impl InstallStep for StorageStep {
    fn name(&self) -> InstallStepName {
        InstallStepName::Storage
    }

    async fn run(&self, ctx: &mut InstallContext) -> Result<Option<String>> {
        let outcome = ensure_storage_link(&ctx.paths.storage(), &ctx.paths.public()).await?;
        Ok(match outcome {
            LinkOutcome::Created => None,
            LinkOutcome::AlreadyPresent => Some("Storage link already present".to_string()),
        })
    }
}

pub struct CompleteStep;

#[async_trait]
impl InstallStep for CompleteStep {
    fn name(&self) -> InstallStepName {
        InstallStepName::Complete
    }

    async fn run(&self, ctx: &mut InstallContext) -> Result<Option<String>> {
        let marker = InstalledMarker::now();
        let path = ctx.paths.installed_marker();
        write_installed_marker(&path, &marker).await?;
        ctx.installed_at = Some(marker.installed_at);
        info!(
            "[PHASE: install] [STEP: complete] installed marker written to {:?}",
            path
        );
        Ok(None)
    }
}

/// The full production sequence.
pub struct DefaultEngine;

impl InstallEngine for DefaultEngine {
    fn steps(&self) -> Vec<Box<dyn InstallStep>> {
        vec![
            Box::new(EnvStep),
            Box::new(MigrateStep),
            Box::new(SeedStep),
            Box::new(RolesStep),
            Box::new(AdminStep),
            Box::new(SettingsStep),
            Box::new(StorageStep),
            Box::new(CompleteStep),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installation::plan::tests::full_state;
    use crate::security::secret_protector::SecretProtector;

    async fn context_in(root: &Path) -> InstallContext {
        let secrets = SecretProtector::ephemeral();
        let state = full_state(&secrets).await;
        let plan = InstallPlan::from_state(&state, &secrets, "https://shop.example.com".to_string())
            .await
            .unwrap();
        InstallContext::new(
            plan,
            PathsConfig {
                app_root: root.to_path_buf(),
                ..PathsConfig::default()
            },
            DatabaseConfig::default(),
        )
    }

    #[test]
    fn default_engine_runs_steps_in_canonical_order() {
        let names: Vec<InstallStepName> = DefaultEngine.steps().iter().map(|s| s.name()).collect();
        assert_eq!(names, InstallStepName::ALL.to_vec());
    }

    #[tokio::test]
    async fn env_step_writes_database_keys() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join(".env.example"), "APP_NAME=Laravel\nDB_HOST=\n")
            .await
            .unwrap();
        let mut ctx = context_in(dir.path()).await;

        EnvStep.run(&mut ctx).await.unwrap();

        let env = tokio::fs::read_to_string(dir.path().join(".env")).await.unwrap();
        assert!(env.starts_with("APP_NAME=\"Acme\"\nDB_HOST=127.0.0.1\n"), "{}", env);
        assert!(env.contains("DB_DATABASE=test\n"));
        assert!(env.contains("APP_URL=https://shop.example.com\n"));
    }

    #[tokio::test]
    async fn storage_and_complete_steps_touch_the_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context_in(dir.path()).await;

        StorageStep.run(&mut ctx).await.unwrap();
        assert!(dir.path().join("public").join("storage").exists());

        CompleteStep.run(&mut ctx).await.unwrap();
        assert!(dir.path().join("storage").join(".installed").exists());
        let summary = ctx.summary();
        assert_eq!(summary.admin_name, "Jane Admin");
    }
}
