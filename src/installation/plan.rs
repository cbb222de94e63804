// Everything the runner needs, resolved from the wizard session before the job starts.

use crate::database::connection::DatabaseParams;
use crate::models::wizard::{
    AdminSection, LicenseSection, MissingStep, SettingsSection, WizardState, WizardStep,
};
use crate::security::secret_protector::SecretProtector;

use super::env_file::{quote_env_value, quote_env_value_always};
use super::InstallError;

#[derive(Clone)]
pub struct InstallPlan {
    pub database: DatabaseParams,
    pub license: LicenseSection,
    pub admin: AdminSection,
    pub settings: SettingsSection,
    /// Decrypted mail password, present when email is enabled.
    pub mail_password: Option<String>,
    pub app_url: String,
}

impl std::fmt::Debug for InstallPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallPlan")
            .field("database", &self.database)
            .field("admin_email", &self.admin.email)
            .field("site_name", &self.settings.site_name)
            .field("app_url", &self.app_url)
            .finish_non_exhaustive()
    }
}

fn missing(step: WizardStep) -> InstallError {
    InstallError::MissingStep(MissingStep { step })
}

impl InstallPlan {
    /// Resolve a plan from the session state, decrypting stored secrets.
    pub async fn from_state(
        state: &WizardState,
        secrets: &SecretProtector,
        app_url: String,
    ) -> Result<Self, InstallError> {
        let license = state.license.clone().ok_or_else(|| missing(WizardStep::License))?;
        let db = state.database.as_ref().ok_or_else(|| missing(WizardStep::Database))?;
        let admin = state.admin.clone().ok_or_else(|| missing(WizardStep::Admin))?;
        let settings = state.settings.clone().ok_or_else(|| missing(WizardStep::Settings))?;

        let password = secrets
            .decrypt(&db.password_sealed)
            .await
            .map_err(InstallError::Secret)?;

        let mail_password = match settings.mail.as_ref() {
            Some(mail) if settings.enable_email => Some(
                secrets
                    .decrypt(&mail.mail_password)
                    .await
                    .map_err(InstallError::Secret)?,
            ),
            _ => None,
        };

        Ok(Self {
            database: DatabaseParams {
                engine: db.engine,
                host: db.host.clone(),
                port: db.port,
                name: db.name.clone(),
                username: db.username.clone(),
                password,
            },
            license,
            admin,
            settings,
            mail_password,
            app_url,
        })
    }

    /// Key/value pairs written to `.env`, values already quoted where needed.
    pub fn env_values(&self) -> Vec<(String, String)> {
        let locale = self.settings.locale;
        let mut values: Vec<(&str, String)> = vec![
            ("APP_NAME", quote_env_value_always(&self.settings.site_name)),
            ("APP_URL", quote_env_value(&self.app_url)),
            ("APP_TIMEZONE", quote_env_value(&self.settings.timezone)),
            ("APP_LOCALE", locale.code().to_string()),
            ("APP_FALLBACK_LOCALE", locale.code().to_string()),
            ("APP_FAKER_LOCALE", locale.faker_locale().to_string()),
            ("DB_CONNECTION", self.database.engine.code().to_string()),
            ("DB_HOST", quote_env_value(&self.database.host)),
            ("DB_PORT", self.database.port.to_string()),
            ("DB_DATABASE", quote_env_value(&self.database.name)),
            ("DB_USERNAME", quote_env_value(&self.database.username)),
            ("DB_PASSWORD", quote_env_value(&self.database.password)),
        ];

        if let (true, Some(mail)) = (self.settings.enable_email, self.settings.mail.as_ref()) {
            let password = self.mail_password.clone().unwrap_or_default();
            values.extend([
                ("MAIL_MAILER", quote_env_value(&mail.mail_mailer)),
                ("MAIL_HOST", quote_env_value(&mail.mail_host)),
                ("MAIL_PORT", mail.mail_port.to_string()),
                ("MAIL_USERNAME", quote_env_value(&mail.mail_username)),
                ("MAIL_PASSWORD", quote_env_value(&password)),
                (
                    "MAIL_ENCRYPTION",
                    quote_env_value(mail.mail_encryption.as_deref().unwrap_or("null")),
                ),
                ("MAIL_FROM_ADDRESS", quote_env_value(&mail.mail_from_address)),
                ("MAIL_FROM_NAME", quote_env_value_always(&mail.mail_from_name)),
            ]);
        }

        values
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }
}
