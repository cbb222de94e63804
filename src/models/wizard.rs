// Typed wizard state
//
// The whole wizard lives in one session value. Each step's store handler returns a
// `StepUpdate` that is merged here; later steps read sections back and treat an absent
// section as an explicit `MissingStep` instead of rendering empty values.

use crate::i18n::Locale;
use crate::routes::Route;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WizardStep {
    Welcome,
    License,
    Requirements,
    Database,
    Admin,
    Settings,
    Install,
    Completion,
}

impl WizardStep {
    pub const ALL: [WizardStep; 8] = [
        WizardStep::Welcome,
        WizardStep::License,
        WizardStep::Requirements,
        WizardStep::Database,
        WizardStep::Admin,
        WizardStep::Settings,
        WizardStep::Install,
        WizardStep::Completion,
    ];

    pub fn id(self) -> &'static str {
        match self {
            WizardStep::Welcome => "welcome",
            WizardStep::License => "license",
            WizardStep::Requirements => "requirements",
            WizardStep::Database => "database",
            WizardStep::Admin => "admin",
            WizardStep::Settings => "settings",
            WizardStep::Install => "install",
            WizardStep::Completion => "completion",
        }
    }

    /// 1-based position shown as "Step n of 8".
    pub fn number(self) -> usize {
        Self::ALL.iter().position(|s| *s == self).unwrap_or(0) + 1
    }

    pub fn progress(self) -> u8 {
        match self {
            WizardStep::Welcome => 20,
            WizardStep::License => 40,
            WizardStep::Requirements => 60,
            WizardStep::Database => 70,
            WizardStep::Admin => 80,
            WizardStep::Settings => 90,
            WizardStep::Install => 95,
            WizardStep::Completion => 100,
        }
    }

    pub fn show_route(self) -> Route {
        match self {
            WizardStep::Welcome => Route::InstallWelcome,
            WizardStep::License => Route::InstallLicense,
            WizardStep::Requirements => Route::InstallRequirements,
            WizardStep::Database => Route::InstallDatabase,
            WizardStep::Admin => Route::InstallAdmin,
            WizardStep::Settings => Route::InstallSettings,
            WizardStep::Install => Route::InstallInstall,
            WizardStep::Completion => Route::InstallCompletion,
        }
    }

    pub fn store_route(self) -> Option<Route> {
        match self {
            WizardStep::License => Some(Route::InstallLicenseStore),
            WizardStep::Database => Some(Route::InstallDatabaseStore),
            WizardStep::Admin => Some(Route::InstallAdminStore),
            WizardStep::Settings => Some(Route::InstallSettingsStore),
            WizardStep::Install => Some(Route::InstallProcess),
            _ => None,
        }
    }

    pub fn next(self) -> Option<WizardStep> {
        let idx = Self::ALL.iter().position(|s| *s == self)?;
        Self::ALL.get(idx + 1).copied()
    }

    pub fn previous(self) -> Option<WizardStep> {
        let idx = Self::ALL.iter().position(|s| *s == self)?;
        idx.checked_sub(1).and_then(|i| Self::ALL.get(i).copied())
    }

    /// Translation key of the guard message shown when this step is skipped.
    pub fn missing_message_key(self) -> &'static str {
        match self {
            WizardStep::License => "guard.license_first",
            WizardStep::Requirements => "guard.requirements_first",
            WizardStep::Database => "guard.database_first",
            WizardStep::Admin => "guard.admin_first",
            WizardStep::Settings => "guard.settings_first",
            WizardStep::Install | WizardStep::Completion => "guard.install_first",
            WizardStep::Welcome => "guard.license_first",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DbEngine {
    #[default]
    #[serde(rename = "mysql")]
    MySql,
    #[serde(rename = "pgsql")]
    Postgres,
}

impl DbEngine {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Some(DbEngine::MySql),
            "pgsql" | "postgres" | "postgresql" => Some(DbEngine::Postgres),
            _ => None,
        }
    }

    /// Value written to `DB_CONNECTION`.
    pub fn code(self) -> &'static str {
        match self {
            DbEngine::MySql => "mysql",
            DbEngine::Postgres => "pgsql",
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            DbEngine::MySql => 3306,
            DbEngine::Postgres => 5432,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LicenseSection {
    pub purchase_code: String,
    pub domain: String,
    pub verified_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supported_until: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buyer: Option<String>,
}

/// Field names mirror the form so the session bag reads `install.database.db_host`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSection {
    #[serde(rename = "db_engine", default)]
    pub engine: DbEngine,
    #[serde(rename = "db_host")]
    pub host: String,
    #[serde(rename = "db_port")]
    pub port: u16,
    #[serde(rename = "db_name")]
    pub name: String,
    #[serde(rename = "db_username")]
    pub username: String,
    /// Sealed with `SecretProtector`.
    #[serde(rename = "db_password")]
    pub password_sealed: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminSection {
    pub name: String,
    pub email: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailSection {
    pub mail_mailer: String,
    pub mail_host: String,
    pub mail_port: u16,
    #[serde(default)]
    pub mail_encryption: Option<String>,
    pub mail_username: String,
    /// Sealed with `SecretProtector`.
    pub mail_password: String,
    pub mail_from_address: String,
    pub mail_from_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsSection {
    pub site_name: String,
    #[serde(default)]
    pub site_description: Option<String>,
    #[serde(default)]
    pub admin_email: Option<String>,
    pub timezone: String,
    pub locale: Locale,
    pub enable_email: bool,
    #[serde(default)]
    pub mail: Option<MailSection>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepUpdate {
    License(LicenseSection),
    Database(DatabaseSection),
    Admin(AdminSection),
    Settings(SettingsSection),
}

impl StepUpdate {
    pub fn step(&self) -> WizardStep {
        match self {
            StepUpdate::License(_) => WizardStep::License,
            StepUpdate::Database(_) => WizardStep::Database,
            StepUpdate::Admin(_) => WizardStep::Admin,
            StepUpdate::Settings(_) => WizardStep::Settings,
        }
    }
}

/// A later step was reached without the data an earlier step writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissingStep {
    pub step: WizardStep,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WizardState {
    #[serde(default)]
    pub locale: Option<Locale>,
    #[serde(default)]
    pub license: Option<LicenseSection>,
    #[serde(default)]
    pub database: Option<DatabaseSection>,
    #[serde(default)]
    pub admin: Option<AdminSection>,
    #[serde(default)]
    pub settings: Option<SettingsSection>,
}

impl WizardState {
    /// Merge a validated partial update. Settings also switch the wizard locale.
    pub fn apply(&mut self, update: StepUpdate) {
        match update {
            StepUpdate::License(s) => self.license = Some(s),
            StepUpdate::Database(s) => self.database = Some(s),
            StepUpdate::Admin(s) => self.admin = Some(s),
            StepUpdate::Settings(s) => {
                self.locale = Some(s.locale);
                self.settings = Some(s);
            }
        }
    }

    /// Whether the session holds the section the given step writes.
    /// Steps without a section (welcome, requirements) count as completed.
    pub fn has_section(&self, step: WizardStep) -> bool {
        match step {
            WizardStep::License => self.license.is_some(),
            WizardStep::Database => self.database.is_some(),
            WizardStep::Admin => self.admin.is_some(),
            WizardStep::Settings => self.settings.is_some(),
            _ => true,
        }
    }

    /// First section-backed step before `step` that has not been stored yet.
    pub fn first_missing_before(&self, step: WizardStep) -> Option<MissingStep> {
        WizardStep::ALL
            .iter()
            .take_while(|s| **s != step)
            .find(|s| !self.has_section(**s))
            .map(|s| MissingStep { step: *s })
    }

    pub fn require_before(&self, step: WizardStep) -> Result<(), MissingStep> {
        match self.first_missing_before(step) {
            Some(missing) => Err(missing),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn license() -> LicenseSection {
        LicenseSection {
            purchase_code: "ABCDE-12345".to_string(),
            domain: "example.com".to_string(),
            verified_at: Utc::now(),
            license_type: None,
            supported_until: None,
            buyer: None,
        }
    }

    fn database() -> DatabaseSection {
        DatabaseSection {
            engine: DbEngine::MySql,
            host: "127.0.0.1".to_string(),
            port: 3306,
            name: "test".to_string(),
            username: "root".to_string(),
            password_sealed: "ENCv1:".to_string(),
        }
    }

    #[test]
    fn step_navigation() {
        assert_eq!(WizardStep::Welcome.number(), 1);
        assert_eq!(WizardStep::Completion.number(), 8);
        assert_eq!(WizardStep::Database.next(), Some(WizardStep::Admin));
        assert_eq!(WizardStep::Completion.next(), None);
        assert_eq!(WizardStep::Welcome.previous(), None);
        assert_eq!(WizardStep::Admin.previous(), Some(WizardStep::Database));
    }

    #[test]
    fn missing_sections_are_reported_in_order() {
        let mut state = WizardState::default();
        assert_eq!(state.first_missing_before(WizardStep::License), None);
        assert_eq!(
            state.require_before(WizardStep::Admin),
            Err(MissingStep {
                step: WizardStep::License
            })
        );

        state.apply(StepUpdate::License(license()));
        assert_eq!(
            state.first_missing_before(WizardStep::Admin),
            Some(MissingStep {
                step: WizardStep::Database
            })
        );

        state.apply(StepUpdate::Database(database()));
        assert!(state.require_before(WizardStep::Admin).is_ok());
        assert_eq!(
            state.first_missing_before(WizardStep::Completion),
            Some(MissingStep {
                step: WizardStep::Admin
            })
        );
    }

    #[test]
    fn apply_only_touches_its_section() {
        let mut state = WizardState::default();
        state.apply(StepUpdate::Database(database()));
        assert!(state.license.is_none());
        assert!(state.admin.is_none());
        assert_eq!(state.database.as_ref().unwrap().name, "test");
    }

    #[test]
    fn settings_update_switches_locale() {
        let mut state = WizardState::default();
        state.apply(StepUpdate::Settings(SettingsSection {
            site_name: "Acme".to_string(),
            site_description: None,
            admin_email: None,
            timezone: "UTC".to_string(),
            locale: Locale::Ar,
            enable_email: false,
            mail: None,
        }));
        assert_eq!(state.locale, Some(Locale::Ar));
    }

    #[test]
    fn database_section_serializes_with_form_field_names() {
        let json = serde_json::to_value(database()).unwrap();
        assert_eq!(json["db_host"], "127.0.0.1");
        assert_eq!(json["db_port"], 3306);
        assert_eq!(json["db_name"], "test");
        assert_eq!(json["db_username"], "root");
        assert_eq!(json["db_engine"], "mysql");
    }
}
