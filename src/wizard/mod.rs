// Wizard sequencer
//
// Builds the `PageView` for each step and turns a submitted form into a `StepUpdate`.
// Nothing here touches HTTP; the api layer owns the session, flashing and redirects.

pub mod validation;

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tokio::time::timeout;

use crate::database::connection::{DatabaseParams, DbConnector};
use crate::error::WizardError;
use crate::i18n::{Locale, Translator};
use crate::installation::files::InstalledMarker;
use crate::installation::{InstallStepName, InstallSummary, JobSnapshot, StepStatus};
use crate::licensing::{LicenseError, LicenseVerifier};
use crate::models::forms::{Flash, FormInput, ValidationResult};
use crate::models::responses::{PageView, StepItem, StepState};
use crate::models::wizard::{
    AdminSection, DatabaseSection, DbEngine, LicenseSection, MailSection, MissingStep,
    SettingsSection, StepUpdate, WizardState, WizardStep,
};
use crate::requirements::{RequirementsProbe, RequirementsReport};
use crate::routes::Route;
use crate::security::crypto::hash_password;
use crate::security::secret_protector::SecretProtector;
use crate::utils::logging::mask_purchase_code;
use validation::{Validator, MAILERS, MAIL_ENCRYPTIONS, MAX_STRING, TIMEZONES};

const PURCHASE_CODE_MIN: usize = 5;
const PURCHASE_CODE_MAX: usize = 100;
const PASSWORD_MIN: usize = 8;
const SITE_DESCRIPTION_MAX: usize = 500;
const DEFAULT_MAIL_PORT: u16 = 587;

/// Per-request inputs every page needs.
pub struct PageContext {
    pub locale: Locale,
    pub csrf_token: String,
    pub flash: Flash,
}

fn catalog_section(step: WizardStep) -> &'static str {
    match step {
        WizardStep::Install => "installation",
        other => other.id(),
    }
}

fn invalid(step: WizardStep, result: ValidationResult) -> WizardError {
    WizardError::Invalid {
        back: step.show_route(),
        result,
    }
}

pub fn step_items(current: WizardStep, translator: &Translator, locale: Locale) -> Vec<StepItem> {
    WizardStep::ALL
        .iter()
        .map(|step| StepItem {
            id: *step,
            number: step.number(),
            title: translator.get(locale, &format!("steps.{}", step.id())),
            state: match step.number().cmp(&current.number()) {
                std::cmp::Ordering::Less => StepState::Completed,
                std::cmp::Ordering::Equal => StepState::Active,
                std::cmp::Ordering::Greater => StepState::Pending,
            },
        })
        .collect()
}

fn step_links(step: WizardStep) -> BTreeMap<String, String> {
    let mut links = BTreeMap::new();
    if let Some(action) = step.store_route() {
        links.insert("form_action".to_string(), action.url());
    }
    if let Some(next) = step.next() {
        links.insert("next".to_string(), next.show_route().url());
    }
    if let Some(back) = step.previous() {
        links.insert("back".to_string(), back.show_route().url());
    }
    match step {
        WizardStep::Requirements => {
            links.insert("recheck".to_string(), Route::InstallRequirements.url());
        }
        WizardStep::Database => {
            links.insert("test_connection".to_string(), Route::InstallTestDatabase.url());
        }
        WizardStep::Install => {
            links.insert("status".to_string(), Route::InstallStatus.url());
            links.insert("events".to_string(), Route::InstallEvents.url());
            links.insert("cancel".to_string(), Route::InstallCancel.url());
            links.insert("login".to_string(), Route::Login.url());
        }
        WizardStep::Completion => {
            links.insert("login".to_string(), Route::Login.url());
        }
        _ => {}
    }
    links
}

/// Stored section values for pre-filling, secrets left out.
pub fn section_values(step: WizardStep, state: &WizardState) -> BTreeMap<String, Value> {
    let mut values = BTreeMap::new();
    match step {
        WizardStep::License => {
            if let Some(license) = &state.license {
                values.insert("purchase_code".to_string(), json!(license.purchase_code));
            }
        }
        WizardStep::Database => {
            if let Some(db) = &state.database {
                values.insert("db_engine".to_string(), json!(db.engine));
                values.insert("db_host".to_string(), json!(db.host));
                values.insert("db_port".to_string(), json!(db.port));
                values.insert("db_name".to_string(), json!(db.name));
                values.insert("db_username".to_string(), json!(db.username));
            }
        }
        WizardStep::Admin => {
            if let Some(admin) = &state.admin {
                values.insert("name".to_string(), json!(admin.name));
                values.insert("email".to_string(), json!(admin.email));
            }
        }
        _ => {}
    }
    values
}

fn settings_values(
    state: &WizardState,
    translator: &Translator,
    locale: Locale,
) -> BTreeMap<String, Value> {
    let mut values = BTreeMap::new();
    let Some(settings) = &state.settings else {
        values.insert(
            "site_name".to_string(),
            json!(translator.get(locale, "settings.default_site_name")),
        );
        values.insert(
            "site_description".to_string(),
            json!(translator.get(locale, "settings.default_site_description")),
        );
        values.insert("timezone".to_string(), json!("UTC"));
        values.insert("locale".to_string(), json!(locale));
        values.insert("enable_email".to_string(), json!(false));
        values.insert("mail_mailer".to_string(), json!("smtp"));
        values.insert("mail_port".to_string(), json!(DEFAULT_MAIL_PORT));
        values.insert("mail_encryption".to_string(), json!("tls"));
        return values;
    };

    values.insert("site_name".to_string(), json!(settings.site_name));
    values.insert("site_description".to_string(), json!(settings.site_description));
    values.insert("admin_email".to_string(), json!(settings.admin_email));
    values.insert("timezone".to_string(), json!(settings.timezone));
    values.insert("locale".to_string(), json!(settings.locale));
    values.insert("enable_email".to_string(), json!(settings.enable_email));
    if let Some(mail) = &settings.mail {
        values.insert("mail_mailer".to_string(), json!(mail.mail_mailer));
        values.insert("mail_host".to_string(), json!(mail.mail_host));
        values.insert("mail_port".to_string(), json!(mail.mail_port));
        values.insert("mail_encryption".to_string(), json!(mail.mail_encryption));
        values.insert("mail_username".to_string(), json!(mail.mail_username));
        values.insert("mail_from_address".to_string(), json!(mail.mail_from_address));
        values.insert("mail_from_name".to_string(), json!(mail.mail_from_name));
    }
    values
}

/// Assemble the view model for `step`. Every string comes from `ctx.locale`.
pub fn render(
    step: WizardStep,
    state: &WizardState,
    ctx: PageContext,
    translator: &Translator,
    data: Value,
    can_continue: bool,
) -> PageView {
    let locale = ctx.locale;
    let section = catalog_section(step);
    let values = match step {
        WizardStep::Settings => settings_values(state, translator, locale),
        other => section_values(other, state),
    };

    let mut view = PageView {
        step,
        step_number: step.number(),
        total_steps: WizardStep::ALL.len(),
        progress: step.progress(),
        steps: step_items(step, translator, locale),
        locale,
        direction: locale.direction(),
        title: translator.get(locale, &format!("{}.heading", section)),
        translations: translator.section(
            locale,
            &["common.", "steps.", &format!("{}.", section)],
        ),
        csrf_token: ctx.csrf_token,
        old: BTreeMap::new(),
        errors: BTreeMap::new(),
        values,
        flash_success: None,
        flash_error: None,
        can_continue,
        data,
        links: step_links(step),
    };
    view.absorb_flash(ctx.flash);
    view
}

// =============================================================================
// Gates
// =============================================================================

/// Check everything that must be done before `step` can be shown or stored.
pub async fn gate(
    step: WizardStep,
    state: &WizardState,
    probe: &dyn RequirementsProbe,
) -> Result<(), MissingStep> {
    if step.number() > WizardStep::License.number() && state.license.is_none() {
        return Err(MissingStep {
            step: WizardStep::License,
        });
    }

    let gated = step.number() > WizardStep::Requirements.number() && step != WizardStep::Completion;
    if gated && !probe.check().await.passed() {
        info!(
            "[PHASE: wizard] [STEP: {}] blocked by failing requirements",
            step.id()
        );
        return Err(MissingStep {
            step: WizardStep::Requirements,
        });
    }

    state.require_before(step)
}

// =============================================================================
// Step data
// =============================================================================

pub fn welcome_data(translator: &Translator, locale: Locale) -> Value {
    json!({
        "current_locale": locale,
        "locales": [
            {"code": Locale::En, "label": translator.get(locale, "welcome.language_en")},
            {"code": Locale::Ar, "label": translator.get(locale, "welcome.language_ar")},
        ],
    })
}

pub fn requirements_data(report: &RequirementsReport, translator: &Translator, locale: Locale) -> Value {
    let checks: Vec<Value> = report
        .checks
        .iter()
        .map(|check| {
            json!({
                "key": check.key,
                "label": translator.get(locale, &format!("requirements.{}", check.key)),
                "status": check.status,
                "detail": check.detail,
            })
        })
        .collect();
    json!({
        "checks": checks,
        "overall": report.overall,
        "passed": report.passed(),
    })
}

pub fn database_data(translator: &Translator, locale: Locale) -> Value {
    json!({
        "engines": [
            {"code": DbEngine::MySql, "label": translator.get(locale, "database.engine_mysql"), "default_port": DbEngine::MySql.default_port()},
            {"code": DbEngine::Postgres, "label": translator.get(locale, "database.engine_pgsql"), "default_port": DbEngine::Postgres.default_port()},
        ],
    })
}

pub fn settings_data(translator: &Translator, locale: Locale) -> Value {
    json!({
        "timezones": TIMEZONES,
        "mailers": MAILERS,
        "encryptions": MAIL_ENCRYPTIONS,
        "locales": [
            {"code": Locale::En, "label": translator.get(locale, "welcome.language_en")},
            {"code": Locale::Ar, "label": translator.get(locale, "welcome.language_ar")},
        ],
    })
}

/// Install page: the step list (live statuses when a job exists) and what will be installed.
pub fn install_data(
    state: &WizardState,
    job: Option<&JobSnapshot>,
    translator: &Translator,
    locale: Locale,
) -> Value {
    let steps: Vec<Value> = InstallStepName::ALL
        .iter()
        .map(|name| {
            let snapshot = job.and_then(|j| j.steps.iter().find(|s| s.step == *name));
            let status = snapshot.map(|s| s.status).unwrap_or(StepStatus::Pending);
            json!({
                "id": name,
                "element_id": name.element_id(),
                "label": translator.get(locale, &name.label_key()),
                "status": status,
                "status_label": translator.get(locale, status.label_key()),
                "message": snapshot.and_then(|s| s.message.clone()),
            })
        })
        .collect();

    json!({
        "steps": steps,
        "job": job,
        "summary": {
            "site_name": state.settings.as_ref().map(|s| s.site_name.clone()),
            "admin_email": state.admin.as_ref().map(|a| a.email.clone()),
            "database": state.database.as_ref().map(|d| format!("{}@{}:{}", d.name, d.host, d.port)),
        },
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionSummary {
    pub admin_name: String,
    pub admin_email: String,
    pub database_name: String,
    pub site_name: String,
    pub timezone: String,
    pub default_language: Locale,
    pub installed_at: DateTime<Utc>,
}

/// Completion display fields; the finished job's summary wins over session values.
pub fn completion_summary(
    state: &WizardState,
    job: Option<&InstallSummary>,
    marker: Option<&InstalledMarker>,
) -> Result<CompletionSummary, MissingStep> {
    state.require_before(WizardStep::Completion)?;
    let missing = |step| MissingStep { step };
    let marker = marker.ok_or(missing(WizardStep::Install))?;
    let admin = state.admin.as_ref().ok_or(missing(WizardStep::Admin))?;
    let database = state.database.as_ref().ok_or(missing(WizardStep::Database))?;
    let settings = state.settings.as_ref().ok_or(missing(WizardStep::Settings))?;

    Ok(CompletionSummary {
        admin_name: job
            .map(|j| j.admin_name.clone())
            .unwrap_or_else(|| admin.name.clone()),
        admin_email: job
            .map(|j| j.admin_email.clone())
            .unwrap_or_else(|| admin.email.clone()),
        database_name: database.name.clone(),
        site_name: job
            .map(|j| j.site_name.clone())
            .unwrap_or_else(|| settings.site_name.clone()),
        timezone: settings.timezone.clone(),
        default_language: settings.locale,
        installed_at: job.map(|j| j.installed_at).unwrap_or(marker.installed_at),
    })
}

// =============================================================================
// Store
// =============================================================================

/// `Host` header value without the port.
pub fn domain_from_host(host: &str) -> String {
    url::Url::parse(&format!("http://{}", host.trim()))
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_matches(['[', ']']).to_string()))
        .unwrap_or_else(|| host.trim().to_string())
}

pub async fn store_license(
    input: &FormInput,
    domain: &str,
    verifier: &dyn LicenseVerifier,
    translator: &Translator,
    locale: Locale,
) -> Result<StepUpdate, WizardError> {
    let mut v = Validator::new(input, translator, locale);
    let code = v.required("purchase_code");
    v.len_between(
        "purchase_code",
        code.as_deref(),
        PURCHASE_CODE_MIN,
        PURCHASE_CODE_MAX,
    );
    v.finish().map_err(|r| invalid(WizardStep::License, r))?;
    let code = code.unwrap_or_default();

    match verifier.verify(&code, domain).await {
        Ok(verified) => {
            info!(
                "[PHASE: wizard] [STEP: license] purchase code {} verified for {}",
                mask_purchase_code(&code),
                domain
            );
            Ok(StepUpdate::License(LicenseSection {
                purchase_code: code,
                domain: domain.to_string(),
                verified_at: Utc::now(),
                license_type: verified.license_type,
                supported_until: verified.supported_until,
                buyer: verified.buyer,
            }))
        }
        Err(LicenseError::Rejected(message)) => {
            warn!(
                "[PHASE: wizard] [STEP: license] purchase code {} rejected: {}",
                mask_purchase_code(&code),
                message
            );
            Err(invalid(
                WizardStep::License,
                ValidationResult::single("purchase_code", message, input),
            ))
        }
        Err(e @ LicenseError::Unreachable { .. }) => {
            warn!("[PHASE: wizard] [STEP: license] {}", e);
            Err(invalid(
                WizardStep::License,
                ValidationResult::single(
                    "purchase_code",
                    translator.get(locale, "license.server_unreachable"),
                    input,
                ),
            ))
        }
    }
}

/// Database rules only; nothing is contacted.
pub fn validate_database(
    input: &FormInput,
    translator: &Translator,
    locale: Locale,
) -> Result<DatabaseParams, ValidationResult> {
    let mut v = Validator::new(input, translator, locale);
    let engine_raw = v.optional("db_engine");
    v.one_of("db_engine", engine_raw.as_deref(), &["mysql", "pgsql"]);

    let host = v.required("db_host");
    v.max_len("db_host", host.as_deref(), MAX_STRING);
    let port_raw = v.required("db_port");
    let port = v.integer_between("db_port", port_raw.as_deref(), 1, 65535);
    let name = v.required("db_name");
    v.max_len("db_name", name.as_deref(), MAX_STRING);
    let username = v.required("db_username");
    v.max_len("db_username", username.as_deref(), MAX_STRING);
    let password = v.optional("db_password");
    v.max_len("db_password", password.as_deref(), MAX_STRING);
    v.finish()?;

    Ok(DatabaseParams {
        engine: engine_raw
            .as_deref()
            .and_then(DbEngine::parse)
            .unwrap_or_default(),
        host: host.unwrap_or_default(),
        port: port.and_then(|p| u16::try_from(p).ok()).unwrap_or_default(),
        name: name.unwrap_or_default(),
        username: username.unwrap_or_default(),
        password: password.unwrap_or_default(),
    })
}

/// Try the connection; the error is the connector's user-facing message.
pub async fn check_database(
    connector: &dyn DbConnector,
    params: &DatabaseParams,
) -> Result<(), String> {
    let limit = connector.timeout_duration();
    match timeout(limit, connector.connect(params)).await {
        Ok(Ok(())) => {
            info!(
                "[PHASE: wizard] [STEP: database] connection to {} succeeded",
                params.masked_dsn()
            );
            Ok(())
        }
        Ok(Err(e)) => {
            warn!(
                "[PHASE: wizard] [STEP: database] connection to {} failed: {}",
                params.masked_dsn(),
                e.internal_details
            );
            Err(e.user_message)
        }
        Err(_) => {
            warn!(
                "[PHASE: wizard] [STEP: database] connection to {} timed out after {:?}",
                params.masked_dsn(),
                limit
            );
            Err("Connection timed out. Check the host, port and firewall.".to_string())
        }
    }
}

pub async fn store_database(
    input: &FormInput,
    connector: &dyn DbConnector,
    secrets: &SecretProtector,
    translator: &Translator,
    locale: Locale,
) -> Result<StepUpdate, WizardError> {
    let params =
        validate_database(input, translator, locale).map_err(|r| invalid(WizardStep::Database, r))?;

    if let Err(message) = check_database(connector, &params).await {
        return Err(invalid(
            WizardStep::Database,
            ValidationResult::single("database", message, input),
        ));
    }

    Ok(StepUpdate::Database(DatabaseSection {
        engine: params.engine,
        password_sealed: secrets.encrypt(&params.password).await?,
        host: params.host,
        port: params.port,
        name: params.name,
        username: params.username,
    }))
}

pub fn store_admin(
    input: &FormInput,
    bcrypt_rounds: u32,
    translator: &Translator,
    locale: Locale,
) -> Result<StepUpdate, WizardError> {
    let mut v = Validator::new(input, translator, locale);
    let name = v.required("name");
    v.max_len("name", name.as_deref(), MAX_STRING);
    let email = v.required("email");
    v.email("email", email.as_deref());
    v.max_len("email", email.as_deref(), MAX_STRING);
    let password = v.required("password");
    v.min_len("password", password.as_deref(), PASSWORD_MIN);
    if password.is_some() {
        v.confirmed("password");
    }
    v.finish().map_err(|r| invalid(WizardStep::Admin, r))?;

    Ok(StepUpdate::Admin(AdminSection {
        name: name.unwrap_or_default(),
        email: email.unwrap_or_default().to_lowercase(),
        password_hash: hash_password(&password.unwrap_or_default(), bcrypt_rounds)?,
    }))
}

pub async fn store_settings(
    input: &FormInput,
    secrets: &SecretProtector,
    translator: &Translator,
    locale: Locale,
) -> Result<StepUpdate, WizardError> {
    let mut v = Validator::new(input, translator, locale);
    let site_name = v.required("site_name");
    v.max_len("site_name", site_name.as_deref(), MAX_STRING);
    let site_description = v.optional("site_description");
    v.max_len(
        "site_description",
        site_description.as_deref(),
        SITE_DESCRIPTION_MAX,
    );
    let timezone = v.required("timezone");
    v.one_of("timezone", timezone.as_deref(), TIMEZONES);
    let locale_raw = v.required("locale");
    v.one_of("locale", locale_raw.as_deref(), &["en", "ar"]);

    let enable_email = input.flag("enable_email");
    let admin_email = if enable_email {
        v.required("admin_email")
    } else {
        v.optional("admin_email")
    };
    v.email("admin_email", admin_email.as_deref());

    let mut mail_fields = None;
    if enable_email {
        let mailer = v.required("mail_mailer");
        v.one_of("mail_mailer", mailer.as_deref(), MAILERS);
        let host = v.required("mail_host");
        v.max_len("mail_host", host.as_deref(), MAX_STRING);
        let port_raw = v.required("mail_port");
        let port = v.integer_between("mail_port", port_raw.as_deref(), 1, 65535);
        let encryption = v.optional("mail_encryption");
        v.one_of("mail_encryption", encryption.as_deref(), MAIL_ENCRYPTIONS);
        let username = v.required("mail_username");
        v.max_len("mail_username", username.as_deref(), MAX_STRING);
        let password = v.required("mail_password");
        v.max_len("mail_password", password.as_deref(), MAX_STRING);
        let from_address = v.required("mail_from_address");
        v.email("mail_from_address", from_address.as_deref());
        let from_name = v.required("mail_from_name");
        v.max_len("mail_from_name", from_name.as_deref(), MAX_STRING);
        mail_fields = Some((
            mailer,
            host,
            port,
            encryption,
            username,
            password,
            from_address,
            from_name,
        ));
    }
    v.finish().map_err(|r| invalid(WizardStep::Settings, r))?;

    let mail = match mail_fields {
        Some((mailer, host, port, encryption, username, password, from_address, from_name)) => {
            Some(MailSection {
                mail_mailer: mailer.unwrap_or_default(),
                mail_host: host.unwrap_or_default(),
                mail_port: port
                    .and_then(|p| u16::try_from(p).ok())
                    .unwrap_or(DEFAULT_MAIL_PORT),
                mail_encryption: encryption,
                mail_username: username.unwrap_or_default(),
                mail_password: secrets.encrypt(&password.unwrap_or_default()).await?,
                mail_from_address: from_address.unwrap_or_default(),
                mail_from_name: from_name.unwrap_or_default(),
            })
        }
        None => None,
    };

    Ok(StepUpdate::Settings(SettingsSection {
        site_name: site_name.unwrap_or_default(),
        site_description,
        admin_email: admin_email.map(|e| e.to_lowercase()),
        timezone: timezone.unwrap_or_else(|| "UTC".to_string()),
        locale: locale_raw
            .as_deref()
            .and_then(Locale::parse)
            .unwrap_or(locale),
        enable_email,
        mail,
    }))
}
