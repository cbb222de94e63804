// Data provisioning for a freshly migrated database
//
// Everything here is idempotent: each write first checks for the row it would create, so the
// install runner can be re-run against a partially provisioned database.

use anyhow::{Context, Result};
use chrono::Utc;
use log::info;

use crate::database::connection::{DatabaseConnection, SqlValue};
use crate::models::wizard::{AdminSection, LicenseSection, SettingsSection};

// =============================================================================
// Constants
// =============================================================================

pub const GUARD_NAME: &str = "web";
pub const USER_MODEL: &str = "App\\Models\\User";

pub const PERMISSIONS: &[&str] = &[
    "manage_users",
    "manage_products",
    "manage_licenses",
    "manage_tickets",
    "manage_settings",
    "manage_knowledge_base",
    "view_reports",
    "manage_invoices",
];

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_USER: &str = "user";

/// Permissions granted to each seeded role.
pub fn role_permissions(role: &str) -> &'static [&'static str] {
    match role {
        ROLE_ADMIN => PERMISSIONS,
        ROLE_USER => &["view_reports"],
        _ => &[],
    }
}

pub struct EmailTemplate {
    pub name: &'static str,
    pub subject: &'static str,
    pub body: &'static str,
}

pub const EMAIL_TEMPLATES: &[EmailTemplate] = &[
    EmailTemplate {
        name: "user_email_verification",
        subject: "Verify your email address",
        body: "Hello {{name}}, please confirm your email address: {{verification_url}}",
    },
    EmailTemplate {
        name: "user_password_reset",
        subject: "Reset your password",
        body: "Hello {{name}}, use this link to reset your password: {{reset_url}}",
    },
    EmailTemplate {
        name: "user_welcome",
        subject: "Welcome to {{site_name}}",
        body: "Hello {{name}}, your account at {{site_name}} is ready.",
    },
    EmailTemplate {
        name: "user_license_created",
        subject: "Your new license",
        body: "Hello {{name}}, your license {{license_key}} for {{product_name}} is active.",
    },
    EmailTemplate {
        name: "user_license_expiring",
        subject: "Your license is expiring soon",
        body: "Hello {{name}}, license {{license_key}} expires on {{expires_at}}.",
    },
    EmailTemplate {
        name: "user_license_updated",
        subject: "Your license was updated",
        body: "Hello {{name}}, license {{license_key}} was updated.",
    },
    EmailTemplate {
        name: "user_product_version_update",
        subject: "New version of {{product_name}}",
        body: "Hello {{name}}, version {{version}} of {{product_name}} is available.",
    },
    EmailTemplate {
        name: "user_ticket_created",
        subject: "Ticket #{{ticket_id}} received",
        body: "Hello {{name}}, we received your ticket \"{{ticket_subject}}\".",
    },
    EmailTemplate {
        name: "user_ticket_status_update",
        subject: "Ticket #{{ticket_id}} status changed",
        body: "Hello {{name}}, your ticket is now {{ticket_status}}.",
    },
    EmailTemplate {
        name: "user_ticket_reply",
        subject: "New reply on ticket #{{ticket_id}}",
        body: "Hello {{name}}, there is a new reply on your ticket: {{reply}}",
    },
];

pub const PRELOADER_TYPE: &str = "spinner";
pub const PRELOADER_COLOR: &str = "#3b82f6";
pub const PRELOADER_BACKGROUND: &str = "#ffffff";
pub const PRELOADER_DURATION_MS: i64 = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

// =============================================================================
// Email templates
// =============================================================================

/// Insert missing default email templates; returns how many were created.
pub async fn seed_email_templates(conn: &DatabaseConnection) -> Result<usize> {
    let now = Utc::now();
    let mut created = 0;
    for template in EMAIL_TEMPLATES {
        if row_exists(conn, "SELECT COUNT(*) FROM email_templates WHERE name = ?", template.name)
            .await?
        {
            continue;
        }
        conn.execute(
            "INSERT INTO email_templates (name, type, subject, body, is_active, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
            &[
                template.name.into(),
                "user".into(),
                template.subject.into(),
                template.body.into(),
                true.into(),
                now.into(),
                now.into(),
            ],
        )
        .await
        .with_context(|| format!("Failed to insert email template {}", template.name))?;
        created += 1;
    }
    info!(
        "[PHASE: provisioning] [STEP: seed] {} email templates created, {} already present",
        created,
        EMAIL_TEMPLATES.len() - created
    );
    Ok(created)
}

// =============================================================================
// Roles and permissions
// =============================================================================

pub async fn ensure_roles_and_permissions(conn: &DatabaseConnection) -> Result<()> {
    let now = Utc::now();

    for permission in PERMISSIONS {
        ensure_named_row(conn, "permissions", permission, now).await?;
    }

    for role in [ROLE_ADMIN, ROLE_USER] {
        ensure_named_row(conn, "roles", role, now).await?;
        for permission in role_permissions(role) {
            conn.execute(
                "INSERT INTO role_has_permissions (permission_id, role_id) \
                 SELECT p.id, r.id FROM permissions p, roles r \
                 WHERE p.name = ? AND r.name = ? \
                 AND NOT EXISTS (SELECT 1 FROM role_has_permissions x WHERE x.permission_id = p.id AND x.role_id = r.id)",
                &[(*permission).into(), role.into()],
            )
            .await
            .with_context(|| format!("Failed to grant {} to role {}", permission, role))?;
        }
    }

    info!(
        "[PHASE: provisioning] [STEP: roles] {} permissions, roles: {}, {}",
        PERMISSIONS.len(),
        ROLE_ADMIN,
        ROLE_USER
    );
    Ok(())
}

async fn ensure_named_row(
    conn: &DatabaseConnection,
    table: &str,
    name: &str,
    now: chrono::DateTime<Utc>,
) -> Result<()> {
    let count_sql = format!("SELECT COUNT(*) FROM {} WHERE name = ?", table);
    if row_exists(conn, &count_sql, name).await? {
        return Ok(());
    }
    let insert_sql = format!(
        "INSERT INTO {} (name, guard_name, created_at, updated_at) VALUES (?, ?, ?, ?)",
        table
    );
    conn.execute(
        &insert_sql,
        &[name.into(), GUARD_NAME.into(), now.into(), now.into()],
    )
    .await
    .with_context(|| format!("Failed to insert {} into {}", name, table))?;
    Ok(())
}

// =============================================================================
// Admin account
// =============================================================================

/// Create the administrator, or refresh name and password when the email already exists.
/// Either way the account ends up verified and holding the admin role.
pub async fn upsert_admin(conn: &DatabaseConnection, admin: &AdminSection) -> Result<UpsertOutcome> {
    let now = Utc::now();
    let exists = row_exists(conn, "SELECT COUNT(*) FROM users WHERE email = ?", &admin.email).await?;

    let outcome = if exists {
        conn.execute(
            "UPDATE users SET name = ?, password = ?, email_verified_at = ?, updated_at = ? WHERE email = ?",
            &[
                admin.name.as_str().into(),
                admin.password_hash.as_str().into(),
                now.into(),
                now.into(),
                admin.email.as_str().into(),
            ],
        )
        .await
        .context("Failed to update existing admin user")?;
        UpsertOutcome::Updated
    } else {
        conn.execute(
            "INSERT INTO users (name, email, password, email_verified_at, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
            &[
                admin.name.as_str().into(),
                admin.email.as_str().into(),
                admin.password_hash.as_str().into(),
                now.into(),
                now.into(),
                now.into(),
            ],
        )
        .await
        .context("Failed to insert admin user")?;
        UpsertOutcome::Created
    };

    conn.execute(
        "INSERT INTO model_has_roles (role_id, model_type, model_id) \
         SELECT r.id, ?, u.id FROM roles r, users u \
         WHERE r.name = ? AND u.email = ? \
         AND NOT EXISTS (SELECT 1 FROM model_has_roles x WHERE x.role_id = r.id AND x.model_id = u.id AND x.model_type = ?)",
        &[
            USER_MODEL.into(),
            ROLE_ADMIN.into(),
            admin.email.as_str().into(),
            USER_MODEL.into(),
        ],
    )
    .await
    .context("Failed to assign admin role")?;

    info!(
        "[PHASE: provisioning] [STEP: admin] Admin account {:?}",
        outcome
    );
    Ok(outcome)
}

// =============================================================================
// Settings
// =============================================================================

/// Write the single settings row, including the verified license.
pub async fn upsert_settings(
    conn: &DatabaseConnection,
    settings: &SettingsSection,
    license: &LicenseSection,
    fallback_admin_email: &str,
) -> Result<UpsertOutcome> {
    let now = Utc::now();
    let admin_email = settings
        .admin_email
        .clone()
        .unwrap_or_else(|| fallback_admin_email.to_string());

    let shared: Vec<SqlValue> = vec![
        settings.site_name.as_str().into(),
        settings.site_description.clone().into(),
        admin_email.into(),
        settings.timezone.as_str().into(),
        settings.locale.code().into(),
        settings.site_name.as_str().into(),
        true.into(),
        PRELOADER_TYPE.into(),
        PRELOADER_COLOR.into(),
        PRELOADER_BACKGROUND.into(),
        PRELOADER_DURATION_MS.into(),
        false.into(),
        true.into(),
        settings.enable_email.into(),
        license.purchase_code.as_str().into(),
        license.domain.as_str().into(),
        license.verified_at.into(),
    ];

    let has_row = conn
        .fetch_i64("SELECT COUNT(*) FROM settings", &[])
        .await
        .context("Failed to read settings")?
        .unwrap_or(0)
        > 0;

    if has_row {
        let mut params = shared;
        params.push(now.into());
        conn.execute(
            "UPDATE settings SET site_name = ?, site_description = ?, admin_email = ?, timezone = ?, \
             default_language = ?, logo_text = ?, preloader_enabled = ?, preloader_type = ?, \
             preloader_color = ?, preloader_background_color = ?, preloader_duration = ?, \
             maintenance_mode = ?, registration_enabled = ?, email_verification_required = ?, \
             license_purchase_code = ?, license_domain = ?, license_verified_at = ?, updated_at = ?",
            &params,
        )
        .await
        .context("Failed to update settings")?;
        info!("[PHASE: provisioning] [STEP: settings] Settings updated");
        Ok(UpsertOutcome::Updated)
    } else {
        let mut params = shared;
        params.push(now.into());
        params.push(now.into());
        conn.execute(
            "INSERT INTO settings (site_name, site_description, admin_email, timezone, default_language, \
             logo_text, preloader_enabled, preloader_type, preloader_color, preloader_background_color, \
             preloader_duration, maintenance_mode, registration_enabled, email_verification_required, \
             license_purchase_code, license_domain, license_verified_at, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            &params,
        )
        .await
        .context("Failed to insert settings")?;
        info!("[PHASE: provisioning] [STEP: settings] Settings created");
        Ok(UpsertOutcome::Created)
    }
}

async fn row_exists(conn: &DatabaseConnection, count_sql: &str, key: &str) -> Result<bool> {
    let count = conn
        .fetch_i64(count_sql, &[key.into()])
        .await
        .with_context(|| format!("Lookup failed: {}", count_sql))?;
    Ok(count.unwrap_or(0) > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn admin_role_holds_every_permission() {
        assert_eq!(role_permissions(ROLE_ADMIN), PERMISSIONS);
        assert_eq!(role_permissions(ROLE_USER), &["view_reports"]);
        assert!(role_permissions("guest").is_empty());
    }

    #[test]
    fn user_permissions_are_known() {
        for p in role_permissions(ROLE_USER) {
            assert!(PERMISSIONS.contains(p));
        }
    }

    #[test]
    fn email_template_names_are_unique() {
        let names: HashSet<&str> = EMAIL_TEMPLATES.iter().map(|t| t.name).collect();
        assert_eq!(names.len(), EMAIL_TEMPLATES.len());
        assert!(names.contains("user_welcome"));
        assert!(names.contains("user_ticket_reply"));
    }
}
