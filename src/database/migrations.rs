// Migration runner
// Embedded, engine-specific schema migrations with checksum tracking.
//
// Every applied migration is recorded in `installer_migrations` together with the sha256 of
// the SQL that ran. Re-running the installer skips recorded migrations; a recorded checksum
// that no longer matches the embedded SQL aborts the run.

use anyhow::{Context, Result};
use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use log::{info, warn};
use sqlx::{MySqlPool, PgPool};
use std::collections::HashMap;

use crate::database::connection::DatabaseConnection;
use crate::models::wizard::DbEngine;
use crate::security::crypto::sha256_hex;

pub const TRACKING_TABLE: &str = "installer_migrations";

/// A migration compiled into the binary, one script per engine.
#[derive(Debug, Clone, Copy)]
pub struct EmbeddedMigration {
    pub name: &'static str,
    mysql: &'static str,
    pgsql: &'static str,
}

impl EmbeddedMigration {
    pub fn sql(&self, engine: DbEngine) -> &'static str {
        match engine {
            DbEngine::MySql => self.mysql,
            DbEngine::Postgres => self.pgsql,
        }
    }

    pub fn checksum(&self, engine: DbEngine) -> String {
        sha256_hex(self.sql(engine).as_bytes())
    }
}

macro_rules! migration {
    ($name:literal) => {
        EmbeddedMigration {
            name: $name,
            mysql: include_str!(concat!("../../migrations/mysql/", $name, ".sql")),
            pgsql: include_str!(concat!("../../migrations/pgsql/", $name, ".sql")),
        }
    };
}

/// Ordered list of schema migrations.
pub const MIGRATIONS: &[EmbeddedMigration] = &[
    migration!("001_create_users_table"),
    migration!("002_create_permission_tables"),
    migration!("003_create_settings_table"),
    migration!("004_create_email_templates_table"),
];

const MYSQL_TRACKING_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS installer_migrations (
    name VARCHAR(255) NOT NULL PRIMARY KEY,
    checksum CHAR(64) NOT NULL,
    applied_at TIMESTAMP NOT NULL,
    execution_time_ms INT NOT NULL DEFAULT 0
) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci
"#;

const PG_TRACKING_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS installer_migrations (
    name VARCHAR(255) NOT NULL PRIMARY KEY,
    checksum CHAR(64) NOT NULL,
    applied_at TIMESTAMPTZ NOT NULL,
    execution_time_ms INTEGER NOT NULL DEFAULT 0
)
"#;

/// Select the migrations still to apply, verifying recorded checksums on the way.
pub fn pending_migrations(
    migrations: &[EmbeddedMigration],
    applied: &HashMap<String, String>,
    engine: DbEngine,
) -> Result<Vec<EmbeddedMigration>> {
    let mut pending = Vec::new();
    for migration in migrations {
        match applied.get(migration.name) {
            Some(recorded) => {
                let computed = migration.checksum(engine);
                if !recorded.eq_ignore_ascii_case(&computed) {
                    anyhow::bail!(
                        "Checksum mismatch for migration {}: recorded {}, embedded {}",
                        migration.name,
                        recorded,
                        computed
                    );
                }
            }
            None => pending.push(*migration),
        }
    }
    Ok(pending)
}

/// Runs migrations against its own handle to the pool, so the futures it hands out own
/// everything they touch and stay `Send` inside boxed step futures.
pub struct MigrationRunner {
    connection: DatabaseConnection,
}

impl MigrationRunner {
    pub fn new(connection: &DatabaseConnection) -> Self {
        Self {
            connection: connection.clone(),
        }
    }

    /// Create the tracking table if this is a fresh database.
    pub async fn ensure_tracking_table(&self) -> Result<()> {
        let ddl = match self.connection.engine() {
            DbEngine::MySql => MYSQL_TRACKING_DDL,
            DbEngine::Postgres => PG_TRACKING_DDL,
        };
        self.connection
            .execute(ddl, &[])
            .await
            .with_context(|| format!("Failed to create {}", TRACKING_TABLE))?;
        Ok(())
    }

    /// `name -> checksum` of everything already applied.
    pub async fn applied_checksums(&self) -> Result<HashMap<String, String>> {
        let rows = fetch_applied(self.connection.clone()).await?;
        Ok(rows.into_iter().collect())
    }

    /// Apply every pending migration in order; returns the names that ran.
    pub async fn apply_all_pending(&self) -> Result<Vec<String>> {
        let engine = self.connection.engine();
        self.ensure_tracking_table().await?;

        let applied = self.applied_checksums().await?;
        let pending = pending_migrations(MIGRATIONS, &applied, engine)?;

        info!(
            "[PHASE: database] [STEP: apply_all_pending] {} applied, {} pending ({})",
            applied.len(),
            pending.len(),
            engine.code()
        );

        let mut ran = Vec::with_capacity(pending.len());
        for migration in pending {
            self.apply_migration(migration).await?;
            ran.push(migration.name.to_string());
        }
        Ok(ran)
    }

    pub async fn apply_migration(&self, migration: EmbeddedMigration) -> Result<()> {
        info!(
            "[PHASE: database] [STEP: apply_migration] Applying migration: {}",
            migration.name
        );
        match self.connection.clone() {
            DatabaseConnection::MySql(pool) => apply_mysql(pool, migration).await,
            DatabaseConnection::Postgres(pool) => apply_postgres(pool, migration).await,
        }
    }
}

fn fetch_applied(
    connection: DatabaseConnection,
) -> BoxFuture<'static, Result<Vec<(String, String)>>> {
    const SQL: &str = "SELECT name, checksum FROM installer_migrations";
    async move {
        let rows: Vec<(String, String)> = match connection {
            DatabaseConnection::MySql(pool) => sqlx::query_as(SQL).fetch_all(&pool).await,
            DatabaseConnection::Postgres(pool) => sqlx::query_as(SQL).fetch_all(&pool).await,
        }
        .with_context(|| "Failed to query applied migrations")?;
        Ok(rows)
    }
    .boxed()
}

// MySQL commits DDL implicitly, so the script runs first and is only recorded once it
// completed. A failed script leaves no record and is retried on the next run.
fn apply_mysql(
    pool: MySqlPool,
    migration: EmbeddedMigration,
) -> BoxFuture<'static, Result<()>> {
    async move {
        let start = Utc::now();
        let sql = migration.sql(DbEngine::MySql);

        if let Err(e) = sqlx::raw_sql(sql).execute(&pool).await {
            warn!(
                "[PHASE: database] [STEP: apply_migration] Migration {} failed: {}",
                migration.name, e
            );
            return Err(e).with_context(|| {
                format!("Failed to execute migration SQL: {}", migration.name)
            });
        }

        let elapsed = (Utc::now() - start).num_milliseconds() as i32;
        sqlx::query(
            "INSERT INTO installer_migrations (name, checksum, applied_at, execution_time_ms) VALUES (?, ?, ?, ?)",
        )
        .bind(migration.name)
        .bind(migration.checksum(DbEngine::MySql))
        .bind(Utc::now())
        .bind(elapsed)
        .execute(&pool)
        .await
        .with_context(|| format!("Failed to record applied migration: {}", migration.name))?;

        info!(
            "[PHASE: database] [STEP: apply_migration] Successfully applied migration: {} ({}ms)",
            migration.name, elapsed
        );
        Ok(())
    }
    .boxed()
}

fn apply_postgres(
    pool: PgPool,
    migration: EmbeddedMigration,
) -> BoxFuture<'static, Result<()>> {
    async move {
        let start = Utc::now();
        let sql = migration.sql(DbEngine::Postgres);

        let mut tx = pool
            .begin()
            .await
            .with_context(|| "Failed to begin transaction")?;

        // A bare `&str` without arguments runs over the simple query protocol, like
        // `raw_sql`, but avoids its higher-ranked lifetime inference issue in a boxed future.
        sqlx::Executor::execute(&mut *tx, sql)
            .await
            .with_context(|| format!("Failed to execute migration SQL: {}", migration.name))?;

        let elapsed = (Utc::now() - start).num_milliseconds() as i32;
        sqlx::query(
            "INSERT INTO installer_migrations (name, checksum, applied_at, execution_time_ms) VALUES ($1, $2, $3, $4)",
        )
        .bind(migration.name)
        .bind(migration.checksum(DbEngine::Postgres))
        .bind(Utc::now())
        .bind(elapsed)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to record applied migration: {}", migration.name))?;

        tx.commit()
            .await
            .with_context(|| "Failed to commit transaction")?;

        info!(
            "[PHASE: database] [STEP: apply_migration] Successfully applied migration: {} ({}ms)",
            migration.name, elapsed
        );
        Ok(())
    }
    .boxed()
}
