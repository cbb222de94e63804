// Database connection management
//
// DbConnector is the seam used by the wizard's connection test and by the database
// store step; tests swap in stubs so no real server is needed.

use crate::models::wizard::DbEngine;
use crate::utils::logging::mask_dsn;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::time::Duration;
use tokio::time::timeout;

/// Connection parameters with the password in plaintext; never serialized.
#[derive(Clone)]
pub struct DatabaseParams {
    pub engine: DbEngine,
    pub host: String,
    pub port: u16,
    pub name: String,
    pub username: String,
    pub password: String,
}

impl DatabaseParams {
    /// DSN for logs only (credentials masked).
    pub fn masked_dsn(&self) -> String {
        let scheme = match self.engine {
            DbEngine::MySql => "mysql",
            DbEngine::Postgres => "postgres",
        };
        mask_dsn(&format!(
            "{}://{}:{}@{}:{}/{}",
            scheme, self.username, "x", self.host, self.port, self.name
        ))
    }
}

impl std::fmt::Debug for DatabaseParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseParams")
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

// =============================================================================
// DbConnector
// =============================================================================

/// Error returned by connection attempts.
/// Keeps user-friendly messages separate from internal details.
#[derive(Debug, Clone)]
pub struct ConnectError {
    /// Safe to show in the wizard
    pub user_message: String,
    /// For logs only
    pub internal_details: String,
}

impl std::fmt::Display for ConnectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.user_message)
    }
}

impl std::error::Error for ConnectError {}

#[async_trait]
pub trait DbConnector: Send + Sync {
    /// Attempt a connection and a trivial round trip.
    async fn connect(&self, params: &DatabaseParams) -> Result<(), ConnectError>;

    fn timeout_duration(&self) -> Duration {
        Duration::from_secs(10)
    }
}

/// Production connector.
pub struct RealDbConnector {
    timeout: Duration,
}

impl RealDbConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl DbConnector for RealDbConnector {
    async fn connect(&self, params: &DatabaseParams) -> Result<(), ConnectError> {
        debug!(
            "[PHASE: database] [STEP: connect] Testing connection to {}",
            params.masked_dsn()
        );

        let attempt = async {
            let conn = DatabaseConnection::connect(params, 1, self.timeout).await?;
            conn.ping().await?;
            conn.close().await;
            Ok::<(), anyhow::Error>(())
        };

        match timeout(self.timeout_duration(), attempt).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(classify_connect_error(&e)),
            Err(_) => Err(ConnectError {
                user_message: "Connection timed out. Check the host, port and firewall."
                    .to_string(),
                internal_details: "Connection attempt timed out".to_string(),
            }),
        }
    }

    fn timeout_duration(&self) -> Duration {
        self.timeout
    }
}

fn classify_connect_error(err: &anyhow::Error) -> ConnectError {
    let details = format!("{:#}", err);
    let lower = details.to_ascii_lowercase();

    let user_message = if lower.contains("access denied")
        || lower.contains("password authentication failed")
    {
        "Access denied. Check the database username and password."
    } else if lower.contains("unknown database")
        || (lower.contains("database") && lower.contains("does not exist"))
    {
        "The database does not exist. Create it first or check the name."
    } else if lower.contains("refused")
        || lower.contains("no route")
        || lower.contains("resolve")
        || lower.contains("lookup")
    {
        "Unable to reach the database server. Check the host and port."
    } else {
        "Unable to connect. Verify host, credentials, and network access."
    };

    ConnectError {
        user_message: user_message.to_string(),
        internal_details: details,
    }
}

// =============================================================================
// DatabaseConnection
// =============================================================================

/// A bind parameter for [`DatabaseConnection::execute`].
#[derive(Debug, Clone)]
pub enum SqlValue {
    Text(String),
    OptText(Option<String>),
    Int(i64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<Option<String>> for SqlValue {
    fn from(v: Option<String>) -> Self {
        SqlValue::OptText(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(v: DateTime<Utc>) -> Self {
        SqlValue::Timestamp(v)
    }
}

macro_rules! bind_all {
    ($query:expr, $params:expr) => {{
        let mut q = $query;
        for p in $params {
            q = match p {
                SqlValue::Text(v) => q.bind(v.clone()),
                SqlValue::OptText(v) => q.bind(v.clone()),
                SqlValue::Int(v) => q.bind(*v),
                SqlValue::Bool(v) => q.bind(*v),
                SqlValue::Timestamp(v) => q.bind(*v),
            };
        }
        q
    }};
}

#[derive(Clone)]
pub enum DatabaseConnection {
    MySql(MySqlPool),
    Postgres(PgPool),
}

impl DatabaseConnection {
    pub async fn connect(
        params: &DatabaseParams,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self> {
        match params.engine {
            DbEngine::MySql => {
                let opts = MySqlConnectOptions::new()
                    .host(&params.host)
                    .port(params.port)
                    .username(&params.username)
                    .password(&params.password)
                    .database(&params.name);
                let pool = MySqlPoolOptions::new()
                    .max_connections(max_connections.max(1))
                    .acquire_timeout(acquire_timeout)
                    .connect_with(opts)
                    .await
                    .with_context(|| format!("MySQL connect failed ({})", params.masked_dsn()))?;
                Ok(DatabaseConnection::MySql(pool))
            }
            DbEngine::Postgres => {
                let opts = PgConnectOptions::new()
                    .host(&params.host)
                    .port(params.port)
                    .username(&params.username)
                    .password(&params.password)
                    .database(&params.name);
                let pool = PgPoolOptions::new()
                    .max_connections(max_connections.max(1))
                    .acquire_timeout(acquire_timeout)
                    .connect_with(opts)
                    .await
                    .with_context(|| {
                        format!("PostgreSQL connect failed ({})", params.masked_dsn())
                    })?;
                Ok(DatabaseConnection::Postgres(pool))
            }
        }
    }

    pub fn engine(&self) -> DbEngine {
        match self {
            DatabaseConnection::MySql(_) => DbEngine::MySql,
            DatabaseConnection::Postgres(_) => DbEngine::Postgres,
        }
    }

    pub async fn ping(&self) -> Result<()> {
        self.execute("SELECT 1", &[]).await.map(|_| ())
    }

    /// Execute one statement. `?` placeholders are rewritten to `$n` for PostgreSQL.
    pub async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        let affected = match self {
            DatabaseConnection::MySql(pool) => bind_all!(sqlx::query(sql), params)
                .execute(pool)
                .await?
                .rows_affected(),
            DatabaseConnection::Postgres(pool) => {
                let sql = numbered_placeholders(sql);
                bind_all!(sqlx::query(&sql), params)
                    .execute(pool)
                    .await?
                    .rows_affected()
            }
        };
        Ok(affected)
    }

    /// Fetch a single `BIGINT` scalar (e.g. `SELECT COUNT(*)`), if any row matched.
    pub async fn fetch_i64(&self, sql: &str, params: &[SqlValue]) -> Result<Option<i64>> {
        let value = match self {
            DatabaseConnection::MySql(pool) => {
                bind_all!(sqlx::query_scalar::<_, i64>(sql), params)
                    .fetch_optional(pool)
                    .await?
            }
            DatabaseConnection::Postgres(pool) => {
                let sql = numbered_placeholders(sql);
                bind_all!(sqlx::query_scalar::<_, i64>(&sql), params)
                    .fetch_optional(pool)
                    .await?
            }
        };
        Ok(value)
    }

    pub async fn close(&self) {
        match self {
            DatabaseConnection::MySql(pool) => pool.close().await,
            DatabaseConnection::Postgres(pool) => pool.close().await,
        }
    }
}

/// Rewrite `?` placeholders to `$1..$n`, leaving quoted literals alone.
pub fn numbered_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut n = 0;
    let mut in_quote = false;
    for ch in sql.chars() {
        match ch {
            '\'' => {
                in_quote = !in_quote;
                out.push(ch);
            }
            '?' if !in_quote => {
                n += 1;
                out.push('$');
                out.push_str(&n.to_string());
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Connect with retries for transient network errors.
pub async fn connect_with_retry(
    params: &DatabaseParams,
    max_connections: u32,
    acquire_timeout: Duration,
) -> Result<DatabaseConnection> {
    use tokio_retry::strategy::{jitter, ExponentialBackoff};
    use tokio_retry::RetryIf;

    let retry_strategy = ExponentialBackoff::from_millis(100)
        .factor(2)
        .max_delay(Duration::from_secs(2))
        .take(3)
        .map(jitter);

    RetryIf::spawn(
        retry_strategy,
        || DatabaseConnection::connect(params, max_connections, acquire_timeout),
        |e: &anyhow::Error| {
            let msg = format!("{:#}", e).to_ascii_lowercase();
            let transient = msg.contains("timed out")
                || msg.contains("reset")
                || msg.contains("refused")
                || msg.contains("i/o");
            if transient {
                warn!(
                    "[PHASE: database] [STEP: connect] Transient connection failure; retrying ({})",
                    params.masked_dsn()
                );
            }
            transient
        },
    )
    .await
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Stub that always succeeds and records the parameters it saw.
    pub struct AcceptingStub {
        pub call_count: AtomicU32,
        pub last_host: std::sync::Mutex<Option<String>>,
    }

    impl AcceptingStub {
        pub fn new() -> Self {
            Self {
                call_count: AtomicU32::new(0),
                last_host: std::sync::Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl DbConnector for AcceptingStub {
        async fn connect(&self, params: &DatabaseParams) -> Result<(), ConnectError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            *self.last_host.lock().unwrap() = Some(params.host.clone());
            Ok(())
        }
    }

    /// Stub that immediately returns a controlled failure.
    pub struct ImmediateFailureStub {
        pub user_message: String,
        pub call_count: AtomicU32,
    }

    impl ImmediateFailureStub {
        pub fn new(user_message: &str) -> Self {
            Self {
                user_message: user_message.to_string(),
                call_count: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl DbConnector for ImmediateFailureStub {
        async fn connect(&self, _params: &DatabaseParams) -> Result<(), ConnectError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            Err(ConnectError {
                user_message: self.user_message.clone(),
                internal_details: "stubbed failure".to_string(),
            })
        }
    }

    /// Stub that never answers, for timeout handling.
    pub struct HangingStub;

    #[async_trait]
    impl DbConnector for HangingStub {
        async fn connect(&self, _params: &DatabaseParams) -> Result<(), ConnectError> {
            std::future::pending::<()>().await;
            Ok(())
        }

        fn timeout_duration(&self) -> Duration {
            Duration::from_millis(50)
        }
    }

    fn params() -> DatabaseParams {
        DatabaseParams {
            engine: DbEngine::MySql,
            host: "127.0.0.1".to_string(),
            port: 3306,
            name: "test".to_string(),
            username: "root".to_string(),
            password: "hunter2".to_string(),
        }
    }

    #[test]
    fn debug_output_masks_password() {
        let dbg = format!("{:?}", params());
        assert!(!dbg.contains("hunter2"));
        assert!(dbg.contains("127.0.0.1"));
    }

    #[test]
    fn masked_dsn_hides_credentials() {
        let dsn = params().masked_dsn();
        assert!(dsn.contains(":***@127.0.0.1:3306/test"), "{}", dsn);
        assert!(!dsn.contains("hunter2"));
    }

    #[test]
    fn connect_error_display_is_user_message_only() {
        let err = ConnectError {
            user_message: "Unable to connect".to_string(),
            internal_details: "tcp refused password=secret".to_string(),
        };
        assert_eq!(err.to_string(), "Unable to connect");
    }

    #[test]
    fn classify_access_denied() {
        let err = anyhow::anyhow!("error returned from database: 1045 (28000): Access denied for user 'root'");
        assert!(classify_connect_error(&err)
            .user_message
            .contains("Access denied"));
    }

    #[test]
    fn classify_unknown_database() {
        let err = anyhow::anyhow!("1049 (42000): Unknown database 'nope'");
        assert!(classify_connect_error(&err)
            .user_message
            .contains("does not exist"));
    }

    #[test]
    fn numbered_placeholders_skip_literals() {
        assert_eq!(
            numbered_placeholders("INSERT INTO t (a, b, c) VALUES (?, '?', ?)"),
            "INSERT INTO t (a, b, c) VALUES ($1, '?', $2)"
        );
    }

    #[tokio::test]
    async fn hanging_connector_is_bounded_by_timeout() {
        let stub = HangingStub;
        let res = timeout(stub.timeout_duration(), stub.connect(&params())).await;
        assert!(res.is_err(), "expected the timeout to fire");
    }

    #[tokio::test]
    async fn failure_stub_reports_user_message() {
        let stub = ImmediateFailureStub::new("Connection refused");
        let err = stub.connect(&params()).await.unwrap_err();
        assert_eq!(err.user_message, "Connection refused");
        assert_eq!(stub.call_count.load(Ordering::SeqCst), 1);
    }
}
