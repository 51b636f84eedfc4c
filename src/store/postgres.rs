//! PostgreSQL registration store for production use.
//!
//! ## Configuration
//!
//! All settings can be configured via environment variables:
//! - `DATABASE_URL`: PostgreSQL connection string (required)
//! - `DB_MAX_CONNECTIONS`: Maximum pool size (default: 10)
//! - `DB_MIN_CONNECTIONS`: Minimum idle connections (default: 2)
//! - `DB_CONNECT_TIMEOUT_SECS`: Connection timeout (default: 10)
//! - `DB_IDLE_TIMEOUT_SECS`: Idle connection timeout (default: 300)
//! - `DB_MAX_LIFETIME_SECS`: Max connection lifetime (default: 1800)
//! - `DB_QUERY_TIMEOUT_SECS`: Upper bound for any single query (default: 5)

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Executor, Row};
use uuid::Uuid;

use crate::types::{
    NewRegistration, ProfileFields, ReferralCode, ReferralEdge, RegistrationId, RegistrationRecord, UserId,
};
use super::{RegistrationStore, StoreError, UniqueField};

/// DDL for the registrations table.
///
/// The unique constraints are the authority on code and user uniqueness;
/// their names are matched when mapping SQLSTATE 23505.
pub const REGISTRATION_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS registrations (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    user_id TEXT NOT NULL,
    referral_code TEXT NOT NULL,
    referred_by UUID REFERENCES registrations(id),
    display_name TEXT NOT NULL DEFAULT '',
    email TEXT,
    affiliation TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),

    CONSTRAINT registrations_user_id_key UNIQUE (user_id),
    CONSTRAINT registrations_referral_code_key UNIQUE (referral_code),
    CONSTRAINT registrations_no_self_referral CHECK (referred_by IS NULL OR referred_by <> id)
);

CREATE INDEX IF NOT EXISTS idx_registrations_referred_by
    ON registrations(referred_by) WHERE referred_by IS NOT NULL;
"#;

const USER_ID_CONSTRAINT: &str = "registrations_user_id_key";
const REFERRAL_CODE_CONSTRAINT: &str = "registrations_referral_code_key";

const RECORD_COLUMNS: &str =
    "id, user_id, referral_code, referred_by, display_name, email, affiliation, created_at";

/// Configuration for PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Database connection URL.
    pub database_url: String,
    /// Maximum connections in pool (default: 10).
    pub max_connections: u32,
    /// Minimum idle connections to keep warm (default: 2).
    pub min_connections: u32,
    /// Connection acquire timeout in seconds (default: 10).
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds (default: 300 = 5 min).
    pub idle_timeout_secs: u64,
    /// Maximum connection lifetime in seconds (default: 1800 = 30 min).
    pub max_lifetime_secs: u64,
    /// Per-query timeout in seconds (default: 5).
    pub query_timeout_secs: u64,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl PostgresConfig {
    /// Load configuration from environment variables with production defaults.
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/registrations".to_string()),
            max_connections: env_or("DB_MAX_CONNECTIONS", 10),
            min_connections: env_or("DB_MIN_CONNECTIONS", 2),
            connect_timeout_secs: env_or("DB_CONNECT_TIMEOUT_SECS", 10),
            idle_timeout_secs: env_or("DB_IDLE_TIMEOUT_SECS", 300),
            max_lifetime_secs: env_or("DB_MAX_LIFETIME_SECS", 1800),
            query_timeout_secs: env_or("DB_QUERY_TIMEOUT_SECS", 5),
        }
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// PostgreSQL registration store.
pub struct PostgresRegistrationStore {
    pool: PgPool,
    query_timeout: Duration,
}

impl PostgresRegistrationStore {
    /// Create a new store with the given configuration.
    pub async fn new(config: PostgresConfig) -> Result<Self, sqlx::Error> {
        tracing::info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            connect_timeout_secs = config.connect_timeout_secs,
            idle_timeout_secs = config.idle_timeout_secs,
            max_lifetime_secs = config.max_lifetime_secs,
            query_timeout_secs = config.query_timeout_secs,
            "Initializing PostgreSQL connection pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
            .test_before_acquire(true)
            .connect(&config.database_url)
            .await?;

        Ok(Self::from_pool(pool, Duration::from_secs(config.query_timeout_secs)))
    }

    /// Create a store from environment variables.
    pub async fn from_env() -> Result<Self, sqlx::Error> {
        Self::new(PostgresConfig::from_env()).await
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool, query_timeout: Duration) -> Self {
        Self { pool, query_timeout }
    }

    /// Apply [`REGISTRATION_TABLE_SCHEMA`]. Idempotent.
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        self.pool.execute(REGISTRATION_TABLE_SCHEMA).await?;
        tracing::info!("Registration schema applied");
        Ok(())
    }

    /// Get the connection pool for health checks.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check if the database is reachable.
    pub async fn is_healthy(&self) -> bool {
        self.ping().await.is_ok()
    }

    /// Get pool statistics for monitoring.
    pub fn pool_stats(&self) -> PoolStats {
        PoolStats {
            size: self.pool.size(),
            idle: self.pool.num_idle(),
            max: self.pool.options().get_max_connections(),
        }
    }

    /// Run a query future under the configured timeout and map its error.
    async fn bounded<T, F>(&self, query: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, sqlx::Error>> + Send,
    {
        match tokio::time::timeout(self.query_timeout, query).await {
            Ok(result) => result.map_err(map_sqlx_error),
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.query_timeout.as_millis() as u64,
                    "Registration store query timed out"
                );
                Err(StoreError::Unavailable("query timed out".to_string()))
            }
        }
    }

    /// Parse a registration from a database row.
    fn parse_record_row(row: &PgRow) -> Result<RegistrationRecord, StoreError> {
        let id: Uuid = row.try_get("id").map_err(StoreError::unavailable)?;
        let user_id: String = row.try_get("user_id").map_err(StoreError::unavailable)?;
        let code: String = row.try_get("referral_code").map_err(StoreError::unavailable)?;
        let referred_by: Option<Uuid> = row.try_get("referred_by").map_err(StoreError::unavailable)?;
        let display_name: String = row.try_get("display_name").map_err(StoreError::unavailable)?;
        let email: Option<String> = row.try_get("email").map_err(StoreError::unavailable)?;
        let affiliation: Option<String> = row.try_get("affiliation").map_err(StoreError::unavailable)?;
        let created_at: chrono::DateTime<chrono::Utc> =
            row.try_get("created_at").map_err(StoreError::unavailable)?;

        let user_id = UserId::parse(&user_id)
            .ok_or_else(|| StoreError::Unavailable(format!("corrupt user_id on row {id}")))?;
        let referral_code = ReferralCode::parse(&code)
            .ok_or_else(|| StoreError::Unavailable(format!("corrupt referral_code on row {id}")))?;

        Ok(RegistrationRecord {
            id: RegistrationId::new(id),
            user_id,
            referral_code,
            referred_by: referred_by.map(RegistrationId::new),
            profile: ProfileFields {
                display_name,
                email,
                affiliation,
            },
            created_at,
        })
    }

    async fn find_one(&self, column: &str, value: String) -> Result<Option<RegistrationRecord>, StoreError> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM registrations WHERE {column} = $1");
        let row = self
            .bounded(sqlx::query(&sql).bind(value).fetch_optional(&self.pool))
            .await?;
        row.as_ref().map(Self::parse_record_row).transpose()
    }
}

/// Pool statistics for monitoring.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolStats {
    /// Current pool size.
    pub size: u32,
    /// Number of idle connections.
    pub idle: usize,
    /// Maximum pool size.
    pub max: u32,
}

fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
            Some("23505") => match db_err.constraint() {
                Some(USER_ID_CONSTRAINT) => StoreError::DuplicateKey(UniqueField::UserId),
                Some(REFERRAL_CODE_CONSTRAINT) => StoreError::DuplicateKey(UniqueField::ReferralCode),
                _ => StoreError::unavailable(&err),
            },
            Some("23503") | Some("23514") => StoreError::InvalidReference,
            _ => StoreError::unavailable(&err),
        },
        sqlx::Error::RowNotFound => StoreError::NotFound,
        _ => StoreError::unavailable(&err),
    }
}

#[async_trait]
impl RegistrationStore for PostgresRegistrationStore {
    async fn insert(&self, record: NewRegistration) -> Result<RegistrationRecord, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO registrations
                (user_id, referral_code, referred_by, display_name, email, affiliation, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {RECORD_COLUMNS}
            "#
        );
        let row = self
            .bounded(
                sqlx::query(&sql)
                    .bind(record.user_id.as_str())
                    .bind(record.referral_code.as_str())
                    .bind(record.referred_by.map(|id| id.as_uuid()))
                    .bind(&record.profile.display_name)
                    .bind(&record.profile.email)
                    .bind(&record.profile.affiliation)
                    .bind(record.created_at)
                    .fetch_one(&self.pool),
            )
            .await?;
        Self::parse_record_row(&row)
    }

    async fn find_by_code(&self, code: &ReferralCode) -> Result<Option<RegistrationRecord>, StoreError> {
        self.find_one("referral_code", code.as_str().to_string()).await
    }

    async fn find_by_user_id(&self, user_id: &UserId) -> Result<Option<RegistrationRecord>, StoreError> {
        self.find_one("user_id", user_id.as_str().to_string()).await
    }

    async fn find_by_id(&self, id: &RegistrationId) -> Result<Option<RegistrationRecord>, StoreError> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM registrations WHERE id = $1");
        let row = self
            .bounded(sqlx::query(&sql).bind(id.as_uuid()).fetch_optional(&self.pool))
            .await?;
        row.as_ref().map(Self::parse_record_row).transpose()
    }

    async fn find_by_ids(&self, ids: &[RegistrationId]) -> Result<Vec<RegistrationRecord>, StoreError> {
        let uuids: Vec<Uuid> = ids.iter().map(|id| id.as_uuid()).collect();
        let sql = format!("SELECT {RECORD_COLUMNS} FROM registrations WHERE id = ANY($1) ORDER BY id");
        let rows = self
            .bounded(sqlx::query(&sql).bind(&uuids).fetch_all(&self.pool))
            .await?;
        rows.iter().map(Self::parse_record_row).collect()
    }

    async fn update_referred_by(
        &self,
        id: &RegistrationId,
        referrer: &RegistrationId,
    ) -> Result<RegistrationRecord, StoreError> {
        let sql = format!(
            "UPDATE registrations SET referred_by = $2 WHERE id = $1 RETURNING {RECORD_COLUMNS}"
        );
        let row = self
            .bounded(
                sqlx::query(&sql)
                    .bind(id.as_uuid())
                    .bind(referrer.as_uuid())
                    .fetch_optional(&self.pool),
            )
            .await?;
        match row {
            Some(ref r) => Self::parse_record_row(r),
            None => Err(StoreError::NotFound),
        }
    }

    async fn scan_referred(&self) -> Result<Vec<ReferralEdge>, StoreError> {
        let rows = self
            .bounded(
                sqlx::query(
                    r#"
                    SELECT id, referred_by, created_at
                    FROM registrations
                    WHERE referred_by IS NOT NULL
                    ORDER BY id
                    "#,
                )
                .fetch_all(&self.pool),
            )
            .await?;

        rows.iter()
            .map(|row| {
                let referee: Uuid = row.try_get("id").map_err(StoreError::unavailable)?;
                let referred_by: Uuid = row.try_get("referred_by").map_err(StoreError::unavailable)?;
                let created_at: chrono::DateTime<chrono::Utc> =
                    row.try_get("created_at").map_err(StoreError::unavailable)?;
                Ok(ReferralEdge {
                    referred_by: RegistrationId::new(referred_by),
                    referee: RegistrationId::new(referee),
                    created_at,
                })
            })
            .collect()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.bounded(sqlx::query("SELECT 1").fetch_one(&self.pool))
            .await
            .map(|_| ())
    }
}
