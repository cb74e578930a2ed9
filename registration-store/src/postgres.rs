//! A store driver backed by a PostgreSQL table.

use std::time::Duration;

use chrono::{DateTime, Utc};
use secret::Secret;
use serde::Deserialize;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::types::Json;
use uuid::Uuid;

use registration_driver::{
    DeleteMatch, Driver, Extra, Listing, Page, Registration, RegistrationUpdate, StoreError,
    StoreErrorKind, UniqueField,
};

const ENGINE: &str = "postgres";

const UID_CONSTRAINT: &str = "registrations_uid_key";
const DISPLAY_NAME_CONSTRAINT: &str = "registrations_display_name_key";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS registrations (
    seq          BIGSERIAL PRIMARY KEY,
    id           UUID NOT NULL,
    org_id       TEXT NOT NULL,
    uid          TEXT NOT NULL CONSTRAINT registrations_uid_key UNIQUE,
    display_name TEXT NOT NULL CONSTRAINT registrations_display_name_key UNIQUE,
    extra        JSONB NOT NULL DEFAULT '{}'::jsonb,
    created_at   TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS registrations_org_created_idx
    ON registrations (org_id, created_at DESC, seq DESC);
"#;

const DELETE_EITHER: &str = r#"
DELETE FROM registrations
WHERE seq = (
    SELECT seq FROM registrations
    WHERE org_id = $1 OR uid = $2
    ORDER BY created_at ASC, seq ASC
    LIMIT 1
)
"#;

const DELETE_BOTH: &str = r#"
DELETE FROM registrations
WHERE org_id = $1 AND uid = $2
"#;

fn default_host() -> String {
    "localhost".into()
}

fn default_port() -> u16 {
    5432
}

fn default_user() -> String {
    "postgres".into()
}

fn default_database() -> String {
    "mbop".into()
}

fn default_max_connections() -> u32 {
    5
}

fn default_acquire_timeout_secs() -> u64 {
    30
}

fn default_ensure_schema() -> bool {
    true
}

/// Connection settings for [`PostgresStore`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PostgresConfig {
    /// Database host.
    #[serde(default = "default_host")]
    pub host: String,

    /// Database port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Database user.
    #[serde(default = "default_user")]
    pub user: String,

    /// Database password. Empty means no password is sent.
    #[serde(default)]
    pub password: Secret,

    /// Database name.
    #[serde(default = "default_database")]
    pub database: String,

    /// Upper bound on pooled connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long to wait for a pooled connection before failing.
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,

    /// Create the `registrations` table on connect if it is missing.
    #[serde(default = "default_ensure_schema")]
    pub ensure_schema: bool,

    /// How deletes match their keys.
    #[serde(default)]
    pub delete_match: DeleteMatch,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            user: default_user(),
            password: Secret::default(),
            database: default_database(),
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
            ensure_schema: default_ensure_schema(),
            delete_match: DeleteMatch::default(),
        }
    }
}

impl PostgresConfig {
    /// The sqlx connection options for these settings.
    pub fn connect_options(&self) -> PgConnectOptions {
        let options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .database(&self.database);

        if self.password.is_empty() {
            options
        } else {
            options.password(self.password.revealed())
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RegistrationRow {
    org_id: String,
    uid: String,
    display_name: String,
    extra: Json<Extra>,
    created_at: DateTime<Utc>,
}

impl From<RegistrationRow> for Registration {
    fn from(row: RegistrationRow) -> Self {
        Registration {
            org_id: row.org_id,
            uid: row.uid,
            display_name: row.display_name,
            extra: row.extra.0,
            created_at: row.created_at,
        }
    }
}

fn backend(context: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |err| {
        StoreError::builder(ENGINE, StoreErrorKind::Backend, err)
            .context(context)
            .build()
    }
}

/// The unique field guarded by `constraint`, if it is one of ours.
fn unique_field(constraint: Option<&str>) -> Option<UniqueField> {
    match constraint? {
        UID_CONSTRAINT => Some(UniqueField::Uid),
        DISPLAY_NAME_CONSTRAINT => Some(UniqueField::DisplayName),
        _ => None,
    }
}

/// Translate an insert failure, recognising the two uniqueness constraints.
fn insert_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            if let Some(field) = unique_field(db.constraint()) {
                tracing::warn!(%field, "rejected registration");
                return StoreError::already_exists(ENGINE, field);
            }
        }
    }

    backend("insert registration")(err)
}

/// A lookup key as a query parameter.
///
/// PostgreSQL rejects NUL in text parameters and no stored key can hold one,
/// so such a key is bound as `NULL`, which never compares equal.
fn key(value: &str) -> Option<&str> {
    (!value.contains('\0')).then_some(value)
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Store driver backed by PostgreSQL.
///
/// Uniqueness of `uid` and `display_name` is enforced by table constraints,
/// so a create is a single insert with no read-then-write window.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    delete_match: DeleteMatch,
}

impl PostgresStore {
    /// Wrap an existing pool. The schema is not checked.
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            delete_match: DeleteMatch::default(),
        }
    }

    /// Set the delete policy.
    pub fn with_delete_match(mut self, delete_match: DeleteMatch) -> Self {
        self.delete_match = delete_match;
        self
    }

    /// Connect a pool with `config`, creating the table if asked to.
    #[tracing::instrument(skip(config), fields(host = %config.host, database = %config.database))]
    pub async fn connect(config: &PostgresConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect_with(config.connect_options())
            .await
            .map_err(backend("connect"))?;

        tracing::debug!("connected to postgres");
        let store = Self::from_pool(pool).with_delete_match(config.delete_match);
        if config.ensure_schema {
            store.ensure_schema().await?;
        }

        Ok(store)
    }

    /// Create the `registrations` table and its index if they do not exist.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(backend("ensure schema"))?;
        Ok(())
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait::async_trait]
impl Driver for PostgresStore {
    fn name(&self) -> &'static str {
        ENGINE
    }

    async fn all(&self, org_id: &str, page: Page) -> Result<Listing, StoreError> {
        let rows = sqlx::query_as::<_, RegistrationRow>(
            r#"
            SELECT org_id, uid, display_name, extra, created_at
            FROM registrations
            WHERE org_id = $1
            ORDER BY created_at DESC, seq DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(key(org_id))
        .bind(page.limit().map(to_i64))
        .bind(to_i64(page.offset))
        .fetch_all(&self.pool)
        .await
        .map_err(backend("list registrations"))?;

        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM registrations WHERE org_id = $1")
                .bind(key(org_id))
                .fetch_one(&self.pool)
                .await
                .map_err(backend("count registrations"))?;

        tracing::trace!(%org_id, total, "list postgres registrations");
        Ok(Listing {
            registrations: rows.into_iter().map(Registration::from).collect(),
            total: usize::try_from(total)
                .map_err(StoreError::with(ENGINE, StoreErrorKind::Backend))?,
        })
    }

    async fn find(&self, org_id: &str, uid: &str) -> Result<Registration, StoreError> {
        sqlx::query_as::<_, RegistrationRow>(
            r#"
            SELECT org_id, uid, display_name, extra, created_at
            FROM registrations
            WHERE org_id = $1 AND uid = $2
            "#,
        )
        .bind(key(org_id))
        .bind(key(uid))
        .fetch_optional(&self.pool)
        .await
        .map_err(backend("find registration"))?
        .map(Registration::from)
        .ok_or_else(|| StoreError::not_found(ENGINE, Some(org_id), uid))
    }

    async fn find_by_uid(&self, uid: &str) -> Result<Registration, StoreError> {
        sqlx::query_as::<_, RegistrationRow>(
            r#"
            SELECT org_id, uid, display_name, extra, created_at
            FROM registrations
            WHERE uid = $1
            "#,
        )
        .bind(key(uid))
        .fetch_optional(&self.pool)
        .await
        .map_err(backend("find registration by uid"))?
        .map(Registration::from)
        .ok_or_else(|| StoreError::not_found(ENGINE, None, uid))
    }

    async fn create(&self, registration: &Registration) -> Result<String, StoreError> {
        if registration.contains_nul() {
            return Err(StoreError::nul_text(ENGINE, &registration.uid));
        }

        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO registrations (id, org_id, uid, display_name, extra, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(id)
        .bind(&registration.org_id)
        .bind(&registration.uid)
        .bind(&registration.display_name)
        .bind(Json(&registration.extra))
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(insert_error)?;

        tracing::debug!(%id, uid = %registration.uid, "created registration");
        Ok(id.to_string())
    }

    async fn update(
        &self,
        registration: &Registration,
        update: &RegistrationUpdate,
    ) -> Result<(), StoreError> {
        if update.contains_nul() {
            return Err(StoreError::nul_text(ENGINE, &registration.uid));
        }

        let result = sqlx::query(
            r#"
            UPDATE registrations
            SET extra = COALESCE($3, extra)
            WHERE org_id = $1 AND uid = $2
            "#,
        )
        .bind(key(&registration.org_id))
        .bind(key(&registration.uid))
        .bind(update.extra.as_ref().map(Json))
        .execute(&self.pool)
        .await
        .map_err(backend("update registration"))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(
                ENGINE,
                Some(&registration.org_id),
                &registration.uid,
            ));
        }

        Ok(())
    }

    async fn delete(&self, org_id: &str, uid: &str) -> Result<(), StoreError> {
        let statement = match self.delete_match {
            DeleteMatch::Either => DELETE_EITHER,
            DeleteMatch::Both => DELETE_BOTH,
        };

        let result = sqlx::query(statement)
            .bind(key(org_id))
            .bind(key(uid))
            .execute(&self.pool)
            .await
            .map_err(backend("delete registration"))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(ENGINE, Some(org_id), uid));
        }

        tracing::debug!(%org_id, %uid, "deleted registration");
        Ok(())
    }
}
