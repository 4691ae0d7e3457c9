//! PostgreSQL-based metadata store implementation.

use crate::error::{MetadataError, MetadataResult, is_serialization_failure, is_unique_violation};
use crate::models::{ImageRow, ResolvedImageRow};
use crate::repos::ImageRepo;
use crate::repos::images::{
    ClaimOutcome, ClaimToken, check_locator, settle_unmatched_resolve, settle_unmatched_unclaim,
};
use crate::store::MetadataStore;
use almanac_core::ImageDate;
use almanac_core::config::PgSslMode;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode as SqlxPgSslMode};
use sqlx::{Pool, Postgres};
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

/// Attempts for a claim transaction that keeps losing serialization conflicts.
const CLAIM_MAX_ATTEMPTS: u32 = 5;

/// Base backoff between claim retries; doubled on each attempt.
const CLAIM_RETRY_BACKOFF: Duration = Duration::from_millis(10);

fn postgres_schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                return None;
            }
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

/// PostgreSQL-based metadata store.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Create a new PostgreSQL store from a connection URL.
    pub async fn from_url(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    /// Create a new PostgreSQL store from individual connection parameters.
    ///
    /// This allows credentials to be passed separately, enabling better
    /// secret management (e.g., passwords via environment variables).
    #[allow(clippy::too_many_arguments)]
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        ssl_mode: Option<PgSslMode>,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }

        if let Some(pass) = password {
            opts = opts.password(pass);
        }

        if let Some(mode) = ssl_mode {
            let sqlx_mode = match mode {
                PgSslMode::Disable => SqlxPgSslMode::Disable,
                PgSslMode::Prefer => SqlxPgSslMode::Prefer,
                PgSslMode::Require => SqlxPgSslMode::Require,
            };
            opts = opts.ssl_mode(sqlx_mode);
        }

        // Log connection info without password
        tracing::info!(
            host = host,
            port = port,
            database = database,
            username = username.unwrap_or("<none>"),
            ssl_mode = ?ssl_mode,
            "Connecting to PostgreSQL with individual parameters"
        );

        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    async fn connect(
        mut opts: PgConnectOptions,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        if let Some(timeout_ms) = statement_timeout_ms {
            opts = opts.options([("statement_timeout", format!("{}ms", timeout_ms))]);
            tracing::info!("PostgreSQL statement_timeout set to {}ms", timeout_ms);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    /// One SERIALIZABLE insert-if-absent attempt.
    async fn try_claim(
        &self,
        date: ImageDate,
        claimed_at: OffsetDateTime,
    ) -> Result<ClaimOutcome, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;

        let token = ClaimToken::generate();
        let result = sqlx::query(
            r#"
            INSERT INTO images (image_date, locator, claimed_at, resolved_at, claim_token)
            VALUES ($1, NULL, $2, NULL, $3)
            ON CONFLICT (image_date) DO NOTHING
            "#,
        )
        .bind(date.as_date())
        .bind(claimed_at)
        .bind(token.as_uuid())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(if result.rows_affected() > 0 {
            ClaimOutcome::Claimed(token)
        } else {
            ClaimOutcome::AlreadyClaimed
        })
    }
}

#[async_trait]
impl MetadataStore for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        // PostgreSQL doesn't allow multiple statements in a single prepared statement,
        // so we split the schema and execute each statement separately.
        for statement in postgres_schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ImageRepo for PostgresStore {
    async fn claim_image(
        &self,
        date: ImageDate,
        claimed_at: OffsetDateTime,
    ) -> MetadataResult<ClaimOutcome> {
        let mut backoff = CLAIM_RETRY_BACKOFF;
        for attempt in 1..=CLAIM_MAX_ATTEMPTS {
            match self.try_claim(date, claimed_at).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if is_unique_violation(&e) => return Ok(ClaimOutcome::AlreadyClaimed),
                Err(e) if is_serialization_failure(&e) && attempt < CLAIM_MAX_ATTEMPTS => {
                    tracing::debug!(%date, attempt, "claim lost a serialization conflict, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(MetadataError::Internal(format!(
            "claim for image {date} kept failing serialization after {CLAIM_MAX_ATTEMPTS} attempts"
        )))
    }

    async fn resolve_image(
        &self,
        date: ImageDate,
        token: ClaimToken,
        locator: &str,
        resolved_at: OffsetDateTime,
    ) -> MetadataResult<()> {
        check_locator(date, locator)?;

        let result = sqlx::query(
            r#"
            UPDATE images SET locator = $1, resolved_at = $2
            WHERE image_date = $3 AND claim_token = $4 AND locator IS NULL
            "#,
        )
        .bind(locator)
        .bind(resolved_at)
        .bind(date.as_date())
        .bind(token.as_uuid())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }
        settle_unmatched_resolve(date, token, locator, self.get_image_row(date).await?)
    }

    async fn unclaim_image(&self, date: ImageDate, token: ClaimToken) -> MetadataResult<()> {
        let result = sqlx::query(
            "DELETE FROM images WHERE image_date = $1 AND claim_token = $2 AND locator IS NULL",
        )
        .bind(date.as_date())
        .bind(token.as_uuid())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }
        settle_unmatched_unclaim(date, token, self.get_image_row(date).await?)
    }

    async fn get_image_row(&self, date: ImageDate) -> MetadataResult<Option<ImageRow>> {
        let row = sqlx::query_as::<_, ImageRow>("SELECT * FROM images WHERE image_date = $1")
            .bind(date.as_date())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn list_resolved_images(&self) -> MetadataResult<Vec<ResolvedImageRow>> {
        let rows = sqlx::query_as::<_, ResolvedImageRow>(
            "SELECT image_date, locator FROM images WHERE locator IS NOT NULL ORDER BY image_date",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn release_stale_claims(&self, older_than: OffsetDateTime) -> MetadataResult<u64> {
        let result = sqlx::query("DELETE FROM images WHERE locator IS NULL AND claimed_at < $1")
            .bind(older_than)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
