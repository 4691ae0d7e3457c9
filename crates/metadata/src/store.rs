//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataResult, is_unique_violation};
use crate::models::{ImageRow, ResolvedImageRow};
use crate::repos::ImageRepo;
use crate::repos::images::{
    ClaimOutcome, ClaimToken, check_locator, settle_unmatched_resolve, settle_unmatched_unclaim,
};
use almanac_core::ImageDate;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: ImageRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (creating if needed) a SQLite database and apply the schema.
    pub async fn new(path: impl AsRef<Path>, busy_timeout_secs: Option<u64>) -> MetadataResult<Self> {
        let path = path.as_ref();
        let busy_timeout = Duration::from_secs(busy_timeout_secs.unwrap_or(30));

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            // Prevent transient "database is locked" errors when several
            // processes share one database file.
            .busy_timeout(busy_timeout);

        let pool = SqlitePoolOptions::new()
            // One connection serializes writers inside this process.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        tracing::debug!(path = %path.display(), "opened SQLite record store");

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ImageRepo for SqliteStore {
    async fn claim_image(
        &self,
        date: ImageDate,
        claimed_at: OffsetDateTime,
    ) -> MetadataResult<ClaimOutcome> {
        let token = ClaimToken::generate();
        let result = sqlx::query(
            r#"
            INSERT INTO images (image_date, locator, claimed_at, resolved_at, claim_token)
            VALUES (?, NULL, ?, NULL, ?)
            ON CONFLICT(image_date) DO NOTHING
            "#,
        )
        .bind(date.as_date())
        .bind(claimed_at)
        .bind(token.as_uuid())
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() > 0 => Ok(ClaimOutcome::Claimed(token)),
            Ok(_) => Ok(ClaimOutcome::AlreadyClaimed),
            Err(e) if is_unique_violation(&e) => Ok(ClaimOutcome::AlreadyClaimed),
            Err(e) => Err(e.into()),
        }
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
            UPDATE images SET locator = ?, resolved_at = ?
            WHERE image_date = ? AND claim_token = ? AND locator IS NULL
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
            "DELETE FROM images WHERE image_date = ? AND claim_token = ? AND locator IS NULL",
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
        let row = sqlx::query_as::<_, ImageRow>("SELECT * FROM images WHERE image_date = ?")
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
        // Timestamps are stored as RFC 3339 text whose fractional part varies
        // in length, so the age comparison happens here rather than in SQL.
        let mut tx = self.pool.begin().await?;

        let pending = sqlx::query_as::<_, ImageRow>("SELECT * FROM images WHERE locator IS NULL")
            .fetch_all(&mut *tx)
            .await?;

        let mut released = 0;
        for row in pending.iter().filter(|row| row.claimed_at < older_than) {
            let result =
                sqlx::query("DELETE FROM images WHERE image_date = ? AND locator IS NULL")
                    .bind(row.image_date)
                    .execute(&mut *tx)
                    .await?;
            released += result.rows_affected();
        }

        tx.commit().await?;
        Ok(released)
    }
}

/// SQL schema for SQLite.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS images (
    image_date TEXT PRIMARY KEY NOT NULL,
    locator TEXT,
    claimed_at TEXT NOT NULL,
    resolved_at TEXT,
    claim_token BLOB NOT NULL,
    CHECK (locator IS NULL OR length(locator) > 0),
    CHECK ((locator IS NULL) = (resolved_at IS NULL))
);

CREATE INDEX IF NOT EXISTS idx_images_pending
    ON images (claimed_at) WHERE locator IS NULL;
"#;
