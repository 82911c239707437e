// Postgres-backed Entity Store. Similarity comes from the pg_trgm extension.

use std::time::Duration;

use async_trait::async_trait;
use cosdrama_common::{CanonicalGroupEntity, CanonicalVideoRecord, EntityKind};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::{sql, EntityMatch, EntityStore, UpsertOutcome};

#[derive(Clone)]
pub struct PgEntityStore {
    pool: PgPool,
}

impl PgEntityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Make sure `similarity()` exists. Run once at startup.
    pub async fn ensure_extensions(&self) -> Result<()> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS pg_trgm")
            .execute(&self.pool)
            .await?;
        debug!("pg_trgm extension available");
        Ok(())
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Entity store migrations applied");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

/// `id, name, sim` from a similarity lookup. A NULL similarity decodes as
/// NaN, which never passes a threshold.
fn decode_match_row(row: &PgRow) -> Result<EntityMatch> {
    let shape = "entity match";
    let id: Uuid = row.try_get("id").map_err(|e| StoreError::malformed(shape, e))?;
    let name: String = row
        .try_get("name")
        .map_err(|e| StoreError::malformed(shape, e))?;
    let sim: Option<f32> = row
        .try_get("sim")
        .map_err(|e| StoreError::malformed(shape, e))?;

    Ok(EntityMatch {
        id,
        name,
        similarity: sim.map(f64::from).unwrap_or(f64::NAN),
    })
}

/// `id, inserted, competition_kept, group_kept` from the video upsert.
fn decode_upsert_row(row: &PgRow) -> Result<UpsertOutcome> {
    let shape = "video upsert";
    let id: Uuid = row.try_get("id").map_err(|e| StoreError::malformed(shape, e))?;
    let inserted: bool = row
        .try_get("inserted")
        .map_err(|e| StoreError::malformed(shape, e))?;

    if inserted {
        return Ok(UpsertOutcome::Inserted { id });
    }

    let competition_kept: bool = row
        .try_get("competition_kept")
        .map_err(|e| StoreError::malformed(shape, e))?;
    let group_kept: bool = row
        .try_get("group_kept")
        .map_err(|e| StoreError::malformed(shape, e))?;

    Ok(UpsertOutcome::Merged {
        id,
        competition_kept,
        group_kept,
    })
}

// ---------------------------------------------------------------------------
// EntityStore
// ---------------------------------------------------------------------------

#[async_trait]
impl EntityStore for PgEntityStore {
    async fn find_best_match(&self, kind: EntityKind, text: &str) -> Result<Option<EntityMatch>> {
        let query = format!(
            "SELECT id, name, similarity(name, $1) AS sim FROM {} ORDER BY sim DESC NULLS LAST LIMIT 1",
            kind.table_name()
        );

        let row = sqlx::query(&query)
            .bind(text)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(decode_match_row).transpose()
    }

    async fn insert_group(&self, group: &CanonicalGroupEntity) -> Result<Uuid> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO groups_group
                (id, name, description, location, website, email, phone, weibo, wechat,
                 qq_group, bilibili, is_active, video_count, award_count,
                 created_at, updated_at, city, province)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            RETURNING id
            "#,
        )
        .bind(group.id)
        .bind(&group.name)
        .bind(&group.description)
        .bind(&group.location)
        .bind(&group.website)
        .bind(&group.email)
        .bind(&group.phone)
        .bind(&group.weibo)
        .bind(&group.wechat)
        .bind(&group.qq_group)
        .bind(&group.bilibili)
        .bind(group.is_active)
        .bind(group.video_count)
        .bind(group.award_count)
        .bind(group.created_at)
        .bind(group.updated_at)
        .bind(&group.city)
        .bind(&group.province)
        .fetch_one(&mut *tx)
        .await;

        match inserted {
            Ok(id) => {
                tx.commit().await?;
                Ok(id)
            }
            Err(e) => {
                if let Err(rb) = tx.rollback().await {
                    warn!(group = %group.name, error = %rb, "Rollback after failed group insert also failed");
                }
                Err(StoreError::InsertFailed(e.to_string()))
            }
        }
    }

    async fn upsert_video(&self, record: &CanonicalVideoRecord) -> Result<UpsertOutcome> {
        let statement = sql::video_upsert_statement();
        let row = sqlx::query(&statement)
            .bind(record.id)
            .bind(&record.external_id)
            .bind(&record.title)
            .bind(&record.description)
            .bind(&record.url)
            .bind(&record.thumbnail)
            .bind(record.created_at)
            .bind(record.updated_at)
            .bind(record.competition_id)
            .bind(record.group_id)
            .bind(record.uploader_id)
            .bind(record.year)
            .fetch_one(&self.pool)
            .await?;

        decode_upsert_row(&row)
    }
}
