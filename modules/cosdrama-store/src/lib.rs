//! Entity Store: the canonical competition, group and video tables the
//! ingestion pipeline resolves against and writes into.
//!
//! `PgEntityStore` talks to Postgres with `pg_trgm`; `MemoryEntityStore`
//! keeps everything in process for tests and dry runs.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod sql;
pub mod trigram;

pub use error::{Result, StoreError};
pub use memory::{MemoryEntityStore, MemoryStats, Scorer, StoredVideo};
pub use postgres::PgEntityStore;

use async_trait::async_trait;
use cosdrama_common::{CanonicalGroupEntity, CanonicalVideoRecord, EntityKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Best-scoring canonical entity for a free-text name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMatch {
    pub id: Uuid,
    pub name: String,
    pub similarity: f64,
}

/// What an upsert did. Both variants are successes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UpsertOutcome {
    /// No row had this `bv_number`; the record's id was written.
    Inserted { id: Uuid },
    /// A row already existed. `*_kept` is true when the stored foreign key
    /// was non-null and therefore left untouched.
    Merged {
        id: Uuid,
        competition_kept: bool,
        group_kept: bool,
    },
}

impl UpsertOutcome {
    /// Id of the row that now holds the video.
    pub fn id(&self) -> Uuid {
        match self {
            UpsertOutcome::Inserted { id } | UpsertOutcome::Merged { id, .. } => *id,
        }
    }
}

impl std::fmt::Display for UpsertOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpsertOutcome::Inserted { id } => write!(f, "inserted {id}"),
            UpsertOutcome::Merged {
                id,
                competition_kept,
                group_kept,
            } => write!(
                f,
                "merged into {id} (competition kept: {competition_kept}, group kept: {group_kept})"
            ),
        }
    }
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Highest-similarity entity of `kind` for `text`, or `None` when the
    /// table is empty. Ties resolve in store order.
    async fn find_best_match(&self, kind: EntityKind, text: &str) -> Result<Option<EntityMatch>>;

    /// Insert a group atomically and return the id that was persisted.
    async fn insert_group(&self, group: &CanonicalGroupEntity) -> Result<Uuid>;

    /// Insert the video, or merge into the existing row with the same
    /// `bv_number`: existing non-null foreign keys win, `updated_at` is
    /// refreshed, other columns are left as stored.
    async fn upsert_video(&self, record: &CanonicalVideoRecord) -> Result<UpsertOutcome>;

    /// The upsert as literal SQL, for audit output.
    fn describe_upsert(&self, record: &CanonicalVideoRecord) -> String {
        sql::render_video_upsert(record)
    }
}
