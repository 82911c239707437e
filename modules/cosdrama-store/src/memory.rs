//! In-process Entity Store.
//!
//! Scores names with the `pg_trgm`-compatible trigram function unless a
//! custom scorer is supplied, and can be told to fail lookups, the next
//! group insert or the next video upsert.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cosdrama_common::{CanonicalGroupEntity, CanonicalVideoRecord, EntityKind};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::{trigram, EntityMatch, EntityStore, UpsertOutcome};

/// `(candidate_name, query) -> similarity`.
pub type Scorer = Arc<dyn Fn(&str, &str) -> f64 + Send + Sync>;

/// A video row as the store holds it.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredVideo {
    pub id: Uuid,
    pub bv_number: String,
    pub title: String,
    pub description: String,
    pub url: String,
    pub thumbnail: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub competition_id: Option<Uuid>,
    pub group_id: Option<Uuid>,
    pub uploaded_by_id: Option<Uuid>,
    pub year: Option<i32>,
}

impl From<&CanonicalVideoRecord> for StoredVideo {
    fn from(r: &CanonicalVideoRecord) -> Self {
        Self {
            id: r.id,
            bv_number: r.external_id.clone(),
            title: r.title.clone(),
            description: r.description.clone(),
            url: r.url.clone(),
            thumbnail: r.thumbnail.clone(),
            created_at: r.created_at,
            updated_at: r.updated_at,
            competition_id: r.competition_id,
            group_id: r.group_id,
            uploaded_by_id: r.uploader_id,
            year: r.year,
        }
    }
}

#[derive(Default)]
struct Tables {
    competitions: Vec<(Uuid, String)>,
    groups: Vec<CanonicalGroupEntity>,
    videos: Vec<StoredVideo>,
}

#[derive(Default)]
struct Faults {
    fail_next_group_insert: bool,
    fail_next_upsert: bool,
    failing_lookups: HashSet<EntityKind>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStats {
    pub competition_lookups: usize,
    pub group_lookups: usize,
    pub group_commits: usize,
    pub group_rollbacks: usize,
    pub upserts: usize,
}

pub struct MemoryEntityStore {
    tables: Mutex<Tables>,
    faults: Mutex<Faults>,
    stats: Mutex<MemoryStats>,
    scorer: Scorer,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

impl Default for MemoryEntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            faults: Mutex::new(Faults::default()),
            stats: Mutex::new(MemoryStats::default()),
            scorer: Arc::new(trigram::similarity),
        }
    }

    /// Replace the similarity function.
    pub fn with_scorer<F>(mut self, scorer: F) -> Self
    where
        F: Fn(&str, &str) -> f64 + Send + Sync + 'static,
    {
        self.scorer = Arc::new(scorer);
        self
    }

    pub fn with_competition(self, name: &str) -> Self {
        self.add_competition(name);
        self
    }

    pub fn with_group(self, name: &str) -> Self {
        self.add_group(name);
        self
    }

    pub fn add_competition(&self, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        lock(&self.tables).competitions.push((id, name.to_string()));
        id
    }

    pub fn add_group(&self, name: &str) -> Uuid {
        let group = CanonicalGroupEntity::placeholder(name, Utc::now());
        let id = group.id;
        lock(&self.tables).groups.push(group);
        id
    }

    // --- fault injection ---

    /// The next `insert_group` fails after the row was staged.
    pub fn fail_next_group_insert(&self) {
        lock(&self.faults).fail_next_group_insert = true;
    }

    /// The next `upsert_video` fails without touching the table.
    pub fn fail_next_upsert(&self) {
        lock(&self.faults).fail_next_upsert = true;
    }

    /// Every lookup of `kind` fails until cleared.
    pub fn fail_lookups_for(&self, kind: EntityKind) {
        lock(&self.faults).failing_lookups.insert(kind);
    }

    pub fn clear_faults(&self) {
        *lock(&self.faults) = Faults::default();
    }

    // --- inspection ---

    pub fn competitions(&self) -> Vec<(Uuid, String)> {
        lock(&self.tables).competitions.clone()
    }

    pub fn groups(&self) -> Vec<CanonicalGroupEntity> {
        lock(&self.tables).groups.clone()
    }

    pub fn group_named(&self, name: &str) -> Option<CanonicalGroupEntity> {
        lock(&self.tables)
            .groups
            .iter()
            .find(|g| g.name == name)
            .cloned()
    }

    pub fn videos(&self) -> Vec<StoredVideo> {
        lock(&self.tables).videos.clone()
    }

    pub fn video(&self, bv_number: &str) -> Option<StoredVideo> {
        lock(&self.tables)
            .videos
            .iter()
            .find(|v| v.bv_number == bv_number)
            .cloned()
    }

    pub fn stats(&self) -> MemoryStats {
        *lock(&self.stats)
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn find_best_match(&self, kind: EntityKind, text: &str) -> Result<Option<EntityMatch>> {
        {
            let mut stats = lock(&self.stats);
            match kind {
                EntityKind::Competition => stats.competition_lookups += 1,
                EntityKind::Group => stats.group_lookups += 1,
            }
        }

        if lock(&self.faults).failing_lookups.contains(&kind) {
            return Err(StoreError::LookupFailed(format!(
                "injected failure for {} lookup",
                kind.table_name()
            )));
        }

        let tables = lock(&self.tables);
        let candidates: Vec<(Uuid, &str)> = match kind {
            EntityKind::Competition => tables
                .competitions
                .iter()
                .map(|(id, name)| (*id, name.as_str()))
                .collect(),
            EntityKind::Group => tables
                .groups
                .iter()
                .map(|g| (g.id, g.name.as_str()))
                .collect(),
        };

        // first maximum in insertion order wins ties; unscorable names never match
        let mut best: Option<EntityMatch> = None;
        for (id, name) in candidates {
            let score = (self.scorer)(name, text);
            if score.is_nan() {
                continue;
            }
            if best.as_ref().map_or(true, |b| score > b.similarity) {
                best = Some(EntityMatch {
                    id,
                    name: name.to_string(),
                    similarity: score,
                });
            }
        }

        Ok(best)
    }

    async fn insert_group(&self, group: &CanonicalGroupEntity) -> Result<Uuid> {
        // begin: stage the row outside the visible table
        let staged = group.clone();

        let injected = std::mem::take(&mut lock(&self.faults).fail_next_group_insert);
        if injected {
            // rollback: the staged row is discarded
            drop(staged);
            lock(&self.stats).group_rollbacks += 1;
            return Err(StoreError::InsertFailed(format!(
                "injected failure inserting group '{}'",
                group.name
            )));
        }

        // commit
        let id = staged.id;
        lock(&self.tables).groups.push(staged);
        lock(&self.stats).group_commits += 1;
        Ok(id)
    }

    async fn upsert_video(&self, record: &CanonicalVideoRecord) -> Result<UpsertOutcome> {
        lock(&self.stats).upserts += 1;
        if std::mem::take(&mut lock(&self.faults).fail_next_upsert) {
            return Err(StoreError::InsertFailed(format!(
                "injected failure upserting video '{}'",
                record.external_id
            )));
        }
        let mut tables = lock(&self.tables);

        if let Some(existing) = tables
            .videos
            .iter_mut()
            .find(|v| v.bv_number == record.external_id)
        {
            let competition_kept = existing.competition_id.is_some();
            let group_kept = existing.group_id.is_some();
            existing.competition_id = existing.competition_id.or(record.competition_id);
            existing.group_id = existing.group_id.or(record.group_id);
            existing.updated_at = record.updated_at;
            return Ok(UpsertOutcome::Merged {
                id: existing.id,
                competition_kept,
                group_kept,
            });
        }

        tables.videos.push(StoredVideo::from(record));
        Ok(UpsertOutcome::Inserted { id: record.id })
    }
}
