// Test mocks for the ingestion pipeline.
//
// Two mocks matching the two outward trait boundaries:
// - MockVideoSource (VideoSource): bucket -> search hits, id -> detail
// - MockExtractor (MentionExtractor): title -> mentions
//
// The Entity Store side uses cosdrama_store::MemoryEntityStore directly,
// optionally wrapped in SlowStore to push calls past a deadline.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use cosdrama_common::{
    CanonicalGroupEntity, CanonicalVideoRecord, DurationBucket, EntityKind, ExtractedMentions,
    SearchResultItem, VideoDetail,
};
use cosdrama_store::{EntityMatch, EntityStore, UpsertOutcome};
use uuid::Uuid;

use crate::extractor::MentionExtractor;
use crate::traits::{SearchQuery, SourceError, VideoSource};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

// ---------------------------------------------------------------------------
// MockVideoSource
// ---------------------------------------------------------------------------

/// Unregistered buckets return no hits; unregistered videos are not found.
/// Builder pattern: `.on_search()`, `.failing_bucket()`, `.slow_bucket()`,
/// `.on_detail()`, `.failing_detail()`, `.slow_detail()`.
#[derive(Default)]
pub struct MockVideoSource {
    searches: HashMap<DurationBucket, Vec<SearchResultItem>>,
    failing_buckets: HashSet<DurationBucket>,
    slow_buckets: HashMap<DurationBucket, Duration>,
    details: HashMap<String, VideoDetail>,
    failing_details: HashSet<String>,
    slow_details: HashMap<String, Duration>,
    search_calls: Mutex<Vec<(SearchQuery, DurationBucket)>>,
    detail_calls: Mutex<Vec<String>>,
}

impl MockVideoSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_search(mut self, bucket: DurationBucket, items: Vec<SearchResultItem>) -> Self {
        self.searches.entry(bucket).or_default().extend(items);
        self
    }

    pub fn failing_bucket(mut self, bucket: DurationBucket) -> Self {
        self.failing_buckets.insert(bucket);
        self
    }

    /// Searches of `bucket` sleep for `delay` before answering.
    pub fn slow_bucket(mut self, bucket: DurationBucket, delay: Duration) -> Self {
        self.slow_buckets.insert(bucket, delay);
        self
    }

    pub fn on_detail(mut self, detail: VideoDetail) -> Self {
        self.details.insert(detail.external_id.clone(), detail);
        self
    }

    /// Detail requests for `external_id` fail with a transient error.
    pub fn failing_detail(mut self, external_id: &str) -> Self {
        self.failing_details.insert(external_id.to_string());
        self
    }

    pub fn slow_detail(mut self, external_id: &str, delay: Duration) -> Self {
        self.slow_details.insert(external_id.to_string(), delay);
        self
    }

    pub fn search_calls(&self) -> Vec<(SearchQuery, DurationBucket)> {
        lock(&self.search_calls).clone()
    }

    pub fn detail_calls(&self) -> Vec<String> {
        lock(&self.detail_calls).clone()
    }
}

#[async_trait]
impl VideoSource for MockVideoSource {
    async fn search_bucket(
        &self,
        query: &SearchQuery,
        bucket: DurationBucket,
    ) -> Result<Vec<SearchResultItem>, SourceError> {
        lock(&self.search_calls).push((query.clone(), bucket));
        if let Some(delay) = self.slow_buckets.get(&bucket) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing_buckets.contains(&bucket) {
            return Err(SourceError::Unavailable(format!(
                "MockVideoSource: bucket {bucket} configured to fail"
            )));
        }
        Ok(self.searches.get(&bucket).cloned().unwrap_or_default())
    }

    async fn video_detail(&self, external_id: &str) -> Result<VideoDetail, SourceError> {
        lock(&self.detail_calls).push(external_id.to_string());
        if let Some(delay) = self.slow_details.get(external_id) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing_details.contains(external_id) {
            return Err(SourceError::Unavailable(format!(
                "MockVideoSource: detail {external_id} configured to fail"
            )));
        }
        self.details.get(external_id).cloned().ok_or_else(|| {
            SourceError::NotFound(format!("MockVideoSource: no detail registered for {external_id}"))
        })
    }
}

// ---------------------------------------------------------------------------
// MockExtractor
// ---------------------------------------------------------------------------

/// Title-keyed mention extractor. Unregistered titles get the default
/// (all `None` unless `.with_default()` says otherwise).
#[derive(Default)]
pub struct MockExtractor {
    results: HashMap<String, ExtractedMentions>,
    failing: HashSet<String>,
    default_result: ExtractedMentions,
    delay: Option<Duration>,
    calls: Mutex<usize>,
}

impl MockExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_title(mut self, title: &str, mentions: ExtractedMentions) -> Self {
        self.results.insert(title.to_string(), mentions);
        self
    }

    pub fn failing_on(mut self, title: &str) -> Self {
        self.failing.insert(title.to_string());
        self
    }

    pub fn with_default(mut self, mentions: ExtractedMentions) -> Self {
        self.default_result = mentions;
        self
    }

    /// Every call sleeps for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of extraction calls made so far.
    pub fn calls(&self) -> usize {
        *lock(&self.calls)
    }
}

#[async_trait]
impl MentionExtractor for MockExtractor {
    async fn extract(&self, title: &str, _description: &str) -> Result<ExtractedMentions> {
        *lock(&self.calls) += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.contains(title) {
            bail!("MockExtractor: extraction configured to fail for '{title}'");
        }
        Ok(self
            .results
            .get(title)
            .cloned()
            .unwrap_or_else(|| self.default_result.clone()))
    }
}

// ---------------------------------------------------------------------------
// SlowStore
// ---------------------------------------------------------------------------

/// Delegates to another store after sleeping. Builder pattern:
/// `.slow_lookups()`, `.slow_inserts()`.
pub struct SlowStore {
    inner: Arc<dyn EntityStore>,
    lookup_delay: Duration,
    insert_delay: Duration,
}

impl SlowStore {
    pub fn new(inner: Arc<dyn EntityStore>) -> Self {
        Self {
            inner,
            lookup_delay: Duration::ZERO,
            insert_delay: Duration::ZERO,
        }
    }

    pub fn slow_lookups(mut self, delay: Duration) -> Self {
        self.lookup_delay = delay;
        self
    }

    /// Applies to group inserts only; video upserts stay fast.
    pub fn slow_inserts(mut self, delay: Duration) -> Self {
        self.insert_delay = delay;
        self
    }
}

#[async_trait]
impl EntityStore for SlowStore {
    async fn find_best_match(
        &self,
        kind: EntityKind,
        text: &str,
    ) -> cosdrama_store::Result<Option<EntityMatch>> {
        tokio::time::sleep(self.lookup_delay).await;
        self.inner.find_best_match(kind, text).await
    }

    async fn insert_group(&self, group: &CanonicalGroupEntity) -> cosdrama_store::Result<Uuid> {
        tokio::time::sleep(self.insert_delay).await;
        self.inner.insert_group(group).await
    }

    async fn upsert_video(
        &self,
        record: &CanonicalVideoRecord,
    ) -> cosdrama_store::Result<UpsertOutcome> {
        self.inner.upsert_video(record).await
    }

    fn describe_upsert(&self, record: &CanonicalVideoRecord) -> String {
        self.inner.describe_upsert(record)
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn search_item(external_id: &str, title: &str, published_at: Option<DateTime<Utc>>) -> SearchResultItem {
    SearchResultItem {
        external_id: external_id.to_string(),
        title: title.to_string(),
        published_at,
    }
}

/// A detail published 2024-06-01 00:00:00 UTC.
pub fn video_detail(external_id: &str, title: &str, description: &str) -> VideoDetail {
    VideoDetail {
        external_id: external_id.to_string(),
        title: title.to_string(),
        description: description.to_string(),
        cover_url: format!("https://i0.hdslb.com/bfs/archive/{external_id}.jpg"),
        publish_timestamp: Some(1_717_200_000),
    }
}

pub fn mentions(
    competition: Option<&str>,
    group: Option<&str>,
    work_name: Option<&str>,
) -> ExtractedMentions {
    ExtractedMentions {
        competition: competition.map(String::from),
        group: group.map(String::from),
        work_name: work_name.map(String::from),
    }
}
