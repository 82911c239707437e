//! Batch orchestration: one search page, then every discovered item driven
//! through the per-item state machine with bounded concurrency.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use tracing::{info, instrument, warn};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use cosdrama_common::config::DEFAULT_SIMILARITY_THRESHOLD;
use cosdrama_common::{
    CanonicalVideoRecord, DateWindow, DurationBucket, IngestConfig, IngestError, SearchOrder,
    SearchResultItem,
};
use cosdrama_store::{EntityStore, UpsertOutcome};

use crate::detail::DetailFetcher;
use crate::discovery::{SearchClient, SearchRequest};
use crate::extractor::{EntityExtractor, MentionExtractor};
use crate::resolver::EntityResolver;
use crate::state::{drive, ItemState, ItemTrace, Stage, Stages, Terminal};
use crate::traits::VideoSource;
use crate::upsert::PersistenceUpserter;

/// Per-call timeouts for each external dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub search: Duration,
    pub detail: Duration,
    pub llm: Duration,
    pub db: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            search: Duration::from_secs(20),
            detail: Duration::from_secs(20),
            llm: Duration::from_secs(60),
            db: Duration::from_secs(10),
        }
    }
}

impl Timeouts {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            search: config.search_timeout,
            detail: config.detail_timeout,
            llm: config.llm_timeout,
            db: config.db_timeout,
        }
    }
}

/// Everything the pipeline talks to.
#[derive(Clone, TypedBuilder)]
pub struct PipelineDeps {
    pub source: Arc<dyn VideoSource>,
    pub extractor: Arc<dyn MentionExtractor>,
    pub store: Arc<dyn EntityStore>,
    #[builder(default = DEFAULT_SIMILARITY_THRESHOLD)]
    pub threshold: f64,
    #[builder(default)]
    pub timeouts: Timeouts,
}

#[derive(Debug, Clone, PartialEq, TypedBuilder)]
pub struct BatchRequest {
    #[builder(setter(into))]
    pub keyword: String,
    #[builder(default = 1)]
    pub page: u32,
    /// Maximum number of items processed; 0 processes none.
    #[builder(default = 5)]
    pub limit: usize,
    #[builder(default)]
    pub durations: Option<Vec<DurationBucket>>,
    #[builder(default)]
    pub order: SearchOrder,
    #[builder(default)]
    pub begin_date: Option<NaiveDate>,
    #[builder(default)]
    pub end_date: Option<NaiveDate>,
    /// Ignore the dates and use the last seven days.
    #[builder(default)]
    pub last_week: bool,
    #[builder(default = 1)]
    pub concurrency: usize,
    #[builder(default)]
    pub dry_run: bool,
}

impl BatchRequest {
    pub fn search_request(&self) -> SearchRequest {
        let (begin_date, end_date) = if self.last_week {
            (None, None)
        } else {
            (self.begin_date, self.end_date)
        };
        SearchRequest {
            keyword: self.keyword.clone(),
            page: self.page,
            durations: self.durations.clone(),
            order: self.order,
            begin_date,
            end_date,
        }
    }
}

/// What happened to one discovered video.
#[derive(Debug, Clone)]
pub struct ItemReport {
    pub external_id: String,
    pub title: String,
    /// The upsert rendered as literal SQL, once a record exists.
    pub operation: Option<String>,
    pub persisted: bool,
    pub outcome: Option<UpsertOutcome>,
    pub record: Option<CanonicalVideoRecord>,
    pub terminal: Terminal,
    pub logs: Vec<String>,
    pub errors: Vec<IngestError>,
}

impl ItemReport {
    /// The error that stopped this item, if any.
    pub fn fatal_error(&self) -> Option<&IngestError> {
        self.errors.iter().find(|e| e.is_fatal_to_item())
    }

    /// Errors the item carried on past.
    pub fn soft_errors(&self) -> impl Iterator<Item = &IngestError> {
        self.errors.iter().filter(|e| !e.is_fatal_to_item())
    }
}

/// Handle for a finished batch, returned to the caller.
#[derive(Debug, Clone)]
pub struct BatchRun {
    pub run_id: Uuid,
    pub keyword: String,
    pub page: u32,
    pub window: DateWindow,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Buckets that failed during discovery.
    pub discovery_warnings: Vec<String>,
    pub items: Vec<ItemReport>,
}

impl BatchRun {
    pub fn persisted_count(&self) -> usize {
        self.items.iter().filter(|i| i.persisted).count()
    }

    pub fn failed_count(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(i.terminal, Terminal::Failed { .. }))
            .count()
    }
}

pub struct Pipeline {
    search: SearchClient,
    detail: DetailFetcher,
    extractor: EntityExtractor,
    resolver: EntityResolver,
    upserter: PersistenceUpserter,
}

impl Pipeline {
    pub fn new(deps: PipelineDeps) -> Result<Self, IngestError> {
        let t = deps.timeouts;
        Ok(Self {
            search: SearchClient::new(deps.source.clone(), t.search),
            detail: DetailFetcher::new(deps.source, t.detail),
            extractor: EntityExtractor::new(deps.extractor, t.llm),
            resolver: EntityResolver::new(deps.store.clone(), deps.threshold, t.db)?,
            upserter: PersistenceUpserter::new(deps.store, t.db),
        })
    }

    pub async fn run_batch(&self, request: &BatchRequest) -> Result<BatchRun, IngestError> {
        self.run_batch_at(request, Utc::now()).await
    }

    /// Run a batch with `now` as the reference for the default window.
    #[instrument(skip(self, request, now), fields(keyword = %request.keyword, page = request.page))]
    pub async fn run_batch_at(
        &self,
        request: &BatchRequest,
        now: DateTime<Utc>,
    ) -> Result<BatchRun, IngestError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        let outcome = self.search.search_at(&request.search_request(), now).await?;
        let discovery_warnings: Vec<String> = outcome
            .bucket_errors
            .iter()
            .map(|(bucket, e)| format!("bucket {bucket} failed: {e}"))
            .collect();

        let selected: Vec<SearchResultItem> =
            outcome.items.into_iter().take(request.limit).collect();
        info!(%run_id, items = selected.len(), dry_run = request.dry_run, "Processing discovered items");

        let items: Vec<ItemReport> = stream::iter(
            selected
                .into_iter()
                .map(|item| self.run_item(item, request.dry_run)),
        )
        .buffered(request.concurrency.max(1))
        .collect()
        .await;

        let run = BatchRun {
            run_id,
            keyword: request.keyword.clone(),
            page: request.page,
            window: outcome.window,
            started_at,
            finished_at: Utc::now(),
            discovery_warnings,
            items,
        };

        info!(
            %run_id,
            processed = run.items.len(),
            persisted = run.persisted_count(),
            failed = run.failed_count(),
            "Batch complete"
        );
        Ok(run)
    }

    /// Drive one discovered item to a terminal state.
    pub async fn run_item(&self, item: SearchResultItem, dry_run: bool) -> ItemReport {
        let stages = Stages {
            detail: &self.detail,
            extractor: &self.extractor,
            resolver: &self.resolver,
            upserter: &self.upserter,
            dry_run,
        };

        let external_id = item.external_id.clone();
        let search_title = item.title.clone();
        let mut trace = ItemTrace::default();
        trace.log(format!("discovered {external_id}"));

        let end = drive(ItemState::Discovered { item }, &stages, &mut trace).await;

        let record = end.record().cloned();
        let operation = record.as_ref().map(|r| self.upserter.describe(r));
        let outcome = match &end {
            ItemState::Persisted { outcome, .. } => *outcome,
            _ => None,
        };
        let terminal = match end.terminal() {
            Some(t) => t,
            None => {
                // drive only returns terminal states
                warn!(external_id, "Item stopped before a terminal state");
                Terminal::Failed {
                    stage: Stage::Persistence,
                }
            }
        };

        let title = record
            .as_ref()
            .map(|r| r.title.clone())
            .unwrap_or(search_title);

        info!(external_id, %terminal, errors = trace.errors.len(), "Item finished");

        ItemReport {
            external_id,
            title,
            operation,
            persisted: terminal == Terminal::Persisted,
            outcome,
            record,
            terminal,
            logs: trace.logs,
            errors: trace.errors,
        }
    }
}
