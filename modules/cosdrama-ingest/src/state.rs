//! Per-item state machine.
//!
//! Each variant carries what the item has produced so far. [`advance`] runs
//! the one stage that moves a state forward; [`drive`] loops until the item
//! is terminal. Only detail fetch and persistence can fail an item; the
//! other stages record soft errors in the trace and move on.

use serde::Serialize;
use tracing::debug;

use cosdrama_common::{
    CanonicalVideoRecord, ExtractedMentions, IngestError, ResolvedForeignKeys, SearchResultItem,
    VideoDetail,
};
use cosdrama_store::UpsertOutcome;

use crate::composer::compose;
use crate::detail::DetailFetcher;
use crate::extractor::EntityExtractor;
use crate::resolver::EntityResolver;
use crate::upsert::PersistenceUpserter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Detail,
    Extraction,
    Resolution,
    Composition,
    Persistence,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Detail => write!(f, "detail"),
            Stage::Extraction => write!(f, "extraction"),
            Stage::Resolution => write!(f, "resolution"),
            Stage::Composition => write!(f, "composition"),
            Stage::Persistence => write!(f, "persistence"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemState {
    Discovered {
        item: SearchResultItem,
    },
    DetailFetched {
        detail: VideoDetail,
    },
    Extracted {
        detail: VideoDetail,
        mentions: ExtractedMentions,
    },
    Resolved {
        detail: VideoDetail,
        mentions: ExtractedMentions,
        fks: ResolvedForeignKeys,
    },
    Composed {
        record: CanonicalVideoRecord,
    },
    /// `outcome` is `None` when the write was skipped (dry run).
    Persisted {
        record: CanonicalVideoRecord,
        outcome: Option<UpsertOutcome>,
    },
    Failed {
        stage: Stage,
        error: IngestError,
        /// Set when the record was composed before the failure.
        record: Option<CanonicalVideoRecord>,
    },
}

impl ItemState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemState::Persisted { .. } | ItemState::Failed { .. })
    }

    pub fn record(&self) -> Option<&CanonicalVideoRecord> {
        match self {
            ItemState::Composed { record } | ItemState::Persisted { record, .. } => Some(record),
            ItemState::Failed { record, .. } => record.as_ref(),
            _ => None,
        }
    }

    pub fn terminal(&self) -> Option<Terminal> {
        match self {
            ItemState::Persisted {
                outcome: Some(_), ..
            } => Some(Terminal::Persisted),
            ItemState::Persisted { outcome: None, .. } => Some(Terminal::DryRun),
            ItemState::Failed { stage, .. } => Some(Terminal::Failed { stage: *stage }),
            _ => None,
        }
    }
}

/// How an item ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "terminal", rename_all = "snake_case")]
pub enum Terminal {
    Persisted,
    DryRun,
    Failed { stage: Stage },
}

impl std::fmt::Display for Terminal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Terminal::Persisted => write!(f, "persisted"),
            Terminal::DryRun => write!(f, "dry run (not written)"),
            Terminal::Failed { stage } => write!(f, "failed at {stage}"),
        }
    }
}

/// Append-only log of one item's run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemTrace {
    pub logs: Vec<String>,
    pub errors: Vec<IngestError>,
}

impl ItemTrace {
    pub fn log(&mut self, line: impl Into<String>) {
        self.logs.push(line.into());
    }

    pub fn absorb(&mut self, logs: Vec<String>, errors: Vec<IngestError>) {
        self.logs.extend(logs);
        self.errors.extend(errors);
    }
}

/// The stage implementations an item runs through.
pub struct Stages<'a> {
    pub detail: &'a DetailFetcher,
    pub extractor: &'a EntityExtractor,
    pub resolver: &'a EntityResolver,
    pub upserter: &'a PersistenceUpserter,
    /// Resolve without creating groups and stop before the upsert.
    pub dry_run: bool,
}

/// Run the next stage. Terminal states are returned unchanged.
pub async fn advance(state: ItemState, stages: &Stages<'_>, trace: &mut ItemTrace) -> ItemState {
    match state {
        ItemState::Discovered { item } => match stages.detail.fetch_detail(&item.external_id).await
        {
            Ok(detail) => {
                trace.log(format!("fetched detail for {}", detail.external_id));
                ItemState::DetailFetched { detail }
            }
            Err(error) => fail(Stage::Detail, error, None, trace),
        },

        ItemState::DetailFetched { detail } => {
            let outcome = stages
                .extractor
                .extract(&detail.title, &detail.description)
                .await;
            trace.absorb(outcome.logs, outcome.errors);
            ItemState::Extracted {
                detail,
                mentions: outcome.mentions,
            }
        }

        ItemState::Extracted { detail, mentions } => {
            let resolution = if stages.dry_run {
                stages.resolver.preview(&mentions).await
            } else {
                stages.resolver.resolve(&mentions).await
            };
            trace.absorb(resolution.logs, resolution.errors);
            ItemState::Resolved {
                detail,
                mentions,
                fks: resolution.fks,
            }
        }

        ItemState::Resolved {
            detail,
            mentions,
            fks,
        } => {
            let record = compose(&detail, &mentions, &fks);
            trace.log(format!("composed record {}", record.id));
            ItemState::Composed { record }
        }

        ItemState::Composed { record } => {
            if stages.dry_run {
                trace.log("dry run: upsert skipped");
                return ItemState::Persisted {
                    record,
                    outcome: None,
                };
            }
            match stages.upserter.upsert(&record).await {
                Ok(outcome) => {
                    trace.log(format!("upsert: {outcome}"));
                    ItemState::Persisted {
                        record,
                        outcome: Some(outcome),
                    }
                }
                Err(error) => fail(Stage::Persistence, error, Some(record), trace),
            }
        }

        terminal @ (ItemState::Persisted { .. } | ItemState::Failed { .. }) => terminal,
    }
}

/// Advance until the item is persisted or failed.
pub async fn drive(mut state: ItemState, stages: &Stages<'_>, trace: &mut ItemTrace) -> ItemState {
    while !state.is_terminal() {
        state = advance(state, stages, trace).await;
    }
    state
}

fn fail(
    stage: Stage,
    error: IngestError,
    record: Option<CanonicalVideoRecord>,
    trace: &mut ItemTrace,
) -> ItemState {
    debug!(%stage, error = %error, "Item failed");
    trace.log(format!("{stage} failed: {error}"));
    trace.errors.push(error.clone());
    ItemState::Failed {
        stage,
        error,
        record,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{search_item, video_detail, MockExtractor, MockVideoSource};
    use cosdrama_store::MemoryEntityStore;
    use std::sync::Arc;
    use std::time::Duration;

    struct Fixture {
        detail: DetailFetcher,
        extractor: EntityExtractor,
        resolver: EntityResolver,
        upserter: PersistenceUpserter,
    }

    impl Fixture {
        fn new(source: MockVideoSource, extractor: MockExtractor, store: Arc<MemoryEntityStore>) -> Self {
            let t = Duration::from_secs(1);
            let source = Arc::new(source);
            Self {
                detail: DetailFetcher::new(source, t),
                extractor: EntityExtractor::new(Arc::new(extractor), t),
                resolver: EntityResolver::new(store.clone(), 0.3, t).unwrap(),
                upserter: PersistenceUpserter::new(store, t),
            }
        }

        fn stages(&self, dry_run: bool) -> Stages<'_> {
            Stages {
                detail: &self.detail,
                extractor: &self.extractor,
                resolver: &self.resolver,
                upserter: &self.upserter,
                dry_run,
            }
        }
    }

    fn discovered(bv: &str) -> ItemState {
        ItemState::Discovered {
            item: search_item(bv, "t", None),
        }
    }

    #[tokio::test]
    async fn advance_moves_one_stage_at_a_time() {
        let store = Arc::new(MemoryEntityStore::new());
        let fx = Fixture::new(
            MockVideoSource::new().on_detail(video_detail("BV1", "龙族", "")),
            MockExtractor::new(),
            store,
        );
        let stages = fx.stages(false);
        let mut trace = ItemTrace::default();

        let s = advance(discovered("BV1"), &stages, &mut trace).await;
        assert!(matches!(s, ItemState::DetailFetched { .. }));
        let s = advance(s, &stages, &mut trace).await;
        assert!(matches!(s, ItemState::Extracted { .. }));
        let s = advance(s, &stages, &mut trace).await;
        assert!(matches!(s, ItemState::Resolved { .. }));
        let s = advance(s, &stages, &mut trace).await;
        assert!(matches!(s, ItemState::Composed { .. }));
        let s = advance(s, &stages, &mut trace).await;
        assert_eq!(s.terminal(), Some(Terminal::Persisted));

        let again = advance(s.clone(), &stages, &mut trace).await;
        assert_eq!(again, s);
    }

    #[tokio::test]
    async fn missing_detail_fails_the_item() {
        let store = Arc::new(MemoryEntityStore::new());
        let fx = Fixture::new(MockVideoSource::new(), MockExtractor::new(), store.clone());
        let mut trace = ItemTrace::default();

        let end = drive(discovered("BVgone"), &fx.stages(false), &mut trace).await;

        assert_eq!(end.terminal(), Some(Terminal::Failed { stage: Stage::Detail }));
        assert!(end.record().is_none());
        assert_eq!(trace.errors, vec![IngestError::DetailNotFound("BVgone".into())]);
        assert!(store.videos().is_empty());
    }

    #[tokio::test]
    async fn dry_run_composes_without_writing() {
        let store = Arc::new(MemoryEntityStore::new());
        let fx = Fixture::new(
            MockVideoSource::new().on_detail(video_detail("BV1", "龙族", "")),
            MockExtractor::new(),
            store.clone(),
        );
        let mut trace = ItemTrace::default();

        let end = drive(discovered("BV1"), &fx.stages(true), &mut trace).await;

        assert_eq!(end.terminal(), Some(Terminal::DryRun));
        assert!(end.record().is_some());
        assert_eq!(store.stats().upserts, 0);
        assert!(trace.logs.iter().any(|l| l.contains("dry run")));
    }

    #[tokio::test]
    async fn dry_run_leaves_unmatched_group_uncreated() {
        let store = Arc::new(MemoryEntityStore::new());
        let fx = Fixture::new(
            MockVideoSource::new().on_detail(video_detail("BV1", "龙族", "")),
            MockExtractor::new().with_default(crate::testing::mentions(None, Some("上海星河社"), None)),
            store.clone(),
        );
        let mut trace = ItemTrace::default();

        let end = drive(discovered("BV1"), &fx.stages(true), &mut trace).await;

        assert_eq!(end.terminal(), Some(Terminal::DryRun));
        assert_eq!(end.record().and_then(|r| r.group_id), None);
        assert!(store.groups().is_empty());
        assert!(trace.logs.iter().any(|l| l.contains("would create")));
    }

    #[tokio::test]
    async fn failed_upsert_keeps_the_composed_record() {
        let store = Arc::new(MemoryEntityStore::new());
        store.fail_next_upsert();
        let fx = Fixture::new(
            MockVideoSource::new().on_detail(video_detail("BV1", "龙族", "")),
            MockExtractor::new(),
            store.clone(),
        );
        let mut trace = ItemTrace::default();

        let end = drive(discovered("BV1"), &fx.stages(false), &mut trace).await;

        assert_eq!(end.terminal(), Some(Terminal::Failed { stage: Stage::Persistence }));
        assert!(end.record().is_some());
        assert!(matches!(trace.errors.as_slice(), [IngestError::Persistence { .. }]));
        assert!(store.videos().is_empty());
    }

    #[tokio::test]
    async fn soft_errors_accumulate_without_stopping() {
        let store = Arc::new(MemoryEntityStore::new());
        store.fail_lookups_for(cosdrama_common::EntityKind::Group);
        let fx = Fixture::new(
            MockVideoSource::new().on_detail(video_detail("BV1", "坏", "")),
            MockExtractor::new().failing_on("坏"),
            store.clone(),
        );
        let mut trace = ItemTrace::default();

        let end = drive(discovered("BV1"), &fx.stages(false), &mut trace).await;

        assert_eq!(end.terminal(), Some(Terminal::Persisted));
        assert_eq!(trace.errors.len(), 1);
        assert!(matches!(trace.errors[0], IngestError::Extraction(_)));
        assert_eq!(store.videos().len(), 1);
    }
}
