//! End-to-end pipeline runs against the mock video source, the mock
//! extractor and the in-memory entity store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};

use cosdrama_common::{DurationBucket, EntityKind, ExtractedMentions, IngestError, VideoDetail};
use cosdrama_ingest::testing::{
    mentions, search_item, video_detail, MockExtractor, MockVideoSource, SlowStore,
};
use cosdrama_ingest::{BatchRequest, BatchRun, Pipeline, PipelineDeps, Stage, Terminal, Timeouts};
use cosdrama_store::{trigram, EntityStore, MemoryEntityStore, UpsertOutcome};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 10, 4, 0, 0).unwrap()
}

fn timeouts() -> Timeouts {
    Timeouts {
        search: Duration::from_secs(2),
        detail: Duration::from_secs(2),
        llm: Duration::from_secs(2),
        db: Duration::from_secs(2),
    }
}

/// A source where each `(bv, title, description)` is a recent search hit
/// with a matching detail.
fn source_with(videos: &[(&str, &str, &str)]) -> MockVideoSource {
    let mut source = MockVideoSource::new();
    for (i, (bv, title, description)) in videos.iter().enumerate() {
        let published = now() - ChronoDuration::hours(1 + i as i64);
        source = source
            .on_search(
                DurationBucket::From10To30,
                vec![search_item(bv, title, Some(published))],
            )
            .on_detail(video_detail(bv, title, description));
    }
    source
}

struct Harness {
    source: Arc<MockVideoSource>,
    extractor: Arc<MockExtractor>,
    store: Arc<MemoryEntityStore>,
    pipeline: Pipeline,
}

fn harness(
    source: MockVideoSource,
    extractor: MockExtractor,
    store: Arc<MemoryEntityStore>,
    threshold: f64,
) -> Harness {
    let source = Arc::new(source);
    let extractor = Arc::new(extractor);
    let deps = PipelineDeps::builder()
        .source(source.clone())
        .extractor(extractor.clone())
        .store(store.clone())
        .threshold(threshold)
        .timeouts(timeouts())
        .build();
    Harness {
        source,
        extractor,
        store,
        pipeline: Pipeline::new(deps).unwrap(),
    }
}

fn request() -> BatchRequest {
    BatchRequest::builder().keyword("舞台剧").build()
}

async fn run(h: &Harness, request: &BatchRequest) -> BatchRun {
    h.pipeline.run_batch_at(request, now()).await.unwrap()
}

const SHORT: Duration = Duration::from_millis(50);
const STALL: Duration = Duration::from_secs(5);

/// A pipeline where every deadline is `SHORT`, over any store.
fn impatient_pipeline(
    source: MockVideoSource,
    extractor: MockExtractor,
    store: Arc<dyn EntityStore>,
) -> Pipeline {
    let deps = PipelineDeps::builder()
        .source(Arc::new(source))
        .extractor(Arc::new(extractor))
        .store(store)
        .timeouts(Timeouts {
            search: SHORT,
            detail: SHORT,
            llm: SHORT,
            db: SHORT,
        })
        .build();
    Pipeline::new(deps).unwrap()
}

// ---------------------------------------------------------------------------
// Idempotence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rerun_on_same_video_keeps_one_row_and_first_keys() {
    let store = Arc::new(MemoryEntityStore::new());
    let first_group = store.add_group("上海星河社");
    let second_group = store.add_group("北京月光剧团");
    let bw = store.add_competition("BW");

    let first = harness(
        source_with(&[("BV1", "龙族", "简介")]),
        MockExtractor::new().on_title("龙族", mentions(None, Some("上海星河社"), None)),
        store.clone(),
        0.3,
    );
    let run1 = run(&first, &request()).await;
    assert_eq!(run1.persisted_count(), 1);
    assert!(matches!(run1.items[0].outcome, Some(UpsertOutcome::Inserted { .. })));

    let second = harness(
        source_with(&[("BV1", "龙族", "简介")]),
        MockExtractor::new().on_title("龙族", mentions(Some("BW"), Some("北京月光剧团"), None)),
        store.clone(),
        0.3,
    );
    let run2 = run(&second, &request()).await;

    assert_eq!(store.videos().len(), 1);
    let row = store.video("BV1").unwrap();
    assert_eq!(row.group_id, Some(first_group));
    assert_ne!(row.group_id, Some(second_group));
    // a null key is filled by the later run
    assert_eq!(row.competition_id, Some(bw));
    assert!(matches!(
        run2.items[0].outcome,
        Some(UpsertOutcome::Merged {
            group_kept: true,
            competition_kept: false,
            ..
        })
    ));
    assert_eq!(
        run1.items[0].outcome.unwrap().id(),
        run2.items[0].outcome.unwrap().id()
    );
}

// ---------------------------------------------------------------------------
// Threshold monotonicity
// ---------------------------------------------------------------------------

#[tokio::test]
async fn raising_the_threshold_never_adds_a_match() {
    // "上海星河社" vs "上海星河社团" scores 0.625
    let mut previous: Option<bool> = None;
    for threshold in [0.0, 0.3, 0.6, 0.625, 0.7, 1.0] {
        let store = Arc::new(MemoryEntityStore::new().with_competition("上海星河社团"));
        let h = harness(
            source_with(&[("BV1", "龙族", "")]),
            MockExtractor::new().on_title("龙族", mentions(Some("上海星河社"), None, None)),
            store,
            threshold,
        );
        let report = &run(&h, &request()).await.items[0];
        let matched = report.record.as_ref().unwrap().competition_id.is_some();

        assert_eq!(matched, threshold <= 0.625, "threshold {threshold}");
        if previous == Some(false) {
            assert!(!matched, "match reappeared at threshold {threshold}");
        }
        previous = Some(matched);
    }
}

// ---------------------------------------------------------------------------
// Asymmetry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unmatched_competition_stays_null_while_unmatched_group_is_created() {
    let store = Arc::new(
        MemoryEntityStore::new()
            .with_competition("ChinaJoy")
            .with_group("北京月光剧团"),
    );
    let h = harness(
        source_with(&[("BV1", "龙族", "")]),
        MockExtractor::new().on_title("龙族", mentions(Some("萤火虫漫展"), Some("上海星河社"), None)),
        store.clone(),
        0.3,
    );

    let report = &run(&h, &request()).await.items[0];
    let record = report.record.as_ref().unwrap();

    assert_eq!(record.competition_id, None);
    assert_eq!(store.competitions().len(), 1);

    let created = store.group_named("上海星河社").unwrap();
    assert_eq!(record.group_id, Some(created.id));
    assert_eq!(store.groups().len(), 2);
    assert_eq!(record.competition_mention.as_deref(), Some("萤火虫漫展"));
    assert!(report.errors.is_empty());
}

// ---------------------------------------------------------------------------
// Auto-create atomicity
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_group_insert_leaves_no_row_and_no_key() {
    let store = Arc::new(MemoryEntityStore::new());
    store.fail_next_group_insert();
    let h = harness(
        source_with(&[("BV1", "龙族", "")]),
        MockExtractor::new().on_title("龙族", mentions(None, Some("上海星河社"), None)),
        store.clone(),
        0.3,
    );

    let report = &run(&h, &request()).await.items[0];

    assert!(store.groups().is_empty());
    assert_eq!(store.stats().group_rollbacks, 1);
    assert_eq!(store.stats().group_commits, 0);
    assert_eq!(report.record.as_ref().unwrap().group_id, None);
    assert_eq!(report.terminal, Terminal::Persisted);
    assert!(matches!(
        report.errors.as_slice(),
        [IngestError::AutoCreate { name, .. }] if name == "上海星河社"
    ));
}

// ---------------------------------------------------------------------------
// Non-fatal propagation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn extraction_failure_still_persists_with_null_keys() {
    let store = Arc::new(MemoryEntityStore::new());
    let h = harness(
        source_with(&[("BV1", "龙族", "简介")]),
        MockExtractor::new().failing_on("龙族"),
        store.clone(),
        0.3,
    );

    let report = &run(&h, &request()).await.items[0];

    assert!(report.persisted);
    assert!(matches!(report.errors.as_slice(), [IngestError::Extraction(_)]));
    let row = store.video("BV1").unwrap();
    assert_eq!((row.competition_id, row.group_id), (None, None));
}

#[tokio::test]
async fn resolution_failure_for_groups_spares_competitions() {
    let store = Arc::new(MemoryEntityStore::new());
    let bw = store.add_competition("BW");
    store.fail_lookups_for(EntityKind::Group);
    let h = harness(
        source_with(&[("BV1", "龙族", "")]),
        MockExtractor::new().on_title("龙族", mentions(Some("BW"), Some("上海星河社"), Some("龙族"))),
        store.clone(),
        0.3,
    );

    let report = &run(&h, &request()).await.items[0];

    assert!(report.persisted);
    let record = report.record.as_ref().unwrap();
    assert_eq!(record.competition_id, Some(bw));
    assert_eq!(record.group_id, None);
    assert!(matches!(
        report.errors.as_slice(),
        [IngestError::Resolution { kind: EntityKind::Group, .. }]
    ));
    assert!(store.groups().is_empty());
}

#[tokio::test]
async fn detail_failure_stops_only_that_item() {
    let source = source_with(&[("BV1", "龙族", ""), ("BV2", "三体", "")]).failing_detail("BV1");
    let store = Arc::new(MemoryEntityStore::new());
    let h = harness(source, MockExtractor::new(), store.clone(), 0.3);

    let batch = run(&h, &request()).await;

    assert_eq!(batch.items.len(), 2);
    assert_eq!(batch.items[0].terminal, Terminal::Failed { stage: Stage::Detail });
    assert!(batch.items[0].record.is_none());
    assert!(batch.items[0].operation.is_none());
    assert!(batch.items[1].persisted);
    assert_eq!(batch.failed_count(), 1);
    assert_eq!(store.videos().len(), 1);
}

// ---------------------------------------------------------------------------
// Scored matches
// ---------------------------------------------------------------------------

#[tokio::test]
async fn group_scoring_above_threshold_is_reused() {
    let store = Arc::new(
        MemoryEntityStore::new().with_scorer(|candidate: &str, query: &str| {
            if candidate == "上海星河Cosplay社" && query == "上海星河社" {
                0.42
            } else {
                trigram::similarity(candidate, query)
            }
        }),
    );
    let existing = store.add_group("上海星河Cosplay社");
    let h = harness(
        source_with(&[("BV1", "龙族", "")]),
        MockExtractor::new().on_title("龙族", mentions(None, Some("上海星河社"), None)),
        store.clone(),
        0.3,
    );

    let report = &run(&h, &request()).await.items[0];

    assert_eq!(report.record.as_ref().unwrap().group_id, Some(existing));
    assert_eq!(store.groups().len(), 1);
}

#[tokio::test]
async fn group_with_no_close_candidate_is_created() {
    let store = Arc::new(MemoryEntityStore::new().with_scorer(|_: &str, _: &str| 0.05));
    store.add_group("北京月光剧团");
    store.add_group("广州星火社");
    let h = harness(
        source_with(&[("BV1", "龙族", "")]),
        MockExtractor::new().on_title("龙族", mentions(None, Some("上海星河社"), None)),
        store.clone(),
        0.3,
    );

    let report = &run(&h, &request()).await.items[0];

    let created = store.group_named("上海星河社").unwrap();
    assert_eq!(report.record.as_ref().unwrap().group_id, Some(created.id));
    assert_eq!(store.groups().len(), 3);
}

// ---------------------------------------------------------------------------
// Windows and batching
// ---------------------------------------------------------------------------

#[tokio::test]
async fn last_week_excludes_an_eight_day_old_video() {
    let source = MockVideoSource::new()
        .on_search(
            DurationBucket::From10To30,
            vec![
                search_item("BVold", "旧", Some(now() - ChronoDuration::days(8))),
                search_item("BVnew", "新", Some(now() - ChronoDuration::days(2))),
            ],
        )
        .on_detail(video_detail("BVold", "旧", ""))
        .on_detail(video_detail("BVnew", "新", ""));
    let h = harness(source, MockExtractor::new(), Arc::new(MemoryEntityStore::new()), 0.3);

    let req = BatchRequest::builder()
        .keyword("舞台剧")
        .last_week(true)
        .build();
    let batch = run(&h, &req).await;

    let ids: Vec<&str> = batch.items.iter().map(|i| i.external_id.as_str()).collect();
    assert_eq!(ids, vec!["BVnew"]);
    assert_eq!(h.source.detail_calls(), vec!["BVnew".to_string()]);
}

#[tokio::test]
async fn empty_text_skips_the_llm_and_still_persists() {
    let source = MockVideoSource::new()
        .on_search(
            DurationBucket::From10To30,
            vec![search_item("BV1", "", Some(now() - ChronoDuration::hours(1)))],
        )
        .on_detail(VideoDetail {
            external_id: "BV1".into(),
            title: String::new(),
            description: "   ".into(),
            cover_url: String::new(),
            publish_timestamp: None,
        });
    let store = Arc::new(MemoryEntityStore::new());
    let h = harness(source, MockExtractor::new(), store.clone(), 0.3);

    let report = &run(&h, &request()).await.items[0];

    assert_eq!(h.extractor.calls(), 0);
    assert!(report.persisted);
    let record = report.record.as_ref().unwrap();
    assert_eq!((record.competition_id, record.group_id), (None, None));
    assert_eq!(record.year, None);
    assert!(matches!(report.errors.as_slice(), [IngestError::Extraction(_)]));
    assert!(store.video("BV1").is_some());
}

#[tokio::test]
async fn zero_limit_processes_nothing() {
    let h = harness(
        source_with(&[("BV1", "龙族", "")]),
        MockExtractor::new(),
        Arc::new(MemoryEntityStore::new()),
        0.3,
    );
    let req = BatchRequest::builder().keyword("舞台剧").limit(0).build();

    let batch = run(&h, &req).await;

    assert!(batch.items.is_empty());
    assert!(h.source.detail_calls().is_empty());
}

#[tokio::test]
async fn concurrent_items_report_in_discovery_order() {
    let h = harness(
        source_with(&[("BV1", "一", ""), ("BV2", "二", ""), ("BV3", "三", ""), ("BV4", "四", "")]),
        MockExtractor::new(),
        Arc::new(MemoryEntityStore::new()),
        0.3,
    );
    let req = BatchRequest::builder()
        .keyword("舞台剧")
        .concurrency(3)
        .build();

    let batch = run(&h, &req).await;

    let ids: Vec<&str> = batch.items.iter().map(|i| i.external_id.as_str()).collect();
    assert_eq!(ids, vec!["BV1", "BV2", "BV3", "BV4"]);
    assert_eq!(batch.persisted_count(), 4);
}

#[tokio::test]
async fn dry_run_reports_sql_without_writing() {
    let store = Arc::new(MemoryEntityStore::new());
    let h = harness(source_with(&[("BV1", "龙族", "")]), MockExtractor::new(), store.clone(), 0.3);
    let req = BatchRequest::builder().keyword("舞台剧").dry_run(true).build();

    let report = &run(&h, &req).await.items[0];

    assert_eq!(report.terminal, Terminal::DryRun);
    assert!(!report.persisted);
    assert!(report.outcome.is_none());
    assert!(report.operation.as_deref().unwrap().contains("'BV1'"));
    assert!(store.videos().is_empty());
}

#[tokio::test]
async fn dry_run_does_not_create_unmatched_groups() {
    let store = Arc::new(MemoryEntityStore::new().with_group("北京月光剧团"));
    let h = harness(
        source_with(&[("BV1", "龙族", "简介")]),
        MockExtractor::new().with_default(mentions(None, Some("上海星河社"), None)),
        store.clone(),
        0.3,
    );
    let req = BatchRequest::builder().keyword("舞台剧").dry_run(true).build();

    let report = &run(&h, &req).await.items[0];

    assert_eq!(report.terminal, Terminal::DryRun);
    assert_eq!(report.record.as_ref().unwrap().group_id, None);
    assert_eq!(store.groups().len(), 1);
    assert_eq!(store.stats().group_commits, 0);
    assert!(report.logs.iter().any(|l| l.contains("would create")));
}

// ---------------------------------------------------------------------------
// Persistence failure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_upsert_marks_the_item_failed_with_its_record() {
    let store = Arc::new(MemoryEntityStore::new());
    store.fail_next_upsert();
    let h = harness(source_with(&[("BV1", "龙族", "简介")]), MockExtractor::new(), store.clone(), 0.3);

    let batch = run(&h, &request()).await;
    let report = &batch.items[0];

    assert_eq!(report.terminal, Terminal::Failed { stage: Stage::Persistence });
    assert!(!report.persisted);
    assert!(report.record.is_some());
    assert!(report.operation.as_deref().unwrap().contains("'BV1'"));
    assert!(report.outcome.is_none());
    assert!(matches!(report.fatal_error(), Some(IngestError::Persistence { .. })));
    assert_eq!(batch.failed_count(), 1);
    assert!(store.videos().is_empty());
}

// ---------------------------------------------------------------------------
// Deadlines
// ---------------------------------------------------------------------------

#[tokio::test]
async fn llm_timeout_is_soft_and_the_item_still_persists() {
    let store = Arc::new(MemoryEntityStore::new());
    let pipeline = impatient_pipeline(
        source_with(&[("BV1", "龙族", "简介")]),
        MockExtractor::new().with_delay(STALL),
        store.clone(),
    );

    let report = &pipeline.run_batch_at(&request(), now()).await.unwrap().items[0];

    assert_eq!(report.terminal, Terminal::Persisted);
    assert!(matches!(
        report.errors.as_slice(),
        [IngestError::Extraction(m)] if m.contains("50ms")
    ));
    assert!(report.fatal_error().is_none());
    assert_eq!(store.videos().len(), 1);
}

#[tokio::test]
async fn detail_timeout_fails_only_that_item() {
    let source = source_with(&[("BV1", "龙族", ""), ("BV2", "三体", "")]).slow_detail("BV1", STALL);
    let store = Arc::new(MemoryEntityStore::new());
    let pipeline = impatient_pipeline(source, MockExtractor::new(), store.clone());

    let batch = pipeline.run_batch_at(&request(), now()).await.unwrap();

    assert_eq!(batch.items[0].terminal, Terminal::Failed { stage: Stage::Detail });
    assert!(matches!(
        batch.items[0].fatal_error(),
        Some(IngestError::DetailFetch { external_id, .. }) if external_id == "BV1"
    ));
    assert_eq!(batch.items[1].terminal, Terminal::Persisted);
    assert_eq!(store.videos().len(), 1);
}

#[tokio::test]
async fn slow_bucket_is_dropped_and_the_other_bucket_still_counts() {
    let published = Some(now() - ChronoDuration::hours(1));
    let source = MockVideoSource::new()
        .on_search(DurationBucket::From10To30, vec![search_item("BV1", "龙族", published)])
        .on_search(DurationBucket::From30To60, vec![search_item("BV2", "三体", published)])
        .slow_bucket(DurationBucket::From30To60, STALL)
        .on_detail(video_detail("BV1", "龙族", ""))
        .on_detail(video_detail("BV2", "三体", ""));
    let pipeline = impatient_pipeline(source, MockExtractor::new(), Arc::new(MemoryEntityStore::new()));

    let batch = pipeline.run_batch_at(&request(), now()).await.unwrap();

    let ids: Vec<&str> = batch.items.iter().map(|i| i.external_id.as_str()).collect();
    assert_eq!(ids, vec!["BV1"]);
    assert_eq!(batch.discovery_warnings.len(), 1);
}

#[tokio::test]
async fn lookup_timeout_is_soft_and_the_item_still_persists() {
    let memory = Arc::new(MemoryEntityStore::new());
    memory.add_competition("BW");
    let store = Arc::new(SlowStore::new(memory.clone()).slow_lookups(STALL));
    let pipeline = impatient_pipeline(
        source_with(&[("BV1", "龙族", "简介")]),
        MockExtractor::new().with_default(mentions(Some("BW"), None, None)),
        store,
    );

    let report = &pipeline.run_batch_at(&request(), now()).await.unwrap().items[0];

    assert_eq!(report.terminal, Terminal::Persisted);
    assert!(matches!(
        report.errors.as_slice(),
        [IngestError::Resolution { kind: EntityKind::Competition, message }]
            if message.contains("lookup timed out after 50ms")
    ));
    assert_eq!(memory.video("BV1").unwrap().competition_id, None);
}

#[tokio::test]
async fn group_insert_timeout_is_reported_as_an_insert() {
    let memory = Arc::new(MemoryEntityStore::new());
    let store = Arc::new(SlowStore::new(memory.clone()).slow_inserts(STALL));
    let pipeline = impatient_pipeline(
        source_with(&[("BV1", "龙族", "简介")]),
        MockExtractor::new().with_default(mentions(None, Some("上海星河社"), None)),
        store,
    );

    let report = &pipeline.run_batch_at(&request(), now()).await.unwrap().items[0];

    assert_eq!(report.terminal, Terminal::Persisted);
    assert!(matches!(
        report.errors.as_slice(),
        [IngestError::AutoCreate { message, .. }] if message.contains("group insert timed out after 50ms")
    ));
    assert!(memory.groups().is_empty());
    assert_eq!(memory.video("BV1").unwrap().group_id, None);
}

#[tokio::test]
async fn discovery_failure_escapes_the_batch() {
    let source = MockVideoSource::new()
        .failing_bucket(DurationBucket::From10To30)
        .failing_bucket(DurationBucket::From30To60);
    let h = harness(source, MockExtractor::new(), Arc::new(MemoryEntityStore::new()), 0.3);

    let err = h.pipeline.run_batch_at(&request(), now()).await.unwrap_err();

    assert!(matches!(err, IngestError::Discovery { retryable: true, .. }));
}

#[tokio::test]
async fn out_of_range_threshold_is_a_config_error() {
    let deps = PipelineDeps::builder()
        .source(Arc::new(MockVideoSource::new()))
        .extractor(Arc::new(MockExtractor::new()))
        .store(Arc::new(MemoryEntityStore::new()))
        .threshold(1.2)
        .build();
    assert!(matches!(Pipeline::new(deps), Err(IngestError::Config(_))));
}

#[test]
fn extracted_mentions_default_is_empty() {
    assert!(ExtractedMentions::default().is_empty());
}
