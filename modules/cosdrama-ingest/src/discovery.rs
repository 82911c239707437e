//! SearchClient: one search page fanned out over duration buckets, merged,
//! windowed and ordered.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use futures::future::join_all;
use tracing::{debug, info, warn};

use cosdrama_common::{DateWindow, DurationBucket, IngestError, SearchOrder, SearchResultItem};

use crate::traits::{SearchQuery, SourceError, VideoSource};

pub const DRAMA_SUFFIX: &str = "舞台剧";

/// Append ` 舞台剧` unless the keyword already mentions it.
pub fn with_drama_suffix(keyword: &str) -> String {
    let keyword = keyword.trim();
    if keyword.is_empty() || keyword.contains(DRAMA_SUFFIX) {
        keyword.to_string()
    } else {
        format!("{keyword} {DRAMA_SUFFIX}")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub keyword: String,
    pub page: u32,
    /// `None` uses the default 10 to 60 minute filter.
    pub durations: Option<Vec<DurationBucket>>,
    pub order: SearchOrder,
    pub begin_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl SearchRequest {
    pub fn new(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            page: 1,
            durations: None,
            order: SearchOrder::default(),
            begin_date: None,
            end_date: None,
        }
    }

    /// The window this request covers at `now`: the last seven Beijing days
    /// when neither date is given.
    pub fn window_at(&self, now: DateTime<Utc>) -> DateWindow {
        if self.begin_date.is_none() && self.end_date.is_none() {
            DateWindow::last_week(now)
        } else {
            DateWindow::from_dates(self.begin_date, self.end_date)
        }
    }

    /// Requested buckets, validated; an empty list becomes `[All]`.
    pub fn buckets(&self) -> Vec<DurationBucket> {
        match &self.durations {
            None => DurationBucket::default_filter(),
            Some(list) => {
                let codes: Vec<i64> = list.iter().map(|b| i64::from(b.code())).collect();
                DurationBucket::normalize(&codes)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub items: Vec<SearchResultItem>,
    pub window: DateWindow,
    pub buckets: Vec<DurationBucket>,
    /// Buckets whose sub-query failed, with the reason. Their results are
    /// simply missing from `items`.
    pub bucket_errors: Vec<(DurationBucket, String)>,
}

pub struct SearchClient {
    source: Arc<dyn VideoSource>,
    timeout: Duration,
}

impl SearchClient {
    pub fn new(source: Arc<dyn VideoSource>, timeout: Duration) -> Self {
        Self { source, timeout }
    }

    pub async fn search(&self, request: &SearchRequest) -> Result<SearchOutcome, IngestError> {
        self.search_at(request, Utc::now()).await
    }

    pub async fn search_at(
        &self,
        request: &SearchRequest,
        now: DateTime<Utc>,
    ) -> Result<SearchOutcome, IngestError> {
        let keyword = request.keyword.trim();
        if keyword.is_empty() {
            return Err(IngestError::Discovery {
                message: "search keyword is empty".to_string(),
                retryable: false,
            });
        }

        let window = request.window_at(now);
        let buckets = request.buckets();
        let query = SearchQuery {
            keyword: keyword.to_string(),
            page: request.page.max(1),
            order: request.order,
            window,
        };

        info!(keyword, page = query.page, %window, buckets = buckets.len(), "Searching");

        let results = join_all(buckets.iter().map(|&bucket| {
            let query = &query;
            async move {
                let result =
                    match tokio::time::timeout(self.timeout, self.source.search_bucket(query, bucket))
                        .await
                    {
                        Ok(r) => r,
                        Err(_) => Err(SourceError::Timeout),
                    };
                (bucket, result)
            }
        }))
        .await;

        let mut seen: HashSet<String> = HashSet::new();
        let mut merged: Vec<SearchResultItem> = Vec::new();
        let mut bucket_errors: Vec<(DurationBucket, String)> = Vec::new();

        for (bucket, result) in results {
            match result {
                Ok(items) => {
                    debug!(%bucket, hits = items.len(), "Bucket search returned");
                    for item in items {
                        if seen.insert(item.external_id.clone()) {
                            merged.push(item);
                        }
                    }
                }
                Err(e) => {
                    warn!(%bucket, error = %e, "Bucket search failed, continuing");
                    bucket_errors.push((bucket, e.to_string()));
                }
            }
        }

        if bucket_errors.len() == buckets.len() {
            let reasons: Vec<String> = bucket_errors
                .iter()
                .map(|(b, e)| format!("{b}: {e}"))
                .collect();
            return Err(IngestError::Discovery {
                message: format!("every duration bucket failed ({})", reasons.join("; ")),
                retryable: true,
            });
        }

        let before = merged.len();
        merged.retain(|item| window.contains(item.published_at));
        if merged.len() < before {
            debug!(dropped = before - merged.len(), "Dropped results outside the window");
        }

        if request.order == SearchOrder::PubDate {
            // stable: equal timestamps keep merge order
            merged.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        }

        info!(results = merged.len(), failed_buckets = bucket_errors.len(), "Search complete");

        Ok(SearchOutcome {
            items: merged,
            window,
            buckets,
            bucket_errors,
        })
    }
}
