// The video platform behind one trait, so the pipeline runs against
// MockVideoSource in tests without touching the network.

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;

use bilibili_client::{BilibiliClient, BilibiliError, SearchParams, SearchVideo, ViewData};
use cosdrama_common::{DateWindow, DurationBucket, SearchOrder, SearchResultItem, VideoDetail};

static RE_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());

#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("timed out")]
    Timeout,

    #[error("{0}")]
    Unavailable(String),
}

impl From<BilibiliError> for SourceError {
    fn from(e: BilibiliError) -> Self {
        if e.is_not_found() {
            SourceError::NotFound(e.to_string())
        } else if matches!(e, BilibiliError::Timeout) {
            SourceError::Timeout
        } else {
            SourceError::Unavailable(e.to_string())
        }
    }
}

/// One search page, before the duration filter is applied.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub keyword: String,
    pub page: u32,
    pub order: SearchOrder,
    pub window: DateWindow,
}

// ---------------------------------------------------------------------------
// VideoSource
// ---------------------------------------------------------------------------

#[async_trait]
pub trait VideoSource: Send + Sync {
    /// Run the search restricted to one duration bucket.
    async fn search_bucket(
        &self,
        query: &SearchQuery,
        bucket: DurationBucket,
    ) -> Result<Vec<SearchResultItem>, SourceError>;

    /// Metadata for a single video.
    async fn video_detail(&self, external_id: &str) -> Result<VideoDetail, SourceError>;
}

#[async_trait]
impl VideoSource for BilibiliClient {
    async fn search_bucket(
        &self,
        query: &SearchQuery,
        bucket: DurationBucket,
    ) -> Result<Vec<SearchResultItem>, SourceError> {
        let params = SearchParams {
            keyword: query.keyword.clone(),
            page: query.page,
            order: query.order.wire_name().to_string(),
            duration: bucket.code(),
            pubtime_begin_s: query.window.begin_epoch(),
            pubtime_end_s: query.window.end_epoch(),
        };
        let hits = self.search_videos(&params).await?;
        Ok(hits.into_iter().map(search_item_from).collect())
    }

    async fn video_detail(&self, external_id: &str) -> Result<VideoDetail, SourceError> {
        let view = self.video_view(external_id).await?;
        Ok(detail_from(view))
    }
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

/// Remove search highlight tags and decode the few entities the search API
/// escapes.
pub fn clean_title(raw: &str) -> String {
    RE_TAG
        .replace_all(raw, "")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}

fn epoch_to_utc(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.filter(|s| *s > 0)
        .and_then(|s| DateTime::from_timestamp(s, 0))
}

pub(crate) fn search_item_from(hit: SearchVideo) -> SearchResultItem {
    SearchResultItem {
        external_id: hit.bvid,
        title: clean_title(&hit.title),
        published_at: epoch_to_utc(hit.pubdate),
    }
}

pub(crate) fn detail_from(view: ViewData) -> VideoDetail {
    VideoDetail {
        external_id: view.bvid,
        title: view.title,
        description: view.desc,
        cover_url: view.pic,
        publish_timestamp: view.pubdate.filter(|s| *s > 0),
    }
}
