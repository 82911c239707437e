use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use cosdrama_common::{IngestError, VideoDetail};

use crate::traits::{SourceError, VideoSource};

/// Fetches per-video metadata. One attempt per item, no retry loop.
pub struct DetailFetcher {
    source: Arc<dyn VideoSource>,
    timeout: Duration,
}

impl DetailFetcher {
    pub fn new(source: Arc<dyn VideoSource>, timeout: Duration) -> Self {
        Self { source, timeout }
    }

    pub async fn fetch_detail(&self, external_id: &str) -> Result<VideoDetail, IngestError> {
        let result = match tokio::time::timeout(self.timeout, self.source.video_detail(external_id))
            .await
        {
            Ok(r) => r,
            Err(_) => Err(SourceError::Timeout),
        };

        match result {
            Ok(detail) => {
                debug!(external_id, title = detail.title.as_str(), "Fetched video detail");
                Ok(detail)
            }
            Err(SourceError::NotFound(message)) => {
                warn!(external_id, message, "Video not found");
                Err(IngestError::DetailNotFound(external_id.to_string()))
            }
            Err(e) => {
                warn!(external_id, error = %e, "Detail fetch failed");
                Err(IngestError::DetailFetch {
                    external_id: external_id.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }
}
