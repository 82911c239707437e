use chrono::{DateTime, Datelike, Utc};
use uuid::Uuid;

use cosdrama_common::{
    CanonicalVideoRecord, ExtractedMentions, ResolvedForeignKeys, VideoDetail, VIDEO_URL_PREFIX,
};

/// Build the canonical record for a fetched video.
pub fn compose(
    detail: &VideoDetail,
    mentions: &ExtractedMentions,
    fks: &ResolvedForeignKeys,
) -> CanonicalVideoRecord {
    compose_at(detail, mentions, fks, Uuid::new_v4(), Utc::now())
}

pub fn compose_at(
    detail: &VideoDetail,
    mentions: &ExtractedMentions,
    fks: &ResolvedForeignKeys,
    id: Uuid,
    now: DateTime<Utc>,
) -> CanonicalVideoRecord {
    CanonicalVideoRecord {
        id,
        external_id: detail.external_id.clone(),
        title: detail.title.clone(),
        description: detail.description.clone(),
        url: format!("{VIDEO_URL_PREFIX}{}", detail.external_id),
        thumbnail: detail.cover_url.clone(),
        created_at: now,
        updated_at: now,
        competition_id: fks.competition_id,
        group_id: fks.group_id,
        uploader_id: None,
        year: publish_year(detail.publish_timestamp),
        competition_mention: mentions.competition.clone(),
        group_mention: mentions.group.clone(),
        work_mention: mentions.work_name.clone(),
    }
}

/// Calendar year (UTC) of an epoch-seconds timestamp.
fn publish_year(timestamp: Option<i64>) -> Option<i32> {
    timestamp
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|t| t.year())
}
