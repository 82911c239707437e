//! SQL text for the video upsert: the parameterized statement that is
//! executed, and a literal rendering of it for audit output.

use chrono::{DateTime, SecondsFormat, Utc};
use cosdrama_common::CanonicalVideoRecord;
use uuid::Uuid;

const VIDEO_COLUMNS: &str = "id, bv_number, title, description, url, thumbnail, created_at, \
                             updated_at, competition_id, group_id, uploaded_by_id, year";

const VIDEO_CONFLICT: &str = "ON CONFLICT (bv_number) DO UPDATE SET \
     competition_id = COALESCE(videos_video.competition_id, EXCLUDED.competition_id), \
     group_id = COALESCE(videos_video.group_id, EXCLUDED.group_id), \
     updated_at = EXCLUDED.updated_at";

/// Executed form. `prior` captures the row as it was before the statement
/// so the caller can tell which foreign keys were kept.
pub(crate) fn video_upsert_statement() -> String {
    format!(
        "WITH prior AS (\
             SELECT competition_id, group_id FROM videos_video WHERE bv_number = $2\
         ) \
         INSERT INTO videos_video ({VIDEO_COLUMNS}) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
         {VIDEO_CONFLICT} \
         RETURNING videos_video.id, \
             (xmax = 0) AS inserted, \
             COALESCE((SELECT competition_id IS NOT NULL FROM prior), FALSE) AS competition_kept, \
             COALESCE((SELECT group_id IS NOT NULL FROM prior), FALSE) AS group_kept"
    )
}

fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

fn quote_uuid(id: Option<Uuid>) -> String {
    id.map(|u| quote(&u.to_string()))
        .unwrap_or_else(|| "NULL".to_string())
}

fn quote_ts(ts: DateTime<Utc>) -> String {
    quote(&ts.to_rfc3339_opts(SecondsFormat::Micros, true))
}

/// The upsert with every value inlined. For display only.
pub fn render_video_upsert(record: &CanonicalVideoRecord) -> String {
    let values = [
        quote(&record.id.to_string()),
        quote(&record.external_id),
        quote(&record.title),
        quote(&record.description),
        quote(&record.url),
        quote(&record.thumbnail),
        quote_ts(record.created_at),
        quote_ts(record.updated_at),
        quote_uuid(record.competition_id),
        quote_uuid(record.group_id),
        quote_uuid(record.uploader_id),
        record
            .year
            .map(|y| y.to_string())
            .unwrap_or_else(|| "NULL".to_string()),
    ];
    format!(
        "INSERT INTO videos_video ({VIDEO_COLUMNS}) VALUES ({}) {VIDEO_CONFLICT};",
        values.join(", ")
    )
}
