use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const VIDEO_URL_PREFIX: &str = "https://www.bilibili.com/video/";

// --- Discovery Types ---

/// One hit from the search API, with highlight markup already removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResultItem {
    pub external_id: String,
    pub title: String,
    pub published_at: Option<DateTime<Utc>>,
}

/// Per-video metadata from the detail endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoDetail {
    pub external_id: String,
    pub title: String,
    pub description: String,
    pub cover_url: String,
    /// Epoch seconds; only used to derive the record's year.
    pub publish_timestamp: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationBucket {
    All,
    Under10,
    From10To30,
    From30To60,
    Over60,
}

impl DurationBucket {
    pub const ALL: [DurationBucket; 5] = [
        DurationBucket::All,
        DurationBucket::Under10,
        DurationBucket::From10To30,
        DurationBucket::From30To60,
        DurationBucket::Over60,
    ];

    pub fn code(self) -> u8 {
        match self {
            DurationBucket::All => 0,
            DurationBucket::Under10 => 1,
            DurationBucket::From10To30 => 2,
            DurationBucket::From30To60 => 3,
            DurationBucket::Over60 => 4,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|b| i64::from(b.code()) == code)
    }

    /// Filter used when the caller does not choose one: 10 to 60 minutes,
    /// where full stage recordings live.
    pub fn default_filter() -> Vec<Self> {
        vec![DurationBucket::From10To30, DurationBucket::From30To60]
    }

    /// Keep the valid codes (first occurrence, input order). An empty result
    /// falls back to `[All]`.
    pub fn normalize(codes: &[i64]) -> Vec<Self> {
        let mut buckets: Vec<Self> = Vec::new();
        for bucket in codes.iter().filter_map(|&c| Self::from_code(c)) {
            if !buckets.contains(&bucket) {
                buckets.push(bucket);
            }
        }
        if buckets.is_empty() {
            buckets.push(DurationBucket::All);
        }
        buckets
    }

    /// Buckets for an inclusive code range, as given on the command line.
    pub fn range(min: i64, max: i64) -> Vec<Self> {
        let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
        let codes: Vec<i64> = (lo.max(0)..=hi.min(4)).collect();
        Self::normalize(&codes)
    }
}

impl std::fmt::Display for DurationBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DurationBucket::All => write!(f, "all"),
            DurationBucket::Under10 => write!(f, "<10min"),
            DurationBucket::From10To30 => write!(f, "10-30min"),
            DurationBucket::From30To60 => write!(f, "30-60min"),
            DurationBucket::Over60 => write!(f, ">60min"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchOrder {
    TotalRank,
    Click,
    #[default]
    PubDate,
    Danmaku,
    Stow,
    Scores,
    Attention,
}

impl SearchOrder {
    pub fn wire_name(self) -> &'static str {
        match self {
            SearchOrder::TotalRank => "totalrank",
            SearchOrder::Click => "click",
            SearchOrder::PubDate => "pubdate",
            SearchOrder::Danmaku => "dm",
            SearchOrder::Stow => "stow",
            SearchOrder::Scores => "scores",
            SearchOrder::Attention => "attention",
        }
    }
}

impl std::fmt::Display for SearchOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl std::str::FromStr for SearchOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        [
            SearchOrder::TotalRank,
            SearchOrder::Click,
            SearchOrder::PubDate,
            SearchOrder::Danmaku,
            SearchOrder::Stow,
            SearchOrder::Scores,
            SearchOrder::Attention,
        ]
        .into_iter()
        .find(|o| o.wire_name() == normalized)
        .ok_or_else(|| {
            format!(
                "unknown order '{s}' (expected totalrank, click, pubdate, dm, stow, scores or attention)"
            )
        })
    }
}

// --- Extraction Types ---

/// Entity mentions pulled out of a video's title and description.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ExtractedMentions {
    /// Competition or event name, e.g. ChinaJoy, BW, BML. Null if not stated.
    pub competition: Option<String>,
    /// Performing group (社团) name. Null if not stated.
    pub group: Option<String>,
    /// Title of the work being performed. Null if not stated.
    pub work_name: Option<String>,
}

impl ExtractedMentions {
    /// Trim every field and turn blanks into `None`.
    pub fn normalized(self) -> Self {
        fn clean(value: Option<String>) -> Option<String> {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        }
        Self {
            competition: clean(self.competition),
            group: clean(self.group),
            work_name: clean(self.work_name),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.competition.is_none() && self.group.is_none() && self.work_name.is_none()
    }
}

// --- Resolution Types ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Competition,
    Group,
}

impl EntityKind {
    pub fn table_name(self) -> &'static str {
        match self {
            EntityKind::Competition => "competitions_competition",
            EntityKind::Group => "groups_group",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Competition => write!(f, "competition"),
            EntityKind::Group => write!(f, "group"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedForeignKeys {
    pub competition_id: Option<Uuid>,
    pub group_id: Option<Uuid>,
}

// --- Canonical Records ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalVideoRecord {
    pub id: Uuid,
    /// Natural key (`bv_number`).
    pub external_id: String,
    pub title: String,
    pub description: String,
    pub url: String,
    pub thumbnail: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub competition_id: Option<Uuid>,
    pub group_id: Option<Uuid>,
    /// Never set by ingestion.
    pub uploader_id: Option<Uuid>,
    pub year: Option<i32>,
    pub competition_mention: Option<String>,
    pub group_mention: Option<String>,
    pub work_mention: Option<String>,
}

impl CanonicalVideoRecord {
    /// Display pairs for reports, in column order.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        fn opt<T: ToString>(v: &Option<T>) -> String {
            v.as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "null".to_string())
        }
        vec![
            ("id", self.id.to_string()),
            ("bv_number", self.external_id.clone()),
            ("title", self.title.clone()),
            ("description", self.description.clone()),
            ("url", self.url.clone()),
            ("thumbnail", self.thumbnail.clone()),
            ("created_at", self.created_at.to_rfc3339()),
            ("updated_at", self.updated_at.to_rfc3339()),
            ("competition_id", opt(&self.competition_id)),
            ("group_id", opt(&self.group_id)),
            ("uploaded_by_id", opt(&self.uploader_id)),
            ("year", opt(&self.year)),
            ("competition_mention", opt(&self.competition_mention)),
            ("group_mention", opt(&self.group_mention)),
            ("work_mention", opt(&self.work_mention)),
        ]
    }
}

/// A group row created when a mentioned group has no close-enough match.
///
/// The store's columns are non-null, so unknown values get placeholders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalGroupEntity {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub location: String,
    pub province: String,
    pub city: String,
    pub website: String,
    pub email: String,
    pub phone: String,
    pub weibo: String,
    pub wechat: String,
    pub qq_group: String,
    pub bilibili: String,
    pub is_active: bool,
    pub video_count: i32,
    pub award_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CanonicalGroupEntity {
    pub const PLACEHOLDER_DESCRIPTION: &'static str = "NULL";
    pub const PLACEHOLDER_LOCATION: &'static str = "Unknown";

    /// Placeholder-filled group named after `name` (trimmed).
    pub fn placeholder(name: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.trim().to_string(),
            description: Self::PLACEHOLDER_DESCRIPTION.to_string(),
            location: Self::PLACEHOLDER_LOCATION.to_string(),
            province: Self::PLACEHOLDER_LOCATION.to_string(),
            city: Self::PLACEHOLDER_LOCATION.to_string(),
            website: String::new(),
            email: String::new(),
            phone: String::new(),
            weibo: String::new(),
            wechat: String::new(),
            qq_group: String::new(),
            bilibili: String::new(),
            is_active: true,
            video_count: 0,
            award_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}
