use serde::Deserialize;

/// Envelope shared by every `api.bilibili.com/x/...` endpoint.
///
/// `code == 0` means success; on failure `data` is usually null.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
}

// --- nav (WBI keys) ---

#[derive(Debug, Clone, Deserialize)]
pub struct NavData {
    pub wbi_img: WbiImg,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WbiImg {
    pub img_url: String,
    pub sub_url: String,
}

// --- search/type ---

#[derive(Debug, Clone, Deserialize)]
pub struct SearchData {
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default, rename = "numPages")]
    pub num_pages: Option<u32>,
    /// Absent when the query has no hits.
    #[serde(default)]
    pub result: Vec<SearchVideo>,
}

/// A single hit from `search_type=video`. The title carries
/// `<em class="keyword">` highlight markup around matched terms.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchVideo {
    pub bvid: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub pubdate: Option<i64>,
    #[serde(default)]
    pub arcurl: Option<String>,
}

// --- view ---

#[derive(Debug, Clone, Deserialize)]
pub struct ViewData {
    pub bvid: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub pic: String,
    #[serde(default)]
    pub pubdate: Option<i64>,
    #[serde(default)]
    pub owner: Option<ViewOwner>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ViewOwner {
    pub mid: i64,
    pub name: String,
}

/// Query parameters for one `search/type` call (a single duration bucket).
#[derive(Debug, Clone)]
pub struct SearchParams {
    pub keyword: String,
    pub page: u32,
    /// Wire name: totalrank, click, pubdate, dm, stow, scores, attention.
    pub order: String,
    /// 0 all, 1 under 10 min, 2 10-30 min, 3 30-60 min, 4 over 60 min.
    pub duration: u8,
    pub pubtime_begin_s: Option<i64>,
    pub pubtime_end_s: Option<i64>,
}

impl SearchParams {
    pub(crate) fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("keyword", self.keyword.clone()),
            ("page", self.page.to_string()),
            ("search_type", "video".to_string()),
            ("order", self.order.clone()),
            ("duration", self.duration.to_string()),
        ];
        if let Some(begin) = self.pubtime_begin_s {
            pairs.push(("pubtime_begin_s", begin.to_string()));
        }
        if let Some(end) = self.pubtime_end_s {
            pairs.push(("pubtime_end_s", end.to_string()));
        }
        pairs
    }
}
