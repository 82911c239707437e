pub mod error;
pub mod types;
pub mod wbi;

pub use error::{BilibiliError, Result};
pub use types::{SearchParams, SearchVideo, ViewData};
pub use wbi::WbiKeys;

use std::sync::RwLock;
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE};
use serde::de::DeserializeOwned;
use types::{ApiEnvelope, NavData, SearchData};

const API_BASE: &str = "https://api.bilibili.com";

/// WBI keys rotate roughly daily; refetch well before that.
const WBI_KEY_TTL: Duration = Duration::from_secs(30 * 60);

const BROWSER_HEADERS: &[(&str, &str)] = &[
    (
        "accept",
        "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
    ),
    ("accept-language", "zh-CN,zh;q=0.9"),
    ("cache-control", "no-cache"),
    ("pragma", "no-cache"),
    (
        "sec-ch-ua",
        "\"Not A(Brand\";v=\"99\", \"Google Chrome\";v=\"121\", \"Chromium\";v=\"121\"",
    ),
    ("sec-ch-ua-mobile", "?0"),
    ("sec-ch-ua-platform", "\"macOS\""),
    (
        "user-agent",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
         (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    ),
    ("referer", "https://www.bilibili.com/"),
];

/// Parse a browser-style cookie string (`k=v; k2=v2`) into pairs.
///
/// Entries without `=` or with an empty name are skipped; values wrapped in
/// double quotes are unquoted.
pub fn parse_cookies(raw: &str) -> Vec<(String, String)> {
    raw.split(';')
        .filter_map(|part| {
            let (name, value) = part.trim().split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    /// Raw cookie string, typically from `BILIBILI_COOKIES`.
    pub cookies: Option<String>,
    /// Whole-request timeout applied to every call.
    pub timeout: Option<Duration>,
}

struct CachedKeys {
    keys: WbiKeys,
    fetched_at: Instant,
}

pub struct BilibiliClient {
    client: reqwest::Client,
    wbi_keys: RwLock<Option<CachedKeys>>,
}

impl BilibiliClient {
    pub fn new(options: ClientOptions) -> Result<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in BROWSER_HEADERS {
            headers.insert(
                HeaderName::from_static(*name),
                HeaderValue::from_static(*value),
            );
        }

        if let Some(raw) = options.cookies.as_deref() {
            let cookie = parse_cookies(raw)
                .into_iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; ");
            if !cookie.is_empty() {
                let value = HeaderValue::from_str(&cookie).map_err(|_| {
                    BilibiliError::Config("cookie string contains invalid characters".into())
                })?;
                headers.insert(COOKIE, value);
            }
        }

        let mut builder = reqwest::Client::builder().default_headers(headers);
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| BilibiliError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            wbi_keys: RwLock::new(None),
        })
    }

    /// Current WBI keys, fetched from `nav` when missing or stale.
    pub async fn wbi_keys(&self) -> Result<WbiKeys> {
        {
            let cached = self.wbi_keys.read().unwrap_or_else(|p| p.into_inner());
            if let Some(c) = cached.as_ref() {
                if c.fetched_at.elapsed() < WBI_KEY_TTL {
                    return Ok(c.keys.clone());
                }
            }
        }

        let keys = self.fetch_wbi_keys().await?;
        let mut slot = self.wbi_keys.write().unwrap_or_else(|p| p.into_inner());
        *slot = Some(CachedKeys {
            keys: keys.clone(),
            fetched_at: Instant::now(),
        });
        Ok(keys)
    }

    fn invalidate_wbi_keys(&self) {
        let mut slot = self.wbi_keys.write().unwrap_or_else(|p| p.into_inner());
        *slot = None;
    }

    async fn fetch_wbi_keys(&self) -> Result<WbiKeys> {
        let url = format!("{}/x/web-interface/nav", API_BASE);
        let resp = self.client.get(&url).send().await?;
        let envelope: ApiEnvelope<NavData> = Self::decode(resp).await?;

        // nav answers -101 (not logged in) for anonymous sessions but still
        // publishes the key images, so the code is not checked here.
        let nav = envelope.data.ok_or(BilibiliError::MissingData("data.wbi_img"))?;
        let keys = WbiKeys::from_urls(&nav.wbi_img.img_url, &nav.wbi_img.sub_url)
            .ok_or(BilibiliError::MissingData("wbi key file names"))?;

        tracing::debug!("Fetched WBI keys");
        Ok(keys)
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BilibiliError::Http {
                status: status.as_u16(),
                body,
            });
        }
        let bytes = resp.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// GET a WBI-signed endpoint and unwrap the `{code, message, data}` envelope.
    async fn signed_get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let keys = self.wbi_keys().await?;
        let query = wbi::sign_query(params, &keys, chrono::Utc::now().timestamp());
        let url = format!("{}{}?{}", API_BASE, path, query);

        let resp = self.client.get(&url).send().await?;
        let envelope: ApiEnvelope<T> = Self::decode(resp).await?;

        if envelope.code != 0 {
            let err = BilibiliError::Api {
                code: envelope.code,
                message: envelope.message,
            };
            if err.is_signature_rejected() {
                self.invalidate_wbi_keys();
            }
            return Err(err);
        }

        envelope.data.ok_or(BilibiliError::MissingData("data"))
    }

    /// Run one page of `search/type?search_type=video` for a single
    /// duration bucket.
    pub async fn search_videos(&self, params: &SearchParams) -> Result<Vec<SearchVideo>> {
        let data: SearchData = self
            .signed_get("/x/web-interface/wbi/search/type", &params.to_pairs())
            .await?;

        tracing::debug!(
            keyword = %params.keyword,
            duration = params.duration,
            page = data.page.unwrap_or(params.page),
            num_pages = data.num_pages.unwrap_or(0),
            hits = data.result.len(),
            "Search page fetched"
        );
        Ok(data.result)
    }

    /// Fetch the `view` metadata of a single video by its BV id.
    pub async fn video_view(&self, bvid: &str) -> Result<ViewData> {
        self.signed_get("/x/web-interface/view", &[("bvid", bvid.to_string())])
            .await
    }
}
