//! WBI request signing.
//!
//! Bilibili's web endpoints require a `w_rid` signature over the sorted query
//! string, keyed by a "mixin key" derived from two rotating image-file stems
//! published on `/x/web-interface/nav`.

use md5::{Digest, Md5};

const MIXIN_KEY_ENC_TAB: [usize; 64] = [
    46, 47, 18, 2, 53, 8, 23, 32, 15, 50, 10, 31, 58, 3, 45, 35, 27, 43, 5, 49, 33, 9, 42, 19, 29,
    28, 14, 39, 12, 38, 41, 13, 37, 48, 7, 16, 24, 55, 40, 61, 26, 17, 0, 1, 60, 51, 30, 4, 22, 25,
    54, 21, 56, 59, 6, 63, 57, 62, 11, 36, 20, 34, 44, 52,
];

/// Characters the server strips from values before verifying.
const STRIPPED_CHARS: [char; 5] = ['!', '\'', '(', ')', '*'];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WbiKeys {
    pub img_key: String,
    pub sub_key: String,
}

impl WbiKeys {
    /// Build keys from the `wbi_img` URLs: each key is the file stem,
    /// e.g. `.../bfs/wbi/7cd0849...077c.png` -> `7cd0849...077c`.
    pub fn from_urls(img_url: &str, sub_url: &str) -> Option<Self> {
        Some(Self {
            img_key: file_stem(img_url)?,
            sub_key: file_stem(sub_url)?,
        })
    }

    pub fn mixin_key(&self) -> String {
        let orig: Vec<char> = format!("{}{}", self.img_key, self.sub_key).chars().collect();
        MIXIN_KEY_ENC_TAB
            .iter()
            .filter_map(|&i| orig.get(i))
            .take(32)
            .collect()
    }
}

fn file_stem(url: &str) -> Option<String> {
    let name = url.rsplit('/').next()?;
    let stem = name.split('.').next()?;
    if stem.is_empty() {
        None
    } else {
        Some(stem.to_string())
    }
}

/// Percent-encode a query component the way `encodeURIComponent` does:
/// unreserved characters pass through, space becomes `%20`.
fn encode_component(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
        .replace("%7E", "~")
}

fn encode_query(params: &[(String, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", encode_component(k), encode_component(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Sign `params` at time `wts` (unix seconds) and return the full query
/// string to send, `w_rid` included.
///
/// The returned string is exactly the one that was hashed (plus the
/// trailing `w_rid`), so the server sees the same encoding we signed.
pub fn sign_query(params: &[(&str, String)], keys: &WbiKeys, wts: i64) -> String {
    let mut sorted: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| {
            let cleaned: String = v.chars().filter(|c| !STRIPPED_CHARS.contains(c)).collect();
            (k.to_string(), cleaned)
        })
        .collect();
    sorted.push(("wts".to_string(), wts.to_string()));
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let query = encode_query(&sorted);
    let w_rid = hex::encode(Md5::digest(format!("{query}{}", keys.mixin_key())));

    format!("{query}&w_rid={w_rid}")
}
