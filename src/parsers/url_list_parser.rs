//! User-supplied URL list parsing
//!
//! A list pasted from the browser helper script is either JSON (`{"videoUrls": [...]}`,
//! or a bare array) or plain text with one URL per line. JSON is tried first.

use serde::Deserialize;
use std::collections::HashSet;

use crate::core::models::PageSnapshot;
use crate::utils::is_http_url;

/// Which input form a URL list was read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedUrlList {
    Json(Vec<String>),
    Lines(Vec<String>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonPayload {
    Object {
        #[serde(rename = "videoUrls")]
        video_urls: Vec<serde_json::Value>,
    },
    List(Vec<serde_json::Value>),
}

impl ParsedUrlList {
    pub fn urls(&self) -> &[String] {
        match self {
            ParsedUrlList::Json(urls) | ParsedUrlList::Lines(urls) => urls,
        }
    }

    pub fn into_urls(self) -> Vec<String> {
        match self {
            ParsedUrlList::Json(urls) | ParsedUrlList::Lines(urls) => urls,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.urls().is_empty()
    }

    /// Snapshot with no content-type hints; classification falls back to extensions
    pub fn into_snapshot(self) -> PageSnapshot {
        PageSnapshot::from_urls(self.into_urls())
    }
}

/// Parse a pasted URL list
pub fn parse_url_list(input: &str) -> ParsedUrlList {
    match serde_json::from_str::<JsonPayload>(input.trim()) {
        Ok(payload) => {
            let values = match payload {
                JsonPayload::Object { video_urls } => video_urls,
                JsonPayload::List(values) => values,
            };
            let urls = values
                .into_iter()
                .filter_map(|value| value.as_str().map(|s| s.trim().to_string()))
                .filter(|url| is_http_url(url));
            ParsedUrlList::Json(dedup_preserving_order(urls))
        }
        Err(_) => {
            let urls = input
                .lines()
                .map(str::trim)
                .filter(|line| line.starts_with("http://") || line.starts_with("https://"))
                .map(str::to_string);
            ParsedUrlList::Lines(dedup_preserving_order(urls))
        }
    }
}

fn dedup_preserving_order(urls: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    urls.filter(|url| seen.insert(url.clone())).collect()
}
