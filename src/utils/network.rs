//! Request header preparation
//!
//! Observed requests carry whatever the browser sent. Only headers that describe the
//! request context are replayed; credentials are never forwarded.

use url::Url;

use crate::core::models::HeaderMap;

/// Headers that may be replayed from an observed request
const REPLAYABLE_HEADERS: &[&str] = &[
    "accept",
    "accept-language",
    "user-agent",
    "referer",
    "origin",
    "range",
];

fn is_replayable(name: &str) -> bool {
    REPLAYABLE_HEADERS.contains(&name) || name.starts_with("sec-fetch-")
}

/// `user-agent` -> `User-Agent`
pub fn canonical_header_name(name: &str) -> String {
    name.trim()
        .split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => {
                    first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// `scheme://host[:port]` of a page URL
pub fn page_origin(page_url: &str) -> Option<String> {
    let origin = Url::parse(page_url).ok()?.origin();
    if origin.is_tuple() {
        Some(origin.ascii_serialization())
    } else {
        None
    }
}

/// Build the header set for a job's requests.
///
/// Static headers from configuration come first, replayable observed headers override
/// them, and `Referer`/`Origin` default to the page the media was observed on.
pub fn prepare_request_headers(
    static_headers: &HeaderMap,
    observed: &HeaderMap,
    page_url: Option<&str>,
) -> HeaderMap {
    let mut headers = HeaderMap::new();

    for (name, value) in static_headers {
        headers.insert(canonical_header_name(name), value.clone());
    }

    for (name, value) in observed {
        let lowered = name.trim().to_ascii_lowercase();
        if is_replayable(&lowered) && !value.trim().is_empty() {
            headers.insert(canonical_header_name(&lowered), value.trim().to_string());
        }
    }

    // Fetches always start at byte 0
    headers.remove("Range");

    if let Some(page) = page_url {
        headers
            .entry("Referer".to_string())
            .or_insert_with(|| page.to_string());
        if let Some(origin) = page_origin(page) {
            headers.entry("Origin".to_string()).or_insert(origin);
        }
    }

    headers
        .entry("Accept".to_string())
        .or_insert_with(|| "*/*".to_string());

    headers
}
