//! Stream classification
//!
//! Pure string inspection: decides what an observed URL is from its extension and,
//! failing that, its content-type hint. Never touches the network.

use url::Url;

use crate::core::models::{ObservedUrl, StreamKind};

const MANIFEST_EXTENSIONS: &[&str] = &["m3u8", "mpd"];
const FRAGMENT_EXTENSIONS: &[&str] = &["ts", "m4s"];
const DIRECT_MEDIA_EXTENSIONS: &[&str] = &["mp4", "webm", "flv", "avi", "mov"];

/// Lowercased extension of the URL's last path segment, ignoring query and fragment
pub fn url_extension(url: &str) -> Option<String> {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    };

    let file_name = path.rsplit('/').next()?;
    let (stem, extension) = file_name.rsplit_once('.')?;
    if stem.is_empty() || extension.is_empty() {
        return None;
    }
    Some(extension.to_ascii_lowercase())
}

/// Classify a URL. Rules apply in order: manifest extension, fragment extension,
/// direct-media extension or a `video` content type, otherwise irrelevant.
pub fn classify(url: &str, content_type: Option<&str>) -> StreamKind {
    let extension = url_extension(url);
    let has_extension = |candidates: &[&str]| {
        extension
            .as_deref()
            .is_some_and(|ext| candidates.contains(&ext))
    };

    if has_extension(MANIFEST_EXTENSIONS) {
        return StreamKind::Manifest;
    }
    if has_extension(FRAGMENT_EXTENSIONS) {
        return StreamKind::Fragment;
    }
    let video_content = content_type.is_some_and(|ct| ct.to_ascii_lowercase().contains("video"));
    if has_extension(DIRECT_MEDIA_EXTENSIONS) || video_content {
        return StreamKind::DirectMedia;
    }
    StreamKind::Irrelevant
}

/// An observed URL together with its tag
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedUrl {
    pub observed: ObservedUrl,
    pub kind: StreamKind,
}

pub fn classify_observed(observed: &ObservedUrl) -> ClassifiedUrl {
    ClassifiedUrl {
        kind: classify(&observed.url, observed.content_type.as_deref()),
        observed: observed.clone(),
    }
}
