//! HLS playlist parsing utilities

use m3u8_rs::{KeyMethod, MediaPlaylist, Playlist};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::core::error_handling::{errors, ReassemblyResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HlsSegment {
    pub url: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HlsVariant {
    pub url: String,
    pub bandwidth: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HlsMediaPlaylist {
    pub url: String,
    pub segments: Vec<HlsSegment>,
    /// `EXT-X-MAP` initialization segment
    pub init_segment: Option<String>,
    /// Any segment carries an `EXT-X-KEY` other than `METHOD=NONE`
    pub encrypted: bool,
    /// No `EXT-X-ENDLIST`; the segment list may still grow
    pub is_live: bool,
    pub target_duration: u64,
}

impl HlsMediaPlaylist {
    /// Declared media duration, unknown for live playlists
    pub fn total_duration_ms(&self) -> Option<u64> {
        if self.is_live {
            None
        } else {
            Some(self.segments.iter().map(|s| s.duration_ms).sum())
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum HlsPlaylist {
    Master(Vec<HlsVariant>),
    Media(HlsMediaPlaylist),
}

/// Parse playlist bytes fetched from `playlist_url`; relative URIs are resolved
/// against it.
pub fn parse_hls_playlist(playlist_url: &str, content: &[u8]) -> ReassemblyResult<HlsPlaylist> {
    let base = Url::parse(playlist_url)
        .map_err(|e| errors::manifest_error(playlist_url, format!("invalid playlist URL: {e}")))?;

    match m3u8_rs::parse_playlist_res(content) {
        Ok(Playlist::MasterPlaylist(master)) => {
            let variants = master
                .variants
                .iter()
                .filter(|v| !v.is_i_frame)
                .map(|v| {
                    Ok(HlsVariant {
                        url: resolve_url(&base, &v.uri)?,
                        bandwidth: v.bandwidth,
                    })
                })
                .collect::<ReassemblyResult<Vec<_>>>()?;
            Ok(HlsPlaylist::Master(variants))
        }
        Ok(Playlist::MediaPlaylist(media)) => {
            Ok(HlsPlaylist::Media(convert_media(playlist_url, &base, &media)?))
        }
        Err(e) => Err(errors::manifest_error(
            playlist_url,
            format!("failed to parse playlist: {e}"),
        )),
    }
}

fn convert_media(
    playlist_url: &str,
    base: &Url,
    media: &MediaPlaylist,
) -> ReassemblyResult<HlsMediaPlaylist> {
    let segments = media
        .segments
        .iter()
        .map(|segment| {
            Ok(HlsSegment {
                url: resolve_url(base, &segment.uri)?,
                duration_ms: (segment.duration as f64 * 1000.0).round() as u64,
            })
        })
        .collect::<ReassemblyResult<Vec<_>>>()?;

    let encrypted = media.segments.iter().any(|segment| {
        segment
            .key
            .as_ref()
            .is_some_and(|key| !matches!(key.method, KeyMethod::None))
    });

    // EXT-X-MAP before the first segment is kept as an unknown tag by m3u8-rs
    let init_uri = media
        .segments
        .iter()
        .find_map(|segment| segment.map.as_ref().map(|map| map.uri.clone()))
        .or_else(|| {
            media
                .unknown_tags
                .iter()
                .find(|tag| tag.tag == "X-MAP")
                .and_then(|tag| tag.rest.as_deref())
                .and_then(map_uri_attribute)
        });
    let init_segment = init_uri.map(|uri| resolve_url(base, &uri)).transpose()?;

    Ok(HlsMediaPlaylist {
        url: playlist_url.to_string(),
        segments,
        init_segment,
        encrypted,
        is_live: !media.end_list,
        target_duration: media.target_duration,
    })
}

/// `URI="init.mp4",BYTERANGE=...` -> `init.mp4`
fn map_uri_attribute(attributes: &str) -> Option<String> {
    let start = attributes.find("URI=")? + 4;
    let rest = &attributes[start..];
    let value = match rest.strip_prefix('"') {
        Some(quoted) => quoted.split('"').next()?,
        None => rest.split(',').next()?,
    };
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Highest declared bandwidth wins
pub fn select_variant(variants: &[HlsVariant]) -> Option<&HlsVariant> {
    variants.iter().max_by_key(|v| v.bandwidth)
}

/// Resolve a possibly relative URI against the playlist URL
pub fn resolve_url(base: &Url, relative: &str) -> ReassemblyResult<String> {
    base.join(relative.trim())
        .map(|u| u.to_string())
        .map_err(|e| errors::manifest_error(base.as_str(), format!("bad URI {relative}: {e}")))
}
