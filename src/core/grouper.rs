//! Fragment grouping
//!
//! Fragments of one logical stream share a directory, a filename skeleton and an
//! extension, and differ only in a trailing numeric index:
//!
//! ```text
//! https://cdn/seg/index_50.ts   -> dir https://cdn/seg/, skeleton "index_", index 50
//! https://cdn/seg/index51.ts    -> dir https://cdn/seg/, skeleton "index",  index 51
//! ```
//!
//! The delimiter stays part of the skeleton, so the two URLs above never collide.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::debug;
use url::Url;

use crate::core::models::{FragmentGroup, ObservedUrl, TrackKind};

/// Default ratio for telling a video track from an audio track
pub const DEFAULT_TRACK_SIZE_RATIO: f64 = 2.0;

fn trailing_digits() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(.*?)(\d+)$").expect("static regex"))
}

#[derive(Debug, Clone)]
struct ParsedFragment {
    directory: String,
    skeleton: String,
    extension: String,
    index: Option<u64>,
    observed: ObservedUrl,
}

fn parse_fragment(observed: &ObservedUrl) -> Option<ParsedFragment> {
    let parsed = Url::parse(&observed.url).ok()?;
    let (dir_path, file_name) = parsed.path().rsplit_once('/')?;
    let (stem, extension) = file_name.rsplit_once('.')?;

    let origin = parsed.origin();
    let prefix = if origin.is_tuple() {
        origin.ascii_serialization()
    } else {
        format!("{}://{}", parsed.scheme(), parsed.host_str().unwrap_or_default())
    };

    let (skeleton, index) = match trailing_digits().captures(stem) {
        Some(caps) => match caps[2].parse::<u64>() {
            Ok(index) => (caps[1].to_string(), Some(index)),
            Err(_) => (stem.to_string(), None),
        },
        None => (stem.to_string(), None),
    };

    Some(ParsedFragment {
        directory: format!("{}{}/", prefix, dir_path),
        skeleton,
        extension: extension.to_ascii_lowercase(),
        index,
        observed: observed.clone(),
    })
}

/// A candidate group that did not become a [`FragmentGroup`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscardedGroup {
    pub group_key: String,
    pub members: usize,
}

/// Grouping result including what was dropped as noise
#[derive(Debug, Clone, Default)]
pub struct Grouping {
    pub groups: Vec<FragmentGroup>,
    pub discarded: Vec<DiscardedGroup>,
}

#[derive(Debug, Clone)]
pub struct FragmentGrouper {
    track_size_ratio: f64,
}

impl Default for FragmentGrouper {
    fn default() -> Self {
        Self::new(DEFAULT_TRACK_SIZE_RATIO)
    }
}

impl FragmentGrouper {
    pub fn new(track_size_ratio: f64) -> Self {
        Self { track_size_ratio }
    }

    /// Group fragment URLs into ordered streams
    pub fn group<'a>(&self, urls: impl IntoIterator<Item = &'a ObservedUrl>) -> Vec<FragmentGroup> {
        self.group_with_report(urls).groups
    }

    pub fn group_with_report<'a>(
        &self,
        urls: impl IntoIterator<Item = &'a ObservedUrl>,
    ) -> Grouping {
        let mut buckets: BTreeMap<(String, String, String), Vec<(u64, ObservedUrl)>> =
            BTreeMap::new();
        let mut unindexed = Vec::new();
        let mut discarded = Vec::new();

        for observed in urls {
            let Some(fragment) = parse_fragment(observed) else {
                debug!("Fragment URL has no usable file name: {}", observed.url);
                discarded.push(DiscardedGroup {
                    group_key: observed.url.clone(),
                    members: 1,
                });
                continue;
            };
            match fragment.index {
                Some(index) => buckets
                    .entry((
                        fragment.directory,
                        fragment.skeleton,
                        fragment.extension,
                    ))
                    .or_default()
                    .push((index, fragment.observed)),
                None => unindexed.push(fragment),
            }
        }

        let mut groups = Vec::new();
        for ((directory, skeleton, extension), mut members) in buckets {
            let group_key = format!("{}{}*.{}", directory, skeleton, extension);
            members.sort_by_key(|(index, _)| *index);
            members.dedup_by_key(|(index, _)| *index);

            if members.len() < 2 {
                debug!(
                    "Discarding fragment group {} with {} member(s)",
                    group_key,
                    members.len()
                );
                discarded.push(DiscardedGroup {
                    group_key,
                    members: members.len(),
                });
                continue;
            }

            let (indices, members): (Vec<u64>, Vec<ObservedUrl>) = members.into_iter().unzip();
            groups.push(FragmentGroup {
                group_key,
                kind: TrackKind::Unknown,
                members,
                indices,
                init_segment: None,
                directory,
                extension,
            });
        }

        for fragment in unindexed {
            if !attach_init_segment(&mut groups, &fragment) {
                debug!("Unindexed fragment left out: {}", fragment.observed.url);
                discarded.push(DiscardedGroup {
                    group_key: fragment.observed.url.clone(),
                    members: 1,
                });
            }
        }

        self.assign_track_kinds(&mut groups);

        Grouping { groups, discarded }
    }

    fn assign_track_kinds(&self, groups: &mut [FragmentGroup]) {
        for group in groups.iter_mut() {
            group.kind = explicit_track_kind(group).unwrap_or(TrackKind::Unknown);
        }

        if let [first, second] = groups {
            match (first.kind, second.kind) {
                (TrackKind::Unknown, TrackKind::Unknown) => {
                    if let Some(first_is_video) = self.larger_track(first, second) {
                        let (video, audio) = if first_is_video {
                            (first, second)
                        } else {
                            (second, first)
                        };
                        video.kind = TrackKind::VideoTrack;
                        audio.kind = TrackKind::AudioTrack;
                    }
                }
                (TrackKind::AudioTrack, TrackKind::Unknown) => second.kind = TrackKind::VideoTrack,
                (TrackKind::VideoTrack, TrackKind::Unknown) => second.kind = TrackKind::AudioTrack,
                (TrackKind::Unknown, TrackKind::AudioTrack) => first.kind = TrackKind::VideoTrack,
                (TrackKind::Unknown, TrackKind::VideoTrack) => first.kind = TrackKind::AudioTrack,
                _ => {}
            }
        }
    }

    /// `Some(true)` when `a` dominates `b`, `Some(false)` for the reverse, `None` when
    /// neither is large enough relative to the other.
    fn larger_track(&self, a: &FragmentGroup, b: &FragmentGroup) -> Option<bool> {
        let (size_a, size_b) = match (a.total_size_hint(), b.total_size_hint()) {
            (Some(sa), Some(sb)) => (sa as f64, sb as f64),
            _ => (a.len() as f64, b.len() as f64),
        };

        if size_a >= size_b * self.track_size_ratio && size_a > size_b {
            Some(true)
        } else if size_b >= size_a * self.track_size_ratio && size_b > size_a {
            Some(false)
        } else {
            None
        }
    }
}

/// Content types that name the track outright
fn explicit_track_kind(group: &FragmentGroup) -> Option<TrackKind> {
    let types: Option<Vec<String>> = group
        .members
        .iter()
        .map(|m| m.content_type.as_ref().map(|ct| ct.to_ascii_lowercase()))
        .collect();
    let types = types?;

    if types.iter().all(|ct| ct.starts_with("audio/")) {
        Some(TrackKind::AudioTrack)
    } else if types.iter().all(|ct| ct.starts_with("video/")) {
        Some(TrackKind::VideoTrack)
    } else {
        None
    }
}

/// Attach an `init` fragment to the group in the same directory whose skeleton it
/// resembles most. Returns false when nothing matched.
fn attach_init_segment(groups: &mut [FragmentGroup], fragment: &ParsedFragment) -> bool {
    if !fragment.skeleton.to_ascii_lowercase().contains("init") {
        return false;
    }

    let best = groups
        .iter_mut()
        .filter(|g| {
            g.init_segment.is_none()
                && g.directory == fragment.directory
                && g.extension == fragment.extension
        })
        .max_by_key(|g| {
            let skeleton = g
                .group_key
                .strip_prefix(&g.directory)
                .unwrap_or(&g.group_key);
            common_prefix_len(skeleton, &fragment.skeleton)
        });

    match best {
        Some(group) => {
            debug!(
                "Attached init segment {} to {}",
                fragment.observed.url, group.group_key
            );
            group.init_segment = Some(fragment.observed.clone());
            true
        }
        None => false,
    }
}

fn common_prefix_len(a: &str, b: &str) -> usize {
    a.chars().zip(b.chars()).take_while(|(x, y)| x == y).count()
}
