//! Reassembly planning
//!
//! Turns classified URLs and fragment groups for one page into the minimal set of
//! jobs. A manifest always wins over raw fragments of the same stream: the observed
//! fragments are frequently an incomplete subset (seeking, buffering), while the
//! manifest lists every segment.
//!
//! Planning is pure and deterministic. Job ids hash the grouping key or source URL,
//! so planning the same input twice yields the same jobs.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{debug, info};
use url::Url;

use crate::core::classifier::{url_extension, ClassifiedUrl};
use crate::core::config::{PlannerConfig, SameStreamRule};
use crate::core::grouper::DiscardedGroup;
use crate::core::models::{
    FragmentGroup, HeaderMap, JobSources, ObservedUrl, ReassemblyJob, StreamKind, Strategy,
    TrackKind,
};
use crate::utils::{prepare_request_headers, sanitize_filename};

/// Extensions kept as-is for direct downloads; everything else becomes `.mp4`
const PASSTHROUGH_EXTENSIONS: &[&str] = &["mp4", "webm", "flv", "avi", "mov"];
const OUTPUT_EXTENSION: &str = "mp4";

/// Informational outcomes of planning; none of these are errors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanNote {
    /// URL is not media and was filtered out
    ClassificationNoop { url: String },
    /// Candidate group with fewer than two members
    GroupingDiscarded { group_key: String, members: usize },
    /// Fragment group covered by a manifest of the same stream
    SuppressedByManifest {
        group_key: String,
        manifest_url: String,
    },
    /// The same source URL was observed more than once
    DuplicateSource { url: String },
    /// Manifest inside the stream of another manifest, e.g. a variant next to its master
    CoveredByManifest {
        manifest_url: String,
        covering_url: String,
    },
}

impl From<DiscardedGroup> for PlanNote {
    fn from(discarded: DiscardedGroup) -> Self {
        PlanNote::GroupingDiscarded {
            group_key: discarded.group_key,
            members: discarded.members,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub jobs: Vec<ReassemblyJob>,
    pub notes: Vec<PlanNote>,
}

impl Plan {
    pub fn job_ids(&self) -> Vec<&str> {
        self.jobs.iter().map(|j| j.id.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Page context used for naming and request headers
#[derive(Debug, Clone, Default)]
pub struct PageContext {
    pub page_url: Option<String>,
    pub title: Option<String>,
}

/// A job before its output path is assigned
struct PendingJob {
    id: String,
    strategy: Strategy,
    sources: JobSources,
    extension: String,
    headers: HeaderMap,
}

#[derive(Debug, Clone)]
pub struct ReassemblyPlanner {
    config: PlannerConfig,
    output_dir: PathBuf,
    static_headers: HeaderMap,
    page: PageContext,
}

impl ReassemblyPlanner {
    pub fn new(config: PlannerConfig, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            output_dir: output_dir.into(),
            static_headers: HeaderMap::new(),
            page: PageContext::default(),
        }
    }

    pub fn with_static_headers(mut self, headers: HeaderMap) -> Self {
        self.static_headers = headers;
        self
    }

    pub fn for_page(mut self, page: PageContext) -> Self {
        self.page = page;
        self
    }

    /// Plan jobs for one page
    pub fn plan(&self, classified: &[ClassifiedUrl], groups: &[FragmentGroup]) -> Plan {
        let mut notes = Vec::new();
        let mut seen = HashSet::new();
        let mut manifests: Vec<&ObservedUrl> = Vec::new();
        let mut direct: Vec<&ObservedUrl> = Vec::new();

        for entry in classified {
            match entry.kind {
                StreamKind::Irrelevant => {
                    debug!("Ignoring non-media URL: {}", entry.observed.url);
                    notes.push(PlanNote::ClassificationNoop {
                        url: entry.observed.url.clone(),
                    });
                }
                StreamKind::Manifest | StreamKind::DirectMedia => {
                    if !seen.insert(entry.observed.url.as_str()) {
                        notes.push(PlanNote::DuplicateSource {
                            url: entry.observed.url.clone(),
                        });
                    } else if entry.kind == StreamKind::Manifest {
                        manifests.push(&entry.observed);
                    } else {
                        direct.push(&entry.observed);
                    }
                }
                StreamKind::Fragment => {}
            }
        }

        let manifests = self.collapse_manifests(manifests, &mut notes);

        let mut active: Vec<&FragmentGroup> = Vec::new();
        for group in groups {
            let covering = manifests
                .iter()
                .find(|m| same_stream(self.config.same_stream_rule, &m.url, &group.directory));
            match covering {
                Some(manifest) => {
                    info!(
                        "Suppressing fragment group {} in favour of manifest {}",
                        group.group_key, manifest.url
                    );
                    notes.push(PlanNote::SuppressedByManifest {
                        group_key: group.group_key.clone(),
                        manifest_url: manifest.url.clone(),
                    });
                }
                None => active.push(group),
            }
        }

        let mut pending = Vec::new();

        for manifest in &manifests {
            pending.push(PendingJob {
                id: job_id(Strategy::PlaylistFetch, &manifest.url),
                strategy: Strategy::PlaylistFetch,
                sources: JobSources::Single((*manifest).clone()),
                extension: OUTPUT_EXTENSION.to_string(),
                headers: self.headers_for(manifest),
            });
        }

        for (primary, audio) in pair_tracks(&active) {
            let key = match audio {
                Some(audio) => format!("{}+{}", primary.group_key, audio.group_key),
                None => primary.group_key.clone(),
            };
            let headers = primary
                .members
                .first()
                .map(|m| self.headers_for(m))
                .unwrap_or_else(|| self.headers_for(&ObservedUrl::new(&primary.directory)));
            pending.push(PendingJob {
                id: job_id(Strategy::FragmentConcat, &key),
                strategy: Strategy::FragmentConcat,
                sources: JobSources::Group {
                    primary: primary.clone(),
                    audio: audio.cloned(),
                },
                extension: OUTPUT_EXTENSION.to_string(),
                headers,
            });
        }

        for media in &direct {
            let extension = url_extension(&media.url)
                .filter(|ext| PASSTHROUGH_EXTENSIONS.contains(&ext.as_str()))
                .unwrap_or_else(|| OUTPUT_EXTENSION.to_string());
            pending.push(PendingJob {
                id: job_id(Strategy::DirectFetch, &media.url),
                strategy: Strategy::DirectFetch,
                sources: JobSources::Single((*media).clone()),
                extension,
                headers: self.headers_for(media),
            });
        }

        let jobs = self.assign_output_paths(pending);
        info!(
            "Planned {} job(s) with {} note(s)",
            jobs.len(),
            notes.len()
        );
        Plan { jobs, notes }
    }

    /// Keep one manifest per stream. The outermost manifest wins; ties keep
    /// observation order.
    fn collapse_manifests<'a>(
        &self,
        manifests: Vec<&'a ObservedUrl>,
        notes: &mut Vec<PlanNote>,
    ) -> Vec<&'a ObservedUrl> {
        let depth = |m: &ObservedUrl| {
            Url::parse(&m.url)
                .map(|u| directory_segments(u.path()).len())
                .unwrap_or(usize::MAX)
        };
        let mut ordered: Vec<(usize, &ObservedUrl)> = manifests.into_iter().enumerate().collect();
        ordered.sort_by_key(|&(position, m)| (depth(m), position));

        let mut kept: Vec<(usize, &ObservedUrl)> = Vec::new();
        for (position, manifest) in ordered {
            let covering = manifest_directory(&manifest.url).and_then(|directory| {
                kept.iter()
                    .find(|(_, outer)| {
                        same_stream(self.config.same_stream_rule, &outer.url, &directory)
                    })
                    .map(|(_, outer)| outer.url.clone())
            });
            match covering {
                Some(covering_url) => {
                    info!(
                        "Dropping manifest {} covered by manifest {}",
                        manifest.url, covering_url
                    );
                    notes.push(PlanNote::CoveredByManifest {
                        manifest_url: manifest.url.clone(),
                        covering_url,
                    });
                }
                None => kept.push((position, manifest)),
            }
        }

        kept.sort_by_key(|&(position, _)| position);
        kept.into_iter().map(|(_, m)| m).collect()
    }

    fn headers_for(&self, observed: &ObservedUrl) -> HeaderMap {
        prepare_request_headers(
            &self.static_headers,
            &observed.request_headers,
            self.page.page_url.as_deref(),
        )
    }

    /// Title-based names when the page has a title, job ids otherwise
    fn assign_output_paths(&self, pending: Vec<PendingJob>) -> Vec<ReassemblyJob> {
        let title = self
            .page
            .title
            .as_deref()
            .map(sanitize_filename)
            .filter(|t| !t.is_empty());
        let multiple = pending.len() > 1;

        pending
            .into_iter()
            .enumerate()
            .map(|(position, job)| {
                let base = match &title {
                    Some(title) if multiple => format!("{}_{}", title, position + 1),
                    Some(title) => title.clone(),
                    None => job.id.clone(),
                };
                ReassemblyJob {
                    output_path: self
                        .output_dir
                        .join(format!("{}.{}", base, job.extension)),
                    id: job.id,
                    strategy: job.strategy,
                    sources: job.sources,
                    request_headers: job.headers,
                }
            })
            .collect()
    }
}

/// `<strategy>-<first 12 hex chars of sha256(key)>`
pub fn job_id(strategy: Strategy, key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    format!("{}-{}", strategy.as_str(), &hex::encode(digest)[..12])
}

fn directory_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(pos) => &path[..=pos],
        None => "/",
    }
}

/// `https://x/live/high/index.m3u8?t=1` -> `https://x/live/high/`
fn manifest_directory(url: &str) -> Option<String> {
    Url::parse(url)
        .and_then(|u| u.join("."))
        .ok()
        .map(|u| u.to_string())
}

fn directory_segments(path: &str) -> Vec<&str> {
    directory_path(path)
        .split('/')
        .filter(|s| !s.is_empty())
        .collect()
}

/// Whether a fragment directory belongs to the stream described by `manifest_url`
pub fn same_stream(rule: SameStreamRule, manifest_url: &str, fragment_directory: &str) -> bool {
    let (Ok(manifest), Ok(fragments)) = (Url::parse(manifest_url), Url::parse(fragment_directory))
    else {
        return false;
    };
    if manifest.host_str() != fragments.host_str() {
        return false;
    }

    match rule {
        SameStreamRule::SameDirectory => fragments
            .path()
            .starts_with(directory_path(manifest.path())),
        SameStreamRule::SharedPrefix { depth } => {
            let manifest_segments = directory_segments(manifest.path());
            let fragment_segments = directory_segments(fragments.path());
            manifest_segments
                .iter()
                .take(depth)
                .eq(fragment_segments.iter().take(depth))
        }
        SameStreamRule::SameHost => true,
    }
}

/// Pair each video group with an audio group on the same host; every other group
/// stands alone.
fn pair_tracks<'a>(
    groups: &[&'a FragmentGroup],
) -> Vec<(&'a FragmentGroup, Option<&'a FragmentGroup>)> {
    let host = |g: &FragmentGroup| {
        Url::parse(&g.directory)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
    };
    let mut used_audio: HashSet<&str> = HashSet::new();
    let mut pairs = Vec::new();

    for group in groups.iter().filter(|g| g.kind == TrackKind::VideoTrack) {
        let audio = groups
            .iter()
            .filter(|g| g.kind == TrackKind::AudioTrack)
            .find(|g| !used_audio.contains(g.group_key.as_str()) && host(g) == host(group))
            .copied();
        if let Some(audio) = audio {
            used_audio.insert(audio.group_key.as_str());
        }
        pairs.push((*group, audio));
    }

    for group in groups {
        match group.kind {
            TrackKind::VideoTrack => {}
            TrackKind::AudioTrack if used_audio.contains(group.group_key.as_str()) => {}
            _ => pairs.push((*group, None)),
        }
    }

    pairs
}
