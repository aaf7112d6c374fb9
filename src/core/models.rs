//! Core data models for the reassembly engine

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::core::error_handling::ReassemblyError;

/// Request headers keyed by canonical header name
pub type HeaderMap = BTreeMap<String, String>;

/// A URL seen on the page, as reported by the network observer or a pasted list
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObservedUrl {
    pub url: String,
    pub content_type: Option<String>,
    pub size_hint: Option<u64>,
    /// Request headers the browser sent; only an allowlist is ever replayed
    #[serde(default)]
    pub request_headers: HeaderMap,
}

impl ObservedUrl {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            content_type: None,
            size_hint: None,
            request_headers: HeaderMap::new(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_size_hint(mut self, size: u64) -> Self {
        self.size_hint = Some(size);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request_headers.insert(name.into(), value.into());
        self
    }
}

/// Classification tag assigned once per observed URL
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Manifest,
    Fragment,
    DirectMedia,
    Irrelevant,
}

/// Track role of a fragment group
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TrackKind {
    AudioTrack,
    VideoTrack,
    Unknown,
}

/// An ordered run of fragments that belong to one logical stream
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FragmentGroup {
    /// `<directory><skeleton>*.<extension>`, e.g. `https://x/seg/index_*.ts`
    pub group_key: String,
    pub kind: TrackKind,
    /// Members sorted by ascending index
    pub members: Vec<ObservedUrl>,
    /// Index extracted from each member, parallel to `members`
    pub indices: Vec<u64>,
    /// Initialization segment that must precede the members
    pub init_segment: Option<ObservedUrl>,
    /// `scheme://host[:port]/dir/` shared by every member
    pub directory: String,
    pub extension: String,
}

impl FragmentGroup {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Sum of size hints, if every member carries one
    pub fn total_size_hint(&self) -> Option<u64> {
        self.members
            .iter()
            .map(|m| m.size_hint)
            .try_fold(0u64, |acc, size| size.map(|s| acc.saturating_add(s)))
    }

    /// Fetch order: init segment first, then members by index
    pub fn fetch_order(&self) -> Vec<&ObservedUrl> {
        self.init_segment.iter().chain(self.members.iter()).collect()
    }

}

/// Reassembly strategy chosen by the planner
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Strategy {
    DirectFetch,
    PlaylistFetch,
    FragmentConcat,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::DirectFetch => "direct",
            Strategy::PlaylistFetch => "playlist",
            Strategy::FragmentConcat => "concat",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a job reads from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum JobSources {
    Single(ObservedUrl),
    /// `primary` is the video track, or the only track when nothing could be paired
    Group {
        primary: FragmentGroup,
        audio: Option<FragmentGroup>,
    },
}

impl JobSources {
    /// Every URL this job will fetch
    pub fn urls(&self) -> Vec<&str> {
        match self {
            JobSources::Single(observed) => vec![observed.url.as_str()],
            JobSources::Group { primary, audio } => primary
                .fetch_order()
                .into_iter()
                .chain(audio.iter().flat_map(|a| a.fetch_order()))
                .map(|m| m.url.as_str())
                .collect(),
        }
    }
}

/// One unit of work produced by the planner and consumed once by the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReassemblyJob {
    pub id: String,
    pub strategy: Strategy,
    pub sources: JobSources,
    pub output_path: PathBuf,
    /// Headers replayed on every request this job makes
    #[serde(default)]
    pub request_headers: HeaderMap,
}

/// Job lifecycle: Planned -> Running -> Succeeded | Failed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobStatus {
    Planned,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Planned, JobStatus::Running)
                | (JobStatus::Planned, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Succeeded)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

/// Unit that a job's progress is counted in
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProgressUnit {
    Bytes,
    Milliseconds,
}

/// Per-job progress; `total` is `None` when it cannot be known in advance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressState {
    pub unit: ProgressUnit,
    pub completed: u64,
    pub total: Option<u64>,
}

impl ProgressState {
    pub fn new(unit: ProgressUnit) -> Self {
        Self {
            unit,
            completed: 0,
            total: None,
        }
    }

    pub fn for_strategy(strategy: Strategy) -> Self {
        match strategy {
            Strategy::PlaylistFetch => Self::new(ProgressUnit::Milliseconds),
            _ => Self::new(ProgressUnit::Bytes),
        }
    }

    pub fn is_indeterminate(&self) -> bool {
        matches!(self.total, None | Some(0))
    }

    /// Fraction in `0.0..=1.0`, or `None` when indeterminate
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(total) if total > 0 => Some((self.completed as f64 / total as f64).min(1.0)),
            _ => None,
        }
    }
}

/// Final outcome of one job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub id: String,
    pub strategy: Strategy,
    pub status: JobStatus,
    /// Set when the job succeeded
    pub output_path: Option<PathBuf>,
    /// Set when the job failed
    pub error: Option<ReassemblyError>,
    /// Non-fatal issues, e.g. a partial segment set that still muxed
    pub warnings: Vec<ReassemblyError>,
    pub progress: ProgressState,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
}

impl JobReport {
    /// Report for a job that has not started yet
    pub fn planned(job: &ReassemblyJob) -> Self {
        Self {
            id: job.id.clone(),
            strategy: job.strategy,
            status: JobStatus::Planned,
            output_path: None,
            error: None,
            warnings: Vec::new(),
            progress: ProgressState::for_strategy(job.strategy),
            started_at: None,
            finished_at: chrono::Utc::now(),
        }
    }

    /// Report for a job that failed without running, e.g. after cancellation
    pub fn failed(job: &ReassemblyJob, error: ReassemblyError) -> Self {
        let mut report = Self::planned(job);
        report.fail(error);
        report
    }

    /// Move to `next`. Returns false and leaves the report untouched when the
    /// lifecycle does not allow the transition.
    pub fn transition(&mut self, next: JobStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        if next == JobStatus::Running {
            self.started_at = Some(chrono::Utc::now());
        } else if next.is_terminal() {
            self.finished_at = chrono::Utc::now();
        }
        true
    }

    pub fn succeed(&mut self, output_path: PathBuf, warnings: Vec<ReassemblyError>) -> bool {
        if !self.transition(JobStatus::Succeeded) {
            return false;
        }
        self.output_path = Some(output_path);
        self.warnings = warnings;
        true
    }

    pub fn fail(&mut self, error: ReassemblyError) -> bool {
        if !self.transition(JobStatus::Failed) {
            return false;
        }
        self.error = Some(error);
        true
    }

    /// Human-readable failure reason
    pub fn failure_reason(&self) -> Option<String> {
        self.error.as_ref().map(|e| e.to_string())
    }
}

/// Report for a whole run; lists every planned job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub jobs: Vec<JobReport>,
    pub cancelled: bool,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| j.status == JobStatus::Succeeded)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| j.status == JobStatus::Failed)
            .count()
    }

    pub fn job(&self, id: &str) -> Option<&JobReport> {
        self.jobs.iter().find(|j| j.id == id)
    }
}

/// Everything observed for one page, built once the observation window closes
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PageSnapshot {
    pub page_url: Option<String>,
    pub title: Option<String>,
    pub observed: Vec<ObservedUrl>,
}

impl PageSnapshot {
    /// Snapshot of bare URLs with no content-type information
    pub fn from_urls<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            page_url: None,
            title: None,
            observed: urls.into_iter().map(ObservedUrl::new).collect(),
        }
    }

    pub fn with_page_url(mut self, page_url: impl Into<String>) -> Self {
        self.page_url = Some(page_url.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_transitions() {
        assert!(JobStatus::Planned.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Succeeded.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }

    fn sample_job() -> ReassemblyJob {
        ReassemblyJob {
            id: "job-1".to_string(),
            strategy: Strategy::DirectFetch,
            sources: JobSources::Single(ObservedUrl::new("https://x/a.mp4")),
            output_path: PathBuf::from("/tmp/a.mp4"),
            request_headers: HeaderMap::new(),
        }
    }

    #[test]
    fn test_report_follows_job_lifecycle() {
        let job = sample_job();
        let mut report = JobReport::planned(&job);
        assert_eq!(report.status, JobStatus::Planned);
        assert!(report.started_at.is_none());

        // Planned jobs cannot succeed without running
        assert!(!report.succeed(PathBuf::from("/tmp/a.mp4"), Vec::new()));
        assert_eq!(report.status, JobStatus::Planned);

        assert!(report.transition(JobStatus::Running));
        assert!(report.started_at.is_some());
        assert!(report.succeed(PathBuf::from("/tmp/a.mp4"), Vec::new()));
        assert_eq!(report.output_path, Some(PathBuf::from("/tmp/a.mp4")));

        // Terminal reports are frozen
        assert!(!report.fail(ReassemblyError::Cancelled));
        assert_eq!(report.status, JobStatus::Succeeded);
        assert!(report.error.is_none());
    }

    #[test]
    fn test_failed_report_skips_running() {
        let report = JobReport::failed(&sample_job(), ReassemblyError::Cancelled);
        assert_eq!(report.status, JobStatus::Failed);
        assert!(report.started_at.is_none());
        assert_eq!(report.failure_reason().as_deref(), Some("Run cancelled"));
    }

    #[test]
    fn test_progress_fraction() {
        let mut state = ProgressState::new(ProgressUnit::Bytes);
        assert!(state.is_indeterminate());
        assert_eq!(state.fraction(), None);

        state.total = Some(200);
        state.completed = 50;
        assert_eq!(state.fraction(), Some(0.25));

        state.completed = 400;
        assert_eq!(state.fraction(), Some(1.0));
    }

    #[test]
    fn test_group_size_hint_requires_all_members() {
        let mut group = FragmentGroup {
            group_key: "https://x/seg/index_*.ts".to_string(),
            kind: TrackKind::Unknown,
            members: vec![
                ObservedUrl::new("https://x/seg/index_0.ts").with_size_hint(10),
                ObservedUrl::new("https://x/seg/index_1.ts").with_size_hint(15),
            ],
            indices: vec![0, 1],
            init_segment: None,
            directory: "https://x/seg/".to_string(),
            extension: "ts".to_string(),
        };
        assert_eq!(group.total_size_hint(), Some(25));

        group.members.push(ObservedUrl::new("https://x/seg/index_2.ts"));
        assert_eq!(group.total_size_hint(), None);
    }
}
