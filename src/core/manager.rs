//! Download orchestration
//!
//! [`DownloadOrchestrator`] runs the planned jobs of one page on a bounded worker pool.
//! Every job reaches a terminal state and appears in the [`RunReport`]; one job's
//! failure never cancels its siblings. Cancelling the run stops new fetches, lets
//! in-flight jobs fail fast with `Cancelled`, and never leaves partial output at a
//! final path.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::config::EngineConfig;
use crate::core::downloader::{ByteProgress, HttpFetcher, SegmentBatch, SegmentOutcome};
use crate::core::error_handling::{errors, ReassemblyError, ReassemblyResult};
use crate::core::m3u8_downloader::{PlaylistFetcher, PlaylistOutcome};
use crate::core::models::{
    FragmentGroup, HeaderMap, JobReport, JobSources, JobStatus, ReassemblyJob, RunReport,
    Strategy, TrackKind,
};
use crate::core::muxer::{MuxTool, Muxer};
use crate::core::progress_tracker::{JobProgress, ProgressEvent, ProgressSender};
use crate::utils::{ensure_dir_exists, unique_path};

/// Shared state handed to every spawned job
struct JobRunner {
    fetcher: HttpFetcher,
    playlists: PlaylistFetcher,
    muxer: Muxer,
    temp_directory: PathBuf,
    tolerate_missing: bool,
    keep_intermediates: bool,
    events: Option<ProgressSender>,
    cancel: Arc<AtomicBool>,
    completed: AtomicUsize,
    failed: AtomicUsize,
    total: usize,
}

pub struct DownloadOrchestrator {
    config: EngineConfig,
    fetcher: HttpFetcher,
    muxer: Muxer,
    cancel: Arc<AtomicBool>,
    events: Option<ProgressSender>,
}

impl DownloadOrchestrator {
    pub fn new(config: &EngineConfig) -> ReassemblyResult<Self> {
        Ok(Self {
            fetcher: HttpFetcher::new(&config.download)?,
            muxer: Muxer::from_config(&config.mux),
            config: config.clone(),
            cancel: Arc::new(AtomicBool::new(false)),
            events: None,
        })
    }

    /// Orchestrator that muxes through `tool` instead of the configured binary
    pub fn with_mux_tool(config: &EngineConfig, tool: Arc<dyn MuxTool>) -> ReassemblyResult<Self> {
        let mut orchestrator = Self::new(config)?;
        orchestrator.muxer = Muxer::new(tool, config.mux.keep_intermediates);
        Ok(orchestrator)
    }

    pub fn set_event_sender(&mut self, sender: ProgressSender) {
        self.events = Some(sender);
    }

    /// Flag shared with every job of the run; setting it cancels the run
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn cancel(&self) {
        info!("Cancelling run");
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub async fn check_mux_tool(&self) -> bool {
        self.muxer.check_available().await
    }

    /// Run every job to a terminal state. Reports come back in job order.
    pub async fn run(&self, jobs: Vec<ReassemblyJob>) -> RunReport {
        let run_id = Uuid::new_v4().to_string();
        let started_at = chrono::Utc::now();
        let total = jobs.len();
        info!("🚀 Starting run {} with {} job(s)", run_id, total);

        let runner = Arc::new(JobRunner {
            fetcher: self.fetcher.clone(),
            playlists: PlaylistFetcher::new(
                self.fetcher.clone(),
                self.config.planner.tolerate_missing_segments,
            ),
            muxer: self.muxer.clone(),
            temp_directory: self.config.temp_directory.clone(),
            tolerate_missing: self.config.planner.tolerate_missing_segments,
            keep_intermediates: self.config.mux.keep_intermediates,
            events: self.events.clone(),
            cancel: Arc::clone(&self.cancel),
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            total,
        });
        runner.emit_overall();

        let timer = self.config.run_timeout_seconds.map(|seconds| {
            let cancel = Arc::clone(&self.cancel);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(seconds)).await;
                warn!("Run timeout of {}s reached, cancelling", seconds);
                cancel.store(true, Ordering::SeqCst);
            })
        });

        let semaphore = Arc::new(Semaphore::new(self.config.download.concurrent_jobs.max(1)));
        let mut handles = Vec::with_capacity(total);

        for job in jobs {
            let runner = Arc::clone(&runner);
            let semaphore = Arc::clone(&semaphore);
            let fallback = job.clone();

            let handle = tokio::spawn(async move {
                // Keep permit alive for the duration of the job
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return runner.finish(JobReport::failed(&job, ReassemblyError::Cancelled))
                    }
                };

                if runner.cancel.load(Ordering::SeqCst) {
                    debug!("Skipping job {} after cancellation", job.id);
                    return runner.finish(JobReport::failed(&job, ReassemblyError::Cancelled));
                }

                let report = runner.execute(&job).await;
                runner.finish(report)
            });
            handles.push((fallback, handle));
        }

        let mut reports = Vec::with_capacity(total);
        for (job, handle) in handles {
            let report = match handle.await {
                Ok(report) => report,
                Err(join_error) => {
                    error!("Worker for job {} crashed: {}", job.id, join_error);
                    runner.finish(JobReport::failed(
                        &job,
                        ReassemblyError::Worker {
                            message: join_error.to_string(),
                        },
                    ))
                }
            };
            reports.push(report);
        }

        if let Some(timer) = timer {
            timer.abort();
        }

        let report = RunReport {
            run_id,
            jobs: reports,
            cancelled: self.is_cancelled(),
            started_at,
            finished_at: chrono::Utc::now(),
        };
        info!(
            "Run {} finished: {} succeeded, {} failed{}",
            report.run_id,
            report.succeeded(),
            report.failed(),
            if report.cancelled { " (cancelled)" } else { "" }
        );
        report
    }
}

impl JobRunner {
    fn emit(&self, event: ProgressEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    fn emit_overall(&self) {
        self.emit(ProgressEvent::Overall {
            completed: self.completed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            total: self.total,
        });
    }

    /// Count a terminal report and publish it
    fn finish(&self, report: JobReport) -> JobReport {
        debug_assert!(report.status.is_terminal());
        match report.status {
            JobStatus::Succeeded => self.completed.fetch_add(1, Ordering::SeqCst),
            _ => self.failed.fetch_add(1, Ordering::SeqCst),
        };
        self.emit(ProgressEvent::JobFinished {
            job_id: report.id.clone(),
            status: report.status,
            error: report.error.clone(),
        });
        self.emit_overall();
        report
    }

    async fn execute(&self, job: &ReassemblyJob) -> JobReport {
        let mut report = JobReport::planned(job);
        report.transition(JobStatus::Running);
        let progress = JobProgress::new(&job.id, report.progress.unit, self.events.clone());
        let output = unique_path(&job.output_path);
        let work_dir = self.temp_directory.join(&job.id);

        info!("Starting {} job {} -> {:?}", job.strategy, job.id, output);
        self.emit(ProgressEvent::JobStarted {
            job_id: job.id.clone(),
            strategy: job.strategy,
        });

        let result = match (&job.sources, job.strategy) {
            (JobSources::Single(source), Strategy::DirectFetch) => {
                self.run_direct(&source.url, &job.request_headers, &output, &progress)
                    .await
            }
            (JobSources::Single(source), Strategy::PlaylistFetch) => {
                self.run_playlist(&source.url, &job.request_headers, &work_dir, &output, &progress)
                    .await
            }
            (JobSources::Group { primary, audio }, Strategy::FragmentConcat) => {
                self.run_concat(
                    primary,
                    audio.as_ref(),
                    &job.request_headers,
                    &work_dir,
                    &output,
                    &progress,
                )
                .await
            }
            (_, strategy) => Err(errors::configuration_error(format!(
                "job {} has sources that do not fit strategy {}",
                job.id, strategy
            ))),
        };
        progress.flush();
        report.progress = progress.state();

        match result {
            Ok(warnings) => {
                if !self.keep_intermediates && work_dir.exists() {
                    if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await {
                        warn!("Failed to remove work directory {:?}: {}", work_dir, e);
                    }
                }
                info!("✅ Job {} succeeded: {:?}", job.id, output);
                report.succeed(output, warnings);
            }
            Err(e) => {
                error!("❌ Job {} failed: {}", job.id, e);
                report.fail(e);
            }
        }
        report
    }

    async fn run_direct(
        &self,
        url: &str,
        headers: &HeaderMap,
        output: &Path,
        progress: &JobProgress,
    ) -> ReassemblyResult<Vec<ReassemblyError>> {
        if let Some(parent) = output.parent() {
            ensure_dir_exists(parent).await?;
        }
        let bytes = self
            .fetcher
            .fetch_file(url, headers, output, ByteProgress::Whole(progress), &self.cancel)
            .await?;
        debug!("Fetched {} bytes from {}", bytes, url);
        Ok(Vec::new())
    }

    async fn run_playlist(
        &self,
        manifest_url: &str,
        headers: &HeaderMap,
        work_dir: &Path,
        output: &Path,
        progress: &JobProgress,
    ) -> ReassemblyResult<Vec<ReassemblyError>> {
        ensure_dir_exists(work_dir).await?;

        match self
            .playlists
            .fetch(manifest_url, headers, work_dir, progress, &self.cancel)
            .await?
        {
            PlaylistOutcome::Delegate {
                manifest_url,
                reason,
            } => {
                info!("Delegating {} to the media tool ({:?})", manifest_url, reason);
                progress.set_total(None);
                self.muxer
                    .mux_manifest(&manifest_url, headers, output, &self.cancel)
                    .await?;
                Ok(Vec::new())
            }
            PlaylistOutcome::Segments {
                init,
                files,
                warning,
            } => {
                let fragments: Vec<PathBuf> = init.into_iter().chain(files).collect();
                self.muxer.mux(&fragments, output, &self.cancel).await?;
                Ok(warning.into_iter().collect())
            }
        }
    }

    async fn run_concat(
        &self,
        primary: &FragmentGroup,
        audio: Option<&FragmentGroup>,
        headers: &HeaderMap,
        work_dir: &Path,
        output: &Path,
        progress: &JobProgress,
    ) -> ReassemblyResult<Vec<ReassemblyError>> {
        ensure_dir_exists(work_dir).await?;

        let primary_outcome = self
            .fetch_group(primary, headers, work_dir, progress)
            .await?;
        let mut warnings: Vec<ReassemblyError> =
            primary_outcome.partial_warning().into_iter().collect();

        match audio {
            Some(audio) => {
                let audio_outcome = self.fetch_group(audio, headers, work_dir, progress).await?;
                warnings.extend(audio_outcome.partial_warning());
                self.muxer
                    .mux_tracks(
                        &primary_outcome.files,
                        &audio_outcome.files,
                        output,
                        &self.cancel,
                    )
                    .await?;
            }
            None => {
                self.muxer
                    .mux(&primary_outcome.files, output, &self.cancel)
                    .await?;
            }
        }

        for warning in &warnings {
            warn!("Job output {:?} is incomplete: {}", output, warning);
        }
        Ok(warnings)
    }

    async fn fetch_group(
        &self,
        group: &FragmentGroup,
        headers: &HeaderMap,
        work_dir: &Path,
        progress: &JobProgress,
    ) -> ReassemblyResult<SegmentOutcome> {
        let prefix = match group.kind {
            TrackKind::VideoTrack => "video",
            TrackKind::AudioTrack => "audio",
            TrackKind::Unknown => "fragment",
        };
        let batch = SegmentBatch {
            urls: group.fetch_order().into_iter().map(|m| m.url.clone()).collect(),
            headers,
            directory: work_dir,
            prefix,
            extension: &group.extension,
            tolerate_missing: self.tolerate_missing,
        };
        self.fetcher
            .fetch_segments(batch, ByteProgress::Accumulate(progress), &self.cancel, |_| {})
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::ObservedUrl;
    use tempfile::tempdir;

    fn test_config(root: &Path) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.output_directory = root.join("out");
        config.temp_directory = root.join("tmp");
        config.download.retry_attempts = 0;
        config
    }

    fn direct_job(id: &str, url: &str, output: PathBuf) -> ReassemblyJob {
        ReassemblyJob {
            id: id.to_string(),
            strategy: Strategy::DirectFetch,
            sources: JobSources::Single(ObservedUrl::new(url)),
            output_path: output,
            request_headers: HeaderMap::new(),
        }
    }

    #[tokio::test]
    async fn test_empty_run() {
        let root = tempdir().unwrap();
        let orchestrator = DownloadOrchestrator::new(&test_config(root.path())).unwrap();
        let report = orchestrator.run(Vec::new()).await;
        assert!(report.jobs.is_empty());
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn test_cancelled_run_reports_every_job() {
        let root = tempdir().unwrap();
        let config = test_config(root.path());
        let orchestrator = DownloadOrchestrator::new(&config).unwrap();
        orchestrator.cancel();

        let jobs = vec![
            direct_job("direct-a", "http://127.0.0.1:9/a.mp4", config.output_directory.join("a.mp4")),
            direct_job("direct-b", "http://127.0.0.1:9/b.mp4", config.output_directory.join("b.mp4")),
        ];
        let report = orchestrator.run(jobs).await;

        assert!(report.cancelled);
        assert_eq!(report.jobs.len(), 2);
        assert_eq!(report.jobs[0].id, "direct-a");
        assert_eq!(report.jobs[1].id, "direct-b");
        for job in &report.jobs {
            assert_eq!(job.status, JobStatus::Failed);
            assert_eq!(job.error, Some(ReassemblyError::Cancelled));
        }
        assert!(!config.output_directory.join("a.mp4").exists());
    }

    #[tokio::test]
    async fn test_mismatched_sources_fail_only_that_job() {
        let root = tempdir().unwrap();
        let config = test_config(root.path());
        let orchestrator = DownloadOrchestrator::new(&config).unwrap();

        let mut job = direct_job("concat-x", "http://127.0.0.1:9/a.ts", root.path().join("x.mp4"));
        job.strategy = Strategy::FragmentConcat;
        let report = orchestrator.run(vec![job]).await;

        let job = report.job("concat-x").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(matches!(job.error, Some(ReassemblyError::Configuration { .. })));
    }
}
