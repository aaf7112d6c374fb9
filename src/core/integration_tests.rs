//! End-to-end runs against a local mock media server
//!
//! The server serves a fixed path -> bytes table and counts every request, so tests
//! can check both what ended up on disk and what was (or was not) fetched.
//!
//! Path prefixes change how a body is delivered:
//! - `/broken/` answers 500
//! - `/slow/` trickles the body in 1 KiB chunks, 500 ms apart
//! - `/stall/` sends the first chunk and then nothing
//! - `/abort/` sends the first chunk and then drops the connection

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use bytes::Bytes;
use futures::stream;
use futures_util::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::{tempdir, TempDir};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::core::config::EngineConfig;
use crate::core::engine::ReassemblyEngine;
use crate::core::error_handling::{errors, ReassemblyError, ReassemblyResult};
use crate::core::models::{HeaderMap, JobStatus, ObservedUrl, PageSnapshot, Strategy};
use crate::core::muxer::{concat_files, MuxTool};
use crate::core::progress_tracker::ProgressEvent;
use crate::utils::partial_path;

const TRICKLE_CHUNK: usize = 1024;
const TRICKLE_PAUSE: Duration = Duration::from_millis(500);

#[derive(Clone)]
struct MockState {
    files: Arc<HashMap<String, Vec<u8>>>,
    hits: Arc<Mutex<HashMap<String, usize>>>,
}

async fn serve_media(State(state): State<MockState>, uri: Uri) -> Response {
    let path = uri.path().to_string();
    *state.hits.lock().entry(path.clone()).or_default() += 1;

    if path.starts_with("/broken/") {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    let Some(body) = state.files.get(&path).cloned() else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let mut chunks: Vec<Bytes> = body.chunks(TRICKLE_CHUNK).map(Bytes::copy_from_slice).collect();
    if path.starts_with("/slow/") {
        let trickle = stream::iter(chunks).then(|chunk| async move {
            tokio::time::sleep(TRICKLE_PAUSE).await;
            Ok::<_, std::io::Error>(chunk)
        });
        Body::from_stream(trickle).into_response()
    } else if path.starts_with("/stall/") {
        chunks.truncate(1);
        let stalled = stream::iter(chunks.into_iter().map(Ok::<_, std::io::Error>))
            .chain(stream::pending());
        Body::from_stream(stalled).into_response()
    } else if path.starts_with("/abort/") {
        chunks.truncate(1);
        let aborted = stream::iter(chunks.into_iter().map(Ok))
            .chain(stream::once(async { Err(std::io::Error::other("connection dropped")) }));
        Body::from_stream(aborted).into_response()
    } else {
        body.into_response()
    }
}

/// Mock media server bound to an ephemeral local port
pub(crate) struct MockServer {
    base: String,
    hits: Arc<Mutex<HashMap<String, usize>>>,
}

impl MockServer {
    pub(crate) async fn start(files: Vec<(&str, Vec<u8>)>) -> Self {
        let state = MockState {
            files: Arc::new(
                files
                    .into_iter()
                    .map(|(path, body)| (path.to_string(), body))
                    .collect(),
            ),
            hits: Arc::new(Mutex::new(HashMap::new())),
        };
        let hits = Arc::clone(&state.hits);
        let app = Router::new().fallback(serve_media).with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base: format!("http://{}", addr),
            hits,
        }
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub(crate) fn hits(&self, path: &str) -> usize {
        self.hits.lock().get(path).copied().unwrap_or(0)
    }
}

/// Joins bytes instead of running a real media tool
pub(crate) struct CopyTool;

#[async_trait]
impl MuxTool for CopyTool {
    fn name(&self) -> &str {
        "copy"
    }

    async fn remux(&self, input: &Path, output: &Path, _: &AtomicBool) -> ReassemblyResult<()> {
        tokio::fs::copy(input, output)
            .await
            .map(|_| ())
            .map_err(|e| errors::filesystem_error(output, e))
    }

    async fn merge_tracks(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        _: &AtomicBool,
    ) -> ReassemblyResult<()> {
        concat_files(&[video.to_path_buf(), audio.to_path_buf()], output)
            .await
            .map(|_| ())
    }

    async fn remux_manifest(
        &self,
        _: &str,
        _: &HeaderMap,
        _: &Path,
        _: &AtomicBool,
    ) -> ReassemblyResult<()> {
        Err(errors::mux_error("manifest input not supported", Some(1)))
    }

    async fn check_available(&self) -> bool {
        true
    }
}

pub(crate) fn test_config(root: &Path) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.output_directory = root.join("out");
    config.temp_directory = root.join("tmp");
    config.download.retry_attempts = 0;
    config
}

fn copy_engine() -> (TempDir, ReassemblyEngine) {
    let root = tempdir().unwrap();
    let engine = ReassemblyEngine::with_mux_tool(test_config(root.path()), Arc::new(CopyTool)).unwrap();
    (root, engine)
}

fn media_playlist(segments: &[&str]) -> Vec<u8> {
    let mut playlist = String::from("#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:4\n");
    for segment in segments {
        playlist.push_str("#EXTINF:4.0,\n");
        playlist.push_str(segment);
        playlist.push('\n');
    }
    playlist.push_str("#EXT-X-ENDLIST\n");
    playlist.into_bytes()
}

fn files_in(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
        .unwrap_or_default();
    files.sort();
    files
}

#[tokio::test]
async fn test_direct_fetch_writes_output_and_reports_events() {
    let clip = vec![7u8; 4096];
    let server = MockServer::start(vec![("/media/clip.mp4", clip.clone())]).await;
    let (_root, mut engine) = copy_engine();

    let (tx, mut rx) = mpsc::unbounded_channel();
    engine.set_event_sender(tx);

    let snapshot = PageSnapshot::from_urls([
        server.url("/media/clip.mp4"),
        server.url("/img/logo.png"),
    ])
    .with_title("Clip");
    let report = engine.run_page(&snapshot).await;

    assert_eq!(report.jobs.len(), 1);
    let job = &report.jobs[0];
    assert_eq!(job.strategy, Strategy::DirectFetch);
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(job.progress.completed, clip.len() as u64);

    let output = job.output_path.as_ref().unwrap();
    assert_eq!(output.file_name().unwrap(), "Clip.mp4");
    assert_eq!(std::fs::read(output).unwrap(), clip);
    assert_eq!(server.hits("/img/logo.png"), 0);

    drop(engine);
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    assert!(events
        .iter()
        .any(|e| matches!(e, ProgressEvent::JobStarted { .. })));
    assert!(events.iter().any(|e| matches!(
        e,
        ProgressEvent::JobFinished {
            status: JobStatus::Succeeded,
            ..
        }
    )));
    assert!(matches!(
        events.last(),
        Some(ProgressEvent::Overall {
            completed: 1,
            failed: 0,
            total: 1
        })
    ));
}

#[tokio::test]
async fn test_manifest_wins_over_its_fragments() {
    let server = MockServer::start(vec![
        ("/hls/index.m3u8", media_playlist(&["seg_0.ts", "seg_1.ts"])),
        ("/hls/seg_0.ts", b"first-".to_vec()),
        ("/hls/seg_1.ts", b"second".to_vec()),
    ])
    .await;
    let (_root, engine) = copy_engine();

    let snapshot = PageSnapshot::from_urls([
        server.url("/hls/index.m3u8"),
        server.url("/hls/seg_0.ts"),
        server.url("/hls/seg_1.ts"),
    ]);
    let report = engine.run_page(&snapshot).await;

    assert_eq!(report.jobs.len(), 1);
    let job = &report.jobs[0];
    assert_eq!(job.strategy, Strategy::PlaylistFetch);
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(job.progress.total, Some(8000));
    assert_eq!(job.progress.completed, 8000);

    let output = job.output_path.as_ref().unwrap();
    assert_eq!(std::fs::read(output).unwrap(), b"first-second");
    assert_eq!(server.hits("/hls/seg_0.ts"), 1);
    assert_eq!(server.hits("/hls/seg_1.ts"), 1);
}

#[tokio::test]
async fn test_mux_failure_keeps_fragments_and_sibling_succeeds() {
    let server = MockServer::start(vec![
        ("/seg/index_0.ts", b"aa".to_vec()),
        ("/seg/index_1.ts", b"bb".to_vec()),
        ("/media/clip.mp4", b"whole".to_vec()),
    ])
    .await;
    let root = tempdir().unwrap();
    let mut config = test_config(root.path());
    config.mux.tool_path = "/nonexistent/bin/ffmpeg-missing".to_string();
    let engine = ReassemblyEngine::new(config.clone()).unwrap();

    let snapshot = PageSnapshot::from_urls([
        server.url("/seg/index_0.ts"),
        server.url("/seg/index_1.ts"),
        server.url("/media/clip.mp4"),
    ]);
    let report = engine.run_page(&snapshot).await;
    assert_eq!(report.jobs.len(), 2);

    let concat = report
        .jobs
        .iter()
        .find(|j| j.strategy == Strategy::FragmentConcat)
        .unwrap();
    assert_eq!(concat.status, JobStatus::Failed);
    assert!(concat.error.as_ref().unwrap().is_mux_error());
    assert!(concat.output_path.is_none());

    let kept: Vec<PathBuf> = files_in(&config.temp_directory.join(&concat.id))
        .into_iter()
        .filter(|p| p.extension().is_some_and(|ext| ext == "ts"))
        .collect();
    assert!(kept.len() >= 2);

    let direct = report
        .jobs
        .iter()
        .find(|j| j.strategy == Strategy::DirectFetch)
        .unwrap();
    assert_eq!(direct.status, JobStatus::Succeeded);
    assert_eq!(
        std::fs::read(direct.output_path.as_ref().unwrap()).unwrap(),
        b"whole"
    );

    // nothing half-written next to the finished file
    let outputs = files_in(&config.output_directory);
    assert_eq!(outputs.len(), 1);
}

#[tokio::test]
async fn test_missing_segment_is_skipped_with_warning() {
    let server = MockServer::start(vec![
        ("/vod/index.m3u8", media_playlist(&["s0.ts", "s1.ts", "s2.ts"])),
        ("/vod/s0.ts", b"zero-".to_vec()),
        ("/vod/s2.ts", b"two".to_vec()),
    ])
    .await;
    let (_root, engine) = copy_engine();

    let report = engine
        .run_page(&PageSnapshot::from_urls([server.url("/vod/index.m3u8")]))
        .await;

    let job = &report.jobs[0];
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(
        job.warnings,
        vec![ReassemblyError::PartialFragmentSet {
            expected: 3,
            fetched: 2
        }]
    );
    assert_eq!(
        std::fs::read(job.output_path.as_ref().unwrap()).unwrap(),
        b"zero-two"
    );
}

#[tokio::test]
async fn test_missing_direct_file_is_network_error() {
    let server = MockServer::start(Vec::new()).await;
    let (root, engine) = copy_engine();

    let report = engine
        .run_page(&PageSnapshot::from_urls([server.url("/media/gone.mp4")]))
        .await;

    let job = &report.jobs[0];
    assert_eq!(job.status, JobStatus::Failed);
    match job.error.as_ref().unwrap() {
        ReassemblyError::Network { status, .. } => assert_eq!(*status, Some(404)),
        other => panic!("expected a network error, got {other:?}"),
    }
    assert!(files_in(&root.path().join("out")).is_empty());
}

#[tokio::test]
async fn test_server_error_is_retried_then_reported() {
    let server = MockServer::start(Vec::new()).await;
    let root = tempdir().unwrap();
    let mut config = test_config(root.path());
    config.download.retry_attempts = 2;
    let engine = ReassemblyEngine::with_mux_tool(config, Arc::new(CopyTool)).unwrap();

    let report = engine
        .run_page(&PageSnapshot::from_urls([server.url("/broken/clip.mp4")]))
        .await;

    assert_eq!(report.jobs[0].status, JobStatus::Failed);
    assert!(report.jobs[0].error.as_ref().unwrap().is_network_error());
    assert_eq!(server.hits("/broken/clip.mp4"), 3);
}

#[tokio::test]
async fn test_video_and_audio_groups_are_muxed_together() {
    let server = MockServer::start(vec![
        ("/dash/video_1.m4s", b"V1".to_vec()),
        ("/dash/video_2.m4s", b"V2".to_vec()),
        ("/dash/audio_1.m4s", b"a1".to_vec()),
        ("/dash/audio_2.m4s", b"a2".to_vec()),
    ])
    .await;
    let (_root, engine) = copy_engine();

    let observed = vec![
        ObservedUrl::new(server.url("/dash/video_1.m4s")).with_content_type("video/mp4"),
        ObservedUrl::new(server.url("/dash/audio_1.m4s")).with_content_type("audio/mp4"),
        ObservedUrl::new(server.url("/dash/video_2.m4s")).with_content_type("video/mp4"),
        ObservedUrl::new(server.url("/dash/audio_2.m4s")).with_content_type("audio/mp4"),
    ];
    let snapshot = PageSnapshot {
        page_url: None,
        title: None,
        observed,
    };
    let report = engine.run_page(&snapshot).await;

    assert_eq!(report.jobs.len(), 1);
    let job = &report.jobs[0];
    assert_eq!(job.strategy, Strategy::FragmentConcat);
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(
        std::fs::read(job.output_path.as_ref().unwrap()).unwrap(),
        b"V1V2a1a2"
    );
}

#[tokio::test]
async fn test_rerun_does_not_overwrite_existing_output() {
    let server = MockServer::start(vec![("/media/clip.mp4", b"new".to_vec())]).await;
    let (_root, engine) = copy_engine();
    let snapshot = PageSnapshot::from_urls([server.url("/media/clip.mp4")]).with_title("Clip");

    let first = engine.run_page(&snapshot).await;
    let second = engine.run_page(&snapshot).await;

    let first_path = first.jobs[0].output_path.clone().unwrap();
    let second_path = second.jobs[0].output_path.clone().unwrap();
    assert_ne!(first_path, second_path);
    assert!(first_path.exists());
    assert!(second_path.exists());
}

#[tokio::test]
async fn test_slow_download_outlives_idle_timeout() {
    let movie = vec![3u8; 5 * TRICKLE_CHUNK];
    let server = MockServer::start(vec![("/slow/big.mp4", movie.clone())]).await;
    let root = tempdir().unwrap();
    let mut config = test_config(root.path());
    config.download.timeout_seconds = 1;
    let engine = ReassemblyEngine::with_mux_tool(config, Arc::new(CopyTool)).unwrap();

    let report = engine
        .run_page(&PageSnapshot::from_urls([server.url("/slow/big.mp4")]))
        .await;

    let job = &report.jobs[0];
    assert_eq!(job.status, JobStatus::Succeeded, "{:?}", job.error);
    assert_eq!(std::fs::read(job.output_path.as_ref().unwrap()).unwrap(), movie);
    assert_eq!(server.hits("/slow/big.mp4"), 1);
}

#[tokio::test]
async fn test_stalled_body_times_out() {
    let server = MockServer::start(vec![("/stall/big.mp4", vec![1u8; 4 * TRICKLE_CHUNK])]).await;
    let root = tempdir().unwrap();
    let mut config = test_config(root.path());
    config.download.timeout_seconds = 1;
    let output_dir = config.output_directory.clone();
    let engine = ReassemblyEngine::with_mux_tool(config, Arc::new(CopyTool)).unwrap();

    let url = server.url("/stall/big.mp4");
    let report = engine.run_page(&PageSnapshot::from_urls([url.clone()])).await;

    let job = &report.jobs[0];
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(
        job.error,
        Some(ReassemblyError::Timeout {
            operation: format!("GET {url}"),
            seconds: 1,
        })
    );
    assert!(files_in(&output_dir).is_empty());
}

#[tokio::test]
async fn test_body_error_names_the_failing_url() {
    let server = MockServer::start(vec![("/abort/clip.mp4", vec![2u8; 3 * TRICKLE_CHUNK])]).await;
    let (root, engine) = copy_engine();

    let url = server.url("/abort/clip.mp4");
    let report = engine.run_page(&PageSnapshot::from_urls([url.clone()])).await;

    let job = &report.jobs[0];
    assert_eq!(job.status, JobStatus::Failed);
    match job.error.as_ref().unwrap() {
        ReassemblyError::Network { url: failed_url, .. } => assert_eq!(failed_url, &url),
        other => panic!("expected a network error, got {other:?}"),
    }
    assert!(job.failure_reason().unwrap().contains("/abort/clip.mp4"));
    assert!(files_in(&root.path().join("out")).is_empty());
}

#[tokio::test]
async fn test_refused_connection_names_the_failing_url() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/media/clip.mp4", listener.local_addr().unwrap());
    drop(listener);
    let (_root, engine) = copy_engine();

    let report = engine.run_page(&PageSnapshot::from_urls([url.clone()])).await;

    match report.jobs[0].error.as_ref().unwrap() {
        ReassemblyError::Network { url: failed_url, .. } => assert_eq!(failed_url, &url),
        other => panic!("expected a network error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_cancel_mid_download_leaves_no_output() {
    let server = MockServer::start(vec![("/slow/long.mp4", vec![9u8; 10 * TRICKLE_CHUNK])]).await;
    let (root, engine) = copy_engine();

    let cancel = engine.cancel_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1200)).await;
        cancel.store(true, Ordering::SeqCst);
    });

    let snapshot = PageSnapshot::from_urls([server.url("/slow/long.mp4")]).with_title("Long");
    let report = engine.run_page(&snapshot).await;

    assert!(report.cancelled);
    let job = &report.jobs[0];
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error, Some(ReassemblyError::Cancelled));
    assert!(job.output_path.is_none());

    let output = root.path().join("out").join("Long.mp4");
    assert!(!output.exists());
    assert!(!partial_path(&output).exists());
    assert!(files_in(&root.path().join("out")).is_empty());
}

#[tokio::test]
async fn test_run_timeout_aborts_in_flight_jobs() {
    let server = MockServer::start(vec![
        ("/slow/one.mp4", vec![1u8; 10 * TRICKLE_CHUNK]),
        ("/slow/two.mp4", vec![2u8; 10 * TRICKLE_CHUNK]),
    ])
    .await;
    let root = tempdir().unwrap();
    let mut config = test_config(root.path());
    config.run_timeout_seconds = Some(1);
    let engine = ReassemblyEngine::with_mux_tool(config, Arc::new(CopyTool)).unwrap();

    let started = std::time::Instant::now();
    let report = engine
        .run_page(&PageSnapshot::from_urls([
            server.url("/slow/one.mp4"),
            server.url("/slow/two.mp4"),
        ]))
        .await;

    assert!(report.cancelled);
    assert_eq!(report.jobs.len(), 2);
    assert!(report
        .jobs
        .iter()
        .all(|j| j.status == JobStatus::Failed && j.error == Some(ReassemblyError::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(files_in(&root.path().join("out")).is_empty());
}

/// Stand-in media tool that never finishes before its deadline
struct HangingTool {
    deadline: Duration,
}

impl HangingTool {
    async fn hang(&self, cancel: &AtomicBool) -> ReassemblyResult<()> {
        let wait = async {
            while !cancel.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        match tokio::time::timeout(self.deadline, wait).await {
            Ok(()) => Err(ReassemblyError::Cancelled),
            Err(_) => Err(errors::mux_error(
                format!("hanging timed out after {}s", self.deadline.as_secs()),
                None,
            )),
        }
    }
}

#[async_trait]
impl MuxTool for HangingTool {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn remux(&self, _: &Path, _: &Path, cancel: &AtomicBool) -> ReassemblyResult<()> {
        self.hang(cancel).await
    }

    async fn merge_tracks(
        &self,
        _: &Path,
        _: &Path,
        _: &Path,
        cancel: &AtomicBool,
    ) -> ReassemblyResult<()> {
        self.hang(cancel).await
    }

    async fn remux_manifest(
        &self,
        _: &str,
        _: &HeaderMap,
        _: &Path,
        cancel: &AtomicBool,
    ) -> ReassemblyResult<()> {
        self.hang(cancel).await
    }

    async fn check_available(&self) -> bool {
        true
    }
}

#[tokio::test]
async fn test_mux_timeout_fails_job_and_keeps_fragments() {
    let server = MockServer::start(vec![
        ("/seg/index_0.ts", b"aa".to_vec()),
        ("/seg/index_1.ts", b"bb".to_vec()),
    ])
    .await;
    let root = tempdir().unwrap();
    let config = test_config(root.path());
    let tool = HangingTool {
        deadline: Duration::from_secs(1),
    };
    let engine = ReassemblyEngine::with_mux_tool(config.clone(), Arc::new(tool)).unwrap();

    let report = engine
        .run_page(&PageSnapshot::from_urls([
            server.url("/seg/index_0.ts"),
            server.url("/seg/index_1.ts"),
        ]))
        .await;

    assert!(!report.cancelled);
    let job = &report.jobs[0];
    assert_eq!(job.strategy, Strategy::FragmentConcat);
    assert_eq!(job.status, JobStatus::Failed);
    let error = job.error.as_ref().unwrap();
    assert!(error.is_mux_error());
    assert!(error.to_string().contains("timed out"));

    let kept: Vec<PathBuf> = files_in(&config.temp_directory.join(&job.id))
        .into_iter()
        .filter(|p| p.extension().is_some_and(|ext| ext == "ts"))
        .collect();
    assert!(kept.len() >= 2);
    assert!(files_in(&config.output_directory).is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn test_media_tool_process_is_killed_at_timeout() {
    use std::os::unix::fs::PermissionsExt;

    let server = MockServer::start(vec![
        ("/seg/index_0.ts", b"aa".to_vec()),
        ("/seg/index_1.ts", b"bb".to_vec()),
    ])
    .await;
    let root = tempdir().unwrap();
    let script = root.path().join("slow-ffmpeg.sh");
    std::fs::write(&script, "#!/bin/sh\nsleep 30\n").unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let mut config = test_config(root.path());
    config.mux.tool_path = script.to_string_lossy().into_owned();
    config.mux.timeout_seconds = 1;
    let engine = ReassemblyEngine::new(config.clone()).unwrap();

    let started = std::time::Instant::now();
    let report = engine
        .run_page(&PageSnapshot::from_urls([
            server.url("/seg/index_0.ts"),
            server.url("/seg/index_1.ts"),
        ]))
        .await;

    let job = &report.jobs[0];
    assert_eq!(job.status, JobStatus::Failed);
    let error = job.error.as_ref().unwrap();
    assert!(error.is_mux_error());
    assert!(error.to_string().contains("timed out after 1s"));
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(files_in(&config.output_directory).is_empty());
}
