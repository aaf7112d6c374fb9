//! Lossless muxing through an external media tool
//!
//! [`Muxer`] owns the file handling: it joins ordered fragments, writes tool output to
//! a hidden `.part` sibling, renames it over the final path, and removes the
//! intermediates only after the rename succeeded. The tool itself sits behind
//! [`MuxTool`]; [`FfmpegTool`] is the production implementation.

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::core::config::MuxConfig;
use crate::core::error_handling::{errors, ReassemblyError, ReassemblyResult};
use crate::core::models::HeaderMap;
use crate::utils::{atomic_replace, ensure_dir_exists, get_file_extension, partial_path};

const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(5);
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(100);
const STDERR_TAIL_LINES: usize = 12;

/// A stream-copy capable media tool
#[async_trait]
pub trait MuxTool: Send + Sync {
    fn name(&self) -> &str;

    /// Rewrite `input` into the container implied by `output`, without re-encoding
    async fn remux(
        &self,
        input: &Path,
        output: &Path,
        cancel: &AtomicBool,
    ) -> ReassemblyResult<()>;

    /// Combine the first video stream of `video` with the first audio stream of `audio`
    async fn merge_tracks(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        cancel: &AtomicBool,
    ) -> ReassemblyResult<()>;

    /// Let the tool read a manifest itself (DASH, encrypted HLS)
    async fn remux_manifest(
        &self,
        manifest_url: &str,
        headers: &HeaderMap,
        output: &Path,
        cancel: &AtomicBool,
    ) -> ReassemblyResult<()>;

    async fn check_available(&self) -> bool;
}

/// ffmpeg invoked with `-c copy`
#[derive(Debug, Clone)]
pub struct FfmpegTool {
    tool_path: String,
    timeout: Duration,
}

impl FfmpegTool {
    pub fn new(tool_path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            tool_path: tool_path.into(),
            timeout,
        }
    }

    pub fn from_config(config: &MuxConfig) -> Self {
        Self::new(
            config.tool_path.clone(),
            Duration::from_secs(config.timeout_seconds),
        )
    }

    fn output_args(output: &Path) -> Vec<OsString> {
        vec![
            "-f".into(),
            container_format(output).into(),
            output.as_os_str().to_os_string(),
        ]
    }

    async fn run(&self, args: Vec<OsString>, cancel: &AtomicBool) -> ReassemblyResult<()> {
        let mut command = Command::new(&self.tool_path);
        command
            .arg("-y")
            .args(["-hide_banner", "-loglevel", "error"])
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Running {} {:?}", self.tool_path, args);

        let output = tokio::select! {
            result = tokio::time::timeout(self.timeout, command.output()) => result,
            _ = wait_for_cancel(cancel) => return Err(ReassemblyError::Cancelled),
        };

        let output = match output {
            Err(_) => {
                return Err(errors::mux_error(
                    format!(
                        "{} timed out after {}s",
                        self.tool_path,
                        self.timeout.as_secs()
                    ),
                    None,
                ))
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ReassemblyError::ToolMissing {
                    tool: self.tool_path.clone(),
                })
            }
            Ok(Err(e)) => {
                return Err(errors::mux_error(
                    format!("failed to start {}: {}", self.tool_path, e),
                    None,
                ))
            }
            Ok(Ok(output)) => output,
        };

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
        let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
        Err(errors::mux_error(
            format!(
                "{} exited with {}: {}",
                self.tool_path,
                output.status,
                if tail.is_empty() { "no output" } else { &tail }
            ),
            output.status.code(),
        ))
    }
}

#[async_trait]
impl MuxTool for FfmpegTool {
    fn name(&self) -> &str {
        &self.tool_path
    }

    async fn remux(
        &self,
        input: &Path,
        output: &Path,
        cancel: &AtomicBool,
    ) -> ReassemblyResult<()> {
        let mut args: Vec<OsString> = vec!["-i".into(), input.as_os_str().to_os_string()];
        args.extend(["-c", "copy"].map(OsString::from));
        args.extend(Self::output_args(output));
        self.run(args, cancel).await
    }

    async fn merge_tracks(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        cancel: &AtomicBool,
    ) -> ReassemblyResult<()> {
        let mut args: Vec<OsString> = vec![
            "-i".into(),
            video.as_os_str().to_os_string(),
            "-i".into(),
            audio.as_os_str().to_os_string(),
        ];
        args.extend(["-map", "0:v:0", "-map", "1:a:0", "-c", "copy"].map(OsString::from));
        args.extend(Self::output_args(output));
        self.run(args, cancel).await
    }

    async fn remux_manifest(
        &self,
        manifest_url: &str,
        headers: &HeaderMap,
        output: &Path,
        cancel: &AtomicBool,
    ) -> ReassemblyResult<()> {
        let mut args: Vec<OsString> = Vec::new();
        if !headers.is_empty() {
            let joined: String = headers
                .iter()
                .map(|(name, value)| format!("{}: {}\r\n", name, value))
                .collect();
            args.push("-headers".into());
            args.push(joined.into());
        }
        args.extend(["-i", manifest_url, "-c", "copy"].map(OsString::from));
        args.extend(Self::output_args(output));
        self.run(args, cancel).await
    }

    async fn check_available(&self) -> bool {
        let status = Command::new(&self.tool_path)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        match tokio::time::timeout(VERSION_CHECK_TIMEOUT, status).await {
            Ok(Ok(status)) => status.success(),
            _ => false,
        }
    }
}

/// Muxer name for `-f`, taken from the output extension
fn container_format(output: &Path) -> String {
    let name = output.to_string_lossy();
    let name = name.strip_suffix(".part").unwrap_or(&name);
    match get_file_extension(name).map(str::to_ascii_lowercase).as_deref() {
        Some(ext @ ("webm" | "mov" | "flv" | "avi" | "mkv")) => ext.to_string(),
        _ => "mp4".to_string(),
    }
}

async fn wait_for_cancel(cancel: &AtomicBool) {
    while !cancel.load(Ordering::Relaxed) {
        tokio::time::sleep(CANCEL_POLL_INTERVAL).await;
    }
}

/// Byte-concatenate `inputs` into `dest` in order
pub async fn concat_files(inputs: &[PathBuf], dest: &Path) -> ReassemblyResult<u64> {
    let file = File::create(dest)
        .await
        .map_err(|e| errors::filesystem_error(dest, e))?;
    let mut writer = BufWriter::new(file);
    let mut buffer = vec![0u8; 64 * 1024];
    let mut total = 0u64;

    for input in inputs {
        let mut reader = File::open(input)
            .await
            .map_err(|e| errors::filesystem_error(input, e))?;
        loop {
            let read = reader
                .read(&mut buffer)
                .await
                .map_err(|e| errors::filesystem_error(input, e))?;
            if read == 0 {
                break;
            }
            writer
                .write_all(&buffer[..read])
                .await
                .map_err(|e| errors::filesystem_error(dest, e))?;
            total += read as u64;
        }
    }

    writer
        .flush()
        .await
        .map_err(|e| errors::filesystem_error(dest, e))?;
    Ok(total)
}

#[derive(Clone)]
pub struct Muxer {
    tool: Arc<dyn MuxTool>,
    keep_intermediates: bool,
}

impl std::fmt::Debug for Muxer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Muxer")
            .field("tool", &self.tool.name())
            .field("keep_intermediates", &self.keep_intermediates)
            .finish()
    }
}

impl Muxer {
    pub fn new(tool: Arc<dyn MuxTool>, keep_intermediates: bool) -> Self {
        Self {
            tool,
            keep_intermediates,
        }
    }

    pub fn from_config(config: &MuxConfig) -> Self {
        Self::new(
            Arc::new(FfmpegTool::from_config(config)),
            config.keep_intermediates,
        )
    }

    pub fn tool_name(&self) -> &str {
        self.tool.name()
    }

    /// Whether the media tool can be executed
    pub async fn check_available(&self) -> bool {
        self.tool.check_available().await
    }

    /// Join ordered fragments into one playable file at `output`
    pub async fn mux(
        &self,
        fragments: &[PathBuf],
        output: &Path,
        cancel: &AtomicBool,
    ) -> ReassemblyResult<()> {
        info!("Muxing {} fragment(s) into {:?}", fragments.len(), output);
        let joined = join_track(fragments, "joined").await?;

        let tool = Arc::clone(&self.tool);
        let result = self
            .write_output(output, |tmp| async move {
                tool.remux(&joined, &tmp, cancel).await
            })
            .await;

        self.finish(result, fragments, &[joined_path(fragments, "joined")])
            .await
    }

    /// Mux separately fetched video and audio fragments into one container
    pub async fn mux_tracks(
        &self,
        video: &[PathBuf],
        audio: &[PathBuf],
        output: &Path,
        cancel: &AtomicBool,
    ) -> ReassemblyResult<()> {
        info!(
            "Muxing {} video and {} audio fragment(s) into {:?}",
            video.len(),
            audio.len(),
            output
        );
        let video_joined = join_track(video, "video_joined").await?;
        let audio_joined = join_track(audio, "audio_joined").await?;

        let tool = Arc::clone(&self.tool);
        let (v, a) = (video_joined.clone(), audio_joined.clone());
        let result = self
            .write_output(output, |tmp| async move {
                tool.merge_tracks(&v, &a, &tmp, cancel).await
            })
            .await;

        let fragments: Vec<PathBuf> = video.iter().chain(audio.iter()).cloned().collect();
        self.finish(result, &fragments, &[video_joined, audio_joined])
            .await
    }

    /// Hand a manifest to the tool and let it fetch the media itself
    pub async fn mux_manifest(
        &self,
        manifest_url: &str,
        headers: &HeaderMap,
        output: &Path,
        cancel: &AtomicBool,
    ) -> ReassemblyResult<()> {
        info!("Remuxing manifest {} into {:?}", manifest_url, output);
        let tool = Arc::clone(&self.tool);
        let result = self
            .write_output(output, |tmp| async move {
                tool.remux_manifest(manifest_url, headers, &tmp, cancel).await
            })
            .await;
        if let Err(e) = &result {
            error!("Manifest remux failed for {}: {}", manifest_url, e);
        }
        result
    }

    /// Run `produce` against the `.part` sibling of `output`, then rename it into place
    async fn write_output<F, Fut>(&self, output: &Path, produce: F) -> ReassemblyResult<()>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: std::future::Future<Output = ReassemblyResult<()>>,
    {
        if let Some(parent) = output.parent() {
            ensure_dir_exists(parent).await?;
        }
        let tmp = partial_path(output);

        if let Err(e) = produce(tmp.clone()).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
        if !tmp.exists() {
            return Err(errors::mux_error(
                format!("{} produced no output", self.tool.name()),
                None,
            ));
        }
        atomic_replace(&tmp, output).await
    }

    /// Remove intermediates after success; keep everything for diagnosis on failure
    async fn finish(
        &self,
        result: ReassemblyResult<()>,
        fragments: &[PathBuf],
        joined: &[PathBuf],
    ) -> ReassemblyResult<()> {
        match &result {
            Ok(()) if !self.keep_intermediates => {
                for path in fragments.iter().chain(joined.iter()) {
                    if let Err(e) = tokio::fs::remove_file(path).await {
                        warn!("Failed to remove intermediate {:?}: {}", path, e);
                    }
                }
                debug!("Removed {} intermediate file(s)", fragments.len() + joined.len());
            }
            Ok(()) => {}
            Err(e) => error!(
                "Mux failed, keeping {} fragment(s) for inspection: {}",
                fragments.len(),
                e
            ),
        }
        result
    }
}

fn joined_path(fragments: &[PathBuf], stem: &str) -> PathBuf {
    let last = fragments.last().map(PathBuf::as_path).unwrap_or(Path::new("."));
    let extension = last
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "ts".to_string());
    last.with_file_name(format!("{}.{}", stem, extension))
}

async fn join_track(fragments: &[PathBuf], stem: &str) -> ReassemblyResult<PathBuf> {
    if fragments.is_empty() {
        return Err(errors::mux_error("no fragments to mux", None));
    }
    let joined = joined_path(fragments, stem);
    let bytes = concat_files(fragments, &joined).await?;
    debug!("Joined {} fragment(s) into {:?} ({} bytes)", fragments.len(), joined, bytes);
    Ok(joined)
}
