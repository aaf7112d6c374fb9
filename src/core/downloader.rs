//! HTTP 抓取引擎
//!
//! 负责所有 URL 的实际下载：
//! - 单文件分块流式下载（DirectFetch）
//! - 分片序列的有序并发下载（FragmentConcat / PlaylistFetch）
//! - 清单文本获取
//!
//! 每次请求都经过 [`RetryExecutor`]，输出先写入临时 `.part` 文件，成功后再原子重命名。

use bytes::Bytes;
use futures::stream;
use futures_util::StreamExt;
use reqwest::{Client, RequestBuilder, Response};
use std::path::{Path, PathBuf};
use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::core::config::DownloadConfig;
use crate::core::error_handling::{errors, ReassemblyError, ReassemblyResult, RetryExecutor};
use crate::core::models::HeaderMap;
use crate::core::progress_tracker::JobProgress;
use crate::utils::{atomic_replace, partial_path};

/// 字节进度的记账方式
#[derive(Debug, Clone, Copy)]
pub enum ByteProgress<'a> {
    /// 不记录字节进度
    Silent,
    /// 单个文件：总量取自 Content-Length
    Whole(&'a JobProgress),
    /// 多个文件累加：每个响应的长度计入总量
    Accumulate(&'a JobProgress),
}

impl ByteProgress<'_> {
    fn on_response(&self, content_length: Option<u64>) {
        match self {
            ByteProgress::Silent => {}
            ByteProgress::Whole(progress) => progress.set_total(content_length),
            ByteProgress::Accumulate(progress) => {
                if let Some(length) = content_length {
                    progress.add_to_total(length);
                }
            }
        }
    }

    fn on_chunk(&self, len: u64) {
        if let ByteProgress::Whole(progress) | ByteProgress::Accumulate(progress) = self {
            progress.advance(len);
        }
    }

    /// 失败的尝试回滚已计入的进度
    fn on_failure(&self, written: u64, content_length: Option<u64>) {
        match self {
            ByteProgress::Silent => {}
            ByteProgress::Whole(progress) => progress.rewind(written),
            ByteProgress::Accumulate(progress) => {
                progress.rewind(written);
                if let Some(length) = content_length {
                    progress.shrink_total(length);
                }
            }
        }
    }
}

/// 一批按序号排列的分片下载请求
#[derive(Debug, Clone)]
pub struct SegmentBatch<'a> {
    pub urls: Vec<String>,
    pub headers: &'a HeaderMap,
    pub directory: &'a Path,
    /// 本地文件名前缀，如 `video`、`audio`、`segment`
    pub prefix: &'a str,
    pub extension: &'a str,
    /// 为 true 时跳过重试后仍失败的分片
    pub tolerate_missing: bool,
}

/// 分片下载结果，`files` 保持原始顺序
#[derive(Debug, Default)]
pub struct SegmentOutcome {
    pub files: Vec<PathBuf>,
    pub failures: Vec<(usize, ReassemblyError)>,
    pub expected: usize,
}

impl SegmentOutcome {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.files.len() == self.expected
    }

    /// 部分分片缺失时的警告
    pub fn partial_warning(&self) -> Option<ReassemblyError> {
        (!self.is_complete()).then(|| ReassemblyError::PartialFragmentSet {
            expected: self.expected,
            fetched: self.files.len(),
        })
    }
}

/// HTTP 抓取器
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    config: DownloadConfig,
    retry: RetryExecutor,
}

impl HttpFetcher {
    /// 创建新的抓取器实例
    pub fn new(config: &DownloadConfig) -> ReassemblyResult<Self> {
        // 只限制连接与空闲时间，不限制整体传输时长
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_seconds.min(10)))
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| errors::configuration_error(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            config: config.clone(),
            retry: RetryExecutor::new(config.retry_policy()),
        })
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// 两次收到数据之间允许的最长间隔
    fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_seconds)
    }

    fn timed_out(&self, url: &str) -> ReassemblyError {
        ReassemblyError::Timeout {
            operation: format!("GET {url}"),
            seconds: self.config.timeout_seconds,
        }
    }

    /// 发送请求并检查状态码，等待响应头的时间受空闲超时限制
    async fn send_request(&self, url: &str, headers: &HeaderMap) -> ReassemblyResult<Response> {
        let response = timeout(self.idle_timeout(), self.request(url, headers).send())
            .await
            .map_err(|_| self.timed_out(url))?
            .map_err(|e| errors::request_error(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(errors::http_status_error(url, status.as_u16()));
        }
        Ok(response)
    }

    fn request(&self, url: &str, headers: &HeaderMap) -> RequestBuilder {
        headers
            .iter()
            .fold(self.client.get(url), |request, (name, value)| {
                request.header(name.as_str(), value.as_str())
            })
    }

    /// 下载单个文件到 `dest`，返回写入的字节数
    pub async fn fetch_file(
        &self,
        url: &str,
        headers: &HeaderMap,
        dest: &Path,
        progress: ByteProgress<'_>,
        cancel: &AtomicBool,
    ) -> ReassemblyResult<u64> {
        self.retry
            .execute(url, || self.fetch_file_once(url, headers, dest, progress, cancel))
            .await
    }

    async fn fetch_file_once(
        &self,
        url: &str,
        headers: &HeaderMap,
        dest: &Path,
        progress: ByteProgress<'_>,
        cancel: &AtomicBool,
    ) -> ReassemblyResult<u64> {
        if cancel.load(Ordering::Relaxed) {
            return Err(ReassemblyError::Cancelled);
        }

        let response = self.send_request(url, headers).await?;
        let content_length = response.content_length();
        progress.on_response(content_length);

        let partial = partial_path(dest);
        let file = File::create(&partial)
            .await
            .map_err(|e| errors::filesystem_error(&partial, e))?;
        let mut file = BufWriter::with_capacity(self.config.buffer_size.max(8 * 1024), file);

        let mut written = 0u64;
        let idle = self.idle_timeout();
        let mut chunks = response.bytes_stream();
        let streamed: ReassemblyResult<()> = async {
            loop {
                let next = timeout(idle, chunks.next())
                    .await
                    .map_err(|_| self.timed_out(url))?;
                // 检查取消标志
                if cancel.load(Ordering::Relaxed) {
                    return Err(ReassemblyError::Cancelled);
                }
                let Some(chunk) = next else {
                    break;
                };
                let chunk = chunk.map_err(|e| errors::request_error(url, &e))?;
                file.write_all(&chunk)
                    .await
                    .map_err(|e| errors::filesystem_error(&partial, e))?;
                written += chunk.len() as u64;
                progress.on_chunk(chunk.len() as u64);
            }
            file.flush()
                .await
                .map_err(|e| errors::filesystem_error(&partial, e))
        }
        .await;
        drop(file);

        if let Err(error) = streamed {
            progress.on_failure(written, content_length);
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(error);
        }

        atomic_replace(&partial, dest).await?;
        debug!("下载完成: {} ({} 字节)", url, written);
        Ok(written)
    }

    /// 获取清单等小文件的完整内容
    pub async fn fetch_bytes(
        &self,
        url: &str,
        headers: &HeaderMap,
        cancel: &AtomicBool,
    ) -> ReassemblyResult<Bytes> {
        self.retry
            .execute(url, || async move {
                if cancel.load(Ordering::Relaxed) {
                    return Err(ReassemblyError::Cancelled);
                }
                let response = self.send_request(url, headers).await?;
                timeout(self.idle_timeout(), response.bytes())
                    .await
                    .map_err(|_| self.timed_out(url))?
                    .map_err(|e| errors::request_error(url, &e))
            })
            .await
    }

    /// 按序号并发下载一批分片。
    ///
    /// 最多同时进行 `concurrent_segments` 个请求，结果按原始顺序收集；每完成一个分片
    /// 以其序号调用 `on_segment`。`tolerate_missing` 为 false 时第一个失败的分片即终止整批。
    pub async fn fetch_segments<F>(
        &self,
        batch: SegmentBatch<'_>,
        progress: ByteProgress<'_>,
        cancel: &AtomicBool,
        mut on_segment: F,
    ) -> ReassemblyResult<SegmentOutcome>
    where
        F: FnMut(usize),
    {
        let SegmentBatch {
            urls,
            headers,
            directory,
            prefix,
            extension,
            tolerate_missing,
        } = batch;
        let expected = urls.len();
        info!("开始下载 {} 个分片 ({}.{})", expected, prefix, extension);

        let downloads = stream::iter(urls.into_iter().enumerate().map(|(index, url)| {
            let dest = directory.join(format!("{}_{:06}.{}", prefix, index, extension));
            async move {
                let result = self
                    .fetch_file(&url, headers, &dest, progress, cancel)
                    .await
                    .map(|_| dest);
                (index, result)
            }
        }))
        .buffered(self.config.concurrent_segments.max(1));
        let mut downloads = pin!(downloads);

        let mut outcome = SegmentOutcome {
            expected,
            ..Default::default()
        };

        while let Some((index, result)) = downloads.next().await {
            match result {
                Ok(path) => {
                    outcome.files.push(path);
                    on_segment(index);
                }
                Err(ReassemblyError::Cancelled) => return Err(ReassemblyError::Cancelled),
                Err(error) if tolerate_missing => {
                    warn!("跳过失败的分片 #{}: {}", index, error);
                    outcome.failures.push((index, error));
                }
                Err(error) => return Err(error),
            }
        }

        if outcome.files.is_empty() && expected > 0 {
            // 一个分片都没有拿到时没有可合并的内容
            return Err(match outcome.failures.pop() {
                Some((_, error)) => error,
                None => errors::network_error(prefix, "no segments fetched", false),
            });
        }

        info!(
            "分片下载完成: {}/{} ({}.{})",
            outcome.files.len(),
            expected,
            prefix,
            extension
        );
        Ok(outcome)
    }
}
