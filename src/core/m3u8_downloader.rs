//! M3U8/HLS 播放列表抓取
//!
//! 处理 PlaylistFetch 任务的下载阶段：
//! - 获取并解析播放列表（主播放列表只跟随带宽最高的变体）
//! - 按顺序并发下载全部片段（含 EXT-X-MAP 初始化片段）
//! - 以媒体时长记录进度
//!
//! DASH 清单和加密的 HLS 播放列表不在这里下载，而是整体交给外部媒体工具。

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use tracing::{debug, info, warn};

use crate::core::classifier::url_extension;
use crate::core::downloader::{ByteProgress, HttpFetcher, SegmentBatch};
use crate::core::error_handling::{errors, ReassemblyError, ReassemblyResult};
use crate::core::models::HeaderMap;
use crate::core::progress_tracker::JobProgress;
use crate::parsers::{parse_hls_playlist, select_variant, HlsMediaPlaylist, HlsPlaylist};

/// 为什么把清单交给外部工具
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelegateReason {
    /// DASH 清单
    Dash,
    /// 片段带有 EXT-X-KEY 加密
    Encrypted,
}

/// 播放列表解析结果
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedPlaylist {
    Delegate {
        manifest_url: String,
        reason: DelegateReason,
    },
    Media(HlsMediaPlaylist),
}

/// 播放列表下载结果
#[derive(Debug)]
pub enum PlaylistOutcome {
    /// 由外部工具直接读取该清单
    Delegate {
        manifest_url: String,
        reason: DelegateReason,
    },
    /// 已下载到本地的有序片段
    Segments {
        init: Option<PathBuf>,
        files: Vec<PathBuf>,
        /// 部分片段缺失时的警告
        warning: Option<ReassemblyError>,
    },
}

/// M3U8 播放列表抓取器
#[derive(Debug, Clone)]
pub struct PlaylistFetcher {
    fetcher: HttpFetcher,
    tolerate_missing: bool,
}

impl PlaylistFetcher {
    /// 创建新的播放列表抓取器实例
    pub fn new(fetcher: HttpFetcher, tolerate_missing: bool) -> Self {
        Self {
            fetcher,
            tolerate_missing,
        }
    }

    /// 获取清单并解析到媒体播放列表
    pub async fn resolve(
        &self,
        manifest_url: &str,
        headers: &HeaderMap,
        cancel: &AtomicBool,
    ) -> ReassemblyResult<ResolvedPlaylist> {
        if url_extension(manifest_url).as_deref() == Some("mpd") {
            return Ok(ResolvedPlaylist::Delegate {
                manifest_url: manifest_url.to_string(),
                reason: DelegateReason::Dash,
            });
        }

        let content = self.fetcher.fetch_bytes(manifest_url, headers, cancel).await?;
        let media = match parse_hls_playlist(manifest_url, &content)? {
            HlsPlaylist::Media(media) => media,
            HlsPlaylist::Master(variants) => {
                let variant = select_variant(&variants).ok_or_else(|| {
                    errors::manifest_error(manifest_url, "master playlist has no variants")
                })?;
                info!(
                    "主播放列表选择变体: {} (带宽 {})",
                    variant.url, variant.bandwidth
                );

                let content = self.fetcher.fetch_bytes(&variant.url, headers, cancel).await?;
                match parse_hls_playlist(&variant.url, &content)? {
                    HlsPlaylist::Media(media) => media,
                    HlsPlaylist::Master(_) => {
                        return Err(errors::manifest_error(
                            &variant.url,
                            "variant points to another master playlist",
                        ))
                    }
                }
            }
        };

        if media.encrypted {
            info!("播放列表已加密，交给外部工具处理: {}", media.url);
            return Ok(ResolvedPlaylist::Delegate {
                manifest_url: media.url,
                reason: DelegateReason::Encrypted,
            });
        }

        if media.segments.is_empty() {
            return Err(errors::manifest_error(&media.url, "playlist lists no segments"));
        }

        Ok(ResolvedPlaylist::Media(media))
    }

    /// 下载清单中的全部片段到 `work_dir`
    pub async fn fetch(
        &self,
        manifest_url: &str,
        headers: &HeaderMap,
        work_dir: &Path,
        progress: &JobProgress,
        cancel: &AtomicBool,
    ) -> ReassemblyResult<PlaylistOutcome> {
        info!("开始下载播放列表: {}", manifest_url);

        let media = match self.resolve(manifest_url, headers, cancel).await? {
            ResolvedPlaylist::Delegate {
                manifest_url,
                reason,
            } => {
                return Ok(PlaylistOutcome::Delegate {
                    manifest_url,
                    reason,
                })
            }
            ResolvedPlaylist::Media(media) => media,
        };

        if media.is_live {
            warn!(
                "播放列表没有 EXT-X-ENDLIST，只下载当前的 {} 个片段: {}",
                media.segments.len(),
                media.url
            );
        }
        progress.set_total(media.total_duration_ms());

        let init = match &media.init_segment {
            Some(init_url) => {
                let extension = url_extension(init_url).unwrap_or_else(|| "mp4".to_string());
                let dest = work_dir.join(format!("init.{}", extension));
                self.fetcher
                    .fetch_file(init_url, headers, &dest, ByteProgress::Silent, cancel)
                    .await?;
                debug!("初始化片段已下载: {}", init_url);
                Some(dest)
            }
            None => None,
        };

        let extension = media
            .segments
            .first()
            .and_then(|s| url_extension(&s.url))
            .unwrap_or_else(|| "ts".to_string());
        let durations: Vec<u64> = media.segments.iter().map(|s| s.duration_ms).collect();

        let batch = SegmentBatch {
            urls: media.segments.iter().map(|s| s.url.clone()).collect(),
            headers,
            directory: work_dir,
            prefix: "segment",
            extension: &extension,
            tolerate_missing: self.tolerate_missing,
        };
        let outcome = self
            .fetcher
            .fetch_segments(batch, ByteProgress::Silent, cancel, |index| {
                progress.advance(durations[index]);
            })
            .await?;

        let warning = outcome.partial_warning();
        if let Some(warning) = &warning {
            warn!("播放列表 {} 片段不完整: {}", media.url, warning);
        }

        info!(
            "播放列表下载完成: {} ({} 个片段)",
            media.url,
            outcome.files.len()
        );
        Ok(PlaylistOutcome::Segments {
            init,
            files: outcome.files,
            warning,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::DownloadConfig;

    fn playlist_fetcher() -> PlaylistFetcher {
        PlaylistFetcher::new(HttpFetcher::new(&DownloadConfig::default()).unwrap(), true)
    }

    #[tokio::test]
    async fn test_dash_manifest_is_delegated_without_fetching() {
        let cancel = AtomicBool::new(false);
        let resolved = playlist_fetcher()
            .resolve("http://127.0.0.1:9/live/stream.MPD?t=1", &HeaderMap::new(), &cancel)
            .await
            .unwrap();
        assert_eq!(
            resolved,
            ResolvedPlaylist::Delegate {
                manifest_url: "http://127.0.0.1:9/live/stream.MPD?t=1".to_string(),
                reason: DelegateReason::Dash,
            }
        );
    }
}
