//! Video Collector - Fragment Collection & Reassembly Engine
//!
//! Turns the media URLs observed while a page plays (manifests, numbered fragments,
//! whole files) into playable output files: classify, group, plan, fetch, mux.

pub mod core;
pub mod parsers;
pub mod utils;

// Re-export commonly used types
pub use core::{
    classifier::{classify, ClassifiedUrl},
    config::{EngineConfig, SameStreamRule},
    engine::ReassemblyEngine,
    error_handling::{ReassemblyError, ReassemblyResult},
    grouper::FragmentGrouper,
    manager::DownloadOrchestrator,
    models::{
        FragmentGroup, JobReport, JobStatus, ObservedUrl, PageSnapshot, ReassemblyJob, RunReport,
        StreamKind, Strategy, TrackKind,
    },
    muxer::{FfmpegTool, MuxTool, Muxer},
    observation::ObservationFeed,
    planner::{Plan, PlanNote, ReassemblyPlanner},
    progress_tracker::ProgressEvent,
};
pub use parsers::{parse_url_list, ParsedUrlList};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Initialize logging with default settings
pub fn init() -> anyhow::Result<()> {
    utils::init_tracing(false);
    tracing::info!("📚 {} v{} initialized", NAME, VERSION);
    Ok(())
}
