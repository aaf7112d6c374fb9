//! Core reassembly pipeline
//!
//! Classification, grouping and planning are pure; fetching, muxing and orchestration
//! perform the I/O.

pub mod classifier;
pub mod config;
pub mod downloader;
pub mod engine;
pub mod error_handling;
pub mod grouper;
pub mod m3u8_downloader;
pub mod manager;
pub mod models;
pub mod muxer;
pub mod observation;
pub mod planner;
pub mod progress_tracker;

#[cfg(test)]
mod integration_tests;


// Re-export commonly used types
pub use config::EngineConfig;
pub use engine::ReassemblyEngine;
pub use manager::DownloadOrchestrator;
