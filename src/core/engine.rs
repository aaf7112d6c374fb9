//! Page-level entry point
//!
//! Wires the pipeline together: classify every observed URL, group the fragments,
//! plan jobs, then hand them to the orchestrator.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

use crate::core::classifier::{classify_observed, ClassifiedUrl};
use crate::core::config::EngineConfig;
use crate::core::error_handling::ReassemblyResult;
use crate::core::grouper::FragmentGrouper;
use crate::core::manager::DownloadOrchestrator;
use crate::core::models::{PageSnapshot, RunReport, StreamKind};
use crate::core::muxer::MuxTool;
use crate::core::planner::{PageContext, Plan, PlanNote, ReassemblyPlanner};
use crate::core::progress_tracker::ProgressSender;

pub struct ReassemblyEngine {
    config: EngineConfig,
    orchestrator: DownloadOrchestrator,
}

impl ReassemblyEngine {
    pub fn new(config: EngineConfig) -> ReassemblyResult<Self> {
        let orchestrator = DownloadOrchestrator::new(&config)?;
        Ok(Self {
            config,
            orchestrator,
        })
    }

    pub fn with_mux_tool(config: EngineConfig, tool: Arc<dyn MuxTool>) -> ReassemblyResult<Self> {
        let orchestrator = DownloadOrchestrator::with_mux_tool(&config, tool)?;
        Ok(Self {
            config,
            orchestrator,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn set_event_sender(&mut self, sender: ProgressSender) {
        self.orchestrator.set_event_sender(sender);
    }

    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.orchestrator.cancel_handle()
    }

    pub fn orchestrator(&self) -> &DownloadOrchestrator {
        &self.orchestrator
    }

    /// Classify, group and plan one page snapshot. Touches neither network nor disk.
    pub fn plan_page(&self, snapshot: &PageSnapshot) -> Plan {
        let classified: Vec<ClassifiedUrl> =
            snapshot.observed.iter().map(classify_observed).collect();

        let grouper = FragmentGrouper::new(self.config.planner.track_size_ratio);
        let grouping = grouper.group_with_report(
            classified
                .iter()
                .filter(|c| c.kind == StreamKind::Fragment)
                .map(|c| &c.observed),
        );

        let planner = ReassemblyPlanner::new(
            self.config.planner.clone(),
            self.config.output_directory.clone(),
        )
        .with_static_headers(self.config.download.headers.clone())
        .for_page(PageContext {
            page_url: snapshot.page_url.clone(),
            title: snapshot.title.clone(),
        });

        let mut plan = planner.plan(&classified, &grouping.groups);
        plan.notes
            .extend(grouping.discarded.into_iter().map(PlanNote::from));
        plan
    }

    /// Plan and run one page
    pub async fn run_page(&self, snapshot: &PageSnapshot) -> RunReport {
        let plan = self.plan_page(snapshot);
        info!(
            "Page {} planned into {} job(s)",
            snapshot.page_url.as_deref().unwrap_or("<unknown>"),
            plan.jobs.len()
        );
        self.orchestrator.run(plan.jobs).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::Strategy;
    use crate::parsers::parse_url_list;

    #[test]
    fn test_plan_page_from_pasted_list() {
        let input = r#"{"videoUrls": ["https://x/a.m3u8", "https://x/seg/index_0.ts", "https://x/seg/index_1.ts"]}"#;
        let snapshot = parse_url_list(input).into_snapshot();

        let engine = ReassemblyEngine::new(EngineConfig::default()).unwrap();
        let plan = engine.plan_page(&snapshot);

        assert_eq!(plan.jobs.len(), 1);
        assert_eq!(plan.jobs[0].strategy, Strategy::PlaylistFetch);
    }

    #[test]
    fn test_singleton_fragment_recorded_as_discarded() {
        let snapshot = PageSnapshot::from_urls(["https://x/seg/index_9.ts", "https://x/logo.png"]);
        let engine = ReassemblyEngine::new(EngineConfig::default()).unwrap();
        let plan = engine.plan_page(&snapshot);

        assert!(plan.jobs.is_empty());
        assert!(plan.notes.iter().any(|n| matches!(
            n,
            PlanNote::GroupingDiscarded { members: 1, .. }
        )));
        assert!(plan
            .notes
            .iter()
            .any(|n| matches!(n, PlanNote::ClassificationNoop { .. })));
    }
}
