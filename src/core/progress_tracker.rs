//! Progress tracking and speed statistics
//!
//! Each running job owns a [`JobProgress`] handle. The handle is cheap to clone so
//! parallel segment fetches can all report into the same counter. Updates are
//! forwarded to the run's event channel at most every [`EMIT_INTERVAL`], except for
//! explicit flushes.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::debug;

use crate::core::error_handling::ReassemblyError;
use crate::core::models::{JobStatus, ProgressState, ProgressUnit, Strategy};

/// Minimum spacing between two emitted progress updates of one job
pub const EMIT_INTERVAL: Duration = Duration::from_millis(500);

/// Weight of a new speed sample in the moving average
const EMA_ALPHA: f64 = 0.2;

/// Point-in-time view of one job's progress
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressSnapshot {
    pub job_id: String,
    pub state: ProgressState,
    /// Smoothed rate in `state.unit` per second
    pub speed: f64,
    /// Estimated seconds remaining; unknown while the total is unknown
    pub eta_seconds: Option<u64>,
}

/// Events published while a run executes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProgressEvent {
    JobStarted {
        job_id: String,
        strategy: Strategy,
    },
    JobProgress(ProgressSnapshot),
    JobFinished {
        job_id: String,
        status: JobStatus,
        error: Option<ReassemblyError>,
    },
    Overall {
        completed: usize,
        failed: usize,
        total: usize,
    },
}

pub type ProgressSender = mpsc::UnboundedSender<ProgressEvent>;
pub type ProgressReceiver = mpsc::UnboundedReceiver<ProgressEvent>;

#[derive(Debug)]
struct TrackerState {
    state: ProgressState,
    smoothed_speed: f64,
    last_sample: Instant,
    last_sample_value: u64,
    last_emit: Option<Instant>,
}

#[derive(Debug, Clone)]
pub struct JobProgress {
    job_id: Arc<str>,
    inner: Arc<Mutex<TrackerState>>,
    sender: Option<ProgressSender>,
}

impl JobProgress {
    pub fn new(job_id: &str, unit: ProgressUnit, sender: Option<ProgressSender>) -> Self {
        Self {
            job_id: Arc::from(job_id),
            inner: Arc::new(Mutex::new(TrackerState {
                state: ProgressState::new(unit),
                smoothed_speed: 0.0,
                last_sample: Instant::now(),
                last_sample_value: 0,
                last_emit: None,
            })),
            sender,
        }
    }

    /// Handle that records progress but publishes nothing
    pub fn detached(job_id: &str, unit: ProgressUnit) -> Self {
        Self::new(job_id, unit, None)
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn set_total(&self, total: Option<u64>) {
        self.inner.lock().state.total = total;
    }

    /// Grow the total by `amount`, starting from zero if it was unknown
    pub fn add_to_total(&self, amount: u64) {
        let mut inner = self.inner.lock();
        inner.state.total = Some(inner.state.total.unwrap_or(0).saturating_add(amount));
    }

    pub fn shrink_total(&self, amount: u64) {
        let mut inner = self.inner.lock();
        if let Some(total) = inner.state.total {
            inner.state.total = Some(total.saturating_sub(amount));
        }
    }

    pub fn advance(&self, amount: u64) {
        let snapshot = {
            let mut inner = self.inner.lock();
            inner.state.completed = inner.state.completed.saturating_add(amount);
            Self::sample_speed(&mut inner);
            Self::take_due_snapshot(&self.job_id, &mut inner, false)
        };
        self.publish(snapshot);
    }

    /// Undo progress from a failed attempt that is about to be retried
    pub fn rewind(&self, amount: u64) {
        let mut inner = self.inner.lock();
        inner.state.completed = inner.state.completed.saturating_sub(amount);
        inner.last_sample_value = inner.state.completed;
    }

    pub fn state(&self) -> ProgressState {
        self.inner.lock().state.clone()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let inner = self.inner.lock();
        Self::build_snapshot(&self.job_id, &inner)
    }

    /// Publish the current state regardless of throttling
    pub fn flush(&self) {
        let snapshot = {
            let mut inner = self.inner.lock();
            Self::take_due_snapshot(&self.job_id, &mut inner, true)
        };
        self.publish(snapshot);
    }

    fn sample_speed(inner: &mut TrackerState) {
        let now = Instant::now();
        let elapsed = now.duration_since(inner.last_sample).as_secs_f64();
        if elapsed < 0.05 {
            return;
        }

        let delta = inner.state.completed.saturating_sub(inner.last_sample_value);
        let current = delta as f64 / elapsed;
        inner.smoothed_speed = if inner.smoothed_speed == 0.0 {
            current
        } else {
            EMA_ALPHA * current + (1.0 - EMA_ALPHA) * inner.smoothed_speed
        };
        inner.last_sample = now;
        inner.last_sample_value = inner.state.completed;
    }

    fn take_due_snapshot(
        job_id: &str,
        inner: &mut TrackerState,
        force: bool,
    ) -> Option<ProgressSnapshot> {
        let now = Instant::now();
        let due = inner
            .last_emit
            .map_or(true, |last| now.duration_since(last) >= EMIT_INTERVAL);
        if !force && !due {
            return None;
        }
        inner.last_emit = Some(now);
        Some(Self::build_snapshot(job_id, inner))
    }

    fn build_snapshot(job_id: &str, inner: &TrackerState) -> ProgressSnapshot {
        let eta_seconds = match inner.state.total {
            Some(total) if inner.smoothed_speed > 0.0 && inner.state.completed < total => {
                Some(((total - inner.state.completed) as f64 / inner.smoothed_speed) as u64)
            }
            _ => None,
        };

        ProgressSnapshot {
            job_id: job_id.to_string(),
            state: inner.state.clone(),
            speed: inner.smoothed_speed,
            eta_seconds,
        }
    }

    fn publish(&self, snapshot: Option<ProgressSnapshot>) {
        let (Some(snapshot), Some(sender)) = (snapshot, &self.sender) else {
            return;
        };
        debug!(
            "Progress for {}: {}/{:?}",
            snapshot.job_id, snapshot.state.completed, snapshot.state.total
        );
        // A closed receiver only means nobody is listening any more
        let _ = sender.send(ProgressEvent::JobProgress(snapshot));
    }
}
