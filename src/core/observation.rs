//! Page observation feed
//!
//! The browser-driving side pushes every URL it sees into a channel while the page is
//! active. Once the observation window closes, the feed is drained into a single
//! [`PageSnapshot`]; grouping and planning only ever see that snapshot.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::core::models::{ObservedUrl, PageSnapshot};
use crate::utils::is_http_url;

pub type ObservationSender = mpsc::UnboundedSender<ObservedUrl>;

#[derive(Debug)]
pub struct ObservationFeed {
    page_url: Option<String>,
    title: Option<String>,
    sender: ObservationSender,
    receiver: mpsc::UnboundedReceiver<ObservedUrl>,
}

impl ObservationFeed {
    pub fn new(page_url: Option<String>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            page_url,
            title: None,
            sender,
            receiver,
        }
    }

    /// A sender for the observer; collection ends early once every sender is dropped
    pub fn sender(&self) -> ObservationSender {
        self.sender.clone()
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = Some(title.into());
    }

    /// Drain observations until all senders are gone or `window` has elapsed.
    ///
    /// Duplicates collapse onto the first observation of a URL; later sightings only
    /// fill in a content type, size hint or headers that were missing.
    pub async fn collect(self, window: Duration) -> PageSnapshot {
        let Self {
            page_url,
            title,
            sender,
            mut receiver,
        } = self;
        drop(sender);

        let deadline = Instant::now() + window;
        let mut observed: Vec<ObservedUrl> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();

        loop {
            match tokio::time::timeout_at(deadline, receiver.recv()).await {
                Ok(Some(url)) => merge_observation(&mut observed, &mut positions, url),
                Ok(None) => {
                    debug!("All observers finished");
                    break;
                }
                Err(_) => {
                    debug!("Observation window elapsed");
                    break;
                }
            }
        }

        // Anything already queued still belongs to the window
        while let Ok(url) = receiver.try_recv() {
            merge_observation(&mut observed, &mut positions, url);
        }

        info!("Observed {} unique URL(s)", observed.len());
        PageSnapshot {
            page_url,
            title,
            observed,
        }
    }
}

fn merge_observation(
    observed: &mut Vec<ObservedUrl>,
    positions: &mut HashMap<String, usize>,
    url: ObservedUrl,
) {
    if !is_http_url(&url.url) {
        debug!("Ignoring non-http observation: {}", url.url);
        return;
    }
    match positions.get(&url.url) {
        Some(&index) => {
            let existing = &mut observed[index];
            if existing.content_type.is_none() {
                existing.content_type = url.content_type;
            }
            if existing.size_hint.is_none() {
                existing.size_hint = url.size_hint;
            }
            for (name, value) in url.request_headers {
                existing.request_headers.entry(name).or_insert(value);
            }
        }
        None => {
            positions.insert(url.url.clone(), observed.len());
            observed.push(url);
        }
    }
}
