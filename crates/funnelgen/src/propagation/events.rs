//! Propagation broadcaster for observing background runs.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use super::PropagationReport;

/// Published once per finished propagation run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropagationEvent {
    pub timestamp: DateTime<Utc>,
    pub report: PropagationReport,
}

impl PropagationEvent {
    pub fn new(report: PropagationReport) -> Self {
        Self {
            timestamp: Utc::now(),
            report,
        }
    }
}

/// Broadcasts finished propagation reports.
#[derive(Clone)]
pub struct PropagationBroadcaster {
    sender: Arc<broadcast::Sender<PropagationEvent>>,
}

impl PropagationBroadcaster {
    /// Creates a new broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends an event to all subscribers.
    pub fn send(&self, event: PropagationEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PropagationEvent> {
        self.sender.subscribe()
    }
}

impl Default for PropagationBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}
