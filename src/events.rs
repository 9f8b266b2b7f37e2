//! Notification hub
//!
//! Core operations publish small events (what happened, to which file, the
//! new counter value) without caring whether anyone is listening. The
//! real-time endpoint subscribes and forwards them to connected clients.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events buffered per subscriber before it starts lagging
pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Upload,
    Dedup,
    Download,
    Delete,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Upload => "upload",
            EventKind::Dedup => "dedup",
            EventKind::Download => "download",
            EventKind::Delete => "delete",
        }
    }
}

/// A single notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub file_id: String,
    /// Reference count for upload/dedup/delete, download count for downloads
    pub count: i64,
    pub timestamp: String,
}

impl Event {
    pub fn new(kind: EventKind, file_id: impl Into<String>, count: i64) -> Self {
        Self {
            kind,
            file_id: file_id.into(),
            count,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Fan-out of events to any number of subscribers
#[derive(Clone)]
pub struct EventHub {
    sender: broadcast::Sender<Event>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. Never blocks; returns how many subscribers got it.
    pub fn publish(&self, event: Event) -> usize {
        tracing::trace!(kind = ?event.kind, file_id = %event.file_id, count = event.count, "Publishing event");
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
