use std::sync::mpsc::{self, Receiver, Sender};

use parking_lot::RwLock;
use serde::Serialize;
use time::OffsetDateTime;

use crate::db::now_utc_rfc3339;

/// Occurrences a re-query cannot express, such as the thread being viewed
/// losing its root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CollectionEventKind {
    /// The UI should navigate away from the thread.
    ContextParentDeleted { status_id: String },
    StatusDeleted { status_id: String },
    AccountRemoved { account_id: String },
    TimelineCleared { timeline: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionEvent {
    pub occurred_at: String,
    #[serde(flatten)]
    pub kind: CollectionEventKind,
}

impl CollectionEvent {
    pub fn new(kind: CollectionEventKind) -> Self {
        Self {
            occurred_at: now_utc_rfc3339(),
            kind,
        }
    }

    pub fn at(kind: CollectionEventKind, occurred_at: OffsetDateTime) -> Self {
        Self {
            occurred_at: occurred_at
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_else(|_| now_utc_rfc3339()),
            kind,
        }
    }
}

#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<Sender<CollectionEvent>>>,
}

impl EventBus {
    pub fn subscribe(&self) -> Receiver<CollectionEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    pub fn emit(&self, kind: CollectionEventKind) {
        let event = CollectionEvent::new(kind);
        tracing::debug!(event = ?event.kind, "collection event");
        self.subscribers
            .write()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}
