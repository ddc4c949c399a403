use crate::core::model::{FetchId, FetchKind, FetchStatus};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Where a fetcher reports progress. Detached sinks drop everything.
#[derive(Debug, Clone)]
pub struct EventSink {
    fetch_id: FetchId,
    tx: Option<broadcast::Sender<FetchEvent>>,
}

impl EventSink {
    pub fn new(fetch_id: FetchId, tx: broadcast::Sender<FetchEvent>) -> Self {
        Self { fetch_id, tx: Some(tx) }
    }

    pub fn detached() -> Self {
        Self { fetch_id: Uuid::nil(), tx: None }
    }

    pub fn fetch_id(&self) -> FetchId {
        self.fetch_id
    }

    pub fn emit(&self, make: impl FnOnce(FetchId) -> FetchEvent) {
        if let Some(tx) = &self.tx {
            // no subscribers is fine
            let _ = tx.send(make(self.fetch_id));
        }
    }
}

#[derive(Debug, Clone)]
pub enum FetchEvent {
    FetchStarted { fetch_id: FetchId, kind: FetchKind, name: String },
    StatusChanged { fetch_id: FetchId, status: FetchStatus },
    RequestIssued { fetch_id: FetchId, name: String },
    SegmentReceived { fetch_id: FetchId, index: u64, total: u64, bytes: u64 },
    PageReceived { fetch_id: FetchId, hop: u32, items: usize, more: Option<u64> },
    Error { scope: String, message: String },
    Info { scope: String, message: String },
}

impl FetchEvent {
    pub fn fetch_id(&self) -> Option<FetchId> {
        match self {
            FetchEvent::FetchStarted { fetch_id, .. }
            | FetchEvent::StatusChanged { fetch_id, .. }
            | FetchEvent::RequestIssued { fetch_id, .. }
            | FetchEvent::SegmentReceived { fetch_id, .. }
            | FetchEvent::PageReceived { fetch_id, .. } => Some(*fetch_id),
            FetchEvent::Error { .. } | FetchEvent::Info { .. } => None,
        }
    }
}
