//! The published view of what the game server is doing right now.
//!
//! The poller is the only writer. Any number of readers hold a
//! [`StatusReader`] and always see a whole snapshot, old or new.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::sync::Arc;
use tokio::sync::watch;

/// Current race on the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerStatus {
    pub current_map: String,
    pub next_map: String,
    /// Seconds left in the time-attack round, never negative
    pub time_remaining: u64,
    /// Round length in seconds
    pub time_limit: u64,
}

/// Either a fully populated [`ServerStatus`] or unknown
///
/// Serializes as the status object, or as `{}` when unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSnapshot(Option<ServerStatus>);

impl StatusSnapshot {
    pub fn empty() -> Self {
        Self(None)
    }

    pub fn live(status: ServerStatus) -> Self {
        Self(Some(status))
    }

    pub fn status(&self) -> Option<&ServerStatus> {
        self.0.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }
}

impl Serialize for StatusSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.0 {
            Some(status) => status.serialize(serializer),
            None => serializer.serialize_map(Some(0))?.end(),
        }
    }
}

/// Creates the status slot, starting out empty
pub fn status_channel() -> (StatusPublisher, StatusReader) {
    let (tx, rx) = watch::channel(Arc::new(StatusSnapshot::empty()));
    (StatusPublisher { tx }, StatusReader { rx })
}

/// Write side of the status slot
pub struct StatusPublisher {
    tx: watch::Sender<Arc<StatusSnapshot>>,
}

impl StatusPublisher {
    /// Replaces the snapshot; readers are only woken when it differs
    pub fn publish(&self, snapshot: StatusSnapshot) {
        self.tx.send_if_modified(|current| {
            if **current == snapshot {
                return false;
            }
            *current = Arc::new(snapshot);
            true
        });
    }

    pub fn current(&self) -> Arc<StatusSnapshot> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> StatusReader {
        StatusReader { rx: self.tx.subscribe() }
    }
}

/// Read side of the status slot
#[derive(Clone)]
pub struct StatusReader {
    rx: watch::Receiver<Arc<StatusSnapshot>>,
}

impl StatusReader {
    pub fn current(&self) -> Arc<StatusSnapshot> {
        self.rx.borrow().clone()
    }

    /// Waits for the next published change; `false` once the publisher is gone
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}
