use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};

/// A file-system change, as delivered by the watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Deleted(PathBuf),
    Moved { from: PathBuf, to: PathBuf },
}

/// Notification that the searchable corpus changed
#[derive(Debug, Clone, PartialEq)]
pub enum IndexEvent {
    FileIndexed { path: String, chunks: usize },
    FileRemoved { path: String },
    Reconciled,
    RescanCompleted,
    IndexRebuilt,
}

/// Notifications buffered per subscriber before new ones are dropped
pub const SUBSCRIBER_CAPACITY: usize = 1024;

/// Fan-out of index notifications to any number of subscribers
#[derive(Clone, Default)]
pub struct Notifier {
    subscribers: Arc<Mutex<Vec<SyncSender<IndexEvent>>>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A subscriber that stops draining its receiver misses notifications
    /// once [`SUBSCRIBER_CAPACITY`] are pending
    pub fn subscribe(&self) -> Receiver<IndexEvent> {
        let (tx, rx) = mpsc::sync_channel(SUBSCRIBER_CAPACITY);
        match self.subscribers.lock() {
            Ok(mut subscribers) => subscribers.push(tx),
            Err(e) => tracing::error!("Notifier lock poisoned: {}", e),
        }
        rx
    }

    /// Deliver an event; subscribers whose receiver was dropped are pruned
    pub fn notify(&self, event: IndexEvent) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.retain(|tx| match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    tracing::debug!("Subscriber is lagging, dropped {:?}", event);
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            });
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}
