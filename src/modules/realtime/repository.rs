use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::{
    api::error,
    modules::{
        realtime::events::{ChangeEvent, ChangeOp},
        store::model::Filter,
    },
};

/// An active registration on a change feed. Dropping it removes the
/// registration, so a cancelled subscriber stops receiving events as soon
/// as its pump task goes away.
pub struct FeedSubscription {
    events: mpsc::UnboundedReceiver<ChangeEvent>,
    on_drop: Option<Box<dyn FnOnce() + Send>>,
}

impl FeedSubscription {
    pub fn new(
        events: mpsc::UnboundedReceiver<ChangeEvent>,
        on_drop: Box<dyn FnOnce() + Send>,
    ) -> Self {
        FeedSubscription { events, on_drop: Some(on_drop) }
    }

    pub async fn next_event(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        if let Some(unregister) = self.on_drop.take() {
            unregister();
        }
    }
}

/// Change-notification boundary of the hosted backend, keyed by table name
/// and an optional row filter.
///
/// Delete events carry no row document, so a filtered subscription still
/// receives every delete on its table; subscribers re-query anyway.
#[async_trait::async_trait]
pub trait ChangeFeed {
    async fn subscribe(
        &self,
        table: &str,
        filter: Option<Filter>,
    ) -> Result<FeedSubscription, error::SystemError>;
}

/// Subscriber registry shared by feed implementations: tracks who listens
/// to which table/filter and fans each event out to the matching channels.
pub struct FeedRegistry {
    entries: Mutex<HashMap<u64, FeedEntry>>,
    next_id: AtomicU64,
}

struct FeedEntry {
    table: String,
    filter: Option<Filter>,
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

impl FeedRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(FeedRegistry { entries: Mutex::new(HashMap::new()), next_id: AtomicU64::new(1) })
    }

    pub fn register(self: Arc<Self>, table: &str, filter: Option<Filter>) -> FeedSubscription {
        let id = self.next_id.fetch_add(1, AtomicOrdering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, FeedEntry { table: table.to_string(), filter, tx });

        FeedSubscription::new(
            rx,
            Box::new(move || {
                self.entries.lock().unwrap_or_else(|e| e.into_inner()).remove(&id);
                tracing::debug!("Feed subscriber {id} unregistered");
            }),
        )
    }

    /// Deliver an event to every matching subscriber; subscribers whose
    /// receiving side is gone are dropped from the registry.
    pub fn dispatch(&self, event: &ChangeEvent) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain(|_, entry| {
            if entry.table != event.table {
                return true;
            }
            let relevant = match (&entry.filter, &event.doc) {
                (None, _) => true,
                (Some(filter), Some(doc)) => filter.matches(doc),
                // no document to evaluate the filter against
                (Some(_), None) => event.op == ChangeOp::Delete,
            };
            if !relevant {
                return true;
            }
            entry.tx.send(event.clone()).is_ok()
        });
    }
}
