use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use crate::{
    api::error,
    modules::{
        realtime::{
            events::{ChangeEvent, ChangeOp},
            repository::ChangeFeed,
        },
        store::{
            model::{CollectionRef, Constraint, DocumentRef, Filter, QueryRef},
            repository::TableStore,
            schema::{ChangeKind, DocChange, DocumentSnapshot, QuerySnapshot},
            service::DocStore,
        },
    },
    utils::with_backoff,
};

pub type DocCallback = Arc<dyn Fn(DocumentSnapshot) + Send + Sync>;
pub type QueryCallback = Arc<dyn Fn(QuerySnapshot) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(error::SystemError) + Send + Sync>;

/// Handle to an active watch. `dispose` flips the still-subscribed flag and
/// aborts the pump task, so no callback runs after it returns; an in-flight
/// refetch is discarded rather than delivered.
pub struct Subscription {
    alive: Arc<AtomicBool>,
    handle: tokio::task::JoinHandle<()>,
}

impl Subscription {
    pub(crate) fn new(alive: Arc<AtomicBool>, handle: tokio::task::JoinHandle<()>) -> Self {
        Subscription { alive, handle }
    }

    pub fn dispose(&self) {
        self.alive.store(false, AtomicOrdering::SeqCst);
        self.handle.abort();
    }

    pub fn is_active(&self) -> bool {
        self.alive.load(AtomicOrdering::SeqCst)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn classify(event: &ChangeEvent) -> Option<DocChange> {
    let doc = event.doc.clone()?;
    let kind = match event.op {
        ChangeOp::Insert => ChangeKind::Added,
        ChangeOp::Update => ChangeKind::Modified,
        ChangeOp::Delete => return None,
    };
    Some(DocChange { kind, id: event.id.clone(), doc })
}

fn report(on_error: &Option<ErrorCallback>, err: error::SystemError) {
    match on_error {
        Some(cb) => cb(err),
        None => tracing::error!("Unhandled watch error: {err}"),
    }
}

/// Bridges the change feed back onto full snapshots: every relevant event
/// re-runs the equivalent read and delivers a complete, fresh result.
///
/// The initial snapshot always precedes change-triggered ones. Deliveries
/// triggered by racing refetches are not ordered against each other; each
/// snapshot is authoritative at delivery time, nothing more.
pub struct SnapshotBridge<S, F>
where
    S: TableStore + Send + Sync + 'static,
    F: ChangeFeed + Send + Sync,
{
    docs: DocStore<S>,
    feed: Arc<F>,
}

impl<S, F> SnapshotBridge<S, F>
where
    S: TableStore + Send + Sync + 'static,
    F: ChangeFeed + Send + Sync,
{
    pub fn with_dependencies(store: Arc<S>, feed: Arc<F>) -> Self {
        SnapshotBridge { docs: DocStore::with_dependencies(store), feed }
    }

    /// Watch a single row: each change to it re-fetches and re-delivers it
    /// in the same shape as a one-shot read.
    pub async fn watch_document(
        &self,
        doc_ref: &DocumentRef,
        on_update: DocCallback,
        _on_error: Option<ErrorCallback>,
    ) -> Result<Subscription, error::SystemError> {
        let mut feed_sub = self
            .feed
            .subscribe(&doc_ref.table, Some(Filter::eq("id", doc_ref.id.clone())))
            .await?;

        // initial snapshot first; events raised meanwhile queue behind it
        let initial = self.docs.get_doc(doc_ref).await;
        on_update(initial);

        let alive = Arc::new(AtomicBool::new(true));
        let task_alive = Arc::clone(&alive);
        let docs = self.docs.clone();
        let doc_ref = doc_ref.clone();

        let handle = tokio::spawn(async move {
            while let Some(event) = feed_sub.next_event().await {
                if !task_alive.load(AtomicOrdering::SeqCst) {
                    break;
                }
                tracing::debug!("Document {}/{} changed ({:?})", doc_ref.table, doc_ref.id, event.op);
                let snapshot = docs.get_doc(&doc_ref).await;
                if !task_alive.load(AtomicOrdering::SeqCst) {
                    break;
                }
                on_update(snapshot);
            }
        });

        Ok(Subscription::new(alive, handle))
    }

    /// Watch a query: any insert/update/delete on the table (pre-filtered
    /// by the parent scope when the query has one) re-runs the whole query.
    /// The triggering event rides along as a best-effort `DocChange`.
    pub async fn watch_query(
        &self,
        query: &QueryRef,
        on_update: QueryCallback,
        on_error: Option<ErrorCallback>,
    ) -> Result<Subscription, error::SystemError> {
        let transport_filter = query
            .collection
            .parent
            .as_ref()
            .map(|p| Filter::eq(p.fk_column.clone(), p.id.clone()));
        let mut feed_sub =
            self.feed.subscribe(&query.collection.table, transport_filter).await?;

        match self.docs.get_docs(query).await {
            Ok(snapshot) => on_update(snapshot),
            Err(err) => report(&on_error, err),
        }

        let alive = Arc::new(AtomicBool::new(true));
        let task_alive = Arc::clone(&alive);
        let docs = self.docs.clone();
        let query = query.clone();

        let handle = tokio::spawn(async move {
            while let Some(event) = feed_sub.next_event().await {
                if !task_alive.load(AtomicOrdering::SeqCst) {
                    break;
                }
                let refetched =
                    with_backoff("watch_query refetch", 3, || docs.get_docs(&query)).await;
                if !task_alive.load(AtomicOrdering::SeqCst) {
                    break;
                }
                match refetched {
                    Ok(mut snapshot) => {
                        snapshot.change = classify(&event);
                        on_update(snapshot);
                    }
                    Err(err) => report(&on_error, err),
                }
            }
        });

        Ok(Subscription::new(alive, handle))
    }

    /// Watch a whole table, optionally narrowed by match filters.
    pub async fn watch_collection(
        &self,
        table: &str,
        filters: Vec<Filter>,
        on_update: QueryCallback,
        on_error: Option<ErrorCallback>,
    ) -> Result<Subscription, error::SystemError> {
        let query = CollectionRef::new(table)
            .query(filters.into_iter().map(Constraint::Where).collect());
        self.watch_query(&query, on_update, on_error).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::store::{model::order_by, repository_mem::MemoryStore};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn object(value: serde_json::Value) -> crate::modules::store::model::Document {
        value.as_object().cloned().unwrap_or_default()
    }

    fn bridge(store: &Arc<MemoryStore>) -> SnapshotBridge<MemoryStore, MemoryStore> {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        SnapshotBridge::with_dependencies(Arc::clone(store), Arc::clone(store))
    }

    #[tokio::test]
    async fn query_watch_delivers_initial_then_refreshed_snapshots() {
        let store = Arc::new(MemoryStore::new());
        let docs = DocStore::with_dependencies(Arc::clone(&store));
        let messages = CollectionRef::nested("chats", "c1", "messages");
        docs.add_doc(&messages, object(json!({"sender": "a", "timestamp": "t1"})))
            .await
            .unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let on_update: QueryCallback = Arc::new(move |snapshot| {
            tx.send(snapshot).ok();
        });

        let sub = bridge(&store)
            .watch_query(&messages.query(vec![order_by("timestamp", "asc")]), on_update, None)
            .await
            .unwrap();

        let initial = rx.recv().await.unwrap();
        assert_eq!(initial.len(), 1);
        assert!(initial.change.is_none());

        docs.add_doc(&messages, object(json!({"sender": "b", "timestamp": "t2"})))
            .await
            .unwrap();

        let refreshed = rx.recv().await.unwrap();
        assert_eq!(refreshed.len(), 2);
        let change = refreshed.change.unwrap();
        assert_eq!(change.kind, ChangeKind::Added);

        sub.dispose();
    }

    #[tokio::test]
    async fn disposed_watch_never_delivers_a_pending_refetch() {
        let store = Arc::new(MemoryStore::new());
        let docs = DocStore::with_dependencies(Arc::clone(&store));
        let messages = CollectionRef::nested("chats", "c1", "messages");

        let deliveries = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&deliveries);
        let on_update: QueryCallback = Arc::new(move |_| {
            counter.fetch_add(1, AtomicOrdering::SeqCst);
        });

        let sub = bridge(&store)
            .watch_query(&messages.query(vec![]), on_update, None)
            .await
            .unwrap();
        assert_eq!(deliveries.load(AtomicOrdering::SeqCst), 1);

        // the next refetch stalls long enough for us to cancel mid-flight
        store.set_read_delay(Some(Duration::from_millis(200)));
        docs.add_doc(&messages, object(json!({"sender": "b", "timestamp": "t"})))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        sub.dispose();
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(deliveries.load(AtomicOrdering::SeqCst), 1);
        assert!(!sub.is_active());
    }

    #[tokio::test]
    async fn document_watch_tracks_a_single_row() {
        let store = Arc::new(MemoryStore::new());
        let docs = DocStore::with_dependencies(Arc::clone(&store));
        let user = DocumentRef::new("users", "u1");
        docs.set_doc(&user, object(json!({"name": "Ann"})), false).await.unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let on_update: DocCallback = Arc::new(move |snapshot| {
            tx.send(snapshot).ok();
        });

        let _sub = bridge(&store).watch_document(&user, on_update, None).await.unwrap();

        let initial = rx.recv().await.unwrap();
        assert_eq!(initial.data().unwrap().get("name"), Some(&json!("Ann")));

        docs.set_doc(&user, object(json!({"name": "Anna"})), false).await.unwrap();
        let refreshed = rx.recv().await.unwrap();
        assert_eq!(refreshed.data().unwrap().get("name"), Some(&json!("Anna")));

        // an unrelated row must not trigger a delivery
        docs.set_doc(&DocumentRef::new("users", "u2"), object(json!({"name": "Bob"})), false)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }
}
