use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use uuid::Uuid;

use crate::{
    api::error::{self, DbErrorMeta},
    modules::{
        realtime::{
            events::{ChangeEvent, ChangeOp},
            repository::{ChangeFeed, FeedRegistry, FeedSubscription},
        },
        store::{
            model::{Document, Filter, Ordering},
            repository::TableStore,
        },
    },
};

fn lock<'a, T>(mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// In-memory backend double: a `TableStore` and `ChangeFeed` in one, used
/// by unit tests (and usable by downstream test suites). Tracks per-table
/// query counts and offers a read delay and a one-shot read failure for
/// exercising cancellation and fail-soft paths.
pub struct MemoryStore {
    tables: Mutex<HashMap<String, BTreeMap<String, Document>>>,
    feed: Arc<FeedRegistry>,
    query_counts: Mutex<HashMap<String, usize>>,
    read_delay: Mutex<Option<Duration>>,
    fail_next_read: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            tables: Mutex::new(HashMap::new()),
            feed: FeedRegistry::new(),
            query_counts: Mutex::new(HashMap::new()),
            read_delay: Mutex::new(None),
            fail_next_read: AtomicBool::new(false),
        }
    }

    /// Number of `fetch_matching` calls made against a table.
    pub fn query_count(&self, table: &str) -> usize {
        lock(&self.query_counts).get(table).copied().unwrap_or(0)
    }

    /// Delay every read, so a test can cancel a subscription while its
    /// refetch is still in flight.
    pub fn set_read_delay(&self, delay: Option<Duration>) {
        *lock(&self.read_delay) = delay;
    }

    /// Make the next read fail with a backend error.
    pub fn fail_next_read(&self) {
        self.fail_next_read.store(true, AtomicOrdering::SeqCst);
    }

    async fn before_read(&self) -> Result<(), error::SystemError> {
        let delay = *lock(&self.read_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_next_read.swap(false, AtomicOrdering::SeqCst) {
            return Err(error::SystemError::database("injected read failure"));
        }
        Ok(())
    }

    fn emit(&self, table: &str, op: ChangeOp, id: &str, doc: Option<Document>) {
        self.feed.dispatch(&ChangeEvent {
            table: table.to_string(),
            op,
            id: id.to_string(),
            doc,
        });
    }

    fn sort_key(doc: &Document, field: &str) -> String {
        match doc.get(field) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl TableStore for MemoryStore {
    async fn fetch_by_id(
        &self,
        table: &str,
        id: &str,
    ) -> Result<Option<Document>, error::SystemError> {
        self.before_read().await?;
        Ok(lock(&self.tables).get(table).and_then(|rows| rows.get(id)).cloned())
    }

    async fn fetch_matching(
        &self,
        table: &str,
        filters: &[Filter],
        order: Option<&Ordering>,
        limit: Option<usize>,
    ) -> Result<Vec<Document>, error::SystemError> {
        *lock(&self.query_counts).entry(table.to_string()).or_insert(0) += 1;
        self.before_read().await?;

        let mut docs: Vec<Document> = lock(&self.tables)
            .get(table)
            .map(|rows| {
                rows.values()
                    .filter(|doc| filters.iter().all(|f| f.matches(doc)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(order) = order {
            docs.sort_by_key(|doc| Self::sort_key(doc, &order.field));
            if order.descending {
                docs.reverse();
            }
        }
        if let Some(limit) = limit {
            docs.truncate(limit);
        }
        Ok(docs)
    }

    async fn insert(&self, table: &str, mut doc: Document) -> Result<String, error::SystemError> {
        let id = doc
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::now_v7().to_string());
        doc.insert("id".to_string(), Value::String(id.clone()));

        {
            let mut tables = lock(&self.tables);
            let rows = tables.entry(table.to_string()).or_default();
            if rows.contains_key(&id) {
                return Err(error::SystemError::Conflict(Some(DbErrorMeta {
                    code: Some("23505".to_string()),
                    constraint: Some(format!("{table}_pkey")),
                    message: format!("duplicate key value in {table}"),
                })));
            }
            rows.insert(id.clone(), doc.clone());
        }
        self.emit(table, ChangeOp::Insert, &id, Some(doc));
        Ok(id)
    }

    async fn upsert(
        &self,
        table: &str,
        id: &str,
        mut doc: Document,
    ) -> Result<(), error::SystemError> {
        doc.insert("id".to_string(), Value::String(id.to_string()));
        let existed = {
            let mut tables = lock(&self.tables);
            let rows = tables.entry(table.to_string()).or_default();
            rows.insert(id.to_string(), doc.clone()).is_some()
        };
        let op = if existed { ChangeOp::Update } else { ChangeOp::Insert };
        self.emit(table, op, id, Some(doc));
        Ok(())
    }

    async fn update_fields(
        &self,
        table: &str,
        id: &str,
        fields: Document,
    ) -> Result<(), error::SystemError> {
        let updated = {
            let mut tables = lock(&self.tables);
            match tables.get_mut(table).and_then(|rows| rows.get_mut(id)) {
                Some(doc) => {
                    for (key, value) in fields {
                        doc.insert(key, value);
                    }
                    Some(doc.clone())
                }
                None => None,
            }
        };
        if let Some(doc) = updated {
            self.emit(table, ChangeOp::Update, id, Some(doc));
        }
        Ok(())
    }

    async fn delete_by_id(&self, table: &str, id: &str) -> Result<(), error::SystemError> {
        let removed = {
            let mut tables = lock(&self.tables);
            tables.get_mut(table).and_then(|rows| rows.remove(id)).is_some()
        };
        if removed {
            self.emit(table, ChangeOp::Delete, id, None);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ChangeFeed for MemoryStore {
    async fn subscribe(
        &self,
        table: &str,
        filter: Option<Filter>,
    ) -> Result<FeedSubscription, error::SystemError> {
        Ok(Arc::clone(&self.feed).register(table, filter))
    }
}
