use std::sync::Arc;

use serde_json::Value;

use crate::{
    api::error,
    modules::store::{
        model::{CollectionRef, Document, DocumentRef, FieldUpdate, QueryRef},
        repository::TableStore,
        schema::{DocumentSnapshot, QuerySnapshot},
    },
};

/// Document-style facade over the relational table store.
///
/// Error policy is asymmetric on purpose: writes fail fast, while the
/// single-document read swallows backend errors into a "does not exist"
/// snapshot. Callers must check `exists()`.
pub struct DocStore<S>
where
    S: TableStore + Send + Sync,
{
    store: Arc<S>,
}

impl<S> Clone for DocStore<S>
where
    S: TableStore + Send + Sync,
{
    fn clone(&self) -> Self {
        DocStore { store: Arc::clone(&self.store) }
    }
}

impl<S> DocStore<S>
where
    S: TableStore + Send + Sync,
{
    pub fn with_dependencies(store: Arc<S>) -> Self {
        DocStore { store }
    }

    /// Raw access to the table boundary for callers that bypass the
    /// document surface (chat creation needs insert-or-conflict).
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub async fn get_doc(&self, doc_ref: &DocumentRef) -> DocumentSnapshot {
        match self.store.fetch_by_id(&doc_ref.table, &doc_ref.id).await {
            Ok(Some(doc)) => DocumentSnapshot::new(doc_ref.id.clone(), doc),
            Ok(None) => DocumentSnapshot::missing(doc_ref.id.clone()),
            Err(err) => {
                log::error!("get_doc {}/{} failed: {err}", doc_ref.table, doc_ref.id);
                DocumentSnapshot::missing(doc_ref.id.clone())
            }
        }
    }

    pub async fn get_docs(&self, query: &QueryRef) -> Result<QuerySnapshot, error::SystemError> {
        let plan = query.plan();
        let docs = self
            .store
            .fetch_matching(&query.collection.table, &plan.filters, plan.order.as_ref(), plan.limit)
            .await?;

        let snapshots = docs
            .into_iter()
            .map(|doc| {
                let id = doc.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
                DocumentSnapshot::new(id, doc)
            })
            .collect();
        Ok(QuerySnapshot::new(snapshots))
    }

    /// Upsert by id. With `merge` the given fields are folded into the
    /// existing document; without it the document is replaced whole.
    pub async fn set_doc(
        &self,
        doc_ref: &DocumentRef,
        data: Document,
        merge: bool,
    ) -> Result<(), error::SystemError> {
        if !merge {
            return self.store.upsert(&doc_ref.table, &doc_ref.id, data).await;
        }

        let mut merged = self
            .store
            .fetch_by_id(&doc_ref.table, &doc_ref.id)
            .await?
            .unwrap_or_default();
        for (key, value) in data {
            merged.insert(key, value);
        }
        self.store.upsert(&doc_ref.table, &doc_ref.id, merged).await
    }

    /// Partial update by id.
    ///
    /// Array union/remove are a read-modify-write: the read and the write
    /// are separate round trips, so concurrent updates to the same array
    /// field can lose one side's change. Known consistency gap of this
    /// adapter, carried over from the system it replaces.
    pub async fn update_doc(
        &self,
        doc_ref: &DocumentRef,
        updates: Vec<(String, FieldUpdate)>,
    ) -> Result<(), error::SystemError> {
        if updates.is_empty() {
            return Err(error::SystemError::bad_request("No fields to update"));
        }

        let needs_current = updates
            .iter()
            .any(|(_, u)| matches!(u, FieldUpdate::ArrayUnion(_) | FieldUpdate::ArrayRemove(_)));
        let current = if needs_current {
            self.store.fetch_by_id(&doc_ref.table, &doc_ref.id).await?.unwrap_or_default()
        } else {
            Document::new()
        };

        let mut fields = Document::new();
        for (field, update) in updates {
            let value = match update {
                FieldUpdate::Set(value) => value,
                FieldUpdate::ArrayUnion(elements) => {
                    let mut merged = current
                        .get(&field)
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_default();
                    for element in elements {
                        if !merged.contains(&element) {
                            merged.push(element);
                        }
                    }
                    Value::Array(merged)
                }
                FieldUpdate::ArrayRemove(elements) => {
                    let kept = current
                        .get(&field)
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_default()
                        .into_iter()
                        .filter(|item| !elements.contains(item))
                        .collect();
                    Value::Array(kept)
                }
            };
            fields.insert(field, value);
        }

        self.store.update_fields(&doc_ref.table, &doc_ref.id, fields).await
    }

    /// Insert with a generated id; a parent-scoped collection attaches its
    /// foreign key before the write.
    pub async fn add_doc(
        &self,
        collection: &CollectionRef,
        mut data: Document,
    ) -> Result<String, error::SystemError> {
        if let Some(parent) = &collection.parent {
            data.insert(parent.fk_column.clone(), Value::String(parent.id.clone()));
        }
        self.store.insert(&collection.table, data).await
    }

    pub async fn delete_doc(&self, doc_ref: &DocumentRef) -> Result<(), error::SystemError> {
        self.store.delete_by_id(&doc_ref.table, &doc_ref.id).await
    }
}
