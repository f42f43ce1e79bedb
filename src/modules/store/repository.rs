use crate::{
    api::error,
    modules::store::model::{Document, Filter, Ordering},
};

/// Table-level CRUD boundary of the hosted backend.
///
/// Rows are JSON documents keyed by a textual `id`. Filters are limited to
/// what the backend's row-level filtering supports: equality, array
/// containment, membership, ordering and a row limit.
#[async_trait::async_trait]
pub trait TableStore {
    async fn fetch_by_id(
        &self,
        table: &str,
        id: &str,
    ) -> Result<Option<Document>, error::SystemError>;

    async fn fetch_matching(
        &self,
        table: &str,
        filters: &[Filter],
        order: Option<&Ordering>,
        limit: Option<usize>,
    ) -> Result<Vec<Document>, error::SystemError>;

    /// Insert a row; the id is taken from `doc["id"]` or generated.
    /// Inserting an existing id is a `Conflict`.
    async fn insert(&self, table: &str, doc: Document) -> Result<String, error::SystemError>;

    /// Insert or fully replace the row with the given id.
    async fn upsert(&self, table: &str, id: &str, doc: Document)
        -> Result<(), error::SystemError>;

    /// Merge the given top-level fields into an existing row. A missing row
    /// is a silent no-op, matching the backend's update semantics.
    async fn update_fields(
        &self,
        table: &str,
        id: &str,
        fields: Document,
    ) -> Result<(), error::SystemError>;

    async fn delete_by_id(&self, table: &str, id: &str) -> Result<(), error::SystemError>;
}
