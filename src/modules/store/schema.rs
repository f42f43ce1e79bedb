use crate::modules::store::model::Document;

/// Result of a single-document read at a point in time.
#[derive(Debug, Clone)]
pub struct DocumentSnapshot {
    id: String,
    doc: Option<Document>,
}

impl DocumentSnapshot {
    pub fn new(id: impl Into<String>, doc: Document) -> Self {
        DocumentSnapshot { id: id.into(), doc: Some(doc) }
    }

    pub fn missing(id: impl Into<String>) -> Self {
        DocumentSnapshot { id: id.into(), doc: None }
    }

    pub fn exists(&self) -> bool {
        self.doc.is_some()
    }

    pub fn data(&self) -> Option<&Document> {
        self.doc.as_ref()
    }

    pub fn into_data(self) -> Option<Document> {
        self.doc
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
}

/// Best-effort classification of the single event that triggered a
/// refreshed query snapshot. Reflects only the triggering event, not a
/// reconciled diff against the previous snapshot.
#[derive(Debug, Clone)]
pub struct DocChange {
    pub kind: ChangeKind,
    pub id: String,
    pub doc: Document,
}

/// A delivered result set at a point in time.
#[derive(Debug, Clone)]
pub struct QuerySnapshot {
    pub docs: Vec<DocumentSnapshot>,
    pub change: Option<DocChange>,
}

impl QuerySnapshot {
    pub fn new(docs: Vec<DocumentSnapshot>) -> Self {
        QuerySnapshot { docs, change: None }
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DocumentSnapshot> {
        self.docs.iter()
    }
}
