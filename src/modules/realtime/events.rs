use serde::Deserialize;

use crate::modules::store::model::Document;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// One change notification from the backend's feed.
///
/// Mirrors the `doc_changes` NOTIFY payload: delete events carry no
/// document, only the row id.
#[derive(Debug, Clone, Deserialize)]
pub struct ChangeEvent {
    pub table: String,
    pub op: ChangeOp,
    pub id: String,
    #[serde(default)]
    pub doc: Option<Document>,
}
