use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::api::error;

/// A row as the adapter sees it: a flat JSON object keyed by column name.
pub type Document = serde_json::Map<String, Value>;

/// Timestamp value stored inside documents (RFC 3339, UTC).
pub fn server_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub fn to_document<T: Serialize>(value: &T) -> Result<Document, error::SystemError> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(error::SystemError::bad_request(format!(
            "Expected a JSON object, got {other}"
        ))),
    }
}

pub fn from_document<T: DeserializeOwned>(doc: Document) -> Result<T, error::SystemError> {
    Ok(serde_json::from_value(Value::Object(doc))?)
}

/// Row filter understood by the table store boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `field = value`
    Eq { field: String, value: Value },
    /// array-valued `field` contains `value`
    Contains { field: String, value: Value },
    /// `field` is one of `values`
    AnyOf { field: String, values: Vec<Value> },
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq { field: field.into(), value: value.into() }
    }

    pub fn contains(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Contains { field: field.into(), value: value.into() }
    }

    pub fn any_of(field: impl Into<String>, values: Vec<Value>) -> Self {
        Filter::AnyOf { field: field.into(), values }
    }

    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::Eq { field, value } => doc.get(field) == Some(value),
            Filter::Contains { field, value } => doc
                .get(field)
                .and_then(Value::as_array)
                .is_some_and(|arr| arr.contains(value)),
            Filter::AnyOf { field, values } => {
                doc.get(field).is_some_and(|v| values.contains(v))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ordering {
    pub field: String,
    pub descending: bool,
}

/// One element of a query's constraint list.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    Where(Filter),
    OrderBy(Ordering),
    Limit(usize),
}

/// Build a filter constraint from a document-API operator string.
///
/// Only `==` and `array-contains` are faithfully supported; every other
/// operator collapses to equality, which mirrors the legacy adapter this
/// layer replaces.
pub fn where_filter(field: &str, op: &str, value: impl Into<Value>) -> Constraint {
    match op {
        "array-contains" => Constraint::Where(Filter::contains(field, value)),
        "==" => Constraint::Where(Filter::eq(field, value)),
        other => {
            log::warn!("Unsupported query operator '{other}' on '{field}', treating as equality");
            Constraint::Where(Filter::eq(field, value))
        }
    }
}

pub fn order_by(field: &str, dir: &str) -> Constraint {
    Constraint::OrderBy(Ordering { field: field.to_string(), descending: dir == "desc" })
}

pub fn limit(count: usize) -> Constraint {
    Constraint::Limit(count)
}

/// Foreign-key scope carried by a nested collection so queries auto-filter
/// to the parent row.
#[derive(Debug, Clone, PartialEq)]
pub struct ParentScope {
    pub fk_column: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionRef {
    pub table: String,
    pub parent: Option<ParentScope>,
}

impl CollectionRef {
    pub fn new(table: impl Into<String>) -> Self {
        CollectionRef { table: table.into(), parent: None }
    }

    /// Two-level nested collection, e.g. `chats/{id}/messages`.
    ///
    /// Only the chat→messages nesting is a known mapping; anything else
    /// falls back to the leaf table without a parent scope.
    pub fn nested(root: &str, parent_id: &str, sub: &str) -> Self {
        if root == "chats" && sub == "messages" {
            return CollectionRef {
                table: "messages".to_string(),
                parent: Some(ParentScope {
                    fk_column: "chat_id".to_string(),
                    id: parent_id.to_string(),
                }),
            };
        }
        log::warn!("Unknown nested collection {root}/{{id}}/{sub}, using '{sub}' unscoped");
        CollectionRef::new(sub)
    }

    pub fn doc(&self, id: impl Into<String>) -> DocumentRef {
        DocumentRef { table: self.table.clone(), id: id.into() }
    }

    pub fn query(&self, constraints: Vec<Constraint>) -> QueryRef {
        QueryRef { collection: self.clone(), constraints }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRef {
    pub table: String,
    pub id: String,
}

impl DocumentRef {
    pub fn new(table: impl Into<String>, id: impl Into<String>) -> Self {
        DocumentRef { table: table.into(), id: id.into() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryRef {
    pub collection: CollectionRef,
    pub constraints: Vec<Constraint>,
}

/// Flattened form of a query: filters in application order, then the
/// effective ordering and row limit (the last of each wins).
#[derive(Debug, Clone, Default)]
pub struct QueryPlan {
    pub filters: Vec<Filter>,
    pub order: Option<Ordering>,
    pub limit: Option<usize>,
}

impl QueryRef {
    pub fn plan(&self) -> QueryPlan {
        let mut plan = QueryPlan::default();
        if let Some(parent) = &self.collection.parent {
            plan.filters.push(Filter::eq(parent.fk_column.clone(), parent.id.clone()));
        }
        for constraint in &self.constraints {
            match constraint {
                Constraint::Where(filter) => plan.filters.push(filter.clone()),
                Constraint::OrderBy(order) => plan.order = Some(order.clone()),
                Constraint::Limit(count) => plan.limit = Some(*count),
            }
        }
        plan
    }
}

/// Explicit update operation for one field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    Set(Value),
    ArrayUnion(Vec<Value>),
    ArrayRemove(Vec<Value>),
}

pub fn array_union(values: Vec<Value>) -> FieldUpdate {
    FieldUpdate::ArrayUnion(values)
}

pub fn array_remove(values: Vec<Value>) -> FieldUpdate {
    FieldUpdate::ArrayRemove(values)
}
