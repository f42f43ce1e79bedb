use serde_json::Value;
use uuid::Uuid;

use crate::{
    api::error,
    modules::store::{
        model::{Document, Filter, Ordering},
        repository::TableStore,
    },
};

/// Tables the adapter may touch. Names are interpolated into SQL, so
/// anything outside this list is rejected up front.
const TABLES: &[&str] = &["users", "posts", "chats", "messages"];

fn checked_table(table: &str) -> Result<&str, error::SystemError> {
    if TABLES.contains(&table) {
        Ok(table)
    } else {
        Err(error::SystemError::bad_request(format!("Unknown table '{table}'")))
    }
}

fn checked_field(field: &str) -> Result<&str, error::SystemError> {
    if !field.is_empty() && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(field)
    } else {
        Err(error::SystemError::bad_request(format!("Invalid field name '{field}'")))
    }
}

fn with_id(mut doc: Document, id: &str) -> Document {
    doc.insert("id".to_string(), Value::String(id.to_string()));
    doc
}

#[derive(Clone)]
pub struct PgTableStore {
    pool: sqlx::PgPool,
}

impl PgTableStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TableStore for PgTableStore {
    async fn fetch_by_id(
        &self,
        table: &str,
        id: &str,
    ) -> Result<Option<Document>, error::SystemError> {
        let table = checked_table(table)?;
        let row: Option<Value> =
            sqlx::query_scalar(&format!("SELECT doc FROM {table} WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some(Value::Object(doc)) => Ok(Some(doc)),
            Some(_) => Err(error::SystemError::database("Row document is not an object")),
            None => Ok(None),
        }
    }

    async fn fetch_matching(
        &self,
        table: &str,
        filters: &[Filter],
        order: Option<&Ordering>,
        limit: Option<usize>,
    ) -> Result<Vec<Document>, error::SystemError> {
        let table = checked_table(table)?;

        let mut sql = format!("SELECT doc FROM {table}");
        let mut binds: Vec<Value> = Vec::new();
        let mut clauses: Vec<String> = Vec::new();

        for filter in filters {
            match filter {
                Filter::Eq { field, value } => {
                    let field = checked_field(field)?;
                    binds.push(value.clone());
                    clauses.push(format!("doc->'{field}' = ${}::jsonb", binds.len()));
                }
                Filter::Contains { field, value } => {
                    let field = checked_field(field)?;
                    binds.push(value.clone());
                    clauses.push(format!("doc->'{field}' @> ${}::jsonb", binds.len()));
                }
                Filter::AnyOf { field, values } => {
                    let field = checked_field(field)?;
                    binds.push(Value::Array(values.clone()));
                    clauses.push(format!(
                        "${}::jsonb @> jsonb_build_array(doc->'{field}')",
                        binds.len()
                    ));
                }
            }
        }

        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        if let Some(order) = order {
            let field = checked_field(&order.field)?;
            let dir = if order.descending { "DESC" } else { "ASC" };
            sql.push_str(&format!(" ORDER BY doc->>'{field}' {dir}"));
        }

        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut query = sqlx::query_scalar::<_, Value>(&sql);
        for bind in binds {
            query = query.bind(bind);
        }

        let rows = query.fetch_all(&self.pool).await?;
        let mut docs = Vec::with_capacity(rows.len());
        for row in rows {
            match row {
                Value::Object(doc) => docs.push(doc),
                other => {
                    log::error!("Skipping non-object row in '{table}': {other}");
                }
            }
        }
        Ok(docs)
    }

    async fn insert(&self, table: &str, doc: Document) -> Result<String, error::SystemError> {
        let table = checked_table(table)?;
        let id = doc
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::now_v7().to_string());

        sqlx::query(&format!("INSERT INTO {table} (id, doc) VALUES ($1, $2)"))
            .bind(&id)
            .bind(Value::Object(with_id(doc, &id)))
            .execute(&self.pool)
            .await?;
        Ok(id)
    }

    async fn upsert(
        &self,
        table: &str,
        id: &str,
        doc: Document,
    ) -> Result<(), error::SystemError> {
        let table = checked_table(table)?;
        sqlx::query(&format!(
            "INSERT INTO {table} (id, doc) VALUES ($1, $2) \
             ON CONFLICT (id) DO UPDATE SET doc = EXCLUDED.doc"
        ))
        .bind(id)
        .bind(Value::Object(with_id(doc, id)))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_fields(
        &self,
        table: &str,
        id: &str,
        fields: Document,
    ) -> Result<(), error::SystemError> {
        let table = checked_table(table)?;
        sqlx::query(&format!("UPDATE {table} SET doc = doc || $2 WHERE id = $1"))
            .bind(id)
            .bind(Value::Object(fields))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_by_id(&self, table: &str, id: &str) -> Result<(), error::SystemError> {
        let table = checked_table(table)?;
        sqlx::query(&format!("DELETE FROM {table} WHERE id = $1"))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
