//! SQLite-backed `DocumentStore` with a live change feed.
//!
//! # Responsibility
//! - Persist JSON documents keyed by `(collection, doc_id)`.
//! - Push full ordered snapshots to collection subscribers after every
//!   committed write to that collection.
//!
//! # Invariants
//! - Field names used in filters and ordering match `[A-Za-z_][A-Za-z0-9_]*`
//!   before they reach SQL.
//! - A change notification is sent only after the write has committed.
//! - A subscriber's feed task exits as soon as its receiver is dropped.

use crate::db::{open_db, open_db_in_memory, DbResult};
use crate::store::{
    CollectionPath, CollectionSubscription, Document, DocumentPath, DocumentStore, FieldFilter,
    OrderBy, SortDirection, StoreError, StoreResult, StoredDocument,
};
use async_trait::async_trait;
use log::{debug, warn};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};

const CHANGE_BUFFER: usize = 64;
const SNAPSHOT_BUFFER: usize = 16;

static FIELD_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid field name regex"));

/// Local document database usable wherever the hosted store is expected.
///
/// Cloning is cheap; clones share one connection and one change feed.
#[derive(Clone)]
pub struct SqliteDocumentStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    conn: Mutex<Connection>,
    changes: broadcast::Sender<String>,
}

impl SqliteDocumentStore {
    /// Opens (and migrates) a file-backed store.
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        Ok(Self::from_connection(open_db(path)?))
    }

    pub fn open_in_memory() -> DbResult<Self> {
        Ok(Self::from_connection(open_db_in_memory()?))
    }

    fn from_connection(conn: Connection) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            inner: Arc::new(StoreInner {
                conn: Mutex::new(conn),
                changes,
            }),
        }
    }
}

impl StoreInner {
    fn read(&self, path: &DocumentPath) -> StoreResult<Option<Document>> {
        let conn = self.conn.lock();
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM documents WHERE collection = ?1 AND doc_id = ?2;",
                params![path.collection(), path.doc_id()],
                |row| row.get(0),
            )
            .optional()?;
        body.map(|raw| parse_body(&raw)).transpose()
    }

    fn write(&self, path: &DocumentPath, document: &Document) -> StoreResult<()> {
        let body = serde_json::to_string(document)?;
        {
            let conn = self.conn.lock();
            conn.execute(
                "INSERT INTO documents (collection, doc_id, body)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (collection, doc_id) DO UPDATE SET
                    body = excluded.body,
                    written_at = (strftime('%s', 'now') * 1000);",
                params![path.collection(), path.doc_id(), body],
            )?;
        }
        self.notify(path.collection());
        Ok(())
    }

    fn merge(&self, path: &DocumentPath, fields: Document) -> StoreResult<()> {
        {
            let mut conn = self.conn.lock();
            let tx = conn.transaction()?;
            let existing: Option<String> = tx
                .query_row(
                    "SELECT body FROM documents WHERE collection = ?1 AND doc_id = ?2;",
                    params![path.collection(), path.doc_id()],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(raw) = existing else {
                return Err(StoreError::NotFound(path.to_string()));
            };

            let mut document = parse_body(&raw)?;
            document.extend(fields);
            tx.execute(
                "UPDATE documents
                 SET
                    body = ?3,
                    written_at = (strftime('%s', 'now') * 1000)
                 WHERE collection = ?1 AND doc_id = ?2;",
                params![
                    path.collection(),
                    path.doc_id(),
                    serde_json::to_string(&document)?
                ],
            )?;
            tx.commit()?;
        }
        self.notify(path.collection());
        Ok(())
    }

    fn remove(&self, path: &DocumentPath) -> StoreResult<()> {
        let changed = {
            let conn = self.conn.lock();
            conn.execute(
                "DELETE FROM documents WHERE collection = ?1 AND doc_id = ?2;",
                params![path.collection(), path.doc_id()],
            )?
        };
        if changed > 0 {
            self.notify(path.collection());
        }
        Ok(())
    }

    fn query(
        &self,
        collection: &str,
        filter: Option<&FieldFilter>,
        order_by: Option<&OrderBy>,
    ) -> StoreResult<Vec<StoredDocument>> {
        let mut sql = String::from("SELECT doc_id, body FROM documents WHERE collection = ?");
        let mut bind_values = vec![SqlValue::Text(collection.to_string())];

        if let Some(filter) = filter {
            let field = checked_field(&filter.field)?;
            match json_to_sql(&filter.value) {
                Some(value) => {
                    sql.push_str(&format!(" AND json_extract(body, '$.{field}') = ?"));
                    bind_values.push(value);
                }
                None => sql.push_str(&format!(" AND json_extract(body, '$.{field}') IS NULL")),
            }
        }

        match order_by {
            Some(order) => {
                let field = checked_field(&order.field)?;
                let direction = match order.direction {
                    SortDirection::Ascending => "ASC",
                    SortDirection::Descending => "DESC",
                };
                sql.push_str(&format!(
                    " ORDER BY json_extract(body, '$.{field}') {direction}, doc_id {direction}"
                ));
            }
            None => sql.push_str(" ORDER BY doc_id ASC"),
        }

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut documents = Vec::new();
        while let Some(row) = rows.next()? {
            let raw: String = row.get("body")?;
            documents.push(StoredDocument {
                id: row.get("doc_id")?,
                fields: parse_body(&raw)?,
            });
        }
        Ok(documents)
    }

    fn notify(&self, collection: String) {
        debug!("event=doc_change module=store collection={collection}");
        // No receivers simply means nobody is subscribed.
        let _ = self.changes.send(collection);
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn get_document(&self, path: &DocumentPath) -> StoreResult<Option<Document>> {
        self.inner.read(path)
    }

    async fn set_document(&self, path: &DocumentPath, document: Document) -> StoreResult<()> {
        self.inner.write(path, &document)
    }

    async fn update_document(&self, path: &DocumentPath, fields: Document) -> StoreResult<()> {
        self.inner.merge(path, fields)
    }

    async fn delete_document(&self, path: &DocumentPath) -> StoreResult<()> {
        self.inner.remove(path)
    }

    async fn query_collection(
        &self,
        path: &CollectionPath,
        filter: Option<&FieldFilter>,
        order_by: Option<&OrderBy>,
    ) -> StoreResult<Vec<StoredDocument>> {
        self.inner.query(&path.to_string(), filter, order_by)
    }

    async fn subscribe_collection(
        &self,
        path: &CollectionPath,
        order_by: &OrderBy,
    ) -> StoreResult<CollectionSubscription> {
        checked_field(&order_by.field)?;
        let collection = path.to_string();
        let order_by = order_by.clone();
        let inner = Arc::clone(&self.inner);
        // Subscribe before the first snapshot so no commit falls in between.
        let mut changes = inner.changes.subscribe();
        let (tx, rx) = mpsc::channel(SNAPSHOT_BUFFER);

        tokio::spawn(async move {
            let first = inner.query(&collection, None, Some(&order_by));
            if tx.send(first).await.is_err() {
                return;
            }
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    changed = changes.recv() => {
                        match changed {
                            Ok(changed) if changed != collection => continue,
                            Ok(_) => {}
                            Err(RecvError::Lagged(skipped)) => {
                                warn!("event=feed_lagged module=store collection={collection} skipped={skipped}");
                            }
                            Err(RecvError::Closed) => break,
                        }
                        let snapshot = inner.query(&collection, None, Some(&order_by));
                        if tx.send(snapshot).await.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("event=feed_closed module=store collection={collection}");
        });

        Ok(CollectionSubscription::new(rx))
    }
}

fn parse_body(raw: &str) -> StoreResult<Document> {
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map),
        _ => Err(StoreError::Unavailable(
            "stored document body is not a JSON object".to_string(),
        )),
    }
}

fn checked_field(field: &str) -> StoreResult<&str> {
    if FIELD_NAME_RE.is_match(field) {
        Ok(field)
    } else {
        Err(StoreError::InvalidField(field.to_string()))
    }
}

fn json_to_sql(value: &Value) -> Option<SqlValue> {
    match value {
        Value::Null => None,
        Value::Bool(flag) => Some(SqlValue::Integer(i64::from(*flag))),
        Value::Number(number) => Some(match number.as_i64() {
            Some(int) => SqlValue::Integer(int),
            None => SqlValue::Real(number.as_f64().unwrap_or_default()),
        }),
        Value::String(text) => Some(SqlValue::Text(text.clone())),
        other => Some(SqlValue::Text(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::{checked_field, SqliteDocumentStore};
    use crate::model::ids::{SheetId, UserId};
    use crate::store::{CollectionPath, DocumentPath, DocumentStore, StoreError};
    use serde_json::json;

    #[test]
    fn field_names_are_checked_before_sql() {
        assert!(checked_field("date").is_ok());
        assert!(matches!(
            checked_field("date') OR 1=1 --"),
            Err(StoreError::InvalidField(_))
        ));
    }

    #[tokio::test]
    async fn update_merges_top_level_fields() {
        let store = SqliteDocumentStore::open_in_memory().unwrap();
        let user = UserId::new("u1").unwrap();
        let path = DocumentPath::sheet(&user, &SheetId::for_date("2024-03-01"));
        let body = json!({"title": "a", "date": "2024-03-01"});
        store
            .set_document(&path, body.as_object().unwrap().clone())
            .await
            .unwrap();

        let patch = json!({"title": "b"});
        store
            .update_document(&path, patch.as_object().unwrap().clone())
            .await
            .unwrap();

        let loaded = store.get_document(&path).await.unwrap().unwrap();
        assert_eq!(loaded["title"], "b");
        assert_eq!(loaded["date"], "2024-03-01");
        assert_eq!(
            store
                .query_collection(&CollectionPath::sheets(&user), None, None)
                .await
                .unwrap()
                .len(),
            1
        );
    }
}
