#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use timebox_core::store::{
    CollectionPath, CollectionSubscription, Document, DocumentPath, DocumentStore, FieldFilter,
    OrderBy, StoreError, StoreResult, StoredDocument,
};
use timebox_core::{SheetRepository, SqliteDocumentStore, SyncConfig, UserId};

/// Store operation, for failure injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Get,
    Set,
    Update,
    Delete,
    Query,
    Subscribe,
}

/// In-memory SQLite store that fails chosen operations on demand.
pub struct FlakyStore {
    inner: SqliteDocumentStore,
    /// `(op, None)` fails every call of `op`; `(op, Some(id))` only that doc.
    failures: Mutex<HashSet<(Op, Option<String>)>>,
    calls: Mutex<HashMap<Op, usize>>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: SqliteDocumentStore::open_in_memory().unwrap(),
            failures: Mutex::new(HashSet::new()),
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn fail(&self, op: Op) {
        self.failures.lock().insert((op, None));
    }

    pub fn fail_doc(&self, op: Op, doc_id: &str) {
        self.failures.lock().insert((op, Some(doc_id.to_string())));
    }

    pub fn heal(&self) {
        self.failures.lock().clear();
    }

    pub fn calls(&self, op: Op) -> usize {
        self.calls.lock().get(&op).copied().unwrap_or(0)
    }

    pub fn inner(&self) -> &SqliteDocumentStore {
        &self.inner
    }

    fn check(&self, op: Op, doc_id: Option<&str>) -> StoreResult<()> {
        *self.calls.lock().entry(op).or_insert(0) += 1;
        let failures = self.failures.lock();
        let targeted = doc_id.is_some_and(|id| failures.contains(&(op, Some(id.to_string()))));
        if failures.contains(&(op, None)) || targeted {
            return Err(StoreError::Unavailable(format!("injected {op:?} failure")));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn get_document(&self, path: &DocumentPath) -> StoreResult<Option<Document>> {
        self.check(Op::Get, Some(path.doc_id()))?;
        self.inner.get_document(path).await
    }

    async fn set_document(&self, path: &DocumentPath, document: Document) -> StoreResult<()> {
        self.check(Op::Set, Some(path.doc_id()))?;
        self.inner.set_document(path, document).await
    }

    async fn update_document(&self, path: &DocumentPath, fields: Document) -> StoreResult<()> {
        self.check(Op::Update, Some(path.doc_id()))?;
        self.inner.update_document(path, fields).await
    }

    async fn delete_document(&self, path: &DocumentPath) -> StoreResult<()> {
        self.check(Op::Delete, Some(path.doc_id()))?;
        self.inner.delete_document(path).await
    }

    async fn query_collection(
        &self,
        path: &CollectionPath,
        filter: Option<&FieldFilter>,
        order_by: Option<&OrderBy>,
    ) -> StoreResult<Vec<StoredDocument>> {
        self.check(Op::Query, None)?;
        self.inner.query_collection(path, filter, order_by).await
    }

    async fn subscribe_collection(
        &self,
        path: &CollectionPath,
        order_by: &OrderBy,
    ) -> StoreResult<CollectionSubscription> {
        self.check(Op::Subscribe, None)?;
        self.inner.subscribe_collection(path, order_by).await
    }
}

pub fn user() -> UserId {
    UserId::new("user-1").unwrap()
}

pub fn repo(store: &Arc<FlakyStore>) -> SheetRepository<FlakyStore> {
    SheetRepository::new(Arc::clone(store))
}

pub fn repo_with(store: &Arc<FlakyStore>, config: SyncConfig) -> SheetRepository<FlakyStore> {
    SheetRepository::with_config(Arc::clone(store), config)
}

/// Writes a minimal sheet document straight into the store.
pub async fn seed_sheet(store: &FlakyStore, user: &UserId, date: &str, title: &str) {
    let body = serde_json::json!({
        "title": title,
        "date": date,
        "priorities": [],
        "notes": [],
        "schedule": [],
        "createdAt": 1,
        "updatedAt": 1,
    });
    let path = DocumentPath::sheet(user, &timebox_core::SheetId::for_date(date));
    store
        .inner()
        .set_document(&path, into_document(body))
        .await
        .unwrap();
}

pub fn into_document(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

pub fn dates(sheets: &[timebox_core::Sheet]) -> Vec<&str> {
    sheets.iter().map(|sheet| sheet.date.as_str()).collect()
}
