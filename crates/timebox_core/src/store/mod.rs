//! Remote document store contract.
//!
//! # Responsibility
//! - Describe the CRUD + query + subscribe surface the sync core consumes.
//! - Type the two path shapes the core uses: `users/{uid}` and
//!   `users/{uid}/timeboxes/{sheetId}`.
//!
//! # Invariants
//! - `set_document` is a full replace; `update_document` is a shallow merge of
//!   top-level fields and fails with `StoreError::NotFound` when absent.
//! - The first snapshot delivered by a `CollectionSubscription` is the
//!   server acknowledgement; every later one is a full ordered list.
//! - Dropping or closing a `CollectionSubscription` releases its feed.

use crate::db::DbError;
use crate::model::ids::{SheetId, UserId};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};
use tokio::sync::mpsc;

pub mod codec;
pub mod sqlite;

pub use sqlite::SqliteDocumentStore;

const USERS_COLLECTION: &str = "users";
const SHEETS_COLLECTION: &str = "timeboxes";

/// JSON object body of a stored document.
pub type Document = Map<String, Value>;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug)]
pub enum StoreError {
    NotFound(String),
    Db(DbError),
    Serialization(serde_json::Error),
    InvalidField(String),
    /// Transport-level failure (network, quota, permission).
    Unavailable(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(path) => write!(f, "document not found: {path}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::Serialization(err) => write!(f, "document encoding failed: {err}"),
            Self::InvalidField(field) => write!(f, "invalid document field name `{field}`"),
            Self::Unavailable(message) => write!(f, "document store unavailable: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Serialization(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value)
    }
}

/// Path of a user's sheet collection, `users/{uid}/timeboxes`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionPath {
    user: UserId,
}

impl CollectionPath {
    pub fn sheets(user: &UserId) -> Self {
        Self { user: user.clone() }
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    pub fn doc(&self, sheet_id: &SheetId) -> DocumentPath {
        DocumentPath::Sheet(self.user.clone(), sheet_id.clone())
    }
}

impl Display for CollectionPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{USERS_COLLECTION}/{}/{SHEETS_COLLECTION}", self.user)
    }
}

/// Path of a single document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DocumentPath {
    /// `users/{uid}`, holding per-user settings.
    User(UserId),
    /// `users/{uid}/timeboxes/{sheetId}`.
    Sheet(UserId, SheetId),
}

impl DocumentPath {
    pub fn sheet(user: &UserId, sheet_id: &SheetId) -> Self {
        Self::Sheet(user.clone(), sheet_id.clone())
    }

    pub fn user(user: &UserId) -> Self {
        Self::User(user.clone())
    }

    /// Parent collection rendered as a path string.
    pub fn collection(&self) -> String {
        match self {
            Self::User(_) => USERS_COLLECTION.to_string(),
            Self::Sheet(user, _) => CollectionPath::sheets(user).to_string(),
        }
    }

    /// Last path segment.
    pub fn doc_id(&self) -> &str {
        match self {
            Self::User(user) => user.as_str(),
            Self::Sheet(_, sheet_id) => sheet_id.as_str(),
        }
    }
}

impl Display for DocumentPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.collection(), self.doc_id())
    }
}

/// A document together with its id.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub fields: Document,
}

/// Equality filter on one top-level field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    pub field: String,
    pub value: Value,
}

impl FieldFilter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub direction: SortDirection,
}

impl OrderBy {
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Descending,
        }
    }

    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Ascending,
        }
    }
}

/// Live feed of ordered collection snapshots.
#[derive(Debug)]
pub struct CollectionSubscription {
    snapshots: mpsc::Receiver<StoreResult<Vec<StoredDocument>>>,
}

impl CollectionSubscription {
    /// Wraps the receiving half of a store-side feed.
    pub fn new(snapshots: mpsc::Receiver<StoreResult<Vec<StoredDocument>>>) -> Self {
        Self { snapshots }
    }

    /// Waits for the next snapshot. `None` once the feed has ended.
    pub async fn next_snapshot(&mut self) -> Option<StoreResult<Vec<StoredDocument>>> {
        self.snapshots.recv().await
    }

    /// Stops the feed; buffered snapshots are discarded.
    pub fn close(&mut self) {
        self.snapshots.close();
        while self.snapshots.try_recv().is_ok() {}
    }
}

/// Document database consumed by the sync core.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    async fn get_document(&self, path: &DocumentPath) -> StoreResult<Option<Document>>;
    async fn set_document(&self, path: &DocumentPath, document: Document) -> StoreResult<()>;
    async fn update_document(&self, path: &DocumentPath, fields: Document) -> StoreResult<()>;
    async fn delete_document(&self, path: &DocumentPath) -> StoreResult<()>;
    async fn query_collection(
        &self,
        path: &CollectionPath,
        filter: Option<&FieldFilter>,
        order_by: Option<&OrderBy>,
    ) -> StoreResult<Vec<StoredDocument>>;
    async fn subscribe_collection(
        &self,
        path: &CollectionPath,
        order_by: &OrderBy,
    ) -> StoreResult<CollectionSubscription>;
}

#[cfg(test)]
mod tests {
    use super::{CollectionPath, DocumentPath};
    use crate::model::ids::{SheetId, UserId};

    #[test]
    fn paths_render_in_users_timeboxes_shape() {
        let user = UserId::new("u1").unwrap();
        let sheet = SheetId::for_date("2024-03-01");
        assert_eq!(
            DocumentPath::sheet(&user, &sheet).to_string(),
            "users/u1/timeboxes/sheet-2024-03-01"
        );
        assert_eq!(DocumentPath::user(&user).to_string(), "users/u1");
        assert_eq!(CollectionPath::sheets(&user).to_string(), "users/u1/timeboxes");
    }
}
