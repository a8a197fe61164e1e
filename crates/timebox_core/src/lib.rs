//! Client-side sync core for the Timebox daily planner.
//!
//! Mediates between page adapters and a remote document store: a TTL read
//! cache, per-sheet debounced writes with optimistic updates, and one live
//! sheet-list subscription per user.

pub mod cache;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod store;
pub mod sync;

pub use cache::{CacheStats, SheetCache, TtlCache};
pub use config::{ConfigError, SyncConfig};
pub use logging::{init_logging, logging_status, LogConfig, LogLevel, LoggingError};
pub use model::edits::{NewTimeBlock, TimeBlockField};
pub use model::ids::{ServerTimestamp, SheetId, UserId};
pub use model::settings::UserSettings;
pub use model::sheet::{BlockColor, Note, Priority, Sheet, SheetPatch, SheetValidationError, TimeBlock};
pub use repo::{resolve_user, BulkDeleteReport, RepoError, RepoResult, SheetRepository, WriteOp};
pub use service::{SheetListModel, SheetModel, ViewState};
pub use store::{DocumentStore, SqliteDocumentStore, StoreError};
pub use sync::{PendingWrite, SubscriptionHandle, SubscriptionState, WriteOutcome};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
