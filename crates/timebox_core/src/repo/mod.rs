//! Repository layer over the document store.
//!
//! # Responsibility
//! - Expose sheet CRUD, list and existence checks within one user's
//!   namespace, combining cache, write coalescer and store.
//! - Translate store failures into the semantic `RepoError` taxonomy.
//!
//! # Invariants
//! - Every operation takes an explicit `UserId`; there is no ambient user.
//! - Read failures never populate the cache.
//! - Write failures invalidate the cache entries they may have made stale.
//!
//! # See also
//! - sync/coalescer.rs for debounce semantics.

use crate::model::ids::UserId;
use crate::model::sheet::SheetValidationError;
use crate::store::StoreError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod sheet_repo;

pub use sheet_repo::{BulkDeleteReport, SheetRepository};

pub type RepoResult<T> = Result<T, RepoError>;

/// Remote mutation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Create,
    Update,
    Delete,
}

impl Display for WriteOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Repository error for sheet use-cases.
#[derive(Debug)]
pub enum RepoError {
    /// No resolved user identity; raised before cache or store is touched.
    NotAuthenticated,
    /// Remote fetch could not complete.
    ReadFailure(StoreError),
    /// Remote create, update or delete could not complete.
    WriteFailure { op: WriteOp, source: StoreError },
    /// Caller input rejected before any I/O.
    InvalidInput(SheetValidationError),
    /// A stored document could not be decoded into a sheet.
    InvalidData(String),
}

impl RepoError {
    pub fn is_write_failure(&self) -> bool {
        matches!(self, Self::WriteFailure { .. })
    }

    /// A write that failed because the sheet is gone from the store.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::WriteFailure {
                source: StoreError::NotFound(_),
                ..
            }
        )
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAuthenticated => write!(f, "no signed-in user"),
            Self::ReadFailure(err) => write!(f, "read failed: {err}"),
            Self::WriteFailure { op, source } => write!(f, "{op} failed: {source}"),
            Self::InvalidInput(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid stored sheet: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::ReadFailure(err) => Some(err),
            Self::WriteFailure { source, .. } => Some(source),
            Self::InvalidInput(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SheetValidationError> for RepoError {
    fn from(value: SheetValidationError) -> Self {
        Self::InvalidInput(value)
    }
}

/// Resolves the identity handed over by the auth collaborator.
///
/// Fails with `NotAuthenticated` when there is no user or the id is unusable
/// as a path segment.
pub fn resolve_user(session_uid: Option<&str>) -> RepoResult<UserId> {
    session_uid
        .and_then(UserId::new)
        .ok_or(RepoError::NotAuthenticated)
}
