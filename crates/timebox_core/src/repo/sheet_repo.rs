//! Sheet repository: cache-first reads, optimistic coalesced writes.
//!
//! # Responsibility
//! - Implement create/get/update/delete/list/exists for one user's sheets.
//! - Keep the shared cache consistent with optimistic edits and roll it back
//!   (by invalidation) when the store rejects a write.
//!
//! # Invariants
//! - `update` applies the patch to the cached sheet and records it as pending
//!   under one cache lock, before the write is scheduled.
//! - Pending patches for one sheet are merged field-wise and taken by the
//!   coalesced write when it fires.
//! - `create` does not check date uniqueness; callers use `exists_for_date`
//!   first. Two creates for one date write the same document id.

use crate::cache::{CacheStats, SharedCache, SheetCache};
use crate::config::SyncConfig;
use crate::model::ids::{ServerTimestamp, SheetId, UserId};
use crate::model::settings::UserSettings;
use crate::model::sheet::{validate_date, Sheet, SheetPatch};
use crate::repo::{RepoError, RepoResult, WriteOp};
use crate::store::codec::{
    patch_to_fields, settings_from_user_document, sheet_from_document, sheet_from_stored,
    sheet_to_document,
};
use crate::store::{
    CollectionPath, DocumentPath, DocumentStore, FieldFilter, OrderBy, StoreError,
    StoredDocument,
};
use crate::sync::{PendingWrite, SubscriptionHandle, SubscriptionManager, WriteCoalescer};
use futures::future::join_all;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

type PendingPatches = Arc<Mutex<HashMap<DocumentPath, SheetPatch>>>;

/// Per-id outcome of `delete_many`.
#[derive(Debug, Default)]
pub struct BulkDeleteReport {
    /// Ids whose remote delete succeeded, in request order.
    pub deleted: Vec<SheetId>,
    /// Ids whose remote delete failed, in request order.
    pub failed: Vec<(SheetId, RepoError)>,
}

impl BulkDeleteReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_ids(&self) -> Vec<&SheetId> {
        self.failed.iter().map(|(id, _)| id).collect()
    }
}

/// Facade over cache, write coalescer, subscriptions and store.
///
/// Construct once per session and share by reference.
pub struct SheetRepository<S: DocumentStore> {
    store: Arc<S>,
    cache: SharedCache,
    coalescer: WriteCoalescer<DocumentPath, RepoError>,
    pending: PendingPatches,
    subscriptions: SubscriptionManager<S>,
    config: SyncConfig,
}

impl<S: DocumentStore> SheetRepository<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_config(store, SyncConfig::default())
    }

    pub fn with_config(store: Arc<S>, config: SyncConfig) -> Self {
        let cache = SheetCache::shared(config.cache_ttl());
        Self {
            subscriptions: SubscriptionManager::new(Arc::clone(&store), Arc::clone(&cache)),
            coalescer: WriteCoalescer::new(config.quiet_period()),
            pending: Arc::new(Mutex::new(HashMap::new())),
            store,
            cache,
            config,
        }
    }

    pub fn config(&self) -> SyncConfig {
        self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn subscriptions(&self) -> &SubscriptionManager<S> {
        &self.subscriptions
    }

    /// Creates the sheet for `date`, id `sheet-<date>`.
    ///
    /// The sheet is prepended to a warm cached list before the remote write.
    /// An edit still armed for the same id is discarded. If the write fails
    /// the list entry is invalidated and `WriteFailure` is returned.
    pub async fn create(&self, user: &UserId, date: &str, title: Option<&str>) -> RepoResult<Sheet> {
        let started_at = Instant::now();
        let sheet = Sheet::new(date, title, ServerTimestamp::now())?;
        let path = DocumentPath::sheet(user, &sheet.id);
        let document = sheet_to_document(&sheet).map_err(|source| RepoError::WriteFailure {
            op: WriteOp::Create,
            source,
        })?;

        // An edit armed against an earlier sheet for this date must not land
        // on the new document.
        if self.coalescer.cancel(&path) {
            debug!(
                "event=sheet_create module=repo status=write_discarded user={user} sheet_id={}",
                sheet.id
            );
        }
        self.pending.lock().remove(&path);

        {
            let mut cache = self.cache.lock();
            if let Some(mut sheets) = cache.sheet_list(user) {
                sheets.retain(|existing| existing.id != sheet.id);
                sheets.insert(0, sheet.clone());
                cache.set_sheet_list(user, sheets);
            }
            cache.set_sheet(user, sheet.clone());
        }

        if let Err(source) = self.store.set_document(&path, document).await {
            {
                let mut cache = self.cache.lock();
                cache.invalidate_list(user);
                cache.invalidate_sheet(user, &sheet.id);
            }
            warn!(
                "event=sheet_create module=repo status=error user={user} sheet_id={} duration_ms={} error={source}",
                sheet.id,
                started_at.elapsed().as_millis()
            );
            return Err(RepoError::WriteFailure {
                op: WriteOp::Create,
                source,
            });
        }

        info!(
            "event=sheet_create module=repo status=ok user={user} sheet_id={} duration_ms={}",
            sheet.id,
            started_at.elapsed().as_millis()
        );
        Ok(sheet)
    }

    /// Cache-first read. `Ok(None)` when the sheet does not exist.
    pub async fn get(&self, user: &UserId, sheet_id: &SheetId) -> RepoResult<Option<Sheet>> {
        let cached = self.cache.lock().sheet(user, sheet_id);
        if let Some(sheet) = cached {
            return Ok(Some(sheet));
        }

        let started_at = Instant::now();
        let path = DocumentPath::sheet(user, sheet_id);
        let document = match self.store.get_document(&path).await {
            Ok(document) => document,
            Err(err) => {
                warn!(
                    "event=sheet_get module=repo status=error user={user} sheet_id={sheet_id} error={err}"
                );
                return Err(RepoError::ReadFailure(err));
            }
        };
        let Some(document) = document else {
            debug!("event=sheet_get module=repo status=not_found user={user} sheet_id={sheet_id}");
            return Ok(None);
        };
        let mut sheet = sheet_from_document(sheet_id.as_str(), document)
            .map_err(|err| RepoError::InvalidData(format!("{path}: {err}")))?;

        {
            let mut cache = self.cache.lock();
            // Keep edits made while the fetch was in flight visible.
            if let Some(patch) = self.pending.lock().get(&path) {
                patch.apply_to(&mut sheet, ServerTimestamp::now());
            }
            cache.set_sheet(user, sheet.clone());
        }
        debug!(
            "event=sheet_get module=repo status=ok user={user} sheet_id={sheet_id} duration_ms={}",
            started_at.elapsed().as_millis()
        );
        Ok(Some(sheet))
    }

    /// Applies `patch` optimistically and schedules the remote merge.
    ///
    /// Returns once the cache reflects the edit. The returned `PendingWrite`
    /// resolves when the coalesced write has run; a failure there has already
    /// invalidated the cached sheet. Dropping it does not cancel the write.
    /// Must be called from within a tokio runtime.
    pub fn update(
        &self,
        user: &UserId,
        sheet_id: &SheetId,
        patch: SheetPatch,
    ) -> RepoResult<PendingWrite<RepoError>> {
        patch.validate()?;
        let path = DocumentPath::sheet(user, sheet_id);
        let now = ServerTimestamp::now();

        let pending_write = {
            let mut cache = self.cache.lock();
            if let Some(mut sheet) = cache.sheet(user, sheet_id) {
                patch.apply_to(&mut sheet, now);
                cache.set_sheet(user, sheet);
            }
            if let Some(mut sheets) = cache.sheet_list(user) {
                if let Some(listed) = sheets.iter_mut().find(|listed| &listed.id == sheet_id) {
                    patch.apply_to(listed, now);
                    cache.set_sheet_list(user, sheets);
                }
            }

            self.pending
                .lock()
                .entry(path.clone())
                .and_modify(|queued| queued.merge(patch.clone()))
                .or_insert(patch);

            self.coalescer.schedule(
                path.clone(),
                flush_patch(
                    Arc::clone(&self.store),
                    Arc::clone(&self.cache),
                    Arc::clone(&self.pending),
                    user.clone(),
                    sheet_id.clone(),
                    path,
                ),
            )
        };

        debug!("event=sheet_update module=repo status=scheduled user={user} sheet_id={sheet_id}");
        Ok(pending_write)
    }

    /// Deletes one sheet and purges its cache entries.
    ///
    /// A write still armed for the sheet is discarded first.
    pub async fn delete(&self, user: &UserId, sheet_id: &SheetId) -> RepoResult<()> {
        self.delete_remote(user, sheet_id).await?;
        let mut cache = self.cache.lock();
        cache.invalidate_sheet(user, sheet_id);
        cache.invalidate_list(user);
        Ok(())
    }

    /// Deletes all `sheet_ids` concurrently.
    ///
    /// Successful deletes are not undone when others fail. Cache entries are
    /// purged for the deleted ids once every delete has completed.
    pub async fn delete_many(&self, user: &UserId, sheet_ids: &[SheetId]) -> BulkDeleteReport {
        let results = join_all(
            sheet_ids
                .iter()
                .map(|sheet_id| self.delete_remote(user, sheet_id)),
        )
        .await;

        let mut report = BulkDeleteReport::default();
        for (sheet_id, result) in sheet_ids.iter().zip(results) {
            match result {
                Ok(()) => report.deleted.push(sheet_id.clone()),
                Err(err) => report.failed.push((sheet_id.clone(), err)),
            }
        }

        {
            let mut cache = self.cache.lock();
            for sheet_id in &report.deleted {
                cache.invalidate_sheet(user, sheet_id);
            }
            cache.invalidate_list(user);
        }
        info!(
            "event=sheet_delete_many module=repo status={} user={user} deleted={} failed={}",
            if report.is_complete() { "ok" } else { "partial" },
            report.deleted.len(),
            report.failed.len()
        );
        report
    }

    /// Whether a sheet exists for `date`.
    ///
    /// Served from a warm cached list by linear scan, otherwise by a remote
    /// equality query on `date`.
    pub async fn exists_for_date(&self, user: &UserId, date: &str) -> RepoResult<bool> {
        let date = date.trim();
        validate_date(date)?;
        let cached = self.cache.lock().sheet_list(user);
        if let Some(sheets) = cached {
            return Ok(sheets.iter().any(|sheet| sheet.date == date));
        }

        let path = CollectionPath::sheets(user);
        let filter = FieldFilter::eq("date", date);
        match self.store.query_collection(&path, Some(&filter), None).await {
            Ok(documents) => Ok(!documents.is_empty()),
            Err(err) => {
                warn!("event=sheet_exists module=repo status=error user={user} error={err}");
                Err(RepoError::ReadFailure(err))
            }
        }
    }

    /// Sheets ordered by `date` descending.
    ///
    /// Serves a warm cached list as is. Either way a live subscription is
    /// started for the user if none is active, so later changes replace the
    /// cached list.
    pub async fn list(&self, user: &UserId) -> RepoResult<Vec<Sheet>> {
        let cached = self.cache.lock().sheet_list(user);
        if let Some(sheets) = cached {
            self.subscriptions.ensure_live(user);
            return Ok(sheets);
        }

        let started_at = Instant::now();
        let sheets = match self.fetch_list(user).await {
            Ok(sheets) => sheets,
            Err(err) => {
                warn!("event=sheet_list module=repo status=error user={user} error={err}");
                return Err(RepoError::ReadFailure(err));
            }
        };
        self.cache.lock().set_sheet_list(user, sheets.clone());
        self.subscriptions.ensure_live(user);
        debug!(
            "event=sheet_list module=repo status=ok user={user} count={} duration_ms={}",
            sheets.len(),
            started_at.elapsed().as_millis()
        );
        Ok(sheets)
    }

    /// Live list subscription; see `SubscriptionManager::subscribe`.
    pub fn subscribe<F>(&self, user: &UserId, on_update: F) -> SubscriptionHandle
    where
        F: Fn(&[Sheet]) + Send + Sync + 'static,
    {
        self.subscriptions.subscribe(user, on_update)
    }

    /// Warms the list and settings cache entries. Failures are logged and
    /// swallowed.
    pub async fn preload(&self, user: &UserId) {
        let started_at = Instant::now();
        match self.fetch_list(user).await {
            Ok(sheets) => self.cache.lock().set_sheet_list(user, sheets),
            Err(err) => {
                warn!("event=preload module=repo status=error part=list user={user} error={err}")
            }
        }

        let settings = match self.store.get_document(&DocumentPath::user(user)).await {
            Ok(Some(document)) => settings_from_user_document(&document),
            Ok(None) => Ok(UserSettings::default()),
            Err(err) => Err(err),
        };
        match settings {
            Ok(settings) => self.cache.lock().set_settings(user, settings),
            Err(err) => {
                warn!("event=preload module=repo status=error part=settings user={user} error={err}")
            }
        }
        debug!(
            "event=preload module=repo status=done user={user} duration_ms={}",
            started_at.elapsed().as_millis()
        );
    }

    /// Settings warmed by `preload`, while fresh.
    pub fn cached_settings(&self, user: &UserId) -> Option<UserSettings> {
        self.cache.lock().settings(user)
    }

    /// Drops every cache entry, e.g. on sign-out.
    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.lock().stats()
    }

    /// Runs every armed write now and waits for all writes to finish.
    pub async fn flush_pending(&self) {
        self.coalescer.flush().await;
    }

    /// Whether an edit to the sheet is still waiting to be written.
    pub fn has_pending_write(&self, user: &UserId, sheet_id: &SheetId) -> bool {
        self.coalescer.is_pending(&DocumentPath::sheet(user, sheet_id))
    }

    async fn delete_remote(&self, user: &UserId, sheet_id: &SheetId) -> RepoResult<()> {
        let path = DocumentPath::sheet(user, sheet_id);
        if self.coalescer.cancel(&path) {
            debug!("event=sheet_delete module=repo status=write_discarded user={user} sheet_id={sheet_id}");
        }
        let discarded = self.pending.lock().remove(&path).is_some();

        match self.store.delete_document(&path).await {
            Ok(()) => {
                info!("event=sheet_delete module=repo status=ok user={user} sheet_id={sheet_id}");
                Ok(())
            }
            Err(source) => {
                warn!(
                    "event=sheet_delete module=repo status=error user={user} sheet_id={sheet_id} error={source}"
                );
                if discarded {
                    // The cached sheet still shows the edit that will never be written.
                    let mut cache = self.cache.lock();
                    cache.invalidate_sheet(user, sheet_id);
                    cache.invalidate_list(user);
                }
                Err(RepoError::WriteFailure {
                    op: WriteOp::Delete,
                    source,
                })
            }
        }
    }

    async fn fetch_list(&self, user: &UserId) -> Result<Vec<Sheet>, StoreError> {
        let documents = self
            .store
            .query_collection(
                &CollectionPath::sheets(user),
                None,
                Some(&OrderBy::desc("date")),
            )
            .await?;
        Ok(decode_list(user, documents))
    }
}

/// Builds the coalesced write for one sheet. The merged pending patch is
/// taken only when the write fires.
fn flush_patch<S: DocumentStore>(
    store: Arc<S>,
    cache: SharedCache,
    pending: PendingPatches,
    user: UserId,
    sheet_id: SheetId,
    path: DocumentPath,
) -> impl FnOnce() -> futures::future::BoxFuture<'static, RepoResult<()>> + Send + 'static {
    move || {
        Box::pin(async move {
            let taken = pending.lock().remove(&path);
            let Some(patch) = taken else {
                return Ok(());
            };
            let result = match patch_to_fields(&patch, ServerTimestamp::now()) {
                Ok(fields) => store.update_document(&path, fields).await,
                Err(err) => Err(err),
            };
            match result {
                Ok(()) => {
                    debug!("event=sheet_update module=repo status=ok user={user} sheet_id={sheet_id}");
                    Ok(())
                }
                Err(source) => {
                    {
                        let mut cache = cache.lock();
                        cache.invalidate_sheet(&user, &sheet_id);
                        cache.invalidate_list(&user);
                    }
                    warn!(
                        "event=sheet_update module=repo status=error user={user} sheet_id={sheet_id} error={source}"
                    );
                    Err(RepoError::WriteFailure {
                        op: WriteOp::Update,
                        source,
                    })
                }
            }
        })
    }
}

/// Decodes a query result, skipping undecodable documents with a warning.
fn decode_list(user: &UserId, documents: Vec<StoredDocument>) -> Vec<Sheet> {
    documents
        .into_iter()
        .filter_map(|document| {
            let id = document.id.clone();
            match sheet_from_stored(document) {
                Ok(sheet) => Some(sheet),
                Err(err) => {
                    warn!(
                        "event=sheet_list module=repo status=skipped user={user} doc_id={id} error={err}"
                    );
                    None
                }
            }
        })
        .collect()
}
