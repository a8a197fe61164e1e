//! Page-level state adapters over `SheetRepository`.
//!
//! # Responsibility
//! - Bind one optional user (and, for `SheetModel`, one sheet) and expose
//!   `{data, is_loading, error}` snapshots plus a change feed for renderers.
//! - Route mutations through the repository so rapid edits are coalesced.
//!
//! # Invariants
//! - An unbound adapter is idle with empty data; every mutation on it fails
//!   with `RepoError::NotAuthenticated` before touching cache or store.
//! - `SheetListModel` holds at most one list subscription and releases it on
//!   drop.

use crate::model::ids::{ServerTimestamp, SheetId, UserId};
use crate::model::sheet::{Sheet, SheetPatch};
use crate::repo::{BulkDeleteReport, RepoError, RepoResult, SheetRepository};
use crate::store::DocumentStore;
use crate::sync::{PendingWrite, SubscriptionHandle};
use log::warn;
use std::sync::Arc;
use tokio::sync::watch;

/// Render state published by an adapter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewState<T> {
    pub data: T,
    pub is_loading: bool,
    /// Message of the last failed operation, cleared by the next success.
    pub error: Option<String>,
}

impl<T: Default> ViewState<T> {
    fn idle() -> Self {
        Self::default()
    }

    fn loading() -> Self {
        Self {
            is_loading: true,
            ..Self::default()
        }
    }
}

fn bound_user(user: &Option<UserId>) -> RepoResult<&UserId> {
    user.as_ref().ok_or(RepoError::NotAuthenticated)
}

/// Sheet list page state, kept live by a list subscription.
pub struct SheetListModel<S: DocumentStore> {
    repo: Arc<SheetRepository<S>>,
    user: Option<UserId>,
    state: Arc<watch::Sender<ViewState<Vec<Sheet>>>>,
    subscription: Option<SubscriptionHandle>,
}

impl<S: DocumentStore> SheetListModel<S> {
    /// Binds `user` and subscribes to their sheet list. A warm cache is
    /// visible in the first snapshot. Must be called within a tokio runtime.
    pub fn bind(repo: Arc<SheetRepository<S>>, user: Option<UserId>) -> Self {
        let Some(uid) = user.clone() else {
            let (state, _) = watch::channel(ViewState::idle());
            return Self {
                repo,
                user,
                state: Arc::new(state),
                subscription: None,
            };
        };

        let (state, _) = watch::channel(ViewState::loading());
        let state = Arc::new(state);
        let publisher = Arc::clone(&state);
        let subscription = repo.subscribe(&uid, move |sheets| {
            publisher.send_modify(|view| {
                view.data = sheets.to_vec();
                view.is_loading = false;
                view.error = None;
            });
        });

        Self {
            repo,
            user,
            state,
            subscription: Some(subscription),
        }
    }

    pub fn user(&self) -> Option<&UserId> {
        self.user.as_ref()
    }

    pub fn snapshot(&self) -> ViewState<Vec<Sheet>> {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state change.
    pub fn watch(&self) -> watch::Receiver<ViewState<Vec<Sheet>>> {
        self.state.subscribe()
    }

    /// One-shot list read, publishing the result or the failure.
    pub async fn refresh(&self) -> RepoResult<Vec<Sheet>> {
        let user = bound_user(&self.user)?;
        match self.repo.list(user).await {
            Ok(sheets) => {
                self.state.send_modify(|view| {
                    view.data = sheets.clone();
                    view.is_loading = false;
                    view.error = None;
                });
                Ok(sheets)
            }
            Err(err) => Err(self.record(err)),
        }
    }

    pub async fn create(&self, date: &str, title: Option<&str>) -> RepoResult<Sheet> {
        let user = bound_user(&self.user)?;
        let created = self.repo.create(user, date, title).await;
        self.settle(created)
    }

    pub async fn delete(&self, sheet_id: &SheetId) -> RepoResult<()> {
        let user = bound_user(&self.user)?;
        let deleted = self.repo.delete(user, sheet_id).await;
        self.settle(deleted)
    }

    /// Deletes the selection; per-id failures are summarised in `error`.
    pub async fn delete_many(&self, sheet_ids: &[SheetId]) -> RepoResult<BulkDeleteReport> {
        let user = bound_user(&self.user)?;
        let report = self.repo.delete_many(user, sheet_ids).await;
        let message = (!report.is_complete()).then(|| {
            format!(
                "failed to delete {} of {} sheets",
                report.failed.len(),
                sheet_ids.len()
            )
        });
        self.state.send_modify(|view| view.error = message);
        Ok(report)
    }

    pub async fn exists_for_date(&self, date: &str) -> RepoResult<bool> {
        let user = bound_user(&self.user)?;
        self.repo.exists_for_date(user, date).await
    }

    /// Clears `error` on success, records it on failure.
    fn settle<T>(&self, result: RepoResult<T>) -> RepoResult<T> {
        match result {
            Ok(value) => {
                self.state.send_modify(|view| view.error = None);
                Ok(value)
            }
            Err(err) => Err(self.record(err)),
        }
    }

    fn record(&self, err: RepoError) -> RepoError {
        let message = err.to_string();
        self.state.send_modify(|view| {
            view.is_loading = false;
            view.error = Some(message);
        });
        err
    }
}

impl<S: DocumentStore> Drop for SheetListModel<S> {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}

/// Single sheet editor state.
pub struct SheetModel<S: DocumentStore> {
    repo: Arc<SheetRepository<S>>,
    user: Option<UserId>,
    sheet_id: SheetId,
    state: Arc<watch::Sender<ViewState<Option<Sheet>>>>,
}

impl<S: DocumentStore> SheetModel<S> {
    pub fn bind(repo: Arc<SheetRepository<S>>, user: Option<UserId>, sheet_id: SheetId) -> Self {
        let (state, _) = watch::channel(ViewState::idle());
        Self {
            repo,
            user,
            sheet_id,
            state: Arc::new(state),
        }
    }

    pub fn sheet_id(&self) -> &SheetId {
        &self.sheet_id
    }

    pub fn snapshot(&self) -> ViewState<Option<Sheet>> {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<ViewState<Option<Sheet>>> {
        self.state.subscribe()
    }

    /// Reads the sheet (cache-first) into `data`. `None` means it no longer
    /// exists and the page should navigate away.
    pub async fn load(&self) -> RepoResult<Option<Sheet>> {
        let user = bound_user(&self.user)?;
        self.state.send_modify(|view| view.is_loading = true);
        load_into(&self.repo, user, &self.sheet_id, &self.state).await
    }

    /// Applies `patch` to `data` at once and schedules the coalesced write.
    ///
    /// Safe to call repeatedly in quick succession. If the write later fails,
    /// the failure is stored in `error` and `data` is reloaded from the
    /// store. The returned `PendingWrite` reports the same outcome.
    pub fn mutate(&self, patch: SheetPatch) -> RepoResult<PendingWrite<RepoError>> {
        let user = bound_user(&self.user)?;
        let written = self.repo.update(user, &self.sheet_id, patch.clone())?;
        self.state.send_modify(|view| {
            if let Some(sheet) = view.data.as_mut() {
                patch.apply_to(sheet, ServerTimestamp::now());
            }
        });

        let (reply, relayed) = PendingWrite::relay();
        let repo = Arc::clone(&self.repo);
        let state = Arc::clone(&self.state);
        let user = user.clone();
        let sheet_id = self.sheet_id.clone();
        tokio::spawn(async move {
            let outcome = written.await;
            match &outcome {
                Ok(_) => state.send_modify(|view| view.error = None),
                Err(err) => {
                    let message = err.to_string();
                    if let Err(reload_err) = load_into(&repo, &user, &sheet_id, &state).await {
                        warn!(
                            "event=sheet_reload module=view_model status=error user={user} sheet_id={sheet_id} error={reload_err}"
                        );
                    }
                    state.send_modify(|view| view.error = Some(message));
                }
            }
            let _ = reply.send(outcome);
        });
        Ok(relayed)
    }

    /// Applies an edit helper result, e.g. `|sheet| sheet.toggle_priority(id)`.
    /// Returns `Ok(None)` when there is no loaded sheet or the helper made no
    /// change.
    pub fn edit<F>(&self, edit: F) -> RepoResult<Option<PendingWrite<RepoError>>>
    where
        F: FnOnce(&Sheet) -> Option<SheetPatch>,
    {
        bound_user(&self.user)?;
        let patch = match self.state.borrow().data.as_ref() {
            Some(sheet) => edit(sheet),
            None => None,
        };
        patch.map(|patch| self.mutate(patch)).transpose()
    }

    /// Deletes the bound sheet and clears `data`.
    pub async fn delete(&self) -> RepoResult<()> {
        let user = bound_user(&self.user)?;
        match self.repo.delete(user, &self.sheet_id).await {
            Ok(()) => {
                self.state.send_replace(ViewState::idle());
                Ok(())
            }
            Err(err) => {
                let message = err.to_string();
                self.state.send_modify(|view| view.error = Some(message));
                Err(err)
            }
        }
    }
}

async fn load_into<S: DocumentStore>(
    repo: &SheetRepository<S>,
    user: &UserId,
    sheet_id: &SheetId,
    state: &watch::Sender<ViewState<Option<Sheet>>>,
) -> RepoResult<Option<Sheet>> {
    match repo.get(user, sheet_id).await {
        Ok(sheet) => {
            state.send_modify(|view| {
                view.data = sheet.clone();
                view.is_loading = false;
                view.error = None;
            });
            Ok(sheet)
        }
        Err(err) => {
            let message = err.to_string();
            state.send_modify(|view| {
                view.is_loading = false;
                view.error = Some(message);
            });
            Err(err)
        }
    }
}
