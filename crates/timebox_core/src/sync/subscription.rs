//! Live sheet-list subscriptions.
//!
//! # Responsibility
//! - Maintain at most one live collection subscription per user.
//! - Replace the cached sheet list with every snapshot and forward it to the
//!   observer.
//!
//! # Invariants
//! - State moves `Idle -> Subscribing -> Live -> Closed`; `Closed` is final.
//! - Observers run while the subscription's state lock is held, so once
//!   `unsubscribe` returns no further observer call starts. `unsubscribe` is
//!   idempotent and may be called from inside the observer.
//! - Subscribing again for the same user closes the previous subscription
//!   first.
//! - Lock order is state before cache or registry. The registry lock is never
//!   held while closing a subscription.

use crate::cache::SharedCache;
use crate::model::ids::UserId;
use crate::model::sheet::Sheet;
use crate::store::codec::sheet_from_stored;
use crate::store::{CollectionPath, DocumentStore, OrderBy, StoredDocument};
use log::{debug, info, warn};
use parking_lot::{Mutex, ReentrantMutex};
use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;

/// Callback receiving each ordered sheet list.
pub type SheetListObserver = Arc<dyn Fn(&[Sheet]) + Send + Sync>;

type Registry = Mutex<HashMap<UserId, Arc<SubscriptionShared>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Idle,
    Subscribing,
    Live,
    Closed,
}

struct SubscriptionShared {
    id: u64,
    user: UserId,
    state: ReentrantMutex<Cell<SubscriptionState>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SubscriptionShared {
    fn state(&self) -> SubscriptionState {
        self.state.lock().get()
    }

    /// Runs `observer` unless closed. Returns `false` when closed.
    fn deliver(&self, observer: &SheetListObserver, sheets: &[Sheet]) -> bool {
        let state = self.state.lock();
        if state.get() == SubscriptionState::Closed {
            return false;
        }
        observer(sheets);
        true
    }

    /// Marks the subscription closed and stops its feed task. Returns whether
    /// this call did the closing.
    fn close(&self) -> bool {
        {
            let state = self.state.lock();
            if state.get() == SubscriptionState::Closed {
                return false;
            }
            state.set(SubscriptionState::Closed);
        }
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        true
    }
}

/// Returned by `SubscriptionManager::subscribe`.
pub struct SubscriptionHandle {
    shared: Arc<SubscriptionShared>,
    registry: Weak<Registry>,
}

impl SubscriptionHandle {
    pub fn user(&self) -> &UserId {
        &self.shared.user
    }

    pub fn state(&self) -> SubscriptionState {
        self.shared.state()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SubscriptionState::Closed
    }

    /// Stops delivery and releases the underlying store subscription.
    pub fn unsubscribe(&self) {
        if self.shared.close() {
            info!(
                "event=subscription_close module=subscription status=ok user={} sub_id={}",
                self.shared.user, self.shared.id
            );
        }
        if let Some(registry) = self.registry.upgrade() {
            release(&registry, &self.shared);
        }
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("user", &self.shared.user)
            .field("id", &self.shared.id)
            .field("state", &self.shared.state())
            .finish()
    }
}

/// Owns the per-user live subscriptions.
pub struct SubscriptionManager<S: DocumentStore> {
    store: Arc<S>,
    cache: SharedCache,
    active: Arc<Registry>,
    next_id: AtomicU64,
}

impl<S: DocumentStore> SubscriptionManager<S> {
    pub fn new(store: Arc<S>, cache: SharedCache) -> Self {
        Self {
            store,
            cache,
            active: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Starts a live subscription to `user`'s sheet list ordered by date
    /// descending.
    ///
    /// A warm cached list is delivered to `on_update` before this returns.
    /// Must be called from within a tokio runtime.
    pub fn subscribe<F>(&self, user: &UserId, on_update: F) -> SubscriptionHandle
    where
        F: Fn(&[Sheet]) + Send + Sync + 'static,
    {
        let observer: SheetListObserver = Arc::new(on_update);

        let previous = self.active.lock().remove(user);
        if let Some(previous) = previous {
            if previous.close() {
                debug!(
                    "event=subscription_replace module=subscription user={user} sub_id={}",
                    previous.id
                );
            }
        }

        let shared = Arc::new(SubscriptionShared {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            user: user.clone(),
            state: ReentrantMutex::new(Cell::new(SubscriptionState::Idle)),
            task: Mutex::new(None),
        });

        let cached = self.cache.lock().sheet_list(user);
        if let Some(cached) = cached {
            debug!(
                "event=subscription_replay module=subscription user={user} count={}",
                cached.len()
            );
            shared.deliver(&observer, &cached);
        }

        {
            let state = shared.state.lock();
            if state.get() == SubscriptionState::Idle {
                state.set(SubscriptionState::Subscribing);
            }
        }
        self.active.lock().insert(user.clone(), Arc::clone(&shared));

        let task = tokio::spawn(run_feed(
            Arc::clone(&self.store),
            Arc::clone(&self.cache),
            Arc::clone(&shared),
            Arc::downgrade(&self.active),
            observer,
        ));
        *shared.task.lock() = Some(task);
        // The observer may have unsubscribed during the replay above.
        if shared.state() == SubscriptionState::Closed {
            if let Some(task) = shared.task.lock().take() {
                task.abort();
            }
        }

        info!(
            "event=subscription_open module=subscription status=start user={user} sub_id={}",
            shared.id
        );
        SubscriptionHandle {
            shared,
            registry: Arc::downgrade(&self.active),
        }
    }

    /// Starts a subscription without an observer when `user` has none, so
    /// the cached list keeps tracking the store. Returns whether one was
    /// started.
    pub fn ensure_live(&self, user: &UserId) -> bool {
        if self.is_active(user) {
            return false;
        }
        let _handle = self.subscribe(user, |_| {});
        true
    }

    pub fn is_active(&self, user: &UserId) -> bool {
        self.active.lock().contains_key(user)
    }

    pub fn state(&self, user: &UserId) -> Option<SubscriptionState> {
        let shared = self.active.lock().get(user).cloned();
        shared.map(|shared| shared.state())
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Closes every subscription, e.g. on sign-out.
    pub fn unsubscribe_all(&self) {
        let drained: Vec<Arc<SubscriptionShared>> =
            self.active.lock().drain().map(|(_, shared)| shared).collect();
        for shared in drained {
            shared.close();
        }
    }
}

impl<S: DocumentStore> Drop for SubscriptionManager<S> {
    fn drop(&mut self) {
        self.unsubscribe_all();
    }
}

async fn run_feed<S: DocumentStore>(
    store: Arc<S>,
    cache: SharedCache,
    shared: Arc<SubscriptionShared>,
    registry: Weak<Registry>,
    observer: SheetListObserver,
) {
    let path = CollectionPath::sheets(&shared.user);
    let mut feed = match store
        .subscribe_collection(&path, &OrderBy::desc("date"))
        .await
    {
        Ok(feed) => feed,
        Err(err) => {
            warn!(
                "event=subscription_open module=subscription status=error user={} error={err}",
                shared.user
            );
            shared.close();
            if let Some(registry) = registry.upgrade() {
                release(&registry, &shared);
            }
            return;
        }
    };

    while let Some(snapshot) = feed.next_snapshot().await {
        let documents = match snapshot {
            Ok(documents) => documents,
            Err(err) => {
                warn!(
                    "event=subscription_snapshot module=subscription status=error user={} error={err}",
                    shared.user
                );
                continue;
            }
        };
        let sheets = decode_snapshot(&shared.user, documents);

        let state = shared.state.lock();
        if state.get() == SubscriptionState::Closed {
            break;
        }
        cache.lock().set_sheet_list(&shared.user, sheets.clone());
        if state.get() != SubscriptionState::Live {
            state.set(SubscriptionState::Live);
            info!(
                "event=subscription_live module=subscription status=ok user={} sub_id={}",
                shared.user, shared.id
            );
        }
        debug!(
            "event=subscription_snapshot module=subscription status=ok user={} count={}",
            shared.user,
            sheets.len()
        );
        observer(&sheets);
    }

    feed.close();
    if shared.close() {
        info!(
            "event=subscription_close module=subscription status=ended user={} sub_id={}",
            shared.user, shared.id
        );
    }
    if let Some(registry) = registry.upgrade() {
        release(&registry, &shared);
    }
}

/// Skips documents that no longer decode instead of dropping the snapshot.
fn decode_snapshot(user: &UserId, documents: Vec<StoredDocument>) -> Vec<Sheet> {
    documents
        .into_iter()
        .filter_map(|document| {
            let id = document.id.clone();
            match sheet_from_stored(document) {
                Ok(sheet) => Some(sheet),
                Err(err) => {
                    warn!(
                        "event=subscription_decode module=subscription status=error user={user} doc_id={id} error={err}"
                    );
                    None
                }
            }
        })
        .collect()
}

fn release(registry: &Registry, shared: &Arc<SubscriptionShared>) {
    let mut active = registry.lock();
    if active
        .get(&shared.user)
        .is_some_and(|current| Arc::ptr_eq(current, shared))
    {
        active.remove(&shared.user);
    }
}
