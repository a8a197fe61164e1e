//! Time-bounded in-process cache for sheet lists, sheets and settings.
//!
//! # Responsibility
//! - Hold the latest known list and per-sheet documents per user.
//! - Expire entries lazily: staleness is checked on read, never in the
//!   background.
//!
//! # Invariants
//! - An entry is fresh while `now - stored_at < ttl`.
//! - A stale entry found by `get` is removed before `get` returns.
//! - The cache never performs I/O.
//! - `TtlCache` itself is not synchronised; shared owners wrap it in
//!   `SharedCache`, and read-modify-write sequences hold that lock throughout.

use crate::model::ids::{SheetId, UserId};
use crate::model::settings::UserSettings;
use crate::model::sheet::Sheet;
use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Cache shared between the repository and the subscription manager.
pub type SharedCache = Arc<Mutex<SheetCache>>;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    data: V,
    stored_at: Instant,
}

/// Generic key/value store with lazy TTL expiry.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    ttl: Duration,
}

impl<K: Eq + Hash + Clone, V> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the value when fresh; otherwise evicts it and returns `None`.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let fresh = match self.entries.get(key) {
            Some(entry) => entry.stored_at.elapsed() < self.ttl,
            None => return None,
        };
        if !fresh {
            self.entries.remove(key);
            return None;
        }
        self.entries.get(key).map(|entry| &entry.data)
    }

    /// Stores `value` with the current time, replacing any previous entry.
    pub fn set(&mut self, key: K, value: V) {
        self.entries.insert(
            key,
            CacheEntry {
                data: value,
                stored_at: Instant::now(),
            },
        );
    }

    /// Removes one entry. Returns whether anything was removed.
    pub fn invalidate(&mut self, key: &K) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn invalidate_all(&mut self) {
        self.entries.clear();
    }

    /// Number of stored entries, including ones not yet found stale.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }
}

/// Namespace of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    SheetList,
    Sheet,
    Settings,
}

impl CacheKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::SheetList => "timeboxes",
            Self::Sheet => "timebox",
            Self::Settings => "settings",
        }
    }
}

/// `(user, kind, id?)` cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub user: UserId,
    pub kind: CacheKind,
    pub id: Option<SheetId>,
}

impl CacheKey {
    pub fn sheet_list(user: &UserId) -> Self {
        Self {
            user: user.clone(),
            kind: CacheKind::SheetList,
            id: None,
        }
    }

    pub fn sheet(user: &UserId, sheet_id: &SheetId) -> Self {
        Self {
            user: user.clone(),
            kind: CacheKind::Sheet,
            id: Some(sheet_id.clone()),
        }
    }

    pub fn settings(user: &UserId) -> Self {
        Self {
            user: user.clone(),
            kind: CacheKind::Settings,
            id: None,
        }
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{}-{}-{}", self.user, self.kind.as_str(), id),
            None => write!(f, "{}-{}", self.user, self.kind.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedValue {
    SheetList(Vec<Sheet>),
    Sheet(Sheet),
    Settings(UserSettings),
}

/// Snapshot of cache occupancy, e.g. for a diagnostics panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub size: usize,
    pub keys: Vec<String>,
}

/// Typed view over `TtlCache<CacheKey, CachedValue>`.
#[derive(Debug)]
pub struct SheetCache {
    inner: TtlCache<CacheKey, CachedValue>,
}

impl SheetCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: TtlCache::new(ttl),
        }
    }

    pub fn shared(ttl: Duration) -> SharedCache {
        Arc::new(Mutex::new(Self::new(ttl)))
    }

    pub fn sheet_list(&mut self, user: &UserId) -> Option<Vec<Sheet>> {
        match self.lookup(&CacheKey::sheet_list(user)) {
            Some(CachedValue::SheetList(sheets)) => Some(sheets.clone()),
            _ => None,
        }
    }

    pub fn set_sheet_list(&mut self, user: &UserId, sheets: Vec<Sheet>) {
        self.inner
            .set(CacheKey::sheet_list(user), CachedValue::SheetList(sheets));
    }

    pub fn sheet(&mut self, user: &UserId, sheet_id: &SheetId) -> Option<Sheet> {
        match self.lookup(&CacheKey::sheet(user, sheet_id)) {
            Some(CachedValue::Sheet(sheet)) => Some(sheet.clone()),
            _ => None,
        }
    }

    pub fn set_sheet(&mut self, user: &UserId, sheet: Sheet) {
        let key = CacheKey::sheet(user, &sheet.id);
        self.inner.set(key, CachedValue::Sheet(sheet));
    }

    pub fn settings(&mut self, user: &UserId) -> Option<UserSettings> {
        match self.lookup(&CacheKey::settings(user)) {
            Some(CachedValue::Settings(settings)) => Some(settings.clone()),
            _ => None,
        }
    }

    pub fn set_settings(&mut self, user: &UserId, settings: UserSettings) {
        self.inner
            .set(CacheKey::settings(user), CachedValue::Settings(settings));
    }

    pub fn invalidate_sheet(&mut self, user: &UserId, sheet_id: &SheetId) -> bool {
        self.invalidate(&CacheKey::sheet(user, sheet_id))
    }

    pub fn invalidate_list(&mut self, user: &UserId) -> bool {
        self.invalidate(&CacheKey::sheet_list(user))
    }

    pub fn invalidate(&mut self, key: &CacheKey) -> bool {
        let removed = self.inner.invalidate(key);
        if removed {
            debug!("event=cache_invalidate module=cache status=ok key={key}");
        }
        removed
    }

    pub fn clear(&mut self) {
        let size = self.inner.len();
        self.inner.invalidate_all();
        debug!("event=cache_clear module=cache status=ok entries={size}");
    }

    pub fn stats(&self) -> CacheStats {
        let mut keys: Vec<String> = self.inner.keys().map(ToString::to_string).collect();
        keys.sort();
        CacheStats {
            size: self.inner.len(),
            keys,
        }
    }

    fn lookup(&mut self, key: &CacheKey) -> Option<&CachedValue> {
        let value = self.inner.get(key);
        if value.is_some() {
            debug!("event=cache_hit module=cache key={key}");
        } else {
            debug!("event=cache_miss module=cache key={key}");
        }
        value
    }
}
