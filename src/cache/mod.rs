// SPDX-License-Identifier: MIT
// Copyright (c) 2025 meshstore developers

//! Concurrency-safe keyed cache with single-flight construction
//!
//! Maps string keys to refreshable entries. The key-to-slot map is guarded by
//! a short-lived std mutex that is never held across an await; each slot
//! carries its own tokio mutex, which serializes construction, refresh and
//! reads for that key. Operations on distinct keys never block each other.

use std::collections::HashMap;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::Result;

/// Capability contract for anything insertable into [`ItemCache`].
#[async_trait]
pub trait RefreshableItem: Send + 'static {
    /// Stable cache key for this entry
    fn key(&self) -> String;

    /// Refreshes only if the entry's own staleness policy says so.
    ///
    /// Returns `Ok(false)` when the data is fresh and was left untouched.
    async fn refresh_if_needed(&mut self) -> Result<bool>;

    /// Unconditionally re-fetches. On success the cached content and
    /// timestamp are replaced together; on failure both are left untouched
    /// and the wrapped error is returned.
    async fn refresh(&mut self) -> Result<()>;
}

type Slot<E> = Arc<Mutex<Option<E>>>;

/// Locked view of a cache entry; dropping it releases the per-key lock.
pub struct EntryGuard<E> {
    guard: OwnedMutexGuard<Option<E>>,
}

impl<E> Deref for EntryGuard<E> {
    type Target = E;

    fn deref(&self) -> &E {
        self.guard.as_ref().expect("guarded cache slot is populated")
    }
}

impl<E> DerefMut for EntryGuard<E> {
    fn deref_mut(&mut self) -> &mut E {
        self.guard.as_mut().expect("guarded cache slot is populated")
    }
}

/// Generic keyed cache of refreshable entries
pub struct ItemCache<E> {
    items: StdMutex<HashMap<String, Slot<E>>>,
}

impl<E> Default for ItemCache<E> {
    fn default() -> Self {
        Self {
            items: StdMutex::new(HashMap::new()),
        }
    }
}

impl<E: RefreshableItem> ItemCache<E> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the slot for `key`, inserting an empty one if absent.
    fn slot_for(&self, key: &str) -> Slot<E> {
        let mut items = self.items.lock().expect("cache map lock");
        items
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    fn slot_is_live(&self, key: &str, slot: &Slot<E>) -> bool {
        let items = self.items.lock().expect("cache map lock");
        items.get(key).is_some_and(|s| Arc::ptr_eq(s, slot))
    }

    /// Removes `key` only if it still maps to `slot`.
    fn remove_slot(&self, key: &str, slot: &Slot<E>) {
        let mut items = self.items.lock().expect("cache map lock");
        if items.get(key).is_some_and(|s| Arc::ptr_eq(s, slot)) {
            items.remove(key);
        }
    }

    /// Gets the entry for `key`, constructing it via `factory` on a miss.
    ///
    /// Single-flight: under concurrent demand for an absent key the factory
    /// runs exactly once, while the other callers wait on the slot lock and
    /// share the constructed entry. A factory failure leaves the key absent,
    /// so a later caller may retry construction.
    ///
    /// The entry is refreshed (per its own staleness policy) before the guard
    /// is handed out, so callers always observe post-refresh content. The
    /// guard holds the per-key lock until dropped.
    pub async fn get_or_create<F, Fut>(&self, key: &str, factory: F) -> Result<EntryGuard<E>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<E>> + Send,
    {
        let (slot, mut guard) = loop {
            let slot = self.slot_for(key);
            let guard = slot.clone().lock_owned().await;
            if guard.is_some() || self.slot_is_live(key, &slot) {
                break (slot, guard);
            }
            // The creator of this slot failed and removed the key while we
            // were waiting on its lock; look the key up again.
        };

        if guard.is_none() {
            tracing::debug!("cache miss for {}", key);
            match factory().await {
                Ok(entry) => *guard = Some(entry),
                Err(e) => {
                    self.remove_slot(key, &slot);
                    return Err(e);
                }
            }
        }

        if let Some(entry) = guard.as_mut() {
            entry.refresh_if_needed().await?;
        }

        Ok(EntryGuard { guard })
    }

    /// Inserts or replaces a pre-built entry under its own key.
    pub fn set(&self, entry: E) {
        let key = entry.key();
        let slot: Slot<E> = Arc::new(Mutex::new(Some(entry)));
        let mut items = self.items.lock().expect("cache map lock");
        items.insert(key, slot);
    }

    /// Non-blocking existence check; never triggers creation.
    pub fn has(&self, key: &str) -> bool {
        let items = self.items.lock().expect("cache map lock");
        items.contains_key(key)
    }

    /// Sorted snapshot of currently tracked keys.
    pub fn keys(&self) -> Vec<String> {
        let items = self.items.lock().expect("cache map lock");
        let mut keys: Vec<String> = items.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Unconditionally re-fetches the named entries, bypassing staleness.
    ///
    /// Unknown keys and slots with no constructed entry are skipped. The
    /// named entries refresh concurrently; the first failure is returned
    /// after every attempt has finished, the rest are logged.
    pub async fn refresh(&self, keys: &[String]) -> Result<()> {
        let slots: Vec<(String, Slot<E>)> = {
            let items = self.items.lock().expect("cache map lock");
            keys.iter()
                .filter_map(|k| items.get(k).map(|s| (k.clone(), s.clone())))
                .collect()
        };

        let refreshes = slots.into_iter().map(|(key, slot)| async move {
            let mut guard = slot.lock_owned().await;
            match guard.as_mut() {
                Some(entry) => {
                    tracing::debug!("refreshing cache key {}", key);
                    entry.refresh().await.map_err(|e| (key, e))
                }
                None => Ok(()),
            }
        });

        let mut first_err = None;
        for result in join_all(refreshes).await {
            if let Err((key, e)) = result {
                tracing::warn!("refreshing {} failed: {}", key, e);
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
