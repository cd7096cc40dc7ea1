// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-key exclusive leases.
//!
//! The controller holds the lease for an instance from the moment it reads
//! the instance's current state until the transition it requested has
//! settled, so at most one desired write per instance is ever outstanding.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Held while a transition on the keyed resource is in flight; dropping it
/// releases the key.
#[derive(Debug)]
pub struct Lease {
    _guard: OwnedMutexGuard<()>,
}

#[derive(Debug)]
pub struct LeaseMap<K: Ord> {
    leases: Mutex<BTreeMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K: Ord + Clone> LeaseMap<K> {
    pub fn new() -> Self {
        Self { leases: Mutex::new(BTreeMap::new()) }
    }

    fn slot(&self, key: &K) -> Arc<AsyncMutex<()>> {
        let mut leases = self.leases.lock().unwrap();

        // Forget idle slots so the map does not grow with every instance ever
        // touched. A slot is idle when only the map references it.
        leases.retain(|k, slot| k == key || Arc::strong_count(slot) > 1);

        leases.entry(key.clone()).or_default().clone()
    }

    /// Waits until `key` is free, then takes it.
    pub async fn acquire(&self, key: &K) -> Lease {
        let slot = self.slot(key);
        Lease { _guard: slot.lock_owned().await }
    }

    /// Takes `key` only if nobody holds it.
    pub fn try_acquire(&self, key: &K) -> Option<Lease> {
        let slot = self.slot(key);
        slot.try_lock_owned().ok().map(|guard| Lease { _guard: guard })
    }

    /// Number of keys with a live slot.
    pub fn len(&self) -> usize {
        self.leases.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Ord + Clone> Default for LeaseMap<K> {
    fn default() -> Self {
        Self::new()
    }
}
