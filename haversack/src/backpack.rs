// Copyright 2026 haversack Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    fmt::Debug,
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};

use haversack_common::identity::OwnerIdentity;
use haversack_storage::payload::Payload;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};

/// A resident backpack.
///
/// Held by the cache while its owner is loaded. A reference kept past eviction still works, but changes made
/// through it are no longer persisted by the cache.
pub struct Backpack {
    owner: OwnerIdentity,
    payload: RwLock<Payload>,
    dirty: AtomicBool,
    last_access: Mutex<Instant>,
    cooldown: Mutex<Option<i64>>,
}

impl Debug for Backpack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backpack")
            .field("owner", &self.owner)
            .field("slots", &self.payload.read().len())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

impl Backpack {
    pub(crate) fn new(owner: OwnerIdentity, payload: Payload, cooldown: Option<i64>) -> Self {
        Self {
            owner,
            payload: RwLock::new(payload),
            dirty: AtomicBool::new(false),
            last_access: Mutex::new(Instant::now()),
            cooldown: Mutex::new(cooldown),
        }
    }

    /// The owner of the backpack.
    pub fn owner(&self) -> &OwnerIdentity {
        &self.owner
    }

    /// Read the payload.
    pub fn read(&self) -> RwLockReadGuard<'_, Payload> {
        self.touch();
        self.payload.read()
    }

    /// A copy of the payload.
    pub fn snapshot(&self) -> Payload {
        self.payload.read().clone()
    }

    /// Mutate the payload in place and mark the backpack dirty.
    pub fn update<R>(&self, f: impl FnOnce(&mut Payload) -> R) -> R {
        self.touch();
        let res = f(&mut *self.payload.write());
        self.dirty.store(true, Ordering::Release);
        res
    }

    /// Replace the payload and mark the backpack dirty.
    pub fn replace(&self, payload: Payload) -> Payload {
        self.update(|current| std::mem::replace(current, payload))
    }

    /// Whether the backpack changed since it was last persisted.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Clear the dirty flag, returning whether it was set.
    pub(crate) fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    /// Record an access.
    pub fn touch(&self) {
        *self.last_access.lock() = Instant::now();
    }

    /// Time since the last access.
    pub fn idle(&self) -> Duration {
        self.last_access.lock().elapsed()
    }

    /// The last known cooldown deadline, in epoch millis.
    pub fn cooldown(&self) -> Option<i64> {
        *self.cooldown.lock()
    }

    pub(crate) fn set_cooldown(&self, until: i64) {
        *self.cooldown.lock() = Some(until);
    }
}
