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
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::identity::OwnerIdentity;

/// Trait for the listeners of owner arrival and departure.
///
/// Callbacks may run on any thread, concurrently with each other.
pub trait IdentityListener: Send + Sync + 'static {
    /// Called when an owner arrives.
    #[expect(unused_variables)]
    fn on_arrived(&self, owner: &OwnerIdentity) {}

    /// Called when an owner departs.
    #[expect(unused_variables)]
    fn on_departed(&self, owner: &OwnerIdentity) {}
}

/// Registration token returned by [`IdentityEvents::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Source of owner arrival and departure signals provided by the host.
pub trait IdentityEvents: Send + Sync + 'static + Debug {
    /// Register a listener.
    fn register(&self, listener: Arc<dyn IdentityListener>) -> ListenerId;

    /// Unregister a listener. Unknown ids are ignored.
    fn unregister(&self, id: ListenerId);
}

/// An in-process [`IdentityEvents`] implementation the host can drive directly.
#[derive(Default)]
pub struct IdentityEventBus {
    listeners: RwLock<HashMap<ListenerId, Arc<dyn IdentityListener>>>,
    next: AtomicU64,
}

impl Debug for IdentityEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityEventBus")
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

impl IdentityEventBus {
    /// Create an event bus without listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal the arrival of an owner to every registered listener.
    pub fn arrive(&self, owner: &OwnerIdentity) {
        for listener in self.snapshot() {
            listener.on_arrived(owner);
        }
    }

    /// Signal the departure of an owner to every registered listener.
    pub fn depart(&self, owner: &OwnerIdentity) {
        for listener in self.snapshot() {
            listener.on_departed(owner);
        }
    }

    /// Count of registered listeners.
    pub fn listeners(&self) -> usize {
        self.listeners.read().len()
    }

    // Listeners are invoked outside of the lock, so they may (un)register themselves.
    fn snapshot(&self) -> Vec<Arc<dyn IdentityListener>> {
        self.listeners.read().values().cloned().collect()
    }
}

impl IdentityEvents for IdentityEventBus {
    fn register(&self, listener: Arc<dyn IdentityListener>) -> ListenerId {
        let id = ListenerId(self.next.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().insert(id, listener);
        id
    }

    fn unregister(&self, id: ListenerId) {
        self.listeners.write().remove(&id);
    }
}
