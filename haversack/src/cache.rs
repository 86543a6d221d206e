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
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use hashbrown::HashMap;
use haversack_common::{
    error::{Error, ErrorKind, Result},
    event::{IdentityEvents, IdentityListener, ListenerId},
    identity::OwnerIdentity,
    spawn::Spawner,
};
use haversack_storage::{
    backend::{Load, StorageBackend},
    payload::Payload,
};
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::{
    backpack::Backpack,
    eviction::EvictionPolicy,
    inflight::{Enqueue, InflightMap},
};

pub(crate) struct Inner {
    pub(crate) backpacks: RwLock<HashMap<Uuid, Arc<Backpack>>>,
    pub(crate) inflight: Mutex<InflightMap>,
    pub(crate) backend: Arc<dyn StorageBackend>,
    pub(crate) policy: Arc<dyn EvictionPolicy>,
    pub(crate) events: Option<Arc<dyn IdentityEvents>>,
    pub(crate) listener: Mutex<Option<ListenerId>>,
    pub(crate) spawner: Spawner,
    pub(crate) slots: usize,
    pub(crate) prefetch: bool,
    pub(crate) closed: AtomicBool,
}

impl Inner {
    fn cached(&self, uuid: &Uuid) -> Option<Arc<Backpack>> {
        self.backpacks.read().get(uuid).cloned()
    }

    fn launch(self: &Arc<Self>, owner: OwnerIdentity, id: usize) {
        let inner = self.clone();
        self.spawner.spawn(async move {
            let payload = match inner.backend.load(&owner).await {
                Load::Entry(payload) => payload,
                Load::Miss => {
                    tracing::debug!("[cache]: no backpack stored for {owner}, creating an empty one");
                    Payload::empty(inner.slots)
                }
                Load::Corrupt => {
                    tracing::warn!("[cache]: stored backpack of {owner} is unusable, creating an empty one");
                    Payload::empty(inner.slots)
                }
            };
            let cooldown = inner.backend.load_cooldown(&owner).await;
            let backpack = Arc::new(Backpack::new(owner.clone(), payload, cooldown));

            let uuid = owner.uuid();
            let (notifiers, res) = {
                let mut inflight = inner.inflight.lock();
                let res = if inner.closed.load(Ordering::Acquire) {
                    tracing::debug!("[cache]: discard backpack of {owner} loaded after close");
                    Err(Error::closed())
                } else {
                    Ok(inner.backpacks.write().entry(uuid).or_insert(backpack).clone())
                };
                (inflight.take(&uuid, id), res)
            };
            for notifier in notifiers {
                let _ = notifier.send(res.clone());
            }
        });
    }

    /// Persist a dirty backpack and remove it, holding an inflight task so lookups wait for the save.
    fn evict(self: &Arc<Self>, owner: &OwnerIdentity) -> bool {
        let uuid = owner.uuid();
        let (backpack, id) = {
            let mut inflight = self.inflight.lock();
            if self.closed.load(Ordering::Acquire) {
                return false;
            }
            let Some(backpack) = self.backpacks.write().remove(&uuid) else {
                return false;
            };
            if !backpack.is_dirty() {
                tracing::trace!("[cache]: evicted clean backpack of {owner}");
                return true;
            }
            // A resident backpack never has an inflight task.
            let id = inflight.begin(uuid);
            (backpack, id)
        };

        if backpack.take_dirty() {
            self.backend.save(backpack.owner(), &backpack.snapshot());
        }
        tracing::trace!("[cache]: evicted backpack of {owner}");

        if let Some(id) = id {
            let mut inflight = self.inflight.lock();
            if inflight.has_waiters(&uuid, id) && !self.closed.load(Ordering::Acquire) {
                drop(inflight);
                self.launch(backpack.owner().clone(), id);
            } else {
                for notifier in inflight.take(&uuid, id) {
                    let _ = notifier.send(Err(Error::closed()));
                }
            }
        }
        true
    }
}

/// A weak handle to a [`BackpackCache`] for eviction policies.
#[derive(Clone)]
pub struct CacheHandle {
    inner: Weak<Inner>,
    spawner: Spawner,
}

impl Debug for CacheHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheHandle").field("open", &self.is_open()).finish()
    }
}

impl CacheHandle {
    /// Evict the backpack of the owner, persisting it first if dirty. Blocks on the save.
    ///
    /// Returns whether the owner was resident.
    pub fn evict(&self, owner: &OwnerIdentity) -> bool {
        self.inner.upgrade().is_some_and(|inner| inner.evict(owner))
    }

    /// Evict every backpack idle for longer than `threshold`. Blocks on the saves.
    ///
    /// Returns the number of evicted backpacks.
    pub fn evict_idle(&self, threshold: Duration) -> usize {
        let Some(inner) = self.inner.upgrade() else {
            return 0;
        };
        let idle = inner
            .backpacks
            .read()
            .values()
            .filter(|b| b.idle() > threshold)
            .map(|b| b.owner().clone())
            .collect::<Vec<_>>();
        idle.iter().filter(|owner| inner.evict(owner)).count()
    }

    /// Record an access to the backpack of the owner, if resident.
    pub fn touch(&self, owner: &OwnerIdentity) {
        if let Some(backpack) = self.inner.upgrade().and_then(|inner| inner.cached(&owner.uuid())) {
            backpack.touch();
        }
    }

    /// The spawner of the cache.
    pub fn spawner(&self) -> Spawner {
        self.spawner.clone()
    }

    /// Whether the cache is alive and not closed.
    pub fn is_open(&self) -> bool {
        self.inner
            .upgrade()
            .is_some_and(|inner| !inner.closed.load(Ordering::Acquire))
    }
}

struct CacheListener {
    inner: Weak<Inner>,
}

impl IdentityListener for CacheListener {
    fn on_arrived(&self, owner: &OwnerIdentity) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        if inner.closed.load(Ordering::Acquire) {
            return;
        }

        // The prefetch must see the reconciled identity, so it runs after the update completes.
        let cache = BackpackCache { inner: inner.clone() };
        let arrived = owner.clone();
        inner.spawner.spawn(async move {
            let backend = cache.inner.backend.clone();
            let owner = arrived.clone();
            if let Err(e) = cache
                .inner
                .spawner
                .spawn_blocking(move || backend.update_identity(&owner))
                .await
            {
                tracing::warn!("[cache]: identity update of {arrived} failed: {e}");
            }
            if cache.inner.prefetch {
                if let Err(e) = cache.fetch(&arrived).await {
                    tracing::debug!("[cache]: prefetch of {arrived} skipped: {e}");
                }
            }
        });
        inner.policy.on_identity_arrived(owner);
    }

    fn on_departed(&self, owner: &OwnerIdentity) {
        if let Some(inner) = self.inner.upgrade() {
            inner.policy.on_identity_departed(owner);
        }
    }
}

/// The backpack cache.
///
/// Keeps at most one resident backpack per owner and loads missing ones from the storage backend, with at most one
/// load per owner in flight.
#[derive(Clone)]
pub struct BackpackCache {
    inner: Arc<Inner>,
}

impl Debug for BackpackCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackpackCache")
            .field("backend", &self.inner.backend)
            .field("policy", &self.inner.policy)
            .field("resident", &self.inner.backpacks.read().len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl BackpackCache {
    pub(crate) fn new(inner: Inner) -> Self {
        let cache = Self { inner: Arc::new(inner) };
        cache.inner.policy.init(cache.handle());
        cache
    }

    /// A weak handle to the cache.
    pub fn handle(&self) -> CacheHandle {
        CacheHandle {
            inner: Arc::downgrade(&self.inner),
            spawner: self.inner.spawner.clone(),
        }
    }

    /// The storage backend.
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.inner.backend
    }

    /// The eviction policy.
    pub fn policy(&self) -> &Arc<dyn EvictionPolicy> {
        &self.inner.policy
    }

    /// Register with the identity event source, if one is configured.
    pub fn init(&self) {
        let Some(events) = self.inner.events.as_ref() else {
            return;
        };
        let mut listener = self.inner.listener.lock();
        if listener.is_some() || self.is_closed() {
            return;
        }
        let id = events.register(Arc::new(CacheListener {
            inner: Arc::downgrade(&self.inner),
        }));
        *listener = Some(id);
        tracing::info!("[cache]: listening for owner arrivals and departures");
    }

    /// The resident backpack of the owner. Never touches storage.
    pub fn get_cached(&self, owner: &OwnerIdentity) -> Option<Arc<Backpack>> {
        self.inner.cached(&owner.uuid())
    }

    /// The backpack of the owner, loading it or creating an empty one if it is not resident.
    ///
    /// Concurrent calls for the same owner share one load. Fails only if the cache is closed.
    pub async fn fetch(&self, owner: &OwnerIdentity) -> Result<Arc<Backpack>> {
        let uuid = owner.uuid();
        if let Some(backpack) = self.inner.cached(&uuid) {
            backpack.touch();
            return Ok(backpack);
        }

        let waiter = {
            let mut inflight = self.inner.inflight.lock();
            if self.is_closed() {
                return Err(Error::closed());
            }
            // Loads publish under the inflight lock, check again.
            if let Some(backpack) = self.inner.cached(&uuid) {
                return Ok(backpack);
            }
            match inflight.enqueue(uuid) {
                Enqueue::Lead(id, waiter) => {
                    tracing::trace!("[cache]: load backpack of {owner}");
                    self.inner.launch(owner.clone(), id);
                    waiter
                }
                Enqueue::Wait(waiter) => waiter,
            }
        };

        match waiter.await {
            Ok(res) => res,
            Err(e) => Err(Error::new(ErrorKind::Closed, "backpack load was dropped").with_source(e)),
        }
    }

    /// Call `on_ready` with the backpack of the owner.
    ///
    /// A resident backpack is handed over before this returns. Otherwise it is loaded or created in the background
    /// and `on_ready` runs on a runtime worker. `on_ready` is not called if the cache closes in between.
    pub fn get_or_load<F>(&self, owner: &OwnerIdentity, on_ready: F)
    where
        F: FnOnce(Arc<Backpack>) + Send + 'static,
    {
        if let Some(backpack) = self.get_cached(owner) {
            backpack.touch();
            on_ready(backpack);
            return;
        }

        let cache = self.clone();
        let owner = owner.clone();
        self.inner.spawner.spawn(async move {
            match cache.fetch(&owner).await {
                Ok(backpack) => on_ready(backpack),
                Err(e) => tracing::debug!("[cache]: backpack of {owner} is unavailable: {e}"),
            }
        });
    }

    /// Drop the resident backpack of the owner without persisting it.
    pub fn unload(&self, owner: &OwnerIdentity) -> Option<Arc<Backpack>> {
        let _inflight = self.inner.inflight.lock();
        self.inner.backpacks.write().remove(&owner.uuid())
    }

    /// Persist the backpack. Blocks on the backend.
    pub fn save(&self, backpack: &Backpack) {
        backpack.take_dirty();
        self.inner.backend.save(backpack.owner(), &backpack.snapshot());
    }

    /// Persist the backpack and write a backup of it. Blocks on the backend.
    ///
    /// Returns the backup name.
    pub fn backup(&self, backpack: &Backpack) -> Option<String> {
        let payload = backpack.snapshot();
        backpack.take_dirty();
        self.inner.backend.save(backpack.owner(), &payload);
        match self.inner.backend.serializer().serialize(&payload) {
            Ok(envelope) => self.inner.backend.backup(backpack.owner(), &envelope),
            Err(e) => {
                tracing::warn!("[cache]: failed to serialize backup of {}: {e}", backpack.owner());
                None
            }
        }
    }

    /// Names of all backups.
    pub fn list_backups(&self) -> Vec<String> {
        self.inner.backend.list_backups()
    }

    /// Read the backup with the given name.
    pub fn load_backup(&self, name: &str) -> Option<Payload> {
        match self.inner.backend.read_backup(name) {
            Ok(payload) => Some(payload),
            Err(e) if e.is_not_found() => {
                tracing::debug!("[cache]: no backup named {name}");
                None
            }
            Err(e) => {
                tracing::warn!("[cache]: failed to read backup {name}: {e}");
                None
            }
        }
    }

    /// Replace the contents of the backpack with the backup with the given name.
    ///
    /// The backpack is marked dirty, it is persisted by the next save.
    pub fn restore(&self, name: &str, backpack: &Backpack) -> Result<()> {
        let payload = self.inner.backend.read_backup(name)?;
        backpack.replace(payload);
        tracing::info!("[cache]: restored backup {name} into the backpack of {}", backpack.owner());
        Ok(())
    }

    /// All resident backpacks.
    pub fn loaded(&self) -> Vec<Arc<Backpack>> {
        self.inner.backpacks.read().values().cloned().collect()
    }

    /// Set and persist the cooldown deadline of the owner, in epoch millis. Blocks on the backend.
    pub fn sync_cooldown(&self, owner: &OwnerIdentity, until: i64) {
        if let Some(backpack) = self.get_cached(owner) {
            backpack.set_cooldown(until);
        }
        self.inner.backend.sync_cooldown(owner, until);
    }

    /// The cooldown deadline of the owner, from the resident backpack or else from storage.
    pub async fn cooldown(&self, owner: &OwnerIdentity) -> Option<i64> {
        match self.get_cached(owner) {
            Some(backpack) => backpack.cooldown(),
            None => self.inner.backend.load_cooldown(owner).await,
        }
    }

    /// Whether [`BackpackCache::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Shut the cache down. Blocks on the saves of dirty backpacks.
    ///
    /// Unregisters from the event source, persists and drops every resident backpack and closes the eviction policy
    /// and the backend. Pending loads are discarded, later loads fail with [`ErrorKind::Closed`].
    pub fn close(&self) {
        let pending = {
            let mut inflight = self.inner.inflight.lock();
            if self.inner.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            inflight.drain()
        };
        for notifier in pending {
            let _ = notifier.send(Err(Error::closed()));
        }

        if let (Some(events), Some(id)) = (self.inner.events.as_ref(), self.inner.listener.lock().take()) {
            events.unregister(id);
        }
        self.inner.policy.close();

        let backpacks = self.inner.backpacks.write().drain().map(|(_, b)| b).collect::<Vec<_>>();
        let mut saved = 0;
        for backpack in &backpacks {
            if backpack.take_dirty() {
                self.inner.backend.save(backpack.owner(), &backpack.snapshot());
                saved += 1;
            }
        }
        self.inner.backend.close();
        tracing::info!(
            "[cache]: closed, released {} backpacks, saved {saved}",
            backpacks.len()
        );
    }
}
