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
    sync::{atomic::AtomicBool, Arc},
};

use hashbrown::HashMap;
use haversack_common::{
    config::HaversackConfig,
    error::{Error, Result},
    event::IdentityEvents,
    resolve::UuidResolver,
    spawn::Spawner,
};
use haversack_storage::{
    backend::{build_backend, sql::ConnectionPool, BackendBuildContext, StorageBackend},
    payload::DEFAULT_SLOTS,
};
use parking_lot::{Mutex, RwLock};

use crate::{
    cache::{BackpackCache, Inner},
    eviction::{build_policy, EvictionPolicy},
    inflight::InflightMap,
};

/// Backpack cache builder.
pub struct BackpackCacheBuilder {
    config: HaversackConfig,
    slots: usize,
    spawner: Option<Spawner>,
    resolver: Option<Arc<dyn UuidResolver>>,
    events: Option<Arc<dyn IdentityEvents>>,
    mysql_pool: Option<Arc<dyn ConnectionPool>>,
    shared_pool: Option<Arc<dyn ConnectionPool>>,
    backend: Option<Arc<dyn StorageBackend>>,
    policy: Option<Arc<dyn EvictionPolicy>>,
}

impl Debug for BackpackCacheBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackpackCacheBuilder")
            .field("config", &self.config)
            .field("slots", &self.slots)
            .field("backend", &self.backend)
            .field("policy", &self.policy)
            .finish()
    }
}

impl BackpackCacheBuilder {
    /// Create a builder for the given configuration.
    pub fn new(config: HaversackConfig) -> Self {
        Self {
            config,
            slots: DEFAULT_SLOTS,
            spawner: None,
            resolver: None,
            events: None,
            mysql_pool: None,
            shared_pool: None,
            backend: None,
            policy: None,
        }
    }

    /// Set the slot count of newly created backpacks.
    ///
    /// Default: [`DEFAULT_SLOTS`].
    pub fn with_slots(mut self, slots: usize) -> Self {
        self.slots = slots;
        self
    }

    /// Set the spawner for loads, blocking storage I/O and background sweeps.
    ///
    /// Default: the runtime the cache is built on.
    pub fn with_spawner(mut self, spawner: Spawner) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Set the resolver used to migrate name keyed backpack files to UUIDs.
    ///
    /// Default: No resolver, unresolvable files are left alone.
    pub fn with_resolver(mut self, resolver: Arc<dyn UuidResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Set the source of owner arrival and departure signals.
    ///
    /// Default: No source, the host drives the cache and the eviction policy directly.
    pub fn with_events(mut self, events: Arc<dyn IdentityEvents>) -> Self {
        self.events = Some(events);
        self
    }

    /// Set the connection pool of the mysql backend.
    pub fn with_mysql_pool(mut self, pool: Arc<dyn ConnectionPool>) -> Self {
        self.mysql_pool = Some(pool);
        self
    }

    /// Set the connection pool of the shared backend.
    pub fn with_shared_pool(mut self, pool: Arc<dyn ConnectionPool>) -> Self {
        self.shared_pool = Some(pool);
        self
    }

    /// Use the given backend instead of building the configured one.
    pub fn with_backend(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Use the given eviction policy instead of the configured one.
    pub fn with_eviction_policy(mut self, policy: Arc<dyn EvictionPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Build the backpack cache.
    ///
    /// Opening the backend blocks on its setup, e.g. the file migration or the sql schema creation.
    /// Call [`BackpackCache::init`] afterwards to start listening for owner events.
    pub fn build(self) -> Result<BackpackCache> {
        let spawner = match self.spawner {
            Some(spawner) => spawner,
            None => Spawner::try_current()
                .ok_or_else(|| Error::config("no spawner given and not called within a tokio runtime"))?,
        };

        let backend = match self.backend {
            Some(backend) => backend,
            None => build_backend(BackendBuildContext {
                config: self.config.clone(),
                spawner: spawner.clone(),
                resolver: self.resolver,
                mysql_pool: self.mysql_pool,
                shared_pool: self.shared_pool,
            })?,
        };
        let policy = self
            .policy
            .unwrap_or_else(|| build_policy(&self.config.effective_eviction()));

        tracing::info!(
            "[cache]: built backpack cache, backend: {}, policy: {policy:?}",
            backend.kind()
        );

        Ok(BackpackCache::new(Inner {
            backpacks: RwLock::new(HashMap::new()),
            inflight: Mutex::new(InflightMap::default()),
            backend,
            policy,
            events: self.events,
            listener: Mutex::new(None),
            spawner,
            slots: self.slots,
            prefetch: !self.config.cross_server_mode,
            closed: AtomicBool::new(false),
        }))
    }
}
