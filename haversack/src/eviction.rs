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

use std::{fmt::Debug, sync::Arc};

use haversack_common::{
    config::{DelayedConfig, EvictionConfig},
    identity::OwnerIdentity,
    spawn::SpawnHandle,
};
use parking_lot::Mutex;

use crate::cache::CacheHandle;

/// Decides when resident backpacks leave the cache.
///
/// Callbacks may run concurrently with cache lookups of the same owner. Evicting through the [`CacheHandle`] never
/// races a pending load.
pub trait EvictionPolicy: Send + Sync + 'static + Debug {
    /// Bind the policy to its cache. Called once by the cache builder.
    #[expect(unused_variables)]
    fn init(&self, cache: CacheHandle) {}

    /// Called when an owner arrives.
    #[expect(unused_variables)]
    fn on_identity_arrived(&self, owner: &OwnerIdentity) {}

    /// Called when an owner departs.
    #[expect(unused_variables)]
    fn on_identity_departed(&self, owner: &OwnerIdentity) {}

    /// Cancel pending timers. Called once by [`crate::BackpackCache::close`].
    fn close(&self) {}
}

/// Build the policy selected by the configuration.
pub fn build_policy(config: &EvictionConfig) -> Arc<dyn EvictionPolicy> {
    match config {
        EvictionConfig::OnDeparture => Arc::new(OnDeparture::default()),
        EvictionConfig::Delayed(config) => Arc::new(Delayed::new(config.clone())),
    }
}

/// Evict a backpack as soon as its owner departs.
#[derive(Debug, Default)]
pub struct OnDeparture {
    cache: Mutex<Option<CacheHandle>>,
}

impl EvictionPolicy for OnDeparture {
    fn init(&self, cache: CacheHandle) {
        *self.cache.lock() = Some(cache);
    }

    fn on_identity_departed(&self, owner: &OwnerIdentity) {
        let cache = self.cache.lock().clone();
        if let Some(cache) = cache {
            cache.evict(owner);
        }
    }

    fn close(&self) {
        self.cache.lock().take();
    }
}

/// Keep backpacks after departure and evict those idle for longer than the threshold.
///
/// Idle backpacks are swept periodically if a sweep interval is configured, and on every [`Delayed::sweep`] call.
#[derive(Debug)]
pub struct Delayed {
    config: DelayedConfig,
    cache: Mutex<Option<CacheHandle>>,
    sweeper: Mutex<Option<SpawnHandle<()>>>,
}

impl Delayed {
    /// Create the policy.
    pub fn new(config: DelayedConfig) -> Self {
        Self {
            config,
            cache: Mutex::new(None),
            sweeper: Mutex::new(None),
        }
    }

    /// Evict every backpack idle for longer than the threshold. Blocks on the saves of dirty backpacks.
    ///
    /// Returns the number of evicted backpacks.
    pub fn sweep(&self) -> usize {
        let cache = self.cache.lock().clone();
        cache.map(|cache| cache.evict_idle(self.config.threshold)).unwrap_or_default()
    }
}

impl EvictionPolicy for Delayed {
    fn init(&self, cache: CacheHandle) {
        *self.cache.lock() = Some(cache.clone());

        let Some(interval) = self.config.sweep_interval else {
            return;
        };
        let threshold = self.config.threshold;
        let spawner = cache.spawner();
        let handle = cache.spawner().spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let sweep = cache.clone();
                match spawner.spawn_blocking(move || sweep.evict_idle(threshold)).await {
                    Ok(0) => {}
                    Ok(evicted) => tracing::debug!("[eviction]: swept {evicted} idle backpacks"),
                    Err(e) => tracing::warn!("[eviction]: sweep failed: {e}"),
                }
                if !cache.is_open() {
                    break;
                }
            }
        });
        *self.sweeper.lock() = Some(handle);
    }

    fn on_identity_arrived(&self, owner: &OwnerIdentity) {
        let cache = self.cache.lock().clone();
        if let Some(cache) = cache {
            cache.touch(owner);
        }
    }

    fn close(&self) {
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.abort();
        }
        self.cache.lock().take();
    }
}

impl From<DelayedConfig> for Delayed {
    fn from(config: DelayedConfig) -> Self {
        Self::new(config)
    }
}
