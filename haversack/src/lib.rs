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

//! haversack - a per-owner persistent object cache.
//!
//! Backpacks are slot arrays of opaque item records owned by an identity. The [`BackpackCache`] keeps the backpacks
//! of present owners in memory, loads them from a pluggable [`StorageBackend`] on demand and persists them when the
//! [`EvictionPolicy`] lets them go.

mod backpack;
mod builder;
mod cache;
mod eviction;
mod inflight;

/// Commonly used types.
pub mod prelude;

pub use haversack_common as common;
pub use haversack_storage as storage;

pub use crate::{
    backpack::Backpack,
    builder::BackpackCacheBuilder,
    cache::{BackpackCache, CacheHandle},
    eviction::{build_policy, Delayed, EvictionPolicy, OnDeparture},
};
