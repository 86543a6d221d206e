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

pub use haversack_common::{
    config::{BackendKind, DelayedConfig, EvictionConfig, HaversackConfig},
    error::{Error, ErrorKind, Result},
    event::{IdentityEventBus, IdentityEvents, IdentityListener, ListenerId},
    format::FormatVersion,
    identity::{IdentifierStyle, OwnerIdentity},
    resolve::{MapResolver, UuidResolver},
    spawn::{SpawnHandle, Spawner},
};
pub use haversack_storage::{
    BackendBuildContext, ConnectionPool, Envelope, EnvelopeSerializer, ItemRecord, Load, Payload, Row, Slot,
    SqlConnection, SqlValue, StorageBackend, DEFAULT_SLOTS,
};

pub use crate::{
    backpack::Backpack,
    builder::BackpackCacheBuilder,
    cache::{BackpackCache, CacheHandle},
    eviction::{Delayed, EvictionPolicy, OnDeparture},
};
