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

//! Test utilities for storage backends.

use std::{collections::BTreeMap, time::Duration};

use futures_core::future::BoxFuture;
use futures_util::FutureExt;
use hashbrown::{HashMap, HashSet};
use haversack_common::{
    config::BackendKind,
    error::{Error, ErrorKind, Result},
    identity::OwnerIdentity,
};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::{
    backend::{Load, StorageBackend},
    payload::Payload,
    serde::{Envelope, EnvelopeSerializer},
};

/// A call observed by [`RecordingBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// `save` of the owner.
    Save(Uuid),
    /// `load` of the owner.
    Load(Uuid),
    /// `update_identity` of the owner.
    UpdateIdentity(Uuid),
    /// `backup` of the owner.
    Backup(Uuid),
    /// `maintenance`.
    Maintenance,
    /// `close`.
    Close,
}

#[derive(Debug, Default)]
struct State {
    stored: HashMap<Uuid, Envelope>,
    corrupt: HashSet<Uuid>,
    backups: BTreeMap<String, Envelope>,
    cooldowns: HashMap<Uuid, i64>,
    records: Vec<Record>,
}

/// An in-memory [`StorageBackend`] that records every call.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    serializer: EnvelopeSerializer,
    load_delay: Option<Duration>,
    update_delay: Option<Duration>,
    save_delay: Option<Duration>,
    state: Mutex<State>,
}

impl RecordingBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every load by `delay`, so concurrent requests overlap.
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = Some(delay);
        self
    }

    /// Block every `update_identity` for `delay` before it takes effect.
    pub fn with_update_delay(mut self, delay: Duration) -> Self {
        self.update_delay = Some(delay);
        self
    }

    /// Block every `save` for `delay` before it takes effect.
    pub fn with_save_delay(mut self, delay: Duration) -> Self {
        self.save_delay = Some(delay);
        self
    }

    /// Store a payload without recording a save.
    pub fn insert(&self, owner: &OwnerIdentity, payload: &Payload) {
        let envelope = self.serializer.serialize(payload).expect("serialize");
        self.state.lock().stored.insert(owner.uuid(), envelope);
    }

    /// Make loads of the owner report an unreadable payload.
    pub fn corrupt(&self, owner: &OwnerIdentity) {
        self.state.lock().corrupt.insert(owner.uuid());
    }

    /// The stored payload of the owner.
    pub fn stored(&self, owner: &OwnerIdentity) -> Option<Payload> {
        let state = self.state.lock();
        state
            .stored
            .get(&owner.uuid())
            .map(|envelope| self.serializer.open(envelope).expect("deserialize"))
    }

    /// All recorded calls, in order.
    pub fn dump(&self) -> Vec<Record> {
        self.state.lock().records.clone()
    }

    /// Number of recorded calls matching `record`.
    pub fn count(&self, record: &Record) -> usize {
        self.state.lock().records.iter().filter(|r| *r == record).count()
    }

    /// Number of loads of the owner.
    pub fn loads(&self, owner: &OwnerIdentity) -> usize {
        self.count(&Record::Load(owner.uuid()))
    }

    /// Number of saves of the owner.
    pub fn saves(&self, owner: &OwnerIdentity) -> usize {
        self.count(&Record::Save(owner.uuid()))
    }

    fn record(&self, record: Record) {
        self.state.lock().records.push(record);
    }
}

impl StorageBackend for RecordingBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::File
    }

    fn serializer(&self) -> &EnvelopeSerializer {
        &self.serializer
    }

    fn save(&self, owner: &OwnerIdentity, payload: &Payload) {
        if let Some(delay) = self.save_delay {
            std::thread::sleep(delay);
        }
        let envelope = self.serializer.serialize(payload).expect("serialize");
        let mut state = self.state.lock();
        state.stored.insert(owner.uuid(), envelope);
        state.corrupt.remove(&owner.uuid());
        state.records.push(Record::Save(owner.uuid()));
    }

    fn load(&self, owner: &OwnerIdentity) -> BoxFuture<'static, Load> {
        let uuid = owner.uuid();
        self.record(Record::Load(uuid));
        let load = {
            let state = self.state.lock();
            if state.corrupt.contains(&uuid) {
                Load::Corrupt
            } else {
                match state.stored.get(&uuid) {
                    Some(envelope) => Load::Entry(self.serializer.open(envelope).expect("deserialize")),
                    None => Load::Miss,
                }
            }
        };
        let delay = self.load_delay;
        async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            load
        }
        .boxed()
    }

    fn update_identity(&self, owner: &OwnerIdentity) {
        if let Some(delay) = self.update_delay {
            std::thread::sleep(delay);
        }
        self.record(Record::UpdateIdentity(owner.uuid()));
    }

    fn backup(&self, owner: &OwnerIdentity, envelope: &Envelope) -> Option<String> {
        let mut state = self.state.lock();
        let name = format!("{}_{}", owner.name(), state.backups.len());
        state.backups.insert(name.clone(), envelope.clone());
        state.records.push(Record::Backup(owner.uuid()));
        Some(name)
    }

    fn list_backups(&self) -> Vec<String> {
        self.state.lock().backups.keys().cloned().collect()
    }

    fn read_backup(&self, name: &str) -> Result<Payload> {
        let state = self.state.lock();
        let envelope = state
            .backups
            .get(name)
            .ok_or_else(|| Error::new(ErrorKind::NotFound, "no such backup").with_context("backup", name))?;
        self.serializer.open(envelope)
    }

    fn maintenance(&self) {
        self.record(Record::Maintenance);
    }

    fn sync_cooldown(&self, owner: &OwnerIdentity, until: i64) {
        self.state.lock().cooldowns.insert(owner.uuid(), until);
    }

    fn load_cooldown(&self, owner: &OwnerIdentity) -> BoxFuture<'static, Option<i64>> {
        let until = self.state.lock().cooldowns.get(&owner.uuid()).copied();
        async move { until }.boxed()
    }

    fn close(&self) {
        self.record(Record::Close);
    }
}
