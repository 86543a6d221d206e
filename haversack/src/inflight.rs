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

use std::sync::Arc;

use hashbrown::hash_map::{Entry as HashMapEntry, HashMap};
use haversack_common::error::Result;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::backpack::Backpack;

pub type Notifier = oneshot::Sender<Result<Arc<Backpack>>>;
pub type Waiter = oneshot::Receiver<Result<Arc<Backpack>>>;

pub enum Enqueue {
    /// The caller is responsible for launching the load of task `id`.
    Lead(usize, Waiter),
    /// A load is already running, wait for it.
    Wait(Waiter),
}

struct InflightTask {
    id: usize,
    notifiers: Vec<Notifier>,
}

/// Pending loads and saves, one per owner.
///
/// Guarded by the cache together with its resident map, so a task is removed in the same critical section that
/// publishes its result.
#[derive(Default)]
pub struct InflightMap {
    tasks: HashMap<Uuid, InflightTask>,
    id: usize,
}

impl InflightMap {
    /// Attach a waiter to the task of the owner, creating the task if there is none.
    pub fn enqueue(&mut self, uuid: Uuid) -> Enqueue {
        let (tx, rx) = oneshot::channel();
        match self.tasks.entry(uuid) {
            HashMapEntry::Vacant(v) => {
                let id = self.id;
                v.insert(InflightTask {
                    id,
                    notifiers: vec![tx],
                });
                self.id += 1;
                Enqueue::Lead(id, rx)
            }
            HashMapEntry::Occupied(mut o) => {
                o.get_mut().notifiers.push(tx);
                Enqueue::Wait(rx)
            }
        }
    }

    /// Create a task without waiters. Returns `None` if the owner already has one.
    pub fn begin(&mut self, uuid: Uuid) -> Option<usize> {
        match self.tasks.entry(uuid) {
            HashMapEntry::Vacant(v) => {
                let id = self.id;
                v.insert(InflightTask { id, notifiers: vec![] });
                self.id += 1;
                Some(id)
            }
            HashMapEntry::Occupied(_) => None,
        }
    }

    /// Whether task `id` of the owner has waiters.
    pub fn has_waiters(&self, uuid: &Uuid, id: usize) -> bool {
        self.tasks
            .get(uuid)
            .is_some_and(|t| t.id == id && !t.notifiers.is_empty())
    }

    /// Remove task `id` of the owner and return its notifiers.
    ///
    /// Returns nothing if the owner's current task is another one.
    pub fn take(&mut self, uuid: &Uuid, id: usize) -> Vec<Notifier> {
        match self.tasks.get(uuid) {
            Some(task) if task.id == id => self.tasks.remove(uuid).map(|t| t.notifiers).unwrap_or_default(),
            _ => vec![],
        }
    }

    /// Remove every task and return all notifiers.
    pub fn drain(&mut self) -> Vec<Notifier> {
        self.tasks.drain().flat_map(|(_, t)| t.notifiers).collect()
    }
}
