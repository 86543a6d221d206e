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

use serde::{Deserialize, Serialize};

/// Default slot count of a fabricated payload, six rows of nine.
pub const DEFAULT_SLOTS: usize = 54;

/// An opaque item record. Its internal layout belongs to the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemRecord(#[serde(with = "serde_bytes")] Vec<u8>);

impl ItemRecord {
    /// Wrap raw item bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// The raw item bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Take the raw item bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

/// A slot is either empty or holds one item record.
pub type Slot = Option<ItemRecord>;

/// The in-memory contents of a backpack.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload {
    slots: Vec<Slot>,
}

impl Payload {
    /// A payload with `size` empty slots.
    pub fn empty(size: usize) -> Self {
        Self { slots: vec![None; size] }
    }

    /// Wrap an existing slot list.
    pub fn from_slots(slots: Vec<Slot>) -> Self {
        Self { slots }
    }

    /// The slot list.
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// The mutable slot list.
    pub fn slots_mut(&mut self) -> &mut Vec<Slot> {
        &mut self.slots
    }

    /// Take the slot list.
    pub fn into_slots(self) -> Vec<Slot> {
        self.slots
    }

    /// Slot count, empty slots included.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether there are no slots at all.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Whether every slot is empty.
    pub fn is_vacant(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// The item in the given slot, `None` for empty or out of range slots.
    pub fn get(&self, index: usize) -> Option<&ItemRecord> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Put an item into the given slot, growing the slot list if needed. Returns the replaced item.
    pub fn set(&mut self, index: usize, item: ItemRecord) -> Option<ItemRecord> {
        if index >= self.slots.len() {
            self.slots.resize(index + 1, None);
        }
        self.slots[index].replace(item)
    }

    /// Empty the given slot. Returns the removed item.
    pub fn take(&mut self, index: usize) -> Option<ItemRecord> {
        self.slots.get_mut(index).and_then(Option::take)
    }
}
