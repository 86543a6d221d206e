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

//! Owner identities and the identifiers they are filed under.

use std::{
    fmt::Display,
    hash::{Hash, Hasher},
};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Longest display name an owner can have.
///
/// Stored identifiers up to this length are display names, longer ones are UUIDs.
pub const MAX_NAME_LEN: usize = 16;

/// Separator between the hex groups of a UUID.
pub const UUID_SEPARATOR: char = '-';

const UUID_GROUPS: [usize; 5] = [8, 4, 4, 4, 12];

/// The party owning a cached backpack.
///
/// Equality and hashing only consider the UUID, so a renamed owner still maps to the same cache entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnerIdentity {
    uuid: Uuid,
    name: String,
}

impl OwnerIdentity {
    /// Create a new owner identity.
    pub fn new(uuid: Uuid, name: impl Into<String>) -> Self {
        Self { uuid, name: name.into() }
    }

    /// The stable UUID of the owner.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// The display name of the owner at the time the identity was observed.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PartialEq for OwnerIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid
    }
}

impl Eq for OwnerIdentity {}

impl Hash for OwnerIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.uuid.hash(state);
    }
}

impl Display for OwnerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.uuid)
    }
}

/// How owners are identified in persistent storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierStyle {
    /// Owners are filed under their UUID.
    Uuid {
        /// Whether the UUID keeps its `8-4-4-4-12` separators.
        separators: bool,
    },
    /// Owners are filed under their display name.
    Name,
}

impl IdentifierStyle {
    /// Pick the style from the `use_uuids` and `use_uuid_separators` switches.
    pub fn new(use_uuids: bool, use_uuid_separators: bool) -> Self {
        if use_uuids {
            Self::Uuid {
                separators: use_uuid_separators,
            }
        } else {
            Self::Name
        }
    }

    /// The identifier the owner is stored under.
    pub fn identifier(&self, owner: &OwnerIdentity) -> String {
        match self {
            Self::Uuid { separators } => format_uuid(owner.uuid(), *separators),
            Self::Name => owner.name().to_string(),
        }
    }

    /// The formatted UUID of the owner, or `None` if owners are filed under their names.
    pub fn formatted_uuid(&self, owner: &OwnerIdentity) -> Option<String> {
        match self {
            Self::Uuid { separators } => Some(format_uuid(owner.uuid(), *separators)),
            Self::Name => None,
        }
    }

    /// Whether UUIDs keep their separators. Always `true` in name mode, which never strips anything.
    pub fn separators(&self) -> bool {
        match self {
            Self::Uuid { separators } => *separators,
            Self::Name => true,
        }
    }
}

/// Format a UUID as lowercase hex, with or without separators.
pub fn format_uuid(uuid: Uuid, separators: bool) -> String {
    if separators {
        uuid.hyphenated().to_string()
    } else {
        uuid.simple().to_string()
    }
}

/// Remove every separator from the given UUID string, keeping the remaining characters as they are.
pub fn strip_separators(s: &str) -> String {
    s.chars().filter(|c| *c != UUID_SEPARATOR).collect()
}

/// Insert separators at the `8-4-4-4-12` group boundaries, keeping the hex digits as they are.
///
/// Returns `None` if the input is not exactly 32 hex digits.
pub fn insert_separators(s: &str) -> Option<String> {
    if s.len() != 32 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let mut res = String::with_capacity(36);
    let mut offset = 0;
    for (i, len) in UUID_GROUPS.iter().enumerate() {
        if i > 0 {
            res.push(UUID_SEPARATOR);
        }
        res.push_str(&s[offset..offset + len]);
        offset += len;
    }
    Some(res)
}
