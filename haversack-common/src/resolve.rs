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

use std::fmt::Debug;

use hashbrown::HashMap;
use parking_lot::RwLock;
use uuid::Uuid;

/// Resolves legacy display names to UUIDs.
///
/// Lookups may block, they are only issued from the storage maintenance pass.
pub trait UuidResolver: Send + Sync + 'static + Debug {
    /// Resolve the UUID of the owner with the given display name.
    fn resolve(&self, name: &str) -> Option<Uuid>;
}

/// A [`UuidResolver`] backed by a name table, names are matched case-insensitively.
#[derive(Debug, Default)]
pub struct MapResolver {
    names: RwLock<HashMap<String, Uuid>>,
}

impl MapResolver {
    /// Create an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the UUID of a display name.
    pub fn insert(&self, name: &str, uuid: Uuid) {
        self.names.write().insert(name.to_lowercase(), uuid);
    }

    /// Builder style [`MapResolver::insert`].
    pub fn with(self, name: &str, uuid: Uuid) -> Self {
        self.insert(name, uuid);
        self
    }
}

impl UuidResolver for MapResolver {
    fn resolve(&self, name: &str) -> Option<Uuid> {
        self.names.read().get(&name.to_lowercase()).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_resolver() {
        let resolver = MapResolver::new().with("Notch", Uuid::from_u128(1));
        assert_eq!(resolver.resolve("notch"), Some(Uuid::from_u128(1)));
        assert_eq!(resolver.resolve("jeb_"), None);
    }
}
