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

use std::path::{Path, PathBuf};

use haversack_common::{
    error::{Error, ErrorKind, Result},
    identity::{IdentifierStyle, OwnerIdentity},
};
use itertools::Itertools;

use crate::{
    fs::{read_envelope, write_new, EXT},
    payload::Payload,
    serde::{Envelope, EnvelopeSerializer},
};

/// Name of the backup directory under the data directory.
pub const BACKUP_DIR: &str = "backups";

const MAX_ATTEMPTS: usize = 64;

/// Write-once snapshots of backpacks, shared by every backend.
#[derive(Debug, Clone)]
pub struct BackupStore {
    dir: PathBuf,
    style: IdentifierStyle,
    serializer: EnvelopeSerializer,
}

impl BackupStore {
    /// Create a backup store under the given data directory. The directory is created on the first backup.
    pub fn new(data_dir: impl AsRef<Path>, style: IdentifierStyle, serializer: EnvelopeSerializer) -> Self {
        Self {
            dir: data_dir.as_ref().join(BACKUP_DIR),
            style,
            serializer,
        }
    }

    /// The backup directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Backup name of an owner snapshot taken at `millis`, without extension.
    ///
    /// The display name is omitted if it equals the identifier, ignoring case.
    pub fn backup_name(name: &str, identifier: &str, millis: i64) -> String {
        if name.eq_ignore_ascii_case(identifier) {
            format!("{identifier}_{millis}")
        } else {
            format!("{name}_{identifier}_{millis}")
        }
    }

    /// Write a new backup of the owner and return its name.
    ///
    /// Existing backups are never overwritten, a name collision moves the timestamp forward.
    pub fn write(&self, owner: &OwnerIdentity, envelope: &Envelope) -> Result<String> {
        std::fs::create_dir_all(&self.dir)?;
        let identifier = self.style.identifier(owner);
        let bytes = envelope.to_bytes();
        let mut millis = chrono::Utc::now().timestamp_millis();

        for _ in 0..MAX_ATTEMPTS {
            let name = Self::backup_name(owner.name(), &identifier, millis);
            match write_new(&self.path(&name), &bytes) {
                Ok(()) => {
                    tracing::debug!("[backup]: wrote backup {name} of {owner}");
                    return Ok(name);
                }
                Err(e) if self.path(&name).exists() => {
                    tracing::trace!("[backup]: backup {name} exists: {e}");
                    millis += 1;
                }
                Err(e) => return Err(e.with_context("backup", name)),
            }
        }

        Err(Error::new(ErrorKind::Io, "no free backup name").with_context("owner", owner))
    }

    /// Serialize the payload and write it as a new backup of the owner.
    pub fn write_payload(&self, owner: &OwnerIdentity, payload: &Payload) -> Result<String> {
        let envelope = self.serializer.serialize(payload)?;
        self.write(owner, &envelope)
    }

    /// Names of all existing backups, without extension, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };

        let mut names = vec![];
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            if let Some(name) = file_name.to_str().and_then(|s| s.strip_suffix(EXT)) {
                names.push(name.to_string());
            }
        }
        Ok(names.into_iter().sorted().collect_vec())
    }

    /// Read the backup with the given name.
    pub fn read(&self, name: &str) -> Result<Payload> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(Error::new(ErrorKind::NotFound, "invalid backup name").with_context("backup", name));
        }
        let envelope = read_envelope(&self.path(name)).map_err(|e| e.with_context("backup", name))?;
        self.serializer.open(&envelope).map_err(|e| e.with_context("backup", name))
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}{EXT}"))
    }
}

#[cfg(test)]
mod tests {
    use haversack_common::format::FormatVersion;
    use uuid::Uuid;

    use super::*;
    use crate::payload::ItemRecord;

    fn owner() -> OwnerIdentity {
        OwnerIdentity::new(Uuid::from_u128(0xaabbccdd_eeff_0011_2233_445566778899), "Alex")
    }

    #[test]
    fn test_backup_name() {
        assert_eq!(BackupStore::backup_name("Alex", "alex", 42), "alex_42");
        assert_eq!(BackupStore::backup_name("Alex", "aabb", 42), "Alex_aabb_42");
    }

    #[test_log::test]
    fn test_backup_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackupStore::new(
            dir.path(),
            IdentifierStyle::new(true, false),
            EnvelopeSerializer::new(FormatVersion::V2),
        );
        assert!(store.list().unwrap().is_empty());

        let mut payload = Payload::empty(9);
        payload.set(4, ItemRecord::new(b"torch".to_vec()));

        let a = store.write_payload(&owner(), &payload).unwrap();
        let b = store.write_payload(&owner(), &payload).unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with("Alex_aabbccddeeff00112233445566778899_"));

        let names = store.list().unwrap();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&a) && names.contains(&b));

        assert_eq!(store.read(&a).unwrap(), payload);
    }

    #[test]
    fn test_read_unknown_backup() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackupStore::new(dir.path(), IdentifierStyle::Name, EnvelopeSerializer::default());
        assert!(store.read("nobody_1").unwrap_err().is_not_found());
        assert!(store.read("../escape").unwrap_err().is_not_found());
    }
}
