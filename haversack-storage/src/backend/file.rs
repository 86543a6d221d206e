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
    path::{Path, PathBuf},
    sync::Arc,
};

use futures_core::future::BoxFuture;
use futures_util::FutureExt;
use haversack_common::{
    config::BackendKind,
    error::{ErrorKind, Result},
    identity::{IdentifierStyle, OwnerIdentity},
    spawn::Spawner,
};

use crate::{
    backend::{BackendBuildContext, Load, StorageBackend},
    backup::BackupStore,
    fs::{read_envelope, write_atomic, EXT},
    migrate::IdentityMigration,
    payload::Payload,
    serde::{Envelope, EnvelopeSerializer},
};

/// Name of the backpack directory under the data directory.
pub const BACKPACK_DIR: &str = "backpacks";

#[derive(Debug)]
struct FileBackendInner {
    dir: PathBuf,
    style: IdentifierStyle,
    serializer: EnvelopeSerializer,
    backups: BackupStore,
    migration: IdentityMigration,
    spawner: Spawner,
}

/// One file per owner under `<data_dir>/backpacks`, named `<identifier>.backpack`.
#[derive(Debug, Clone)]
pub struct FileBackend {
    inner: Arc<FileBackendInner>,
}

impl FileBackend {
    /// Open the file backend.
    ///
    /// The migration pass runs on a pre-existing backpack directory, a missing one is created.
    pub fn open(ctx: &BackendBuildContext) -> Result<Self> {
        let config = &ctx.config;
        let dir = config.data_dir.join(BACKPACK_DIR);
        let style = config.identifier_style();
        let serializer = EnvelopeSerializer::new(config.format);
        let migration = IdentityMigration::new(&dir, style)
            .with_max_age(config.max_age())
            .with_resolver(ctx.resolver.clone());

        if dir.is_dir() {
            if let Err(e) = migration.run() {
                tracing::warn!("[file]: migration of {dir:?} failed: {e}");
            }
        } else {
            std::fs::create_dir_all(&dir).map_err(|e| {
                tracing::warn!("[file]: failed to create {dir:?}: {e}");
                e
            })?;
        }

        let inner = FileBackendInner {
            backups: BackupStore::new(&config.data_dir, style, serializer),
            dir,
            style,
            serializer,
            migration,
            spawner: ctx.spawner.clone(),
        };
        Ok(Self { inner: Arc::new(inner) })
    }

    /// The backpack directory.
    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    fn path(&self, owner: &OwnerIdentity) -> PathBuf {
        self.inner
            .dir
            .join(format!("{}{EXT}", self.inner.style.identifier(owner)))
    }
}

impl FileBackendInner {
    fn load(&self, path: &Path) -> Load {
        let envelope = match read_envelope(path) {
            Ok(envelope) => envelope,
            Err(e) if e.kind() == ErrorKind::NotFound => return Load::Miss,
            Err(e) => {
                tracing::warn!("[file]: failed to read {path:?}: {e}");
                return Load::Corrupt;
            }
        };
        match self.serializer.open(&envelope) {
            Ok(payload) => Load::Entry(payload),
            Err(e) => {
                tracing::warn!("[file]: failed to decode {path:?}: {e}");
                Load::Corrupt
            }
        }
    }
}

impl StorageBackend for FileBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::File
    }

    fn serializer(&self) -> &EnvelopeSerializer {
        &self.inner.serializer
    }

    fn save(&self, owner: &OwnerIdentity, payload: &Payload) {
        let path = self.path(owner);
        let res = self
            .inner
            .serializer
            .serialize(payload)
            .and_then(|envelope| write_atomic(&path, &envelope.to_bytes()));
        match res {
            Ok(()) => tracing::trace!("[file]: saved backpack of {owner}"),
            Err(e) => tracing::warn!("[file]: failed to save backpack of {owner} to {path:?}: {e}"),
        }
    }

    fn load(&self, owner: &OwnerIdentity) -> BoxFuture<'static, Load> {
        let inner = self.inner.clone();
        let path = self.path(owner);
        async move {
            let spawner = inner.spawner.clone();
            match spawner.spawn_blocking(move || inner.load(&path)).await {
                Ok(load) => load,
                Err(e) => {
                    tracing::warn!("[file]: load task failed: {e}");
                    Load::Corrupt
                }
            }
        }
        .boxed()
    }

    // Files are keyed by the identifier only, legacy names are reconciled by the migration pass.
    fn update_identity(&self, _: &OwnerIdentity) {}

    fn backup(&self, owner: &OwnerIdentity, envelope: &Envelope) -> Option<String> {
        self.inner
            .backups
            .write(owner, envelope)
            .inspect_err(|e| tracing::warn!("[file]: failed to back up {owner}: {e}"))
            .ok()
    }

    fn list_backups(&self) -> Vec<String> {
        self.inner.backups.list().unwrap_or_else(|e| {
            tracing::warn!("[file]: failed to list backups: {e}");
            vec![]
        })
    }

    fn read_backup(&self, name: &str) -> Result<Payload> {
        self.inner.backups.read(name)
    }

    fn maintenance(&self) {
        if let Err(e) = self.inner.migration.run() {
            tracing::warn!("[file]: migration of {:?} failed: {e}", self.inner.dir);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use haversack_common::{config::HaversackConfig, format::FormatVersion, resolve::MapResolver};
    use uuid::Uuid;

    use super::*;
    use crate::payload::ItemRecord;

    const UUID: u128 = 0xaabbccdd_eeff_0011_2233_445566778899;

    fn owner() -> OwnerIdentity {
        OwnerIdentity::new(Uuid::from_u128(UUID), "Alex")
    }

    fn payload() -> Payload {
        let mut payload = Payload::empty(54);
        payload.set(0, ItemRecord::new(b"compass".to_vec()));
        payload
    }

    fn ctx(config: HaversackConfig) -> BackendBuildContext {
        BackendBuildContext::new(config.with_database_type("file"), Spawner::current())
    }

    #[test_log::test(tokio::test)]
    async fn test_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::open(&ctx(HaversackConfig::default().with_data_dir(dir.path()))).unwrap();

        assert!(backend.load(&owner()).await.is_miss());

        backend.save(&owner(), &payload());
        assert!(dir
            .path()
            .join(BACKPACK_DIR)
            .join(format!("aabbccddeeff00112233445566778899{EXT}"))
            .is_file());
        assert_eq!(backend.load(&owner()).await, Load::Entry(payload()));

        let mut updated = payload();
        updated.set(1, ItemRecord::new(b"map".to_vec()));
        backend.save(&owner(), &updated);
        assert_eq!(backend.load(&owner()).await, Load::Entry(updated));
    }

    #[test_log::test(tokio::test)]
    async fn test_reads_every_format() {
        let dir = tempfile::tempdir().unwrap();
        for format in FormatVersion::ALL {
            let backend = FileBackend::open(&ctx(
                HaversackConfig::default().with_data_dir(dir.path()).with_format(format),
            ))
            .unwrap();
            backend.save(&owner(), &payload());
        }
        // The last save used the default format, read it back with a v1 writer.
        let backend = FileBackend::open(&ctx(
            HaversackConfig::default()
                .with_data_dir(dir.path())
                .with_format(FormatVersion::V1),
        ))
        .unwrap();
        assert_eq!(backend.load(&owner()).await, Load::Entry(payload()));
    }

    #[test_log::test(tokio::test)]
    async fn test_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::open(&ctx(HaversackConfig::default().with_data_dir(dir.path()))).unwrap();
        let path = backend.path(&owner());

        std::fs::write(&path, []).unwrap();
        assert!(backend.load(&owner()).await.is_corrupt());

        std::fs::write(&path, [7u8, 1, 2, 3]).unwrap();
        assert!(backend.load(&owner()).await.is_corrupt());

        std::fs::write(&path, [2u8, 1, 2, 3]).unwrap();
        assert!(backend.load(&owner()).await.is_corrupt());
    }

    #[test_log::test(tokio::test)]
    async fn test_open_migrates_existing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let backpacks = dir.path().join(BACKPACK_DIR);
        std::fs::create_dir_all(&backpacks).unwrap();

        let envelope = EnvelopeSerializer::default().serialize(&payload()).unwrap();
        std::fs::write(backpacks.join(format!("Alex{EXT}")), envelope.to_bytes()).unwrap();

        let mut ctx = ctx(HaversackConfig::default().with_data_dir(dir.path()));
        ctx.resolver = Some(Arc::new(MapResolver::new().with("Alex", Uuid::from_u128(UUID))));
        let backend = FileBackend::open(&ctx).unwrap();

        assert!(!backpacks.join(format!("Alex{EXT}")).exists());
        assert_eq!(backend.load(&owner()).await, Load::Entry(payload()));
    }

    #[test_log::test(tokio::test)]
    async fn test_maintenance_purges() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::open(&ctx(
            HaversackConfig::default()
                .with_data_dir(dir.path())
                .with_auto_cleanup_max_inactive_days(1),
        ))
        .unwrap();
        backend.save(&owner(), &payload());

        let past = std::time::SystemTime::now() - Duration::from_secs(2 * 24 * 60 * 60);
        std::fs::File::options()
            .write(true)
            .open(backend.path(&owner()))
            .unwrap()
            .set_times(std::fs::FileTimes::new().set_modified(past))
            .unwrap();

        backend.maintenance();
        assert!(backend.load(&owner()).await.is_miss());
    }

    #[test_log::test(tokio::test)]
    async fn test_backups() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::open(&ctx(HaversackConfig::default().with_data_dir(dir.path()))).unwrap();

        let envelope = backend.serializer().serialize(&payload()).unwrap();
        let name = backend.backup(&owner(), &envelope).unwrap();
        assert_eq!(backend.list_backups(), vec![name.clone()]);
        assert_eq!(backend.read_backup(&name).unwrap(), payload());
        assert!(backend.read_backup("missing").unwrap_err().is_not_found());
    }
}
