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

use futures_core::future::BoxFuture;
use futures_util::FutureExt;
use haversack_common::{
    config::{BackendKind, HaversackConfig},
    error::{Error, Result},
    identity::OwnerIdentity,
    resolve::UuidResolver,
    spawn::Spawner,
};

use crate::{
    backend::{
        file::FileBackend,
        sql::{ConnectionPool, Dialect, SqlBackend},
    },
    payload::Payload,
    serde::{Envelope, EnvelopeSerializer},
};

pub mod file;
pub mod sql;

/// Load result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Load {
    /// A stored payload was found and decoded.
    Entry(Payload),
    /// Nothing is stored for the owner.
    Miss,
    /// Something is stored for the owner but it could not be read or decoded. The cause is already logged.
    Corrupt,
}

impl Load {
    /// Return `Some` with the payload if load success, otherwise return `None`.
    pub fn entry(self) -> Option<Payload> {
        match self {
            Load::Entry(payload) => Some(payload),
            _ => None,
        }
    }

    /// Check if the load result is a miss.
    pub fn is_miss(&self) -> bool {
        matches!(self, Load::Miss)
    }

    /// Check if the stored payload is unusable.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Load::Corrupt)
    }
}

/// Persistent storage of backpacks.
///
/// Errors are logged and swallowed by the backend, except where a method returns [`Result`]. Blocking methods are
/// expected to be called off the async workers, [`StorageBackend::load`] moves its own I/O to the blocking pool.
pub trait StorageBackend: Send + Sync + 'static + Debug {
    /// The kind of this backend.
    fn kind(&self) -> BackendKind;

    /// The serializer new envelopes are written with.
    fn serializer(&self) -> &EnvelopeSerializer;

    /// Persist the payload of the owner, replacing the stored one atomically.
    fn save(&self, owner: &OwnerIdentity, payload: &Payload);

    /// Load the stored payload of the owner.
    fn load(&self, owner: &OwnerIdentity) -> BoxFuture<'static, Load>;

    /// Record the current identity of an arriving owner.
    fn update_identity(&self, owner: &OwnerIdentity);

    /// Write a new backup of the owner. Returns the backup name.
    fn backup(&self, owner: &OwnerIdentity, envelope: &Envelope) -> Option<String>;

    /// Names of all backups, without extension.
    fn list_backups(&self) -> Vec<String>;

    /// Read the backup with the given name.
    fn read_backup(&self, name: &str) -> Result<Payload>;

    /// Run the backend maintenance pass.
    fn maintenance(&self);

    /// Persist the cooldown deadline of the owner, in epoch millis.
    #[expect(unused_variables)]
    fn sync_cooldown(&self, owner: &OwnerIdentity, until: i64) {}

    /// Load the cooldown deadline of the owner, in epoch millis.
    #[expect(unused_variables)]
    fn load_cooldown(&self, owner: &OwnerIdentity) -> BoxFuture<'static, Option<i64>> {
        async { None }.boxed()
    }

    /// Release the resources of the backend.
    fn close(&self) {}
}

/// Context for building a storage backend.
#[derive(Debug, Clone)]
pub struct BackendBuildContext {
    /// Persistence configuration.
    pub config: HaversackConfig,
    /// Spawner for the blocking storage I/O.
    pub spawner: Spawner,
    /// Resolver for the legacy name migration of the file backend.
    pub resolver: Option<Arc<dyn UuidResolver>>,
    /// Pool of the mysql backend.
    pub mysql_pool: Option<Arc<dyn ConnectionPool>>,
    /// Pool of the shared backend, owned by the host.
    pub shared_pool: Option<Arc<dyn ConnectionPool>>,
}

impl BackendBuildContext {
    /// Create a build context without resolver or pools.
    pub fn new(config: HaversackConfig, spawner: Spawner) -> Self {
        Self {
            config,
            spawner,
            resolver: None,
            mysql_pool: None,
            shared_pool: None,
        }
    }
}

/// Build the backend selected by the configured database type.
///
/// Construction failures are logged at error level before they are returned, the caller should treat the persistence
/// subsystem as unavailable.
pub fn build_backend(ctx: BackendBuildContext) -> Result<Arc<dyn StorageBackend>> {
    let kind = ctx.config.backend_kind();
    tracing::info!("[storage]: opening {kind} backend");

    let res: Result<Arc<dyn StorageBackend>> = match kind {
        BackendKind::File => FileBackend::open(&ctx).map(|b| Arc::new(b) as _),
        BackendKind::Sqlite => SqlBackend::sqlite(&ctx).map(|b| Arc::new(b) as _),
        BackendKind::MySql => match ctx.mysql_pool.clone() {
            Some(pool) => SqlBackend::open(kind, pool, Dialect::MySql, &ctx).map(|b| Arc::new(b) as _),
            None => Err(Error::config("mysql backend selected without a connection pool")),
        },
        BackendKind::Shared => match ctx.shared_pool.clone() {
            Some(pool) => match Dialect::from_database_type(pool.database_type()) {
                Some(dialect) => SqlBackend::open(kind, pool, dialect, &ctx).map(|b| Arc::new(b) as _),
                None => Err(Error::config("unsupported shared database dialect")
                    .with_context("database_type", pool.database_type())),
            },
            None => Err(Error::config("shared backend selected without a shared connection pool")),
        },
    };

    if let Err(e) = &res {
        tracing::error!("[storage]: failed to open {kind} backend, persistence is unavailable: {e}");
    }
    res
}

#[cfg(test)]
mod tests {
    use haversack_common::error::ErrorKind;

    use super::*;

    fn ctx(dir: &std::path::Path, database_type: &str) -> BackendBuildContext {
        BackendBuildContext::new(
            HaversackConfig::default()
                .with_data_dir(dir)
                .with_database_type(database_type),
            Spawner::current(),
        )
    }

    #[test_log::test(tokio::test)]
    async fn test_build_selects_backend() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(build_backend(ctx(dir.path(), "flat")).unwrap().kind(), BackendKind::File);
        assert_eq!(build_backend(ctx(dir.path(), "SQLite")).unwrap().kind(), BackendKind::Sqlite);
        assert_eq!(build_backend(ctx(dir.path(), "whatever")).unwrap().kind(), BackendKind::Sqlite);
    }

    #[test_log::test(tokio::test)]
    async fn test_build_without_pool() {
        let dir = tempfile::tempdir().unwrap();
        for database_type in ["mysql", "shared"] {
            let err = build_backend(ctx(dir.path(), database_type)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Config);
        }
    }
}
