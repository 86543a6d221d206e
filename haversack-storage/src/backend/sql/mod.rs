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

//! SQL backends.
//!
//! The embedded SQLite backend owns its database file. The MySQL and shared backends talk through a
//! [`ConnectionPool`] wired by the host.

use std::{fmt::Debug, sync::Arc, time::Duration};

use futures_core::future::BoxFuture;
use futures_util::FutureExt;
use haversack_common::{
    config::BackendKind,
    error::{Error, ErrorKind, Result},
    identity::{IdentifierStyle, OwnerIdentity},
    spawn::Spawner,
};

use crate::{
    backend::{BackendBuildContext, Load, StorageBackend},
    backup::BackupStore,
    payload::Payload,
    serde::{Envelope, EnvelopeSerializer},
};

mod dialect;
mod sqlite;

pub use dialect::{Dialect, Statements};
pub use sqlite::{sqlite_error, SqlitePool};

/// File name of the embedded database under the data directory.
pub const SQLITE_FILE: &str = "backpack.db";

/// A value bound to or read from a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// `NULL`.
    Null,
    /// Integer value.
    Integer(i64),
    /// Floating point value.
    Real(f64),
    /// Text value.
    Text(String),
    /// Binary value.
    Blob(Vec<u8>),
}

impl SqlValue {
    /// The integer value, if any.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// The text value, if any.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// The binary value, if any.
    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            SqlValue::Blob(b) => Some(b.as_slice()),
            _ => None,
        }
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::Text(s.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        SqlValue::Text(s)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(b: Vec<u8>) -> Self {
        SqlValue::Blob(b)
    }
}

/// A result row.
pub type Row = Vec<SqlValue>;

/// A checked out database connection. Statements use `?` placeholders.
pub trait SqlConnection {
    /// Execute a statement, returning the number of affected rows.
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<usize>;

    /// Run a query, returning all result rows.
    fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>>;
}

/// A source of database connections.
pub trait ConnectionPool: Send + Sync + 'static + Debug {
    /// The database type behind the pool, e.g. `sqlite` or `mysql`.
    fn database_type(&self) -> &str;

    /// Check out a connection. It is returned to the pool when dropped.
    fn connection(&self) -> Result<Box<dyn SqlConnection + '_>>;
}

#[derive(Debug)]
struct SqlBackendInner {
    kind: BackendKind,
    pool: Arc<dyn ConnectionPool>,
    statements: Statements,
    style: IdentifierStyle,
    serializer: EnvelopeSerializer,
    backups: BackupStore,
    max_age: Option<Duration>,
    spawner: Spawner,
}

/// Backpacks stored in `<prefix>backpacks`, identities in `<prefix>players` and cooldowns in `<prefix>cooldowns`.
#[derive(Debug, Clone)]
pub struct SqlBackend {
    inner: Arc<SqlBackendInner>,
}

impl SqlBackend {
    /// Open the embedded SQLite backend at `<data_dir>/backpack.db`.
    pub fn sqlite(ctx: &BackendBuildContext) -> Result<Self> {
        std::fs::create_dir_all(&ctx.config.data_dir)?;
        let pool = SqlitePool::open(ctx.config.data_dir.join(SQLITE_FILE))?;
        Self::open(BackendKind::Sqlite, Arc::new(pool), Dialect::Sqlite, ctx)
    }

    /// Open a sql backend on the given pool. Creates missing tables and purges inactive rows.
    pub fn open(
        kind: BackendKind,
        pool: Arc<dyn ConnectionPool>,
        dialect: Dialect,
        ctx: &BackendBuildContext,
    ) -> Result<Self> {
        let config = &ctx.config;
        let statements = Statements::new(dialect, &config.table_prefix);
        {
            let mut conn = pool.connection()?;
            for sql in &statements.create {
                conn.execute(sql, &[])?;
            }
        }

        let style = config.identifier_style();
        let serializer = EnvelopeSerializer::new(config.format);
        let inner = SqlBackendInner {
            kind,
            pool,
            statements,
            style,
            serializer,
            backups: BackupStore::new(&config.data_dir, style, serializer),
            max_age: config.max_age(),
            spawner: ctx.spawner.clone(),
        };
        let backend = Self { inner: Arc::new(inner) };
        backend.maintenance();
        Ok(backend)
    }
}

impl SqlBackendInner {
    fn save(&self, owner: &OwnerIdentity, payload: &Payload) -> Result<()> {
        let envelope = self.serializer.serialize(payload)?;
        let mut conn = self.pool.connection()?;
        conn.execute(
            &self.statements.upsert_backpack,
            &[
                self.style.identifier(owner).into(),
                envelope.body().to_vec().into(),
                i64::from(envelope.version()).into(),
                chrono::Utc::now().timestamp_millis().into(),
            ],
        )?;
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Payload>> {
        let mut conn = self.pool.connection()?;
        let rows = conn.query(&self.statements.select_backpack, &[key.into()])?;
        let Some(row) = rows.into_iter().next() else {
            return Ok(None);
        };
        let (Some(body), Some(version)) = (
            row.first().and_then(SqlValue::as_blob),
            row.get(1).and_then(SqlValue::as_integer),
        ) else {
            return Err(Error::new(ErrorKind::Decode, "malformed backpack row"));
        };
        let version = u8::try_from(version).map_err(|_| {
            Error::new(ErrorKind::Decode, "unrecognized format version").with_context("version", version)
        })?;
        self.serializer.deserialize(body, version).map(Some)
    }

    fn update_identity(&self, owner: &OwnerIdentity) -> Result<()> {
        let key = self.style.identifier(owner);
        let uuid = owner.uuid().hyphenated().to_string();
        let mut conn = self.pool.connection()?;

        // Owners filed by name move their rows along when they are seen under a new name.
        if self.style == IdentifierStyle::Name {
            let rows = conn.query(&self.statements.select_player_by_uuid, &[uuid.as_str().into()])?;
            for old in rows.iter().filter_map(|row| row.first().and_then(SqlValue::as_text)) {
                if old == key {
                    continue;
                }
                tracing::debug!("[sql]: {owner} was renamed from {old}");
                conn.execute(&self.statements.rename_backpack, &[key.as_str().into(), old.into()])?;
                conn.execute(&self.statements.rename_cooldown, &[key.as_str().into(), old.into()])?;
                conn.execute(&self.statements.delete_player, &[old.into()])?;
            }
        }

        conn.execute(
            &self.statements.upsert_player,
            &[key.into(), owner.name().into(), uuid.into()],
        )?;
        Ok(())
    }

    fn sync_cooldown(&self, owner: &OwnerIdentity, until: i64) -> Result<()> {
        let mut conn = self.pool.connection()?;
        conn.execute(
            &self.statements.upsert_cooldown,
            &[self.style.identifier(owner).into(), until.into()],
        )?;
        Ok(())
    }

    fn load_cooldown(&self, key: &str) -> Result<Option<i64>> {
        let mut conn = self.pool.connection()?;
        let rows = conn.query(&self.statements.select_cooldown, &[key.into()])?;
        Ok(rows
            .first()
            .and_then(|row| row.first())
            .and_then(SqlValue::as_integer))
    }

    fn purge(&self, max_age: Duration) -> Result<usize> {
        let deadline = purge_deadline(chrono::Utc::now().timestamp_millis(), max_age);
        let mut conn = self.pool.connection()?;
        conn.execute(&self.statements.purge_backpacks, &[deadline.into()])
    }
}

/// Rows last updated before the returned epoch millis are inactive.
fn purge_deadline(now: i64, max_age: Duration) -> i64 {
    now.saturating_sub(i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX))
}

impl StorageBackend for SqlBackend {
    fn kind(&self) -> BackendKind {
        self.inner.kind
    }

    fn serializer(&self) -> &EnvelopeSerializer {
        &self.inner.serializer
    }

    fn save(&self, owner: &OwnerIdentity, payload: &Payload) {
        match self.inner.save(owner, payload) {
            Ok(()) => tracing::trace!("[sql]: saved backpack of {owner}"),
            Err(e) => tracing::warn!("[sql]: failed to save backpack of {owner}: {e}"),
        }
    }

    fn load(&self, owner: &OwnerIdentity) -> BoxFuture<'static, Load> {
        let inner = self.inner.clone();
        let key = self.inner.style.identifier(owner);
        async move {
            let spawner = inner.spawner.clone();
            let res = spawner
                .spawn_blocking(move || inner.load(&key).map_err(|e| e.with_context("owner", key)))
                .await;
            match res {
                Ok(Ok(Some(payload))) => Load::Entry(payload),
                Ok(Ok(None)) => Load::Miss,
                Ok(Err(e)) | Err(e) => {
                    tracing::warn!("[sql]: failed to load backpack: {e}");
                    Load::Corrupt
                }
            }
        }
        .boxed()
    }

    fn update_identity(&self, owner: &OwnerIdentity) {
        if let Err(e) = self.inner.update_identity(owner) {
            tracing::warn!("[sql]: failed to update identity of {owner}: {e}");
        }
    }

    fn backup(&self, owner: &OwnerIdentity, envelope: &Envelope) -> Option<String> {
        self.inner
            .backups
            .write(owner, envelope)
            .inspect_err(|e| tracing::warn!("[sql]: failed to back up {owner}: {e}"))
            .ok()
    }

    fn list_backups(&self) -> Vec<String> {
        self.inner.backups.list().unwrap_or_else(|e| {
            tracing::warn!("[sql]: failed to list backups: {e}");
            vec![]
        })
    }

    fn read_backup(&self, name: &str) -> Result<Payload> {
        self.inner.backups.read(name)
    }

    fn maintenance(&self) {
        let Some(max_age) = self.inner.max_age else {
            return;
        };
        match self.inner.purge(max_age) {
            Ok(purged) => tracing::info!("[sql]: purged {purged} inactive backpacks"),
            Err(e) => tracing::warn!("[sql]: failed to purge inactive backpacks: {e}"),
        }
    }

    fn sync_cooldown(&self, owner: &OwnerIdentity, until: i64) {
        if let Err(e) = self.inner.sync_cooldown(owner, until) {
            tracing::warn!("[sql]: failed to sync cooldown of {owner}: {e}");
        }
    }

    fn load_cooldown(&self, owner: &OwnerIdentity) -> BoxFuture<'static, Option<i64>> {
        let inner = self.inner.clone();
        let key = self.inner.style.identifier(owner);
        async move {
            let spawner = inner.spawner.clone();
            match spawner.spawn_blocking(move || inner.load_cooldown(&key)).await {
                Ok(Ok(until)) => until,
                Ok(Err(e)) | Err(e) => {
                    tracing::warn!("[sql]: failed to load cooldown: {e}");
                    None
                }
            }
        }
        .boxed()
    }

    fn close(&self) {
        tracing::debug!("[sql]: closing {} backend", self.inner.kind);
    }
}

#[cfg(test)]
mod tests {
    use haversack_common::config::HaversackConfig;
    use uuid::Uuid;

    use super::*;
    use crate::payload::ItemRecord;

    const UUID: u128 = 0xaabbccdd_eeff_0011_2233_445566778899;

    fn payload() -> Payload {
        let mut payload = Payload::empty(54);
        payload.set(3, ItemRecord::new(b"bread".to_vec()));
        payload
    }

    fn shared(config: HaversackConfig) -> (SqlBackend, Arc<SqlitePool>) {
        let pool = Arc::new(SqlitePool::open_in_memory().unwrap());
        let ctx = BackendBuildContext::new(config.with_database_type("shared"), Spawner::current());
        let backend = SqlBackend::open(BackendKind::Shared, pool.clone(), Dialect::Sqlite, &ctx).unwrap();
        (backend, pool)
    }

    #[test_log::test(tokio::test)]
    async fn test_sqlite_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = BackendBuildContext::new(HaversackConfig::default().with_data_dir(dir.path()), Spawner::current());
        let backend = SqlBackend::sqlite(&ctx).unwrap();
        let owner = OwnerIdentity::new(Uuid::from_u128(UUID), "Alex");

        assert!(backend.load(&owner).await.is_miss());
        backend.save(&owner, &payload());
        assert_eq!(backend.load(&owner).await, Load::Entry(payload()));
        assert!(dir.path().join(SQLITE_FILE).is_file());

        // Reopen.
        drop(backend);
        let backend = SqlBackend::sqlite(&ctx).unwrap();
        assert_eq!(backend.load(&owner).await, Load::Entry(payload()));
    }

    #[test_log::test(tokio::test)]
    async fn test_corrupt_row() {
        let (backend, pool) = shared(HaversackConfig::default());
        let owner = OwnerIdentity::new(Uuid::from_u128(UUID), "Alex");
        pool.connection()
            .unwrap()
            .execute(
                "INSERT INTO haversack_backpacks (owner_key, itemstacks, version, last_update) VALUES (?, ?, ?, ?)",
                &[
                    "aabbccddeeff00112233445566778899".into(),
                    vec![1u8, 2, 3].into(),
                    9i64.into(),
                    0i64.into(),
                ],
            )
            .unwrap();
        assert!(backend.load(&owner).await.is_corrupt());
    }

    #[test_log::test(tokio::test)]
    async fn test_rename_moves_rows() {
        let (backend, pool) = shared(HaversackConfig::default().with_use_uuids(false));
        let before = OwnerIdentity::new(Uuid::from_u128(UUID), "Alex");
        let after = OwnerIdentity::new(Uuid::from_u128(UUID), "Alexis");

        backend.update_identity(&before);
        backend.save(&before, &payload());
        backend.sync_cooldown(&before, 42);

        backend.update_identity(&after);
        assert_eq!(backend.load(&after).await, Load::Entry(payload()));
        assert!(backend.load(&before).await.is_miss());
        assert_eq!(backend.load_cooldown(&after).await, Some(42));

        let rows = pool
            .connection()
            .unwrap()
            .query("SELECT owner_key, name FROM haversack_players", &[])
            .unwrap();
        assert_eq!(rows, vec![vec![SqlValue::from("Alexis"), SqlValue::from("Alexis")]]);
    }

    #[test_log::test(tokio::test)]
    async fn test_cooldown() {
        let (backend, _pool) = shared(HaversackConfig::default().with_table_prefix("mp_"));
        let owner = OwnerIdentity::new(Uuid::from_u128(UUID), "Alex");
        assert_eq!(backend.load_cooldown(&owner).await, None);
        backend.sync_cooldown(&owner, 1_000);
        backend.sync_cooldown(&owner, 2_000);
        assert_eq!(backend.load_cooldown(&owner).await, Some(2_000));
    }

    #[test_log::test(tokio::test)]
    async fn test_maintenance_purges_inactive() {
        let (backend, pool) = shared(HaversackConfig::default().with_auto_cleanup_max_inactive_days(1));
        let owner = OwnerIdentity::new(Uuid::from_u128(UUID), "Alex");
        backend.save(&owner, &payload());

        pool.connection()
            .unwrap()
            .execute("UPDATE haversack_backpacks SET last_update = 0", &[])
            .unwrap();
        backend.maintenance();
        assert!(backend.load(&owner).await.is_miss());
    }

    #[test_log::test(tokio::test)]
    async fn test_maintenance_with_huge_max_age() {
        assert_eq!(purge_deadline(1_000, Duration::from_millis(400)), 600);
        assert_eq!(purge_deadline(1_000, Duration::MAX), 1_000 - i64::MAX);
        assert_eq!(purge_deadline(i64::MIN + 1, Duration::from_secs(1)), i64::MIN);

        let (backend, _pool) = shared(HaversackConfig::default().with_auto_cleanup_max_inactive_days(u64::MAX));
        let owner = OwnerIdentity::new(Uuid::from_u128(UUID), "Alex");
        backend.save(&owner, &payload());
        backend.maintenance();
        assert_eq!(backend.load(&owner).await, Load::Entry(payload()));
    }
}
