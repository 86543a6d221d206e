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

//! Storage backends for haversack.

/// Storage backend trait and implementations.
pub mod backend;
/// Write-once backpack snapshots.
pub mod backup;
/// File helpers shared by the file backend and the backup store.
pub mod fs;
/// Identity migration of the file backend.
pub mod migrate;
/// Backpack contents.
pub mod payload;
/// Versioned payload serialization.
pub mod serde;

/// Test utilities.
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

pub use crate::{
    backend::{
        build_backend,
        file::FileBackend,
        sql::{ConnectionPool, Dialect, Row, SqlBackend, SqlConnection, SqlValue, SqlitePool},
        BackendBuildContext, Load, StorageBackend,
    },
    backup::BackupStore,
    migrate::{IdentityMigration, MigrationReport},
    payload::{ItemRecord, Payload, Slot, DEFAULT_SLOTS},
    serde::{Envelope, EnvelopeSerializer},
};
