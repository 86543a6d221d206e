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

use std::{fmt::Display, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{format::FormatVersion, identity::IdentifierStyle};

const DAY_SECS: u64 = 24 * 3600;

/// Kinds of storage backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// One file per owner in a directory.
    File,
    /// Embedded SQLite database owned by the backend.
    Sqlite,
    /// Networked MySQL database behind an externally wired connection pool.
    MySql,
    /// Connection pool shared with other components of the host.
    Shared,
}

impl BackendKind {
    /// Parse the configured database type, case-insensitively.
    ///
    /// Unrecognized values fall back to [`BackendKind::Sqlite`].
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "file" | "flat" | "files" => Self::File,
            "mysql" => Self::MySql,
            "external" | "global" | "shared" => Self::Shared,
            _ => Self::Sqlite,
        }
    }
}

impl Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Sqlite => write!(f, "sqlite"),
            Self::MySql => write!(f, "mysql"),
            Self::Shared => write!(f, "shared"),
        }
    }
}

/// Config for the delayed eviction policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayedConfig {
    /// Backpacks not accessed for longer than this are evicted by a sweep.
    pub threshold: Duration,
    /// Interval of the background sweep. `None` only sweeps on demand.
    pub sweep_interval: Option<Duration>,
}

impl Default for DelayedConfig {
    fn default() -> Self {
        Self {
            threshold: Duration::from_secs(10 * 60),
            sweep_interval: Some(Duration::from_secs(60)),
        }
    }
}

/// Eviction policy selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum EvictionConfig {
    /// Evict as soon as the owner departs.
    OnDeparture,
    /// Keep backpacks around after departure until they age out.
    Delayed(DelayedConfig),
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self::Delayed(DelayedConfig::default())
    }
}

impl From<DelayedConfig> for EvictionConfig {
    fn from(value: DelayedConfig) -> Self {
        Self::Delayed(value)
    }
}

/// Configuration of the persistence subsystem.
///
/// Loading it is up to the host, it only needs to be deserializable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HaversackConfig {
    /// Backend selection, see [`BackendKind::parse`].
    pub database_type: String,
    /// Directory holding the backpack files, the sqlite database and the backups.
    pub data_dir: PathBuf,
    /// File owners under their UUID instead of their display name.
    pub use_uuids: bool,
    /// Keep the `8-4-4-4-12` separators in stored UUIDs.
    pub use_uuid_separators: bool,
    /// Backpacks are shared with other processes through the shared backend.
    ///
    /// Forces the on-departure eviction policy and disables prefetching on arrival.
    pub cross_server_mode: bool,
    /// Persisted backpacks untouched for more days than this are purged. `0` disables purging.
    pub auto_cleanup_max_inactive_days: u64,
    /// Prefix of every sql table name.
    pub table_prefix: String,
    /// Format tag written by new saves.
    pub format: FormatVersion,
    /// Eviction policy of the in-memory cache.
    pub eviction: EvictionConfig,
}

impl Default for HaversackConfig {
    fn default() -> Self {
        Self {
            database_type: "sqlite".to_string(),
            data_dir: PathBuf::from("."),
            use_uuids: true,
            use_uuid_separators: false,
            cross_server_mode: false,
            auto_cleanup_max_inactive_days: 0,
            table_prefix: "haversack_".to_string(),
            format: FormatVersion::default(),
            eviction: EvictionConfig::default(),
        }
    }
}

impl HaversackConfig {
    /// Set the database type.
    pub fn with_database_type(mut self, database_type: impl Into<String>) -> Self {
        self.database_type = database_type.into();
        self
    }

    /// Set the data directory.
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    /// Set whether owners are filed under their UUID.
    pub fn with_use_uuids(mut self, use_uuids: bool) -> Self {
        self.use_uuids = use_uuids;
        self
    }

    /// Set whether stored UUIDs keep their separators.
    pub fn with_use_uuid_separators(mut self, use_uuid_separators: bool) -> Self {
        self.use_uuid_separators = use_uuid_separators;
        self
    }

    /// Enable or disable cross server mode.
    pub fn with_cross_server_mode(mut self, cross_server_mode: bool) -> Self {
        self.cross_server_mode = cross_server_mode;
        self
    }

    /// Set the max inactive days before a persisted backpack is purged.
    pub fn with_auto_cleanup_max_inactive_days(mut self, days: u64) -> Self {
        self.auto_cleanup_max_inactive_days = days;
        self
    }

    /// Set the sql table prefix.
    pub fn with_table_prefix(mut self, table_prefix: impl Into<String>) -> Self {
        self.table_prefix = table_prefix.into();
        self
    }

    /// Set the format version written by new saves.
    pub fn with_format(mut self, format: FormatVersion) -> Self {
        self.format = format;
        self
    }

    /// Set the eviction policy.
    pub fn with_eviction(mut self, eviction: impl Into<EvictionConfig>) -> Self {
        self.eviction = eviction.into();
        self
    }

    /// The selected backend kind.
    pub fn backend_kind(&self) -> BackendKind {
        BackendKind::parse(&self.database_type)
    }

    /// The identifier style derived from `use_uuids` and `use_uuid_separators`.
    pub fn identifier_style(&self) -> IdentifierStyle {
        IdentifierStyle::new(self.use_uuids, self.use_uuid_separators)
    }

    /// The max age of persisted backpacks, `None` if purging is disabled.
    pub fn max_age(&self) -> Option<Duration> {
        match self.auto_cleanup_max_inactive_days {
            0 => None,
            days => Some(Duration::from_secs(days.saturating_mul(DAY_SECS))),
        }
    }

    /// The effective eviction policy. Cross server mode always evicts on departure.
    pub fn effective_eviction(&self) -> EvictionConfig {
        if self.cross_server_mode {
            EvictionConfig::OnDeparture
        } else {
            self.eviction.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_parse() {
        for s in ["file", "FLAT", "Files"] {
            assert_eq!(BackendKind::parse(s), BackendKind::File);
        }
        assert_eq!(BackendKind::parse("MySQL"), BackendKind::MySql);
        for s in ["external", "Global", "SHARED"] {
            assert_eq!(BackendKind::parse(s), BackendKind::Shared);
        }
        assert_eq!(BackendKind::parse("sqlite"), BackendKind::Sqlite);
        assert_eq!(BackendKind::parse("postgres"), BackendKind::Sqlite);
    }

    #[test]
    fn test_max_age() {
        let config = HaversackConfig::default();
        assert_eq!(config.max_age(), None);

        let config = config.with_auto_cleanup_max_inactive_days(2);
        assert_eq!(config.max_age(), Some(Duration::from_secs(2 * 24 * 3600)));
    }

    #[test]
    fn test_cross_server_forces_on_departure() {
        let config = HaversackConfig::default().with_eviction(DelayedConfig::default());
        assert!(matches!(config.effective_eviction(), EvictionConfig::Delayed(_)));

        let config = config.with_cross_server_mode(true);
        assert_eq!(config.effective_eviction(), EvictionConfig::OnDeparture);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: HaversackConfig = serde_json::from_str(
            r#"{ "database_type": "files", "use_uuid_separators": true, "eviction": { "policy": "on_departure" } }"#,
        )
        .unwrap();
        assert_eq!(config.backend_kind(), BackendKind::File);
        assert!(config.use_uuids);
        assert_eq!(config.identifier_style(), IdentifierStyle::Uuid { separators: true });
        assert_eq!(config.eviction, EvictionConfig::OnDeparture);
    }
}
