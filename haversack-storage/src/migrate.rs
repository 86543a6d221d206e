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

//! Maintenance pass over the backpack directory of the file backend.
//!
//! For every backpack file, in order:
//!
//! 1. Files untouched for longer than the max age are deleted.
//! 2. Files named by a display name (at most [`MAX_NAME_LEN`] characters) are renamed to the resolved UUID.
//! 3. UUID named files get their separators inserted or stripped to match the configured style.
//!
//! Temporary files left behind by interrupted saves are deleted once they are older than a grace period.
//!
//! Running the pass twice is a no-op for the second run. Existing files are never overwritten.

use std::{
    fmt::Debug,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, SystemTime},
};

use haversack_common::{
    error::Result,
    identity::{format_uuid, insert_separators, strip_separators, IdentifierStyle, MAX_NAME_LEN, UUID_SEPARATOR},
    resolve::UuidResolver,
};

use crate::fs::{is_stale_tmp, is_tmp, EXT};

/// Temporary files younger than this may belong to a save in progress.
pub const TMP_GRACE: Duration = Duration::from_secs(60);

/// Outcome of one migration pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Backpack files inspected.
    pub scanned: usize,
    /// Files deleted for exceeding the max age.
    pub purged: usize,
    /// Files renamed to the canonical identifier.
    pub renamed: usize,
    /// Files that needed a rename which could not be done.
    pub skipped: usize,
    /// Stale temporary files deleted.
    pub cleaned: usize,
}

enum Plan {
    Keep,
    Rename(String),
    Unresolved,
}

/// Identity migration over a backpack directory.
#[derive(Clone)]
pub struct IdentityMigration {
    dir: PathBuf,
    style: IdentifierStyle,
    max_age: Option<Duration>,
    resolver: Option<Arc<dyn UuidResolver>>,
}

impl Debug for IdentityMigration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityMigration")
            .field("dir", &self.dir)
            .field("style", &self.style)
            .field("max_age", &self.max_age)
            .field("resolver", &self.resolver.is_some())
            .finish()
    }
}

impl IdentityMigration {
    /// Create a migration over the given directory.
    pub fn new(dir: impl Into<PathBuf>, style: IdentifierStyle) -> Self {
        Self {
            dir: dir.into(),
            style,
            max_age: None,
            resolver: None,
        }
    }

    /// Delete files untouched for longer than `max_age`.
    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    /// Resolve legacy display names with the given resolver.
    pub fn with_resolver(mut self, resolver: Option<Arc<dyn UuidResolver>>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Run the pass. Only failing to list the directory is an error, per file failures are logged and skipped.
    pub fn run(&self) -> Result<MigrationReport> {
        let mut report = MigrationReport::default();
        let now = SystemTime::now();

        for entry in std::fs::read_dir(&self.dir)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("[migration]: failed to read an entry of {:?}: {e}", self.dir);
                    continue;
                }
            };
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if is_tmp(&path) {
                self.clean(&path, &mut report);
                continue;
            }
            let Some(stem) = entry.file_name().to_str().and_then(|s| s.strip_suffix(EXT)).map(str::to_string) else {
                continue;
            };
            report.scanned += 1;

            if self.expired(&path, now) {
                match std::fs::remove_file(&path) {
                    Ok(()) => {
                        tracing::debug!("[migration]: purged inactive backpack {stem}");
                        report.purged += 1;
                    }
                    Err(e) => tracing::warn!("[migration]: failed to purge {path:?}: {e}"),
                }
                continue;
            }

            match self.plan(&stem) {
                Plan::Keep => {}
                Plan::Unresolved => report.skipped += 1,
                Plan::Rename(target) if self.rename(&stem, &target) => report.renamed += 1,
                Plan::Rename(_) => report.skipped += 1,
            }
        }

        tracing::info!(
            "[migration]: {:?} scanned: {}, purged: {}, renamed: {}, skipped: {}, cleaned: {}",
            self.dir,
            report.scanned,
            report.purged,
            report.renamed,
            report.skipped,
            report.cleaned
        );
        Ok(report)
    }

    fn clean(&self, path: &Path, report: &mut MigrationReport) {
        match is_stale_tmp(path, TMP_GRACE) {
            Ok(false) => {}
            Ok(true) => match std::fs::remove_file(path) {
                Ok(()) => {
                    tracing::debug!("[migration]: removed stale temporary file {path:?}");
                    report.cleaned += 1;
                }
                Err(e) => tracing::warn!("[migration]: failed to remove {path:?}: {e}"),
            },
            Err(e) => tracing::warn!("[migration]: failed to inspect {path:?}: {e}"),
        }
    }

    fn expired(&self, path: &Path, now: SystemTime) -> bool {
        let Some(max_age) = self.max_age else {
            return false;
        };
        match path.metadata().and_then(|m| m.modified()) {
            Ok(modified) => now.duration_since(modified).is_ok_and(|age| age > max_age),
            Err(e) => {
                tracing::warn!("[migration]: failed to read modification time of {path:?}: {e}");
                false
            }
        }
    }

    fn plan(&self, stem: &str) -> Plan {
        let IdentifierStyle::Uuid { separators } = self.style else {
            return Plan::Keep;
        };

        if stem.chars().count() <= MAX_NAME_LEN {
            let resolved = self.resolver.as_ref().and_then(|resolver| resolver.resolve(stem));
            return match resolved {
                Some(uuid) => Plan::Rename(format_uuid(uuid, separators)),
                None => {
                    tracing::warn!("[migration]: failed to resolve the UUID of {stem}, leaving it as is");
                    Plan::Unresolved
                }
            };
        }

        let has_separators = stem.contains(UUID_SEPARATOR);
        if separators && !has_separators {
            match insert_separators(stem) {
                Some(target) => Plan::Rename(target),
                None => {
                    tracing::warn!("[migration]: {stem} is not a UUID, leaving it as is");
                    Plan::Unresolved
                }
            }
        } else if !separators && has_separators {
            Plan::Rename(strip_separators(stem))
        } else {
            Plan::Keep
        }
    }

    fn rename(&self, stem: &str, target: &str) -> bool {
        let from = self.dir.join(format!("{stem}{EXT}"));
        let to = self.dir.join(format!("{target}{EXT}"));
        if to.exists() {
            tracing::warn!("[migration]: cannot rename {stem} to {target}, the target exists");
            return false;
        }
        match std::fs::rename(&from, &to) {
            Ok(()) => {
                tracing::debug!("[migration]: renamed {stem} to {target}");
                true
            }
            Err(e) => {
                tracing::warn!("[migration]: failed to rename {stem} to {target}: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs::{self, FileTimes};

    use haversack_common::resolve::MapResolver;
    use uuid::Uuid;

    use super::*;

    const UUID: u128 = 0xaabbccdd_eeff_0011_2233_445566778899;

    fn touch(dir: &Path, stem: &str) -> PathBuf {
        let path = dir.join(format!("{stem}{EXT}"));
        fs::write(&path, [2u8, 0]).unwrap();
        path
    }

    fn stems(dir: &Path) -> Vec<String> {
        let mut stems = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        stems.sort();
        stems
    }

    #[test_log::test]
    fn test_name_to_uuid() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "Alex");
        touch(dir.path(), "Steve");

        let resolver: Arc<dyn UuidResolver> = Arc::new(MapResolver::new().with("alex", Uuid::from_u128(UUID)));
        let migration = IdentityMigration::new(dir.path(), IdentifierStyle::new(true, false)).with_resolver(Some(resolver));

        let report = migration.run().unwrap();
        assert_eq!(report.renamed, 1);
        assert_eq!(
            stems(dir.path()),
            vec![format!("Steve{EXT}"), format!("aabbccddeeff00112233445566778899{EXT}")]
        );

        // Idempotent.
        let report = migration.run().unwrap();
        assert_eq!(report.renamed, 0);
        assert_eq!(report.purged, 0);
    }

    #[test_log::test]
    fn test_separator_normalization() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "AABBCCDDEEFF00112233445566778899");

        let insert = IdentityMigration::new(dir.path(), IdentifierStyle::new(true, true));
        assert_eq!(insert.run().unwrap().renamed, 1);
        assert_eq!(stems(dir.path()), vec![format!("AABBCCDD-EEFF-0011-2233-445566778899{EXT}")]);
        assert_eq!(insert.run().unwrap().renamed, 0);

        let strip = IdentityMigration::new(dir.path(), IdentifierStyle::new(true, false));
        assert_eq!(strip.run().unwrap().renamed, 1);
        assert_eq!(stems(dir.path()), vec![format!("AABBCCDDEEFF00112233445566778899{EXT}")]);
        assert_eq!(strip.run().unwrap().renamed, 0);
    }

    #[test_log::test]
    fn test_no_clobber() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "aabbccdd-eeff-0011-2233-445566778899");
        let existing = touch(dir.path(), "aabbccddeeff00112233445566778899");
        fs::write(&existing, [1u8, 7, 7]).unwrap();

        let report = IdentityMigration::new(dir.path(), IdentifierStyle::new(true, false)).run().unwrap();
        assert_eq!(report.renamed, 0);
        assert_eq!(report.skipped, 1);
        assert_eq!(fs::read(&existing).unwrap(), vec![1, 7, 7]);
    }

    #[test_log::test]
    fn test_age_purge() {
        let dir = tempfile::tempdir().unwrap();
        let old = touch(dir.path(), "Alex");
        let fresh = touch(dir.path(), "aabbccddeeff00112233445566778899");

        let past = SystemTime::now() - Duration::from_secs(3 * 24 * 60 * 60);
        fs::File::options()
            .write(true)
            .open(&old)
            .unwrap()
            .set_times(FileTimes::new().set_modified(past))
            .unwrap();

        let report = IdentityMigration::new(dir.path(), IdentifierStyle::new(true, false))
            .with_max_age(Some(Duration::from_secs(24 * 60 * 60)))
            .run()
            .unwrap();
        assert_eq!(report.purged, 1);
        assert!(!old.exists());
        assert!(fresh.exists());
    }

    #[test_log::test]
    fn test_stale_tmp_files_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        let backpack = touch(dir.path(), "aabbccddeeff00112233445566778899");
        let stale = dir.path().join(format!("aabbccddeeff00112233445566778899{EXT}.4242.0.tmp"));
        let live = dir.path().join(format!("aabbccddeeff00112233445566778899{EXT}.4242.1.tmp"));
        fs::write(&stale, [2u8]).unwrap();
        fs::write(&live, [2u8]).unwrap();

        let past = SystemTime::now() - TMP_GRACE * 10;
        fs::File::options()
            .write(true)
            .open(&stale)
            .unwrap()
            .set_times(FileTimes::new().set_modified(past))
            .unwrap();

        let migration = IdentityMigration::new(dir.path(), IdentifierStyle::new(true, false));
        let report = migration.run().unwrap();
        assert_eq!(report.cleaned, 1);
        assert_eq!(report.scanned, 1);
        assert!(!stale.exists());
        assert!(live.exists());
        assert!(backpack.exists());
        assert_eq!(migration.run().unwrap().cleaned, 0);
    }

    #[test]
    fn test_name_mode_keeps_names() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "Alex");
        touch(dir.path(), "aabbccdd-eeff-0011-2233-445566778899");
        let report = IdentityMigration::new(dir.path(), IdentifierStyle::Name).run().unwrap();
        assert_eq!(report.scanned, 2);
        assert_eq!(report.renamed, 0);
    }
}
