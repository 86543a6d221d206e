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
    fs::{File, OpenOptions},
    io::{Read, Write},
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, SystemTime},
};

use haversack_common::error::{Error, ErrorKind, Result};

use crate::serde::Envelope;

/// Extension of every backpack and backup file.
pub const EXT: &str = ".backpack";

const TMP_EXT: &str = "tmp";

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Replace the file at `path` with `bytes`.
///
/// The bytes are written to a sibling temporary file first and renamed over the target, so a reader sees either the
/// old or the new content.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = tmp_path(path);
    let res = write_new(&tmp, bytes).and_then(|_| std::fs::rename(&tmp, path).map_err(Into::into));
    if res.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    res
}

/// Write `bytes` to a file that must not exist yet.
pub fn write_new(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

/// Read the envelope stored at `path`.
pub fn read_envelope(path: &Path) -> Result<Envelope> {
    let mut file = File::open(path)?;
    let expected = file.metadata()?.len();
    read_envelope_from(&mut file, expected, path)
}

/// Read an envelope of `expected` bytes.
///
/// A short read is logged and the truncated bytes are still handed on.
pub fn read_envelope_from(mut reader: impl Read, expected: u64, path: &Path) -> Result<Envelope> {
    let mut buf = Vec::with_capacity(expected as usize);
    reader.read_to_end(&mut buf)?;
    if let Err(e) = check_read(path, expected, buf.len() as u64) {
        tracing::warn!("[storage]: {e}");
    }
    Envelope::from_bytes(&buf)
}

fn check_read(path: &Path, expected: u64, read: u64) -> Result<()> {
    if read == expected {
        return Ok(());
    }
    Err(Error::new(ErrorKind::PartialRead, "byte count mismatch")
        .with_context("path", path.display())
        .with_context("expected", expected)
        .with_context("read", read))
}

/// Whether `path` is a temporary file left by [`write_atomic`].
pub fn is_tmp(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == TMP_EXT)
}

/// Whether the temporary file at `path` was last modified more than `grace` ago, so no live write owns it.
pub fn is_stale_tmp(path: &Path, grace: Duration) -> Result<bool> {
    if !is_tmp(path) {
        return Ok(false);
    }
    let modified = std::fs::metadata(path)?.modified()?;
    Ok(SystemTime::now()
        .duration_since(modified)
        .is_ok_and(|age| age > grace))
}

fn tmp_path(path: &Path) -> PathBuf {
    let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{}.{seq}.{TMP_EXT}", std::process::id()));
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_atomic_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(format!("owner{EXT}"));

        write_atomic(&path, &[1, 2, 3]).unwrap();
        write_atomic(&path, &[2, 9]).unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), vec![2, 9]);
        // No temporary file is left behind.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_write_new_refuses_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a");
        write_new(&path, &[1]).unwrap();
        assert_eq!(write_new(&path, &[2]).unwrap_err().kind(), ErrorKind::Io);
        assert_eq!(std::fs::read(&path).unwrap(), vec![1]);
    }

    #[test_log::test]
    fn test_short_read_is_tolerated() {
        let bytes = [2u8, 10, 11, 12];
        let envelope = read_envelope_from(&bytes[..], 8, Path::new("short")).unwrap();
        assert_eq!(envelope.version(), 2);
        assert_eq!(envelope.body(), &[10, 11, 12]);
    }

    #[test]
    fn test_short_read_reports_partial_read() {
        assert!(check_read(Path::new("full"), 4, 4).is_ok());
        let err = check_read(Path::new("short"), 8, 4).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PartialRead);
        assert!(err.context().iter().any(|(k, v)| *k == "read" && v == "4"));
    }

    #[test]
    fn test_stale_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join(format!("owner{EXT}"));
        let tmp = tmp_path(&target);
        std::fs::write(&tmp, [1]).unwrap();
        std::fs::write(&target, [1]).unwrap();

        assert!(is_tmp(&tmp));
        assert!(!is_tmp(&target));
        assert!(!is_stale_tmp(&tmp, Duration::from_secs(60)).unwrap());
        assert!(!is_stale_tmp(&target, Duration::ZERO).unwrap());

        let old = SystemTime::now() - Duration::from_secs(3600);
        File::options().write(true).open(&tmp).unwrap().set_modified(old).unwrap();
        assert!(is_stale_tmp(&tmp, Duration::from_secs(60)).unwrap());
    }

    #[test]
    fn test_read_missing_and_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing");
        assert!(read_envelope(&path).unwrap_err().is_not_found());

        std::fs::write(&path, []).unwrap();
        assert_eq!(read_envelope(&path).unwrap_err().kind(), ErrorKind::Decode);
    }
}
