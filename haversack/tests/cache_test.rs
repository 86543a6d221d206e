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
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use futures_util::future::join_all;
use haversack::prelude::*;
use haversack_storage::test_utils::{Record, RecordingBackend};
use tokio::sync::oneshot;
use uuid::Uuid;

fn owner(n: u128, name: &str) -> OwnerIdentity {
    OwnerIdentity::new(Uuid::from_u128(n), name)
}

fn payload(items: &[&[u8]]) -> Payload {
    Payload::from_slots(items.iter().map(|bytes| Some(ItemRecord::new(bytes.to_vec()))).collect())
}

fn config() -> HaversackConfig {
    HaversackConfig::default().with_eviction(EvictionConfig::OnDeparture)
}

fn cache(backend: Arc<RecordingBackend>) -> BackpackCache {
    BackpackCacheBuilder::new(config())
        .with_slots(9)
        .with_backend(backend)
        .build()
        .unwrap()
}

#[test_log::test(tokio::test)]
async fn test_concurrent_fetch_loads_once() {
    let backend = Arc::new(RecordingBackend::new().with_load_delay(Duration::from_millis(50)));
    let alex = owner(1, "Alex");
    backend.insert(&alex, &payload(&[b"sword", b"shield"]));
    let cache = cache(backend.clone());

    let backpacks = join_all((0..8).map(|_| cache.fetch(&alex)))
        .await
        .into_iter()
        .collect::<Result<Vec<_>>>()
        .unwrap();

    assert_eq!(backend.loads(&alex), 1);
    for backpack in &backpacks {
        assert!(Arc::ptr_eq(backpack, &backpacks[0]));
    }
    assert_eq!(backpacks[0].snapshot(), payload(&[b"sword", b"shield"]));

    // Resident now, no more loads.
    let again = cache.fetch(&alex).await.unwrap();
    assert!(Arc::ptr_eq(&again, &backpacks[0]));
    assert_eq!(backend.loads(&alex), 1);
}

#[test_log::test(tokio::test)]
async fn test_missing_and_corrupt_backpacks_start_empty() {
    let backend = Arc::new(RecordingBackend::new());
    let alex = owner(1, "Alex");
    let sam = owner(2, "Sam");
    backend.insert(&sam, &payload(&[b"torch"]));
    backend.corrupt(&sam);
    let cache = cache(backend.clone());

    let fresh = cache.fetch(&alex).await.unwrap();
    assert_eq!(fresh.snapshot(), Payload::empty(9));
    assert!(!fresh.is_dirty());

    let broken = cache.fetch(&sam).await.unwrap();
    assert_eq!(broken.snapshot(), Payload::empty(9));
    assert_eq!(backend.saves(&sam), 0);

    assert_eq!(cache.loaded().len(), 2);
}

#[test_log::test(tokio::test)]
async fn test_get_or_load() {
    let backend = Arc::new(RecordingBackend::new());
    let alex = owner(1, "Alex");
    backend.insert(&alex, &payload(&[b"map"]));
    let cache = cache(backend.clone());

    let (tx, rx) = oneshot::channel();
    cache.get_or_load(&alex, move |backpack| {
        let _ = tx.send(backpack);
    });
    let loaded = rx.await.unwrap();
    assert_eq!(loaded.snapshot(), payload(&[b"map"]));

    let ready = Arc::new(AtomicBool::new(false));
    let flag = ready.clone();
    cache.get_or_load(&alex, move |backpack| {
        assert_eq!(backpack.owner(), &owner(1, "Alex"));
        flag.store(true, Ordering::Release);
    });
    // Resident backpacks are handed over synchronously.
    assert!(ready.load(Ordering::Acquire));
    assert_eq!(backend.loads(&alex), 1);
}

#[test_log::test(tokio::test)]
async fn test_unload_discards_changes() {
    let backend = Arc::new(RecordingBackend::new());
    let alex = owner(1, "Alex");
    let cache = cache(backend.clone());

    let backpack = cache.fetch(&alex).await.unwrap();
    backpack.update(|p| p.set(0, ItemRecord::new(b"gem".to_vec())));
    assert!(cache.unload(&alex).is_some());
    assert!(cache.get_cached(&alex).is_none());
    assert_eq!(backend.saves(&alex), 0);

    let reloaded = cache.fetch(&alex).await.unwrap();
    assert!(reloaded.read().is_vacant());
    assert_eq!(backend.loads(&alex), 2);
}

#[test_log::test(tokio::test)]
async fn test_backup_and_restore() {
    let backend = Arc::new(RecordingBackend::new());
    let alex = owner(1, "Alex");
    let cache = cache(backend.clone());

    let backpack = cache.fetch(&alex).await.unwrap();
    backpack.update(|p| p.set(3, ItemRecord::new(b"crown".to_vec())));

    let name = cache.backup(&backpack).unwrap();
    assert!(!backpack.is_dirty());
    assert_eq!(backend.saves(&alex), 1);
    assert_eq!(backend.count(&Record::Backup(alex.uuid())), 1);
    assert_eq!(cache.list_backups(), vec![name.clone()]);
    assert_eq!(cache.load_backup(&name), Some(backpack.snapshot()));
    assert_eq!(cache.load_backup("nobody_0"), None);

    let saved = backpack.snapshot();
    backpack.replace(Payload::empty(9));
    cache.restore(&name, &backpack).unwrap();
    assert_eq!(backpack.snapshot(), saved);
    assert!(backpack.is_dirty());

    let err = cache.restore("nobody_0", &backpack).unwrap_err();
    assert!(err.is_not_found());
}

#[test_log::test(tokio::test)]
async fn test_cooldown() {
    let backend = Arc::new(RecordingBackend::new());
    let alex = owner(1, "Alex");
    let cache = cache(backend.clone());

    assert_eq!(cache.cooldown(&alex).await, None);
    let backpack = cache.fetch(&alex).await.unwrap();
    cache.sync_cooldown(&alex, 1_700_000_000_000);
    assert_eq!(backpack.cooldown(), Some(1_700_000_000_000));

    cache.unload(&alex);
    assert_eq!(cache.cooldown(&alex).await, Some(1_700_000_000_000));
    let reloaded = cache.fetch(&alex).await.unwrap();
    assert_eq!(reloaded.cooldown(), Some(1_700_000_000_000));
}

#[test_log::test(tokio::test)]
async fn test_close_persists_dirty_backpacks() {
    let backend = Arc::new(RecordingBackend::new());
    let alex = owner(1, "Alex");
    let sam = owner(2, "Sam");
    let cache = cache(backend.clone());

    let dirty = cache.fetch(&alex).await.unwrap();
    dirty.update(|p| p.set(0, ItemRecord::new(b"bread".to_vec())));
    cache.fetch(&sam).await.unwrap();

    cache.close();
    cache.close();
    assert!(cache.is_closed());
    assert!(cache.loaded().is_empty());
    assert_eq!(backend.saves(&alex), 1);
    assert_eq!(backend.saves(&sam), 0);
    assert_eq!(backend.count(&Record::Close), 1);
    assert_eq!(backend.stored(&alex), Some(dirty.snapshot()));

    let err = cache.fetch(&alex).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Closed);
    assert!(!cache.handle().is_open());
}

#[test_log::test(tokio::test)]
async fn test_close_fails_pending_loads() {
    let backend = Arc::new(RecordingBackend::new().with_load_delay(Duration::from_millis(100)));
    let alex = owner(1, "Alex");
    let cache = cache(backend.clone());

    let pending = tokio::spawn({
        let cache = cache.clone();
        let alex = alex.clone();
        async move { cache.fetch(&alex).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    cache.close();

    let err = pending.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Closed);
    // The load completes later and must not resurrect the backpack.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(cache.get_cached(&alex).is_none());
}

#[test_log::test]
fn test_build_without_runtime_or_spawner() {
    let err = BackpackCacheBuilder::new(config())
        .with_backend(Arc::new(RecordingBackend::new()))
        .build()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
}

#[test_log::test(tokio::test)]
async fn test_file_backend_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let config = config().with_database_type("file").with_data_dir(dir.path());
    let alex = owner(1, "Alex");

    let cache = BackpackCacheBuilder::new(config.clone()).build().unwrap();
    assert_eq!(cache.backend().kind(), BackendKind::File);
    let backpack = cache.fetch(&alex).await.unwrap();
    assert_eq!(backpack.read().len(), DEFAULT_SLOTS);
    backpack.update(|p| p.set(7, ItemRecord::new(b"lantern".to_vec())));
    let backup = cache.backup(&backpack).unwrap();
    cache.close();

    let cache = BackpackCacheBuilder::new(config).build().unwrap();
    let backpack = cache.fetch(&alex).await.unwrap();
    assert_eq!(backpack.read().get(7).map(ItemRecord::as_bytes), Some(&b"lantern"[..]));
    assert_eq!(cache.list_backups(), vec![backup.clone()]);
    assert_eq!(cache.load_backup(&backup), Some(backpack.snapshot()));
    cache.close();
}

#[test_log::test(tokio::test)]
async fn test_sqlite_backend_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let config = config().with_database_type("sqlite").with_data_dir(dir.path());
    let alex = owner(1, "Alex");

    let cache = BackpackCacheBuilder::new(config.clone()).build().unwrap();
    assert_eq!(cache.backend().kind(), BackendKind::Sqlite);
    let backpack = cache.fetch(&alex).await.unwrap();
    backpack.update(|p| p.set(0, ItemRecord::new(b"rope".to_vec())));
    cache.sync_cooldown(&alex, 42);
    cache.close();

    let cache = BackpackCacheBuilder::new(config).build().unwrap();
    let backpack = cache.fetch(&alex).await.unwrap();
    assert_eq!(backpack.read().get(0).map(ItemRecord::as_bytes), Some(&b"rope"[..]));
    assert_eq!(backpack.cooldown(), Some(42));
    cache.close();
}
