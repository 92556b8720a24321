//! Several workers sharing one in-memory log cluster

use bytes::Bytes;
use offsetkv::log::MemoryCluster;
use offsetkv::store::LogSettings;
use offsetkv::{OffsetStore, StoreConfig};
use std::sync::Arc;

fn key(s: &str) -> Option<Bytes> {
    Some(Bytes::copy_from_slice(s.as_bytes()))
}

fn config() -> StoreConfig {
    StoreConfig {
        topic: "connect-offsets".into(),
        partitions: 4,
        replication_factor: 1,
        ..Default::default()
    }
}

fn worker(cluster: &MemoryCluster) -> OffsetStore {
    let store = OffsetStore::new(cluster.factory());
    store.configure(&config()).unwrap();
    store.start().unwrap();
    store
}

#[tokio::test]
async fn test_write_visible_to_other_worker() {
    let cluster = MemoryCluster::new();
    let writer = worker(&cluster);
    let reader = worker(&cluster);

    writer
        .set(
            vec![(key("K1"), key("V1")), (key("K2"), key("V2"))],
            |r| assert!(r.is_ok()),
        )
        .await
        .unwrap();

    // The reader has not consumed anything yet; the barrier makes it catch up
    assert_eq!(reader.snapshot_stats().applied, 0);
    let offsets = reader.get(vec![key("K1"), key("K2")]).await.unwrap();
    assert_eq!(offsets[&key("K1")], key("V1"));
    assert_eq!(offsets[&key("K2")], key("V2"));
}

#[tokio::test]
async fn test_restart_replays_latest_values() {
    let cluster = MemoryCluster::new();
    {
        let store = worker(&cluster);
        store
            .set(vec![(key("K"), key("V0"))], |_| {})
            .await
            .unwrap();
        store
            .set(vec![(key("K"), key("V1"))], |_| {})
            .await
            .unwrap();
        store.stop().unwrap();
    }

    let store = worker(&cluster);
    // Replay happened during start
    assert_eq!(store.snapshot_stats().applied, 2);
    let offsets = store.get(vec![key("K")]).await.unwrap();
    assert_eq!(offsets[&key("K")], key("V1"));
}

#[tokio::test]
async fn test_absent_key_and_tombstone_round_trip() {
    let cluster = MemoryCluster::new();
    let store = worker(&cluster);

    store
        .set(vec![(key("K2"), key("old"))], |_| {})
        .await
        .unwrap();
    store
        .set(vec![(None, key("V")), (key("K2"), None)], |_| {})
        .await
        .unwrap();

    let offsets = store.get(vec![None, key("K2")]).await.unwrap();
    assert_eq!(offsets[&None], key("V"));
    assert_eq!(offsets[&key("K2")], None);
}

#[tokio::test]
async fn test_external_writer_observed() {
    let cluster = MemoryCluster::new();
    let store = worker(&cluster);
    let topic = LogSettings::derive(&config()).unwrap().topic;

    cluster.append(&topic, key("K"), key("from-elsewhere")).unwrap();
    let offsets = store.get(vec![key("K")]).await.unwrap();
    assert_eq!(offsets[&key("K")], key("from-elsewhere"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_workers() {
    let cluster = MemoryCluster::new();
    let stores: Vec<Arc<OffsetStore>> = (0..4).map(|_| Arc::new(worker(&cluster))).collect();

    let mut tasks = Vec::new();
    for (i, store) in stores.iter().enumerate() {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            for n in 0..25 {
                let entries = vec![(
                    key(&format!("worker-{}", i)),
                    key(&format!("{}", n)),
                )];
                store.set(entries, |_| {}).await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let keys: Vec<_> = (0..4).map(|i| key(&format!("worker-{}", i))).collect();
    for store in &stores {
        let offsets = store.get(keys.clone()).await.unwrap();
        for k in &keys {
            assert_eq!(offsets[k], key("24"));
        }
    }

    let total: u64 = cluster
        .end_offsets("connect-offsets")
        .unwrap()
        .iter()
        .sum();
    assert_eq!(total, 100);
}
