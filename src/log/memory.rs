//! In-process replicated log
//!
//! A [`MemoryCluster`] holds any number of named, partitioned topics. Every
//! [`MemoryLog`] client keeps its own consumer positions, so several clients
//! on one cluster behave like several worker processes sharing a log: a
//! record appended by one client reaches every client's consumption
//! callback, but only when that client catches up (on `start` or
//! `read_to_end`).

use crate::common::crc32;
use crate::log::{
    BarrierCallback, ConsumeCallback, LogError, LogFactory, LogRecord, LogResult, ReplicatedLog,
    SendCallback,
};
use crate::store::{LogSettings, TopicDescriptor};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
struct StoredRecord {
    key: Option<Bytes>,
    value: Option<Bytes>,
}

#[derive(Debug)]
struct Topic {
    name: String,
    partitions: RwLock<Vec<Vec<StoredRecord>>>,
    max_message_bytes: Option<usize>,
}

impl Topic {
    fn new(descriptor: &TopicDescriptor) -> Self {
        let partitions = descriptor.partitions.max(1) as usize;
        Self {
            name: descriptor.name.clone(),
            partitions: RwLock::new(vec![Vec::new(); partitions]),
            max_message_bytes: descriptor.max_message_bytes(),
        }
    }

    fn partition_for(&self, key: Option<&Bytes>, partitions: usize) -> usize {
        match key {
            Some(key) => crc32(key) as usize % partitions,
            None => 0,
        }
    }

    fn append(&self, key: Option<Bytes>, value: Option<Bytes>) -> LogResult<(u32, u64)> {
        let size = key.as_ref().map_or(0, Bytes::len) + value.as_ref().map_or(0, Bytes::len);
        if let Some(max) = self.max_message_bytes {
            if size > max {
                return Err(LogError::RecordTooLarge { size, max });
            }
        }

        let mut partitions = self.partitions.write();
        let partition = self.partition_for(key.as_ref(), partitions.len());
        let records = &mut partitions[partition];
        records.push(StoredRecord { key, value });
        Ok((partition as u32, records.len() as u64 - 1))
    }

    fn end_offsets(&self) -> Vec<u64> {
        self.partitions
            .read()
            .iter()
            .map(|records| records.len() as u64)
            .collect()
    }

    fn record_at(&self, partition: usize, offset: u64) -> Option<StoredRecord> {
        self.partitions
            .read()
            .get(partition)
            .and_then(|records| records.get(offset as usize))
            .cloned()
    }
}

/// A set of in-memory topics shared by many log clients
#[derive(Debug, Clone, Default)]
pub struct MemoryCluster {
    topics: Arc<Mutex<HashMap<String, Arc<Topic>>>>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the topic if it does not exist yet; an existing topic keeps
    /// its original layout.
    fn ensure_topic(&self, descriptor: &TopicDescriptor) -> Arc<Topic> {
        let mut topics = self.topics.lock();
        topics
            .entry(descriptor.name.clone())
            .or_insert_with(|| {
                tracing::info!(
                    "Creating topic {} ({} partitions, replication factor {})",
                    descriptor.name,
                    descriptor.partitions,
                    descriptor.replication_factor
                );
                Arc::new(Topic::new(descriptor))
            })
            .clone()
    }

    /// Connect a new client to the topic described by `descriptor`
    pub fn client(&self, descriptor: &TopicDescriptor, on_record: ConsumeCallback) -> MemoryLog {
        let topic = self.ensure_topic(descriptor);
        let positions = vec![0; topic.end_offsets().len()];
        MemoryLog {
            topic,
            on_record,
            positions: Mutex::new(positions),
            running: AtomicBool::new(false),
        }
    }

    /// Append directly, as a writer outside any store would.
    /// Returns `(partition, offset)` of the new record.
    pub fn append(
        &self,
        descriptor: &TopicDescriptor,
        key: Option<Bytes>,
        value: Option<Bytes>,
    ) -> LogResult<(u32, u64)> {
        self.ensure_topic(descriptor).append(key, value)
    }

    /// Number of records in each partition of `topic`
    pub fn end_offsets(&self, topic: &str) -> Option<Vec<u64>> {
        self.topics.lock().get(topic).map(|t| t.end_offsets())
    }

    /// Factory handing out clients of this cluster
    pub fn factory(&self) -> MemoryLogFactory {
        MemoryLogFactory {
            cluster: self.clone(),
        }
    }
}

/// [`LogFactory`] backed by a [`MemoryCluster`]
#[derive(Debug, Clone)]
pub struct MemoryLogFactory {
    cluster: MemoryCluster,
}

impl LogFactory for MemoryLogFactory {
    fn create(
        &self,
        settings: &LogSettings,
        on_record: ConsumeCallback,
    ) -> crate::Result<Arc<dyn ReplicatedLog>> {
        Ok(Arc::new(self.cluster.client(&settings.topic, on_record)))
    }
}

/// One client of a [`MemoryCluster`] topic
pub struct MemoryLog {
    topic: Arc<Topic>,
    on_record: ConsumeCallback,
    /// Next offset to deliver, per partition. Held for the whole delivery so
    /// records reach the callback one at a time and in order.
    positions: Mutex<Vec<u64>>,
    running: AtomicBool,
}

impl MemoryLog {
    /// Deliver every record below `ends`
    fn catch_up(&self, ends: &[u64]) -> usize {
        let mut positions = self.positions.lock();
        if positions.len() < ends.len() {
            positions.resize(ends.len(), 0);
        }

        let mut delivered = 0;
        for (partition, &end) in ends.iter().enumerate() {
            while positions[partition] < end {
                let offset = positions[partition];
                let Some(record) = self.topic.record_at(partition, offset) else {
                    break;
                };
                (self.on_record)(Ok(LogRecord {
                    partition: partition as u32,
                    offset,
                    key: record.key,
                    value: record.value,
                }));
                positions[partition] += 1;
                delivered += 1;
            }
        }
        delivered
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl ReplicatedLog for MemoryLog {
    fn start(&self) -> LogResult<()> {
        self.running.store(true, Ordering::Release);
        let delivered = self.catch_up(&self.topic.end_offsets());
        tracing::info!(
            "Memory log client for {} started, replayed {} records",
            self.topic.name,
            delivered
        );
        Ok(())
    }

    fn stop(&self) -> LogResult<()> {
        self.running.store(false, Ordering::Release);
        Ok(())
    }

    fn send(&self, key: Option<Bytes>, value: Option<Bytes>, on_complete: SendCallback) {
        if !self.is_running() {
            on_complete(Err(LogError::NotRunning));
            return;
        }
        on_complete(self.topic.append(key, value).map(|_| ()));
    }

    fn read_to_end(&self, on_complete: BarrierCallback) {
        if !self.is_running() {
            on_complete(Err(LogError::NotRunning));
            return;
        }
        self.catch_up(&self.topic.end_offsets());
        on_complete(Ok(()));
    }
}
