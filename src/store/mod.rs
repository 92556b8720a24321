//! Offset store: a key-value cache over a compacted replicated log
//!
//! Lifecycle: `configure` → `start` → serve `get`/`set` → `stop`.
//!
//! - `start` replays the whole log into the in-memory snapshot.
//! - `get` issues a read-to-end barrier and answers from the snapshot once
//!   the barrier fires, so it sees every record committed before the call,
//!   whoever wrote it.
//! - `set` appends one record per entry and completes once, after every
//!   append was acknowledged or rejected.
//!
//! The store never applies its own writes to the snapshot directly. They
//! become visible once the log delivers them back through the consumption
//! callback, which the next `get` waits for.

pub mod batch;
pub mod settings;
pub mod snapshot;

pub use batch::SetCallback;
pub use settings::{
    derive_consumer_isolation, ClientProperties, IsolationLevel, LogSettings, TopicDescriptor,
    MAX_MESSAGE_BYTES, MIN_INSYNC_REPLICAS,
};
pub use snapshot::{Snapshot, SnapshotStats};

use crate::common::{Error, Result, StoreConfig};
use crate::log::{ConsumeCallback, LogFactory, LogRecord, LogResult, ReplicatedLog};
use batch::PendingBatch;
use bytes::Bytes;
use futures_util::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Future returned by `get` and `set`
pub type StoreFuture<T> = BoxFuture<'static, Result<T>>;

/// Requested key → current value (`None` when absent)
pub type OffsetMap = HashMap<Option<Bytes>, Option<Bytes>>;

/// Observable lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    Unconfigured,
    Configured,
    Starting,
    Started,
    Stopped,
    /// Start failed; the store must be rebuilt
    Failed,
}

impl StoreState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreState::Unconfigured => "unconfigured",
            StoreState::Configured => "configured",
            StoreState::Starting => "starting",
            StoreState::Started => "started",
            StoreState::Stopped => "stopped",
            StoreState::Failed => "failed",
        }
    }
}

impl fmt::Display for StoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

enum Lifecycle {
    Unconfigured,
    Configured(Arc<dyn ReplicatedLog>),
    Starting,
    Started(Arc<dyn ReplicatedLog>),
    Stopped,
    Failed,
}

impl Lifecycle {
    fn state(&self) -> StoreState {
        match self {
            Lifecycle::Unconfigured => StoreState::Unconfigured,
            Lifecycle::Configured(_) => StoreState::Configured,
            Lifecycle::Starting => StoreState::Starting,
            Lifecycle::Started(_) => StoreState::Started,
            Lifecycle::Stopped => StoreState::Stopped,
            Lifecycle::Failed => StoreState::Failed,
        }
    }

    fn invalid(&self, operation: &'static str) -> Error {
        Error::InvalidState {
            operation,
            state: self.state().as_str(),
        }
    }
}

/// Strongly-consistent key-value cache backed by a replicated log
pub struct OffsetStore {
    factory: Arc<dyn LogFactory>,
    snapshot: Arc<Snapshot>,
    lifecycle: Mutex<Lifecycle>,
    settings: Mutex<Option<LogSettings>>,
}

impl OffsetStore {
    /// Create an unconfigured store whose log client will come from `factory`
    pub fn new<F>(factory: F) -> Self
    where
        F: LogFactory + 'static,
    {
        Self {
            factory: Arc::new(factory),
            snapshot: Arc::new(Snapshot::new()),
            lifecycle: Mutex::new(Lifecycle::Unconfigured),
            settings: Mutex::new(None),
        }
    }

    pub fn state(&self) -> StoreState {
        self.lifecycle.lock().state()
    }

    /// Settings derived by the last successful `configure`
    pub fn settings(&self) -> Option<LogSettings> {
        self.settings.lock().clone()
    }

    pub fn snapshot_stats(&self) -> SnapshotStats {
        self.snapshot.stats()
    }

    /// Derive the log settings and construct (without starting) the log
    /// client. May be repeated until the store is started.
    pub fn configure(&self, config: &StoreConfig) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        if !matches!(*lifecycle, Lifecycle::Unconfigured | Lifecycle::Configured(_)) {
            return Err(lifecycle.invalid("configure"));
        }

        let settings = LogSettings::derive(config)?;
        let snapshot = self.snapshot.clone();
        let on_record: ConsumeCallback = Arc::new(move |record: LogResult<LogRecord>| match record {
            Ok(record) => snapshot.apply(record),
            Err(e) => tracing::error!("Error reading offsets log: {}", e),
        });
        let log = self.factory.create(&settings, on_record)?;

        tracing::info!(
            "Configured offset store on log {} ({} partitions, replication factor {})",
            settings.topic.name,
            settings.topic.partitions,
            settings.topic.replication_factor
        );
        *self.settings.lock() = Some(settings);
        *lifecycle = Lifecycle::Configured(log);
        Ok(())
    }

    /// Start the log client and replay the log. Blocks until the replay is
    /// complete. A failure here leaves the store unusable.
    pub fn start(&self) -> Result<()> {
        let log = {
            let mut lifecycle = self.lifecycle.lock();
            match std::mem::replace(&mut *lifecycle, Lifecycle::Starting) {
                Lifecycle::Configured(log) => log,
                other => {
                    let err = other.invalid("start");
                    *lifecycle = other;
                    return Err(err);
                }
            }
        };

        tracing::info!("Starting offset store");
        match log.start() {
            Ok(()) => {
                let stats = self.snapshot.stats();
                tracing::info!(
                    "Finished reading offsets log: {} records, {} keys",
                    stats.applied,
                    stats.keys
                );
                *self.lifecycle.lock() = Lifecycle::Started(log);
                Ok(())
            }
            Err(e) => {
                tracing::error!("Failed to start offset store: {}", e);
                *self.lifecycle.lock() = Lifecycle::Failed;
                Err(e.into())
            }
        }
    }

    /// Stop the log client. Terminal: the store cannot be restarted.
    pub fn stop(&self) -> Result<()> {
        let log = {
            let mut lifecycle = self.lifecycle.lock();
            match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
                Lifecycle::Started(log) => log,
                other => {
                    let err = other.invalid("stop");
                    *lifecycle = other;
                    return Err(err);
                }
            }
        };

        tracing::info!("Stopping offset store");
        log.stop()?;
        tracing::info!("Stopped offset store");
        Ok(())
    }

    fn running_log(&self, operation: &'static str) -> Result<Arc<dyn ReplicatedLog>> {
        match &*self.lifecycle.lock() {
            Lifecycle::Started(log) => Ok(log.clone()),
            Lifecycle::Stopped => Err(Error::Stopped),
            other => Err(other.invalid(operation)),
        }
    }

    /// Read the current values of `keys`, after catching up with every
    /// record committed to the log before this call.
    pub fn get<I>(&self, keys: I) -> StoreFuture<OffsetMap>
    where
        I: IntoIterator<Item = Option<Bytes>>,
    {
        let log = match self.running_log("get") {
            Ok(log) => log,
            Err(e) => return future::ready(Err(e)).boxed(),
        };

        let keys: Vec<Option<Bytes>> = keys.into_iter().collect();
        let snapshot = self.snapshot.clone();
        let (tx, rx) = oneshot::channel();
        log.read_to_end(Box::new(move |result: LogResult<()>| {
            let outcome = match result {
                Ok(()) => Ok(snapshot.lookup(&keys)),
                Err(e) => {
                    tracing::warn!("Read to end of offsets log failed: {}", e);
                    Err(Error::Log(e))
                }
            };
            let _ = tx.send(outcome);
        }));

        async move {
            rx.await.unwrap_or_else(|_| {
                Err(Error::Internal(
                    "read-to-end callback dropped without completing".into(),
                ))
            })
        }
        .boxed()
    }

    /// Append one record per entry. `callback` and the returned future both
    /// complete once, after every append reached a terminal state, with the
    /// first error observed or success. The callback runs first.
    pub fn set<I, F>(&self, entries: I, callback: F) -> StoreFuture<()>
    where
        I: IntoIterator<Item = (Option<Bytes>, Option<Bytes>)>,
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let log = match self.running_log("set") {
            Ok(log) => log,
            Err(e) => {
                callback(Err(e.clone()));
                return future::ready(Err(e)).boxed();
            }
        };

        let entries: Vec<_> = entries.into_iter().collect();
        tracing::debug!("Writing {} offset records", entries.len());
        let (batch, rx) = PendingBatch::new(entries.len(), Box::new(callback));
        for (key, value) in entries {
            let batch = batch.clone();
            log.send(key, value, Box::new(move |result: LogResult<()>| {
                batch.record_completed(result)
            }));
        }

        async move {
            rx.await.unwrap_or_else(|_| {
                Err(Error::Internal(
                    "offset batch dropped without completing".into(),
                ))
            })
        }
        .boxed()
    }
}
