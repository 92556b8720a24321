//! Replicated log client interface
//!
//! The store never talks to a log cluster directly. It is handed a
//! [`ReplicatedLog`] by a [`LogFactory`] during `configure`, and from then on
//! only uses four operations:
//! - `start`: blocks until every existing record was delivered to the
//!   consumption callback
//! - `stop`: shuts the client down
//! - `send`: appends one record and reports the broker's verdict exactly once
//! - `read_to_end`: fires once every record committed before the call has
//!   been delivered to the consumption callback
//!
//! Two in-tree implementations exist: [`memory::MemoryCluster`] for tests and
//! multi-worker simulations, and [`file::FileLog`] for single-node use.

pub mod file;
pub mod memory;

use crate::store::LogSettings;
use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;

pub use file::{FileLog, FileLogFactory};
pub use memory::{MemoryCluster, MemoryLog};

pub type LogResult<T> = std::result::Result<T, LogError>;

/// Failures reported by a log client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LogError {
    #[error("log client is not running")]
    NotRunning,

    #[error("record too large: {size} > {max} bytes")]
    RecordTooLarge { size: usize, max: usize },

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("read failed: {0}")]
    Read(String),

    #[error("write failed: {0}")]
    Write(String),

    #[error("corrupted record: {0}")]
    Corrupted(String),

    #[error("{0}")]
    Other(String),
}

impl From<std::io::Error> for LogError {
    fn from(e: std::io::Error) -> Self {
        LogError::Write(e.to_string())
    }
}

/// One record as delivered to the consumption callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub partition: u32,
    pub offset: u64,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
}

/// Invoked once per delivered record, in commit order per partition
pub type ConsumeCallback = Arc<dyn Fn(LogResult<LogRecord>) + Send + Sync>;

/// Invoked exactly once when an appended record is acknowledged or rejected
pub type SendCallback = Box<dyn FnOnce(LogResult<()>) + Send>;

/// Invoked exactly once when the read-to-end barrier is reached or fails
pub type BarrierCallback = Box<dyn FnOnce(LogResult<()>) + Send>;

/// Client of an append-only, partitioned, replicated log
pub trait ReplicatedLog: Send + Sync {
    /// Start consuming; returns after the existing log was replayed
    fn start(&self) -> LogResult<()>;

    /// Stop the client
    fn stop(&self) -> LogResult<()>;

    /// Append one record. `None` value is a tombstone; `None` key is legal.
    fn send(&self, key: Option<Bytes>, value: Option<Bytes>, on_complete: SendCallback);

    /// Fire `on_complete` once everything committed before this call has
    /// been delivered to the consumption callback
    fn read_to_end(&self, on_complete: BarrierCallback);
}

/// Builds the log client from the settings derived by `configure`
pub trait LogFactory: Send + Sync {
    fn create(
        &self,
        settings: &LogSettings,
        on_record: ConsumeCallback,
    ) -> crate::Result<Arc<dyn ReplicatedLog>>;
}

impl<F> LogFactory for F
where
    F: Fn(&LogSettings, ConsumeCallback) -> crate::Result<Arc<dyn ReplicatedLog>> + Send + Sync,
{
    fn create(
        &self,
        settings: &LogSettings,
        on_record: ConsumeCallback,
    ) -> crate::Result<Arc<dyn ReplicatedLog>> {
        self(settings, on_record)
    }
}
