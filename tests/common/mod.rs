//! Scripted log used by the integration tests
//!
//! The store is built with a factory that records the derived settings and
//! hands back a [`ScriptedLog`]. The test then drives every callback by hand:
//! what `start` replays, what `read_to_end` delivers before the barrier, and
//! when (and how) each `send` completes.

#![allow(dead_code)]

use bytes::Bytes;
use offsetkv::log::{
    BarrierCallback, ConsumeCallback, LogRecord, LogResult, ReplicatedLog, SendCallback,
};
use offsetkv::store::LogSettings;
use offsetkv::OffsetStore;
use parking_lot::Mutex;
use std::sync::Arc;

pub const TOPIC: &str = "connect-offsets";

pub fn bytes(s: &'static str) -> Option<Bytes> {
    Some(Bytes::from_static(s.as_bytes()))
}

pub fn record(partition: u32, offset: u64, key: Option<Bytes>, value: Option<Bytes>) -> LogRecord {
    LogRecord {
        partition,
        offset,
        key,
        value,
    }
}

/// Calls the store made on its log, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Start,
    Stop,
    Send(Option<Bytes>, Option<Bytes>),
    ReadToEnd,
}

type Script = Box<dyn Fn(&ConsumeCallback) -> LogResult<()> + Send + Sync>;

pub struct ScriptedLog {
    consume: ConsumeCallback,
    calls: Mutex<Vec<Call>>,
    pending_sends: Mutex<Vec<Option<SendCallback>>>,
    on_start: Mutex<Option<Script>>,
    on_read_to_end: Mutex<Option<Script>>,
}

impl ScriptedLog {
    fn new(consume: ConsumeCallback) -> Self {
        Self {
            consume,
            calls: Mutex::new(Vec::new()),
            pending_sends: Mutex::new(Vec::new()),
            on_start: Mutex::new(None),
            on_read_to_end: Mutex::new(None),
        }
    }

    /// What `start` does before returning
    pub fn on_start<F>(&self, script: F)
    where
        F: Fn(&ConsumeCallback) -> LogResult<()> + Send + Sync + 'static,
    {
        *self.on_start.lock() = Some(Box::new(script));
    }

    /// What `read_to_end` delivers before firing its barrier with the
    /// script's result
    pub fn on_read_to_end<F>(&self, script: F)
    where
        F: Fn(&ConsumeCallback) -> LogResult<()> + Send + Sync + 'static,
    {
        *self.on_read_to_end.lock() = Some(Box::new(script));
    }

    /// Deliver a record through the consumption callback right now
    pub fn deliver(&self, record: LogRecord) {
        (self.consume)(Ok(record));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Records passed to `send`, in submission order
    pub fn sent(&self) -> Vec<(Option<Bytes>, Option<Bytes>)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                Call::Send(k, v) => Some((k.clone(), v.clone())),
                _ => None,
            })
            .collect()
    }

    /// Acknowledge or reject the `index`-th send
    pub fn complete_send(&self, index: usize, result: LogResult<()>) {
        let callback = self.pending_sends.lock()[index]
            .take()
            .expect("send already completed");
        callback(result);
    }
}

impl ReplicatedLog for ScriptedLog {
    fn start(&self) -> LogResult<()> {
        self.calls.lock().push(Call::Start);
        match self.on_start.lock().as_ref() {
            Some(script) => script(&self.consume),
            None => Ok(()),
        }
    }

    fn stop(&self) -> LogResult<()> {
        self.calls.lock().push(Call::Stop);
        Ok(())
    }

    fn send(&self, key: Option<Bytes>, value: Option<Bytes>, on_complete: SendCallback) {
        self.calls.lock().push(Call::Send(key, value));
        self.pending_sends.lock().push(Some(on_complete));
    }

    fn read_to_end(&self, on_complete: BarrierCallback) {
        self.calls.lock().push(Call::ReadToEnd);
        let result = match self.on_read_to_end.lock().as_ref() {
            Some(script) => script(&self.consume),
            None => Ok(()),
        };
        on_complete(result);
    }
}

/// Captures what `configure` produced
#[derive(Clone, Default)]
pub struct Harness {
    log: Arc<Mutex<Option<Arc<ScriptedLog>>>>,
    settings: Arc<Mutex<Option<LogSettings>>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose log client is a fresh [`ScriptedLog`]
    pub fn store(&self) -> OffsetStore {
        let log_slot = self.log.clone();
        let settings_slot = self.settings.clone();
        OffsetStore::new(
            move |settings: &LogSettings,
                  consume: ConsumeCallback|
                  -> offsetkv::Result<Arc<dyn ReplicatedLog>> {
                let log = Arc::new(ScriptedLog::new(consume));
                *log_slot.lock() = Some(log.clone());
                *settings_slot.lock() = Some(settings.clone());
                Ok(log)
            },
        )
    }

    pub fn log(&self) -> Arc<ScriptedLog> {
        self.log.lock().clone().expect("store was not configured")
    }

    pub fn settings(&self) -> LogSettings {
        self.settings.lock().clone().expect("store was not configured")
    }
}
