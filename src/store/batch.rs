//! Completion tracking for one `set` call
//!
//! A batch of N records is appended as N independent sends whose
//! acknowledgements may arrive in any order and on any thread. The batch
//! fires its single completion once the last of them arrives, carrying the
//! first error observed (by arrival order) or success.

use crate::common::{Error, Result};
use crate::log::{LogError, LogResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::oneshot;

/// Caller-supplied completion for `set`
pub type SetCallback = Box<dyn FnOnce(Result<()>) + Send>;

struct Completion {
    callback: SetCallback,
    sender: oneshot::Sender<Result<()>>,
}

pub(crate) struct PendingBatch {
    outstanding: AtomicUsize,
    first_error: OnceLock<LogError>,
    completion: Mutex<Option<Completion>>,
}

impl PendingBatch {
    /// Create a batch expecting `records` completions. An empty batch
    /// completes immediately.
    pub(crate) fn new(
        records: usize,
        callback: SetCallback,
    ) -> (Arc<Self>, oneshot::Receiver<Result<()>>) {
        let (sender, receiver) = oneshot::channel();
        let batch = Arc::new(Self {
            outstanding: AtomicUsize::new(records),
            first_error: OnceLock::new(),
            completion: Mutex::new(Some(Completion { callback, sender })),
        });
        if records == 0 {
            batch.fire();
        }
        (batch, receiver)
    }

    /// Record the terminal outcome of one append
    pub(crate) fn record_completed(&self, result: LogResult<()>) {
        if let Err(error) = result {
            if let Err(later) = self.first_error.set(error) {
                tracing::debug!("Offset batch already failed; dropping later error: {}", later);
            }
        }

        let previous = self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        match previous {
            Ok(1) => self.fire(),
            Ok(_) => {}
            Err(_) => tracing::warn!("Ignoring completion for an already finished offset batch"),
        }
    }

    #[cfg(test)]
    fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    fn fire(&self) {
        let Some(completion) = self.completion.lock().take() else {
            return;
        };
        let outcome = match self.first_error.get() {
            Some(error) => Err(Error::Log(error.clone())),
            None => Ok(()),
        };
        if let Err(ref e) = outcome {
            tracing::error!("Failed to write offsets to log: {}", e);
        }
        (completion.callback)(outcome.clone());
        // The caller may have dropped the future; the callback already ran.
        let _ = completion.sender.send(outcome);
    }
}
