//! Shared progress state for multi-object operations
//!
//! One `ProgressState` tracks the sub-operations of a relay batch or a
//! retrieve: counters, timestamps, byte count, and a derived terminal
//! status/message pair. It is updated by the relay while callers poll it or
//! observe it through a listener callback, so counters are only read as an
//! atomic snapshot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use dicom_object::InMemDicomObject;

use crate::{status, RelayError};

/// Callback fired with a fresh snapshot on every progress update
pub type ProgressListener = Box<dyn Fn(&ProgressSnapshot) + Send + Sync>;

/// A consistent point-in-time view of an operation's progress
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    /// Current DIMSE status code
    pub status: u16,
    /// Human-readable progress message
    pub message: String,
    /// Sub-operations completed successfully
    pub completed: u32,
    /// Sub-operations failed
    pub failed: u32,
    /// Sub-operations completed with warnings
    pub warning: u32,
    /// Sub-operations not yet attempted
    pub remaining: u32,
    /// Total sub-operations declared so far
    pub total: u32,
    /// When connection establishment began
    pub start_connect: Option<DateTime<Utc>>,
    /// When the first transfer began
    pub start_transfer: Option<DateTime<Utc>>,
    /// When the last transfer ended
    pub end_transfer: Option<DateTime<Utc>>,
    /// Dataset bytes transferred so far
    pub bytes_transferred: u64,
}

/// Final `{status, message}` pair derived from a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// Terminal DIMSE status code
    pub status: u16,
    /// Human-readable outcome message
    pub message: String,
}

#[derive(Default)]
struct Inner {
    status: u16,
    message: String,
    completed: u32,
    failed: u32,
    warning: u32,
    remaining: u32,
    total: u32,
    start_connect: Option<DateTime<Utc>>,
    start_transfer: Option<DateTime<Utc>>,
    end_transfer: Option<DateTime<Utc>>,
    bytes_transferred: u64,
    matching_keys: Vec<InMemDicomObject>,
    response_objects: Vec<InMemDicomObject>,
}

/// Aggregated, concurrently updated outcome of one operation
pub struct ProgressState {
    inner: Mutex<Inner>,
    cancelled: AtomicBool,
    listener: Mutex<Option<ProgressListener>>,
}

impl ProgressState {
    /// Create a fresh progress state in the pending status
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                status: status::PENDING,
                ..Default::default()
            }),
            cancelled: AtomicBool::new(false),
            listener: Mutex::new(None),
        }
    }

    /// Register the listener fired on every update, replacing any previous one
    pub fn set_listener(&self, listener: ProgressListener) {
        *self.listener.lock().expect("progress listener poisoned") = Some(listener);
    }

    fn update<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let (result, snap) = {
            let mut inner = self.inner.lock().expect("progress state poisoned");
            let result = f(&mut inner);
            (result, Self::snapshot_of(&inner, self.is_cancelled()))
        };
        if let Some(listener) = self.listener.lock().expect("progress listener poisoned").as_ref() {
            listener(&snap);
        }
        result
    }

    fn snapshot_of(inner: &Inner, cancelled: bool) -> ProgressSnapshot {
        ProgressSnapshot {
            status: if cancelled { status::CANCEL } else { inner.status },
            message: inner.message.clone(),
            completed: inner.completed,
            failed: inner.failed,
            warning: inner.warning,
            remaining: inner.remaining,
            total: inner.total,
            start_connect: inner.start_connect,
            start_transfer: inner.start_transfer,
            end_transfer: inner.end_transfer,
            bytes_transferred: inner.bytes_transferred,
        }
    }

    /// Declare `n` additional expected sub-operations
    pub fn expect(&self, n: u32) {
        self.update(|inner| {
            inner.remaining += n;
            inner.total += n;
        });
    }

    /// Record the start of connection establishment
    pub fn mark_start_connect(&self) {
        self.update(|inner| {
            if inner.start_connect.is_none() {
                inner.start_connect = Some(Utc::now());
            }
        });
    }

    /// Record the start of data transfer
    pub fn mark_start_transfer(&self) {
        self.update(|inner| {
            if inner.start_transfer.is_none() {
                inner.start_transfer = Some(Utc::now());
            }
        });
    }

    /// Record the end of data transfer
    pub fn mark_end_transfer(&self) {
        self.update(|inner| inner.end_transfer = Some(Utc::now()));
    }

    /// Count one sub-operation as completed, adding its transferred bytes
    pub fn complete_one(&self, bytes: u64) {
        self.update(|inner| {
            inner.remaining = inner.remaining.saturating_sub(1);
            inner.completed += 1;
            inner.bytes_transferred += bytes;
        });
    }

    /// Count one sub-operation as failed
    pub fn fail_one(&self) {
        self.update(|inner| {
            inner.remaining = inner.remaining.saturating_sub(1);
            inner.failed += 1;
        });
    }

    /// Count one sub-operation as completed with a warning
    pub fn warn_one(&self) {
        self.update(|inner| {
            inner.remaining = inner.remaining.saturating_sub(1);
            inner.warning += 1;
        });
    }

    /// Override the current status code
    pub fn set_status(&self, status: u16) {
        self.update(|inner| inner.status = status);
    }

    /// Replace the progress message
    pub fn set_message(&self, message: impl Into<String>) {
        let message = message.into();
        self.update(|inner| inner.message = message);
    }

    /// Record a matching key returned by a query
    pub fn add_matching_key(&self, key: InMemDicomObject) {
        self.update(|inner| inner.matching_keys.push(key));
    }

    /// Record a response object returned by the remote
    pub fn add_response_object(&self, object: InMemDicomObject) {
        self.update(|inner| inner.response_objects.push(object));
    }

    /// Matching keys collected so far
    pub fn matching_keys(&self) -> Vec<InMemDicomObject> {
        self.inner
            .lock()
            .expect("progress state poisoned")
            .matching_keys
            .clone()
    }

    /// Response objects collected so far
    pub fn response_objects(&self) -> Vec<InMemDicomObject> {
        self.inner
            .lock()
            .expect("progress state poisoned")
            .response_objects
            .clone()
    }

    /// Request cancellation.
    ///
    /// Advisory only: in-flight sends are not interrupted, but every
    /// subsequent status query reports a terminal cancelled state.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Take a consistent snapshot of the current progress
    pub fn snapshot(&self) -> ProgressSnapshot {
        let inner = self.inner.lock().expect("progress state poisoned");
        Self::snapshot_of(&inner, self.is_cancelled())
    }

    /// Derive the final `{status, message}` pair for this operation.
    ///
    /// Deterministic given the same counters and error. `timing` is a
    /// caller-supplied summary appended only when nothing failed.
    pub fn outcome(&self, timing: Option<&str>, error: Option<&RelayError>) -> Outcome {
        let snap = self.snapshot();
        let mut message = String::new();
        let mut any_failed = false;

        if snap.failed > 0 {
            message = format!(
                "{}/{} operations failed.",
                snap.failed,
                snap.failed + snap.completed
            );
            any_failed = true;
        } else if snap.remaining > 0 {
            message = format!("{} operations remain.", snap.remaining);
        } else if snap.warning > 0 {
            message = format!("{} operations completed with a warning status.", snap.warning);
        }

        if let Some(e) = error {
            if !message.is_empty() {
                message.push(' ');
            }
            message.push_str(&e.to_string());
            any_failed = true;
        }

        let mut code = snap.status;
        if status::is_pending(code) && any_failed {
            code = status::PROCESSING_FAILURE;
        }

        if !any_failed {
            if let Some(t) = timing {
                if !message.is_empty() {
                    message.push(' ');
                }
                message.push_str(t);
            }
        }

        Outcome {
            status: code,
            message,
        }
    }
}

impl Default for ProgressState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    #[test]
    fn test_counter_sum_is_invariant() {
        let progress = ProgressState::new();
        progress.expect(5);

        progress.complete_one(100);
        progress.fail_one();
        progress.warn_one();

        let snap = progress.snapshot();
        assert_eq!(snap.completed + snap.failed + snap.warning + snap.remaining, 5);
        assert_eq!(snap.total, 5);
        assert_eq!(snap.bytes_transferred, 100);

        progress.complete_one(50);
        progress.complete_one(25);
        let snap = progress.snapshot();
        assert_eq!(snap.completed + snap.failed + snap.warning + snap.remaining, 5);
        assert_eq!(snap.remaining, 0);
    }

    #[test]
    fn test_outcome_failed_counters() {
        let progress = ProgressState::new();
        progress.expect(3);
        progress.complete_one(10);
        progress.fail_one();
        progress.fail_one();

        let outcome = progress.outcome(None, None);
        assert_eq!(outcome.message, "2/3 operations failed.");
        assert_eq!(outcome.status, status::PROCESSING_FAILURE);
    }

    #[test]
    fn test_outcome_remaining_and_warning() {
        let progress = ProgressState::new();
        progress.expect(2);
        progress.complete_one(1);
        assert_eq!(progress.outcome(None, None).message, "1 operations remain.");

        progress.warn_one();
        assert_eq!(
            progress.outcome(None, None).message,
            "1 operations completed with a warning status."
        );
    }

    #[test]
    fn test_outcome_error_marks_failed() {
        let progress = ProgressState::new();
        progress.expect(1);
        progress.complete_one(1);
        progress.set_status(status::PENDING);

        let err = RelayError::timeout("no response from remote");
        let outcome = progress.outcome(Some("ignored"), Some(&err));
        assert!(outcome.message.contains("no response from remote"));
        assert_eq!(outcome.status, status::PROCESSING_FAILURE);
    }

    #[test]
    fn test_outcome_success_appends_timing() {
        let progress = ProgressState::new();
        progress.expect(2);
        progress.complete_one(10);
        progress.complete_one(10);
        progress.set_status(status::SUCCESS);

        let outcome = progress.outcome(Some("2 objects in 40ms"), None);
        assert_eq!(outcome.status, status::SUCCESS);
        assert_eq!(outcome.message, "2 objects in 40ms");
    }

    #[test]
    fn test_cancel_is_terminal_for_queries() {
        let progress = ProgressState::new();
        progress.expect(4);
        progress.cancel();

        assert!(progress.is_cancelled());
        assert_eq!(progress.snapshot().status, status::CANCEL);

        // Late updates do not resurrect the operation
        progress.complete_one(1);
        assert_eq!(progress.snapshot().status, status::CANCEL);
    }

    #[test]
    fn test_listener_fires_on_every_update() {
        let progress = ProgressState::new();
        let fired = Arc::new(AtomicU32::new(0));
        let observed = fired.clone();
        progress.set_listener(Box::new(move |_| {
            observed.fetch_add(1, Ordering::SeqCst);
        }));

        progress.expect(2);
        progress.complete_one(1);
        progress.fail_one();
        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }
}
