//! Per-transfer edit context shared by all editors in a chain

use serde::{Deserialize, Serialize};

/// How the current transfer should be aborted, if at all.
///
/// Set by editors, read by the streaming client after the chain has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Abort {
    /// Continue normally
    #[default]
    None,
    /// Skip only the current object; the outbound association stays open
    FileException,
    /// Tear down the outbound association entirely
    ConnectionException,
}

/// Mutable context carried through one editor chain invocation.
///
/// Created fresh per forwarded object and mutated only by editors.
#[derive(Debug, Clone)]
pub struct EditContext {
    /// Transfer syntax UID negotiated for the outbound transfer
    pub transfer_syntax: String,

    /// AE title of the node the object was received from
    pub source_aet: String,

    /// AE title of the node the object is being forwarded to
    pub destination_aet: String,

    abort: Abort,
    abort_message: Option<String>,
}

impl EditContext {
    /// Create a new context for one object transfer
    pub fn new(
        transfer_syntax: impl Into<String>,
        source_aet: impl Into<String>,
        destination_aet: impl Into<String>,
    ) -> Self {
        Self {
            transfer_syntax: transfer_syntax.into(),
            source_aet: source_aet.into(),
            destination_aet: destination_aet.into(),
            abort: Abort::None,
            abort_message: None,
        }
    }

    /// Request an abort of the current transfer
    pub fn set_abort(&mut self, abort: Abort, message: impl Into<String>) {
        self.abort = abort;
        self.abort_message = Some(message.into());
    }

    /// The abort reason requested so far
    pub fn abort(&self) -> Abort {
        self.abort
    }

    /// Message attached to the abort request, if any
    pub fn abort_message(&self) -> Option<&str> {
        self.abort_message.as_deref()
    }
}
