//! Outbound forwarding destinations
//!
//! A destination owns exactly one outbound association, its editor chain,
//! and a reference back to the relay identity it forwards for. Association
//! lifecycle is an explicit state machine so the reconnect policy can be
//! exercised without real I/O: `Closed -> Opening -> Ready`, back to
//! `Closed` on failure or `stop()`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use cadence_edit::{Abort, EditContext, EditorChain};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::association::{AssociationParams, Connector};
use crate::identity::{ForwardingIdentity, NodeIdentity};
use crate::progress::ProgressState;
use crate::types::{Priority, StorePayload, EXPLICIT_VR_LE};
use crate::{RelayError, Result};

/// Association lifecycle state of a destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No outbound association exists
    Closed,
    /// Association establishment in progress
    Opening,
    /// Association usable for data transfer
    Ready,
}

/// Result of forwarding one object to one destination
#[derive(Debug, Clone)]
pub enum SendOutcome {
    /// Object was streamed to the destination
    Sent {
        /// Dataset bytes written
        bytes: u64,
        /// Status code acknowledged by the remote
        status: u16,
    },
    /// Object was skipped by the editor chain; the association stays open
    Skipped {
        /// Why the object was skipped
        reason: String,
    },
}

/// One configured outbound target of the relay
#[async_trait]
pub trait ForwardDestination: Send + Sync {
    /// The relay identity this destination forwards for
    fn forwarding_identity(&self) -> &ForwardingIdentity;

    /// The remote endpoint this destination delivers to
    fn remote(&self) -> &NodeIdentity;

    /// Edit and stream one object to the remote endpoint
    async fn forward(
        &self,
        source: &NodeIdentity,
        object: &StorePayload,
        progress: &ProgressState,
    ) -> Result<SendOutcome>;

    /// Release the outbound association. Idempotent.
    async fn stop(&self);
}

struct Link {
    state: ConnectionState,
    association: Option<Box<dyn crate::association::Association>>,
}

/// Destination that lazily opens and reuses one outbound association,
/// streaming each edited dataset through it.
pub struct StreamingForwardClient {
    identity: ForwardingIdentity,
    remote: NodeIdentity,
    editors: EditorChain,
    connector: Arc<dyn Connector>,
    params: AssociationParams,
    priority: Priority,
    // Single-writer discipline: all association access goes through this lock
    link: Mutex<Link>,
    stopped: AtomicBool,
}

impl StreamingForwardClient {
    /// Create a destination for the given remote endpoint
    pub fn new(
        identity: ForwardingIdentity,
        remote: NodeIdentity,
        editors: EditorChain,
        connector: Arc<dyn Connector>,
        params: AssociationParams,
    ) -> Self {
        Self {
            identity,
            remote,
            editors,
            connector,
            params,
            priority: Priority::default(),
            link: Mutex::new(Link {
                state: ConnectionState::Closed,
                association: None,
            }),
            stopped: AtomicBool::new(false),
        }
    }

    /// Set the priority used for outbound stores
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Current lifecycle state
    pub async fn connection_state(&self) -> ConnectionState {
        self.link.lock().await.state
    }

    /// Open the association if none exists or the current one has become
    /// unusable. Reconnect-on-demand, not a retry loop: one attempt per send.
    async fn ensure_ready(&self, link: &mut Link, progress: &ProgressState) -> Result<()> {
        let usable = link
            .association
            .as_ref()
            .map(|a| a.is_ready_for_data_transfer())
            .unwrap_or(false);
        if usable {
            return Ok(());
        }

        if let Some(mut stale) = link.association.take() {
            debug!("Association to {} no longer ready, reopening", self.remote);
            stale.close().await;
        }

        link.state = ConnectionState::Opening;
        progress.mark_start_connect();

        let connect = self
            .connector
            .connect(self.identity.node(), &self.remote, &self.params);
        let mut association = match tokio::time::timeout(self.params.connect_timeout, connect).await
        {
            Ok(Ok(a)) => a,
            Ok(Err(e)) => {
                link.state = ConnectionState::Closed;
                return Err(e);
            }
            Err(_) => {
                link.state = ConnectionState::Closed;
                return Err(RelayError::timeout(format!(
                    "Connecting to {} timed out after {:?}",
                    self.remote, self.params.connect_timeout
                )));
            }
        };

        if let Err(e) = association.open().await {
            link.state = ConnectionState::Closed;
            return Err(e);
        }

        link.association = Some(association);
        link.state = ConnectionState::Ready;
        Ok(())
    }

    async fn teardown(&self, link: &mut Link) {
        if let Some(mut association) = link.association.take() {
            association.close().await;
        }
        link.state = ConnectionState::Closed;
    }
}

#[async_trait]
impl ForwardDestination for StreamingForwardClient {
    fn forwarding_identity(&self) -> &ForwardingIdentity {
        &self.identity
    }

    fn remote(&self) -> &NodeIdentity {
        &self.remote
    }

    async fn forward(
        &self,
        source: &NodeIdentity,
        object: &StorePayload,
        progress: &ProgressState,
    ) -> Result<SendOutcome> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(RelayError::Stopped);
        }

        let mut link = self.link.lock().await;
        self.ensure_ready(&mut link, progress).await?;

        let transfer_syntax = object
            .meta()
            .transfer_syntax
            .clone()
            .unwrap_or_else(|| EXPLICIT_VR_LE.to_string());
        let mut ctx = EditContext::new(&transfer_syntax, source.aet(), self.remote.aet());

        // Run the edit chain against a private copy. Without editors the
        // inbound payload is streamed onward as-is, so encoded bulk data is
        // never re-parsed.
        let edited = if self.editors.is_empty() {
            None
        } else {
            let mut dataset = object.to_object()?;
            self.editors.apply(&mut dataset, &mut ctx)?;

            match ctx.abort() {
                Abort::FileException => {
                    let reason = ctx
                        .abort_message()
                        .unwrap_or("skipped by editor")
                        .to_string();
                    warn!("Skipping object for {}: {}", self.remote, reason);
                    return Ok(SendOutcome::Skipped { reason });
                }
                Abort::ConnectionException => {
                    let reason = ctx
                        .abort_message()
                        .unwrap_or("aborted by editor")
                        .to_string();
                    warn!("Aborting association to {}: {}", self.remote, reason);
                    self.teardown(&mut link).await;
                    return Err(RelayError::ConnectionAborted(reason));
                }
                Abort::None => {
                    let mut payload = StorePayload::from_object(dataset);
                    payload.meta_mut().transfer_syntax = Some(transfer_syntax.clone());
                    Some(payload)
                }
            }
        };
        let outgoing = edited.as_ref().unwrap_or(object);

        let sop_class_uid = outgoing.meta().sop_class_uid.clone().unwrap_or_default();
        let sop_instance_uid = outgoing.meta().sop_instance_uid.clone().unwrap_or_default();

        progress.mark_start_transfer();

        let result = match link.association.as_mut() {
            Some(association) => {
                association
                    .store(
                        &sop_class_uid,
                        &sop_instance_uid,
                        self.priority,
                        outgoing,
                        &transfer_syntax,
                    )
                    .await
            }
            None => Err(RelayError::internal("association missing after open")),
        };

        match result {
            Ok(ack) => {
                link.state = ConnectionState::Ready;
                debug!(
                    "Forwarded {} to {} ({} bytes)",
                    sop_instance_uid, self.remote, ack.bytes_transferred
                );
                Ok(SendOutcome::Sent {
                    bytes: ack.bytes_transferred,
                    status: ack.status,
                })
            }
            Err(e) => {
                warn!("Send to {} failed: {}", self.remote, e);
                self.teardown(&mut link).await;
                Err(e)
            }
        }
    }

    async fn stop(&self) {
        let first = !self.stopped.swap(true, Ordering::SeqCst);
        let mut link = self.link.lock().await;
        if let Some(mut association) = link.association.take() {
            if association.release().await.is_err() {
                association.close().await;
            }
        }
        link.state = ConnectionState::Closed;
        if first {
            info!("Destination {} stopped", self.remote);
        }
    }
}
