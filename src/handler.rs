//! Inbound store handling
//!
//! The transport adapter invokes `InboundHandler::on_store` once per inbound
//! object. The relay implementation edits, routes, and forwards the object,
//! then acknowledges the inbound transfer. Downstream delivery failures are
//! recorded in the shared progress state, never thrown back across the
//! acknowledgment boundary: the source receives a timely acknowledgment for
//! its own transfer regardless of what happens downstream.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::config::StoreParams;
use crate::destination::{ForwardDestination, SendOutcome};
use crate::identity::NodeIdentity;
use crate::progress::ProgressState;
use crate::router::Router;
use crate::status;
use crate::types::StorePayload;

/// Acknowledgment returned to the transport layer for one inbound object
#[derive(Debug, Clone)]
pub struct StoreResponse {
    /// DIMSE status code for the inbound acknowledgment
    pub status: u16,

    /// Optional human-readable detail
    pub message: Option<String>,

    /// SOP Class UID of the acknowledged object, when known
    pub sop_class_uid: Option<String>,

    /// SOP Instance UID of the acknowledged object, when known
    pub sop_instance_uid: Option<String>,
}

impl StoreResponse {
    fn failure(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: Some(message.into()),
            sop_class_uid: None,
            sop_instance_uid: None,
        }
    }
}

/// Entry point invoked by the transport adapter once per inbound object
#[async_trait]
pub trait InboundHandler: Send + Sync {
    /// Handle one inbound object and produce its acknowledgment
    async fn on_store(&self, peer: &NodeIdentity, payload: StorePayload) -> StoreResponse;
}

/// The relay's inbound handler: edit, route, fan out, acknowledge
pub struct RelayHandler {
    router: Arc<Router>,
    params: StoreParams,
    progress: Arc<ProgressState>,
    // Bounds fan-out parallelism so one slow destination cannot starve the
    // transport thread pool
    limit: Arc<Semaphore>,
}

impl RelayHandler {
    /// Create a handler over the given router
    pub fn new(router: Arc<Router>, params: StoreParams, max_concurrent_forwards: usize) -> Self {
        Self {
            router,
            params,
            progress: Arc::new(ProgressState::new()),
            limit: Arc::new(Semaphore::new(max_concurrent_forwards.max(1))),
        }
    }

    /// The progress state updated as sub-operations complete
    pub fn progress(&self) -> Arc<ProgressState> {
        self.progress.clone()
    }
}

#[async_trait]
impl InboundHandler for RelayHandler {
    async fn on_store(&self, peer: &NodeIdentity, mut payload: StorePayload) -> StoreResponse {
        // The payload's spool file, if any, is removed when it drops at the
        // end of this scope, on every exit path.

        let targets = match self.router.resolve(peer) {
            Ok(targets) => targets,
            Err(e) => {
                warn!("Rejecting inbound object from {}: {}", peer, e);
                return StoreResponse::failure(status::UNABLE_TO_PROCESS, e.to_string());
            }
        };

        if let Err(e) = payload.hydrate() {
            error!("Failed to read inbound object from {}: {}", peer, e);
            return StoreResponse::failure(status::PROCESSING_FAILURE, e.to_string());
        }
        let meta = payload.meta().clone();
        debug!(
            "Relaying {} from {} to {} destination(s)",
            meta.sop_instance_uid.as_deref().unwrap_or("<unknown>"),
            peer,
            targets.len()
        );

        self.progress.expect(targets.len() as u32);

        let results = join_all(targets.iter().map(|destination| {
            let limit = self.limit.clone();
            let progress = self.progress.clone();
            let payload = &payload;
            async move {
                let _permit = limit
                    .acquire_owned()
                    .await
                    .expect("forward semaphore closed");
                let result = destination.forward(peer, payload, &progress).await;
                (destination.remote().clone(), result)
            }
        }))
        .await;

        let mut delivered = 0u32;
        let mut failed = 0u32;
        for (remote, result) in results {
            match result {
                Ok(SendOutcome::Sent { bytes, .. }) => {
                    self.progress.complete_one(bytes);
                    delivered += 1;
                }
                Ok(SendOutcome::Skipped { reason }) => {
                    info!("Object skipped for {}: {}", remote, reason);
                    self.progress.fail_one();
                    failed += 1;
                }
                Err(e) => {
                    error!("Delivery to {} failed: {}", remote, e);
                    self.progress.fail_one();
                    failed += 1;
                }
            }
        }
        self.progress.mark_end_transfer();

        // The acknowledgment reflects the relay's own inbound acceptance;
        // only a total delivery failure is surfaced to the source.
        let ack_status = if delivered == 0 && failed > 0 {
            status::PROCESSING_FAILURE
        } else {
            self.params.default_status
        };

        StoreResponse {
            status: ack_status,
            message: None,
            sop_class_uid: meta.sop_class_uid.clone(),
            sop_instance_uid: meta.sop_instance_uid.clone(),
        }
    }
}
