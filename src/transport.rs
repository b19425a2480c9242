//! Transport bridge
//!
//! Decouples the relay core from whatever transport stack receives inbound
//! objects. A transport adapter translates each received object into a
//! `StoreEvent` and submits it over a channel; the receiving half drains
//! events and invokes the inbound handler. The relay itself never touches a
//! socket, so the whole pipeline is testable in memory.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::handler::{InboundHandler, StoreResponse};
use crate::identity::NodeIdentity;
use crate::types::StorePayload;
use crate::{RelayError, Result};

/// One inbound object crossing the transport boundary
pub struct StoreEvent {
    /// Unique event id for correlation
    pub id: Uuid,

    /// Identity of the sending node
    pub peer: NodeIdentity,

    /// The object being transferred
    pub payload: StorePayload,

    /// Channel for the acknowledgment
    pub response_tx: Option<oneshot::Sender<StoreResponse>>,
}

/// In-memory bridge between a transport adapter and the relay
pub struct TransportBridge {
    event_tx: mpsc::Sender<StoreEvent>,
    event_rx: mpsc::Receiver<StoreEvent>,
}

impl TransportBridge {
    /// Create a bridge with the default buffer size
    pub fn new() -> Self {
        Self::with_buffer_size(100)
    }

    /// Create a bridge with the given buffer size
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        let (event_tx, event_rx) = mpsc::channel(buffer_size);
        Self { event_tx, event_rx }
    }

    /// Split into the adapter-facing sender and the relay-facing receiver
    pub fn split(self) -> (TransportSender, TransportReceiver) {
        (
            TransportSender {
                event_tx: self.event_tx,
            },
            TransportReceiver {
                event_rx: self.event_rx,
            },
        )
    }
}

impl Default for TransportBridge {
    fn default() -> Self {
        Self::new()
    }
}

/// Adapter half: submits inbound objects and awaits their acknowledgment
#[derive(Clone)]
pub struct TransportSender {
    event_tx: mpsc::Sender<StoreEvent>,
}

impl TransportSender {
    /// Submit one inbound object and wait for the relay's acknowledgment
    pub async fn submit(&self, peer: NodeIdentity, payload: StorePayload) -> Result<StoreResponse> {
        let (response_tx, response_rx) = oneshot::channel();
        let event = StoreEvent {
            id: Uuid::new_v4(),
            peer,
            payload,
            response_tx: Some(response_tx),
        };
        self.event_tx
            .send(event)
            .await
            .map_err(|_| RelayError::internal("Transport bridge closed"))?;
        response_rx
            .await
            .map_err(|_| RelayError::internal("Relay dropped the acknowledgment"))
    }
}

/// Relay half: drains events and invokes the inbound handler
pub struct TransportReceiver {
    event_rx: mpsc::Receiver<StoreEvent>,
}

impl TransportReceiver {
    /// Serve events until the sending side closes
    pub async fn serve(mut self, handler: Arc<dyn InboundHandler>) {
        while let Some(event) = self.event_rx.recv().await {
            debug!("Handling store event {} from {}", event.id, event.peer);
            let response = handler.on_store(&event.peer, event.payload).await;
            if let Some(tx) = event.response_tx {
                if tx.send(response).is_err() {
                    warn!("Submitter of event {} went away", event.id);
                }
            }
        }
        debug!("Transport bridge drained, receiver exiting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status;
    use async_trait::async_trait;

    struct EchoHandler;

    #[async_trait]
    impl InboundHandler for EchoHandler {
        async fn on_store(&self, peer: &NodeIdentity, payload: StorePayload) -> StoreResponse {
            StoreResponse {
                status: status::SUCCESS,
                message: Some(format!("from {}", peer)),
                sop_class_uid: payload.meta().sop_class_uid.clone(),
                sop_instance_uid: payload.meta().sop_instance_uid.clone(),
            }
        }
    }

    #[tokio::test]
    async fn test_submit_round_trip() {
        let (sender, receiver) = TransportBridge::new().split();
        let serve = tokio::spawn(receiver.serve(Arc::new(EchoHandler)));

        let peer = NodeIdentity::new("MODALITY", "127.0.0.1", 4006).unwrap();
        let payload = StorePayload::from_object(dicom_object::InMemDicomObject::new_empty());
        let response = sender.submit(peer, payload).await.unwrap();
        assert_eq!(response.status, status::SUCCESS);
        assert_eq!(response.message.as_deref(), Some("from MODALITY@127.0.0.1:4006"));

        drop(sender);
        serve.await.unwrap();
    }

    #[tokio::test]
    async fn test_submit_after_receiver_gone_fails() {
        let (sender, receiver) = TransportBridge::new().split();
        drop(receiver);

        let peer = NodeIdentity::from_aet("MODALITY").unwrap();
        let payload = StorePayload::from_object(dicom_object::InMemDicomObject::new_empty());
        let result = sender.submit(peer, payload).await;
        assert!(matches!(result, Err(RelayError::Internal(_))));
    }
}
