//! End-to-end relay scenarios over the in-memory transport bridge

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cadence::{
    status, Association, AssociationParams, Connector, ForwardingIdentity, InboundHandler,
    NodeIdentity, Priority, RelayBuilder, RelayError, Result, StoreAck, StorePayload,
    TransportBridge, TransportSender,
};
use cadence_edit::{Abort, AttributeEditor, EditContext, EditorChain};
use dicom_core::{DataElement, PrimitiveValue, VR};
use dicom_dictionary_std::tags;
use dicom_object::InMemDicomObject;

#[derive(Default)]
struct TestConnector {
    opens: AtomicU32,
    refused_aets: Mutex<HashSet<String>>,
    stored: Arc<Mutex<Vec<(String, String)>>>,
}

impl TestConnector {
    fn refuse(&self, aet: &str) {
        self.refused_aets.lock().unwrap().insert(aet.to_string());
    }

    fn allow(&self, aet: &str) {
        self.refused_aets.lock().unwrap().remove(aet);
    }

    fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    fn stored(&self) -> Vec<(String, String)> {
        self.stored.lock().unwrap().clone()
    }

}

struct TestAssociation {
    dest_aet: String,
    stored: Arc<Mutex<Vec<(String, String)>>>,
    ready: bool,
}

#[async_trait]
impl Association for TestAssociation {
    async fn open(&mut self) -> Result<()> {
        self.ready = true;
        Ok(())
    }

    fn is_ready_for_data_transfer(&self) -> bool {
        self.ready
    }

    async fn store(
        &mut self,
        _sop_class_uid: &str,
        sop_instance_uid: &str,
        _priority: Priority,
        _payload: &StorePayload,
        _transfer_syntax: &str,
    ) -> Result<StoreAck> {
        self.stored
            .lock()
            .unwrap()
            .push((self.dest_aet.clone(), sop_instance_uid.to_string()));
        Ok(StoreAck {
            status: status::SUCCESS,
            bytes_transferred: 128,
        })
    }

    async fn release(&mut self) -> Result<()> {
        self.ready = false;
        Ok(())
    }

    async fn close(&mut self) {
        self.ready = false;
    }
}

#[async_trait]
impl Connector for TestConnector {
    async fn connect(
        &self,
        _local: &NodeIdentity,
        remote: &NodeIdentity,
        _params: &AssociationParams,
    ) -> Result<Box<dyn Association>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.refused_aets.lock().unwrap().contains(remote.aet()) {
            return Err(RelayError::AssociationRejected(format!(
                "{} refused the association",
                remote
            )));
        }
        Ok(Box::new(TestAssociation {
            dest_aet: remote.aet().to_string(),
            stored: self.stored.clone(),
            ready: false,
        }))
    }
}

struct AbortOnceEditor {
    abort: Abort,
    remaining: AtomicU32,
}

impl AbortOnceEditor {
    fn new(abort: Abort, times: u32) -> Self {
        Self {
            abort,
            remaining: AtomicU32::new(times),
        }
    }
}

impl AttributeEditor for AbortOnceEditor {
    fn apply(
        &self,
        _dataset: &mut InMemDicomObject,
        ctx: &mut EditContext,
    ) -> cadence_edit::Result<bool> {
        if self.remaining.load(Ordering::SeqCst) > 0 {
            self.remaining.fetch_sub(1, Ordering::SeqCst);
            ctx.set_abort(self.abort, "scripted abort");
        }
        Ok(true)
    }
}

fn payload(instance: &str) -> StorePayload {
    let mut obj = InMemDicomObject::new_empty();
    obj.put(DataElement::new(
        tags::SOP_CLASS_UID,
        VR::UI,
        PrimitiveValue::from("1.2.840.10008.5.1.4.1.1.7"),
    ));
    obj.put(DataElement::new(
        tags::SOP_INSTANCE_UID,
        VR::UI,
        PrimitiveValue::from(instance),
    ));
    StorePayload::from_object(obj)
}

fn peer() -> NodeIdentity {
    NodeIdentity::new("MODALITY", "127.0.0.1", 4006).unwrap()
}

fn archive() -> NodeIdentity {
    NodeIdentity::new("ARCHIVE", "127.0.0.1", 11112).unwrap()
}

fn backup() -> NodeIdentity {
    NodeIdentity::new("BACKUP", "127.0.0.1", 11113).unwrap()
}

fn relay_identity() -> ForwardingIdentity {
    ForwardingIdentity::new(NodeIdentity::from_aet("RELAY").unwrap())
}

async fn start(relay: &cadence::Relay) -> TransportSender {
    let (sender, receiver) = TransportBridge::new().split();
    tokio::spawn(receiver.serve(relay.handler() as Arc<dyn InboundHandler>));
    sender
}

#[tokio::test]
async fn unreachable_destination_fails_then_retries_from_closed() {
    let connector = Arc::new(TestConnector::default());
    connector.refuse("ARCHIVE");

    let relay = RelayBuilder::new(relay_identity(), connector.clone())
        .destination(archive(), EditorChain::empty())
        .build()
        .unwrap();
    let sender = start(&relay).await;

    let response = sender.submit(peer(), payload("1.1")).await.unwrap();
    assert_eq!(response.status, status::PROCESSING_FAILURE);

    let outcome = relay.progress().outcome(None, None);
    assert!(outcome.message.contains("failed"));
    assert_eq!(outcome.status, status::PROCESSING_FAILURE);

    // The destination recovered; the next object reopens from Closed
    connector.allow("ARCHIVE");
    let response = sender.submit(peer(), payload("1.2")).await.unwrap();
    assert_eq!(response.status, status::SUCCESS);
    assert_eq!(connector.opens(), 2);
}

#[tokio::test]
async fn partial_fanout_failure_still_acknowledges_inbound() {
    let connector = Arc::new(TestConnector::default());
    connector.refuse("BACKUP");

    let relay = RelayBuilder::new(relay_identity(), connector.clone())
        .destination(archive(), EditorChain::empty())
        .destination(backup(), EditorChain::empty())
        .build()
        .unwrap();
    let sender = start(&relay).await;

    let response = sender.submit(peer(), payload("1.1")).await.unwrap();
    // The inbound transfer itself succeeded
    assert_eq!(response.status, status::SUCCESS);

    let snap = relay.progress().snapshot();
    assert_eq!(snap.completed, 1);
    assert_eq!(snap.failed, 1);
    assert_eq!(snap.remaining, 0);
}

#[tokio::test]
async fn file_exception_skips_one_object_and_keeps_association() {
    let connector = Arc::new(TestConnector::default());
    let chain = EditorChain::new(vec![Box::new(AbortOnceEditor::new(Abort::FileException, 1))
        as Box<dyn AttributeEditor>]);

    let relay = RelayBuilder::new(relay_identity(), connector.clone())
        .destination(archive(), chain)
        .build()
        .unwrap();
    let sender = start(&relay).await;

    sender.submit(peer(), payload("1.1")).await.unwrap();
    let response = sender.submit(peer(), payload("1.2")).await.unwrap();
    assert_eq!(response.status, status::SUCCESS);

    // One association served both objects; only the second was stored
    assert_eq!(connector.opens(), 1);
    let snap = relay.progress().snapshot();
    assert_eq!(snap.failed, 1);
    assert_eq!(snap.completed, 1);
}

#[tokio::test]
async fn connection_exception_forces_reopen_for_next_object() {
    let connector = Arc::new(TestConnector::default());
    let chain = EditorChain::new(vec![Box::new(AbortOnceEditor::new(
        Abort::ConnectionException,
        1,
    )) as Box<dyn AttributeEditor>]);

    let relay = RelayBuilder::new(relay_identity(), connector.clone())
        .destination(archive(), chain)
        .build()
        .unwrap();
    let sender = start(&relay).await;

    let response = sender.submit(peer(), payload("1.1")).await.unwrap();
    assert_eq!(response.status, status::PROCESSING_FAILURE);

    let response = sender.submit(peer(), payload("1.2")).await.unwrap();
    assert_eq!(response.status, status::SUCCESS);

    // The torn-down association was reopened for the second object
    assert_eq!(connector.opens(), 2);
}

#[tokio::test]
async fn unlisted_source_is_rejected_before_any_connection() {
    let connector = Arc::new(TestConnector::default());
    let identity = relay_identity()
        .accept_source(NodeIdentity::new("TRUSTED", "127.0.0.1", 4006).unwrap());

    let relay = RelayBuilder::new(identity, connector.clone())
        .destination(archive(), EditorChain::empty())
        .build()
        .unwrap();
    let sender = start(&relay).await;

    let response = sender.submit(peer(), payload("1.1")).await.unwrap();
    assert_eq!(response.status, status::UNABLE_TO_PROCESS);
    assert_eq!(connector.opens(), 0);
    assert!(connector.stored().is_empty());
}

#[tokio::test]
async fn stop_is_idempotent_and_refuses_later_objects() {
    let connector = Arc::new(TestConnector::default());
    let relay = RelayBuilder::new(relay_identity(), connector.clone())
        .destination(archive(), EditorChain::empty())
        .build()
        .unwrap();
    let sender = start(&relay).await;

    sender.submit(peer(), payload("1.1")).await.unwrap();
    relay.stop().await;
    relay.stop().await;

    let response = sender.submit(peer(), payload("1.2")).await.unwrap();
    assert_eq!(response.status, status::PROCESSING_FAILURE);
}
