//! Relay assembly and lifecycle
//!
//! The `Relay` owns its router, destinations, and concurrency resources
//! explicitly. It is created from configuration and torn down exactly once
//! by `stop()`; there is no global executor or destination registry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cadence_edit::{AttributeEditor, EditorChain, UidRemapEditor};
use tracing::{debug, info};

use crate::association::{AssociationParams, Connector};
use crate::config::{RelayConfig, StoreParams};
use crate::destination::{ForwardDestination, StreamingForwardClient};
use crate::handler::RelayHandler;
use crate::identity::{ForwardingIdentity, NodeIdentity};
use crate::progress::ProgressState;
use crate::router::Router;
use crate::Result;

/// Builder for assembling a relay by hand.
///
/// Association parameters apply to destinations added after they are set.
pub struct RelayBuilder {
    identity: ForwardingIdentity,
    connector: Arc<dyn Connector>,
    params: StoreParams,
    association: AssociationParams,
    max_concurrent_forwards: usize,
    destinations: Vec<Arc<dyn ForwardDestination>>,
}

impl RelayBuilder {
    /// Start building a relay with the given identity and transport
    pub fn new(identity: ForwardingIdentity, connector: Arc<dyn Connector>) -> Self {
        let association = AssociationParams {
            calling_aet: identity.aet().to_string(),
            ..Default::default()
        };
        Self {
            identity,
            connector,
            params: StoreParams::default(),
            association,
            max_concurrent_forwards: 4,
            destinations: Vec::new(),
        }
    }

    /// Set the store parameters
    pub fn store_params(mut self, params: StoreParams) -> Self {
        self.params = params;
        self
    }

    /// Set the association parameters used for subsequent destinations
    pub fn association_params(mut self, params: AssociationParams) -> Self {
        self.association = params;
        self
    }

    /// Bound the number of concurrent outbound forwards
    pub fn max_concurrent_forwards(mut self, n: usize) -> Self {
        self.max_concurrent_forwards = n;
        self
    }

    /// Add a streaming destination for the given remote endpoint
    pub fn destination(mut self, remote: NodeIdentity, editors: EditorChain) -> Self {
        let client = StreamingForwardClient::new(
            self.identity.clone(),
            remote,
            editors,
            self.connector.clone(),
            self.association.clone(),
        );
        self.destinations.push(Arc::new(client));
        self
    }

    /// Add a pre-built destination
    pub fn custom_destination(mut self, destination: Arc<dyn ForwardDestination>) -> Self {
        self.destinations.push(destination);
        self
    }

    /// Assemble the relay; fails on an empty destination list
    pub fn build(self) -> Result<Relay> {
        let router = Arc::new(Router::new(self.identity, self.destinations.clone())?);
        let handler = Arc::new(RelayHandler::new(
            router.clone(),
            self.params,
            self.max_concurrent_forwards,
        ));
        Ok(Relay {
            router,
            handler,
            destinations: self.destinations,
            stopped: AtomicBool::new(false),
        })
    }
}

/// A configured store-and-forward relay
pub struct Relay {
    router: Arc<Router>,
    handler: Arc<RelayHandler>,
    destinations: Vec<Arc<dyn ForwardDestination>>,
    stopped: AtomicBool,
}

impl Relay {
    /// Assemble a relay from configuration.
    ///
    /// Per-destination connect timeout and PDU size override the global
    /// settings, and destinations with `uid_remap` enabled get a fresh UID
    /// remapping editor each.
    pub fn from_config(config: &RelayConfig, connector: Arc<dyn Connector>) -> Result<Relay> {
        config.validate()?;

        let mut identity = ForwardingIdentity::new(NodeIdentity::from_aet(&config.local_aet)?);
        for source in &config.accepted_sources {
            identity = identity.accept_source(source.to_identity()?);
        }

        let mut builder = RelayBuilder::new(identity, connector)
            .store_params(config.store.clone())
            .max_concurrent_forwards(config.max_concurrent_forwards);

        for dest in &config.destinations {
            dest.validate()?;
            let params = AssociationParams {
                calling_aet: config.local_aet.clone(),
                connect_timeout: dest
                    .connect_timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or_else(|| config.connect_timeout()),
                max_pdu: dest.max_pdu.unwrap_or(config.max_pdu),
                extended_negotiation: config.store.extended_negotiation,
            };
            let editors = if dest.uid_remap {
                EditorChain::new(vec![
                    Box::new(UidRemapEditor::new()) as Box<dyn AttributeEditor>
                ])
            } else {
                EditorChain::empty()
            };
            builder = builder
                .association_params(params)
                .destination(dest.to_identity()?, editors);
        }

        let relay = builder.build()?;
        info!(
            "Relay '{}' configured with {} destination(s)",
            config.local_aet,
            relay.destinations.len()
        );
        Ok(relay)
    }

    /// The inbound handler to hand to the transport adapter
    pub fn handler(&self) -> Arc<RelayHandler> {
        self.handler.clone()
    }

    /// The router serving this relay
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// The shared progress state
    pub fn progress(&self) -> Arc<ProgressState> {
        self.handler.progress()
    }

    /// Stop every destination and release their associations.
    ///
    /// Teardown runs exactly once; later calls return immediately.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            debug!("Relay already stopped");
            return;
        }
        info!("Stopping relay");
        for destination in &self.destinations {
            destination.stop().await;
        }
    }
}
