//! Outbound association boundary
//!
//! The relay consumes, and never reimplements, the association/transport
//! stack. These traits describe exactly what the relay needs from it:
//! establishing an association, checking readiness, streaming one object,
//! and releasing. Production deployments plug in a real transport (the
//! bundled DCMTK-backed connector under the `dcmtk_cli` feature); tests use
//! in-memory fakes.

use std::time::Duration;

use async_trait::async_trait;

use crate::identity::NodeIdentity;
use crate::types::{Priority, StorePayload};
use crate::Result;

/// Parameters governing one outbound association
#[derive(Debug, Clone)]
pub struct AssociationParams {
    /// Calling AE title (the relay's own)
    pub calling_aet: String,

    /// Timeout for establishing the association
    pub connect_timeout: Duration,

    /// Maximum PDU size in bytes
    pub max_pdu: u32,

    /// Whether to request extended negotiation
    pub extended_negotiation: bool,
}

impl Default for AssociationParams {
    fn default() -> Self {
        Self {
            calling_aet: "CADENCE".to_string(),
            connect_timeout: Duration::from_secs(30),
            max_pdu: 65536,
            extended_negotiation: false,
        }
    }
}

/// Acknowledgment returned by the remote node for one stored object
#[derive(Debug, Clone, Copy)]
pub struct StoreAck {
    /// DIMSE status code from the remote node
    pub status: u16,

    /// Number of dataset bytes written to the association
    pub bytes_transferred: u64,
}

/// A negotiated, stateful connection to one remote DICOM endpoint
#[async_trait]
pub trait Association: Send + Sync {
    /// Negotiate the association; must be called before the first store
    async fn open(&mut self) -> Result<()>;

    /// Whether the association is currently usable for data transfer
    fn is_ready_for_data_transfer(&self) -> bool;

    /// Stream one object over the association
    async fn store(
        &mut self,
        sop_class_uid: &str,
        sop_instance_uid: &str,
        priority: Priority,
        payload: &StorePayload,
        transfer_syntax: &str,
    ) -> Result<StoreAck>;

    /// Gracefully release the association
    async fn release(&mut self) -> Result<()>;

    /// Drop the association without the release handshake
    async fn close(&mut self);
}

/// Factory for outbound associations
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish an association from `local` to `remote`.
    ///
    /// Blocking up to `params.connect_timeout`; the returned association is
    /// not yet opened.
    async fn connect(
        &self,
        local: &NodeIdentity,
        remote: &NodeIdentity,
        params: &AssociationParams,
    ) -> Result<Box<dyn Association>>;
}
