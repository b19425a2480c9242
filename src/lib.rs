//! cadence — a DICOM store-and-forward relay
//!
//! Accepts inbound image transfers, optionally rewrites each dataset through
//! an ordered attribute-editor chain, and streams the result onward to one
//! or more downstream destinations over lazily opened, reused associations.
//!
//! # Features
//! - Inbound relay handling: edit, route, fan out, acknowledge
//! - Per-destination association lifecycle with reconnect-on-demand
//! - Source allow-listing with hostname-resolution-aware identities
//! - Aggregated progress reporting with advisory cancellation
//! - Outbound SCU operations: C-ECHO, C-FIND, C-MOVE, C-STORE

pub mod association;
pub mod config;
pub mod destination;
pub mod error;
pub mod handler;
pub mod identity;
pub mod inbound;
pub mod progress;
pub mod relay;
pub mod router;
pub mod scu;
pub mod status;
pub mod transport;
pub mod types;

#[cfg(feature = "dcmtk_cli")]
pub mod dcmtk;

// Re-export commonly used types
pub use association::{Association, AssociationParams, Connector, StoreAck};
pub use config::{DestinationConfig, RelayConfig, StoreParams};
pub use destination::{ConnectionState, ForwardDestination, SendOutcome, StreamingForwardClient};
pub use error::{RelayError, Result};
pub use handler::{InboundHandler, RelayHandler, StoreResponse};
pub use identity::{ForwardingIdentity, NodeIdentity};
pub use progress::{Outcome, ProgressSnapshot, ProgressState};
pub use relay::{Relay, RelayBuilder};
pub use router::Router;
pub use scu::{DicomScu, ScuBuilder};
pub use transport::{TransportBridge, TransportReceiver, TransportSender};
pub use types::{ObjectMeta, Priority, StorePayload};

/// Relay version
pub const RELAY_VERSION: &str = "0.1.0";

/// Default DICOM port (non-TLS)
pub const DEFAULT_DICOM_PORT: u16 = 11112;
