//! Source-to-destination routing
//!
//! Resolves, for an inbound source identity, the ordered list of
//! destinations to fan out to. Rejection happens here, before any editor or
//! destination is touched.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::destination::ForwardDestination;
use crate::identity::{ForwardingIdentity, NodeIdentity};
use crate::{RelayError, Result};

/// Maps inbound source identities to configured forward destinations
pub struct Router {
    identity: ForwardingIdentity,
    destinations: Vec<Arc<dyn ForwardDestination>>,
}

impl Router {
    /// Create a router for the given relay identity and destinations.
    ///
    /// An empty destination list is a configuration error, not a runtime
    /// one.
    pub fn new(
        identity: ForwardingIdentity,
        destinations: Vec<Arc<dyn ForwardDestination>>,
    ) -> Result<Self> {
        if destinations.is_empty() {
            return Err(RelayError::config(format!(
                "Relay {} has no forward destinations configured",
                identity.node()
            )));
        }
        Ok(Self {
            identity,
            destinations,
        })
    }

    /// The relay identity this router routes for
    pub fn identity(&self) -> &ForwardingIdentity {
        &self.identity
    }

    /// All configured destinations in configuration order
    pub fn destinations(&self) -> &[Arc<dyn ForwardDestination>] {
        &self.destinations
    }

    /// Resolve the destinations for an inbound source.
    ///
    /// Fails fast with `SourceNotAccepted` when the accepted-source set is
    /// non-empty and does not contain the source; no destination is touched.
    pub fn resolve(&self, source: &NodeIdentity) -> Result<&[Arc<dyn ForwardDestination>]> {
        if !self.identity.accepts(source) {
            return Err(RelayError::SourceNotAccepted(format!(
                "{} is not an accepted source of {}",
                source,
                self.identity.node()
            )));
        }
        debug!(
            "Routing {} to {} destination(s)",
            source,
            self.destinations.len()
        );
        Ok(&self.destinations)
    }

    /// Merge the accepted-source sets of several forwarding identities into
    /// one allow-list.
    ///
    /// All sets empty means accept-any (an empty result). Mixing empty and
    /// non-empty sets would silently widen the restricted identities to
    /// accept-any, so it is rejected as a configuration error.
    pub fn merged_allow_list(identities: &[ForwardingIdentity]) -> Result<HashSet<NodeIdentity>> {
        let (open, restricted): (Vec<_>, Vec<_>) = identities
            .iter()
            .partition(|id| id.accepted_sources().is_empty());

        if !open.is_empty() && !restricted.is_empty() {
            return Err(RelayError::config(
                "Forwarding identities disagree on accepted sources: \
                 mixing accept-any with restricted source sets is ambiguous",
            ));
        }

        let mut merged = HashSet::new();
        for identity in &restricted {
            merged.extend(identity.accepted_sources().iter().cloned());
        }
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressState;
    use crate::types::StorePayload;
    use async_trait::async_trait;

    struct NullDestination {
        identity: ForwardingIdentity,
        remote: NodeIdentity,
    }

    impl NullDestination {
        fn new(aet: &str) -> Arc<dyn ForwardDestination> {
            Arc::new(Self {
                identity: ForwardingIdentity::new(NodeIdentity::from_aet("RELAY").unwrap()),
                remote: NodeIdentity::new(aet, "127.0.0.1", 11112).unwrap(),
            })
        }
    }

    #[async_trait]
    impl ForwardDestination for NullDestination {
        fn forwarding_identity(&self) -> &ForwardingIdentity {
            &self.identity
        }

        fn remote(&self) -> &NodeIdentity {
            &self.remote
        }

        async fn forward(
            &self,
            _source: &NodeIdentity,
            _object: &StorePayload,
            _progress: &ProgressState,
        ) -> crate::Result<crate::destination::SendOutcome> {
            Ok(crate::destination::SendOutcome::Sent {
                bytes: 0,
                status: crate::status::SUCCESS,
            })
        }

        async fn stop(&self) {}
    }

    fn source(aet: &str) -> NodeIdentity {
        NodeIdentity::new(aet, "127.0.0.1", 4006).unwrap()
    }

    #[test]
    fn test_empty_destination_list_is_a_config_error() {
        let identity = ForwardingIdentity::new(NodeIdentity::from_aet("RELAY").unwrap());
        let result = Router::new(identity, vec![]);
        assert!(matches!(result, Err(RelayError::Config(_))));
    }

    #[test]
    fn test_accept_any_routes_every_source() {
        let identity = ForwardingIdentity::new(NodeIdentity::from_aet("RELAY").unwrap());
        let router = Router::new(
            identity,
            vec![NullDestination::new("A"), NullDestination::new("B")],
        )
        .unwrap();

        let targets = router.resolve(&source("ANYONE")).unwrap();
        assert_eq!(targets.len(), 2);
        // Configuration order is preserved
        assert_eq!(targets[0].remote().aet(), "A");
        assert_eq!(targets[1].remote().aet(), "B");
    }

    #[test]
    fn test_unlisted_source_is_rejected_before_routing() {
        let identity = ForwardingIdentity::new(NodeIdentity::from_aet("RELAY").unwrap())
            .accept_source(source("MODALITY"));
        let router = Router::new(identity, vec![NullDestination::new("A")]).unwrap();

        assert!(router.resolve(&source("MODALITY")).is_ok());
        let err = router.resolve(&source("STRANGER"));
        assert!(matches!(err, Err(RelayError::SourceNotAccepted(_))));
    }

    #[test]
    fn test_merged_allow_list_union() {
        let a = ForwardingIdentity::new(NodeIdentity::from_aet("R1").unwrap())
            .accept_source(source("S1"));
        let b = ForwardingIdentity::new(NodeIdentity::from_aet("R2").unwrap())
            .accept_source(source("S2"));

        let merged = Router::merged_allow_list(&[a, b]).unwrap();
        assert_eq!(merged.len(), 2);
        assert!(merged.contains(&source("S1")));
    }

    #[test]
    fn test_merged_allow_list_all_open_accepts_any() {
        let a = ForwardingIdentity::new(NodeIdentity::from_aet("R1").unwrap());
        let b = ForwardingIdentity::new(NodeIdentity::from_aet("R2").unwrap());
        let merged = Router::merged_allow_list(&[a, b]).unwrap();
        assert!(merged.is_empty());
    }

    #[test]
    fn test_merged_allow_list_rejects_disagreement() {
        let open = ForwardingIdentity::new(NodeIdentity::from_aet("R1").unwrap());
        let restricted = ForwardingIdentity::new(NodeIdentity::from_aet("R2").unwrap())
            .accept_source(source("S1"));
        let result = Router::merged_allow_list(&[open, restricted]);
        assert!(matches!(result, Err(RelayError::Config(_))));
    }
}
