//! DICOM endpoint identity model

use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, ToSocketAddrs};

use serde::{Deserialize, Serialize};

use crate::{RelayError, Result};

/// Sentinel used when no host is configured
const LOOPBACK: &str = "127.0.0.1";

/// Identifies one DICOM endpoint by AE title, host, and port.
///
/// Equality compares the AE title, the port, and the host after resolving it
/// to an IP address, so two hostnames pointing at the same address compare
/// equal. Unresolvable hostnames compare literally; a missing host resolves
/// to the loopback sentinel. Immutable once constructed.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub struct NodeIdentity {
    aet: String,
    host: Option<String>,
    port: Option<u16>,
}

impl NodeIdentity {
    /// Create an identity with AE title, host, and port
    pub fn new(aet: impl Into<String>, host: impl Into<String>, port: u16) -> Result<Self> {
        let identity = Self {
            aet: aet.into(),
            host: Some(host.into()),
            port: Some(port),
        };
        identity.validate()?;
        Ok(identity)
    }

    /// Create an identity carrying only an AE title
    pub fn from_aet(aet: impl Into<String>) -> Result<Self> {
        let identity = Self {
            aet: aet.into(),
            host: None,
            port: None,
        };
        identity.validate()?;
        Ok(identity)
    }

    fn validate(&self) -> Result<()> {
        if self.aet.is_empty() || self.aet.len() > 16 {
            return Err(RelayError::InvalidAeTitle(format!(
                "AE title must be 1-16 characters, got '{}'",
                self.aet
            )));
        }
        if let Some(0) = self.port {
            return Err(RelayError::config("Port must be greater than 0"));
        }
        Ok(())
    }

    /// The AE title of this endpoint
    pub fn aet(&self) -> &str {
        &self.aet
    }

    /// The configured host, if any
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// The configured port, if any
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Host resolved for equality comparison.
    ///
    /// IPv4 addresses are preferred when a name resolves to several
    /// addresses; names that do not resolve are returned literally.
    fn resolved_host(&self) -> String {
        match self.host.as_deref() {
            None => LOOPBACK.to_string(),
            Some(host) => convert_to_ip(host),
        }
    }
}

fn convert_to_ip(host: &str) -> String {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return ip.to_string();
    }
    match (host, 0u16).to_socket_addrs() {
        Ok(addrs) => {
            let addrs: Vec<_> = addrs.collect();
            addrs
                .iter()
                .find(|a| a.is_ipv4())
                .or_else(|| addrs.first())
                .map(|a| a.ip().to_string())
                .unwrap_or_else(|| host.to_string())
        }
        Err(_) => host.to_string(),
    }
}

impl PartialEq for NodeIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.aet == other.aet
            && self.port == other.port
            && self.resolved_host() == other.resolved_host()
    }
}

// Host is excluded from the hash so that identities with hostnames resolving
// to the same address land in the same bucket; equality still compares the
// resolved host.
impl Hash for NodeIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.aet.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.host, self.port) {
            (Some(host), Some(port)) => write!(f, "{}@{}:{}", self.aet, host, port),
            (Some(host), None) => write!(f, "{}@{}", self.aet, host),
            _ => write!(f, "{}", self.aet),
        }
    }
}

/// A relay's own identity plus the set of source identities it accepts.
///
/// An empty accepted-source set accepts any source. Created at relay
/// configuration time and lives for the lifetime of the listener.
#[derive(Debug, Clone)]
pub struct ForwardingIdentity {
    node: NodeIdentity,
    id: Option<u64>,
    accepted_sources: HashSet<NodeIdentity>,
}

impl ForwardingIdentity {
    /// Create a forwarding identity that accepts any source
    pub fn new(node: NodeIdentity) -> Self {
        Self {
            node,
            id: None,
            accepted_sources: HashSet::new(),
        }
    }

    /// Attach a numeric id for multi-tenant disambiguation
    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    /// Restrict the accepted sources to include the given identity
    pub fn accept_source(mut self, source: NodeIdentity) -> Self {
        self.accepted_sources.insert(source);
        self
    }

    /// The relay's own endpoint identity
    pub fn node(&self) -> &NodeIdentity {
        &self.node
    }

    /// The AE title of the relay endpoint
    pub fn aet(&self) -> &str {
        self.node.aet()
    }

    /// The numeric id, if configured
    pub fn id(&self) -> Option<u64> {
        self.id
    }

    /// The configured accepted-source set; empty means accept any
    pub fn accepted_sources(&self) -> &HashSet<NodeIdentity> {
        &self.accepted_sources
    }

    /// Whether the given source may forward through this identity
    pub fn accepts(&self, source: &NodeIdentity) -> bool {
        self.accepted_sources.is_empty() || self.accepted_sources.contains(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_validation() {
        assert!(NodeIdentity::from_aet("").is_err());
        assert!(NodeIdentity::from_aet("A".repeat(17)).is_err());
        assert!(NodeIdentity::from_aet("RELAY").is_ok());
        assert!(NodeIdentity::new("RELAY", "localhost", 0).is_err());
    }

    #[test]
    fn test_equality_is_reflexive_and_symmetric() {
        let a = NodeIdentity::new("SCP", "127.0.0.1", 11112).unwrap();
        let b = NodeIdentity::new("SCP", "127.0.0.1", 11112).unwrap();
        assert_eq!(a, a);
        assert_eq!(a, b);
        assert_eq!(b, a);
    }

    #[test]
    fn test_equality_resolves_hostnames() {
        let by_name = NodeIdentity::new("SCP", "localhost", 11112).unwrap();
        let by_ip = NodeIdentity::new("SCP", "127.0.0.1", 11112).unwrap();
        assert_eq!(by_name, by_ip);
    }

    #[test]
    fn test_unresolvable_hosts_compare_literally() {
        let a = NodeIdentity::new("SCP", "no-such-host.invalid", 104).unwrap();
        let b = NodeIdentity::new("SCP", "other-host.invalid", 104).unwrap();
        let c = NodeIdentity::new("SCP", "no-such-host.invalid", 104).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn test_differing_title_or_port_never_equal() {
        let a = NodeIdentity::new("SCP", "127.0.0.1", 11112).unwrap();
        let b = NodeIdentity::new("OTHER", "127.0.0.1", 11112).unwrap();
        let c = NodeIdentity::new("SCP", "127.0.0.1", 104).unwrap();
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_accepted_sources() {
        let relay = NodeIdentity::from_aet("RELAY").unwrap();
        let src = NodeIdentity::new("MODALITY", "127.0.0.1", 4006).unwrap();
        let other = NodeIdentity::new("STRANGER", "127.0.0.1", 4006).unwrap();

        let open = ForwardingIdentity::new(relay.clone());
        assert!(open.accepts(&src));
        assert!(open.accepts(&other));

        let restricted = ForwardingIdentity::new(relay).with_id(7).accept_source(src.clone());
        assert!(restricted.accepts(&src));
        assert!(!restricted.accepts(&other));
        assert_eq!(restricted.id(), Some(7));
    }
}
