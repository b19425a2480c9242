//! Configuration types for the relay

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::identity::NodeIdentity;
use crate::{status, RelayError, Result, DEFAULT_DICOM_PORT};

/// Top-level relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Local Application Entity Title
    pub local_aet: String,

    /// Bind address for the inbound listener
    #[serde(default = "default_bind_addr")]
    pub bind_addr: IpAddr,

    /// Port for the inbound listener
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum PDU size in bytes
    #[serde(default = "default_max_pdu")]
    pub max_pdu: u32,

    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Association timeout in milliseconds
    #[serde(default = "default_association_timeout")]
    pub association_timeout_ms: u64,

    /// Spool directory for transient DICOM files
    #[serde(default = "default_spool_dir")]
    pub spool_dir: PathBuf,

    /// Preferred transfer syntaxes, in order of preference
    #[serde(default = "default_transfer_syntaxes")]
    pub preferred_transfer_syntaxes: Vec<String>,

    /// Maximum number of concurrent outbound forwards
    #[serde(default = "default_max_forwards")]
    pub max_concurrent_forwards: usize,

    /// Sources allowed to relay through this node; empty accepts any
    #[serde(default)]
    pub accepted_sources: Vec<SourceConfig>,

    /// Downstream destinations, in fan-out order
    #[serde(default)]
    pub destinations: Vec<DestinationConfig>,

    /// Store handling parameters
    #[serde(default)]
    pub store: StoreParams,

    /// Logging output configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Spool-directory watcher configuration
    #[serde(default)]
    pub watch: WatchConfig,
}

/// One accepted inbound source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Source Application Entity Title
    pub ae_title: String,

    /// Source host, if it should be matched
    pub host: Option<String>,

    /// Source port, if it should be matched
    pub port: Option<u16>,
}

impl SourceConfig {
    /// Build the node identity for this source
    pub fn to_identity(&self) -> Result<NodeIdentity> {
        match (&self.host, self.port) {
            (Some(host), Some(port)) => NodeIdentity::new(&self.ae_title, host, port),
            _ => NodeIdentity::from_aet(&self.ae_title),
        }
    }
}

/// Configuration for one downstream destination
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationConfig {
    /// Remote Application Entity Title
    pub ae_title: String,

    /// Remote host address
    pub host: String,

    /// Remote port
    pub port: u16,

    /// Assign fresh Study/Series/SOP Instance UIDs while forwarding
    #[serde(default)]
    pub uid_remap: bool,

    /// Connection timeout in milliseconds (overrides the global setting)
    pub connect_timeout_ms: Option<u64>,

    /// Maximum PDU size for this destination (overrides the global setting)
    pub max_pdu: Option<u32>,
}

impl DestinationConfig {
    /// Create a new destination configuration
    pub fn new(ae_title: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            ae_title: ae_title.into(),
            host: host.into(),
            port,
            uid_remap: false,
            connect_timeout_ms: None,
            max_pdu: None,
        }
    }

    /// Enable UID remapping for this destination
    pub fn with_uid_remap(mut self) -> Self {
        self.uid_remap = true;
        self
    }

    /// Set the connection timeout for this destination
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.connect_timeout_ms = Some(timeout_ms);
        self
    }

    /// Build the node identity for this destination
    pub fn to_identity(&self) -> Result<NodeIdentity> {
        NodeIdentity::new(&self.ae_title, &self.host, self.port)
    }

    /// Validate the destination configuration
    pub fn validate(&self) -> Result<()> {
        if self.ae_title.is_empty() || self.ae_title.len() > 16 {
            return Err(RelayError::config(
                "Destination AE title must be 1-16 characters",
            ));
        }
        if self.host.is_empty() {
            return Err(RelayError::config("Destination host cannot be empty"));
        }
        if self.port == 0 {
            return Err(RelayError::config(
                "Destination port must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Store handling parameters (editing aside, which is per destination)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreParams {
    /// Request extended negotiation on outbound associations
    #[serde(default)]
    pub extended_negotiation: bool,

    /// Optional SOP class / transfer syntax table file
    pub sop_class_table: Option<PathBuf>,

    /// Status code acknowledged to the source on accepted objects
    #[serde(default = "default_store_status")]
    pub default_status: u16,
}

impl Default for StoreParams {
    fn default() -> Self {
        Self {
            extended_negotiation: false,
            sop_class_table: None,
            default_status: default_store_status(),
        }
    }
}

/// Logging output configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Also write log output to a file
    #[serde(default)]
    pub log_to_file: bool,

    /// Path of the log file when file logging is enabled
    #[serde(default)]
    pub log_file_path: String,
}

/// Spool-directory watcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Enable the watcher
    #[serde(default)]
    pub enabled: bool,

    /// Directory scanned for inbound objects
    #[serde(default = "default_watch_dir")]
    pub dir: PathBuf,

    /// Scan interval in milliseconds
    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,

    /// AE title recorded as the source of watched objects
    pub source_aet: Option<String>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: default_watch_dir(),
            poll_ms: default_poll_ms(),
            source_aet: None,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            local_aet: "CADENCE".to_string(),
            bind_addr: default_bind_addr(),
            port: default_port(),
            max_pdu: default_max_pdu(),
            connect_timeout_ms: default_connect_timeout(),
            association_timeout_ms: default_association_timeout(),
            spool_dir: default_spool_dir(),
            preferred_transfer_syntaxes: default_transfer_syntaxes(),
            max_concurrent_forwards: default_max_forwards(),
            accepted_sources: Vec::new(),
            destinations: Vec::new(),
            store: StoreParams::default(),
            logging: LoggingConfig::default(),
            watch: WatchConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Load the configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        toml::from_str(&content)
            .map_err(|e| RelayError::config(format!("Failed to parse configuration: {}", e)))
    }

    /// Get the connection timeout as a Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Get the association timeout as a Duration
    pub fn association_timeout(&self) -> Duration {
        Duration::from_millis(self.association_timeout_ms)
    }

    /// Validate the configuration, creating the spool directory if needed
    pub fn validate(&self) -> Result<()> {
        if self.local_aet.is_empty() || self.local_aet.len() > 16 {
            return Err(RelayError::config("Local AE title must be 1-16 characters"));
        }

        if self.port == 0 {
            return Err(RelayError::config("Port must be greater than 0"));
        }

        if self.max_pdu < 16384 || self.max_pdu > 131072 {
            return Err(RelayError::config(
                "Max PDU size must be between 16384 and 131072 bytes",
            ));
        }

        if self.destinations.is_empty() {
            return Err(RelayError::config(
                "At least one forward destination must be configured",
            ));
        }
        for destination in &self.destinations {
            destination.validate()?;
        }

        if !self.spool_dir.exists() {
            std::fs::create_dir_all(&self.spool_dir).map_err(|e| {
                RelayError::config(format!("Failed to create spool directory: {}", e))
            })?;
        }

        Ok(())
    }
}

// Default value functions
fn default_bind_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0))
}

fn default_port() -> u16 {
    DEFAULT_DICOM_PORT
}

fn default_max_pdu() -> u32 {
    65536
}

fn default_connect_timeout() -> u64 {
    30_000 // 30 seconds
}

fn default_association_timeout() -> u64 {
    300_000 // 5 minutes
}

fn default_spool_dir() -> PathBuf {
    PathBuf::from("./tmp/cadence")
}

fn default_transfer_syntaxes() -> Vec<String> {
    vec![
        "1.2.840.10008.1.2".to_string(),   // Implicit VR Little Endian
        "1.2.840.10008.1.2.1".to_string(), // Explicit VR Little Endian
        "1.2.840.10008.1.2.2".to_string(), // Explicit VR Big Endian
    ]
}

fn default_max_forwards() -> usize {
    4
}

fn default_store_status() -> u16 {
    status::SUCCESS
}

fn default_watch_dir() -> PathBuf {
    PathBuf::from("./tmp/inbound")
}

fn default_poll_ms() -> u64 {
    1_000
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RelayConfig {
        RelayConfig {
            spool_dir: std::env::temp_dir().join("cadence-config-test"),
            destinations: vec![DestinationConfig::new("ARCHIVE", "127.0.0.1", 11112)],
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config_values() {
        let config = RelayConfig::default();
        assert_eq!(config.local_aet, "CADENCE");
        assert_eq!(config.port, DEFAULT_DICOM_PORT);
        assert_eq!(config.max_concurrent_forwards, 4);
        assert!(config.destinations.is_empty());
    }

    #[test]
    fn test_validation_rules() {
        assert!(config().validate().is_ok());

        let mut bad = config();
        bad.local_aet = String::new();
        assert!(bad.validate().is_err());

        let mut bad = config();
        bad.local_aet = "A".repeat(17);
        assert!(bad.validate().is_err());

        let mut bad = config();
        bad.max_pdu = 1024;
        assert!(bad.validate().is_err());

        let mut bad = config();
        bad.destinations.clear();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_destination_builder_and_validation() {
        let dest = DestinationConfig::new("ARCHIVE", "archive.local", 104)
            .with_uid_remap()
            .with_timeout(5_000);
        assert!(dest.uid_remap);
        assert_eq!(dest.connect_timeout_ms, Some(5_000));
        assert!(dest.validate().is_ok());

        let bad = DestinationConfig::new("", "archive.local", 104);
        assert!(bad.validate().is_err());
        let bad = DestinationConfig::new("ARCHIVE", "", 104);
        assert!(bad.validate().is_err());
        let bad = DestinationConfig::new("ARCHIVE", "archive.local", 0);
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_config_parses_from_toml() {
        let toml_str = r#"
            local_aet = "RELAY1"
            port = 4010

            [[destinations]]
            ae_title = "ARCHIVE"
            host = "archive.local"
            port = 104
            uid_remap = true

            [[accepted_sources]]
            ae_title = "MODALITY"

            [store]
            extended_negotiation = true

            [watch]
            enabled = true
            dir = "/var/spool/cadence"
        "#;
        let config: RelayConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.local_aet, "RELAY1");
        assert_eq!(config.port, 4010);
        assert_eq!(config.destinations.len(), 1);
        assert!(config.destinations[0].uid_remap);
        assert_eq!(config.accepted_sources[0].ae_title, "MODALITY");
        assert!(config.store.extended_negotiation);
        assert!(config.watch.enabled);
        // Defaults still fill the gaps
        assert_eq!(config.max_pdu, 65536);
        assert_eq!(config.store.default_status, status::SUCCESS);
    }
}
