//! DCMTK-backed implementation of the association boundary
//!
//! Shells out to the DCMTK command line tools (`echoscu`, `storescu`) the
//! same way the SCU operations do. One association maps to one verified
//! remote endpoint; each store spawns a `storescu` run against it.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::association::{Association, AssociationParams, Connector, StoreAck};
use crate::identity::NodeIdentity;
use crate::types::{Priority, StorePayload};
use crate::{status, RelayError, Result};

/// Connector producing DCMTK-backed associations
pub struct DcmtkConnector {
    spool_dir: PathBuf,
}

impl DcmtkConnector {
    /// Create a connector spooling transient files into the given directory
    pub fn new(spool_dir: PathBuf) -> Self {
        Self { spool_dir }
    }
}

#[async_trait]
impl Connector for DcmtkConnector {
    async fn connect(
        &self,
        _local: &NodeIdentity,
        remote: &NodeIdentity,
        params: &AssociationParams,
    ) -> Result<Box<dyn Association>> {
        let host = remote
            .host()
            .ok_or_else(|| RelayError::config(format!("Destination {} has no host", remote)))?
            .to_string();
        let port = remote
            .port()
            .ok_or_else(|| RelayError::config(format!("Destination {} has no port", remote)))?;

        Ok(Box::new(DcmtkAssociation {
            calling_aet: params.calling_aet.clone(),
            called_aet: remote.aet().to_string(),
            host,
            port,
            spool_dir: self.spool_dir.clone(),
            ready: false,
        }))
    }
}

/// One outbound association driven through DCMTK tools
struct DcmtkAssociation {
    calling_aet: String,
    called_aet: String,
    host: String,
    port: u16,
    spool_dir: PathBuf,
    ready: bool,
}

#[async_trait]
impl Association for DcmtkAssociation {
    async fn open(&mut self) -> Result<()> {
        debug!(
            "Verifying association to {}@{}:{}",
            self.called_aet, self.host, self.port
        );
        let output = Command::new("echoscu")
            .arg("-aet")
            .arg(&self.calling_aet)
            .arg("-aec")
            .arg(&self.called_aet)
            .arg(&self.host)
            .arg(self.port.to_string())
            .output()
            .await
            .map_err(|e| RelayError::operation_failed(format!("Failed to spawn echoscu: {}", e)))?;

        if output.status.success() {
            self.ready = true;
            info!(
                "Association to {}@{}:{} ready for transfer",
                self.called_aet, self.host, self.port
            );
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            self.ready = false;
            Err(RelayError::AssociationRejected(format!(
                "{}@{}:{}: {}",
                self.called_aet,
                self.host,
                self.port,
                stderr.trim()
            )))
        }
    }

    fn is_ready_for_data_transfer(&self) -> bool {
        self.ready
    }

    async fn store(
        &mut self,
        _sop_class_uid: &str,
        sop_instance_uid: &str,
        _priority: Priority,
        payload: &StorePayload,
        transfer_syntax: &str,
    ) -> Result<StoreAck> {
        if !self.ready {
            return Err(RelayError::operation_failed(
                "Association is not ready for data transfer",
            ));
        }

        // Reuse the spool file when one exists; otherwise write one for the
        // duration of the send.
        let (file, transient) = match payload {
            StorePayload::Spooled { path, .. } => (path.clone(), false),
            _ => (
                payload.to_spool_file(&self.spool_dir, transfer_syntax).await?,
                true,
            ),
        };

        debug!(
            "Storing {} to {}@{}:{} from {:?}",
            sop_instance_uid, self.called_aet, self.host, self.port, file
        );

        let result = Command::new("storescu")
            .arg("-aet")
            .arg(&self.calling_aet)
            .arg("-aec")
            .arg(&self.called_aet)
            .arg(&self.host)
            .arg(self.port.to_string())
            .arg(&file)
            .output()
            .await;

        let bytes = tokio::fs::metadata(&file).await.map(|m| m.len()).unwrap_or(0);

        if transient {
            if let Err(e) = tokio::fs::remove_file(&file).await {
                tracing::warn!("Failed to delete transient spool file {:?}: {}", file, e);
            }
        }

        let output = result
            .map_err(|e| RelayError::operation_failed(format!("Failed to spawn storescu: {}", e)))?;

        if output.status.success() {
            Ok(StoreAck {
                status: status::SUCCESS,
                bytes_transferred: bytes,
            })
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(
                "storescu failed for {}: status={:?}, stderr={}",
                sop_instance_uid,
                output.status.code(),
                stderr
            );
            self.ready = false;
            Err(RelayError::operation_failed(format!(
                "storescu failed: {:?} {}",
                output.status.code(),
                stderr.trim()
            )))
        }
    }

    async fn release(&mut self) -> Result<()> {
        self.ready = false;
        Ok(())
    }

    async fn close(&mut self) {
        self.ready = false;
    }
}
