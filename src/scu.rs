//! Service Class User operations for outbound DICOM networking
//!
//! Query, retrieve, store, and echo against remote nodes. Network execution
//! is backed by the DCMTK command line tools under the default `dcmtk_cli`
//! feature; without it the operations report `NotSupported`.

use std::time::Duration;

use futures::stream::Stream;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::{DestinationConfig, RelayConfig};
use crate::identity::NodeIdentity;
use crate::progress::ProgressState;
use crate::types::{FindQuery, MoveQuery, StorePayload};
use crate::{status, RelayError, Result};

/// Client for outbound DICOM operations
pub struct DicomScu {
    config: RelayConfig,
}

impl DicomScu {
    /// Create a new SCU with the given configuration
    pub fn new(config: RelayConfig) -> Self {
        Self { config }
    }

    /// Send a C-ECHO request to a remote node
    pub async fn echo(&self, node: &DestinationConfig) -> Result<bool> {
        info!(
            "Sending C-ECHO to {}@{}:{}",
            node.ae_title, node.host, node.port
        );
        node.validate()?;

        #[cfg(feature = "dcmtk_cli")]
        {
            use tokio::process::Command;
            let output = Command::new("echoscu")
                .arg("-aet")
                .arg(&self.config.local_aet)
                .arg("-aec")
                .arg(&node.ae_title)
                .arg(&node.host)
                .arg(node.port.to_string())
                .output()
                .await
                .map_err(|e| {
                    RelayError::operation_failed(format!("Failed to spawn echoscu: {}", e))
                })?;
            if output.status.success() {
                info!("C-ECHO completed successfully");
                Ok(true)
            } else {
                let stderr = String::from_utf8_lossy(&output.stderr);
                error!(
                    "C-ECHO failed: status={:?}, stderr={}",
                    output.status.code(),
                    stderr
                );
                Err(RelayError::operation_failed(format!(
                    "echoscu failed: {:?} {}",
                    output.status.code(),
                    stderr.trim()
                )))
            }
        }

        #[cfg(not(feature = "dcmtk_cli"))]
        {
            Err(RelayError::NotSupported(
                "C-ECHO requires feature 'dcmtk_cli'".into(),
            ))
        }
    }

    /// Send a C-FIND request to a remote node, streaming the matches
    pub async fn find(
        &self,
        node: &DestinationConfig,
        query: FindQuery,
    ) -> Result<impl Stream<Item = Result<StorePayload>>> {
        info!(
            "Sending C-FIND to {}@{}:{} (level: {}, max_results: {})",
            node.ae_title, node.host, node.port, query.query_level, query.max_results
        );
        node.validate()?;
        debug!("C-FIND query keys: {:?}", query.parameters);

        #[cfg(feature = "dcmtk_cli")]
        {
            use tokio::process::Command;

            let mut args = self.common_args(node);
            // Patient Root information model
            args.push("-P".into());
            args.push("-k".into());
            args.push(format!("QueryRetrieveLevel={}", query.query_level));
            push_query_keys(&mut args, &query.parameters);

            let out_dir = self
                .config
                .spool_dir
                .join(format!("find_{}", uuid::Uuid::new_v4()));
            if let Err(e) = tokio::fs::create_dir_all(&out_dir).await {
                warn!("Failed to create output dir {:?}: {}", out_dir, e);
            } else {
                // Extract each match to a DICOM file in the output directory
                args.push("-X".into());
                args.push("-od".into());
                args.push(out_dir.to_string_lossy().to_string());
            }

            args.push(node.host.clone());
            args.push(node.port.to_string());

            let (tx, rx) = mpsc::channel(100);

            debug!("Running findscu args: {:?}", args);
            tokio::spawn(async move {
                match Command::new("findscu").args(&args).output().await {
                    Ok(out) => {
                        if out.status.success() {
                            info!("C-FIND completed");
                            if let Ok(mut rd) = tokio::fs::read_dir(&out_dir).await {
                                while let Ok(Some(entry)) = rd.next_entry().await {
                                    let path = entry.path();
                                    if path.extension().and_then(|s| s.to_str()) == Some("dcm") {
                                        let _ = tx
                                            .send(Ok(StorePayload::from_file(path, false)))
                                            .await;
                                    }
                                }
                            }
                        } else {
                            let stderr = String::from_utf8_lossy(&out.stderr);
                            warn!(
                                "findscu failed: status={:?}, stderr={}",
                                out.status.code(),
                                stderr
                            );
                            let _ = tx
                                .send(Err(RelayError::operation_failed(format!(
                                    "findscu failed: {}",
                                    stderr.trim()
                                ))))
                                .await;
                        }
                    }
                    Err(e) => {
                        let _ = tx
                            .send(Err(RelayError::operation_failed(format!(
                                "Failed to spawn findscu: {}",
                                e
                            ))))
                            .await;
                    }
                }
            });

            Ok(tokio_stream::wrappers::ReceiverStream::new(rx))
        }

        #[cfg(not(feature = "dcmtk_cli"))]
        {
            let (_tx, rx) = mpsc::channel(1);
            let _ = query;
            Ok(tokio_stream::wrappers::ReceiverStream::new(rx))
        }
    }

    /// Send a C-MOVE request, driving the shared progress state as
    /// retrieved objects arrive
    pub async fn move_request(
        &self,
        node: &DestinationConfig,
        query: MoveQuery,
        progress: std::sync::Arc<ProgressState>,
    ) -> Result<impl Stream<Item = Result<StorePayload>>> {
        info!(
            "Sending C-MOVE to {}@{}:{} (level: {}, dest: {})",
            node.ae_title, node.host, node.port, query.query_level, query.destination_aet
        );
        node.validate()?;
        debug!("C-MOVE query keys: {:?}", query.parameters);

        #[cfg(feature = "dcmtk_cli")]
        {
            use tokio::process::Command;

            let mut args = self.common_args(node);
            args.push("-aem".into());
            args.push(query.destination_aet.clone());
            args.push("-P".into());
            args.push("-k".into());
            args.push(format!("QueryRetrieveLevel={}", query.query_level));
            push_query_keys(&mut args, &query.parameters);

            let out_dir = self
                .config
                .spool_dir
                .join(format!("move_{}", uuid::Uuid::new_v4()));
            tokio::fs::create_dir_all(&out_dir).await?;
            args.push("--port".into());
            args.push(self.config.port.to_string());
            args.push("-od".into());
            args.push(out_dir.to_string_lossy().to_string());

            args.push(node.host.clone());
            args.push(node.port.to_string());

            let (tx, rx) = mpsc::channel(100);

            debug!("Running movescu args: {:?}", args);
            tokio::spawn(async move {
                progress.mark_start_connect();
                match Command::new("movescu").args(&args).output().await {
                    Ok(out) if out.status.success() => {
                        progress.mark_start_transfer();
                        let mut received = 0u32;
                        if let Ok(mut rd) = tokio::fs::read_dir(&out_dir).await {
                            while let Ok(Some(entry)) = rd.next_entry().await {
                                let path = entry.path();
                                if !path.is_file() {
                                    continue;
                                }
                                let size = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
                                progress.expect(1);
                                progress.complete_one(size);
                                received += 1;
                                let _ = tx.send(Ok(StorePayload::from_file(path, false))).await;
                            }
                        }
                        progress.mark_end_transfer();
                        if received == 0 {
                            progress.set_status(status::UNABLE_TO_PROCESS);
                            progress.set_message(RelayError::NoInput.to_string());
                        } else {
                            progress.set_status(status::SUCCESS);
                        }
                        info!("C-MOVE completed with {} object(s)", received);
                    }
                    Ok(out) => {
                        let stderr = String::from_utf8_lossy(&out.stderr);
                        warn!(
                            "movescu failed: status={:?}, stderr={}",
                            out.status.code(),
                            stderr
                        );
                        progress.expect(1);
                        progress.fail_one();
                        progress.mark_end_transfer();
                        let _ = tx
                            .send(Err(RelayError::operation_failed(format!(
                                "movescu failed: {}",
                                stderr.trim()
                            ))))
                            .await;
                    }
                    Err(e) => {
                        progress.expect(1);
                        progress.fail_one();
                        let _ = tx
                            .send(Err(RelayError::operation_failed(format!(
                                "Failed to spawn movescu: {}",
                                e
                            ))))
                            .await;
                    }
                }
            });

            Ok(tokio_stream::wrappers::ReceiverStream::new(rx))
        }

        #[cfg(not(feature = "dcmtk_cli"))]
        {
            let (_tx, rx) = mpsc::channel(1);
            let _ = (query, progress);
            Ok(tokio_stream::wrappers::ReceiverStream::new(rx))
        }
    }

    /// Send one object to a remote node over a fresh association
    #[cfg(feature = "dcmtk_cli")]
    pub async fn store(&self, node: &DestinationConfig, payload: &StorePayload) -> Result<bool> {
        use crate::association::{AssociationParams, Connector};
        use crate::dcmtk::DcmtkConnector;
        use crate::types::{Priority, EXPLICIT_VR_LE};

        info!(
            "Sending C-STORE to {}@{}:{}",
            node.ae_title, node.host, node.port
        );
        node.validate()?;

        let connector = DcmtkConnector::new(self.config.spool_dir.clone());
        let local = NodeIdentity::from_aet(&self.config.local_aet)?;
        let remote = node.to_identity()?;
        let params = AssociationParams {
            calling_aet: self.config.local_aet.clone(),
            connect_timeout: self.config.connect_timeout(),
            max_pdu: node.max_pdu.unwrap_or(self.config.max_pdu),
            extended_negotiation: false,
        };

        let mut association = connector.connect(&local, &remote, &params).await?;
        association.open().await?;

        let meta = payload.meta();
        let transfer_syntax = meta
            .transfer_syntax
            .clone()
            .unwrap_or_else(|| EXPLICIT_VR_LE.to_string());
        let ack = association
            .store(
                meta.sop_class_uid.as_deref().unwrap_or_default(),
                meta.sop_instance_uid.as_deref().unwrap_or_default(),
                Priority::default(),
                payload,
                &transfer_syntax,
            )
            .await?;
        association.release().await?;

        Ok(status::is_success(ack.status))
    }

    /// Test connectivity to a remote node with retry and backoff
    pub async fn test_connection(&self, node: &DestinationConfig, max_retries: u32) -> Result<bool> {
        let mut retries = 0;

        while retries <= max_retries {
            if retries > 0 {
                info!("Connection test retry {} of {}", retries, max_retries);
                tokio::time::sleep(Duration::from_secs(1 << retries)).await;
            }

            match self.echo(node).await {
                Ok(_) => {
                    info!("Connection test successful");
                    return Ok(true);
                }
                Err(e) if e.is_recoverable() && retries < max_retries => {
                    warn!("Connection test failed (attempt {}): {}", retries + 1, e);
                    retries += 1;
                }
                Err(e) => {
                    error!("Connection test failed permanently: {}", e);
                    return Err(e);
                }
            }
        }

        Err(RelayError::operation_failed(
            "Connection test failed after all retries",
        ))
    }

    #[cfg(feature = "dcmtk_cli")]
    fn common_args(&self, node: &DestinationConfig) -> Vec<String> {
        vec![
            "-aet".into(),
            self.config.local_aet.clone(),
            "-aec".into(),
            node.ae_title.clone(),
        ]
    }
}

#[cfg(feature = "dcmtk_cli")]
fn push_query_keys(args: &mut Vec<String>, keys: &std::collections::HashMap<String, String>) {
    for (k, v) in keys {
        // Bare 8-digit keys are formatted as (gggg,eeee) tags
        let tag = if k.len() == 8 && k.chars().all(|c| c.is_ascii_hexdigit()) {
            format!("({},{})", &k[0..4], &k[4..8])
        } else {
            k.clone()
        };
        args.push("-k".into());
        args.push(format!("{}={}", tag, v));
    }
}

/// Builder for creating SCU instances with custom settings
pub struct ScuBuilder {
    config: RelayConfig,
}

impl ScuBuilder {
    /// Start building a new SCU
    pub fn new() -> Self {
        Self {
            config: RelayConfig::default(),
        }
    }

    /// Set the local AE title
    pub fn local_aet(mut self, aet: impl Into<String>) -> Self {
        self.config.local_aet = aet.into();
        self
    }

    /// Set the connection timeout
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the maximum PDU size
    pub fn max_pdu(mut self, size: u32) -> Self {
        self.config.max_pdu = size;
        self
    }

    /// Build the SCU
    pub fn build(self) -> Result<DicomScu> {
        // Destination-less configurations are fine for a bare SCU
        NodeIdentity::from_aet(&self.config.local_aet)?;
        Ok(DicomScu::new(self.config))
    }
}

impl Default for ScuBuilder {
    fn default() -> Self {
        Self::new()
    }
}
