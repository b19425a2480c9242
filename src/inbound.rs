//! Spool-directory inbound adapter
//!
//! Bundled transport adapter that feeds the relay from a watched directory:
//! any DICOM file dropped there (for example by a store SCP writing received
//! objects to disk) is submitted over the transport bridge and removed once
//! handled.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

use crate::identity::NodeIdentity;
use crate::status;
use crate::transport::TransportSender;
use crate::types::StorePayload;
use crate::Result;

/// Watches a directory and relays every DICOM file that appears in it
pub struct SpoolWatcher {
    dir: PathBuf,
    poll_interval: Duration,
    source: NodeIdentity,
    sender: TransportSender,
}

impl SpoolWatcher {
    /// Create a watcher over the given directory.
    ///
    /// Objects are attributed to `source` when routed.
    pub fn new(
        dir: PathBuf,
        poll_interval: Duration,
        source: NodeIdentity,
        sender: TransportSender,
    ) -> Self {
        Self {
            dir,
            poll_interval,
            source,
            sender,
        }
    }

    /// Watch the directory until the transport bridge closes
    pub async fn run(self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        info!("Watching {:?} for inbound objects", self.dir);

        loop {
            self.sweep().await?;
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Submit every settled DICOM file in the directory once
    pub async fn sweep(&self) -> Result<usize> {
        let mut handled = 0;
        let mut entries = tokio::fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("dcm") {
                continue;
            }
            // Leave files alone until they have settled for one interval,
            // so half-written objects are not picked up.
            let settled = entry
                .metadata()
                .await
                .ok()
                .and_then(|m| m.modified().ok())
                .and_then(|t| SystemTime::now().duration_since(t).ok())
                .map(|age| age >= self.poll_interval)
                .unwrap_or(false);
            if !settled {
                continue;
            }

            debug!("Submitting spooled object {:?}", path);
            let payload = StorePayload::from_file(path.clone(), true);
            let response = self.sender.submit(self.source.clone(), payload).await?;
            if status::is_success(response.status) {
                debug!(
                    "Relayed {} with status {:#06x}",
                    response.sop_instance_uid.as_deref().unwrap_or("<unknown>"),
                    response.status
                );
            } else {
                warn!(
                    "Relay of {:?} acknowledged with status {:#06x}: {}",
                    path,
                    response.status,
                    response.message.as_deref().unwrap_or("")
                );
            }
            handled += 1;
        }

        Ok(handled)
    }
}
