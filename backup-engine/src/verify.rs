//! Integrity verifier.

use crate::codec::{self, DecodedArtifact};
use crate::model::MachineProgramRecord;
use crate::store::BackupStore;
use crate::{BackupError, Result};
use std::sync::Arc;
use tracing::warn;

#[derive(Clone)]
pub struct IntegrityVerifier {
    store: Arc<dyn BackupStore>,
}

impl IntegrityVerifier {
    pub fn new(store: Arc<dyn BackupStore>) -> Self {
        Self { store }
    }

    /// `true` only if the artifact exists, decodes under the current format
    /// version, and its payload hashes to both the embedded and the indexed
    /// checksum. Never errors.
    pub async fn verify(&self, id: &str) -> bool {
        match self.check(id).await {
            Ok(_) => true,
            Err(e) => {
                warn!(backup_id = %id, kind = e.kind(), error = %e, "Backup failed verification");
                false
            }
        }
    }

    /// Error-carrying form of [`verify`](Self::verify). Returns the decoded
    /// document and its records on success.
    pub async fn check(&self, id: &str) -> Result<(DecodedArtifact, Vec<MachineProgramRecord>)> {
        let artifact = self.store.read(id).await?;
        let (decoded, records) = codec::decode_verified(&artifact.bytes)?;

        if decoded.checksum != artifact.metadata.checksum {
            return Err(BackupError::CorruptBackup(format!(
                "document checksum {} does not match indexed checksum {}",
                decoded.checksum, artifact.metadata.checksum
            )));
        }
        if decoded.metadata.backup_id != id {
            return Err(BackupError::CorruptBackup(format!(
                "document belongs to backup {}",
                decoded.metadata.backup_id
            )));
        }

        Ok((decoded, records))
    }
}
