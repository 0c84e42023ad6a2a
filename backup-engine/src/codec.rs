//! Backup codec: the versioned, self-describing artifact document.
//!
//! ```json
//! { "formatVersion": 1, "metadata": {..}, "checksum": "<sha256>", "payload": [..] }
//! ```
//!
//! The payload array is serialized once, compactly, and embedded verbatim.
//! The checksum covers exactly those payload bytes, so verification hashes
//! the bytes as stored rather than a re-serialization of parsed records.

use crate::model::{machine_count, BackupArtifact, BackupMetadata, BackupOrigin, MachineProgramRecord};
use crate::{BackupError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use sha2::{Digest, Sha256};

/// Current artifact document version.
pub const FORMAT_VERSION: u32 = 1;

/// Lowercase hex SHA-256 of `bytes`.
pub fn checksum_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Everything about a new artifact that is not derived from its payload.
#[derive(Debug, Clone)]
pub struct MetadataDraft {
    pub backup_id: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub origin: BackupOrigin,
    pub source_backup_id: Option<String>,
    pub source_file_name: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DocumentRef<'a> {
    format_version: u32,
    metadata: &'a BackupMetadata,
    checksum: &'a str,
    payload: &'a RawValue,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Document {
    format_version: u32,
    metadata: BackupMetadata,
    checksum: String,
    payload: Box<RawValue>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionProbe {
    format_version: u32,
}

/// Serialize `records` into a new artifact document.
pub fn encode(draft: MetadataDraft, records: &[MachineProgramRecord]) -> Result<BackupArtifact> {
    let payload = serde_json::to_string(records)?;
    let checksum = checksum_hex(payload.as_bytes());

    let metadata = BackupMetadata {
        backup_id: draft.backup_id,
        description: draft.description,
        created_at: draft.created_at,
        total_records: records.len() as u32,
        backup_size_bytes: payload.len() as u64,
        machine_count: machine_count(records),
        checksum,
        origin: draft.origin,
        format_version: FORMAT_VERSION,
        is_valid: true,
        source_backup_id: draft.source_backup_id,
        source_file_name: draft.source_file_name,
    };

    let raw = RawValue::from_string(payload)?;
    let bytes = serde_json::to_vec(&DocumentRef {
        format_version: FORMAT_VERSION,
        metadata: &metadata,
        checksum: &metadata.checksum,
        payload: &raw,
    })?;

    Ok(BackupArtifact { metadata, bytes })
}

/// A parsed artifact document whose payload has not been trusted yet.
#[derive(Debug)]
pub struct DecodedArtifact {
    pub metadata: BackupMetadata,
    /// Checksum embedded in the document.
    pub checksum: String,
    payload: Box<RawValue>,
}

impl DecodedArtifact {
    pub fn payload_bytes(&self) -> &[u8] {
        self.payload.get().as_bytes()
    }

    /// Fresh hash of the payload bytes as stored.
    pub fn computed_checksum(&self) -> String {
        checksum_hex(self.payload_bytes())
    }

    pub fn checksum_matches(&self) -> bool {
        self.computed_checksum() == self.checksum
    }

    /// Parse the payload under the current record schema.
    pub fn records(&self) -> Result<Vec<MachineProgramRecord>> {
        serde_json::from_str(self.payload.get())
            .map_err(|e| BackupError::CorruptBackup(format!("payload does not match record schema: {e}")))
    }
}

/// Parse an artifact document, checking the format version first.
pub fn decode(bytes: &[u8]) -> Result<DecodedArtifact> {
    let probe: VersionProbe = serde_json::from_slice(bytes)
        .map_err(|e| BackupError::CorruptBackup(format!("unreadable artifact document: {e}")))?;
    if probe.format_version != FORMAT_VERSION {
        return Err(BackupError::UnsupportedVersion(probe.format_version));
    }

    let doc: Document = serde_json::from_slice(bytes)
        .map_err(|e| BackupError::CorruptBackup(format!("malformed artifact document: {e}")))?;

    Ok(DecodedArtifact {
        metadata: doc.metadata,
        checksum: doc.checksum,
        payload: doc.payload,
    })
}

/// Decode and fully validate: version, checksum and record schema.
pub fn decode_verified(bytes: &[u8]) -> Result<(DecodedArtifact, Vec<MachineProgramRecord>)> {
    let decoded = decode(bytes)?;
    if !decoded.checksum_matches() {
        return Err(BackupError::CorruptBackup(format!(
            "checksum mismatch (recorded {}, computed {})",
            decoded.checksum,
            decoded.computed_checksum()
        )));
    }
    let records = decoded.records()?;
    Ok((decoded, records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures;

    fn draft() -> MetadataDraft {
        MetadataDraft {
            backup_id: "backup_20240301_083000_abcdef12".to_string(),
            description: "test".to_string(),
            created_at: Utc::now(),
            origin: BackupOrigin::Manual,
            source_backup_id: None,
            source_file_name: None,
        }
    }

    fn payload_range(bytes: &[u8]) -> std::ops::Range<usize> {
        let marker = b"\"payload\":";
        let start = bytes
            .windows(marker.len())
            .position(|w| w == marker)
            .unwrap()
            + marker.len();
        // payload is the last member of the document
        start..bytes.len() - 1
    }

    #[test]
    fn test_encode_fills_derived_metadata() {
        let artifact = encode(draft(), &fixtures::schedule()).unwrap();
        assert_eq!(artifact.metadata.total_records, 3);
        assert_eq!(artifact.metadata.machine_count, 2);
        assert_eq!(artifact.metadata.format_version, FORMAT_VERSION);

        let range = payload_range(&artifact.bytes);
        assert_eq!(artifact.metadata.backup_size_bytes, range.len() as u64);
        assert_eq!(artifact.metadata.checksum, checksum_hex(&artifact.bytes[range]));
    }

    #[test]
    fn test_decode_verified_returns_records() {
        let records = fixtures::schedule();
        let artifact = encode(draft(), &records).unwrap();
        let (decoded, decoded_records) = decode_verified(&artifact.bytes).unwrap();
        assert_eq!(decoded.metadata, artifact.metadata);
        assert_eq!(decoded_records, records);
    }

    #[test]
    fn test_empty_payload_is_valid() {
        let artifact = encode(draft(), &[]).unwrap();
        let (_, records) = decode_verified(&artifact.bytes).unwrap();
        assert!(records.is_empty());
        assert_eq!(artifact.metadata.machine_count, 0);
    }

    #[test]
    fn test_any_payload_byte_flip_is_detected() {
        let artifact = encode(draft(), &fixtures::schedule()).unwrap();
        for i in payload_range(&artifact.bytes) {
            let mut bytes = artifact.bytes.clone();
            bytes[i] ^= 0x01;
            assert!(decode_verified(&bytes).is_err(), "flip at byte {i} went undetected");
        }
    }

    #[test]
    fn test_unknown_version_is_rejected() {
        let artifact = encode(draft(), &fixtures::schedule()).unwrap();
        let mut doc: serde_json::Value = serde_json::from_slice(&artifact.bytes).unwrap();
        doc["formatVersion"] = serde_json::json!(99);
        let bytes = serde_json::to_vec(&doc).unwrap();
        assert!(matches!(decode(&bytes), Err(BackupError::UnsupportedVersion(99))));
    }

    #[test]
    fn test_garbage_is_corrupt() {
        assert!(matches!(decode(b"not json"), Err(BackupError::CorruptBackup(_))));
    }
}
