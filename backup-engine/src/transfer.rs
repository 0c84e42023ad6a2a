//! Export / import of artifacts as portable files.
//!
//! Two containers are supported:
//!
//! - `json`: the artifact document exactly as stored.
//! - `zip`: the document as `<id>.json` plus a `<id>.sha256` sidecar in
//!   `sha256sum` format, so the file can be checked without this service.
//!
//! Imports never trust embedded checksums or totals: the payload is hashed
//! again and the artifact is re-encoded under a fresh id.

use crate::codec::{self, checksum_hex, MetadataDraft};
use crate::model::{new_backup_id, BackupMetadata, BackupOrigin};
use crate::store::BackupStore;
use crate::{BackupError, Result};
use chrono::Utc;
use std::io::{Cursor, Read, Seek, Write};
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use zip::write::FileOptions;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const DEFAULT_MAX_DOCUMENT_BYTES: u64 = 50 * 1024 * 1024;
const MAX_SIDECAR_BYTES: u64 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Zip,
    Json,
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Zip => "application/zip",
            ExportFormat::Json => "application/json",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Zip => "zip",
            ExportFormat::Json => "json",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zip" => Ok(ExportFormat::Zip),
            "json" => Ok(ExportFormat::Json),
            other => Err(BackupError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// A file ready to be handed to a download.
#[derive(Debug, Clone)]
pub struct ExportedFile {
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

#[derive(Clone)]
pub struct ArtifactTransfer {
    store: Arc<dyn BackupStore>,
    max_document_bytes: u64,
}

impl ArtifactTransfer {
    pub fn new(store: Arc<dyn BackupStore>) -> Self {
        Self {
            store,
            max_document_bytes: DEFAULT_MAX_DOCUMENT_BYTES,
        }
    }

    /// Cap on an imported document, measured after decompression.
    pub fn with_max_document_bytes(mut self, limit: u64) -> Self {
        self.max_document_bytes = limit;
        self
    }

    pub async fn export(&self, id: &str, format: ExportFormat, cancel: &CancellationToken) -> Result<ExportedFile> {
        let artifact = self.store.read(id).await?;
        let file_name = format!("{id}.{}", format.extension());

        let bytes = match format {
            ExportFormat::Json => artifact.bytes,
            ExportFormat::Zip => {
                let id = id.to_string();
                run_cancellable(cancel, move || pack_zip(&id, &artifact.bytes)).await?
            }
        };

        info!(backup_id = %id, format = format.extension(), bytes = bytes.len(), "Backup exported");
        Ok(ExportedFile {
            file_name,
            content_type: format.content_type(),
            bytes,
        })
    }

    /// Ingest an uploaded container as a new artifact.
    ///
    /// Nothing is written unless every check passes and the token is still
    /// live.
    pub async fn import(
        &self,
        bytes: Vec<u8>,
        original_file_name: &str,
        cancel: &CancellationToken,
    ) -> Result<BackupMetadata> {
        if bytes.is_empty() {
            return Err(BackupError::Validation("uploaded file is empty".into()));
        }
        if cancel.is_cancelled() {
            return Err(BackupError::Cancelled);
        }

        let limit = self.max_document_bytes;
        let document = if bytes.starts_with(ZIP_MAGIC) {
            run_cancellable(cancel, move || unpack_zip(&bytes, limit)).await?
        } else if bytes.len() as u64 > limit {
            return Err(document_too_large(limit));
        } else {
            bytes
        };

        let (decoded, records) = codec::decode_verified(&document).map_err(|e| {
            warn!(file = %original_file_name, kind = e.kind(), error = %e, "Rejected backup import");
            e
        })?;

        let now = Utc::now();
        let artifact = codec::encode(
            MetadataDraft {
                backup_id: new_backup_id(now),
                description: decoded.metadata.description.clone(),
                created_at: now,
                origin: BackupOrigin::Import,
                source_backup_id: Some(decoded.metadata.backup_id.clone()),
                source_file_name: Some(original_file_name.to_string()),
            },
            &records,
        )?;

        if cancel.is_cancelled() {
            return Err(BackupError::Cancelled);
        }
        self.store.write(&artifact).await?;

        info!(
            backup_id = %artifact.metadata.backup_id,
            source_backup_id = %decoded.metadata.backup_id,
            file = %original_file_name,
            records = artifact.metadata.total_records,
            "Backup imported"
        );
        Ok(artifact.metadata)
    }
}

/// Run blocking archive work off the runtime, abandoning it on cancellation.
async fn run_cancellable<T, F>(cancel: &CancellationToken, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let task = tokio::task::spawn_blocking(f);
    tokio::select! {
        _ = cancel.cancelled() => Err(BackupError::Cancelled),
        joined = task => joined.map_err(|e| BackupError::StoreIo(std::io::Error::other(e)))?,
    }
}

fn sidecar_line(document: &[u8], json_name: &str) -> String {
    format!("{}  {json_name}\n", checksum_hex(document))
}

fn document_too_large(limit: u64) -> BackupError {
    BackupError::Validation(format!("backup document exceeds the {limit} byte import limit"))
}

fn pack_zip(id: &str, document: &[u8]) -> Result<Vec<u8>> {
    write_zip(Cursor::new(Vec::new()), id, document).map(Cursor::into_inner)
}

/// A failure here is on our side of the export, never a corrupt artifact.
fn write_zip<W: Write + Seek>(writer: W, id: &str, document: &[u8]) -> Result<W> {
    fn entries<W: Write + Seek>(writer: W, id: &str, document: &[u8]) -> zip::result::ZipResult<W> {
        let json_name = format!("{id}.json");
        let mut zip = zip::ZipWriter::new(writer);
        let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        zip.start_file(json_name.as_str(), options)?;
        zip.write_all(document)?;
        zip.start_file(format!("{id}.sha256"), options)?;
        zip.write_all(sidecar_line(document, &json_name).as_bytes())?;
        zip.finish()
    }

    entries(writer, id, document).map_err(|e| BackupError::StoreIo(std::io::Error::other(e)))
}

/// Extract the single backup document, reading at most `limit` inflated
/// bytes whatever the entry header claims.
fn unpack_zip(bytes: &[u8], limit: u64) -> Result<Vec<u8>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let names: Vec<String> = archive.file_names().map(str::to_string).collect();

    let json_names: Vec<&String> = names.iter().filter(|n| n.ends_with(".json")).collect();
    let json_name = match json_names.as_slice() {
        [one] => (*one).clone(),
        [] => return Err(BackupError::CorruptBackup("archive contains no backup document".into())),
        _ => return Err(BackupError::CorruptBackup("archive contains more than one backup document".into())),
    };

    let entry = archive.by_name(&json_name)?;
    if entry.size() > limit {
        return Err(document_too_large(limit));
    }
    let mut document = Vec::new();
    entry.take(limit + 1).read_to_end(&mut document)?;
    if document.len() as u64 > limit {
        return Err(document_too_large(limit));
    }

    if let Some(sidecar_name) = names.iter().find(|n| n.ends_with(".sha256")) {
        let mut sidecar = String::new();
        archive
            .by_name(sidecar_name)?
            .take(MAX_SIDECAR_BYTES)
            .read_to_string(&mut sidecar)?;
        let expected = sidecar.split_whitespace().next().unwrap_or_default();
        let actual = checksum_hex(&document);
        if !expected.eq_ignore_ascii_case(&actual) {
            return Err(BackupError::CorruptBackup(format!(
                "sidecar checksum {expected} does not match document checksum {actual}"
            )));
        }
    }

    Ok(document)
}
