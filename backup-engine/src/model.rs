//! Data model shared by every engine component.
//!
//! `MachineProgramRecord` is the versioned snapshot schema of one live
//! machine-program row. Decoding rejects unknown fields so that a payload
//! written by a newer schema fails loudly instead of losing columns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Scheduling state of a machine program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgramStatus {
    Pending,
    Ready,
    Running,
    Suspended,
    Finished,
}

impl ProgramStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgramStatus::Pending => "PENDING",
            ProgramStatus::Ready => "READY",
            ProgramStatus::Running => "RUNNING",
            ProgramStatus::Suspended => "SUSPENDED",
            ProgramStatus::Finished => "FINISHED",
        }
    }
}

impl fmt::Display for ProgramStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProgramStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ProgramStatus::Pending),
            "READY" => Ok(ProgramStatus::Ready),
            "RUNNING" => Ok(ProgramStatus::Running),
            "SUSPENDED" => Ok(ProgramStatus::Suspended),
            "FINISHED" => Ok(ProgramStatus::Finished),
            other => Err(format!("unknown program status '{other}'")),
        }
    }
}

/// Flat copy of one machine-program row at capture time.
///
/// The live table's primary key is deliberately absent: restored rows are
/// re-keyed by the live schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MachineProgramRecord {
    pub machine_number: i32,
    pub order_number: String,
    pub article_code: String,
    #[serde(default)]
    pub client: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub colors: Vec<String>,
    pub status: ProgramStatus,
    #[serde(default)]
    pub position: Option<i32>,
    #[serde(default)]
    pub delivery_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Number of distinct machines represented in `records`.
pub fn machine_count(records: &[MachineProgramRecord]) -> u32 {
    records
        .iter()
        .map(|r| r.machine_number)
        .collect::<BTreeSet<_>>()
        .len() as u32
}

/// Who created an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupOrigin {
    Manual,
    Daily,
    Safety,
    Import,
}

/// Descriptive metadata of one stored artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadata {
    pub backup_id: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub total_records: u32,
    pub backup_size_bytes: u64,
    pub machine_count: u32,
    pub checksum: String,
    pub origin: BackupOrigin,
    pub format_version: u32,
    /// Cached display value. Never trusted before a restore.
    #[serde(default)]
    pub is_valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_backup_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file_name: Option<String>,
}

/// Generate a fresh backup id: creation timestamp plus a random suffix.
pub fn new_backup_id(at: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("backup_{}_{}", at.format("%Y%m%d_%H%M%S"), &suffix[..8])
}

/// Ids become file names in the filesystem store, so only a safe alphabet is
/// accepted.
pub fn is_valid_backup_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Metadata plus the serialized document bytes. Write-once.
#[derive(Debug, Clone)]
pub struct BackupArtifact {
    pub metadata: BackupMetadata,
    pub bytes: Vec<u8>,
}

/// Which live rows a snapshot captures.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SnapshotFilter {
    #[default]
    All,
    Machines(Vec<i32>),
}

impl SnapshotFilter {
    pub fn matches(&self, record: &MachineProgramRecord) -> bool {
        match self {
            SnapshotFilter::All => true,
            SnapshotFilter::Machines(machines) => machines.contains(&record.machine_number),
        }
    }
}

/// Boundary result of create, daily and import operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BackupMetadata>,
    pub message: String,
    /// Error kind when `success` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

impl BackupResult {
    pub fn ok(metadata: BackupMetadata, message: impl Into<String>) -> Self {
        Self {
            success: true,
            backup_id: Some(metadata.backup_id.clone()),
            metadata: Some(metadata),
            message: message.into(),
            error_kind: None,
        }
    }

    pub fn failed(error: &crate::BackupError) -> Self {
        Self {
            success: false,
            backup_id: None,
            metadata: None,
            message: error.to_string(),
            error_kind: Some(error.kind().to_string()),
        }
    }
}
