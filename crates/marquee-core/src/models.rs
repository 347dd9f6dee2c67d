use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A venue whose flyers are harvested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Venue {
    pub id: i64,
    pub name: String,
    pub url: String,
    /// Completion time of the last `success`/`partial` run.
    pub last_scraped: Option<DateTime<Utc>>,
}

/// An image descriptor yielded by a venue extractor, not yet downloaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateImage {
    pub source_url: String,
    pub event_name: Option<String>,
    pub event_date: Option<String>,
}

impl CandidateImage {
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            event_name: None,
            event_date: None,
        }
    }

    pub fn with_event_name(mut self, name: Option<String>) -> Self {
        self.event_name = name.and_then(non_blank);
        self
    }

    pub fn with_event_date(mut self, date: Option<String>) -> Self {
        self.event_date = date.and_then(non_blank);
        self
    }
}

/// Collapse internal whitespace and drop empty strings.
fn non_blank(s: String) -> Option<String> {
    let joined = s.split_whitespace().collect::<Vec<_>>().join(" ");
    if joined.is_empty() { None } else { Some(joined) }
}

/// Raster formats accepted by the fetch pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Jpeg,
    Png,
    Gif,
    WebP,
}

impl ImageKind {
    /// File extension (without the dot) used for stored files.
    pub fn extension(&self) -> &'static str {
        match self {
            ImageKind::Jpeg => "jpg",
            ImageKind::Png => "png",
            ImageKind::Gif => "gif",
            ImageKind::WebP => "webp",
        }
    }
}

/// A downloaded, validated image. Never touches disk or the store.
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    /// SHA-256 of `bytes`, 64-char lowercase hex.
    pub hash: String,
    pub kind: ImageKind,
    pub width: u32,
    pub height: u32,
}

impl FetchedImage {
    /// Build from raw bytes, hashing them before any normalisation.
    pub fn new(bytes: Vec<u8>, kind: ImageKind, width: u32, height: u32) -> Self {
        let hash = compute_hash(&bytes);
        Self {
            bytes,
            hash,
            kind,
            width,
            height,
        }
    }
}

/// DTO for inserting a newly accepted image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewImage {
    pub venue_id: i64,
    pub source_url: String,
    pub local_path: String,
    pub image_hash: String,
    pub event_name: Option<String>,
    pub event_date: Option<String>,
}

/// A persisted image row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageRecord {
    pub id: i64,
    pub venue_id: i64,
    pub source_url: String,
    pub local_path: String,
    pub image_hash: String,
    pub event_name: Option<String>,
    pub event_date: Option<String>,
    pub scraped_at: DateTime<Utc>,
}

/// Result of the atomic check-and-insert on `source_url`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new row was written with this id.
    Inserted(i64),
    /// Another row already owns the URL; nothing was written.
    AlreadyPresent,
}

/// Terminal status of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Partial,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        }
    }

    /// Whether finalizing with this status moves the venue's `last_scraped`.
    pub fn advances_venue(&self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Partial)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "success" => Ok(RunStatus::Success),
            "partial" => Ok(RunStatus::Partial),
            "failed" => Ok(RunStatus::Failed),
            _ => Err(format!("Unknown run status: {}", s)),
        }
    }
}

/// DTO for the terminal sync_log row written by `finalize_run`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSyncRun {
    pub venue_id: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub images_found: u32,
    pub images_new: u32,
    pub status: RunStatus,
    pub error_message: Option<String>,
}

/// A finalized, immutable sync run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncRun {
    pub id: i64,
    pub venue_id: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub images_found: u32,
    pub images_new: u32,
    pub status: RunStatus,
    pub error_message: Option<String>,
}

/// Sync run joined with its venue's display name, for history listings.
#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub venue_name: String,
    pub run: SyncRun,
}

/// Per-venue totals for the `venues` listing.
#[derive(Debug, Clone, Serialize)]
pub struct VenueSummary {
    pub venue: Venue,
    pub image_count: i64,
}

/// A content hash reachable under several source URLs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SharedHash {
    pub image_hash: String,
    pub copies: i64,
}

/// Compute a SHA-256 hash of raw bytes, returned as 64-char hex.
pub fn compute_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}
