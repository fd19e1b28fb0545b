use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const INDEX_CACHE_SCHEMA_VERSION: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentStat {
    pub modified_at: DateTime<Utc>,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedDocument {
    pub length: f32,
    pub modified_at: DateTime<Utc>,
    pub size: u64,
    pub term_frequency: HashMap<String, f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedIndexState {
    pub schema_version: u32,
    pub average_document_length: f32,
    pub documents: HashMap<String, CachedDocument>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadKind {
    Text,
    Binary,
}

impl UploadKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Binary => "binary",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncBranch {
    Reused,
    Replaced,
    Renamed,
    Created,
}

impl SyncBranch {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Reused => "reused",
            Self::Replaced => "replaced",
            Self::Renamed => "renamed",
            Self::Created => "created",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirroredSource {
    pub path: String,
    pub remote_id: String,
    pub branch: SyncBranch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedPath {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvictionRecord {
    pub path: String,
    pub remote_id: String,
    pub evicted_at: DateTime<Utc>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub batch_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub reused: u32,
    pub replaced: u32,
    pub renamed: u32,
    pub created: u32,
    pub sources: Vec<MirroredSource>,
    pub skipped: Vec<SkippedPath>,
    pub evicted: Vec<EvictionRecord>,
    pub warnings: Vec<String>,
    pub cancelled: bool,
}

impl SyncReport {
    #[must_use]
    pub fn new(batch_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            batch_id: batch_id.into(),
            started_at,
            finished_at: started_at,
            reused: 0,
            replaced: 0,
            renamed: 0,
            created: 0,
            sources: Vec::new(),
            skipped: Vec::new(),
            evicted: Vec::new(),
            warnings: Vec::new(),
            cancelled: false,
        }
    }

    pub(crate) fn record_source(&mut self, source: MirroredSource) {
        match source.branch {
            SyncBranch::Reused => self.reused += 1,
            SyncBranch::Replaced => self.replaced += 1,
            SyncBranch::Renamed => self.renamed += 1,
            SyncBranch::Created => self.created += 1,
        }
        self.sources.push(source);
    }

    pub(crate) fn record_skip(&mut self, path: impl Into<String>, reason: impl Into<String>) {
        self.skipped.push(SkippedPath {
            path: path.into(),
            reason: reason.into(),
        });
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRecord {
    pub query_id: String,
    pub asked_at: DateTime<Utc>,
    pub query: String,
    pub source_ids: Vec<String>,
}
