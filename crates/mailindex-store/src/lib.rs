//! On-disk full-text and vector index for the email and memory collections.
//!
//! Each collection lives in its own SQLite file holding an FTS5 table, a
//! metadata table, a stable-id table and an embedding table. Writes go through
//! [`StoreWriter`]; reads go through [`StoreReader`], which owns separate
//! read-only connections and reopens them whenever the writer bumps the
//! collection's [`Generations`] counter.

mod email;
mod embedding;
mod generations;
mod handles;
mod hybrid;
mod memory;
mod ops;
mod params;
mod query;
mod rebuild;
mod schema;
mod text_prep;
mod vectors;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;

pub use email::{
    DateRangeRow, EmailDocument, EmailHit, EmailMessage, EmailSample, MessageLookup,
};
pub use embedding::{
    build_embedder, Embedder, EmbedderConfig, EmbedderKind, HashEmbedder, ProviderEmbedder,
};
pub use generations::Generations;
pub use handles::{open_store, InitSummary, StoreReader, StoreWriter};
pub use memory::{MemoryDocument, MemoryEntry, MemoryHit, MemorySample};
pub use params::{parse_date_param, DateFilter, SearchRequest};
pub use query::{build_match_expression, QueryTerms};
pub use rebuild::{RebuildBatchReport, RebuildBatchRequest, RebuildStartReport};
pub use text_prep::{prepare_email_text, prepare_memory_text};

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    InvalidParams(String),
    #[error("embedding failed: {0}")]
    Embedding(String),
    #[error("embeddings disabled (MAILINDEX_EMBEDDER=none)")]
    EmbeddingsDisabled,
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidParams(message.into())
    }
}

/// The two independent document collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Email,
    Memory,
}

impl Collection {
    pub const ALL: [Collection; 2] = [Collection::Email, Collection::Memory];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Memory => "memory",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Self::Email => 0,
            Self::Memory => 1,
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = StoreError;

    fn from_str(raw: &str) -> StoreResult<Self> {
        match raw.trim() {
            "email" => Ok(Self::Email),
            "memory" => Ok(Self::Memory),
            other => Err(StoreError::invalid(format!(
                "Invalid target '{other}': expected 'email' or 'memory'"
            ))),
        }
    }
}

/// Location of the per-collection database files under a profile directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    pub data_dir: PathBuf,
    pub email_db: PathBuf,
    pub memory_db: PathBuf,
}

impl StorePaths {
    pub fn for_profile(profile_dir: &Path) -> Self {
        use mailindex_core::config::sqlite::{DATA_DIR_NAME, EMAIL_DB_FILE, MEMORY_DB_FILE};

        let data_dir = profile_dir.join(DATA_DIR_NAME);
        Self {
            email_db: data_dir.join(EMAIL_DB_FILE),
            memory_db: data_dir.join(MEMORY_DB_FILE),
            data_dir,
        }
    }

    pub fn db_path(&self, collection: Collection) -> &Path {
        match collection {
            Collection::Email => &self.email_db,
            Collection::Memory => &self.memory_db,
        }
    }
}

/// Shape shared by `stats` and `memoryStats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionStats {
    pub ok: bool,
    pub docs: i64,
    pub vec_docs: i64,
    pub db_bytes: u64,
}

/// Result of an `indexBatch` / `memoryIndexBatch` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexReport {
    pub ok: bool,
    pub count: i64,
    pub replaced: i64,
    pub embedded: i64,
    pub skipped: i64,
}

/// Result of a `removeBatch` / `memoryRemoveBatch` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct RemoveReport {
    pub ok: bool,
    pub count: i64,
}

/// Result of `filterNewMessages`: a total partition of the input ids.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterReport {
    pub ok: bool,
    pub new_msg_ids: Vec<String>,
    pub total_checked: i64,
    pub new_count: i64,
    pub skipped_count: i64,
}
