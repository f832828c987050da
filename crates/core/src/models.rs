use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

use crate::chunking::DEFAULT_MAX_TOKENS;

pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_TEMPERATURE: f32 = 0.3;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Pdf,
    Png,
    Jpeg,
}

impl MediaType {
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime.trim().to_ascii_lowercase().as_str() {
            "application/pdf" => Some(Self::Pdf),
            "image/png" => Some(Self::Png),
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            _ => None,
        }
    }

    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    pub fn mime(&self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
        }
    }

    pub fn is_image(&self) -> bool {
        !matches!(self, Self::Pdf)
    }
}

/// Processing status of an uploaded document. Only moves forward.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Unprocessed,
    Extracted,
    Embedded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub name: String,
    pub media_type: MediaType,
    pub text: String,
    pub status: DocumentStatus,
    pub extraction_failure: Option<String>,
    /// Set when the last indexing attempt failed; its records may be missing or partial.
    pub index_failure: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

impl Document {
    pub fn new(name: impl Into<String>, media_type: MediaType) -> Self {
        Self {
            name: name.into(),
            media_type,
            text: String::new(),
            status: DocumentStatus::Unprocessed,
            extraction_failure: None,
            index_failure: None,
            uploaded_at: Utc::now(),
        }
    }

    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }

    /// Embedded and its last indexing attempt succeeded.
    pub fn is_searchable(&self) -> bool {
        self.status == DocumentStatus::Embedded && self.index_failure.is_none()
    }

    /// Move to `status` unless the document is already past it.
    pub fn advance(&mut self, status: DocumentStatus) {
        self.status = self.status.max(status);
    }
}

/// A contiguous run of a document's words, bounded by the chunker's token budget.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub chunk_id: String,
    /// Provenance tag: the owning document's name.
    pub source: String,
    pub index: u64,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingRecord {
    pub chunk_id: String,
    pub source: String,
    pub text: String,
    pub vector: Vec<f32>,
}

impl EmbeddingRecord {
    pub fn new(chunk: Chunk, vector: Vec<f32>) -> Self {
        Self {
            chunk_id: chunk.chunk_id,
            source: chunk.source,
            text: chunk.text,
            vector,
        }
    }
}

/// Restricts a similarity search to chunks from the named documents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilter {
    pub sources: Option<BTreeSet<String>>,
}

impl SearchFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn sources<I, S>(sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sources: Some(sources.into_iter().map(Into::into).collect()),
        }
    }

    pub fn matches(&self, source: &str) -> bool {
        self.sources
            .as_ref()
            .map_or(true, |allowed| allowed.contains(source))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub source: String,
    pub text: String,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub question: String,
    pub answer: String,
    /// Distinct provenance tags of the chunks placed in the prompt context.
    pub sources: BTreeSet<String>,
    /// Subset of `sources` the model actually cited in brackets.
    pub cited: BTreeSet<String>,
    /// Retrieved chunks in similarity-rank order.
    pub retrieved: Vec<RetrievedChunk>,
}

impl QueryResult {
    pub fn is_grounded(&self) -> bool {
        !self.retrieved.is_empty()
    }
}

/// What the indexer does when a document already has records in the index.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReindexPolicy {
    /// Delete the document's records, then insert fresh ones under deterministic ids.
    #[default]
    Replace,
    /// Leave existing records untouched.
    Skip,
    /// Insert alongside existing records; ids are salted so every run is disjoint.
    Append,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub max_tokens: usize,
    pub top_k: usize,
    pub temperature: f32,
    pub reindex: ReindexPolicy,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            top_k: DEFAULT_TOP_K,
            temperature: DEFAULT_TEMPERATURE,
            reindex: ReindexPolicy::Replace,
        }
    }
}
