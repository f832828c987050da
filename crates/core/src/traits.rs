use crate::{EmbeddingRecord, RetrievedChunk, SearchFilter, ServiceError};
use async_trait::async_trait;

/// Searchable store of embedding records, each tagged with the document it came from.
///
/// One instance is created per session and handed to every component that reads or writes it.
/// Call [`VectorIndex::init`] before first use and [`VectorIndex::flush`] on shutdown.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn init(&self) -> Result<(), ServiceError>;

    async fn insert(&self, records: &[EmbeddingRecord]) -> Result<(), ServiceError>;

    /// Up to `top_k` records most similar to `query_vector`, best first.
    async fn search(
        &self,
        query_vector: &[f32],
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<RetrievedChunk>, ServiceError>;

    /// Remove every record of `source`, returning how many were removed.
    async fn delete_document(&self, source: &str) -> Result<usize, ServiceError>;

    async fn count_document(&self, source: &str) -> Result<usize, ServiceError>;

    async fn len(&self) -> Result<usize, ServiceError>;

    async fn flush(&self) -> Result<(), ServiceError>;
}
