//! Process-lifetime [`VectorIndex`] with brute-force cosine similarity search.

use crate::traits::VectorIndex;
use crate::{EmbeddingRecord, RetrievedChunk, SearchFilter, ServiceError};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
pub struct InMemoryIndex {
    records: RwLock<Vec<EmbeddingRecord>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Distinct provenance tags currently stored.
    pub fn sources(&self) -> Result<BTreeSet<String>, ServiceError> {
        Ok(self
            .read()?
            .iter()
            .map(|record| record.source.clone())
            .collect())
    }

    pub fn chunk_ids(&self, source: &str) -> Result<Vec<String>, ServiceError> {
        Ok(self
            .read()?
            .iter()
            .filter(|record| record.source == source)
            .map(|record| record.chunk_id.clone())
            .collect())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Vec<EmbeddingRecord>>, ServiceError> {
        self.records
            .read()
            .map_err(|_| ServiceError::NotReady("in-memory index lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Vec<EmbeddingRecord>>, ServiceError> {
        self.records
            .write()
            .map_err(|_| ServiceError::NotReady("in-memory index lock poisoned".to_string()))
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn init(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn insert(&self, records: &[EmbeddingRecord]) -> Result<(), ServiceError> {
        let mut stored = self.write()?;
        let expected = stored
            .first()
            .or_else(|| records.first())
            .map(|record| record.vector.len());

        if let Some(expected) = expected {
            if let Some(bad) = records.iter().find(|record| record.vector.len() != expected) {
                return Err(ServiceError::Request(format!(
                    "embedding dimension {} != {} for chunk {}",
                    bad.vector.len(),
                    expected,
                    bad.chunk_id
                )));
            }
        }

        stored.extend_from_slice(records);
        Ok(())
    }

    async fn search(
        &self,
        query_vector: &[f32],
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<RetrievedChunk>, ServiceError> {
        let stored = self.read()?;
        let mut scored: Vec<RetrievedChunk> = stored
            .iter()
            .filter(|record| filter.matches(&record.source))
            .map(|record| RetrievedChunk {
                chunk_id: record.chunk_id.clone(),
                source: record.source.clone(),
                text: record.text.clone(),
                score: cosine_similarity(query_vector, &record.vector),
            })
            .collect();

        scored.sort_by(|left, right| right.score.total_cmp(&left.score));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn delete_document(&self, source: &str) -> Result<usize, ServiceError> {
        let mut stored = self.write()?;
        let before = stored.len();
        stored.retain(|record| record.source != source);
        Ok(before - stored.len())
    }

    async fn count_document(&self, source: &str) -> Result<usize, ServiceError> {
        Ok(self
            .read()?
            .iter()
            .filter(|record| record.source == source)
            .count())
    }

    async fn len(&self) -> Result<usize, ServiceError> {
        Ok(self.read()?.len())
    }

    async fn flush(&self) -> Result<(), ServiceError> {
        Ok(())
    }
}
