use crate::chunking::Chunker;
use crate::embeddings::Embedder;
use crate::traits::VectorIndex;
use crate::{Chunk, EmbeddingRecord, IngestError, ReindexPolicy, ServiceError};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

const EMBED_BATCH_SIZE: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexReport {
    pub document: String,
    /// Chunks embedded by this call, or already stored when `skipped`.
    pub chunks_embedded: usize,
    pub replaced: usize,
    pub skipped: bool,
}

/// Chunks document text, embeds each chunk and stores it tagged with the document name.
pub struct Indexer<E: ?Sized, V: ?Sized> {
    embedder: Arc<E>,
    index: Arc<V>,
    chunker: Chunker,
    policy: ReindexPolicy,
}

impl<E, V> Indexer<E, V>
where
    E: Embedder + ?Sized,
    V: VectorIndex + ?Sized,
{
    pub fn new(embedder: Arc<E>, index: Arc<V>, chunker: Chunker) -> Self {
        Self {
            embedder,
            index,
            chunker,
            policy: ReindexPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ReindexPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }

    pub fn policy(&self) -> ReindexPolicy {
        self.policy
    }

    pub async fn index(&self, document_name: &str, text: &str) -> Result<IndexReport, IngestError> {
        if document_name.trim().is_empty() {
            return Err(IngestError::InvalidArgument(
                "document name must not be empty".to_string(),
            ));
        }

        let mut replaced = 0;
        match self.policy {
            ReindexPolicy::Skip => {
                let existing = self.index.count_document(document_name).await?;
                if existing > 0 {
                    tracing::info!(document = document_name, existing, "already indexed, skipping");
                    return Ok(IndexReport {
                        document: document_name.to_string(),
                        chunks_embedded: existing,
                        replaced: 0,
                        skipped: true,
                    });
                }
            }
            ReindexPolicy::Replace => {
                replaced = self.index.delete_document(document_name).await?;
            }
            ReindexPolicy::Append => {}
        }

        let salt = match self.policy {
            ReindexPolicy::Append => Some(Uuid::new_v4()),
            _ => None,
        };
        let chunks = build_chunks(document_name, self.chunker.chunk(text), salt.as_ref());

        for batch in chunks.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<String> = batch.iter().map(|chunk| chunk.text.clone()).collect();
            let vectors = self.embedder.embed(&texts).await?;
            if vectors.len() != batch.len() {
                return Err(IngestError::Service(ServiceError::BackendResponse {
                    backend: "embeddings".to_string(),
                    details: format!(
                        "expected {} vectors, received {}",
                        batch.len(),
                        vectors.len()
                    ),
                }));
            }

            let records: Vec<EmbeddingRecord> = batch
                .iter()
                .cloned()
                .zip(vectors)
                .map(|(chunk, vector)| {
                    tracing::debug!(chunk_id = %chunk.chunk_id, index = chunk.index, "embedded chunk");
                    EmbeddingRecord::new(chunk, vector)
                })
                .collect();
            self.index.insert(&records).await?;
        }

        tracing::info!(
            document = document_name,
            chunks = chunks.len(),
            replaced,
            "indexed document"
        );

        Ok(IndexReport {
            document: document_name.to_string(),
            chunks_embedded: chunks.len(),
            replaced,
            skipped: false,
        })
    }
}

pub fn build_chunks(document_name: &str, texts: Vec<String>, salt: Option<&Uuid>) -> Vec<Chunk> {
    texts
        .into_iter()
        .enumerate()
        .map(|(position, text)| {
            let index = position as u64;
            Chunk {
                chunk_id: make_chunk_id(document_name, index, &text, salt),
                source: document_name.to_string(),
                index,
                text,
            }
        })
        .collect()
}

/// Hex digest over the document name, sequence index and a digest of the chunk text.
pub fn make_chunk_id(document_name: &str, index: u64, text: &str, salt: Option<&Uuid>) -> String {
    let content_digest = Sha256::digest(text.as_bytes());

    let mut hasher = Sha256::new();
    hasher.update(document_name.as_bytes());
    hasher.update([0u8]);
    hasher.update(index.to_le_bytes());
    hasher.update(content_digest);
    if let Some(salt) = salt {
        hasher.update(salt.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}
