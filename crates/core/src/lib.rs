pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod indexer;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod retrieval;
pub mod stores;
pub mod themes;
pub mod traits;

pub use chunking::{
    tiktoken_counter, whitespace_counter, Chunker, TokenCounter, DEFAULT_MAX_TOKENS,
    DEFAULT_TOKENIZER_MODEL,
};
pub use config::{Config, OcrEndpointConfig};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, OpenAiEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{ConfigError, ExtractError, IngestError, ServiceError};
pub use extractor::{
    ocr_engine, DisabledOcr, Extraction, ExtractionMethod, Extractor, HttpOcrEngine,
    LopdfExtractor, OcrEngine, PageText, PdfExtractor,
};
pub use indexer::{build_chunks, make_chunk_id, IndexReport, Indexer};
pub use ingest::{
    discover_documents, expand_paths, ingest_paths, read_document, IngestionReport,
    SkippedDocument,
};
pub use llm::{LanguageModel, OpenAiChatModel};
pub use models::{
    Chunk, Document, DocumentStatus, EmbeddingRecord, MediaType, PipelineOptions, QueryResult,
    ReindexPolicy, RetrievedChunk, SearchFilter, DEFAULT_TEMPERATURE, DEFAULT_TOP_K,
};
pub use orchestrator::{IngestOutcome, Session};
pub use retrieval::Answerer;
pub use stores::{InMemoryIndex, QdrantIndex};
pub use themes::{
    collect_theme_inputs, ThemeMode, ThemeSummary, ThemeSynthesizer, MAIN_IDEA_QUESTION,
};
pub use traits::VectorIndex;
