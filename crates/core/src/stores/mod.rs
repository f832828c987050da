pub mod memory;
pub mod qdrant;

pub use memory::{cosine_similarity, InMemoryIndex};
pub use qdrant::QdrantIndex;
