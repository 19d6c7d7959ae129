pub mod embedder;
pub mod join_paths;
pub mod retriever;
pub mod vector_store;

pub use embedder::{Embedder, HashingEmbedder, OpenAiEmbedder};
pub use join_paths::{JoinGraph, JoinPath, JoinStep};
pub use retriever::{BusinessMetadataRetriever, ContextualBusinessSchema, RankedColumn, RankedTable};
pub use vector_store::{cosine_similarity, Embedding};
