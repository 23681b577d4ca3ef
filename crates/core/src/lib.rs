pub mod embeddings;
pub mod error;
pub mod graph;
pub mod indexer;
pub mod models;
pub mod pipeline;
pub mod query;
pub mod responses;
pub mod segmenter;
pub mod stores;
pub mod traits;

pub use embeddings::{
    AnyEmbedder, CharacterNgramEmbedder, Embedder, HttpEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{FailureKind, IndexError, QueryFailure, StoreError};
pub use graph::{derive_edges, keyword_set, ChunkGraph, GraphBuilder};
pub use indexer::Indexer;
pub use models::{
    Chunk, ChunkKey, Document, EdgeKind, GraphOptions, IndexingOptions, PageRange, QueryOptions,
};
pub use pipeline::{
    discover_documents, DocumentReport, IndexPipeline, IndexReport, IndexTotals, SkippedDocument,
};
pub use query::QueryEngine;
pub use responses::{
    ChunkContext, DocumentInfoResponse, DocumentListResponse, PageResponse, SearchResponse,
    StatusResponse,
};
pub use segmenter::build_chunks;
pub use stores::{MemoryGraphStore, MemoryVectorIndex, Neo4jStore, QdrantStore};
pub use traits::{GraphStore, VectorIndex};
