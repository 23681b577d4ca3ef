use crate::models::{
    Chunk, ChunkKey, CollectionStats, Document, EdgeKind, EmbeddingRecord, GraphSummary,
    ScoredPoint, SequentialEdge, SimilarityEdge, SimilarNeighbor,
};
use crate::StoreError;
use async_trait::async_trait;

#[async_trait]
pub trait VectorIndex {
    async fn ensure_collection(&self, vector_size: usize) -> Result<(), StoreError>;

    /// Removes every point whose payload belongs to `document_id`.
    async fn delete_document(&self, document_id: &str) -> Result<(), StoreError>;

    async fn upsert_records(&self, records: &[EmbeddingRecord]) -> Result<(), StoreError>;

    /// Highest point id currently stored, if any.
    async fn max_point_id(&self) -> Result<Option<u64>, StoreError>;

    async fn search(
        &self,
        query_vector: &[f32],
        limit: usize,
        document_filter: Option<&str>,
    ) -> Result<Vec<ScoredPoint>, StoreError>;

    async fn collection_stats(&self) -> Result<CollectionStats, StoreError>;
}

#[async_trait]
pub trait GraphStore {
    async fn ensure_schema(&self) -> Result<(), StoreError>;

    async fn upsert_document(&self, document: &Document) -> Result<(), StoreError>;

    /// Upserts chunk nodes by key and links them to their document.
    async fn upsert_chunks(&self, chunks: &[Chunk]) -> Result<(), StoreError>;

    /// Deletes chunk nodes of `document_id` whose key is not in `keep`.
    async fn prune_chunks(&self, document_id: &str, keep: &[ChunkKey]) -> Result<(), StoreError>;

    /// Drops all sequential and similarity edges leaving chunks of `document_id`.
    async fn clear_edges(&self, document_id: &str) -> Result<(), StoreError>;

    async fn create_sequential_edges(&self, edges: &[SequentialEdge]) -> Result<(), StoreError>;

    async fn create_similarity_edges(&self, edges: &[SimilarityEdge]) -> Result<(), StoreError>;

    async fn chunk_by_index(
        &self,
        document_id: &str,
        chunk_idx: usize,
    ) -> Result<Option<Chunk>, StoreError>;

    /// Chunks whose page range intersects `[start, end]`, ordered by chunk index.
    async fn chunks_in_pages(
        &self,
        document_id: &str,
        start: u32,
        end: u32,
    ) -> Result<Vec<Chunk>, StoreError>;

    /// Follows sequential edges forward up to `limit` hops, nearest first.
    async fn successors(&self, key: &ChunkKey, limit: usize) -> Result<Vec<Chunk>, StoreError>;

    /// Follows sequential edges backward up to `limit` hops, nearest first.
    async fn predecessors(&self, key: &ChunkKey, limit: usize) -> Result<Vec<Chunk>, StoreError>;

    /// Similarity neighbours ordered by shared keyword count, descending.
    async fn similar_chunks(
        &self,
        key: &ChunkKey,
        limit: usize,
    ) -> Result<Vec<SimilarNeighbor>, StoreError>;

    async fn document_chunks(&self, document_id: &str) -> Result<Vec<Chunk>, StoreError>;

    async fn count_edges(&self, document_id: &str, kind: EdgeKind) -> Result<usize, StoreError>;

    async fn list_documents(&self) -> Result<Vec<Document>, StoreError>;

    async fn summary(&self) -> Result<GraphSummary, StoreError>;
}
