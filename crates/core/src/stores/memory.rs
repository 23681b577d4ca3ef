use crate::models::{
    Chunk, ChunkKey, CollectionStats, Document, EdgeKind, EmbeddingRecord, GraphSummary,
    ScoredPoint, SequentialEdge, SimilarNeighbor, SimilarityEdge,
};
use crate::traits::{GraphStore, VectorIndex};
use crate::StoreError;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct SimilarityLink {
    shared_keywords: Vec<String>,
    page_distance: i64,
}

#[derive(Debug, Default)]
struct GraphState {
    documents: BTreeMap<String, Document>,
    chunks: BTreeMap<ChunkKey, Chunk>,
    next: BTreeSet<(ChunkKey, ChunkKey)>,
    related: BTreeMap<(ChunkKey, ChunkKey), SimilarityLink>,
}

impl GraphState {
    fn walk(&self, start: &ChunkKey, limit: usize, forward: bool) -> Vec<Chunk> {
        let mut found = Vec::new();
        let mut visited = BTreeSet::from([start.clone()]);
        let mut current = start.clone();

        while found.len() < limit {
            let step = self.next.iter().find_map(|(from, to)| match forward {
                true if *from == current => Some(to.clone()),
                false if *to == current => Some(from.clone()),
                _ => None,
            });
            let Some(key) = step else {
                break;
            };
            if !visited.insert(key.clone()) {
                break;
            }
            if let Some(chunk) = self.chunks.get(&key) {
                found.push(chunk.clone());
            }
            current = key;
        }

        found
    }

    fn drop_edges_touching(&mut self, removed: &BTreeSet<ChunkKey>) {
        self.next
            .retain(|(from, to)| !removed.contains(from) && !removed.contains(to));
        self.related
            .retain(|(from, to), _| !removed.contains(from) && !removed.contains(to));
    }
}

/// Graph store kept in process memory, keyed by [`ChunkKey`].
#[derive(Debug, Default)]
pub struct MemoryGraphStore {
    state: RwLock<GraphState>,
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn upsert_document(&self, document: &Document) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state
            .documents
            .insert(document.document_id.clone(), document.clone());
        Ok(())
    }

    async fn upsert_chunks(&self, chunks: &[Chunk]) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        for chunk in chunks {
            state.chunks.insert(chunk.key(), chunk.clone());
        }
        Ok(())
    }

    async fn prune_chunks(&self, document_id: &str, keep: &[ChunkKey]) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let removed: BTreeSet<ChunkKey> = state
            .chunks
            .keys()
            .filter(|key| key.document_id == document_id && !keep.contains(key))
            .cloned()
            .collect();

        state.chunks.retain(|key, _| !removed.contains(key));
        state.drop_edges_touching(&removed);
        Ok(())
    }

    async fn clear_edges(&self, document_id: &str) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.next.retain(|(from, _)| from.document_id != document_id);
        state
            .related
            .retain(|(from, _), _| from.document_id != document_id);
        Ok(())
    }

    async fn create_sequential_edges(&self, edges: &[SequentialEdge]) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        for edge in edges {
            if state.chunks.contains_key(&edge.from) && state.chunks.contains_key(&edge.to) {
                state.next.insert((edge.from.clone(), edge.to.clone()));
            }
        }
        Ok(())
    }

    async fn create_similarity_edges(&self, edges: &[SimilarityEdge]) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        for edge in edges {
            if state.chunks.contains_key(&edge.from) && state.chunks.contains_key(&edge.to) {
                state.related.insert(
                    (edge.from.clone(), edge.to.clone()),
                    SimilarityLink {
                        shared_keywords: edge.shared_keywords.clone(),
                        page_distance: edge.page_distance,
                    },
                );
            }
        }
        Ok(())
    }

    async fn chunk_by_index(
        &self,
        document_id: &str,
        chunk_idx: usize,
    ) -> Result<Option<Chunk>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .chunks
            .values()
            .find(|chunk| chunk.document_id == document_id && chunk.chunk_idx == chunk_idx)
            .cloned())
    }

    async fn chunks_in_pages(
        &self,
        document_id: &str,
        start: u32,
        end: u32,
    ) -> Result<Vec<Chunk>, StoreError> {
        let state = self.state.read().await;
        let mut chunks: Vec<Chunk> = state
            .chunks
            .values()
            .filter(|chunk| chunk.document_id == document_id)
            .filter(|chunk| chunk.page_range.intersects(start, end))
            .cloned()
            .collect();
        chunks.sort_by_key(|chunk| chunk.chunk_idx);
        Ok(chunks)
    }

    async fn successors(&self, key: &ChunkKey, limit: usize) -> Result<Vec<Chunk>, StoreError> {
        Ok(self.state.read().await.walk(key, limit, true))
    }

    async fn predecessors(&self, key: &ChunkKey, limit: usize) -> Result<Vec<Chunk>, StoreError> {
        Ok(self.state.read().await.walk(key, limit, false))
    }

    async fn similar_chunks(
        &self,
        key: &ChunkKey,
        limit: usize,
    ) -> Result<Vec<SimilarNeighbor>, StoreError> {
        let state = self.state.read().await;
        let mut neighbors: Vec<SimilarNeighbor> = state
            .related
            .iter()
            .filter(|((from, _), _)| from == key)
            .filter_map(|((_, to), link)| {
                state.chunks.get(to).map(|chunk| SimilarNeighbor {
                    chunk: chunk.clone(),
                    shared_keywords: link.shared_keywords.clone(),
                    page_distance: link.page_distance,
                })
            })
            .collect();

        neighbors.sort_by(|left, right| {
            right
                .shared_keywords
                .len()
                .cmp(&left.shared_keywords.len())
                .then(left.chunk.chunk_idx.cmp(&right.chunk.chunk_idx))
        });
        neighbors.truncate(limit);
        Ok(neighbors)
    }

    async fn document_chunks(&self, document_id: &str) -> Result<Vec<Chunk>, StoreError> {
        let state = self.state.read().await;
        let mut chunks: Vec<Chunk> = state
            .chunks
            .values()
            .filter(|chunk| chunk.document_id == document_id)
            .cloned()
            .collect();
        chunks.sort_by_key(|chunk| chunk.chunk_idx);
        Ok(chunks)
    }

    async fn count_edges(&self, document_id: &str, kind: EdgeKind) -> Result<usize, StoreError> {
        let state = self.state.read().await;
        Ok(match kind {
            EdgeKind::Sequential => state
                .next
                .iter()
                .filter(|(from, _)| from.document_id == document_id)
                .count(),
            EdgeKind::Similarity => state
                .related
                .keys()
                .filter(|(from, _)| from.document_id == document_id)
                .count(),
        })
    }

    async fn list_documents(&self) -> Result<Vec<Document>, StoreError> {
        Ok(self.state.read().await.documents.values().cloned().collect())
    }

    async fn summary(&self) -> Result<GraphSummary, StoreError> {
        let state = self.state.read().await;
        Ok(GraphSummary {
            documents: state.documents.len(),
            chunks: state.chunks.len(),
            sequential_edges: state.next.len(),
            similarity_edges: state.related.len(),
            contains_edges: state
                .chunks
                .keys()
                .filter(|key| state.documents.contains_key(&key.document_id))
                .count(),
            min_page: state.chunks.values().map(|chunk| chunk.page_num).min(),
            max_page: state.chunks.values().map(|chunk| chunk.page_num).max(),
        })
    }
}

#[derive(Debug, Default)]
struct VectorState {
    vector_size: Option<usize>,
    points: BTreeMap<u64, EmbeddingRecord>,
}

/// Brute-force cosine index kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryVectorIndex {
    state: RwLock<VectorState>,
}

impl MemoryVectorIndex {
    pub async fn len(&self) -> usize {
        self.state.read().await.points.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn point_ids(&self) -> Vec<u64> {
        self.state.read().await.points.keys().copied().collect()
    }
}

fn cosine(left: &[f32], right: &[f32]) -> f32 {
    let dot: f32 = left.iter().zip(right).map(|(a, b)| a * b).sum();
    let left_norm = left.iter().map(|value| value * value).sum::<f32>().sqrt();
    let right_norm = right.iter().map(|value| value * value).sum::<f32>().sqrt();
    if left_norm == 0.0 || right_norm == 0.0 {
        0.0
    } else {
        dot / (left_norm * right_norm)
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn ensure_collection(&self, vector_size: usize) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        match state.vector_size {
            Some(existing) if existing != vector_size => Err(StoreError::Dimension {
                expected: existing,
                actual: vector_size,
            }),
            _ => {
                state.vector_size = Some(vector_size);
                Ok(())
            }
        }
    }

    async fn delete_document(&self, document_id: &str) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state
            .points
            .retain(|_, record| record.payload.document_id != document_id);
        Ok(())
    }

    async fn upsert_records(&self, records: &[EmbeddingRecord]) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if let Some(expected) = state.vector_size {
            if let Some(record) = records.iter().find(|record| record.vector.len() != expected) {
                return Err(StoreError::Dimension {
                    expected,
                    actual: record.vector.len(),
                });
            }
        }
        for record in records {
            state.points.insert(record.point_id, record.clone());
        }
        Ok(())
    }

    async fn max_point_id(&self) -> Result<Option<u64>, StoreError> {
        Ok(self.state.read().await.points.keys().next_back().copied())
    }

    async fn search(
        &self,
        query_vector: &[f32],
        limit: usize,
        document_filter: Option<&str>,
    ) -> Result<Vec<ScoredPoint>, StoreError> {
        let state = self.state.read().await;
        let mut hits: Vec<ScoredPoint> = state
            .points
            .values()
            .filter(|record| {
                document_filter.map_or(true, |document_id| {
                    record.payload.document_id == document_id
                })
            })
            .map(|record| ScoredPoint {
                point_id: record.point_id,
                score: cosine(query_vector, &record.vector),
                payload: record.payload.clone(),
            })
            .collect();

        hits.sort_by(|left, right| {
            right
                .score
                .total_cmp(&left.score)
                .then(left.point_id.cmp(&right.point_id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn collection_stats(&self) -> Result<CollectionStats, StoreError> {
        let state = self.state.read().await;
        Ok(CollectionStats {
            collection: "memory".to_string(),
            points_count: state.points.len() as u64,
            vector_size: state.vector_size,
            distance: Some("Cosine".to_string()),
            status: Some("green".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkPayload, PageRange};

    fn record(point_id: u64, document_id: &str, vector: Vec<f32>) -> EmbeddingRecord {
        EmbeddingRecord {
            point_id,
            vector,
            payload: ChunkPayload {
                document_id: document_id.to_string(),
                chunk_idx: point_id as usize,
                page_num: point_id as u32 + 1,
                page_range: PageRange::single(point_id as u32 + 1),
                is_merged: false,
                text: format!("chunk {point_id}"),
            },
        }
    }

    #[tokio::test]
    async fn search_orders_by_score_and_applies_filter() {
        let index = MemoryVectorIndex::default();
        index.ensure_collection(2).await.unwrap();
        index
            .upsert_records(&[
                record(0, "a", vec![1.0, 0.0]),
                record(1, "a", vec![0.6, 0.8]),
                record(2, "b", vec![1.0, 0.1]),
            ])
            .await
            .unwrap();

        let hits = index.search(&[1.0, 0.0], 10, None).await.unwrap();
        assert_eq!(hits.iter().map(|hit| hit.point_id).collect::<Vec<_>>(), vec![0, 2, 1]);

        let filtered = index.search(&[1.0, 0.0], 1, Some("a")).await.unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].payload.document_id, "a");
    }

    #[tokio::test]
    async fn mismatched_dimensions_are_rejected() {
        let index = MemoryVectorIndex::default();
        index.ensure_collection(3).await.unwrap();
        assert!(index.ensure_collection(4).await.is_err());
        assert!(index
            .upsert_records(&[record(0, "a", vec![1.0])])
            .await
            .is_err());
    }

    #[tokio::test]
    async fn delete_document_removes_only_its_points() {
        let index = MemoryVectorIndex::default();
        index
            .upsert_records(&[record(0, "a", vec![1.0]), record(1, "b", vec![1.0])])
            .await
            .unwrap();
        index.delete_document("a").await.unwrap();
        assert_eq!(index.point_ids().await, vec![1]);
    }

    #[tokio::test]
    async fn max_point_id_tracks_highest_stored_id() {
        let index = MemoryVectorIndex::default();
        assert_eq!(index.max_point_id().await.unwrap(), None);
        index
            .upsert_records(&[record(7, "a", vec![1.0]), record(2, "b", vec![1.0])])
            .await
            .unwrap();
        assert_eq!(index.max_point_id().await.unwrap(), Some(7));
        index.delete_document("a").await.unwrap();
        assert_eq!(index.max_point_id().await.unwrap(), Some(2));
    }
}
