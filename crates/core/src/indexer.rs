use crate::embeddings::Embedder;
use crate::models::{Chunk, EmbeddingRecord};
use crate::traits::VectorIndex;
use crate::IndexError;
use tracing::debug;

/// Embeds chunks and writes them to the vector index in fixed-size batches.
///
/// Point ids are global and strictly increasing across every chunk passed
/// through one indexer. A failed embedding drops the unflushed batch and
/// returns the error; batches already written stay committed.
pub struct Indexer<'a, E, V> {
    embedder: &'a E,
    vector: &'a V,
    batch_size: usize,
    next_point_id: u64,
    pending: Vec<EmbeddingRecord>,
    written: usize,
}

impl<'a, E, V> Indexer<'a, E, V>
where
    E: Embedder + Send + Sync,
    V: VectorIndex + Send + Sync,
{
    pub fn new(embedder: &'a E, vector: &'a V, batch_size: usize) -> Self {
        Self {
            embedder,
            vector,
            batch_size: batch_size.max(1),
            next_point_id: 0,
            pending: Vec::new(),
            written: 0,
        }
    }

    /// Continues numbering after the highest id already in the index, so a
    /// new run never reuses the id of a point it did not write.
    pub async fn resume(
        embedder: &'a E,
        vector: &'a V,
        batch_size: usize,
    ) -> Result<Self, IndexError> {
        let mut indexer = Self::new(embedder, vector, batch_size);
        indexer.next_point_id = match vector.max_point_id().await? {
            Some(max) => max.checked_add(1).ok_or_else(|| {
                IndexError::InvalidConfig("vector point ids exhausted".to_string())
            })?,
            None => 0,
        };
        debug!(next_id = indexer.next_point_id, "indexer resumed");
        Ok(indexer)
    }

    pub fn next_point_id(&self) -> u64 {
        self.next_point_id
    }

    /// Number of records committed to the vector index so far.
    pub fn written(&self) -> usize {
        self.written
    }

    pub async fn index(&mut self, chunk: &Chunk) -> Result<EmbeddingRecord, IndexError> {
        let vector = match self.embedder.embed(&chunk.text).await {
            Ok(vector) => vector,
            Err(source) => {
                self.pending.clear();
                return Err(IndexError::Embedding {
                    document_id: chunk.document_id.clone(),
                    chunk_idx: chunk.chunk_idx,
                    source,
                });
            }
        };

        let record = EmbeddingRecord {
            point_id: self.next_point_id,
            vector,
            payload: chunk.payload(),
        };
        self.next_point_id += 1;
        self.pending.push(record.clone());

        if self.pending.len() >= self.batch_size {
            self.flush().await?;
        }

        Ok(record)
    }

    pub async fn flush(&mut self) -> Result<usize, IndexError> {
        if self.pending.is_empty() {
            return Ok(0);
        }
        let batch = std::mem::take(&mut self.pending);
        self.vector.upsert_records(&batch).await?;
        self.written += batch.len();
        debug!(points = batch.len(), next_id = self.next_point_id, "flushed vector batch");
        Ok(batch.len())
    }

    /// Indexes all chunks of one document and flushes the tail batch.
    pub async fn index_chunks(&mut self, chunks: &[Chunk]) -> Result<usize, IndexError> {
        for chunk in chunks {
            self.index(chunk).await?;
        }
        self.flush().await?;
        Ok(chunks.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::models::PageRange;
    use crate::stores::MemoryVectorIndex;
    use crate::StoreError;
    use async_trait::async_trait;

    fn chunks(count: usize) -> Vec<Chunk> {
        (0..count)
            .map(|idx| Chunk {
                document_id: "doc".to_string(),
                chunk_idx: idx,
                page_num: idx as u32 + 1,
                page_range: PageRange::single(idx as u32 + 1),
                is_merged: false,
                text: format!("Page {}\nchunk body {idx}", idx + 1),
                word_count: 4,
            })
            .collect()
    }

    /// Fails on the text of one chunk.
    struct FlakyEmbedder {
        fail_on: String,
    }

    #[async_trait]
    impl Embedder for FlakyEmbedder {
        fn dimensions(&self) -> usize {
            4
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, StoreError> {
            if text.contains(&self.fail_on) {
                Err(StoreError::NotReady("embedder".to_string()))
            } else {
                Ok(vec![1.0, 0.0, 0.0, 0.0])
            }
        }
    }

    #[tokio::test]
    async fn ids_are_sequential_across_documents() {
        let embedder = CharacterNgramEmbedder { dimensions: 8 };
        let index = MemoryVectorIndex::default();
        let mut indexer = Indexer::new(&embedder, &index, 2);

        indexer.index_chunks(&chunks(3)).await.unwrap();
        indexer.index_chunks(&chunks(2)).await.unwrap();

        assert_eq!(indexer.next_point_id(), 5);
        assert_eq!(indexer.written(), 5);
        assert_eq!(index.point_ids().await, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn resumed_indexer_starts_after_stored_ids() {
        let embedder = CharacterNgramEmbedder { dimensions: 8 };
        let index = MemoryVectorIndex::default();

        let fresh = Indexer::resume(&embedder, &index, 2).await.unwrap();
        assert_eq!(fresh.next_point_id(), 0);

        let mut first = Indexer::new(&embedder, &index, 2);
        first.index_chunks(&chunks(3)).await.unwrap();

        let mut second = Indexer::resume(&embedder, &index, 2).await.unwrap();
        assert_eq!(second.next_point_id(), 3);
        second.index_chunks(&chunks(2)).await.unwrap();
        assert_eq!(index.point_ids().await, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn embedding_failure_keeps_flushed_batches() {
        let embedder = FlakyEmbedder {
            fail_on: "chunk body 3".to_string(),
        };
        let index = MemoryVectorIndex::default();
        let mut indexer = Indexer::new(&embedder, &index, 2);

        let error = indexer.index_chunks(&chunks(5)).await.unwrap_err();

        assert!(matches!(error, IndexError::Embedding { chunk_idx: 3, .. }));
        assert_eq!(index.point_ids().await, vec![0, 1]);
        assert_eq!(indexer.written(), 2);
    }

    #[tokio::test]
    async fn payload_mirrors_chunk_metadata() {
        let embedder = CharacterNgramEmbedder { dimensions: 8 };
        let index = MemoryVectorIndex::default();
        let mut indexer = Indexer::new(&embedder, &index, 10);

        let chunk = &chunks(1)[0];
        let record = indexer.index(chunk).await.unwrap();

        assert_eq!(record.payload, chunk.payload());
        assert!(index.is_empty().await);
        indexer.flush().await.unwrap();
        assert_eq!(index.len().await, 1);
    }
}
