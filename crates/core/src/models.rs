use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::IndexError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub document_id: String,
    pub title: String,
    pub source_path: String,
    pub checksum: String,
    pub indexed_at: DateTime<Utc>,
}

/// Ordered, non-empty list of source page numbers covered by one chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "Vec<u32>", into = "Vec<u32>")]
pub struct PageRange(Vec<u32>);

impl PageRange {
    pub fn new(pages: Vec<u32>) -> Option<Self> {
        if pages.is_empty() {
            None
        } else {
            Some(Self(pages))
        }
    }

    pub fn single(page: u32) -> Self {
        Self(vec![page])
    }

    pub fn pages(&self) -> &[u32] {
        &self.0
    }

    pub fn first(&self) -> u32 {
        self.0[0]
    }

    pub fn last(&self) -> u32 {
        self.0[self.0.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_merged(&self) -> bool {
        self.0.len() > 1
    }

    pub fn contains(&self, page: u32) -> bool {
        self.0.contains(&page)
    }

    pub fn intersects(&self, start: u32, end: u32) -> bool {
        self.0.iter().any(|page| (start..=end).contains(page))
    }

    pub(crate) fn push(&mut self, page: u32) {
        self.0.push(page);
    }

    /// `"7"` for a single page, `"1-3"` for a merged span.
    pub fn label(&self) -> String {
        if self.is_merged() {
            format!("{}-{}", self.first(), self.last())
        } else {
            self.first().to_string()
        }
    }
}

impl TryFrom<Vec<u32>> for PageRange {
    type Error = String;

    fn try_from(value: Vec<u32>) -> Result<Self, Self::Error> {
        PageRange::new(value).ok_or_else(|| "page range must not be empty".to_string())
    }
}

impl From<PageRange> for Vec<u32> {
    fn from(value: PageRange) -> Self {
        value.0
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Stable identity of a chunk node: owning document plus page-range label.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkKey {
    pub document_id: String,
    pub page_range: String,
}

impl ChunkKey {
    pub fn new(document_id: impl Into<String>, range: &PageRange) -> Self {
        Self {
            document_id: document_id.into(),
            page_range: range.label(),
        }
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_page_{}", self.document_id, self.page_range)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub document_id: String,
    pub chunk_idx: usize,
    pub page_num: u32,
    pub page_range: PageRange,
    pub is_merged: bool,
    pub text: String,
    pub word_count: usize,
}

impl Chunk {
    pub fn key(&self) -> ChunkKey {
        ChunkKey::new(self.document_id.clone(), &self.page_range)
    }

    pub fn payload(&self) -> ChunkPayload {
        ChunkPayload {
            document_id: self.document_id.clone(),
            chunk_idx: self.chunk_idx,
            page_num: self.page_num,
            page_range: self.page_range.clone(),
            is_merged: self.is_merged,
            text: self.text.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SequentialEdge {
    pub from: ChunkKey,
    pub to: ChunkKey,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SimilarityEdge {
    pub from: ChunkKey,
    pub to: ChunkKey,
    pub shared_keywords: Vec<String>,
    pub page_distance: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EdgeKind {
    Sequential,
    Similarity,
}

/// A chunk reached through a similarity edge, with the edge payload.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarNeighbor {
    pub chunk: Chunk,
    pub shared_keywords: Vec<String>,
    pub page_distance: i64,
}

/// Vector-index payload mirroring the chunk metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkPayload {
    pub document_id: String,
    pub chunk_idx: usize,
    pub page_num: u32,
    pub page_range: PageRange,
    pub is_merged: bool,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    pub point_id: u64,
    pub vector: Vec<f32>,
    pub payload: ChunkPayload,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPoint {
    pub point_id: u64,
    pub score: f32,
    pub payload: ChunkPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectionStats {
    pub collection: String,
    pub points_count: u64,
    pub vector_size: Option<usize>,
    pub distance: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GraphSummary {
    pub documents: usize,
    pub chunks: usize,
    pub sequential_edges: usize,
    pub similarity_edges: usize,
    pub contains_edges: usize,
    pub min_page: Option<u32>,
    pub max_page: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphOptions {
    pub min_keyword_len: usize,
    pub similarity_threshold: usize,
    /// Exclusive forward offset: chunk `i` is compared with `i+2 .. i+window`.
    pub similarity_window: usize,
    pub max_shared_keywords: usize,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            min_keyword_len: 5,
            similarity_threshold: 3,
            similarity_window: 6,
            max_shared_keywords: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexingOptions {
    pub min_words: usize,
    pub batch_size: usize,
    pub graph: GraphOptions,
}

impl Default for IndexingOptions {
    fn default() -> Self {
        Self {
            min_words: 50,
            batch_size: 50,
            graph: GraphOptions::default(),
        }
    }
}

impl IndexingOptions {
    pub fn validate(&self) -> Result<(), IndexError> {
        if self.batch_size == 0 {
            return Err(IndexError::InvalidConfig(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.graph.similarity_threshold == 0 {
            return Err(IndexError::InvalidConfig(
                "similarity_threshold must be at least 1".to_string(),
            ));
        }
        if self.graph.min_keyword_len == 0 {
            return Err(IndexError::InvalidConfig(
                "min_keyword_len must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryOptions {
    pub context_limit: usize,
    pub context_preview_chars: usize,
    pub summary_preview_chars: usize,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            context_limit: 5,
            context_preview_chars: 200,
            summary_preview_chars: 150,
        }
    }
}
