//! Result records returned by [`crate::QueryEngine`].
//!
//! Every record has the same shape whether or not the operation succeeded; a
//! failure only fills in the `error` field.

use crate::error::QueryFailure;
use crate::models::{Chunk, CollectionStats, GraphSummary, ScoredPoint};
use serde::{Deserialize, Serialize};

pub(crate) fn preview(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SearchType {
    VectorSearch,
    HybridSearch,
}

/// A neighbouring chunk reached through the graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NeighborChunk {
    pub id: String,
    pub chunk_idx: usize,
    pub page_num: u32,
    pub page_range: String,
    pub text: String,
}

impl NeighborChunk {
    pub fn from_chunk(chunk: &Chunk, preview_chars: usize) -> Self {
        Self {
            id: chunk.key().to_string(),
            chunk_idx: chunk.chunk_idx,
            page_num: chunk.page_num,
            page_range: chunk.page_range.label(),
            text: preview(&chunk.text, preview_chars),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelatedChunk {
    #[serde(flatten)]
    pub chunk: NeighborChunk,
    pub shared_keywords: Vec<String>,
    pub page_distance: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChunkContext {
    pub document_id: String,
    pub chunk_idx: usize,
    pub next_chunks: Vec<NeighborChunk>,
    pub previous_chunks: Vec<NeighborChunk>,
    pub related_chunks: Vec<RelatedChunk>,
    pub error: Option<QueryFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkHit {
    pub id: u64,
    pub document_id: String,
    pub chunk_idx: usize,
    pub page_num: u32,
    pub page_range: Vec<u32>,
    pub is_merged: bool,
    pub text: String,
    pub score: f32,
    pub context: Option<ChunkContext>,
}

impl From<ScoredPoint> for ChunkHit {
    fn from(point: ScoredPoint) -> Self {
        Self {
            id: point.point_id,
            document_id: point.payload.document_id,
            chunk_idx: point.payload.chunk_idx,
            page_num: point.payload.page_num,
            page_range: point.payload.page_range.into(),
            is_merged: point.payload.is_merged,
            text: point.payload.text,
            score: point.score,
            context: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResponse {
    pub query: String,
    pub search_type: SearchType,
    pub filter: Option<String>,
    pub expanded_with_context: bool,
    pub count: usize,
    pub chunks: Vec<ChunkHit>,
    pub error: Option<QueryFailure>,
}

impl SearchResponse {
    pub fn new(query: &str, search_type: SearchType, filter: Option<&str>) -> Self {
        Self {
            query: query.to_string(),
            search_type,
            filter: filter.map(str::to_string),
            expanded_with_context: false,
            count: 0,
            chunks: Vec::new(),
            error: None,
        }
    }
}

/// Where navigation from a page lookup leads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageLink {
    pub page_num: u32,
    pub page_range: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelatedPage {
    pub page_num: u32,
    pub page_range: String,
    pub shared_keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageResponse {
    pub document_id: String,
    pub start_page: u32,
    pub end_page: u32,
    pub is_range: bool,
    pub content: Option<String>,
    pub word_count: usize,
    pub page_range: Vec<u32>,
    pub pages_retrieved: usize,
    pub is_merged: bool,
    pub info: Option<String>,
    pub next_page: Option<PageLink>,
    pub prev_page: Option<PageLink>,
    pub related_pages: Vec<RelatedPage>,
    pub error: Option<QueryFailure>,
}

impl PageResponse {
    pub fn new(document_id: &str, start_page: u32, end_page: u32, is_range: bool) -> Self {
        Self {
            document_id: document_id.to_string(),
            start_page,
            end_page,
            is_range,
            content: None,
            word_count: 0,
            page_range: Vec::new(),
            pages_retrieved: 0,
            is_merged: false,
            info: None,
            next_page: None,
            prev_page: None,
            related_pages: Vec::new(),
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkSummary {
    pub id: String,
    pub chunk_idx: usize,
    pub page_range: String,
    pub is_merged: bool,
    pub word_count: usize,
    pub text: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentStats {
    pub total_chunks: usize,
    pub merged_chunks: usize,
    pub sequential_edges: usize,
    pub similarity_edges: usize,
    pub total_edges: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DocumentInfoResponse {
    pub document_id: String,
    pub chunks: Vec<ChunkSummary>,
    pub stats: DocumentStats,
    pub error: Option<QueryFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentSummary {
    pub id: String,
    pub title: String,
    pub source: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DocumentListResponse {
    pub documents: Vec<DocumentSummary>,
    pub total: usize,
    pub error: Option<QueryFailure>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StatusResponse {
    pub collection: Option<CollectionStats>,
    pub graph: Option<GraphSummary>,
    pub error: Option<QueryFailure>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkPayload, PageRange};

    #[test]
    fn preview_respects_char_boundaries() {
        assert_eq!(preview("Überblick", 3), "Übe");
        assert_eq!(preview("ab", 10), "ab");
    }

    #[test]
    fn hits_without_context_serialize_null_context() {
        let hit = ChunkHit::from(ScoredPoint {
            point_id: 3,
            score: 0.5,
            payload: ChunkPayload {
                document_id: "doc".to_string(),
                chunk_idx: 0,
                page_num: 1,
                page_range: PageRange::single(1),
                is_merged: false,
                text: "Page 1".to_string(),
            },
        });
        let json = serde_json::to_value(&hit).unwrap();
        assert!(json["context"].is_null());
        assert_eq!(json["page_range"], serde_json::json!([1]));
    }

    #[test]
    fn failed_and_successful_records_share_shape() {
        let ok = serde_json::to_value(PageResponse::new("doc", 1, 1, false)).unwrap();
        let mut failed = PageResponse::new("doc", 1, 1, false);
        failed.error = Some(QueryFailure::not_found("Page 1 not found in doc"));
        let failed = serde_json::to_value(failed).unwrap();

        let keys = |value: &serde_json::Value| {
            value
                .as_object()
                .map(|object| object.keys().cloned().collect::<Vec<_>>())
                .unwrap_or_default()
        };
        assert_eq!(keys(&ok), keys(&failed));
    }
}
