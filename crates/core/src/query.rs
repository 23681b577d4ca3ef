use crate::embeddings::Embedder;
use crate::error::QueryFailure;
use crate::models::{Chunk, EdgeKind, QueryOptions};
use crate::responses::{
    preview, ChunkContext, ChunkHit, ChunkSummary, DocumentInfoResponse, DocumentListResponse,
    DocumentStats, DocumentSummary, NeighborChunk, PageLink, PageResponse, RelatedChunk,
    RelatedPage, SearchResponse, SearchType, StatusResponse,
};
use crate::traits::{GraphStore, VectorIndex};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Read-only query surface over the vector index and the chunk graph.
///
/// No method returns `Err`: backend faults, missing pages and bad arguments
/// are reported through the `error` field of the returned record.
pub struct QueryEngine<E, V, G> {
    embedder: E,
    vector: V,
    graph: G,
    options: QueryOptions,
}

impl<E, V, G> QueryEngine<E, V, G>
where
    E: Embedder + Send + Sync,
    V: VectorIndex + Send + Sync,
    G: GraphStore + Send + Sync,
{
    pub fn new(embedder: E, vector: V, graph: G) -> Self {
        Self {
            embedder,
            vector,
            graph,
            options: QueryOptions::default(),
        }
    }

    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        document_filter: Option<&str>,
    ) -> SearchResponse {
        let mut response = SearchResponse::new(query, SearchType::VectorSearch, document_filter);
        match self.vector_hits(query, limit, document_filter).await {
            Ok(hits) => {
                response.count = hits.len();
                response.chunks = hits;
            }
            Err(failure) => response.error = Some(failure),
        }

        info!(
            query,
            filter = document_filter.unwrap_or("*"),
            hits = response.count,
            failed = response.error.is_some(),
            "vector search"
        );
        response
    }

    /// Vector search whose hits optionally carry their graph neighbourhood.
    /// A hit whose context cannot be loaded keeps the failure in its own
    /// `context.error`; the other hits are unaffected.
    pub async fn hybrid_search(
        &self,
        query: &str,
        limit: usize,
        document_filter: Option<&str>,
        expand: bool,
    ) -> SearchResponse {
        let mut response = SearchResponse::new(query, SearchType::HybridSearch, document_filter);
        let mut hits = match self.vector_hits(query, limit, document_filter).await {
            Ok(hits) => hits,
            Err(failure) => {
                response.error = Some(failure);
                return response;
            }
        };

        let mut expansion_failures = 0;
        if expand {
            for hit in &mut hits {
                let context = self.context(&hit.document_id, hit.chunk_idx).await;
                if let Some(failure) = &context.error {
                    expansion_failures += 1;
                    warn!(
                        document_id = %hit.document_id,
                        chunk_idx = hit.chunk_idx,
                        reason = %failure,
                        "context expansion failed"
                    );
                }
                hit.context = Some(context);
            }
            response.expanded_with_context = true;
        }

        response.count = hits.len();
        response.chunks = hits;
        info!(
            query,
            filter = document_filter.unwrap_or("*"),
            hits = response.count,
            expanded = expand,
            expansion_failures,
            "hybrid search"
        );
        response
    }

    /// Sequential successors, predecessors and similarity neighbours of one chunk.
    pub async fn context(&self, document_id: &str, chunk_idx: usize) -> ChunkContext {
        let mut context = ChunkContext {
            document_id: document_id.to_string(),
            chunk_idx,
            ..ChunkContext::default()
        };
        if let Err(failure) = self.fill_context(&mut context).await {
            context.error = Some(failure);
        }
        context
    }

    /// Resolves one page, or the pages `start..=end`, to the chunks that own them.
    pub async fn page(&self, document_id: &str, start: u32, end: Option<u32>) -> PageResponse {
        let end_page = end.unwrap_or(start);
        let mut response = PageResponse::new(document_id, start, end_page, end_page != start);
        if let Err(failure) = self.resolve_pages(&mut response).await {
            debug!(document_id, start, end = end_page, reason = %failure, "page lookup failed");
            response.error = Some(failure);
        }
        response
    }

    pub async fn document_info(&self, document_id: &str) -> DocumentInfoResponse {
        let mut response = DocumentInfoResponse {
            document_id: document_id.to_string(),
            ..DocumentInfoResponse::default()
        };
        if let Err(failure) = self.fill_document_info(&mut response).await {
            response.error = Some(failure);
        }
        response
    }

    pub async fn list_documents(&self) -> DocumentListResponse {
        match self.graph.list_documents().await {
            Ok(mut documents) => {
                documents.sort_by(|left, right| left.document_id.cmp(&right.document_id));
                let documents: Vec<DocumentSummary> = documents
                    .into_iter()
                    .map(|document| DocumentSummary {
                        id: document.document_id,
                        title: document.title,
                        source: document.source_path,
                    })
                    .collect();
                DocumentListResponse {
                    total: documents.len(),
                    documents,
                    error: None,
                }
            }
            Err(error) => DocumentListResponse {
                error: Some(error.into()),
                ..DocumentListResponse::default()
            },
        }
    }

    /// Collection statistics and graph summary. Either half may be missing
    /// when its backend is down.
    pub async fn status(&self) -> StatusResponse {
        let (collection, graph) =
            tokio::join!(self.vector.collection_stats(), self.graph.summary());

        let mut response = StatusResponse::default();
        let mut failures = Vec::new();
        match collection {
            Ok(stats) => response.collection = Some(stats),
            Err(error) => failures.push(QueryFailure::from(error)),
        }
        match graph {
            Ok(summary) => response.graph = Some(summary),
            Err(error) => failures.push(QueryFailure::from(error)),
        }

        response.error = failures.into_iter().reduce(|mut first, other| {
            first.message = format!("{}; {}", first.message, other.message);
            first
        });
        response
    }

    async fn vector_hits(
        &self,
        query: &str,
        limit: usize,
        document_filter: Option<&str>,
    ) -> Result<Vec<ChunkHit>, QueryFailure> {
        if query.trim().is_empty() {
            return Err(QueryFailure::invalid("query is empty"));
        }
        if limit == 0 {
            return Err(QueryFailure::invalid("limit must be at least 1"));
        }

        let query_vector = self.embedder.embed(query).await?;
        let mut points = self
            .vector
            .search(&query_vector, limit, document_filter)
            .await?;

        points.sort_by(|left, right| right.score.total_cmp(&left.score));
        points.truncate(limit);
        Ok(points.into_iter().map(ChunkHit::from).collect())
    }

    async fn fill_context(&self, context: &mut ChunkContext) -> Result<(), QueryFailure> {
        let chunk = self
            .graph
            .chunk_by_index(&context.document_id, context.chunk_idx)
            .await?
            .ok_or_else(|| {
                QueryFailure::not_found(format!(
                    "Chunk {} not found in {}",
                    context.chunk_idx, context.document_id
                ))
            })?;

        let key = chunk.key();
        let limit = self.options.context_limit;
        let preview_chars = self.options.context_preview_chars;
        let neighbors = |chunks: Vec<Chunk>| -> Vec<NeighborChunk> {
            chunks
                .iter()
                .map(|chunk| NeighborChunk::from_chunk(chunk, preview_chars))
                .collect()
        };

        context.next_chunks = neighbors(self.graph.successors(&key, limit).await?);
        context.previous_chunks = neighbors(self.graph.predecessors(&key, limit).await?);
        context.related_chunks = self
            .graph
            .similar_chunks(&key, limit)
            .await?
            .into_iter()
            .map(|neighbor| RelatedChunk {
                chunk: NeighborChunk::from_chunk(&neighbor.chunk, preview_chars),
                shared_keywords: neighbor.shared_keywords,
                page_distance: neighbor.page_distance,
            })
            .collect();
        Ok(())
    }

    async fn resolve_pages(&self, response: &mut PageResponse) -> Result<(), QueryFailure> {
        let (start, end) = (response.start_page, response.end_page);
        if start == 0 {
            return Err(QueryFailure::invalid("page numbers start at 1"));
        }
        if end < start {
            return Err(QueryFailure::invalid(format!(
                "end page {end} is before start page {start}"
            )));
        }

        let document_id = response.document_id.clone();
        let chunks = self.graph.chunks_in_pages(&document_id, start, end).await?;
        let (Some(first), Some(last)) = (chunks.first(), chunks.last()) else {
            return Err(QueryFailure::not_found(if response.is_range {
                format!("No pages found in range {start}-{end} in {document_id}")
            } else {
                format!("Page {start} not found in {document_id}")
            }));
        };

        if response.is_range {
            let content = chunks
                .iter()
                .map(|chunk| format!("\n--- Pages {} ---\n{}", chunk.page_range.label(), chunk.text))
                .collect::<Vec<_>>()
                .join("\n");
            let pages: BTreeSet<u32> = chunks
                .iter()
                .flat_map(|chunk| chunk.page_range.pages().iter().copied())
                .collect();

            response.content = Some(content);
            response.word_count = chunks.iter().map(|chunk| chunk.word_count).sum();
            response.page_range = pages.into_iter().collect();
            response.pages_retrieved = chunks.len();
            response.is_merged = chunks.iter().any(|chunk| chunk.is_merged);
            response.info = Some(format!(
                "Retrieved {} page chunk(s) covering pages {start}-{end}",
                chunks.len()
            ));
        } else {
            response.content = Some(first.text.clone());
            response.word_count = first.word_count;
            response.page_range = first.page_range.pages().to_vec();
            response.pages_retrieved = 1;
            response.is_merged = first.is_merged;
            if first.is_merged {
                response.info = Some(format!(
                    "Page {start} is part of merged pages {}",
                    first.page_range.label()
                ));
            }
        }

        let link = |chunk: &Chunk| PageLink {
            page_num: chunk.page_num,
            page_range: chunk.page_range.label(),
        };
        response.next_page = self
            .graph
            .successors(&last.key(), 1)
            .await?
            .first()
            .map(link);
        response.prev_page = self
            .graph
            .predecessors(&first.key(), 1)
            .await?
            .first()
            .map(link);
        response.related_pages = self
            .graph
            .similar_chunks(&first.key(), self.options.context_limit)
            .await?
            .into_iter()
            .map(|neighbor| RelatedPage {
                page_num: neighbor.chunk.page_num,
                page_range: neighbor.chunk.page_range.label(),
                shared_keywords: neighbor.shared_keywords,
            })
            .collect();
        Ok(())
    }

    async fn fill_document_info(
        &self,
        response: &mut DocumentInfoResponse,
    ) -> Result<(), QueryFailure> {
        let document_id = response.document_id.clone();
        let chunks = self.graph.document_chunks(&document_id).await?;
        if chunks.is_empty() {
            return Err(QueryFailure::not_found(format!(
                "Document {document_id} not found"
            )));
        }

        let sequential_edges = self
            .graph
            .count_edges(&document_id, EdgeKind::Sequential)
            .await?;
        let similarity_edges = self
            .graph
            .count_edges(&document_id, EdgeKind::Similarity)
            .await?;

        response.stats = DocumentStats {
            total_chunks: chunks.len(),
            merged_chunks: chunks.iter().filter(|chunk| chunk.is_merged).count(),
            sequential_edges,
            similarity_edges,
            total_edges: sequential_edges + similarity_edges,
        };
        response.chunks = chunks
            .iter()
            .map(|chunk| ChunkSummary {
                id: chunk.key().to_string(),
                chunk_idx: chunk.chunk_idx,
                page_range: chunk.page_range.label(),
                is_merged: chunk.is_merged,
                word_count: chunk.word_count,
                text: preview(&chunk.text, self.options.summary_preview_chars),
            })
            .collect();
        Ok(())
    }
}
