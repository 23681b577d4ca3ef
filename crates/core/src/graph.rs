use crate::models::{Chunk, Document, GraphOptions, SequentialEdge, SimilarityEdge};
use crate::traits::GraphStore;
use crate::StoreError;
use std::collections::BTreeSet;
use tracing::info;

/// Lowercased, purely alphabetic whitespace tokens of at least `min_len` characters.
pub fn keyword_set(text: &str, min_len: usize) -> BTreeSet<String> {
    text.split_whitespace()
        .filter(|token| token.chars().count() >= min_len)
        .filter(|token| token.chars().all(char::is_alphabetic))
        .map(str::to_lowercase)
        .collect()
}

/// Edges derived for one document's ordered chunk list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkGraph {
    pub sequential: Vec<SequentialEdge>,
    pub similarity: Vec<SimilarityEdge>,
}

pub fn sequential_edges(chunks: &[Chunk]) -> Vec<SequentialEdge> {
    chunks
        .windows(2)
        .map(|pair| SequentialEdge {
            from: pair[0].key(),
            to: pair[1].key(),
        })
        .collect()
}

/// Compares each chunk with the chunks in `i+2 .. i+window`; the immediate
/// successor is already linked sequentially.
pub fn similarity_edges(chunks: &[Chunk], options: &GraphOptions) -> Vec<SimilarityEdge> {
    let keywords: Vec<BTreeSet<String>> = chunks
        .iter()
        .map(|chunk| keyword_set(&chunk.text, options.min_keyword_len))
        .collect();

    let mut edges = Vec::new();
    for (i, source) in chunks.iter().enumerate() {
        let upper = i.saturating_add(options.similarity_window).min(chunks.len());
        for j in (i + 2)..upper {
            let target = &chunks[j];
            let shared: Vec<&String> = keywords[i].intersection(&keywords[j]).collect();
            if shared.len() < options.similarity_threshold {
                continue;
            }

            edges.push(SimilarityEdge {
                from: source.key(),
                to: target.key(),
                shared_keywords: shared
                    .into_iter()
                    .take(options.max_shared_keywords)
                    .cloned()
                    .collect(),
                page_distance: i64::from(target.page_num) - i64::from(source.page_num),
            });
        }
    }

    edges
}

pub fn derive_edges(chunks: &[Chunk], options: &GraphOptions) -> ChunkGraph {
    ChunkGraph {
        sequential: sequential_edges(chunks),
        similarity: similarity_edges(chunks, options),
    }
}

/// Persists a document's chunk nodes and rebuilds its edges from scratch, so
/// repeated builds over the same chunks leave the same graph.
pub struct GraphBuilder<'a, G> {
    store: &'a G,
    options: GraphOptions,
}

impl<'a, G> GraphBuilder<'a, G>
where
    G: GraphStore + Send + Sync,
{
    pub fn new(store: &'a G, options: GraphOptions) -> Self {
        Self { store, options }
    }

    pub async fn build(
        &self,
        document: &Document,
        chunks: &[Chunk],
    ) -> Result<ChunkGraph, StoreError> {
        let graph = derive_edges(chunks, &self.options);
        let keys: Vec<_> = chunks.iter().map(Chunk::key).collect();

        self.store.upsert_document(document).await?;
        self.store.upsert_chunks(chunks).await?;
        self.store
            .prune_chunks(&document.document_id, &keys)
            .await?;
        self.store.clear_edges(&document.document_id).await?;
        self.store
            .create_sequential_edges(&graph.sequential)
            .await?;
        self.store
            .create_similarity_edges(&graph.similarity)
            .await?;

        info!(
            document_id = %document.document_id,
            chunks = chunks.len(),
            sequential = graph.sequential.len(),
            similarity = graph.similarity.len(),
            "graph rebuilt"
        );

        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EdgeKind, PageRange};
    use crate::stores::MemoryGraphStore;
    use chrono::Utc;

    fn chunk(idx: usize, page: u32, text: &str) -> Chunk {
        Chunk {
            document_id: "doc".to_string(),
            chunk_idx: idx,
            page_num: page,
            page_range: PageRange::single(page),
            is_merged: false,
            text: text.to_string(),
            word_count: text.split_whitespace().count(),
        }
    }

    fn document() -> Document {
        Document {
            document_id: "doc".to_string(),
            title: "doc".to_string(),
            source_path: "doc.md".to_string(),
            checksum: "abc".to_string(),
            indexed_at: Utc::now(),
        }
    }

    #[test]
    fn keywords_skip_short_numeric_and_punctuated_tokens() {
        let keywords = keyword_set("Token tokens tok3n route, ROUTER abc Über", 5);
        let expected: BTreeSet<String> = ["token", "tokens", "router"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(keywords, expected);
    }

    #[test]
    fn sequential_edges_link_each_adjacent_pair() {
        let chunks: Vec<_> = (0..4).map(|i| chunk(i, i as u32 + 1, "x")).collect();
        let edges = sequential_edges(&chunks);
        assert_eq!(edges.len(), 3);
        assert_eq!(edges[0].from.page_range, "1");
        assert_eq!(edges[2].to.page_range, "4");
    }

    #[test]
    fn similarity_edge_requires_threshold_overlap() {
        let options = GraphOptions::default();
        let shared = "alpha bravo charlie";
        let mut chunks = vec![
            chunk(0, 1, "kilos alpha bravo charlie"),
            chunk(1, 2, "nothing here"),
            chunk(2, 3, "filler words"),
            chunk(3, 7, shared),
        ];

        let edges = similarity_edges(&chunks, &options);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].from.page_range, "1");
        assert_eq!(edges[0].to.page_range, "7");
        assert_eq!(edges[0].page_distance, 6);
        assert_eq!(edges[0].shared_keywords, vec!["alpha", "bravo", "charlie"]);

        chunks[3].text = "alpha bravo".to_string();
        assert!(similarity_edges(&chunks, &options).is_empty());
    }

    #[test]
    fn similarity_window_skips_successor_and_distant_chunks() {
        let options = GraphOptions::default();
        let text = "alpha bravo charlie";
        let chunks: Vec<_> = (0..8).map(|i| chunk(i, i as u32 + 1, text)).collect();
        let edges = similarity_edges(&chunks, &options);

        let from_first: Vec<_> = edges
            .iter()
            .filter(|edge| edge.from.page_range == "1")
            .map(|edge| edge.to.page_range.clone())
            .collect();
        assert_eq!(from_first, vec!["3", "4", "5", "6"]);
    }

    #[test]
    fn unbounded_window_compares_up_to_the_last_chunk() {
        let options = GraphOptions {
            similarity_window: usize::MAX,
            ..GraphOptions::default()
        };
        let text = "alpha bravo charlie";
        let chunks: Vec<_> = (0..4).map(|i| chunk(i, i as u32 + 1, text)).collect();
        let pairs: Vec<_> = similarity_edges(&chunks, &options)
            .into_iter()
            .map(|edge| (edge.from.page_range, edge.to.page_range))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("1".to_string(), "3".to_string()),
                ("1".to_string(), "4".to_string()),
                ("2".to_string(), "4".to_string()),
            ]
        );
    }

    #[test]
    fn shared_keywords_are_capped() {
        let options = GraphOptions {
            max_shared_keywords: 2,
            ..GraphOptions::default()
        };
        let text = "alpha bravo charlie delta";
        let chunks = vec![chunk(0, 1, text), chunk(1, 2, ""), chunk(2, 3, text)];
        let edges = similarity_edges(&chunks, &options);
        assert_eq!(edges[0].shared_keywords.len(), 2);
    }

    #[tokio::test]
    async fn rebuilding_does_not_duplicate_edges() {
        let store = MemoryGraphStore::default();
        let builder = GraphBuilder::new(&store, GraphOptions::default());
        let text = "alpha bravo charlie";
        let chunks: Vec<_> = (0..5).map(|i| chunk(i, i as u32 + 1, text)).collect();

        let first = builder.build(&document(), &chunks).await.unwrap();
        builder.build(&document(), &chunks).await.unwrap();

        let sequential = store.count_edges("doc", EdgeKind::Sequential).await.unwrap();
        let similarity = store.count_edges("doc", EdgeKind::Similarity).await.unwrap();
        assert_eq!(sequential, first.sequential.len());
        assert_eq!(similarity, first.similarity.len());
        assert_eq!(store.document_chunks("doc").await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn rebuild_with_new_boundaries_replaces_old_nodes() {
        let store = MemoryGraphStore::default();
        let builder = GraphBuilder::new(&store, GraphOptions::default());
        let before: Vec<_> = (0..3).map(|i| chunk(i, i as u32 + 1, "x")).collect();
        builder.build(&document(), &before).await.unwrap();

        let merged = Chunk {
            page_range: PageRange::new(vec![1, 2, 3]).unwrap(),
            is_merged: true,
            ..chunk(0, 1, "x y z")
        };
        builder.build(&document(), &[merged]).await.unwrap();

        let chunks = store.document_chunks("doc").await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].page_range.label(), "1-3");
        assert_eq!(store.count_edges("doc", EdgeKind::Sequential).await.unwrap(), 0);
    }
}
