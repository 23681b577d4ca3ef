use crate::embeddings::Embedder;
use crate::graph::GraphBuilder;
use crate::indexer::Indexer;
use crate::models::{Document, IndexingOptions};
use crate::segmenter::build_chunks;
use crate::traits::{GraphStore, VectorIndex};
use crate::IndexError;
use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

const DOCUMENT_EXTENSIONS: [&str; 3] = ["md", "markdown", "txt"];

pub fn discover_documents(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_document = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                DOCUMENT_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
            });

        if is_document {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Reads a source file. The document id is the file stem.
pub async fn load_document(path: &Path) -> Result<(Document, String), IndexError> {
    let bytes = tokio::fs::read(path).await?;
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| IndexError::MissingFileName(path.display().to_string()))?;
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| IndexError::MissingFileName(path.display().to_string()))?;

    let document = Document {
        document_id: stem.to_string(),
        title: stem.to_string(),
        source_path: name.to_string(),
        checksum: digest_bytes(&bytes),
        indexed_at: Utc::now(),
    };

    Ok((document, String::from_utf8_lossy(&bytes).into_owned()))
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedDocument {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DocumentReport {
    pub document_id: String,
    pub chunks: usize,
    pub merged_chunks: usize,
    pub pages_merged: usize,
    pub first_page: u32,
    pub last_page: u32,
    pub sequential_edges: usize,
    pub similarity_edges: usize,
}

/// Merge statistics summed over every indexed document of a run.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct IndexTotals {
    pub chunks: usize,
    pub merged_chunks: usize,
    pub pages_merged: usize,
}

impl IndexTotals {
    pub fn from_documents(documents: &[DocumentReport]) -> Self {
        documents.iter().fold(Self::default(), |totals, doc| Self {
            chunks: totals.chunks + doc.chunks,
            merged_chunks: totals.merged_chunks + doc.merged_chunks,
            pages_merged: totals.pages_merged + doc.pages_merged,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexReport {
    pub documents: Vec<DocumentReport>,
    pub skipped: Vec<SkippedDocument>,
    pub vectors_written: usize,
    pub totals: IndexTotals,
}

/// Batch rebuild: segment, embed and persist each document in turn.
pub struct IndexPipeline<'a, E, V, G> {
    embedder: &'a E,
    vector: &'a V,
    graph: &'a G,
    options: IndexingOptions,
}

impl<'a, E, V, G> IndexPipeline<'a, E, V, G>
where
    E: Embedder + Send + Sync,
    V: VectorIndex + Send + Sync,
    G: GraphStore + Send + Sync,
{
    pub fn new(embedder: &'a E, vector: &'a V, graph: &'a G, options: IndexingOptions) -> Self {
        Self {
            embedder,
            vector,
            graph,
            options,
        }
    }

    /// Indexes every document under `folder`. A failing document is recorded
    /// in the report and the run continues with the next one.
    pub async fn run(&self, folder: &Path) -> Result<IndexReport, IndexError> {
        self.options.validate()?;

        let files = discover_documents(folder);
        if files.is_empty() {
            return Err(IndexError::InvalidArgument(format!(
                "no documents found in {}",
                folder.display()
            )));
        }

        self.vector
            .ensure_collection(self.embedder.dimensions())
            .await?;
        self.graph.ensure_schema().await?;

        let mut indexer =
            Indexer::resume(self.embedder, self.vector, self.options.batch_size).await?;
        let mut seen = HashSet::new();
        let mut report = IndexReport::default();

        for path in files {
            let outcome = async {
                let (document, content) = load_document(&path).await?;
                if !seen.insert(document.document_id.clone()) {
                    return Err(IndexError::DuplicateDocument(document.document_id));
                }
                self.index_document(&document, &content, &mut indexer).await
            }
            .await;

            match outcome {
                Ok(document_report) => report.documents.push(document_report),
                Err(error) => {
                    warn!(path = %path.display(), reason = %error, "skipped document");
                    report.skipped.push(SkippedDocument {
                        path,
                        reason: error.to_string(),
                    });
                }
            }
        }

        report.vectors_written = indexer.written();
        report.totals = IndexTotals::from_documents(&report.documents);
        info!(
            documents = report.documents.len(),
            skipped = report.skipped.len(),
            chunks = report.totals.chunks,
            merged = report.totals.merged_chunks,
            vectors = report.vectors_written,
            "index build complete"
        );
        Ok(report)
    }

    /// Replaces one document's vectors and graph with a fresh segmentation.
    pub async fn index_document(
        &self,
        document: &Document,
        content: &str,
        indexer: &mut Indexer<'a, E, V>,
    ) -> Result<DocumentReport, IndexError> {
        let chunks = build_chunks(&document.document_id, content, self.options.min_words)?;

        self.vector.delete_document(&document.document_id).await?;
        indexer.index_chunks(&chunks).await?;

        let graph = GraphBuilder::new(self.graph, self.options.graph.clone())
            .build(document, &chunks)
            .await?;

        let merged: Vec<_> = chunks.iter().filter(|chunk| chunk.is_merged).collect();
        let document_report = DocumentReport {
            document_id: document.document_id.clone(),
            chunks: chunks.len(),
            merged_chunks: merged.len(),
            pages_merged: merged.iter().map(|chunk| chunk.page_range.len()).sum(),
            first_page: chunks.first().map_or(0, |chunk| chunk.page_range.first()),
            last_page: chunks.last().map_or(0, |chunk| chunk.page_range.last()),
            sequential_edges: graph.sequential.len(),
            similarity_edges: graph.similarity.len(),
        };

        info!(
            document_id = %document.document_id,
            chunks = document_report.chunks,
            merged = document_report.merged_chunks,
            first_page = document_report.first_page,
            last_page = document_report.last_page,
            "indexed document"
        );
        Ok(document_report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::models::EdgeKind;
    use crate::stores::{MemoryGraphStore, MemoryVectorIndex};
    use std::fs;
    use tempfile::tempdir;

    fn paged(pages: &[(u32, usize)]) -> String {
        pages
            .iter()
            .map(|(number, words)| {
                format!("Page {number}\n{}\n", vec!["protocol"; *words].join(" "))
            })
            .collect()
    }

    #[test]
    fn discover_documents_is_recursive_and_sorted() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let nested = dir.path().join("nested");
        fs::create_dir(&nested)?;
        fs::write(dir.path().join("b.md"), "Page 1")?;
        fs::write(nested.join("a.MD"), "Page 1")?;
        fs::write(dir.path().join("skip.pdf"), "x")?;

        let files = discover_documents(dir.path());
        assert_eq!(files.len(), 2);
        assert!(files[0] < files[1]);
        Ok(())
    }

    #[test]
    fn checksum_is_reproducible() {
        assert_eq!(digest_bytes(b"abc"), digest_bytes(b"abc"));
        assert_ne!(digest_bytes(b"abc"), digest_bytes(b"abd"));
    }

    #[tokio::test]
    async fn empty_folder_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let embedder = CharacterNgramEmbedder::default();
        let (vector, graph) = (MemoryVectorIndex::default(), MemoryGraphStore::default());
        let pipeline = IndexPipeline::new(&embedder, &vector, &graph, IndexingOptions::default());

        assert!(matches!(
            pipeline.run(dir.path()).await,
            Err(IndexError::InvalidArgument(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn unsegmentable_document_does_not_abort_batch() -> Result<(), Box<dyn std::error::Error>>
    {
        let dir = tempdir()?;
        fs::write(dir.path().join("a_spec.md"), paged(&[(1, 60), (2, 10), (3, 60)]))?;
        fs::write(dir.path().join("b_notes.md"), "no markers in this file")?;
        fs::write(dir.path().join("c_spec.md"), paged(&[(1, 70)]))?;

        let embedder = CharacterNgramEmbedder::default();
        let (vector, graph) = (MemoryVectorIndex::default(), MemoryGraphStore::default());
        let pipeline = IndexPipeline::new(&embedder, &vector, &graph, IndexingOptions::default());
        let report = pipeline.run(dir.path()).await?;

        assert_eq!(report.documents.len(), 2);
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].reason.contains("b_notes"));

        let first = &report.documents[0];
        assert_eq!(first.document_id, "a_spec");
        assert_eq!(first.chunks, 2);
        assert_eq!(first.merged_chunks, 1);
        assert_eq!(first.pages_merged, 2);
        assert_eq!((first.first_page, first.last_page), (1, 3));

        assert_eq!(report.vectors_written, 3);
        assert_eq!(
            report.totals,
            IndexTotals {
                chunks: 3,
                merged_chunks: 1,
                pages_merged: 2,
            }
        );
        let json = serde_json::to_value(&report)?;
        assert_eq!(json["totals"]["pages_merged"], 2);
        assert_eq!(vector.point_ids().await, vec![0, 1, 2]);
        assert_eq!(graph.list_documents().await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn rerunning_the_build_replaces_instead_of_merging(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("core_spec.md");
        fs::write(&path, paged(&[(1, 60), (2, 60), (3, 60), (4, 60)]))?;

        let embedder = CharacterNgramEmbedder::default();
        let (vector, graph) = (MemoryVectorIndex::default(), MemoryGraphStore::default());
        let pipeline = IndexPipeline::new(&embedder, &vector, &graph, IndexingOptions::default());

        let first = pipeline.run(dir.path()).await?;
        let second = pipeline.run(dir.path()).await?;
        assert_eq!(first.documents, second.documents);
        assert_eq!(
            graph.count_edges("core_spec", EdgeKind::Sequential).await?,
            3
        );

        fs::write(&path, paged(&[(1, 10), (2, 60), (3, 60)]))?;
        pipeline.run(dir.path()).await?;

        let chunks = graph.document_chunks("core_spec").await?;
        let labels: Vec<_> = chunks.iter().map(|chunk| chunk.page_range.label()).collect();
        assert_eq!(labels, vec!["1-2", "3"]);
        assert_eq!(vector.len().await, 2);
        assert_eq!(
            graph.count_edges("core_spec", EdgeKind::Sequential).await?,
            1
        );
        Ok(())
    }

    #[tokio::test]
    async fn later_run_keeps_vectors_of_other_documents() -> Result<(), Box<dyn std::error::Error>>
    {
        let first_folder = tempdir()?;
        let second_folder = tempdir()?;
        fs::write(
            first_folder.path().join("manual.md"),
            paged(&[(1, 60), (2, 60), (3, 60)]),
        )?;
        fs::write(second_folder.path().join("notes.md"), paged(&[(1, 60), (2, 60)]))?;

        let embedder = CharacterNgramEmbedder::default();
        let (vector, graph) = (MemoryVectorIndex::default(), MemoryGraphStore::default());
        let pipeline = IndexPipeline::new(&embedder, &vector, &graph, IndexingOptions::default());

        pipeline.run(first_folder.path()).await?;
        pipeline.run(second_folder.path()).await?;

        assert_eq!(vector.point_ids().await, vec![0, 1, 2, 3, 4]);
        let query = embedder.embed("protocol").await?;
        let manual_hits = vector.search(&query, 10, Some("manual")).await?;
        assert_eq!(manual_hits.len(), 3);
        let notes_hits = vector.search(&query, 10, Some("notes")).await?;
        assert_eq!(notes_hits.len(), 2);
        assert_eq!(graph.document_chunks("manual").await?.len(), 3);

        pipeline.run(first_folder.path()).await?;
        assert_eq!(vector.point_ids().await, vec![3, 4, 5, 6, 7]);
        assert_eq!(vector.search(&query, 10, Some("manual")).await?.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_stems_are_skipped() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::create_dir(dir.path().join("v2"))?;
        fs::write(dir.path().join("spec.md"), paged(&[(1, 60)]))?;
        fs::write(dir.path().join("v2").join("spec.md"), paged(&[(1, 60)]))?;

        let embedder = CharacterNgramEmbedder::default();
        let (vector, graph) = (MemoryVectorIndex::default(), MemoryGraphStore::default());
        let pipeline = IndexPipeline::new(&embedder, &vector, &graph, IndexingOptions::default());
        let report = pipeline.run(dir.path()).await?;

        assert_eq!(report.documents.len(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].reason.contains("duplicate"));
        Ok(())
    }
}
