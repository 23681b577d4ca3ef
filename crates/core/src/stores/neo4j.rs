use crate::models::{
    Chunk, ChunkKey, Document, EdgeKind, GraphSummary, PageRange, SequentialEdge,
    SimilarNeighbor, SimilarityEdge,
};
use crate::traits::GraphStore;
use crate::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const CHUNK_COLUMNS: usize = 6;

pub struct Neo4jStore {
    endpoint: String,
    database: String,
    username: String,
    password: String,
    client: Client,
}

impl Neo4jStore {
    pub fn new(
        endpoint: impl Into<String>,
        database: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            database: database.into(),
            username: username.into(),
            password: password.into(),
            client: Client::new(),
        }
    }

    /// Same as [`Neo4jStore::new`] with every request bounded by `timeout`.
    pub fn with_timeout(
        endpoint: impl Into<String>,
        database: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let endpoint = endpoint.into();
        url::Url::parse(&endpoint)?;
        let mut store = Self::new(endpoint, database, username, password);
        store.client = Client::builder().timeout(timeout).build()?;
        Ok(store)
    }

    fn tx_url(&self) -> String {
        format!("{}/db/{}/tx/commit", self.endpoint, self.database)
    }

    /// Runs all statements in one committed transaction and returns the rows of
    /// each statement in order.
    async fn execute(&self, statements: Vec<Value>) -> Result<Vec<Vec<Vec<Value>>>, StoreError> {
        let response = self
            .client
            .post(self.tx_url())
            .basic_auth(&self.username, Some(&self.password))
            .json(&json!({ "statements": statements }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::backend_response(
                "neo4j",
                response.status().to_string(),
            ));
        }

        let body: Value = response.json().await?;
        if let Some(error) = body
            .pointer("/errors")
            .and_then(Value::as_array)
            .and_then(|errors| errors.first())
        {
            return Err(StoreError::Statement {
                backend: "neo4j".to_string(),
                details: error
                    .pointer("/message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }

        Ok(extract_rows(&body))
    }

    async fn query(&self, statement: &str, parameters: Value) -> Result<Vec<Vec<Value>>, StoreError> {
        let mut results = self
            .execute(vec![json!({ "statement": statement, "parameters": parameters })])
            .await?;
        debug!(rows = results.first().map_or(0, Vec::len), "neo4j statement");
        Ok(if results.is_empty() {
            Vec::new()
        } else {
            results.swap_remove(0)
        })
    }

    async fn query_chunks(&self, statement: &str, parameters: Value) -> Result<Vec<Chunk>, StoreError> {
        self.query(statement, parameters)
            .await?
            .iter()
            .map(|row| chunk_from_row(row))
            .collect()
    }

    async fn walk(
        &self,
        key: &ChunkKey,
        limit: usize,
        forward: bool,
    ) -> Result<Vec<Chunk>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let pattern = if forward {
            format!("-[:NEXT_PAGE*1..{limit}]->")
        } else {
            format!("<-[:NEXT_PAGE*1..{limit}]-")
        };
        let statement = format!(
            "MATCH path = (:Page {{doc_id: $doc_id, page_range_str: $range}}){pattern}(p:Page)
             RETURN {columns}
             ORDER BY length(path)
             LIMIT $limit",
            columns = chunk_columns("p"),
        );
        self.query_chunks(
            &statement,
            json!({ "doc_id": key.document_id, "range": key.page_range, "limit": limit }),
        )
        .await
    }
}

fn chunk_columns(var: &str) -> String {
    format!(
        "{var}.doc_id, {var}.chunk_idx, {var}.page_num, {var}.page_range, {var}.text, {var}.word_count"
    )
}

fn column_u64(values: &[Value], index: usize, name: &str) -> Result<u64, StoreError> {
    values
        .get(index)
        .and_then(Value::as_u64)
        .ok_or_else(|| StoreError::backend_response("neo4j", format!("missing column {name}")))
}

fn chunk_from_row(values: &[Value]) -> Result<Chunk, StoreError> {
    if values.len() < CHUNK_COLUMNS {
        return Err(StoreError::backend_response(
            "neo4j",
            format!("expected {CHUNK_COLUMNS} chunk columns, got {}", values.len()),
        ));
    }

    let pages = values[3]
        .as_array()
        .map(|pages| {
            pages
                .iter()
                .filter_map(Value::as_u64)
                .map(|page| page as u32)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let page_range = PageRange::new(pages)
        .ok_or_else(|| StoreError::backend_response("neo4j", "chunk without page range"))?;

    Ok(Chunk {
        document_id: values[0].as_str().unwrap_or_default().to_string(),
        chunk_idx: column_u64(values, 1, "chunk_idx")? as usize,
        page_num: column_u64(values, 2, "page_num")? as u32,
        is_merged: page_range.is_merged(),
        page_range,
        text: values[4].as_str().unwrap_or_default().to_string(),
        word_count: values[5].as_u64().unwrap_or(0) as usize,
    })
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn edge_type(kind: EdgeKind) -> &'static str {
    match kind {
        EdgeKind::Sequential => "NEXT_PAGE",
        EdgeKind::Similarity => "RELATED_TO",
    }
}

#[async_trait]
impl GraphStore for Neo4jStore {
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        let statements = [
            "CREATE CONSTRAINT document_id IF NOT EXISTS FOR (d:Document) REQUIRE d.id IS UNIQUE",
            "CREATE CONSTRAINT page_key IF NOT EXISTS FOR (p:Page) REQUIRE (p.doc_id, p.page_range_str) IS UNIQUE",
            "CREATE INDEX page_position IF NOT EXISTS FOR (p:Page) ON (p.doc_id, p.chunk_idx)",
        ];
        for statement in statements {
            self.query(statement, json!({})).await?;
        }
        Ok(())
    }

    async fn upsert_document(&self, document: &Document) -> Result<(), StoreError> {
        self.query(
            "MERGE (d:Document {id: $id})
             SET d.source = $source, d.title = $title,
                 d.checksum = $checksum, d.indexed_at = $indexed_at",
            json!({
                "id": document.document_id,
                "source": document.source_path,
                "title": document.title,
                "checksum": document.checksum,
                "indexed_at": document.indexed_at.to_rfc3339(),
            }),
        )
        .await?;
        Ok(())
    }

    async fn upsert_chunks(&self, chunks: &[Chunk]) -> Result<(), StoreError> {
        if chunks.is_empty() {
            return Ok(());
        }

        let rows: Vec<_> = chunks
            .iter()
            .map(|chunk| {
                json!({
                    "id": chunk.key().to_string(),
                    "doc_id": chunk.document_id,
                    "page_range_str": chunk.page_range.label(),
                    "page_num": chunk.page_num,
                    "page_range": chunk.page_range.pages(),
                    "chunk_idx": chunk.chunk_idx,
                    "text": chunk.text,
                    "word_count": chunk.word_count,
                    "is_merged": chunk.is_merged,
                })
            })
            .collect();

        self.query(
            "UNWIND $rows AS row
             MATCH (d:Document {id: row.doc_id})
             MERGE (p:Page {doc_id: row.doc_id, page_range_str: row.page_range_str})
             SET p.id = row.id,
                 p.page_num = row.page_num,
                 p.page_range = row.page_range,
                 p.chunk_idx = row.chunk_idx,
                 p.text = row.text,
                 p.word_count = row.word_count,
                 p.is_merged = row.is_merged
             MERGE (d)-[:CONTAINS]->(p)",
            json!({ "rows": rows }),
        )
        .await?;
        Ok(())
    }

    async fn prune_chunks(&self, document_id: &str, keep: &[ChunkKey]) -> Result<(), StoreError> {
        let keep: Vec<&str> = keep
            .iter()
            .filter(|key| key.document_id == document_id)
            .map(|key| key.page_range.as_str())
            .collect();
        self.query(
            "MATCH (p:Page {doc_id: $doc_id})
             WHERE NOT p.page_range_str IN $keep
             DETACH DELETE p",
            json!({ "doc_id": document_id, "keep": keep }),
        )
        .await?;
        Ok(())
    }

    async fn clear_edges(&self, document_id: &str) -> Result<(), StoreError> {
        self.query(
            "MATCH (:Page {doc_id: $doc_id})-[r:NEXT_PAGE|RELATED_TO]->()
             DELETE r",
            json!({ "doc_id": document_id }),
        )
        .await?;
        Ok(())
    }

    async fn create_sequential_edges(&self, edges: &[SequentialEdge]) -> Result<(), StoreError> {
        if edges.is_empty() {
            return Ok(());
        }
        let rows: Vec<_> = edges
            .iter()
            .map(|edge| {
                json!({
                    "from_doc": edge.from.document_id, "from": edge.from.page_range,
                    "to_doc": edge.to.document_id, "to": edge.to.page_range,
                })
            })
            .collect();
        self.query(
            "UNWIND $rows AS row
             MATCH (a:Page {doc_id: row.from_doc, page_range_str: row.from})
             MATCH (b:Page {doc_id: row.to_doc, page_range_str: row.to})
             MERGE (a)-[:NEXT_PAGE]->(b)",
            json!({ "rows": rows }),
        )
        .await?;
        Ok(())
    }

    async fn create_similarity_edges(&self, edges: &[SimilarityEdge]) -> Result<(), StoreError> {
        if edges.is_empty() {
            return Ok(());
        }
        let rows: Vec<_> = edges
            .iter()
            .map(|edge| {
                json!({
                    "from_doc": edge.from.document_id, "from": edge.from.page_range,
                    "to_doc": edge.to.document_id, "to": edge.to.page_range,
                    "keywords": edge.shared_keywords,
                    "distance": edge.page_distance,
                })
            })
            .collect();
        self.query(
            "UNWIND $rows AS row
             MATCH (a:Page {doc_id: row.from_doc, page_range_str: row.from})
             MATCH (b:Page {doc_id: row.to_doc, page_range_str: row.to})
             MERGE (a)-[r:RELATED_TO]->(b)
             SET r.common_keywords = row.keywords, r.page_distance = row.distance",
            json!({ "rows": rows }),
        )
        .await?;
        Ok(())
    }

    async fn chunk_by_index(
        &self,
        document_id: &str,
        chunk_idx: usize,
    ) -> Result<Option<Chunk>, StoreError> {
        let statement = format!(
            "MATCH (p:Page {{doc_id: $doc_id, chunk_idx: $chunk_idx}})
             RETURN {}
             LIMIT 1",
            chunk_columns("p")
        );
        let chunks = self
            .query_chunks(&statement, json!({ "doc_id": document_id, "chunk_idx": chunk_idx }))
            .await?;
        Ok(chunks.into_iter().next())
    }

    async fn chunks_in_pages(
        &self,
        document_id: &str,
        start: u32,
        end: u32,
    ) -> Result<Vec<Chunk>, StoreError> {
        let statement = format!(
            "MATCH (p:Page {{doc_id: $doc_id}})
             WHERE ANY(page IN p.page_range WHERE page >= $start AND page <= $end)
             RETURN {}
             ORDER BY p.chunk_idx",
            chunk_columns("p")
        );
        self.query_chunks(
            &statement,
            json!({ "doc_id": document_id, "start": start, "end": end }),
        )
        .await
    }

    async fn successors(&self, key: &ChunkKey, limit: usize) -> Result<Vec<Chunk>, StoreError> {
        self.walk(key, limit, true).await
    }

    async fn predecessors(&self, key: &ChunkKey, limit: usize) -> Result<Vec<Chunk>, StoreError> {
        self.walk(key, limit, false).await
    }

    async fn similar_chunks(
        &self,
        key: &ChunkKey,
        limit: usize,
    ) -> Result<Vec<SimilarNeighbor>, StoreError> {
        let statement = format!(
            "MATCH (:Page {{doc_id: $doc_id, page_range_str: $range}})-[r:RELATED_TO]->(p:Page)
             RETURN {}, r.common_keywords, r.page_distance
             ORDER BY size(r.common_keywords) DESC, p.chunk_idx
             LIMIT $limit",
            chunk_columns("p")
        );
        let rows = self
            .query(
                &statement,
                json!({ "doc_id": key.document_id, "range": key.page_range, "limit": limit }),
            )
            .await?;

        rows.iter()
            .map(|row| {
                Ok(SimilarNeighbor {
                    chunk: chunk_from_row(row)?,
                    shared_keywords: string_list(row.get(CHUNK_COLUMNS)),
                    page_distance: row
                        .get(CHUNK_COLUMNS + 1)
                        .and_then(Value::as_i64)
                        .unwrap_or_default(),
                })
            })
            .collect()
    }

    async fn document_chunks(&self, document_id: &str) -> Result<Vec<Chunk>, StoreError> {
        let statement = format!(
            "MATCH (:Document {{id: $doc_id}})-[:CONTAINS]->(p:Page)
             RETURN {}
             ORDER BY p.chunk_idx",
            chunk_columns("p")
        );
        self.query_chunks(&statement, json!({ "doc_id": document_id }))
            .await
    }

    async fn count_edges(&self, document_id: &str, kind: EdgeKind) -> Result<usize, StoreError> {
        let statement = format!(
            "MATCH (:Document {{id: $doc_id}})-[:CONTAINS]->(p:Page)
             MATCH (p)-[:{}]->()
             RETURN count(*)",
            edge_type(kind)
        );
        let rows = self.query(&statement, json!({ "doc_id": document_id })).await?;
        Ok(rows
            .first()
            .and_then(|row| row.first())
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize)
    }

    async fn list_documents(&self) -> Result<Vec<Document>, StoreError> {
        let rows = self
            .query(
                "MATCH (d:Document)
                 RETURN d.id, d.title, d.source, d.checksum, d.indexed_at
                 ORDER BY d.id",
                json!({}),
            )
            .await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let document_id = row.first()?.as_str()?.to_string();
                let text = |index: usize| {
                    row.get(index)
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string()
                };
                let indexed_at = row
                    .get(4)
                    .and_then(Value::as_str)
                    .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                    .map(|parsed| parsed.with_timezone(&Utc))
                    .unwrap_or_default();
                Some(Document {
                    title: text(1),
                    source_path: text(2),
                    checksum: text(3),
                    indexed_at,
                    document_id,
                })
            })
            .collect())
    }

    async fn summary(&self) -> Result<GraphSummary, StoreError> {
        let statement = |cypher: &str| json!({ "statement": cypher, "parameters": {} });
        let results = self
            .execute(vec![
                statement("MATCH (d:Document) RETURN count(d)"),
                statement("MATCH (p:Page) RETURN count(p), min(p.page_num), max(p.page_num)"),
                statement("MATCH ()-[r:NEXT_PAGE]->() RETURN count(r)"),
                statement("MATCH ()-[r:RELATED_TO]->() RETURN count(r)"),
                statement("MATCH ()-[r:CONTAINS]->() RETURN count(r)"),
            ])
            .await?;

        let cell = |statement: usize, column: usize| {
            results
                .get(statement)
                .and_then(|rows| rows.first())
                .and_then(|row| row.get(column))
                .and_then(Value::as_u64)
        };

        Ok(GraphSummary {
            documents: cell(0, 0).unwrap_or(0) as usize,
            chunks: cell(1, 0).unwrap_or(0) as usize,
            min_page: cell(1, 1).map(|page| page as u32),
            max_page: cell(1, 2).map(|page| page as u32),
            sequential_edges: cell(2, 0).unwrap_or(0) as usize,
            similarity_edges: cell(3, 0).unwrap_or(0) as usize,
            contains_edges: cell(4, 0).unwrap_or(0) as usize,
        })
    }
}

/// Rows of each statement result, in statement order.
fn extract_rows(payload: &Value) -> Vec<Vec<Vec<Value>>> {
    payload
        .pointer("/results")
        .and_then(Value::as_array)
        .map(|results| {
            results
                .iter()
                .map(|result| {
                    result
                        .pointer("/data")
                        .and_then(Value::as_array)
                        .map(|rows| {
                            rows.iter()
                                .filter_map(|row_entry| {
                                    row_entry
                                        .pointer("/row")
                                        .or(Some(row_entry))
                                        .and_then(Value::as_array)
                                        .cloned()
                                })
                                .collect()
                        })
                        .unwrap_or_default()
                })
                .collect()
        })
        .unwrap_or_default()
}
