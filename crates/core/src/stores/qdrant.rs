use crate::models::{ChunkPayload, CollectionStats, EmbeddingRecord, ScoredPoint};
use crate::traits::VectorIndex;
use crate::StoreError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

const DOCUMENT_FIELD: &str = "document_id";
const POINT_ID_FIELD: &str = "point_id";

pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
}

impl QdrantStore {
    pub fn new(endpoint: impl Into<String>, collection: impl Into<String>, vector_size: usize) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            client: Client::new(),
            vector_size,
        }
    }

    /// Same as [`QdrantStore::new`] with every request bounded by `timeout`.
    pub fn with_timeout(
        endpoint: impl Into<String>,
        collection: impl Into<String>,
        vector_size: usize,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let endpoint = endpoint.into();
        url::Url::parse(&endpoint)?;
        let mut store = Self::new(endpoint, collection, vector_size);
        store.client = Client::builder().timeout(timeout).build()?;
        Ok(store)
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.endpoint, self.collection)
    }

    /// Keyword index for document filters and an integer index that lets
    /// scroll order points by id.
    async fn ensure_payload_indexes(&self) -> Result<(), StoreError> {
        for (field, schema) in [(DOCUMENT_FIELD, "keyword"), (POINT_ID_FIELD, "integer")] {
            let response = self
                .client
                .put(format!("{}/index?wait=true", self.collection_url()))
                .json(&json!({ "field_name": field, "field_schema": schema }))
                .send()
                .await?;
            Self::ensure_success(response).await?;
        }
        Ok(())
    }

    async fn ensure_success(response: reqwest::Response) -> Result<Value, StoreError> {
        if !response.status().is_success() {
            return Err(StoreError::backend_response(
                "qdrant",
                response.status().to_string(),
            ));
        }
        Ok(response.json().await?)
    }
}

fn document_filter(document_id: &str) -> Value {
    json!({
        "must": [
            { "key": DOCUMENT_FIELD, "match": { "value": document_id } }
        ]
    })
}

fn parse_hits(parsed: &Value) -> Result<Vec<ScoredPoint>, StoreError> {
    let hits = parsed
        .pointer("/result")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut result = Vec::with_capacity(hits.len());
    for hit in hits {
        let point_id = hit.pointer("/id").and_then(Value::as_u64).ok_or_else(|| {
            StoreError::backend_response("qdrant", "search hit without numeric id")
        })?;
        let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0) as f32;
        let payload: ChunkPayload =
            serde_json::from_value(hit.pointer("/payload").cloned().unwrap_or(Value::Null))?;

        result.push(ScoredPoint {
            point_id,
            score,
            payload,
        });
    }

    result.sort_by(|left, right| right.score.total_cmp(&left.score));
    Ok(result)
}

fn parse_max_id(parsed: &Value) -> Option<u64> {
    parsed
        .pointer("/result/points/0/id")
        .and_then(Value::as_u64)
}

fn parse_stats(collection: &str, parsed: &Value) -> CollectionStats {
    let vectors = parsed.pointer("/result/config/params/vectors");
    CollectionStats {
        collection: collection.to_string(),
        points_count: parsed
            .pointer("/result/points_count")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        vector_size: vectors
            .and_then(|value| value.pointer("/size"))
            .and_then(Value::as_u64)
            .map(|size| size as usize),
        distance: vectors
            .and_then(|value| value.pointer("/distance"))
            .and_then(Value::as_str)
            .map(str::to_string),
        status: parsed
            .pointer("/result/status")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

#[async_trait]
impl VectorIndex for QdrantStore {
    async fn ensure_collection(&self, vector_size: usize) -> Result<(), StoreError> {
        if self.vector_size != vector_size {
            return Err(StoreError::Dimension {
                expected: self.vector_size,
                actual: vector_size,
            });
        }

        let response = self.client.get(self.collection_url()).send().await?;
        if response.status() == StatusCode::OK {
            let stats = parse_stats(&self.collection, &response.json().await?);
            if let Some(existing) = stats.vector_size.filter(|size| *size != vector_size) {
                return Err(StoreError::Dimension {
                    expected: existing,
                    actual: vector_size,
                });
            }
            return self.ensure_payload_indexes().await;
        }

        if response.status() != StatusCode::NOT_FOUND {
            return Err(StoreError::backend_response(
                "qdrant",
                response.status().to_string(),
            ));
        }

        let response = self
            .client
            .put(self.collection_url())
            .json(&json!({
                "vectors": { "size": vector_size, "distance": "Cosine" }
            }))
            .send()
            .await?;
        Self::ensure_success(response).await?;
        self.ensure_payload_indexes().await?;

        info!(collection = %self.collection, vector_size, "created qdrant collection");
        Ok(())
    }

    async fn delete_document(&self, document_id: &str) -> Result<(), StoreError> {
        let response = self
            .client
            .post(format!("{}/points/delete?wait=true", self.collection_url()))
            .json(&json!({ "filter": document_filter(document_id) }))
            .send()
            .await?;
        Self::ensure_success(response).await?;
        Ok(())
    }

    async fn upsert_records(&self, records: &[EmbeddingRecord]) -> Result<(), StoreError> {
        let points = records
            .iter()
            .map(|record| {
                if record.vector.len() != self.vector_size {
                    return Err(StoreError::Dimension {
                        expected: self.vector_size,
                        actual: record.vector.len(),
                    });
                }

                let mut payload = serde_json::to_value(&record.payload)?;
                payload[POINT_ID_FIELD] = json!(record.point_id);
                Ok(json!({
                    "id": record.point_id,
                    "vector": record.vector,
                    "payload": payload,
                }))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        if points.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url()))
            .json(&json!({ "points": points }))
            .send()
            .await?;
        Self::ensure_success(response).await?;

        debug!(collection = %self.collection, points = records.len(), "upserted batch");
        Ok(())
    }

    async fn max_point_id(&self) -> Result<Option<u64>, StoreError> {
        let response = self
            .client
            .post(format!("{}/points/scroll", self.collection_url()))
            .json(&json!({
                "limit": 1,
                "with_payload": false,
                "with_vector": false,
                "order_by": { "key": POINT_ID_FIELD, "direction": "desc" },
            }))
            .send()
            .await?;
        let parsed = Self::ensure_success(response).await?;
        Ok(parse_max_id(&parsed))
    }

    async fn search(
        &self,
        query_vector: &[f32],
        limit: usize,
        document_filter_id: Option<&str>,
    ) -> Result<Vec<ScoredPoint>, StoreError> {
        if query_vector.len() != self.vector_size {
            return Err(StoreError::Dimension {
                expected: self.vector_size,
                actual: query_vector.len(),
            });
        }

        let mut body = json!({
            "vector": query_vector,
            "limit": limit,
            "with_payload": true,
        });
        if let Some(document_id) = document_filter_id {
            body["filter"] = document_filter(document_id);
        }

        let response = self
            .client
            .post(format!("{}/points/search", self.collection_url()))
            .json(&body)
            .send()
            .await?;
        let parsed = Self::ensure_success(response).await?;

        let mut hits = parse_hits(&parsed)?;
        hits.truncate(limit);
        Ok(hits)
    }

    async fn collection_stats(&self) -> Result<CollectionStats, StoreError> {
        let response = self.client.get(self.collection_url()).send().await?;
        let parsed = Self::ensure_success(response).await?;
        Ok(parse_stats(&self.collection, &parsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_hits_are_parsed_into_payloads() {
        let body = json!({
            "result": [
                {
                    "id": 4, "score": 0.42,
                    "payload": {
                        "document_id": "core_spec", "chunk_idx": 1, "page_num": 3,
                        "page_range": [3], "is_merged": false, "text": "Page 3\nbody"
                    }
                },
                {
                    "id": 7, "score": 0.91,
                    "payload": {
                        "document_id": "core_spec", "chunk_idx": 0, "page_num": 1,
                        "page_range": [1, 2], "is_merged": true, "text": "Page 1"
                    }
                }
            ]
        });

        let hits = parse_hits(&body).unwrap();
        assert_eq!(hits[0].point_id, 7);
        assert_eq!(hits[0].payload.page_range.label(), "1-2");
        assert_eq!(hits[1].payload.chunk_idx, 1);
    }

    #[test]
    fn hit_with_broken_payload_is_an_error() {
        let body = json!({ "result": [ { "id": 1, "score": 0.1, "payload": { "text": "x" } } ] });
        assert!(parse_hits(&body).is_err());
    }

    #[test]
    fn collection_stats_read_nested_config() {
        let body = json!({
            "result": {
                "status": "green",
                "points_count": 12,
                "config": { "params": { "vectors": { "size": 384, "distance": "Cosine" } } }
            }
        });
        let stats = parse_stats("document_chunks", &body);
        assert_eq!(stats.points_count, 12);
        assert_eq!(stats.vector_size, Some(384));
        assert_eq!(stats.distance.as_deref(), Some("Cosine"));
    }

    #[test]
    fn scroll_result_yields_highest_id() {
        let body = json!({ "result": { "points": [ { "id": 41, "payload": null } ], "next_page_offset": 40 } });
        assert_eq!(parse_max_id(&body), Some(41));
        assert_eq!(parse_max_id(&json!({ "result": { "points": [] } })), None);
    }

    #[test]
    fn filter_targets_document_field() {
        let filter = document_filter("core_spec");
        assert_eq!(filter["must"][0]["key"], "document_id");
        assert_eq!(filter["must"][0]["match"]["value"], "core_spec");
    }

    #[tokio::test]
    async fn mismatched_query_vector_is_rejected_before_request() {
        let store = QdrantStore::new("http://127.0.0.1:1", "c", 4);
        let error = store.search(&[0.0; 3], 5, None).await.unwrap_err();
        assert!(matches!(error, StoreError::Dimension { expected: 4, actual: 3 }));
    }
}
