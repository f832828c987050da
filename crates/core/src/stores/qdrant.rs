use crate::traits::VectorIndex;
use crate::{EmbeddingRecord, RetrievedChunk, SearchFilter, ServiceError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use uuid::Uuid;

/// [`VectorIndex`] backed by a Qdrant collection over its REST API.
pub struct QdrantIndex {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
}

impl QdrantIndex {
    pub fn new(endpoint: impl Into<String>, collection: impl Into<String>, vector_size: usize) -> Self {
        Self {
            endpoint: endpoint.into(),
            collection: collection.into(),
            client: Client::new(),
            vector_size,
        }
    }

    fn url(&self, suffix: &str) -> String {
        format!(
            "{}/collections/{}{}",
            self.endpoint.trim_end_matches('/'),
            self.collection,
            suffix
        )
    }

    async fn expect_success(response: reqwest::Response) -> Result<Value, ServiceError> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::BackendResponse {
                backend: "qdrant".to_string(),
                details: format!("{status}: {body}"),
            });
        }
        Ok(response.json().await?)
    }

    async fn count(&self, filter: Option<Value>) -> Result<usize, ServiceError> {
        let mut body = json!({ "exact": true });
        if let Some(filter) = filter {
            body["filter"] = filter;
        }

        let response = self
            .client
            .post(self.url("/points/count"))
            .json(&body)
            .send()
            .await?;
        let parsed = Self::expect_success(response).await?;

        parsed
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .map(|count| count as usize)
            .ok_or_else(|| ServiceError::BackendResponse {
                backend: "qdrant".to_string(),
                details: "count response missing result.count".to_string(),
            })
    }

    /// An existing collection must hold vectors of the embedder's size; collections with named
    /// vectors report no single size and are accepted as-is.
    fn check_vector_size(&self, info: &Value) -> Result<(), ServiceError> {
        match info
            .pointer("/result/config/params/vectors/size")
            .and_then(Value::as_u64)
        {
            Some(size) if size as usize != self.vector_size => Err(ServiceError::BackendResponse {
                backend: "qdrant".to_string(),
                details: format!(
                    "collection {} stores {size}-dimensional vectors, embedder produces {}",
                    self.collection, self.vector_size
                ),
            }),
            Some(_) => Ok(()),
            None => {
                tracing::warn!(collection = %self.collection, "collection reports no vector size");
                Ok(())
            }
        }
    }
}

/// Qdrant point ids must be integers or UUIDs; chunk ids are hex digests.
pub fn point_id(chunk_id: &str) -> Result<String, ServiceError> {
    let prefix = chunk_id.get(..32).unwrap_or(chunk_id);
    u128::from_str_radix(prefix, 16)
        .map(|value| Uuid::from_u128(value).to_string())
        .map_err(|_| ServiceError::Request(format!("chunk id is not a hex digest: {chunk_id}")))
}

fn source_filter(source: &str) -> Value {
    json!({ "must": [{ "key": "source", "match": { "value": source } }] })
}

fn search_filter(filter: &SearchFilter) -> Option<Value> {
    filter.sources.as_ref().map(|sources| {
        json!({ "must": [{ "key": "source", "match": { "any": sources } }] })
    })
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn init(&self) -> Result<(), ServiceError> {
        let existing = self.client.get(self.url("")).send().await?;
        if existing.status().is_success() {
            let info = Self::expect_success(existing).await?;
            return self.check_vector_size(&info);
        }
        if existing.status() != StatusCode::NOT_FOUND {
            return Err(ServiceError::BackendResponse {
                backend: "qdrant".to_string(),
                details: existing.status().to_string(),
            });
        }

        tracing::info!(collection = %self.collection, size = self.vector_size, "creating qdrant collection");
        let response = self
            .client
            .put(self.url(""))
            .json(&json!({
                "vectors": { "size": self.vector_size, "distance": "Cosine" }
            }))
            .send()
            .await?;
        Self::expect_success(response).await.map(|_| ())
    }

    async fn insert(&self, records: &[EmbeddingRecord]) -> Result<(), ServiceError> {
        let points = records
            .iter()
            .map(|record| {
                if record.vector.len() != self.vector_size {
                    return Err(ServiceError::Request(format!(
                        "embedding dimension {} != {}",
                        record.vector.len(),
                        self.vector_size
                    )));
                }

                Ok(json!({
                    "id": point_id(&record.chunk_id)?,
                    "vector": record.vector,
                    "payload": {
                        "chunk_id": record.chunk_id,
                        "source": record.source,
                        "text": record.text,
                    },
                }))
            })
            .collect::<Result<Vec<_>, ServiceError>>()?;

        if points.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .put(self.url("/points?wait=true"))
            .json(&json!({ "points": points }))
            .send()
            .await?;
        Self::expect_success(response).await.map(|_| ())
    }

    async fn search(
        &self,
        query_vector: &[f32],
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<RetrievedChunk>, ServiceError> {
        if query_vector.len() != self.vector_size {
            return Err(ServiceError::Request(format!(
                "query vector dim {} is not {}",
                query_vector.len(),
                self.vector_size
            )));
        }

        if filter.sources.as_ref().is_some_and(|sources| sources.is_empty()) {
            return Ok(Vec::new());
        }

        let mut body = json!({
            "vector": query_vector,
            "limit": top_k,
            "with_payload": true,
        });
        if let Some(filter) = search_filter(filter) {
            body["filter"] = filter;
        }

        let response = self
            .client
            .post(self.url("/points/search"))
            .json(&body)
            .send()
            .await?;
        let parsed = Self::expect_success(response).await?;

        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(hits
            .iter()
            .map(|hit| {
                let payload_str = |key: &str| {
                    hit.pointer(&format!("/payload/{key}"))
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string()
                };
                RetrievedChunk {
                    chunk_id: payload_str("chunk_id"),
                    source: payload_str("source"),
                    text: payload_str("text"),
                    score: hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0) as f32,
                }
            })
            .collect())
    }

    async fn delete_document(&self, source: &str) -> Result<usize, ServiceError> {
        let existing = self.count_document(source).await?;
        if existing == 0 {
            return Ok(0);
        }

        let response = self
            .client
            .post(self.url("/points/delete?wait=true"))
            .json(&json!({ "filter": source_filter(source) }))
            .send()
            .await?;
        Self::expect_success(response).await?;
        Ok(existing)
    }

    async fn count_document(&self, source: &str) -> Result<usize, ServiceError> {
        self.count(Some(source_filter(source))).await
    }

    async fn len(&self) -> Result<usize, ServiceError> {
        self.count(None).await
    }

    async fn flush(&self) -> Result<(), ServiceError> {
        // Writes are sent with wait=true, nothing is buffered client-side.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{
        Method::{GET, POST, PUT},
        MockServer,
    };

    #[test]
    fn point_ids_are_uuids_derived_from_digest() {
        let digest = "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff";
        assert_eq!(
            point_id(digest).unwrap(),
            "00112233-4455-6677-8899-aabbccddeeff"
        );
        assert!(point_id("not-hex").is_err());
    }

    #[tokio::test]
    async fn search_parses_payload_into_retrieved_chunks() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/docs/points/search")
                    .json_body_partial(r#"{ "limit": 5, "with_payload": true }"#);
                then.status(200).json_body(json!({
                    "result": [
                        {
                            "id": "00112233-4455-6677-8899-aabbccddeeff",
                            "score": 0.92,
                            "payload": {
                                "chunk_id": "abc",
                                "source": "policy.pdf",
                                "text": "Refunds are issued within 30 days."
                            }
                        }
                    ]
                }));
            })
            .await;

        let index = QdrantIndex::new(server.base_url(), "docs", 2);
        let hits = index
            .search(&[1.0, 0.0], 5, &SearchFilter::all())
            .await
            .expect("search should succeed");

        mock.assert_async().await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source, "policy.pdf");
        assert_eq!(hits[0].chunk_id, "abc");
        assert!((hits[0].score - 0.92).abs() < 1e-6);
    }

    #[tokio::test]
    async fn delete_document_skips_request_when_nothing_stored() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/docs/points/count");
                then.status(200)
                    .json_body(json!({ "result": { "count": 0 } }));
            })
            .await;
        let delete = server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/docs/points/delete");
                then.status(200).json_body(json!({ "result": {} }));
            })
            .await;

        let index = QdrantIndex::new(server.base_url(), "docs", 2);
        assert_eq!(index.delete_document("policy.pdf").await.unwrap(), 0);
        delete.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn insert_rejects_wrong_dimensions() {
        let index = QdrantIndex::new("http://127.0.0.1:1", "docs", 3);
        let error = index
            .insert(&[EmbeddingRecord {
                chunk_id: "00".repeat(32),
                source: "a.pdf".to_string(),
                text: "text".to_string(),
                vector: vec![1.0],
            }])
            .await
            .unwrap_err();
        assert!(matches!(error, ServiceError::Request(_)));
    }

    #[tokio::test]
    async fn init_creates_missing_collection() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/collections/docs");
                then.status(404)
                    .json_body(json!({ "status": { "error": "Not found" } }));
            })
            .await;
        let create = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/collections/docs")
                    .json_body(json!({ "vectors": { "size": 3, "distance": "Cosine" } }));
                then.status(200).json_body(json!({ "result": true }));
            })
            .await;

        let index = QdrantIndex::new(server.base_url(), "docs", 3);
        index.init().await.expect("init should create the collection");
        create.assert_async().await;
    }

    #[tokio::test]
    async fn init_reports_unexpected_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/collections/docs");
                then.status(500);
            })
            .await;
        let create = server
            .mock_async(|when, then| {
                when.method(PUT).path("/collections/docs");
                then.status(200).json_body(json!({ "result": true }));
            })
            .await;

        let index = QdrantIndex::new(server.base_url(), "docs", 3);
        let error = index.init().await.unwrap_err();
        assert!(matches!(error, ServiceError::BackendResponse { .. }));
        create.assert_hits_async(0).await;
    }

    fn collection_info(size: u64) -> Value {
        json!({
            "result": {
                "status": "green",
                "config": { "params": { "vectors": { "size": size, "distance": "Cosine" } } }
            }
        })
    }

    #[tokio::test]
    async fn init_accepts_existing_collection_of_matching_size() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/collections/docs");
                then.status(200).json_body(collection_info(3));
            })
            .await;

        let index = QdrantIndex::new(server.base_url(), "docs", 3);
        assert!(index.init().await.is_ok());
    }

    #[tokio::test]
    async fn init_rejects_existing_collection_of_other_size() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/collections/docs");
                then.status(200).json_body(collection_info(1536));
            })
            .await;

        let index = QdrantIndex::new(server.base_url(), "docs", 128);
        let error = index.init().await.unwrap_err();
        match error {
            ServiceError::BackendResponse { details, .. } => {
                assert!(details.contains("1536"));
                assert!(details.contains("128"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn insert_upserts_points_and_waits() {
        let server = MockServer::start_async().await;
        let upsert = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/collections/docs/points")
                    .query_param("wait", "true")
                    .json_body_partial(
                        r#"{ "points": [ { "id": "00000000-0000-0000-0000-000000000000",
                             "payload": { "source": "a.pdf", "text": "text" } } ] }"#,
                    );
                then.status(200)
                    .json_body(json!({ "result": { "status": "completed" } }));
            })
            .await;

        let index = QdrantIndex::new(server.base_url(), "docs", 2);
        index
            .insert(&[EmbeddingRecord {
                chunk_id: "00".repeat(32),
                source: "a.pdf".to_string(),
                text: "text".to_string(),
                vector: vec![0.6, 0.8],
            }])
            .await
            .expect("insert should succeed");
        upsert.assert_async().await;
    }

    #[tokio::test]
    async fn delete_document_removes_counted_points() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/docs/points/count")
                    .json_body_partial(
                        r#"{ "filter": { "must": [ { "key": "source",
                             "match": { "value": "policy.pdf" } } ] } }"#,
                    );
                then.status(200).json_body(json!({ "result": { "count": 4 } }));
            })
            .await;
        let delete = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/docs/points/delete")
                    .query_param("wait", "true");
                then.status(200)
                    .json_body(json!({ "result": { "status": "completed" } }));
            })
            .await;

        let index = QdrantIndex::new(server.base_url(), "docs", 2);
        assert_eq!(index.delete_document("policy.pdf").await.unwrap(), 4);
        delete.assert_async().await;
    }

    #[tokio::test]
    async fn search_with_no_allowed_sources_sends_nothing() {
        let server = MockServer::start_async().await;
        let search = server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/docs/points/search");
                then.status(200).json_body(json!({ "result": [] }));
            })
            .await;

        let index = QdrantIndex::new(server.base_url(), "docs", 2);
        let filter = SearchFilter::sources(Vec::<String>::new());
        assert!(index.search(&[1.0, 0.0], 5, &filter).await.unwrap().is_empty());
        search.assert_hits_async(0).await;
    }
}
