//! Qdrant REST backend for [`VectorStore`].

use std::time::Duration;

use async_trait::async_trait;
use ragline_core::{
    ChunkPayload, Distance, FusionMethod, IndexedPoint, RagError, RagResult, SearchResult,
    StoreConfig, StoredPoint,
};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::store::{CollectionInfo, Filter, PayloadIndex, Prefetch, VectorStore};

/// Vector store client for a Qdrant server's HTTP API.
///
/// One pooled HTTP client is shared by all calls; each call carries the
/// configured timeout.
pub struct QdrantStore {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct Envelope<T> {
    result: T,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    status: ErrorStatus,
}

#[derive(Deserialize)]
struct ErrorStatus {
    error: String,
}

#[derive(Deserialize)]
struct RawPoint {
    id: Value,
    #[serde(default)]
    payload: Option<Value>,
    #[serde(default)]
    vector: Option<Vec<f32>>,
    #[serde(default)]
    score: Option<f32>,
}

#[derive(Deserialize)]
struct PointList {
    points: Vec<RawPoint>,
}

#[derive(Deserialize)]
struct RawCollection {
    status: String,
    #[serde(default)]
    points_count: Option<u64>,
    #[serde(default)]
    vectors_count: Option<u64>,
    config: RawCollectionConfig,
}

#[derive(Deserialize)]
struct RawCollectionConfig {
    params: RawParams,
}

#[derive(Deserialize)]
struct RawParams {
    vectors: RawVectorParams,
}

#[derive(Deserialize)]
struct RawVectorParams {
    size: usize,
    distance: Distance,
}

impl RawPoint {
    /// Splits into id and typed payload; `None` for ids or payloads this
    /// crate did not write.
    fn decode(self) -> Option<(u64, ChunkPayload, Option<Vec<f32>>, f32)> {
        let Some(id) = self.id.as_u64() else {
            warn!(id = %self.id, "Skipping point with non-integer id");
            return None;
        };
        let payload = self.payload.unwrap_or(Value::Null);
        match serde_json::from_value::<ChunkPayload>(payload) {
            Ok(payload) => Some((id, payload, self.vector, self.score.unwrap_or_default())),
            Err(e) => {
                warn!(id, error = %e, "Skipping point with unexpected payload");
                None
            }
        }
    }
}

impl QdrantStore {
    /// Creates a client for `base_url`, sending `api_key` as the `api-key`
    /// header when given.
    pub fn new(base_url: &str, api_key: Option<&str>, timeout: Duration) -> RagResult<Self> {
        let mut headers = HeaderMap::new();
        if let Some(key) = api_key.map(str::trim).filter(|k| !k.is_empty()) {
            let value = HeaderValue::from_str(key)
                .map_err(|_| RagError::Config("invalid Qdrant API key".into()))?;
            headers.insert("api-key", value);
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| RagError::Store(format!("failed to build Qdrant HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Creates a client from the `[store]` configuration section.
    pub fn from_config(config: &StoreConfig) -> RagResult<Self> {
        config.validate()?;
        Self::new(
            &config.url,
            config.api_key.as_deref(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> RagResult<reqwest::Response> {
        let resp = request
            .send()
            .await
            .map_err(|e| RagError::Http(e.to_string()))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorEnvelope>(&body)
            .map(|e| e.status.error)
            .unwrap_or(body);
        Err(RagError::Store(format!("Qdrant returned {status}: {message}")))
    }

    async fn call<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> RagResult<T> {
        let resp = self.send(request).await?;
        let envelope: Envelope<T> = resp
            .json()
            .await
            .map_err(|e| RagError::Store(format!("unexpected Qdrant response: {e}")))?;
        Ok(envelope.result)
    }

    async fn query_points(&self, name: &str, body: Value) -> RagResult<Vec<SearchResult>> {
        let request = self
            .http
            .post(self.url(&format!("/collections/{name}/points/query")))
            .json(&body);
        let resp = request
            .send()
            .await
            .map_err(|e| RagError::Http(e.to_string()))?;
        if resp.status() == StatusCode::NOT_FOUND {
            let body = resp.text().await.unwrap_or_default();
            // Servers without the universal query API answer 404 without a
            // Qdrant error envelope.
            if serde_json::from_str::<ErrorEnvelope>(&body).is_err() {
                return Err(RagError::Unsupported(
                    "points query API is not available on this server".into(),
                ));
            }
            return Err(RagError::Store(format!("Qdrant returned 404: {body}")));
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(RagError::Store(format!("Qdrant returned {status}: {body}")));
        }
        let envelope: Envelope<PointList> = resp
            .json()
            .await
            .map_err(|e| RagError::Store(format!("unexpected Qdrant response: {e}")))?;
        Ok(envelope
            .result
            .points
            .into_iter()
            .filter_map(RawPoint::decode)
            .map(|(id, payload, _, score)| SearchResult { id, score, payload })
            .collect())
    }
}

fn index_schema(index: PayloadIndex) -> Value {
    match index {
        PayloadIndex::Keyword => json!("keyword"),
        PayloadIndex::Text => json!({
            "type": "text",
            "tokenizer": "word",
            "lowercase": true,
            "phrase_matching": true,
        }),
    }
}

fn with_threshold(mut body: Value, score_threshold: Option<f32>) -> Value {
    if let Some(threshold) = score_threshold {
        body["score_threshold"] = json!(threshold);
    }
    body
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn create_collection(
        &self,
        name: &str,
        vector_size: usize,
        distance: Distance,
    ) -> RagResult<()> {
        let body = json!({ "vectors": { "size": vector_size, "distance": distance } });
        self.call::<Value>(self.http.put(self.url(&format!("/collections/{name}"))).json(&body))
            .await?;
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> RagResult<()> {
        self.call::<Value>(self.http.delete(self.url(&format!("/collections/{name}"))))
            .await?;
        Ok(())
    }

    async fn create_payload_index(
        &self,
        name: &str,
        field: &str,
        index: PayloadIndex,
    ) -> RagResult<()> {
        let body = json!({ "field_name": field, "field_schema": index_schema(index) });
        self.call::<Value>(
            self.http
                .put(self.url(&format!("/collections/{name}/index?wait=true")))
                .json(&body),
        )
        .await?;
        Ok(())
    }

    async fn collection_info(&self, name: &str) -> RagResult<CollectionInfo> {
        let raw: RawCollection = self
            .call(self.http.get(self.url(&format!("/collections/{name}"))))
            .await?;
        let points_count = raw.points_count.unwrap_or_default();
        Ok(CollectionInfo {
            vector_size: raw.config.params.vectors.size,
            distance: raw.config.params.vectors.distance,
            points_count,
            vectors_count: raw.vectors_count,
            status: raw.status,
        })
    }

    async fn upsert(&self, name: &str, points: Vec<IndexedPoint>) -> RagResult<()> {
        let body = json!({ "points": points });
        self.call::<Value>(
            self.http
                .put(self.url(&format!("/collections/{name}/points?wait=true")))
                .json(&body),
        )
        .await?;
        Ok(())
    }

    async fn scroll(
        &self,
        name: &str,
        filter: Option<&Filter>,
        limit: usize,
    ) -> RagResult<Vec<StoredPoint>> {
        let mut body = json!({ "limit": limit, "with_payload": true, "with_vector": false });
        if let Some(filter) = filter {
            body["filter"] = json!(filter);
        }
        let list: PointList = self
            .call(
                self.http
                    .post(self.url(&format!("/collections/{name}/points/scroll")))
                    .json(&body),
            )
            .await?;
        Ok(list
            .points
            .into_iter()
            .filter_map(RawPoint::decode)
            .map(|(id, payload, _, _)| StoredPoint {
                id,
                payload,
                vector: None,
            })
            .collect())
    }

    async fn retrieve(
        &self,
        name: &str,
        ids: &[u64],
        with_vectors: bool,
    ) -> RagResult<Vec<StoredPoint>> {
        let body = json!({ "ids": ids, "with_payload": true, "with_vector": with_vectors });
        let points: Vec<RawPoint> = self
            .call(
                self.http
                    .post(self.url(&format!("/collections/{name}/points")))
                    .json(&body),
            )
            .await?;
        Ok(points
            .into_iter()
            .filter_map(RawPoint::decode)
            .map(|(id, payload, vector, _)| StoredPoint {
                id,
                payload,
                vector,
            })
            .collect())
    }

    async fn query(
        &self,
        name: &str,
        vector: &[f32],
        filter: Option<&Filter>,
        limit: usize,
        score_threshold: Option<f32>,
    ) -> RagResult<Vec<SearchResult>> {
        let mut body = json!({ "query": vector, "limit": limit, "with_payload": true });
        if let Some(filter) = filter {
            body["filter"] = json!(filter);
        }
        self.query_points(name, with_threshold(body, score_threshold))
            .await
    }

    async fn query_fused(
        &self,
        name: &str,
        prefetch: &[Prefetch],
        fusion: FusionMethod,
        limit: usize,
        score_threshold: Option<f32>,
    ) -> RagResult<Vec<SearchResult>> {
        let branches: Vec<Value> = prefetch
            .iter()
            .map(|p| {
                let mut branch = json!({ "query": p.vector, "limit": p.limit });
                if let Some(filter) = &p.filter {
                    branch["filter"] = json!(filter);
                }
                branch
            })
            .collect();
        let body = json!({
            "prefetch": branches,
            "query": { "fusion": fusion.as_str() },
            "limit": limit,
            "with_payload": true,
        });
        self.query_points(name, with_threshold(body, score_threshold))
            .await
    }
}
