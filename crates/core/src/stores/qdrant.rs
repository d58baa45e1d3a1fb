use crate::models::{SearchHit, Segment, SegmentId};
use crate::traits::SegmentIndex;
use crate::SearchError;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};
use url::Url;

const UPSERT_BATCH: usize = 256;

/// Segments persisted as points of a Qdrant collection with cosine distance.
pub struct QdrantIndex {
    endpoint: Url,
    collection: String,
    client: Client,
    vector_size: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SegmentPayload {
    text: String,
    source_path: String,
    source_filename: String,
    page: String,
    document_date: NaiveDate,
    previous_id: Option<SegmentId>,
    next_id: Option<SegmentId>,
}

impl QdrantIndex {
    pub fn new(endpoint: &str, collection: impl Into<String>) -> Result<Self, SearchError> {
        let mut endpoint = Url::parse(endpoint)?;
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }
        Ok(Self {
            endpoint,
            collection: collection.into(),
            client: Client::new(),
            vector_size: None,
        })
    }

    fn collection_url(&self, suffix: &str) -> Result<Url, SearchError> {
        Ok(self
            .endpoint
            .join(&format!("collections/{}{}", self.collection, suffix))?)
    }

    pub async fn ensure_collection(&mut self, vector_size: usize) -> Result<(), SearchError> {
        let url = self.collection_url("")?;
        let response = self.client.get(url.clone()).send().await?;

        match response.status() {
            StatusCode::OK => {
                let parsed: Value = response.json().await?;
                let existing = parsed
                    .pointer("/result/config/params/vectors/size")
                    .and_then(Value::as_u64)
                    .map(|size| size as usize);
                if let Some(existing) = existing.filter(|size| *size != vector_size) {
                    return Err(SearchError::DimensionMismatch {
                        expected: existing,
                        actual: vector_size,
                    });
                }
            }
            StatusCode::NOT_FOUND => {
                info!(collection = %self.collection, vector_size, "creating qdrant collection");
                let response = self
                    .client
                    .put(url)
                    .json(&json!({
                        "vectors": { "size": vector_size, "distance": "Cosine" }
                    }))
                    .send()
                    .await?;
                check_status(response).await?;
            }
            other => {
                return Err(SearchError::BackendResponse {
                    backend: "qdrant".to_string(),
                    details: other.to_string(),
                });
            }
        }

        self.vector_size = Some(vector_size);
        Ok(())
    }

    fn check_query_vector(&self, query_vector: &[f32]) -> Result<(), SearchError> {
        match self.vector_size {
            Some(expected) if expected != query_vector.len() => Err(SearchError::DimensionMismatch {
                expected,
                actual: query_vector.len(),
            }),
            _ => Ok(()),
        }
    }
}

async fn check_status(response: Response) -> Result<Response, SearchError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(SearchError::BackendResponse {
        backend: "qdrant".to_string(),
        details: format!("{status}: {body}"),
    })
}

fn point_from_segment(segment: &Segment) -> Result<Value, SearchError> {
    let payload = SegmentPayload {
        text: segment.text.clone(),
        source_path: segment.source_path.clone(),
        source_filename: segment.source_filename.clone(),
        page: segment.page.clone(),
        document_date: segment.document_date,
        previous_id: segment.previous_id,
        next_id: segment.next_id,
    };
    Ok(json!({
        "id": segment.id,
        "vector": segment.embedding,
        "payload": serde_json::to_value(payload)?,
    }))
}

fn segment_from_point(point: &Value) -> Result<Segment, SearchError> {
    let id: SegmentId = point
        .get("id")
        .cloned()
        .map(serde_json::from_value)
        .transpose()?
        .ok_or_else(|| SearchError::BackendResponse {
            backend: "qdrant".to_string(),
            details: "point without id".to_string(),
        })?;
    let payload: SegmentPayload = point
        .get("payload")
        .cloned()
        .map(serde_json::from_value)
        .transpose()?
        .ok_or_else(|| SearchError::BackendResponse {
            backend: "qdrant".to_string(),
            details: format!("point {id} without payload"),
        })?;
    let embedding = point
        .get("vector")
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_f64)
                .map(|value| value as f32)
                .collect()
        })
        .unwrap_or_default();

    Ok(Segment {
        id,
        text: payload.text,
        source_path: payload.source_path,
        source_filename: payload.source_filename,
        page: payload.page,
        document_date: payload.document_date,
        previous_id: payload.previous_id,
        next_id: payload.next_id,
        embedding,
    })
}

#[async_trait]
impl SegmentIndex for QdrantIndex {
    async fn index(&mut self, segments: &[Segment]) -> Result<(), SearchError> {
        let Some(first) = segments.first() else {
            return Ok(());
        };
        self.ensure_collection(first.embedding.len()).await?;

        let url = self.collection_url("/points?wait=true")?;
        for batch in segments.chunks(UPSERT_BATCH) {
            let points = batch
                .iter()
                .map(|segment| {
                    if Some(segment.embedding.len()) != self.vector_size {
                        return Err(SearchError::Request(format!(
                            "segment {} has {} dimensions",
                            segment.id,
                            segment.embedding.len()
                        )));
                    }
                    point_from_segment(segment)
                })
                .collect::<Result<Vec<_>, SearchError>>()?;

            let response = self
                .client
                .put(url.clone())
                .json(&json!({ "points": points }))
                .send()
                .await?;
            check_status(response).await?;
            debug!(collection = %self.collection, points = batch.len(), "upserted batch");
        }

        Ok(())
    }

    async fn nearest_neighbors(
        &self,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<SearchHit>, SearchError> {
        self.check_query_vector(query_vector)?;

        let response = self
            .client
            .post(self.collection_url("/points/search")?)
            .json(&json!({
                "vector": query_vector,
                "limit": k,
                "with_payload": true,
                "with_vector": true,
            }))
            .send()
            .await?;
        let parsed: Value = check_status(response).await?.json().await?;

        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        hits.iter()
            .map(|hit| {
                let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0) as f32;
                Ok(SearchHit {
                    segment: segment_from_point(hit)?,
                    score,
                })
            })
            .collect()
    }

    async fn get_by_id(&self, id: &SegmentId) -> Result<Segment, SearchError> {
        let response = self
            .client
            .get(self.collection_url(&format!("/points/{id}"))?)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        segment_from_lookup(id, status, &body)
    }
}

/// Decodes a point lookup; a 404 or an empty `result` means the id is unknown.
fn segment_from_lookup(id: &SegmentId, status: StatusCode, body: &str) -> Result<Segment, SearchError> {
    if status == StatusCode::NOT_FOUND {
        return Err(SearchError::NotFound(*id));
    }
    if !status.is_success() {
        return Err(SearchError::BackendResponse {
            backend: "qdrant".to_string(),
            details: format!("{status}: {body}"),
        });
    }

    let parsed: Value = serde_json::from_str(body)?;
    match parsed.get("result") {
        Some(point) if !point.is_null() => segment_from_point(point),
        _ => Err(SearchError::NotFound(*id)),
    }
}
