//! Qdrant vector index over the REST API.
//!
//! The collection is inspected once when connecting: its vector size and
//! distance must agree with the embedding model and configured metric.

use async_trait::async_trait;
use docent_core::config::IndexConfig;
use docent_core::error::{DocentError, Result};
use docent_core::traits::VectorIndex;
use docent_core::types::{EmbeddingVector, Metadata, MetadataValue, Metric, ScoredPassage};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

pub struct QdrantIndex {
    client: reqwest::Client,
    base_url: String,
    collection: String,
    /// Named vector to search; `None` uses the collection's default vector.
    vector_name: Option<String>,
    text_key: String,
    api_key: String,
    dimensions: usize,
    metric: Metric,
}

impl QdrantIndex {
    /// Connect to a collection and verify its vector parameters.
    pub async fn connect(config: &IndexConfig, dimensions: usize) -> Result<Self> {
        let base_url = config.url.trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(DocentError::Config(format!(
                "Qdrant url must be an http(s) URL, got '{base_url}'"
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DocentError::Http(format!("failed to build Qdrant client: {e}")))?;

        let index = Self {
            client,
            base_url,
            collection: config.collection.clone(),
            vector_name: (!config.index_name.trim().is_empty()).then(|| config.index_name.clone()),
            text_key: config.text_key.clone(),
            api_key: config.api_key.clone(),
            dimensions,
            metric: config.metric,
        };
        index.verify_collection().await?;
        tracing::info!(
            "🗂️ Qdrant collection '{}' ready ({} dims, {})",
            index.collection,
            index.dimensions,
            index.metric
        );
        Ok(index)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/collections/{}{}", self.base_url, self.collection, path);
        let req = self.client.request(method, url);
        if self.api_key.is_empty() {
            req
        } else {
            req.header("api-key", &self.api_key)
        }
    }

    async fn verify_collection(&self) -> Result<()> {
        let resp = self
            .request(reqwest::Method::GET, "")
            .send()
            .await
            .map_err(|e| DocentError::IndexUnavailable(format!("Qdrant unreachable: {e}")))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(DocentError::Config(format!(
                "Qdrant collection '{}' does not exist",
                self.collection
            )));
        }
        if !resp.status().is_success() {
            return Err(DocentError::IndexUnavailable(format!(
                "Qdrant collection lookup returned {}",
                resp.status()
            )));
        }
        let info: Value = resp
            .json()
            .await
            .map_err(|e| DocentError::IndexUnavailable(format!("bad collection info: {e}")))?;
        let (size, distance) = vector_params(&info, self.vector_name.as_deref())?;
        if size != self.dimensions {
            return Err(DocentError::DimensionMismatch {
                expected: size,
                actual: self.dimensions,
            });
        }
        let metric = distance_metric(&distance)?;
        if metric != self.metric {
            return Err(DocentError::Config(format!(
                "collection uses {distance} distance, configured metric is {}",
                self.metric
            )));
        }
        Ok(())
    }
}

/// Extract `(size, distance)` for the selected vector from a collection info body.
fn vector_params(info: &Value, vector_name: Option<&str>) -> Result<(usize, String)> {
    let vectors = &info["result"]["config"]["params"]["vectors"];
    let params = match vector_name {
        Some(name) => vectors.get(name).ok_or_else(|| {
            DocentError::Config(format!("collection has no named vector '{name}'"))
        })?,
        None if vectors.get("size").is_some() => vectors,
        None => {
            return Err(DocentError::Config(
                "collection uses named vectors; set index.index_name".into(),
            ));
        }
    };
    let size = params["size"]
        .as_u64()
        .ok_or_else(|| DocentError::Config("collection info lacks vector size".into()))?;
    let distance = params["distance"].as_str().unwrap_or("Cosine").to_string();
    Ok((size as usize, distance))
}

fn distance_metric(distance: &str) -> Result<Metric> {
    match distance {
        "Cosine" => Ok(Metric::Cosine),
        "Dot" => Ok(Metric::Dot),
        other => Err(DocentError::Config(format!(
            "unsupported Qdrant distance '{other}'"
        ))),
    }
}

#[derive(Serialize)]
#[serde(untagged)]
enum SearchVector<'a> {
    Plain(&'a [f32]),
    Named { name: &'a str, vector: &'a [f32] },
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    vector: SearchVector<'a>,
    limit: usize,
    with_payload: bool,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    score: f32,
    #[serde(default)]
    payload: serde_json::Map<String, Value>,
}

impl SearchHit {
    /// Convert into a passage; hits without the text field are dropped.
    fn into_passage(mut self, text_key: &str) -> Option<ScoredPassage> {
        let text = match self.payload.remove(text_key)? {
            Value::String(s) => s,
            _ => return None,
        };
        let metadata: Metadata = self
            .payload
            .iter()
            .filter_map(|(k, v)| MetadataValue::from_json(v).map(|mv| (k.clone(), mv)))
            .collect();
        Some(ScoredPassage {
            text,
            score: self.score,
            metadata,
        })
    }
}

fn parse_hits(body: SearchResponse, text_key: &str, k: usize) -> Vec<ScoredPassage> {
    let total = body.result.len();
    let mut hits: Vec<ScoredPassage> = body
        .result
        .into_iter()
        .filter_map(|hit| hit.into_passage(text_key))
        .filter(|p| p.score.is_finite())
        .collect();
    if hits.len() < total {
        tracing::warn!(
            "Dropped {} Qdrant hits without a '{text_key}' payload",
            total - hits.len()
        );
    }
    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    hits.truncate(k);
    hits
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    fn name(&self) -> &str {
        "qdrant"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn metric(&self) -> Metric {
        self.metric
    }

    async fn search(&self, vector: &EmbeddingVector, k: usize) -> Result<Vec<ScoredPassage>> {
        vector.ensure_dimensions(self.dimensions)?;
        if k == 0 {
            return Ok(vec![]);
        }
        let values = vector.as_slice();
        let request = SearchRequest {
            vector: match &self.vector_name {
                Some(name) => SearchVector::Named {
                    name,
                    vector: values,
                },
                None => SearchVector::Plain(values),
            },
            limit: k,
            with_payload: true,
        };

        let resp = self
            .request(reqwest::Method::POST, "/points/search")
            .json(&request)
            .send()
            .await
            .map_err(|e| DocentError::IndexUnavailable(format!("Qdrant search failed: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(DocentError::IndexUnavailable(format!(
                "Qdrant search returned {status}: {body}"
            )));
        }
        let body: SearchResponse = resp
            .json()
            .await
            .map_err(|e| DocentError::IndexUnavailable(format!("bad search response: {e}")))?;
        Ok(parse_hits(body, &self.text_key, k))
    }

    async fn count(&self) -> Result<usize> {
        let resp = self
            .request(reqwest::Method::POST, "/points/count")
            .json(&serde_json::json!({"exact": true}))
            .send()
            .await
            .map_err(|e| DocentError::IndexUnavailable(format!("Qdrant count failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(DocentError::IndexUnavailable(format!(
                "Qdrant count returned {}",
                resp.status()
            )));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| DocentError::IndexUnavailable(e.to_string()))?;
        Ok(body["result"]["count"].as_u64().unwrap_or(0) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_vector_params_default_vector() {
        let info = json!({"result": {"config": {"params": {"vectors": {"size": 1536, "distance": "Cosine"}}}}});
        let (size, distance) = vector_params(&info, None).unwrap();
        assert_eq!(size, 1536);
        assert_eq!(distance_metric(&distance).unwrap(), Metric::Cosine);
    }

    #[test]
    fn test_vector_params_named_vector() {
        let info = json!({"result": {"config": {"params": {"vectors": {
            "dense": {"size": 768, "distance": "Dot"}
        }}}}});
        assert_eq!(vector_params(&info, Some("dense")).unwrap().0, 768);
        assert!(vector_params(&info, Some("sparse")).is_err());
        assert!(vector_params(&info, None).is_err());
    }

    #[test]
    fn test_unsupported_distance() {
        assert!(distance_metric("Euclid").unwrap_err().is_configuration());
    }

    #[test]
    fn test_search_request_shape() {
        let values = [0.5f32, 0.25];
        let named = SearchRequest {
            vector: SearchVector::Named {
                name: "dense",
                vector: &values,
            },
            limit: 4,
            with_payload: true,
        };
        let json = serde_json::to_value(&named).unwrap();
        assert_eq!(json["vector"]["name"], "dense");
        assert_eq!(json["limit"], 4);

        let plain = SearchRequest {
            vector: SearchVector::Plain(&values),
            limit: 4,
            with_payload: true,
        };
        assert!(serde_json::to_value(&plain).unwrap()["vector"].is_array());
    }

    #[test]
    fn test_parse_hits() {
        let body: SearchResponse = serde_json::from_value(json!({"result": [
            {"id": 1, "score": 0.71, "payload": {"text": "second", "season": 2020}},
            {"id": 2, "score": 0.93, "payload": {"text": "first", "tags": ["a"]}},
            {"id": 3, "score": 0.99, "payload": {"title": "no text"}}
        ]}))
        .unwrap();
        let hits = parse_hits(body, "text", 4);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "first");
        assert!(hits[0].metadata.is_empty());
        assert_eq!(
            hits[1].metadata.get("season"),
            Some(&MetadataValue::Number(2020.0))
        );
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let config = IndexConfig {
            url: "http://127.0.0.1:9".into(),
            timeout_secs: 2,
            ..IndexConfig::default()
        };
        let err = QdrantIndex::connect(&config, 3).await.err().unwrap();
        assert!(matches!(err, DocentError::IndexUnavailable(_)));
    }
}
