//! # Search Index Client
//!
//! Index lifecycle, embedding-filling uploads, hybrid retrieval and
//! LLM-expanded wide retrieval against the search service REST surface.

use std::collections::HashSet;

use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::constants::{
    SEARCH_API_VERSION, SEMANTIC_CONFIG_NAME, VECTOR_KNN, WIDE_SEARCH_CONCURRENCY,
};
use crate::errors::SearchError;
use crate::gateway::LlmGateway;
use crate::prompts::search::SEARCH_EXPANSION_PROMPT;
use crate::registry::ModelDescriptor;

use super::schema::{build_index_schema, search_unit_fields};
use super::{search_expansion_schema, QueryType, SearchExpansion, SearchParams, SearchUnit};

/// One retrieval result with the service's native relevance score.
#[derive(Clone, Debug, Deserialize)]
pub struct SearchHit {
    #[serde(rename = "@search.score", default)]
    pub score: f64,
    #[serde(flatten)]
    pub unit: SearchUnit,
}

/// Per-item outcome of a batched upload.
#[derive(Clone, Debug, Default)]
pub struct IndexBatchResult {
    pub succeeded: usize,
    /// `(key, error message)` for every failed item.
    pub failed: Vec<(String, String)>,
}

impl IndexBatchResult {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed.len()
    }

    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty()
    }
}

#[derive(Deserialize)]
struct IndexingResponse {
    value: Vec<IndexingResult>,
}

#[derive(Deserialize)]
struct IndexingResult {
    key: Option<String>,
    status: Option<bool>,
    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
}

#[derive(Deserialize)]
struct SearchResponse {
    value: Vec<SearchHit>,
}

/// Client for one search index.
#[derive(Clone, Debug)]
pub struct SearchIndexClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    index_name: String,
    embedding: ModelDescriptor,
}

impl SearchIndexClient {
    /// `embedding` must already be resolved (its client bound) — it powers
    /// both upload-time embedding and the index's server-side vectorizer.
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        index_name: impl Into<String>,
        embedding: ModelDescriptor,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            index_name: index_name.into().to_lowercase(),
            embedding,
        }
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    fn index_url(&self) -> String {
        format!(
            "{}/indexes/{}?api-version={SEARCH_API_VERSION}",
            self.endpoint, self.index_name
        )
    }

    fn docs_url(&self, operation: &str) -> String {
        format!(
            "{}/indexes/{}/docs/{operation}?api-version={SEARCH_API_VERSION}",
            self.endpoint, self.index_name
        )
    }

    async fn fail_for_status(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, SearchError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(SearchError::Api {
            status: status.as_u16(),
            message,
        })
    }

    /// Builds the schema from the search-unit field table and commits it.
    /// Re-running with an unchanged schema is a no-op at the service; a
    /// vector-dimension conflict with an existing index fails before the
    /// commit is attempted.
    pub async fn create_or_update_index(&self) -> Result<(), SearchError> {
        let schema = build_index_schema(
            &self.index_name,
            &search_unit_fields(),
            None,
            &self.embedding,
        )?;

        let existing = self
            .http
            .get(self.index_url())
            .header("api-key", &self.api_key)
            .send()
            .await?;
        if existing.status().is_success() {
            let body: Value = existing
                .json()
                .await
                .map_err(|e| SearchError::Deserialization(e.to_string()))?;
            if let Some(existing_dims) = vector_dimensions(&body) {
                let configured = self.embedding.dimensions.unwrap_or(existing_dims);
                if existing_dims != configured {
                    return Err(SearchError::DimensionMismatch {
                        existing: existing_dims,
                        configured,
                    });
                }
            }
        }

        let response = self
            .http
            .put(self.index_url())
            .header("api-key", &self.api_key)
            .json(&schema)
            .send()
            .await?;
        Self::fail_for_status(response).await?;
        info!(index = %self.index_name, "index created or updated");
        Ok(())
    }

    /// Fills missing embeddings and ids, then uploads the batch. Partial
    /// failures are reported per item; the call succeeds as long as the
    /// service accepted the batch.
    pub async fn upload_units(
        &self,
        mut units: Vec<SearchUnit>,
    ) -> Result<IndexBatchResult, SearchError> {
        if units.is_empty() {
            return Ok(IndexBatchResult::default());
        }

        let gateway = self.embedding.client()?;
        for unit in &mut units {
            if unit.text_vector.is_none() {
                unit.text_vector = Some(gateway.embed(&unit.text).await?);
            }
            if unit.index_id.is_none() {
                unit.index_id = Some(uuid::Uuid::new_v4().to_string());
            }
        }

        let actions: Vec<Value> = units
            .iter()
            .map(|unit| {
                let mut doc = serde_json::to_value(unit).unwrap_or_else(|_| json!({}));
                doc["@search.action"] = json!("mergeOrUpload");
                doc
            })
            .collect();

        let response = self
            .http
            .post(self.docs_url("search.index"))
            .header("api-key", &self.api_key)
            .json(&json!({ "value": actions }))
            .send()
            .await?;

        // 207 carries per-item statuses; other failures are terminal.
        let status = response.status();
        if !status.is_success() && status.as_u16() != 207 {
            let message = response.text().await.unwrap_or_default();
            return Err(SearchError::Api {
                status: status.as_u16(),
                message,
            });
        }
        let body: IndexingResponse = response
            .json()
            .await
            .map_err(|e| SearchError::Deserialization(e.to_string()))?;

        let mut result = IndexBatchResult::default();
        for item in body.value {
            if item.status.unwrap_or(false) {
                result.succeeded += 1;
            } else {
                result.failed.push((
                    item.key.unwrap_or_default(),
                    item.error_message.unwrap_or_default(),
                ));
            }
        }
        if result.is_partial() {
            warn!(
                failed = result.failed.len(),
                total = result.total(),
                "batch upload partially failed"
            );
        } else {
            info!(count = result.succeeded, "uploaded search units");
        }
        Ok(result)
    }

    /// One retrieval combining the keyword query with a server-side
    /// vectorized nearest-neighbor query, optionally re-ranked semantically.
    pub async fn hybrid_search(
        &self,
        query: &str,
        params: &SearchParams,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let mut body = json!({
            "search": query,
            "top": params.top,
            "vectorQueries": [{
                "kind": "text",
                "text": query,
                "fields": params.vector_fields,
                "k": VECTOR_KNN,
                "exhaustive": params.exhaustive,
            }],
        });
        if let Some(unit_type) = params.unit_type {
            body["filter"] = json!(format!("unit_type eq '{unit_type}'"));
        }
        match params.query_type {
            QueryType::Semantic => {
                body["queryType"] = json!("semantic");
                body["semanticConfiguration"] = json!(SEMANTIC_CONFIG_NAME);
            }
            QueryType::Keyword => {
                body["queryType"] = json!("simple");
            }
        }

        debug!(query, query_type = ?params.query_type, "issuing hybrid search");
        let response = self
            .http
            .post(self.docs_url("search.post.search"))
            .header("api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;
        let response = Self::fail_for_status(response).await?;
        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| SearchError::Deserialization(e.to_string()))?;
        Ok(body.value)
    }

    /// Expands the query with the text model, runs a keyword and a semantic
    /// pass for every query in the expansion set (bounded concurrency), and
    /// merges the results deduplicated by `index_id` in first-seen order.
    pub async fn wide_search(
        &self,
        query: &str,
        params: &SearchParams,
        text_gateway: &dyn LlmGateway,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let prompt = SEARCH_EXPANSION_PROMPT.replace("{query}", query);
        let value = text_gateway
            .chat_structured(&prompt, &[], &search_expansion_schema())
            .await?;
        let expansion: SearchExpansion = serde_json::from_value(value)
            .map_err(|e| SearchError::Deserialization(e.to_string()))?;

        let k = params.top_wide_search;
        let mut queries = vec![query.to_string()];
        queries.extend(expansion.expanded_terms.iter().take(k).cloned());
        queries.extend(expansion.related_areas.iter().take(k).cloned());
        info!(total_queries = queries.len(), "running wide search");

        let mut passes = Vec::with_capacity(queries.len() * 2);
        for q in &queries {
            for query_type in [QueryType::Keyword, QueryType::Semantic] {
                let mut pass_params = params.clone();
                pass_params.query_type = query_type;
                passes.push((q.clone(), pass_params));
            }
        }

        let results: Vec<Result<Vec<SearchHit>, SearchError>> = futures::stream::iter(
            passes
                .iter()
                .map(|(q, pass_params)| self.hybrid_search(q, pass_params)),
        )
        .buffered(WIDE_SEARCH_CONCURRENCY)
        .collect()
        .await;

        let mut seen: HashSet<String> = HashSet::new();
        let mut merged = Vec::new();
        for result in results {
            for hit in result? {
                let key = hit
                    .unit
                    .index_id
                    .clone()
                    .unwrap_or_else(|| hit.unit.text.clone());
                if seen.insert(key) {
                    merged.push(hit);
                }
            }
        }
        Ok(merged)
    }

    /// Batch-deletes units by key.
    pub async fn delete_units(&self, ids: &[String]) -> Result<(), SearchError> {
        if ids.is_empty() {
            return Ok(());
        }
        let actions: Vec<Value> = ids
            .iter()
            .map(|id| json!({ "@search.action": "delete", "index_id": id }))
            .collect();
        let response = self
            .http
            .post(self.docs_url("search.index"))
            .header("api-key", &self.api_key)
            .json(&json!({ "value": actions }))
            .send()
            .await?;
        Self::fail_for_status(response).await?;
        info!(count = ids.len(), "deleted search units");
        Ok(())
    }
}

/// The `text_vector` dimension recorded in an index definition, if any.
fn vector_dimensions(index_definition: &Value) -> Option<usize> {
    index_definition["fields"]
        .as_array()?
        .iter()
        .find(|f| f["name"] == "text_vector")?["dimensions"]
        .as_u64()
        .map(|d| d as usize)
}
