//! Elasticsearch client
//!
//! Talks to the REST API directly with reqwest. Only the four calls the
//! pipeline needs are implemented: index HEAD/PUT, document GET, and `_bulk`.

use std::time::Duration;

use reqwest::{header, Client, Method, RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{debug, error, info};

use super::{BulkUpsert, DocumentIndex, IndexSchema};
use crate::model::TrackedDocument;
use crate::types::{Result, TrackerError};

/// Elasticsearch connection settings
#[derive(Debug, Clone)]
pub struct ElasticConfig {
    /// Base URL, e.g. `http://localhost:9200`
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for ElasticConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9200".to_string(),
            username: None,
            password: None,
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GetResponse {
    #[serde(default)]
    found: bool,
    #[serde(rename = "_source")]
    source: Option<TrackedDocument>,
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    errors: bool,
    #[serde(default)]
    items: Vec<JsonValue>,
}

impl BulkResponse {
    /// Error object of the first failed item, if any
    fn first_error(&self) -> Option<&JsonValue> {
        self.items
            .iter()
            .filter_map(|item| item.as_object()?.values().next()?.get("error"))
            .next()
    }
}

/// Elasticsearch-backed document index
#[derive(Clone)]
pub struct ElasticIndex {
    client: Client,
    base_url: Url,
    username: Option<String>,
    password: Option<String>,
}

impl ElasticIndex {
    /// Create a new client. Does not contact the cluster.
    pub fn new(config: &ElasticConfig) -> Result<Self> {
        let base_url = Url::parse(&config.url)
            .map_err(|e| TrackerError::Config(format!("Invalid Elasticsearch URL {}: {}", config.url, e)))?;

        if base_url.cannot_be_a_base() {
            return Err(TrackerError::Config(format!(
                "Elasticsearch URL cannot be a base: {}",
                config.url
            )));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| TrackerError::Config(format!("Failed to build HTTP client: {}", e)))?;

        info!("Elasticsearch client configured for {}", base_url);

        Ok(Self {
            client,
            base_url,
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| TrackerError::Config(format!("Invalid base URL: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match self.username {
            Some(ref user) => builder.basic_auth(user, self.password.as_ref()),
            None => builder,
        }
    }

    /// Render bulk operations as an NDJSON `_bulk` body
    fn bulk_body(operations: &[BulkUpsert<'_>]) -> Result<String> {
        let mut body = String::new();
        for op in operations {
            let action = serde_json::json!({ "index": { "_index": op.index, "_id": op.id } });
            body.push_str(&serde_json::to_string(&action)?);
            body.push('\n');
            body.push_str(&serde_json::to_string(op.document)?);
            body.push('\n');
        }
        Ok(body)
    }
}

#[async_trait::async_trait]
impl DocumentIndex for ElasticIndex {
    async fn index_exists(&self, index: &str) -> Result<bool> {
        let response = self.request(Method::HEAD, self.url(&[index])?).send().await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(TrackerError::Index(format!(
                "Unexpected status {} checking index {}",
                status, index
            ))),
        }
    }

    async fn create_index(&self, index: &str, schema: &IndexSchema) -> Result<()> {
        let response = self
            .request(Method::PUT, self.url(&[index])?)
            .json(&schema.to_body())
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::BAD_REQUEST && body.contains("resource_already_exists_exception") {
            debug!(index = index, "Index already created by another writer");
            return Ok(());
        }

        Err(TrackerError::Index(format!(
            "Failed to create index {} ({}): {}",
            index, status, body
        )))
    }

    async fn get_document(&self, index: &str, id: &str) -> Result<Option<TrackedDocument>> {
        let response = self
            .request(Method::GET, self.url(&[index, "_doc", id])?)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let body = response.error_for_status()?.bytes().await?;

        // A stored document that cannot be decoded will not decode on retry
        let response: GetResponse = serde_json::from_slice(&body).map_err(|e| {
            TrackerError::Serialization(format!("Undecodable document {}/{}: {}", index, id, e))
        })?;

        match (response.found, response.source) {
            (false, _) => Ok(None),
            (true, Some(document)) => Ok(Some(document)),
            (true, None) => Err(TrackerError::Config(format!(
                "Document {}/{} found without _source; is _source disabled on the index?",
                index, id
            ))),
        }
    }

    async fn bulk_upsert(&self, operations: &[BulkUpsert<'_>]) -> Result<()> {
        if operations.is_empty() {
            return Ok(());
        }

        let body = Self::bulk_body(operations)?;

        let response: BulkResponse = self
            .request(Method::POST, self.url(&["_bulk"])?)
            .header(header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.errors {
            let reason = response
                .first_error()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            error!(count = operations.len(), reason = %reason, "Bulk request had item failures");
            return Err(TrackerError::Index(format!("Bulk item failure: {}", reason)));
        }

        debug!(count = operations.len(), "Bulk request committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> ElasticIndex {
        ElasticIndex::new(&ElasticConfig {
            url: "http://es.local:9200/".to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_rejects_invalid_url() {
        let result = ElasticIndex::new(&ElasticConfig {
            url: "not a url".to_string(),
            ..Default::default()
        });
        assert!(matches!(result, Err(TrackerError::Config(_))));
    }

    #[test]
    fn test_url_segments() {
        let url = index().url(&["journeys_shop", "_doc", "abc"]).unwrap();
        assert_eq!(url.as_str(), "http://es.local:9200/journeys_shop/_doc/abc");
    }

    #[test]
    fn test_bulk_body_is_ndjson() {
        let created = "2024-03-01T10:00:00Z".parse().unwrap();
        let doc = TrackedDocument::new("shop", "checkout", created);
        let ops = vec![BulkUpsert {
            index: "journeys_shop".to_string(),
            id: "tracker-1",
            document: &doc,
        }];

        let body = ElasticIndex::bulk_body(&ops).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(body.ends_with('\n'));

        let action: JsonValue = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(action["index"]["_index"], "journeys_shop");
        assert_eq!(action["index"]["_id"], "tracker-1");

        let source: TrackedDocument = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(source, doc);
    }

    #[test]
    fn test_bulk_first_error() {
        let response: BulkResponse = serde_json::from_value(serde_json::json!({
            "errors": true,
            "items": [
                { "index": { "_id": "a", "status": 201 } },
                { "index": { "_id": "b", "status": 400, "error": { "type": "mapper_parsing_exception" } } }
            ]
        }))
        .unwrap();

        let err = response.first_error().unwrap();
        assert_eq!(err["type"], "mapper_parsing_exception");
    }
}
