//! OpenAPI aggregation: the gateway advertises its own document enriched with the paths and
//! components of every active service.
use std::{sync::Arc, time::Duration};

use futures_util::future::join_all;
use serde_json::{Map, Value, json};

use crate::{core::service::ServiceRecord, ports::http_client::HttpClient};

/// Path every service is expected to publish its OpenAPI document under.
pub const SERVICE_SCHEMA_PATH: &str = "/openapi.json";

/// Deep-merge `child` into `base`.
///
/// Keys missing from `base` are copied over. When both sides hold an object under the same
/// key the objects are merged recursively; for any other collision `base` keeps its value,
/// so the gateway's own document and earlier services win over later ones.
pub fn merge_schema(base: &mut Map<String, Value>, child: &Map<String, Value>) {
    for (key, value) in child {
        match (base.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_schema(existing, incoming);
            }
            (Some(_), _) => {}
            (None, _) => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Minimal document describing the gateway's own control surface.
pub fn base_document(title: &str, version: &str, description: &str) -> Value {
    json!({
        "openapi": "3.1.0",
        "info": {
            "title": title,
            "version": version,
            "description": description,
        },
        "paths": {
            "/health": {
                "get": {"summary": "Liveness check", "responses": {"200": {"description": "Alive"}}}
            },
            "/services": {
                "get": {"summary": "List registered services", "responses": {"200": {"description": "Services"}}},
                "post": {"summary": "Register a service", "responses": {"201": {"description": "Registered"}}}
            },
            "/services/{id}": {
                "get": {"summary": "Get a service", "responses": {"200": {"description": "Service"}}},
                "patch": {"summary": "Update a service", "responses": {"200": {"description": "Updated"}}},
                "delete": {"summary": "Remove a service", "responses": {"200": {"description": "Removed"}}}
            },
            "/logout": {
                "post": {"summary": "Revoke the caller's token", "responses": {"204": {"description": "Revoked"}}}
            }
        }
    })
}

/// Fetches service documents and folds them into a base document.
#[derive(Clone)]
pub struct SchemaAggregator {
    client: Arc<dyn HttpClient>,
    fetch_timeout: Duration,
}

impl SchemaAggregator {
    pub fn new(client: Arc<dyn HttpClient>, fetch_timeout: Duration) -> Self {
        Self {
            client,
            fetch_timeout,
        }
    }

    /// Merge every reachable service document into a copy of `base`.
    ///
    /// Fetches run concurrently, each bounded by the fetch timeout. A service that fails or
    /// answers with something other than a JSON object contributes nothing. Documents are
    /// merged in `services` order.
    pub async fn aggregate(&self, base: &Value, services: &[ServiceRecord]) -> Value {
        let fetches = services.iter().map(|service| self.fetch(service));
        let documents = join_all(fetches).await;

        let mut merged = match base {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        for document in documents.into_iter().flatten() {
            merge_schema(&mut merged, &document);
        }
        Value::Object(merged)
    }

    async fn fetch(&self, service: &ServiceRecord) -> Option<Map<String, Value>> {
        let url = service.url.join(SERVICE_SCHEMA_PATH);
        match self.client.fetch_json(&url, self.fetch_timeout).await {
            Ok(Value::Object(document)) => Some(document),
            Ok(_) => {
                tracing::warn!(service = %service.name, "Schema at {} is not a JSON object", url);
                None
            }
            Err(e) => {
                tracing::warn!(service = %service.name, "Failed to retrieve schema: {}", e);
                None
            }
        }
    }
}
