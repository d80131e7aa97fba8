//! Core gateway orchestration service.
//!
//! The `GatewayService` owns every piece of runtime state the HTTP layer needs:
//! * the service registry and the routing table cache derived from it
//! * the forwarder that carries resolved requests to services
//! * token verification and the revocation ledger used by logout
//! * the status probe annotating registry listings
//! * the currently advertised OpenAPI document
//!
//! Registry writes go through this type so the routing table is marked stale as soon as a
//! record changes.
use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::body::Body as AxumBody;
use eyre::{Result, WrapErr};
use hyper::{Request, Response, header::HeaderName};
use serde_json::Value;

use crate::{
    config::GatewayConfig,
    core::{
        auth::{AuthError, Claims, TokenVerifier},
        forwarder::{ForwardError, Forwarder},
        revocation::RevocationLedger,
        route_cache::RoutingTableCache,
        schema::{SchemaAggregator, base_document},
        service::{
            NewService, ServiceId, ServicePatch, ServiceSummary, ServiceTarget,
            ServiceWithCredential,
        },
        status::StatusProbe,
    },
    ports::{
        http_client::HttpClient,
        registry::{ListQuery, RegistryResult, ServiceRegistry},
    },
};

/// Central orchestrator shared by all request handlers behind an `Arc`.
pub struct GatewayService {
    registry: Arc<dyn ServiceRegistry>,
    routes: RoutingTableCache,
    forwarder: Forwarder,
    verifier: TokenVerifier,
    ledger: RevocationLedger,
    status: StatusProbe,
    aggregator: SchemaAggregator,
    base_schema: Value,
    schema: ArcSwap<Value>,
}

impl GatewayService {
    /// Wire the gateway from its configuration, a registry and an outbound client.
    pub fn new(
        config: &GatewayConfig,
        registry: Arc<dyn ServiceRegistry>,
        http_client: Arc<dyn HttpClient>,
    ) -> Result<Self> {
        let timings = config.timings()?;
        let credential_header = HeaderName::from_bytes(config.forwarding.credential_header.as_bytes())
            .wrap_err_with(|| {
                format!(
                    "Invalid credential header name '{}'",
                    config.forwarding.credential_header
                )
            })?;

        let base_schema = base_document(
            &config.schema.title,
            &config.schema.version,
            &config.schema.description,
        );

        Ok(Self {
            routes: RoutingTableCache::new(registry.clone(), timings.staleness, timings.backoff),
            forwarder: Forwarder::new(http_client.clone(), credential_header, timings.forward_timeout),
            verifier: TokenVerifier::new(&config.auth.secret),
            ledger: RevocationLedger::new(),
            status: StatusProbe::new(
                http_client.clone(),
                config.status.path.clone(),
                timings.status_timeout,
                timings.status_ttl,
            ),
            aggregator: SchemaAggregator::new(http_client, timings.schema_fetch_timeout),
            schema: ArcSwap::from_pointee(base_schema.clone()),
            base_schema,
            registry,
        })
    }

    pub fn routes(&self) -> &RoutingTableCache {
        &self.routes
    }

    pub fn ledger(&self) -> &RevocationLedger {
        &self.ledger
    }

    /// Target for `path` under the current routing table, if any route matches.
    pub async fn resolve(&self, path: &str) -> Option<ServiceTarget> {
        let table = self.routes.current().await;
        table.resolve(path).cloned()
    }

    pub async fn forward(
        &self,
        target: &ServiceTarget,
        req: Request<AxumBody>,
    ) -> Result<Response<AxumBody>, ForwardError> {
        self.forwarder.forward(target, req).await
    }

    /// Decode a bearer token and make sure it was not revoked.
    pub async fn authenticate(&self, token: &str) -> Result<Claims, AuthError> {
        self.verifier.verify(token, &self.ledger).await
    }

    /// Revoke the token the claims were read from.
    pub async fn logout(&self, claims: &Claims) {
        self.ledger
            .invalidate(claims.sub, claims.iat, claims.exp)
            .await;
        tracing::info!(user = claims.sub, "User logged out");
    }

    pub async fn list_services(&self, query: ListQuery) -> RegistryResult<Vec<ServiceSummary>> {
        let records = self.registry.list(query).await?;
        let statuses = self.status.statuses(&records).await;
        Ok(records
            .iter()
            .zip(statuses)
            .map(|(record, up)| ServiceSummary::new(record, up))
            .collect())
    }

    pub async fn get_service(&self, id: ServiceId) -> RegistryResult<ServiceSummary> {
        let record = self.registry.get(id).await?;
        let up = self.status.is_up(&record).await;
        Ok(ServiceSummary::new(&record, up))
    }

    /// Register a service. The response is the only place its credential is ever shown.
    pub async fn register_service(&self, service: NewService) -> RegistryResult<ServiceWithCredential> {
        let record = self.registry.insert(service).await?;
        self.routes.mark_stale();
        tracing::info!(service = %record.name, id = record.id, path = %record.path, "Added a new service");
        Ok(ServiceWithCredential::from(&record))
    }

    pub async fn update_service(
        &self,
        id: ServiceId,
        patch: ServicePatch,
    ) -> RegistryResult<ServiceSummary> {
        let record = self.registry.update(id, patch).await?;
        self.routes.mark_stale();
        tracing::info!(service = %record.name, id, blocked = record.blocked, "Patched service");
        let up = self.status.is_up(&record).await;
        Ok(ServiceSummary::new(&record, up))
    }

    pub async fn remove_service(&self, id: ServiceId) -> RegistryResult<ServiceSummary> {
        let record = self.registry.delete(id).await?;
        self.routes.mark_stale();
        self.status.forget(id).await;
        tracing::info!(service = %record.name, id, "Removed service");
        Ok(ServiceSummary::new(&record, false))
    }

    /// Register startup services one by one; a bad entry is logged and skipped.
    pub async fn seed_services(&self, services: Vec<NewService>) -> usize {
        let mut added = 0;
        for service in services {
            let name = service.name.clone();
            match self.register_service(service).await {
                Ok(_) => added += 1,
                Err(e) => tracing::error!("Failed to add initial service '{}': {}", name, e),
            }
        }
        added
    }

    /// The OpenAPI document currently advertised.
    pub fn schema(&self) -> Arc<Value> {
        self.schema.load_full()
    }

    /// Rebuild the advertised document from the active services.
    ///
    /// If the registry cannot be read the previous document stays in place.
    pub async fn refresh_schema(&self) {
        let services = match self.registry.list_active().await {
            Ok(services) => services,
            Err(e) => {
                tracing::warn!("Skipping schema refresh, registry unavailable: {}", e);
                return;
            }
        };

        let merged = self.aggregator.aggregate(&self.base_schema, &services).await;
        self.schema.store(Arc::new(merged));
        tracing::debug!(services = services.len(), "OpenAPI document refreshed");
    }
}
