//! Kinetix - an API gateway that routes requests to registered services by path regex.
//!
//! Services are registered through an admin-only control plane (`/services`). Each one has a
//! name, a base URL, a path regex and a generated credential. Every request that does not hit a
//! control endpoint is matched against the active services and forwarded to the first match,
//! with the service credential injected as a header.
//!
//! # Features
//! - Routing table derived from the registry, cached with staleness and failure backoff
//! - Forwarding with credential injection and response scrubbing
//! - JWT (HS256) control-plane authentication with logout revocation
//! - Aggregated OpenAPI document refreshed from every active service
//! - Service status probing with a TTL cache
//! - Structured tracing via `tracing` and metrics through the `metrics` facade
//! - Graceful shutdown
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use kinetix::{GatewayService, HttpClientAdapter, InMemoryRegistry, config::load_config};
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let config = load_config(Some("config.yaml")).await?;
//! let gateway = Arc::new(GatewayService::new(
//!     &config,
//!     Arc::new(InMemoryRegistry::new()),
//!     Arc::new(HttpClientAdapter::new()?),
//! )?);
//! let app = kinetix::adapters::router(gateway, None);
//! # let _ = app;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! Ports (traits) live in `ports`, their implementations in `adapters`, and the routing,
//! forwarding and auth logic in `core`.
//!
//! # Error Handling
//! Domain operations return `thiserror` enums; startup code returns `eyre::Result<T>` with
//! `WrapErr` context attached.
//!
//! # Concurrency & Data Structures
//! The routing table and OpenAPI document are swapped atomically with `arc_swap`; shared maps
//! (revoked tokens, status cache) use `scc::HashMap`.
pub mod config;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

pub use crate::{
    adapters::{HttpClientAdapter, InMemoryRegistry, SchemaUpdater},
    core::GatewayService,
    ports::{http_client::HttpClient, registry::ServiceRegistry},
    utils::GracefulShutdown,
};
