pub mod http_client;
pub mod http_handler;
pub mod memory_registry;
pub mod middleware;
pub mod schema_updater;

pub use http_client::HttpClientAdapter;
pub use http_handler::{ApiError, router};
pub use memory_registry::InMemoryRegistry;
pub use schema_updater::SchemaUpdater;
