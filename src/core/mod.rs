pub mod auth;
pub mod backend;
pub mod forwarder;
pub mod gateway;
pub mod revocation;
pub mod route_cache;
pub mod routing;
pub mod schema;
pub mod service;
pub mod status;

pub use gateway::GatewayService;
pub use route_cache::RoutingTableCache;
pub use routing::RoutingTable;
