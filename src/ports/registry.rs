use async_trait::async_trait;
use thiserror::Error;

use crate::core::service::{
    NewService, ServiceId, ServicePatch, ServiceRecord, ServiceValidationError,
};

/// Default page size for registry listings.
pub const DEFAULT_LIST_LIMIT: usize = 100;

/// Error type for registry operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RegistryError {
    /// A record failed write-time validation
    #[error(transparent)]
    Invalid(#[from] ServiceValidationError),

    /// Another service already uses this name
    #[error("A service with the name \"{0}\" already exists")]
    DuplicateName(String),

    /// No record with this id
    #[error("Service {0} not found")]
    NotFound(ServiceId),

    /// The backing store could not be reached
    #[error("Registry unavailable: {0}")]
    Unavailable(String),
}

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Filter and paging for [`ServiceRegistry::list`].
#[derive(Debug, Clone, Copy)]
pub struct ListQuery {
    pub offset: usize,
    pub limit: usize,
    pub blocked: Option<bool>,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: DEFAULT_LIST_LIMIT,
            blocked: None,
        }
    }
}

/// ServiceRegistry defines the port for the durable store of service records.
///
/// Implementations enforce name uniqueness and the field rules in
/// [`crate::core::service`] on every write. Listings are ordered by id, which is the
/// iteration order the routing table uses to break specificity ties.
#[async_trait]
pub trait ServiceRegistry: Send + Sync + 'static {
    /// Every non-blocked record.
    async fn list_active(&self) -> RegistryResult<Vec<ServiceRecord>>;

    async fn list(&self, query: ListQuery) -> RegistryResult<Vec<ServiceRecord>>;

    async fn get(&self, id: ServiceId) -> RegistryResult<ServiceRecord>;

    /// Register a service, generating its credential.
    async fn insert(&self, service: NewService) -> RegistryResult<ServiceRecord>;

    async fn update(&self, id: ServiceId, patch: ServicePatch) -> RegistryResult<ServiceRecord>;

    async fn delete(&self, id: ServiceId) -> RegistryResult<ServiceRecord>;
}
