use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    core::service::{Credential, NewService, ServiceId, ServicePatch, ServiceRecord},
    ports::registry::{ListQuery, RegistryError, RegistryResult, ServiceRegistry},
};

#[derive(Debug, Default)]
struct Inner {
    next_id: ServiceId,
    services: BTreeMap<ServiceId, ServiceRecord>,
}

impl Inner {
    fn name_taken(&self, name: &str, except: Option<ServiceId>) -> bool {
        self.services
            .values()
            .any(|svc| svc.name == name && Some(svc.id) != except)
    }
}

/// Process-local registry.
///
/// A single `RwLock` makes the uniqueness check and the write one atomic step; the
/// `BTreeMap` keeps listings in id order.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    inner: RwLock<Inner>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.services.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ServiceRegistry for InMemoryRegistry {
    async fn list_active(&self) -> RegistryResult<Vec<ServiceRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .services
            .values()
            .filter(|svc| !svc.blocked)
            .cloned()
            .collect())
    }

    async fn list(&self, query: ListQuery) -> RegistryResult<Vec<ServiceRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .services
            .values()
            .filter(|svc| query.blocked.is_none_or(|blocked| svc.blocked == blocked))
            .skip(query.offset)
            .take(query.limit)
            .cloned()
            .collect())
    }

    async fn get(&self, id: ServiceId) -> RegistryResult<ServiceRecord> {
        self.inner
            .read()
            .await
            .services
            .get(&id)
            .cloned()
            .ok_or(RegistryError::NotFound(id))
    }

    async fn insert(&self, service: NewService) -> RegistryResult<ServiceRecord> {
        let url = service.validate()?;

        let mut inner = self.inner.write().await;
        if inner.name_taken(&service.name, None) {
            return Err(RegistryError::DuplicateName(service.name));
        }

        inner.next_id += 1;
        let record = ServiceRecord {
            id: inner.next_id,
            name: service.name,
            url,
            path: service.path,
            blocked: service.blocked,
            credential: Credential::generate(),
        };
        inner.services.insert(record.id, record.clone());

        tracing::debug!(service = %record.name, id = record.id, "Service registered");
        Ok(record)
    }

    async fn update(&self, id: ServiceId, patch: ServicePatch) -> RegistryResult<ServiceRecord> {
        let mut inner = self.inner.write().await;
        let current = inner
            .services
            .get(&id)
            .ok_or(RegistryError::NotFound(id))?;

        let updated = patch.apply_to(current)?;
        if updated.name != current.name && inner.name_taken(&updated.name, Some(id)) {
            return Err(RegistryError::DuplicateName(updated.name));
        }

        inner.services.insert(id, updated.clone());
        Ok(updated)
    }

    async fn delete(&self, id: ServiceId) -> RegistryResult<ServiceRecord> {
        self.inner
            .write()
            .await
            .services
            .remove(&id)
            .ok_or(RegistryError::NotFound(id))
    }
}
