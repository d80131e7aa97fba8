//! Service records as stored by the registry and the write-time rules they obey.
//!
//! The routing core only ever reads immutable snapshots of [`ServiceRecord`]. Every rule
//! enforced here (name length, URL shape, path regex compiles) is checked when a record is
//! written, so the routing table builder can treat a snapshot as well formed.
use std::fmt;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::backend::{BackendError, BackendUrl};

pub const MIN_NAME_LEN: usize = 2;
pub const MAX_NAME_LEN: usize = 31;
pub const MAX_PATH_LEN: usize = 255;
const CREDENTIAL_BYTES: usize = 32;

pub type ServiceId = u64;

/// Write-time validation failures for service records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ServiceValidationError {
    #[error("Service name must be {MIN_NAME_LEN} to {MAX_NAME_LEN} characters, got {0}")]
    InvalidName(usize),

    #[error(transparent)]
    InvalidUrl(#[from] BackendError),

    #[error("Path pattern must be at most {MAX_PATH_LEN} characters, got {0}")]
    PathTooLong(usize),

    #[error("Path pattern '{pattern}' is not a valid regex: {reason}")]
    InvalidPath { pattern: String, reason: String },
}

/// Opaque per-service secret injected into forwarded requests.
///
/// `Debug` is redacted so records can be logged freely.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// 32 random bytes, URL-safe base64 without padding.
    pub fn generate() -> Self {
        let mut bytes = [0u8; CREDENTIAL_BYTES];
        rand::rng().fill(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// A registered backend service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub id: ServiceId,
    pub name: String,
    pub url: BackendUrl,
    /// Regex matched against the full request path.
    pub path: String,
    pub blocked: bool,
    pub credential: Credential,
}

impl ServiceRecord {
    /// The part of the record the forwarder needs.
    pub fn target(&self) -> ServiceTarget {
        ServiceTarget {
            name: self.name.clone(),
            url: self.url.clone(),
            credential: self.credential.clone(),
        }
    }
}

/// Where a resolved request is sent and which credential it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceTarget {
    pub name: String,
    pub url: BackendUrl,
    pub credential: Credential,
}

/// Payload for registering a new service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewService {
    pub name: String,
    pub url: String,
    pub path: String,
    #[serde(default)]
    pub blocked: bool,
}

impl NewService {
    pub fn new(name: impl Into<String>, url: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            path: path.into(),
            blocked: false,
        }
    }

    /// Validate every field, returning the parsed URL on success.
    pub fn validate(&self) -> Result<BackendUrl, ServiceValidationError> {
        validate_name(&self.name)?;
        let url = BackendUrl::new(&self.url)?;
        validate_path(&self.path)?;
        Ok(url)
    }
}

/// Partial update; absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServicePatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub blocked: Option<bool>,
}

impl ServicePatch {
    /// Apply the patch to a copy of `record`, validating each provided field.
    pub fn apply_to(&self, record: &ServiceRecord) -> Result<ServiceRecord, ServiceValidationError> {
        let mut updated = record.clone();
        if let Some(name) = &self.name {
            validate_name(name)?;
            updated.name = name.clone();
        }
        if let Some(url) = &self.url {
            updated.url = BackendUrl::new(url)?;
        }
        if let Some(path) = &self.path {
            validate_path(path)?;
            updated.path = path.clone();
        }
        if let Some(blocked) = self.blocked {
            updated.blocked = blocked;
        }
        Ok(updated)
    }
}

pub fn validate_name(name: &str) -> Result<(), ServiceValidationError> {
    let len = name.chars().count();
    if !(MIN_NAME_LEN..=MAX_NAME_LEN).contains(&len) {
        return Err(ServiceValidationError::InvalidName(len));
    }
    Ok(())
}

pub fn validate_path(pattern: &str) -> Result<(), ServiceValidationError> {
    if pattern.len() > MAX_PATH_LEN {
        return Err(ServiceValidationError::PathTooLong(pattern.len()));
    }
    Regex::new(pattern).map_err(|e| ServiceValidationError::InvalidPath {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })?;
    Ok(())
}

/// Registry listing entry annotated with the probed status.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceSummary {
    pub id: ServiceId,
    pub name: String,
    pub url: BackendUrl,
    pub path: String,
    pub blocked: bool,
    pub up: bool,
}

impl ServiceSummary {
    pub fn new(record: &ServiceRecord, up: bool) -> Self {
        Self {
            id: record.id,
            name: record.name.clone(),
            url: record.url.clone(),
            path: record.path.clone(),
            blocked: record.blocked,
            up,
        }
    }
}

/// Returned once, on creation: the only time the credential leaves the gateway.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceWithCredential {
    #[serde(flatten)]
    pub service: ServiceSummary,
    pub apikey: Credential,
}

impl From<&ServiceRecord> for ServiceWithCredential {
    fn from(record: &ServiceRecord) -> Self {
        Self {
            service: ServiceSummary::new(record, false),
            apikey: record.credential.clone(),
        }
    }
}
