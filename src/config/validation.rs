#![allow(clippy::collapsible_if)]

use std::net::SocketAddr;

use hyper::header::HeaderName;
use regex::Regex;

use crate::config::models::GatewayConfig;

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Invalid initial service '{name}': {message}")]
    InvalidService { name: String, message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Gateway configuration validator. Collects every problem before failing.
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &GatewayConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }

        if config.auth.secret.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "auth.secret".to_string(),
            });
        }

        if HeaderName::from_bytes(config.forwarding.credential_header.as_bytes()).is_err() {
            errors.push(ValidationError::InvalidField {
                field: "forwarding.credential_header".to_string(),
                message: format!(
                    "'{}' is not a valid header name",
                    config.forwarding.credential_header
                ),
            });
        }

        errors.extend(Self::validate_durations(config));

        if let Some(pattern) = &config.cors.allow_origin_regex {
            if let Err(e) = Regex::new(pattern) {
                errors.push(ValidationError::InvalidField {
                    field: "cors.allow_origin_regex".to_string(),
                    message: e.to_string(),
                });
            }
        }

        if !config.status.path.starts_with('/') {
            errors.push(ValidationError::InvalidField {
                field: "status.path".to_string(),
                message: "Probe path must start with '/'".to_string(),
            });
        }

        for service in &config.initial_services {
            if let Err(e) = service.validate() {
                errors.push(ValidationError::InvalidService {
                    name: service.name.clone(),
                    message: e.to_string(),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:8000' or '0.0.0.0:8000')"
                    .to_string(),
            });
        }
        Ok(())
    }

    fn validate_durations(config: &GatewayConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let checks = [
            config.routing.staleness(),
            config.routing.backoff(),
            config.forwarding.timeout(),
            config.schema.refresh_interval(),
            config.schema.fetch_timeout(),
            config.status.ttl(),
            config.status.timeout(),
        ];
        for check in checks {
            if let Err(e) = check {
                errors.push(ValidationError::InvalidField {
                    field: "duration".to_string(),
                    message: e.to_string(),
                });
            }
        }

        if let (Ok(staleness), Ok(backoff)) = (config.routing.staleness(), config.routing.backoff())
        {
            if backoff < staleness {
                tracing::warn!(
                    "routing.backoff ({:?}) is shorter than routing.staleness ({:?}); a failing registry will be retried more often than a healthy one",
                    backoff,
                    staleness
                );
            }
        }

        if let Ok(interval) = config.schema.refresh_interval() {
            if interval.is_zero() {
                errors.push(ValidationError::InvalidField {
                    field: "schema.refresh_interval".to_string(),
                    message: "Must be greater than zero".to_string(),
                });
            }
        }
        errors
    }

    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}
