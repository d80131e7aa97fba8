//! Outbound leg of the proxy: rewrite the inbound request for a resolved target, send it,
//! and scrub the answer.
use std::{sync::Arc, time::Duration};

use axum::body::Body as AxumBody;
use hyper::{
    HeaderMap, Request, Response, Uri,
    header::{self, HeaderName, HeaderValue},
};
use thiserror::Error;

use crate::{
    core::service::ServiceTarget,
    metrics::{self, ForwardTimer, Outcome},
    ports::http_client::{HttpClient, HttpClientError},
};

/// Header carrying the per-service credential unless configured otherwise.
pub const DEFAULT_CREDENTIAL_HEADER: &str = "x-apikey";

/// Why a resolved request could not be answered by its service.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ForwardError {
    #[error("Cannot build request for {target}: {reason}")]
    InvalidRequest { target: String, reason: String },

    #[error("Forwarding to {target} failed: {source}")]
    Transport {
        target: String,
        #[source]
        source: HttpClientError,
    },

    #[error("Forwarding to {target} timed out after {timeout:?}")]
    Timeout { target: String, timeout: Duration },
}

/// Sends resolved requests to their service with the service credential attached.
#[derive(Clone)]
pub struct Forwarder {
    client: Arc<dyn HttpClient>,
    credential_header: HeaderName,
    timeout: Duration,
}

impl Forwarder {
    pub fn new(client: Arc<dyn HttpClient>, credential_header: HeaderName, timeout: Duration) -> Self {
        Self {
            client,
            credential_header,
            timeout,
        }
    }

    pub fn credential_header(&self) -> &HeaderName {
        &self.credential_header
    }

    /// Turn the inbound request into the one sent to `target`.
    ///
    /// Method, path, query and body are kept. Every header is copied except
    /// `content-length` (the body is re-framed) and `host` (recomputed for the target);
    /// the credential header is overwritten with the target's credential, so a client
    /// cannot choose which key the service sees.
    pub fn build_outbound(
        &self,
        target: &ServiceTarget,
        inbound: Request<AxumBody>,
    ) -> Result<Request<AxumBody>, ForwardError> {
        let invalid = |reason: String| ForwardError::InvalidRequest {
            target: target.name.clone(),
            reason,
        };

        let (parts, body) = inbound.into_parts();
        let path_and_query = parts.uri.path_and_query().map_or("/", |pq| pq.as_str());
        let uri = target
            .url
            .join(path_and_query)
            .parse::<Uri>()
            .map_err(|e| invalid(e.to_string()))?;

        let mut credential = HeaderValue::from_str(target.credential.expose())
            .map_err(|e| invalid(format!("credential is not a valid header value: {e}")))?;
        credential.set_sensitive(true);

        let mut headers = HeaderMap::with_capacity(parts.headers.len() + 1);
        for (name, value) in &parts.headers {
            if name == header::CONTENT_LENGTH || name == header::HOST {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }
        headers.insert(self.credential_header.clone(), credential);

        let mut outbound = Request::builder()
            .method(parts.method)
            .uri(uri)
            .body(body)
            .map_err(|e| invalid(e.to_string()))?;
        *outbound.headers_mut() = headers;
        Ok(outbound)
    }

    /// Forward `inbound` to `target` and return the service's answer.
    pub async fn forward(
        &self,
        target: &ServiceTarget,
        inbound: Request<AxumBody>,
    ) -> Result<Response<AxumBody>, ForwardError> {
        let outbound = self.build_outbound(target, inbound)?;
        tracing::debug!(
            service = %target.name,
            "Forwarding {} {}",
            outbound.method(),
            outbound.uri()
        );

        let _timer = ForwardTimer::new(&target.name);
        let result = match tokio::time::timeout(self.timeout, self.client.send_request(outbound)).await {
            Ok(Ok(response)) => Ok(self.scrub_response(response)),
            Ok(Err(source)) => Err(ForwardError::Transport {
                target: target.name.clone(),
                source,
            }),
            Err(_) => Err(ForwardError::Timeout {
                target: target.name.clone(),
                timeout: self.timeout,
            }),
        };

        let outcome = if result.is_ok() {
            Outcome::Success
        } else {
            Outcome::Failure
        };
        metrics::increment_forward_total(&target.name, outcome);
        result
    }

    fn scrub_response(&self, mut response: Response<AxumBody>) -> Response<AxumBody> {
        response.headers_mut().remove(&self.credential_header);
        response
    }
}
