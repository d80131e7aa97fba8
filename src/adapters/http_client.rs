use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use eyre::Result;
use http_body_util::BodyExt;
use hyper::{Method, Request, Response, Version, header, header::HeaderValue};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use rustls_native_certs::load_native_certs;
use tokio::time::timeout;

use crate::ports::http_client::{HttpClient, HttpClientError, HttpClientResult};

/// HTTP client adapter using Hyper with Rustls (HTTP/1.1 + HTTP/2).
///
/// Responsibilities:
/// * Recomputes the `Host` header from the outbound URI
/// * Forces request version to HTTP/1.1 while allowing ALPN to negotiate h2
/// * Performs GET based status probes and schema fetches with a timeout
/// * Converts between Hyper body and Axum body types
///
/// No retries: a failed forward is reported to the caller once.
pub struct HttpClientAdapter {
    client: Client<HttpsConnector<HttpConnector>, AxumBody>,
}

impl HttpClientAdapter {
    /// Create a new HTTP client adapter.
    pub fn new() -> Result<Self> {
        // Install default crypto provider for rustls if not already set
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false); // Allow HTTPS URLs

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();

        if !native_certs.certs.is_empty() {
            for cert in native_certs.certs {
                if root_cert_store.add(cert).is_err() {
                    tracing::warn!("Failed to add native certificate to rustls RootCertStore");
                }
            }
            tracing::debug!("Loaded {} native root certificates.", root_cert_store.len());
        }

        if !native_certs.errors.is_empty() {
            tracing::warn!(
                "Some native certificates failed to load: {:?}",
                native_certs.errors
            );
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new()).build::<_, AxumBody>(https_connector);

        tracing::info!("Created outbound HTTP client");
        Ok(Self { client })
    }

    /// Set `Host` from the request URI, replacing whatever the caller left there.
    fn set_host_header(req: &mut Request<AxumBody>) -> HttpClientResult<()> {
        let Some(host_str) = req.uri().host() else {
            tracing::error!("Outgoing URI has no host: {}", req.uri());
            return Err(HttpClientError::InvalidRequest(
                "Outgoing URI has no host".to_string(),
            ));
        };

        let host = match req.uri().port() {
            Some(port) => format!("{host_str}:{}", port.as_u16()),
            None => host_str.to_string(),
        };
        let value = HeaderValue::from_str(&host)
            .map_err(|e| HttpClientError::InvalidRequest(format!("Invalid host '{host}': {e}")))?;
        req.headers_mut().insert(header::HOST, value);
        Ok(())
    }

    fn get_request(url: &str) -> HttpClientResult<Request<AxumBody>> {
        Request::builder()
            .method(Method::GET)
            .uri(url)
            .version(Version::HTTP_11)
            .body(AxumBody::empty())
            .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))
    }
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn send_request(
        &self,
        mut req: Request<AxumBody>,
    ) -> HttpClientResult<Response<AxumBody>> {
        let backend_identifier = format!(
            "{}://{}",
            req.uri().scheme_str().unwrap_or("http"),
            req.uri()
                .authority()
                .map_or_else(|| "unknown".to_string(), |a| a.to_string())
        );

        Self::set_host_header(&mut req)?;

        let (mut parts, axum_body) = req.into_parts();
        parts.version = Version::HTTP_11;

        tracing::debug!(
            backend = %backend_identifier,
            "Sending request: {} {}",
            parts.method,
            parts.uri
        );

        let outgoing_request = Request::from_parts(parts, axum_body);
        let method_for_error_log = outgoing_request.method().clone();
        let uri_for_error_log = outgoing_request.uri().clone();

        match self.client.request(outgoing_request).await {
            Ok(response) => {
                let (mut parts, hyper_body) = response.into_parts();

                // The body is re-framed by the inbound server.
                parts.headers.remove(header::TRANSFER_ENCODING);

                Ok(Response::from_parts(parts, AxumBody::new(hyper_body)))
            }
            Err(e) => Err(HttpClientError::ConnectionError(format!(
                "Request to {method_for_error_log} {uri_for_error_log} failed: {e}"
            ))),
        }
    }

    async fn probe(&self, url: &str, probe_timeout: Duration) -> HttpClientResult<bool> {
        let request = Self::get_request(url)?;

        match timeout(probe_timeout, self.client.request(request)).await {
            Ok(Ok(response)) => {
                let is_up = response.status().is_success();
                // Drain the body so the connection can be reused
                let _ = response.into_body().collect().await;
                tracing::debug!("Probe of {} result: {}", url, is_up);
                Ok(is_up)
            }
            Ok(Err(err)) => {
                tracing::debug!("Probe error for {}: {}", url, err);
                Ok(false)
            }
            Err(_) => Err(HttpClientError::Timeout(probe_timeout)),
        }
    }

    async fn fetch_json(
        &self,
        url: &str,
        fetch_timeout: Duration,
    ) -> HttpClientResult<serde_json::Value> {
        let request = Self::get_request(url)?;

        let fetch = async {
            let response = self
                .client
                .request(request)
                .await
                .map_err(|e| HttpClientError::ConnectionError(format!("GET {url} failed: {e}")))?;

            let status = response.status();
            if !status.is_success() {
                return Err(HttpClientError::BackendError {
                    url: url.to_string(),
                    status,
                });
            }

            let bytes = response
                .into_body()
                .collect()
                .await
                .map_err(|e| HttpClientError::ConnectionError(format!("GET {url} body: {e}")))?
                .to_bytes();

            serde_json::from_slice::<serde_json::Value>(&bytes).map_err(|e| HttpClientError::InvalidResponse {
                url: url.to_string(),
                reason: e.to_string(),
            })
        };

        timeout(fetch_timeout, fetch)
            .await
            .map_err(|_| HttpClientError::Timeout(fetch_timeout))?
    }
}
