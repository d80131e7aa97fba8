//! Axum middleware used by the gateway router.
//!
//! Request id and timing wrap every request; `require_user` / `require_admin` guard the
//! control-plane routes and leave the verified [`Claims`] in the request extensions.
use std::{sync::Arc, time::Instant};

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, header},
    middleware::Next,
    response::Response,
};
use regex::Regex;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::Instrument;

use crate::{
    adapters::http_handler::ApiError,
    config::CorsConfig,
    core::{
        GatewayService,
        auth::{AuthError, Claims, bearer_token},
    },
    metrics,
};

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Log start/end of a request including latency, and record request metrics.
pub async fn request_timing_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    tracing::debug!("Started processing {} {}", method, path);

    let response = next.run(req).await;
    let duration = start.elapsed();

    tracing::info!(
        "Completed {} {} - {} in {:?}",
        method,
        path,
        response.status(),
        duration
    );
    metrics::increment_request_total(method.as_str(), response.status().as_u16());
    metrics::record_request_duration(method.as_str(), duration);

    response
}

/// Tag the request with an `X-Request-ID` (kept if the caller sent one), run the rest of
/// the stack inside a span carrying it, and echo it on the response.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(&REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let header_value = HeaderValue::from_str(&request_id).ok();
    if let Some(value) = &header_value {
        req.headers_mut().insert(REQUEST_ID_HEADER, value.clone());
    }

    let span = tracing::info_span!("request", request_id = %request_id);
    let mut response = next.run(req).instrument(span).await;

    if let Some(value) = header_value {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

async fn authenticate(gateway: &GatewayService, headers: &HeaderMap) -> Result<Claims, ApiError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
        .ok_or(AuthError::MissingToken)?;

    Ok(gateway.authenticate(token).await?)
}

/// Reject requests without a valid, unrevoked bearer token.
pub async fn require_user(
    State(gateway): State<Arc<GatewayService>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let claims = authenticate(&gateway, req.headers()).await?;
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// As [`require_user`], and the token must carry `admin: true`.
pub async fn require_admin(
    State(gateway): State<Arc<GatewayService>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let claims = authenticate(&gateway, req.headers()).await?;
    if !claims.admin {
        tracing::debug!(user = claims.sub, path = %req.uri().path(), "Admin route refused");
        return Err(AuthError::Forbidden.into());
    }
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// CORS for origins matching the configured regex, credentials allowed.
pub fn cors_layer(config: &CorsConfig) -> eyre::Result<Option<CorsLayer>> {
    let Some(pattern) = &config.allow_origin_regex else {
        return Ok(None);
    };
    let origin_regex = Regex::new(pattern)
        .map_err(|e| eyre::eyre!("Invalid cors.allow_origin_regex '{}': {}", pattern, e))?;

    let layer = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            origin
                .to_str()
                .is_ok_and(|origin| origin_regex.is_match(origin))
        }))
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request());
    Ok(Some(layer))
}

#[cfg(test)]
mod tests {
    use axum::{
        Router,
        body::Body,
        http::{Request, StatusCode},
        middleware,
        routing::get,
    };
    use tower::ServiceExt; // for oneshot

    use super::*;

    fn app() -> Router {
        Router::new()
            .route("/", get(|| async { StatusCode::OK }))
            .layer(middleware::from_fn(request_id_middleware))
    }

    #[tokio::test]
    async fn test_request_id_is_generated() {
        let response = app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let request_id = response
            .headers()
            .get(&REQUEST_ID_HEADER)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(uuid::Uuid::parse_str(request_id).is_ok());
    }

    #[tokio::test]
    async fn test_request_id_is_propagated() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header("x-request-id", "abc-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers().get(&REQUEST_ID_HEADER).unwrap(), "abc-123");
    }

    #[tokio::test]
    async fn test_cors_allows_matching_origin_only() {
        let cors = cors_layer(&CorsConfig::default()).unwrap().unwrap();
        let app = Router::new()
            .route("/", get(|| async { StatusCode::OK }))
            .layer(cors);

        let allowed = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header(header::ORIGIN, "http://localhost:3000")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            allowed
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            "http://localhost:3000"
        );
        assert_eq!(
            allowed
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS)
                .unwrap(),
            "true"
        );

        let refused = app
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header(header::ORIGIN, "https://evil.example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(
            refused
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .is_none()
        );
    }

    #[test]
    fn test_cors_disabled_without_regex() {
        let config = CorsConfig {
            allow_origin_regex: None,
        };
        assert!(cors_layer(&config).unwrap().is_none());
    }

    fn guarded_app() -> (Router, String) {
        use chrono::Utc;

        use crate::{
            adapters::{HttpClientAdapter, InMemoryRegistry},
            config::GatewayConfig,
            core::auth::issue_token,
        };

        let mut config = GatewayConfig::default();
        config.auth.secret = "secret".to_string();
        let gateway = Arc::new(
            GatewayService::new(
                &config,
                Arc::new(InMemoryRegistry::new()),
                Arc::new(HttpClientAdapter::new().unwrap()),
            )
            .unwrap(),
        );

        let app = Router::new()
            .route(
                "/me",
                get(|axum::Extension(claims): axum::Extension<Claims>| async move {
                    claims.email
                }),
            )
            .route_layer(middleware::from_fn_with_state(gateway.clone(), require_user))
            .with_state(gateway);

        let now = Utc::now().timestamp();
        let token = issue_token(
            &Claims {
                sub: 9,
                iat: now,
                exp: now + 60,
                email: "nine@example.com".to_string(),
                admin: false,
            },
            "secret",
        )
        .unwrap();
        (app, token)
    }

    #[tokio::test]
    async fn test_require_user_guards_route() {
        let (app, token) = guarded_app();

        let missing = app
            .clone()
            .oneshot(Request::builder().uri("/me").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let allowed = app
            .oneshot(
                Request::builder()
                    .uri("/me")
                    .header(header::AUTHORIZATION, format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(allowed.status(), StatusCode::OK);
        let body = axum::body::to_bytes(allowed.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"nine@example.com");
    }
}
