//! Inbound HTTP surface: control-plane endpoints plus the catch-all proxy.
use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    adapters::middleware::{
        request_id_middleware, request_timing_middleware, require_admin, require_user,
    },
    core::{
        GatewayService,
        auth::{AuthError, Claims},
        service::{NewService, ServiceId, ServicePatch},
    },
    ports::registry::{DEFAULT_LIST_LIMIT, ListQuery, RegistryError},
};

/// Control-plane failure rendered as `{"detail": "..."}`.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Auth(AuthError::Forbidden) => StatusCode::FORBIDDEN,
            ApiError::Auth(_) => StatusCode::UNAUTHORIZED,
            ApiError::Registry(RegistryError::Invalid(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Registry(RegistryError::DuplicateName(_)) => StatusCode::CONFLICT,
            ApiError::Registry(RegistryError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Registry(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Control plane request failed: {}", self);
        }

        let mut response = (status, Json(json!({ "detail": self.to_string() }))).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub offset: Option<usize>,
    pub limit: Option<usize>,
    pub blocked: Option<bool>,
}

impl From<ListParams> for ListQuery {
    fn from(params: ListParams) -> Self {
        ListQuery {
            offset: params.offset.unwrap_or(0),
            limit: params.limit.unwrap_or(DEFAULT_LIST_LIMIT),
            blocked: params.blocked,
        }
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "Alive and kicking!" }))
}

async fn openapi(State(gateway): State<Arc<GatewayService>>) -> impl IntoResponse {
    Json(gateway.schema().as_ref().clone())
}

async fn list_services(
    State(gateway): State<Arc<GatewayService>>,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(gateway.list_services(params.into()).await?))
}

async fn create_service(
    State(gateway): State<Arc<GatewayService>>,
    Json(service): Json<NewService>,
) -> Result<impl IntoResponse, ApiError> {
    let created = gateway.register_service(service).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_service(
    State(gateway): State<Arc<GatewayService>>,
    Path(id): Path<ServiceId>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(gateway.get_service(id).await?))
}

async fn patch_service(
    State(gateway): State<Arc<GatewayService>>,
    Path(id): Path<ServiceId>,
    Json(patch): Json<ServicePatch>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(gateway.update_service(id, patch).await?))
}

async fn delete_service(
    State(gateway): State<Arc<GatewayService>>,
    Path(id): Path<ServiceId>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(gateway.remove_service(id).await?))
}

async fn logout(
    State(gateway): State<Arc<GatewayService>>,
    Extension(claims): Extension<Claims>,
) -> StatusCode {
    gateway.logout(&claims).await;
    StatusCode::NO_CONTENT
}

fn not_found() -> Response {
    StatusCode::NOT_FOUND.into_response()
}

/// Catch-all: resolve the path against the routing table and forward.
///
/// A miss and a failed forward both answer 404; only the failure is logged.
async fn proxy(State(gateway): State<Arc<GatewayService>>, req: Request) -> Response {
    let path = req.uri().path().to_string();
    let Some(target) = gateway.resolve(&path).await else {
        return not_found();
    };

    tracing::info!("Redirecting request to '{}{}'", target.url, path);

    match gateway.forward(&target, req).await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(service = %target.name, "{}", e);
            not_found()
        }
    }
}

/// Build the full application router.
pub fn router(gateway: Arc<GatewayService>, cors: Option<CorsLayer>) -> Router {
    let admin = || middleware::from_fn_with_state(gateway.clone(), require_admin);

    // Methods a control path does not serve fall through to the proxy, unauthenticated,
    // because a registered service may own the same path.
    let mut app = Router::new()
        .route("/health", get(health).fallback(proxy))
        .route("/openapi.json", get(openapi).fallback(proxy))
        .route(
            "/services",
            get(list_services)
                .post(create_service)
                .route_layer(admin())
                .fallback(proxy),
        )
        .route(
            "/services/{id}",
            get(get_service)
                .patch(patch_service)
                .delete(delete_service)
                .route_layer(admin())
                .fallback(proxy),
        )
        .route(
            "/logout",
            post(logout)
                .route_layer(middleware::from_fn_with_state(gateway.clone(), require_user))
                .fallback(proxy),
        )
        .fallback(proxy)
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(request_id_middleware))
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(request_timing_middleware))
                .into_inner(),
        );

    if let Some(cors) = cors {
        app = app.layer(cors);
    }

    app.with_state(gateway)
}
