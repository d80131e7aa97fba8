// Control-plane endpoints: bearer authentication, admin checks and registry CRUD.
use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, Response, StatusCode, header},
};
use chrono::Utc;
use kinetix::{
    GatewayService, InMemoryRegistry,
    adapters::router,
    config::GatewayConfig,
    core::auth::{Claims, issue_token},
    ports::http_client::{HttpClient, HttpClientError, HttpClientResult},
};
use serde_json::{Value, json};
use tower::ServiceExt; // for oneshot

const SECRET: &str = "control-plane-secret";

struct StaticClient;

#[async_trait]
impl HttpClient for StaticClient {
    async fn send_request(&self, _req: Request<Body>) -> HttpClientResult<Response<Body>> {
        Err(HttpClientError::ConnectionError("unused".to_string()))
    }

    async fn probe(&self, url: &str, _timeout: Duration) -> HttpClientResult<bool> {
        Ok(url.starts_with("http://users"))
    }

    async fn fetch_json(&self, url: &str, _timeout: Duration) -> HttpClientResult<Value> {
        Err(HttpClientError::ConnectionError(url.to_string()))
    }
}

fn app() -> Router {
    let mut config = GatewayConfig::default();
    config.auth.secret = SECRET.to_string();
    let gateway = GatewayService::new(
        &config,
        Arc::new(InMemoryRegistry::new()),
        Arc::new(StaticClient),
    )
    .unwrap();
    router(Arc::new(gateway), None)
}

fn token(sub: u64, admin: bool) -> String {
    let now = Utc::now().timestamp();
    issue_token(
        &Claims {
            sub,
            iat: now,
            exp: now + 300,
            email: format!("user{sub}@example.com"),
            admin,
        },
        SECRET,
    )
    .unwrap()
}

fn request(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn json_body(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_services_require_admin_token() {
    let app = app();

    let response = app
        .clone()
        .oneshot(request(Method::GET, "/services", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers().get(header::WWW_AUTHENTICATE).unwrap(), "Bearer");

    let response = app
        .clone()
        .oneshot(request(Method::GET, "/services", Some("not-a-jwt"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        json_body(response).await["detail"],
        "Token is invalid or has expired"
    );

    let user = token(7, false);
    let response = app
        .clone()
        .oneshot(request(Method::GET, "/services", Some(&user), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        json_body(response).await["detail"],
        "Action requires admin permissions"
    );

    let admin = token(1, true);
    let response = app
        .oneshot(request(Method::GET, "/services", Some(&admin), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!([]));
}

#[tokio::test]
async fn test_token_signed_with_other_secret_is_rejected() {
    let now = Utc::now().timestamp();
    let forged = issue_token(
        &Claims {
            sub: 1,
            iat: now,
            exp: now + 300,
            email: "admin@example.com".to_string(),
            admin: true,
        },
        "some-other-secret",
    )
    .unwrap();

    let response = app()
        .oneshot(request(Method::GET, "/services", Some(&forged), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_service_crud() {
    let app = app();
    let admin = token(1, true);

    let response = app
        .clone()
        .oneshot(request(
            Method::POST,
            "/services",
            Some(&admin),
            Some(json!({"name": "users", "url": "http://users:8000", "path": "^/users.*"})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = json_body(response).await;
    assert_eq!(created["id"], 1);
    assert_eq!(created["name"], "users");
    assert_eq!(created["blocked"], false);
    assert_eq!(created["apikey"].as_str().unwrap().len(), 43);

    let response = app
        .clone()
        .oneshot(request(
            Method::POST,
            "/services",
            Some(&admin),
            Some(json!({"name": "users", "url": "http://other", "path": "^/other"})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .clone()
        .oneshot(request(
            Method::POST,
            "/services",
            Some(&admin),
            Some(json!({"name": "orders", "url": "orders:8000", "path": "^/orders"})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let response = app
        .clone()
        .oneshot(request(Method::GET, "/services/1", Some(&admin), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let fetched = json_body(response).await;
    assert_eq!(fetched["up"], true);
    assert!(fetched.get("apikey").is_none());

    let response = app
        .clone()
        .oneshot(request(
            Method::PATCH,
            "/services/1",
            Some(&admin),
            Some(json!({"blocked": true})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["blocked"], true);

    let response = app
        .clone()
        .oneshot(request(
            Method::GET,
            "/services?blocked=false",
            Some(&admin),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(json_body(response).await, json!([]));

    let response = app
        .clone()
        .oneshot(request(Method::DELETE, "/services/1", Some(&admin), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(request(Method::GET, "/services/1", Some(&admin), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_logout_revokes_only_that_token() {
    let app = app();
    let now = Utc::now().timestamp();
    let session = |iat: i64| {
        issue_token(
            &Claims {
                sub: 5,
                iat,
                exp: now + 300,
                email: "admin@example.com".to_string(),
                admin: true,
            },
            SECRET,
        )
        .unwrap()
    };
    let first = session(now);
    let second = session(now - 10);

    let response = app
        .clone()
        .oneshot(request(Method::POST, "/logout", Some(&first), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .clone()
        .oneshot(request(Method::POST, "/logout", Some(&first), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(request(Method::GET, "/services", Some(&second), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_openapi_lists_control_plane() {
    let response = app()
        .oneshot(request(Method::GET, "/openapi.json", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let schema = json_body(response).await;
    assert_eq!(schema["info"]["title"], "Kinetix");
    assert!(schema["paths"].get("/services/{id}").is_some());
    assert!(schema["paths"].get("/logout").is_some());
}
