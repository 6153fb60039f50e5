// Module: http
// HTTP/JSON boundary over the reconciliation engine

pub mod error;
pub mod health;
pub mod oauth2;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use idlink_core::service::ReconciliationEngine;

pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ReconciliationEngine>,
    /// Root token; every request flow runs under a child of it
    pub shutdown: CancellationToken,
}

impl AppState {
    pub const fn new(engine: Arc<ReconciliationEngine>, shutdown: CancellationToken) -> Self {
        Self { engine, shutdown }
    }
}

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    let oauth_routes = Router::new()
        .route("/providers", get(oauth2::list_providers))
        .route("/token/refresh", post(oauth2::refresh_token))
        .route("/{provider}/login", get(oauth2::login))
        .route("/{provider}/callback", get(oauth2::callback));

    let router = Router::new()
        .nest("/api/oauth", oauth_routes)
        .merge(health::create_health_router())
        .with_state(state);
    with_middleware(router)
}

/// Request tracing outside panic recovery, so recovered panics are traced as 500s
fn with_middleware(router: Router) -> Router {
    router
        .layer(CatchPanicLayer::custom(error::handle_panic))
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use idlink_core::{
        oauth2::StateStore,
        repository::memory::MemoryIdentityStore,
        test_helpers::{registry_with, StubProvider},
    };
    use serde_json::Value;
    use tower::util::ServiceExt;

    struct Harness {
        router: Router,
        store: Arc<MemoryIdentityStore>,
        shutdown: CancellationToken,
    }

    fn harness(providers: &[Arc<StubProvider>]) -> Harness {
        let store = Arc::new(MemoryIdentityStore::new());
        let engine = ReconciliationEngine::new(registry_with(providers), store.clone(), StateStore::default());
        let shutdown = CancellationToken::new();
        let router = create_router(AppState::new(Arc::new(engine), shutdown.clone()));
        Harness { router, store, shutdown }
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let h = harness(&[Arc::new(StubProvider::new("google"))]);
        let (status, body) = send(&h.router, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["providers"], 1);
    }

    #[tokio::test]
    async fn test_list_providers_sorted() {
        let h = harness(&[
            Arc::new(StubProvider::new("google")),
            Arc::new(StubProvider::new("github")),
        ]);
        let (status, body) = send(&h.router, get("/api/oauth/providers")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["providers"], serde_json::json!(["github", "google"]));
    }

    #[tokio::test]
    async fn test_login_then_callback_creates_identity() {
        let google = Arc::new(StubProvider::new("google").with_user("g-1", "Alice@Example.com", "Alice"));
        let h = harness(&[google.clone()]);

        let (status, login) = send(&h.router, get("/api/oauth/google/login")).await;
        assert_eq!(status, StatusCode::OK);
        let state = login["state"].as_str().unwrap().to_string();
        assert!(login["url"].as_str().unwrap().contains(&state));

        let uri = format!("/api/oauth/google/callback?code=abc&state={state}");
        let (status, body) = send(&h.router, get(&uri)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["email"], "alice@example.com");
        assert_eq!(body["access_token"], "google-at-abc-1");
        assert_eq!(body["expires_in"], 3600);
        assert!(body.get("redirect_url").is_none());
        assert!(body["user"].get("password_hash").is_none());
        assert_eq!(h.store.auth_count(), 1);
        assert_eq!(h.store.connection_count(), 1);

        // The state was consumed
        let (status, body) = send(&h.router, get(&uri)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], 400);
        assert_eq!(google.exchange_calls(), 1);
    }

    #[tokio::test]
    async fn test_login_redirect_is_echoed_on_callback() {
        let h = harness(&[Arc::new(StubProvider::new("github"))]);

        let (status, login) = send(
            &h.router,
            get("/api/oauth/github/login?redirect_uri=https%3A%2F%2Fapp.example.com%2Fdone"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let state = login["state"].as_str().unwrap();

        let (status, body) = send(&h.router, get(&format!("/api/oauth/github/callback?code=c&state={state}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["redirect_url"], "https://app.example.com/done");
    }

    #[tokio::test]
    async fn test_login_rejects_protocol_relative_redirect() {
        let h = harness(&[Arc::new(StubProvider::new("google"))]);
        let (status, body) = send(&h.router, get("/api/oauth/google/login?redirect_uri=%2F%2Fevil.example")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("redirect"));
    }

    #[tokio::test]
    async fn test_unknown_provider_is_bad_request_without_upstream_calls() {
        let google = Arc::new(StubProvider::new("google"));
        let h = harness(&[google.clone()]);

        let (status, _) = send(&h.router, get("/api/oauth/facebook/login")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send(&h.router, get("/api/oauth/facebook/callback?code=a&state=b")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(google.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_callback_missing_parameters() {
        let h = harness(&[Arc::new(StubProvider::new("google"))]);

        let (status, body) = send(&h.router, get("/api/oauth/google/callback?state=s")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing authorization code");

        let (status, body) = send(&h.router, get("/api/oauth/google/callback?code=c")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing state parameter");
    }

    #[tokio::test]
    async fn test_callback_surfaces_provider_error() {
        let google = Arc::new(StubProvider::new("google"));
        let h = harness(&[google.clone()]);

        let (status, body) = send(
            &h.router,
            get("/api/oauth/google/callback?error=access_denied&state=s"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("access_denied"));
        assert_eq!(google.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_exchange_is_bad_gateway() {
        let h = harness(&[Arc::new(StubProvider::new("google").failing_exchange())]);
        let (_, login) = send(&h.router, get("/api/oauth/google/login")).await;
        let state = login["state"].as_str().unwrap();

        let (status, body) = send(&h.router, get(&format!("/api/oauth/google/callback?code=c&state={state}"))).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["status"], 502);
        assert_eq!(h.store.auth_count(), 0);
    }

    #[tokio::test]
    async fn test_refresh_token() {
        let h = harness(&[Arc::new(StubProvider::new("github"))]);

        let (status, body) = send(
            &h.router,
            post_json(
                "/api/oauth/token/refresh",
                &serde_json::json!({ "refresh_token": "github-rt-1", "provider": "github" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["access_token"], "github-at-refreshed-1");
        assert_eq!(body["expires_in"], 3600);
        assert!(body.get("refresh_token").is_none());
    }

    #[tokio::test]
    async fn test_refresh_token_rejects_empty_token() {
        let h = harness(&[Arc::new(StubProvider::new("github"))]);
        let (status, _) = send(
            &h.router,
            post_json(
                "/api/oauth/token/refresh",
                &serde_json::json!({ "refresh_token": "", "provider": "github" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_flows() {
        let h = harness(&[Arc::new(StubProvider::new("github"))]);
        h.shutdown.cancel();

        let (status, body) = send(
            &h.router,
            post_json(
                "/api/oauth/token/refresh",
                &serde_json::json!({ "refresh_token": "rt", "provider": "github" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], 503);
    }

    #[tokio::test]
    async fn test_handler_panic_becomes_500() {
        async fn boom() -> &'static str {
            panic!("state map poisoned: secret detail");
        }
        let router = with_middleware(Router::new().route("/boom", axum::routing::get(boom)));

        let (status, body) = send(&router, get("/boom")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Internal server error");
        assert!(!body.to_string().contains("secret detail"));

        // The router keeps serving after a panic
        let (status, _) = send(&router, get("/boom")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
