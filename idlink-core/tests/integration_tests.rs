//! Integration tests for idlink-core
//!
//! Drives the real Google and GitHub adapters against a mock upstream,
//! wired together by `init_services` over the in-memory store.
//!
//! Run with: cargo test --test integration_tests

use idlink_core::{
    bootstrap::init_services,
    oauth2::ProviderConfig,
    service::{CallbackOutcome, ReconciliationEngine},
    Config, Error,
};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn provider(server: &MockServer, name: &str) -> ProviderConfig {
    ProviderConfig {
        client_id: format!("{name}-client"),
        client_secret: format!("{name}-secret"),
        redirect_url: format!("https://app.example.com/api/oauth/{name}/callback"),
        token_url: Some(format!("{}/{name}/token", server.uri())),
        userinfo_url: Some(format!("{}/{name}/user", server.uri())),
        emails_url: Some(format!("{}/{name}/user/emails", server.uri())),
        ..ProviderConfig::default()
    }
}

fn engine_for(server: &MockServer) -> std::sync::Arc<ReconciliationEngine> {
    let mut config = Config::default();
    config.oauth.providers.insert("google".to_string(), provider(server, "google"));
    config.oauth.providers.insert("github".to_string(), provider(server, "github"));

    let services = init_services(None, &config).unwrap();
    assert_eq!(services.registry.list_names(), vec!["github", "google"]);
    services.engine
}

async fn mount_google(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/google/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "ya29.google-access",
            "refresh_token": "1//google-refresh",
            "expires_in": 3599,
            "token_type": "Bearer"
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/google/user"))
        .and(header("authorization", "Bearer ya29.google-access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "1080",
            "email": "Dana@Example.com",
            "name": "Dana"
        })))
        .mount(server)
        .await;
}

async fn mount_github(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/github/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "gho_github-access",
            "token_type": "bearer",
            "scope": "read:user,user:email"
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/github/user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": 583231,
            "login": "dana",
            "name": null,
            "email": null
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/github/user/emails"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            { "email": "old@example.com", "primary": false, "verified": true },
            { "email": "dana@example.com", "primary": true, "verified": true }
        ])))
        .mount(server)
        .await;
}

async fn login_and_callback(
    engine: &ReconciliationEngine,
    name: &str,
    code: &str,
) -> idlink_core::Result<CallbackOutcome> {
    let redirect = engine.login_url(name, None).await?;
    engine
        .handle_callback(name, Some(code), Some(&redirect.state), &CancellationToken::new())
        .await
}

#[tokio::test]
async fn test_cross_provider_login_links_one_identity() {
    let server = MockServer::start().await;
    mount_google(&server).await;
    mount_github(&server).await;
    let engine = engine_for(&server);

    let first = login_and_callback(&engine, "google", "g-code").await.unwrap();
    assert!(first.identity_created);
    assert!(first.connection_created);
    assert_eq!(first.identity.email, "dana@example.com");
    assert_eq!(first.access_token, "ya29.google-access");
    assert_eq!(first.expires_in, Some(3599));

    let second = login_and_callback(&engine, "github", "gh-code").await.unwrap();
    assert!(!second.identity_created);
    assert!(second.connection_created);
    assert_eq!(second.identity.id, first.identity.id);
    assert_eq!(second.expires_in, None);

    // Repeat login through the first provider takes the known-connection path
    let repeat = login_and_callback(&engine, "google", "g-code-2").await.unwrap();
    assert!(!repeat.identity_created);
    assert!(!repeat.connection_created);
    assert_eq!(repeat.identity.id, first.identity.id);
}

#[tokio::test]
async fn test_login_url_targets_configured_client() {
    let server = MockServer::start().await;
    let engine = engine_for(&server);

    let redirect = engine.login_url("google", None).await.unwrap();
    let url = url::Url::parse(&redirect.url).unwrap();
    assert_eq!(url.host_str(), Some("accounts.google.com"));

    let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
    assert_eq!(pairs["client_id"], "google-client");
    assert_eq!(pairs["state"], redirect.state);
    assert_eq!(pairs["redirect_uri"], "https://app.example.com/api/oauth/google/callback");
}

#[tokio::test]
async fn test_rejected_code_creates_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/google/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_grant"
        })))
        .mount(&server)
        .await;
    let engine = engine_for(&server);

    let err = login_and_callback(&engine, "google", "stale").await.unwrap_err();
    assert!(matches!(err, Error::TokenExchangeFailed { ref provider, .. } if provider == "google"));

    // No user-info call was made
    let requests = server.received_requests().await.unwrap();
    assert!(requests.iter().all(|r| r.url.path() != "/google/user"));
}

#[tokio::test]
async fn test_refresh_through_real_adapter() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/google/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=1%2F%2Fgoogle-refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "ya29.renewed",
            "expires_in": 3599,
            "token_type": "Bearer"
        })))
        .mount(&server)
        .await;
    let engine = engine_for(&server);

    let refreshed = engine
        .refresh_access_token("1//google-refresh", "google", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(refreshed.access_token, "ya29.renewed");
    assert_eq!(refreshed.expires_in, Some(3599));
}
