//! End-to-end session behaviour against a mock backend.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use reqwest::StatusCode;
use url::Url;
use vg_auth::{
    ApiRequest, CredentialPair, LoginCredentials, MemoryTokenStore, Principal, RenewalError,
    SessionManager, SessionState, StoredCredentials, TokenStore, VgAuthConfig, VgAuthError,
};
use wiremock::matchers::{bearer_token, body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// JWT-shaped token valid for half an hour; `tag` keeps tokens distinct
fn jwt(tag: &str) -> String {
    let exp = (Utc::now() + chrono::Duration::minutes(30)).timestamp();
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"{}","exp":{}}}"#, tag, exp));
    format!("{}.{}.sig", header, payload)
}

fn grant(access: &str, refresh: &str) -> serde_json::Value {
    serde_json::json!({
        "accessToken": access,
        "refreshToken": refresh,
        "expiresIn": 1800,
        "user": {"id": "7", "username": "ops", "role": "operator", "displayName": "Night Shift"}
    })
}

fn persisted_session(access: &str) -> MemoryTokenStore {
    MemoryTokenStore::with_credentials(StoredCredentials {
        pair: CredentialPair::new(access.to_string(), "refresh-0".to_string(), 1800),
        principal: Some(Principal {
            id: "7".to_string(),
            username: "ops".to_string(),
            role: Some("operator".to_string()),
            display_name: None,
            email: None,
        }),
    })
}

fn config_for(server: &MockServer) -> VgAuthConfig {
    let mut config = VgAuthConfig::new(Url::parse(&server.uri()).unwrap());
    config.http_timeouts.request = Duration::from_millis(500);
    config
}

async fn ready_manager(server: &MockServer, persisted: &MemoryTokenStore) -> SessionManager {
    let manager = SessionManager::new(config_for(server), Arc::new(persisted.clone())).unwrap();
    manager.initialize().await;
    manager
}

async fn mount_cameras(server: &MockServer, accepted: &str) {
    Mock::given(method("GET"))
        .and(path("/api/cameras"))
        .and(bearer_token(accepted))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!(["lobby", "dock"])),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/cameras"))
        .respond_with(ResponseTemplate::new(401))
        .with_priority(10)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_login_then_dispatch() {
    let server = MockServer::start().await;
    let access = jwt("login");
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .and(body_json(serde_json::json!({"identifier": "ops", "password": "pw"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(grant(&access, "refresh-1")))
        .expect(1)
        .mount(&server)
        .await;
    mount_cameras(&server, &access).await;

    let persisted = MemoryTokenStore::new();
    let manager = ready_manager(&server, &persisted).await;
    assert_eq!(manager.state(), SessionState::Unauthenticated);

    let principal = manager.login(&LoginCredentials::new("ops", "pw")).await.unwrap();
    assert_eq!(principal.label(), "Night Shift");
    assert!(manager.is_authenticated());
    assert_eq!(persisted.load().await.unwrap().pair.access_token, access);

    let response = manager.dispatch(&ApiRequest::get("api/cameras")).await.unwrap();
    assert_eq!(response.json::<Vec<String>>().unwrap(), vec!["lobby", "dock"]);
}

#[tokio::test]
async fn test_rejected_login_stays_logged_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let manager = ready_manager(&server, &MemoryTokenStore::new()).await;
    let err = manager.login(&LoginCredentials::new("ops", "bad")).await.unwrap_err();

    assert!(matches!(err, VgAuthError::LoginRejected { .. }));
    assert!(!manager.is_authenticated());
}

#[tokio::test]
async fn test_simultaneous_refusals_trigger_one_refresh() {
    let server = MockServer::start().await;
    let stale = jwt("stale");
    let fresh = jwt("fresh");
    mount_cameras(&server, &fresh).await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_json(serde_json::json!({"refreshToken": "refresh-0"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(grant(&fresh, "refresh-1"))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let manager = ready_manager(&server, &persisted_session(&stale)).await;
    assert!(manager.is_authenticated());

    let calls: Vec<_> = (0..3)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.dispatch(&ApiRequest::get("api/cameras")).await })
        })
        .collect();

    for call in calls {
        assert_eq!(call.await.unwrap().unwrap().status, StatusCode::OK);
    }
    assert!(manager.is_authenticated());
}

#[tokio::test]
async fn test_refused_refresh_logs_out() {
    let server = MockServer::start().await;
    mount_cameras(&server, "never").await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let persisted = persisted_session(&jwt("stale"));
    let manager = ready_manager(&server, &persisted).await;

    let err = manager.dispatch(&ApiRequest::get("api/cameras")).await.unwrap_err();

    assert!(matches!(err, VgAuthError::Renewal(RenewalError::Rejected { status: 401 })));
    assert!(err.to_string().contains("please log in again"));
    assert_eq!(manager.state(), SessionState::Unauthenticated);
    assert!(!manager.is_authenticated());
    assert!(manager.principal().is_none());
    assert!(persisted.load().await.is_none());
}

#[tokio::test]
async fn test_refresh_timeout_keeps_session() {
    let server = MockServer::start().await;
    let stale = jwt("stale");
    let fresh = jwt("fresh");
    mount_cameras(&server, &fresh).await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(grant(&fresh, "refresh-1"))
                .set_delay(Duration::from_secs(3)),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;

    let persisted = persisted_session(&stale);
    let manager = ready_manager(&server, &persisted).await;

    let err = manager.dispatch(&ApiRequest::get("api/cameras")).await.unwrap_err();
    assert!(matches!(err, VgAuthError::Renewal(RenewalError::NetworkUnavailable(_))));
    assert_eq!(manager.state(), SessionState::Authenticated);
    assert_eq!(persisted.load().await.unwrap().pair.access_token, stale);

    // The network is back; the next call renews normally
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(grant(&fresh, "refresh-1")))
        .mount(&server)
        .await;

    let response = manager.dispatch(&ApiRequest::get("api/cameras")).await.unwrap();
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(persisted.load().await.unwrap().pair.refresh_token, "refresh-1");
}

#[tokio::test]
async fn test_second_refusal_is_not_retried_again() {
    let server = MockServer::start().await;
    mount_cameras(&server, "never").await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(grant(&jwt("fresh"), "refresh-1")))
        .expect(1)
        .mount(&server)
        .await;

    let manager = ready_manager(&server, &persisted_session(&jwt("stale"))).await;

    let err = manager.dispatch(&ApiRequest::get("api/cameras")).await.unwrap_err();

    assert!(matches!(
        err,
        VgAuthError::GateRetryExhausted { status } if status == StatusCode::UNAUTHORIZED
    ));
    // Only this request failed
    assert!(manager.is_authenticated());
}

#[tokio::test]
async fn test_logout_notifies_authority_and_clears_disk() {
    let server = MockServer::start().await;
    let access = jwt("current");
    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .and(bearer_token(access.as_str()))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let persisted = persisted_session(&access);
    let manager = ready_manager(&server, &persisted).await;

    manager.logout();
    assert!(!manager.is_authenticated());

    manager.close().await;
    assert!(persisted.load().await.is_none());
    assert_eq!(manager.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_logout_survives_unreachable_authority() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let persisted = persisted_session(&jwt("current"));
    let manager = ready_manager(&server, &persisted).await;

    manager.logout();
    manager.close().await;
    assert!(persisted.load().await.is_none());
}
