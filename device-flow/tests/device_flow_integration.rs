//! End-to-end runs of the device flow against a mock authorization server.

use std::sync::Mutex;
use std::time::Duration;

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use oidc_device_flow::oidc::DiscoveryError;
use oidc_device_flow::{
    DeviceAuthorizationRequest, DeviceFlow, FlowError, FlowEvents, FlowFailure, FlowOutcome,
    FlowSettings, FlowSuccess,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SIGNING_KEY: &str = include_str!("fixtures/signing_key.pem");
const SIGNING_KEY_N: &str = "sxCSJtxZ7dKTnF4AFBpV9vwSuvWYDtyzw7idON_U9SjzMUFhyfarYyZF7VEL5746smXBX7t_yNV-uIi3RFgmMAi09q7p0ZO-bf8rcUgqkJVx_-0h21eSF3uHXY-vGtSy3_-dz5h47px-Vwd-9WvXaSuo1GshpB1B7EIqWzZEe8aAPY7WbeKvlGL4hdDbErOWReulStdOvokvU8_vJ7V2NJUWNEA2DJH9_q_Ac_ACFDDMRSEKBXPTyFA24Jc70Hb5l3ogopkjsqVYPt50dc7D5948d19EKY7gWJRtR8vZPVNo_IYqDC7RpClXj_x6g_tUpN-81AQYuwo4VhJeOZ7fDQ";
const CLIENT_ID: &str = "device-client";

#[derive(Default)]
struct RecordingEvents {
    events: Mutex<Vec<String>>,
}

impl RecordingEvents {
    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl FlowEvents for RecordingEvents {
    fn show_code(&self, user_code: &str, _verification_uri: Option<&str>, expires_in: u64) {
        self.push(format!("code {} {}", user_code, expires_in));
    }

    fn open_browser(&self, uri: &str) {
        self.push(format!("browser {}", uri));
    }

    fn pending_notice(&self) {
        self.push("pending".to_string());
    }

    fn success(&self, result: &FlowSuccess) {
        self.push(format!("success {}", result.tokens.access_token));
    }

    fn failure(&self, failure: &FlowFailure) {
        self.push(format!("failure {:?}", failure));
    }
}

fn issuer(server: &MockServer) -> String {
    format!("{}/", server.uri())
}

async fn mount_discovery(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issuer": issuer(server),
            "device_authorization_endpoint": format!("{}/oauth/device/code", server.uri()),
            "token_endpoint": format!("{}/oauth/token", server.uri()),
            "userinfo_endpoint": format!("{}/userinfo", server.uri()),
            "jwks_uri": format!("{}/.well-known/jwks.json", server.uri()),
            "id_token_signing_alg_values_supported": ["HS256", "RS256"]
        })))
        .mount(server)
        .await;
}

async fn mount_device_code(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/oauth/device/code"))
        .and(body_string_contains("client_id=device-client"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "device_code": "dev-code-123",
            "user_code": "WDJB-MJHT",
            "verification_uri": format!("{}/activate", server.uri()),
            "verification_uri_complete": format!("{}/activate?user_code=WDJB-MJHT", server.uri()),
            "expires_in": 300
        })))
        .mount(server)
        .await;
}

async fn mount_jwks(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/.well-known/jwks.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "keys": [{
                "kty": "RSA",
                "kid": "key-1",
                "alg": "RS256",
                "use": "sig",
                "n": SIGNING_KEY_N,
                "e": "AQAB"
            }]
        })))
        .mount(server)
        .await;
}

async fn mount_token(server: &MockServer, template: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("device_code=dev-code-123"))
        .respond_with(template)
        .mount(server)
        .await;
}

async fn mount_userinfo(server: &MockServer, template: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .and(header("authorization", "Bearer access-abc"))
        .respond_with(template)
        .mount(server)
        .await;
}

fn id_token(server: &MockServer, aud: &str) -> String {
    let now = chrono::Utc::now().timestamp();
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some("key-1".to_string());
    encode(
        &header,
        &json!({
            "iss": issuer(server),
            "sub": "auth0|123",
            "aud": aud,
            "exp": now + 600,
            "iat": now,
            "email": "jane@example.com"
        }),
        &EncodingKey::from_rsa_pem(SIGNING_KEY.as_bytes()).unwrap(),
    )
    .unwrap()
}

fn settings() -> FlowSettings {
    // The device code response carries no interval, so this is the polling interval.
    FlowSettings {
        default_interval: Duration::from_millis(10),
        ..FlowSettings::default()
    }
    .with_request_timeout(Duration::from_secs(5))
}

fn request() -> DeviceAuthorizationRequest {
    DeviceAuthorizationRequest::new(CLIENT_ID).with_scopes(["openid", "profile"])
}

async fn run(server: &MockServer, events: &RecordingEvents) -> Result<FlowOutcome, FlowError> {
    DeviceFlow::new(settings())
        .unwrap()
        .run(&server.uri(), &request(), events)
        .await
}

#[tokio::test]
async fn test_full_flow_with_id_token_and_userinfo() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    mount_device_code(&server).await;
    mount_jwks(&server).await;
    mount_token(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-abc",
            "token_type": "Bearer",
            "expires_in": 86400,
            "id_token": id_token(&server, CLIENT_ID),
            "scope": "openid profile"
        })),
    )
    .await;
    mount_userinfo(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({"sub": "auth0|123", "name": "Jane Doe"})),
    )
    .await;

    let events = RecordingEvents::default();
    let outcome = run(&server, &events).await.unwrap();

    let FlowOutcome::Success(success) = outcome else {
        panic!("expected success");
    };
    assert_eq!(success.tokens.access_token, "access-abc");
    let claims = success.claims.as_ref().unwrap();
    assert_eq!(claims.sub, "auth0|123");
    assert_eq!(claims.additional["email"], "jane@example.com");
    assert_eq!(success.userinfo.as_ref().unwrap()["name"], "Jane Doe");

    assert_eq!(
        events.events(),
        vec![
            "code WDJB-MJHT 300".to_string(),
            format!("browser {}/activate?user_code=WDJB-MJHT", server.uri()),
            "success access-abc".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_pending_then_success_notifies_once() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    mount_device_code(&server).await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"error": "authorization_pending"})),
        )
        .up_to_n_times(2)
        .mount(&server)
        .await;
    mount_token(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({"access_token": "access-abc"})),
    )
    .await;
    mount_userinfo(&server, ResponseTemplate::new(200).set_body_json(json!({}))).await;

    let events = RecordingEvents::default();
    let outcome = run(&server, &events).await.unwrap();

    assert!(outcome.is_success());
    let recorded = events.events();
    assert_eq!(recorded.iter().filter(|e| *e == "pending").count(), 1);
    assert_eq!(recorded.last().unwrap(), "success access-abc");
}

#[tokio::test]
async fn test_grant_without_id_token_skips_validation() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    mount_device_code(&server).await;
    // JWKS must never be consulted without an ID token.
    Mock::given(method("GET"))
        .and(path("/.well-known/jwks.json"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;
    mount_token(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({"access_token": "access-abc"})),
    )
    .await;
    mount_userinfo(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({"sub": "auth0|123"})),
    )
    .await;

    let events = RecordingEvents::default();
    let outcome = run(&server, &events).await.unwrap();

    let FlowOutcome::Success(success) = outcome else {
        panic!("expected success");
    };
    assert!(success.claims.is_none());
    assert_eq!(success.userinfo.as_ref().unwrap()["sub"], "auth0|123");
}

#[tokio::test]
async fn test_empty_id_token_is_treated_as_absent() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    mount_device_code(&server).await;
    Mock::given(method("GET"))
        .and(path("/.well-known/jwks.json"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;
    mount_token(
        &server,
        ResponseTemplate::new(200)
            .set_body_json(json!({"access_token": "access-abc", "id_token": ""})),
    )
    .await;
    mount_userinfo(&server, ResponseTemplate::new(200).set_body_json(json!({}))).await;

    let events = RecordingEvents::default();
    let outcome = run(&server, &events).await.unwrap();

    let FlowOutcome::Success(success) = outcome else {
        panic!("expected success");
    };
    assert!(success.claims.is_none());
}

#[tokio::test]
async fn test_wrong_audience_aborts_run() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    mount_device_code(&server).await;
    mount_jwks(&server).await;
    mount_token(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-abc",
            "id_token": id_token(&server, "someone-else")
        })),
    )
    .await;

    let events = RecordingEvents::default();
    let err = run(&server, &events).await.unwrap_err();

    assert!(matches!(err, FlowError::TokenValidation(_)));
    assert!(!events.events().iter().any(|e| e.starts_with("success")));
}

#[tokio::test]
async fn test_userinfo_failure_still_succeeds() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    mount_device_code(&server).await;
    mount_token(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({"access_token": "access-abc"})),
    )
    .await;
    mount_userinfo(&server, ResponseTemplate::new(403)).await;

    let events = RecordingEvents::default();
    let outcome = run(&server, &events).await.unwrap();

    let FlowOutcome::Success(success) = outcome else {
        panic!("expected success");
    };
    assert!(success.userinfo.is_none());
}

#[tokio::test]
async fn test_denied_reports_failure() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    mount_device_code(&server).await;
    mount_token(
        &server,
        ResponseTemplate::new(403).set_body_json(json!({
            "error": "access_denied",
            "error_description": "User cancelled the confirmation prompt"
        })),
    )
    .await;

    let events = RecordingEvents::default();
    let outcome = run(&server, &events).await.unwrap();

    assert!(matches!(outcome, FlowOutcome::Failed(FlowFailure::Denied)));
    assert_eq!(events.events().last().unwrap(), "failure Denied");
}

#[tokio::test]
async fn test_expired_token_reports_failure() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    mount_device_code(&server).await;
    mount_token(
        &server,
        ResponseTemplate::new(400).set_body_json(json!({"error": "expired_token"})),
    )
    .await;

    let events = RecordingEvents::default();
    let outcome = run(&server, &events).await.unwrap();

    assert!(matches!(outcome, FlowOutcome::Failed(FlowFailure::Expired)));
}

#[tokio::test]
async fn test_unknown_oauth_error_is_surfaced() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    mount_device_code(&server).await;
    mount_token(
        &server,
        ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Invalid or expired device code."
        })),
    )
    .await;

    let events = RecordingEvents::default();
    let outcome = run(&server, &events).await.unwrap();

    match outcome {
        FlowOutcome::Failed(FlowFailure::Protocol { code, description }) => {
            assert_eq!(code, "invalid_grant");
            assert_eq!(description.as_deref(), Some("Invalid or expired device code."));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test]
async fn test_discovery_without_device_endpoint_aborts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issuer": issuer(&server),
            "token_endpoint": format!("{}/oauth/token", server.uri())
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth/device/code"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let events = RecordingEvents::default();
    let err = run(&server, &events).await.unwrap_err();

    assert!(matches!(
        err,
        FlowError::Discovery(DiscoveryError::MissingField {
            field: "device_authorization_endpoint",
            ..
        })
    ));
    assert!(events.events().is_empty());
}

#[tokio::test]
async fn test_discovery_accepts_mixed_case_host() {
    let server = MockServer::start().await;
    let port = server.address().port();
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issuer": format!("http://localhost:{}/", port),
            "device_authorization_endpoint": format!("http://localhost:{}/oauth/device/code", port),
            "token_endpoint": format!("http://localhost:{}/oauth/token", port)
        })))
        .mount(&server)
        .await;

    let flow = DeviceFlow::new(settings()).unwrap();
    let metadata = flow
        .resolver()
        .discover(&format!("http://LocalHost:{}", port))
        .await
        .unwrap();

    assert_eq!(metadata.issuer, format!("http://localhost:{}/", port));
}

#[tokio::test]
async fn test_discovery_is_memoized() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issuer": issuer(&server),
            "device_authorization_endpoint": format!("{}/oauth/device/code", server.uri()),
            "token_endpoint": format!("{}/oauth/token", server.uri())
        })))
        .expect(1)
        .mount(&server)
        .await;

    let flow = DeviceFlow::new(settings()).unwrap();
    let first = flow.resolver().discover(&server.uri()).await.unwrap();
    let second = flow
        .resolver()
        .discover(&format!("{}/", server.uri()))
        .await
        .unwrap();

    assert_eq!(first, second);
    assert!(first.userinfo_endpoint.is_none());
}

#[tokio::test]
async fn test_device_authorization_rejected() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("POST"))
        .and(path("/oauth/device/code"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "unauthorized_client",
            "error_description": "Grant type not allowed for the client."
        })))
        .mount(&server)
        .await;

    let events = RecordingEvents::default();
    let err = run(&server, &events).await.unwrap_err();

    assert!(matches!(err, FlowError::AuthorizationRequest(_)));
    assert!(err.to_string().contains("unauthorized_client"));
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let flow = DeviceFlow::new(settings())
        .unwrap()
        .with_cancellation(cancel);

    let events = RecordingEvents::default();
    let err = flow
        .run(&server.uri(), &request(), &events)
        .await
        .unwrap_err();

    assert!(matches!(err, FlowError::Cancelled));
}
