use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Form, Json, Router};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{Duration, Utc};
use dirpilot_client::{
    AuthSession, CredentialOutcome, CredentialProvider, OAuthRefreshTokenSource, StaticTokenSource,
    UserContext,
};
use secrecy::SecretString;
use serde_json::{json, Value};

type Captured = Arc<Mutex<Vec<HashMap<String, String>>>>;

fn jwt_with_exp(seconds: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{seconds}}}"#));
    format!("{header}.{payload}.sig")
}

async fn token(
    State(captured): State<Captured>,
    Form(form): Form<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    let refresh = form.get("refresh_token").cloned().unwrap_or_default();
    captured.lock().expect("lock").push(form);
    match refresh.as_str() {
        "rt-good" => {
            let access = jwt_with_exp((Utc::now() + Duration::hours(1)).timestamp());
            let body =
                json!({"access_token": access, "refresh_token": "rt-rotated", "expires_in": 3600});
            (StatusCode::OK, Json(body))
        }
        "rt-unbounded" => {
            let expires_in = 9_000_000_000_000_000_000_i64;
            let body = json!({"access_token": "opaque-access", "expires_in": expires_in});
            (StatusCode::OK, Json(body))
        }
        "rt-revoked" => {
            let body = json!({
                "error": "invalid_grant",
                "error_description": "AADSTS70008: refresh token expired"
            });
            (StatusCode::BAD_REQUEST, Json(body))
        }
        _ => (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"error": "temporarily_unavailable"}))),
    }
}

async fn spawn_token_endpoint(captured: Captured) -> String {
    let router = Router::new().route("/oauth2/v2.0/token", post(token)).with_state(captured);
    let listener =
        tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind test listener");
    let address = listener.local_addr().expect("listener address");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("test server runs");
    });
    format!("http://{address}/oauth2/v2.0/token")
}

fn provider_for(endpoint: &str) -> CredentialProvider {
    let timeout = StdDuration::from_secs(5);
    let source =
        OAuthRefreshTokenSource::new(endpoint, "client-123", None, timeout).expect("source");
    let scopes = vec!["https://graph.microsoft.com/.default".to_string()];
    CredentialProvider::new(Arc::new(source), scopes, Duration::minutes(5))
}

fn session_with_refresh(refresh: &str, access: Option<String>) -> AuthSession {
    let user = UserContext {
        user_id: Some("user-1".to_string()),
        login_hint: Some("john@example.com".to_string()),
        refresh_token: Some(SecretString::from(refresh.to_string())),
    };
    AuthSession::signed_in(user, access)
}

#[tokio::test]
async fn expiring_token_is_refreshed_with_refresh_grant() {
    let captured = Captured::default();
    let endpoint = spawn_token_endpoint(captured.clone()).await;
    let provider = provider_for(&endpoint);
    let expiring = jwt_with_exp((Utc::now() + Duration::minutes(2)).timestamp());
    let mut session = session_with_refresh("rt-good", Some(expiring.clone()));

    let outcome = provider.acquire(&mut session).await;

    let CredentialOutcome::Ready(credential) = outcome else {
        panic!("expected a refreshed credential");
    };
    assert_ne!(credential.bearer_header(), format!("Bearer {expiring}"));
    let lower_bound = Utc::now() + Duration::minutes(50);
    assert!(credential.expires_at.is_some_and(|expiry| expiry > lower_bound));

    let requests = captured.lock().expect("lock");
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].get("grant_type").map(String::as_str), Some("refresh_token"));
    assert_eq!(requests[0].get("client_id").map(String::as_str), Some("client-123"));
    assert_eq!(
        requests[0].get("scope").map(String::as_str),
        Some("https://graph.microsoft.com/.default")
    );
}

#[tokio::test]
async fn refreshed_token_is_cached_in_session() {
    let captured = Captured::default();
    let endpoint = spawn_token_endpoint(captured.clone()).await;
    let provider = provider_for(&endpoint);
    let mut session = session_with_refresh("rt-good", None);

    let first = provider.acquire(&mut session).await;
    let second = provider.acquire(&mut session).await;

    assert!(matches!(first, CredentialOutcome::Ready(_)));
    assert!(matches!(second, CredentialOutcome::Ready(_)));
    assert_eq!(captured.lock().expect("lock").len(), 1);
}

#[tokio::test]
async fn invalid_grant_requires_sign_in() {
    let endpoint = spawn_token_endpoint(Captured::default()).await;
    let provider = provider_for(&endpoint);
    let mut session = session_with_refresh("rt-revoked", None);

    let outcome = provider.acquire(&mut session).await;

    assert!(matches!(
        outcome,
        CredentialOutcome::Unauthenticated { ref reason } if reason.starts_with("invalid_grant")
    ));
    assert!(!session.is_signed_in());
}

#[tokio::test]
async fn endpoint_outage_is_transient() {
    let endpoint = spawn_token_endpoint(Captured::default()).await;
    let provider = provider_for(&endpoint);
    let mut session = session_with_refresh("rt-other", None);

    let outcome = provider.acquire(&mut session).await;

    assert!(matches!(outcome, CredentialOutcome::Unauthenticated { .. }));
    assert!(session.is_signed_in());
}

#[tokio::test]
async fn expired_static_token_is_unauthenticated() {
    let expired = jwt_with_exp((Utc::now() - Duration::hours(1)).timestamp());
    let provider = CredentialProvider::new(
        Arc::new(StaticTokenSource::new(expired.clone())),
        vec!["api://dirpilot/.default".to_string()],
        Duration::minutes(5),
    );
    let mut session = AuthSession::signed_in(UserContext::default(), Some(expired));

    let outcome = provider.acquire(&mut session).await;

    assert!(matches!(outcome, CredentialOutcome::Unauthenticated { .. }));
}

#[tokio::test]
async fn unrepresentable_expires_in_leaves_expiry_unknown() {
    let endpoint = spawn_token_endpoint(Captured::default()).await;
    let provider = provider_for(&endpoint);
    let mut session = session_with_refresh("rt-unbounded", None);

    let outcome = provider.acquire(&mut session).await;

    let CredentialOutcome::Ready(credential) = outcome else {
        panic!("expected the opaque token to be usable");
    };
    assert_eq!(credential.bearer_header(), "Bearer opaque-access");
    assert!(credential.expires_at.is_none());
    assert!(session.is_signed_in());
}
