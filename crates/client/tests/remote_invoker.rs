use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::Router;
use dirpilot_client::RemoteInvoker;
use dirpilot_core::{Credential, InvocationResult, Parameters, ToolCatalog};

const LIVE_USERS: &str =
    r#"[{"id":"u-1","dispalyName":"Live User","email":"live@contoso.com","type":"User"}]"#;

#[derive(Clone, Default)]
struct Recorder {
    hits: Arc<AtomicUsize>,
    last_authorization: Arc<Mutex<Option<String>>>,
    last_query: Arc<Mutex<HashMap<String, String>>>,
}

async fn users(
    State(recorder): State<Recorder>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> (StatusCode, String) {
    recorder.hits.fetch_add(1, Ordering::SeqCst);
    let authorization =
        headers.get("authorization").and_then(|value| value.to_str().ok()).map(str::to_string);
    *recorder.last_authorization.lock().expect("lock") = authorization;
    *recorder.last_query.lock().expect("lock") = query;
    (StatusCode::OK, LIVE_USERS.to_string())
}

async fn assign() -> (StatusCode, String) {
    (StatusCode::UNAUTHORIZED, String::new())
}

async fn roles() -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, "graph unavailable".to_string())
}

async fn weather() -> (StatusCode, String) {
    tokio::time::sleep(Duration::from_millis(800)).await;
    (StatusCode::OK, "[]".to_string())
}

async fn spawn_directory(recorder: Recorder) -> String {
    let router = Router::new()
        .route("/User/manage", get(users))
        .route("/Roles/assign", get(assign))
        .route("/Roles", get(roles))
        .route("/WeatherForecast", get(weather))
        .with_state(recorder);
    let listener =
        tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind test listener");
    let address = listener.local_addr().expect("listener address");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("test server runs");
    });
    format!("http://{address}")
}

fn params(pairs: &[(&str, &str)]) -> Parameters {
    pairs.iter().map(|(key, value)| (key.to_string(), value.to_string())).collect()
}

fn invoker(base_url: &str, simple_timeout: Duration) -> RemoteInvoker {
    RemoteInvoker::new(base_url, Duration::from_secs(5), simple_timeout).expect("invoker")
}

fn credential() -> Credential {
    Credential::new("test-access-token", None)
}

#[tokio::test]
async fn success_returns_body_verbatim_and_sends_bearer() {
    let recorder = Recorder::default();
    let base_url = spawn_directory(recorder.clone()).await;
    let invoker = invoker(&base_url, Duration::from_secs(5));
    let catalog = ToolCatalog::builtin();
    let tool = catalog.lookup("GetB2CUsers").expect("tool");

    let result = invoker.invoke(tool, &params(&[("action", "all")]), &credential()).await;

    assert_eq!(result, InvocationResult::Success { body: LIVE_USERS.to_string() });
    assert_eq!(
        recorder.last_authorization.lock().expect("lock").as_deref(),
        Some("Bearer test-access-token")
    );
    let query = recorder.last_query.lock().expect("lock");
    assert_eq!(query.get("action").map(String::as_str), Some("all"));
}

#[tokio::test]
async fn identical_reads_are_two_independent_calls() {
    let recorder = Recorder::default();
    let base_url = spawn_directory(recorder.clone()).await;
    let invoker = invoker(&base_url, Duration::from_secs(5));
    let catalog = ToolCatalog::builtin();
    let tool = catalog.lookup("GetB2CUsers").expect("tool");
    let parameters = params(&[("action", "by-role"), ("roleName", "Admin"), ("appName", "My App")]);

    let first = invoker.invoke(tool, &parameters, &credential()).await;
    let second = invoker.invoke(tool, &parameters, &credential()).await;

    assert!(first.is_success());
    assert!(second.is_success());
    assert_eq!(recorder.hits.load(Ordering::SeqCst), 2);
    let query = recorder.last_query.lock().expect("lock");
    assert_eq!(query.get("appName").map(String::as_str), Some("My App"));
}

#[tokio::test]
async fn unauthorized_status_is_classified() {
    let base_url = spawn_directory(Recorder::default()).await;
    let invoker = invoker(&base_url, Duration::from_secs(5));
    let catalog = ToolCatalog::builtin();
    let tool = catalog.lookup("AssignRoleToUser").expect("tool");

    let parameters =
        params(&[("username", "john@example.com"), ("appName", "MyApp"), ("roleName", "Admin")]);

    let result = invoker.invoke(tool, &parameters, &credential()).await;

    assert_eq!(result, InvocationResult::Unauthorized);
}

#[tokio::test]
async fn server_error_keeps_status_and_body() {
    let base_url = spawn_directory(Recorder::default()).await;
    let invoker = invoker(&base_url, Duration::from_secs(5));
    let catalog = ToolCatalog::builtin();
    let tool = catalog.lookup("GetApplicationRoles").expect("tool");

    let result = invoker.invoke(tool, &params(&[("appName", "MyApp")]), &credential()).await;

    assert_eq!(
        result,
        InvocationResult::RemoteError { status: 500, body: "graph unavailable".to_string() }
    );
}

#[tokio::test]
async fn slow_simple_call_times_out_as_transport_error() {
    let base_url = spawn_directory(Recorder::default()).await;
    let invoker = invoker(&base_url, Duration::from_millis(150));
    let catalog = ToolCatalog::builtin();
    let tool = catalog.lookup("GetWeatherAuthAPI").expect("tool");

    let result = invoker.invoke(tool, &Parameters::new(), &credential()).await;

    assert!(matches!(
        result,
        InvocationResult::TransportError { ref cause } if cause.contains("timed out")
    ));
}

#[tokio::test]
async fn refused_connection_is_transport_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let address = listener.local_addr().expect("address");
    drop(listener);
    let invoker = invoker(&format!("http://{address}"), Duration::from_secs(2));
    let catalog = ToolCatalog::builtin();
    let tool = catalog.lookup("GetB2CApplications").expect("tool");

    let result = invoker.invoke(tool, &Parameters::new(), &credential()).await;

    assert!(matches!(result, InvocationResult::TransportError { .. }));
}
