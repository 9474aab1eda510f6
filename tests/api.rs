use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;
use wayfarer::{
    config::{AiConfig, AppConfig},
    db::{init_pool, migrate},
    error::AppError,
    routes::create_router,
    services::{
        ai::{AiGateway, GenerativeBackend, Prompt},
        remote::MemoryTripCollection,
    },
    state::{AppState, SyncTasks},
};

struct ScriptedBackend {
    reply: Result<String, String>,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    fn replying(text: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(text.to_string()),
            calls: AtomicUsize::new(0),
        })
    }

    fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Err(message.to_string()),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl GenerativeBackend for ScriptedBackend {
    async fn generate(&self, _prompt: &Prompt) -> Result<String, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reply.clone().map_err(AppError::Upstream)
    }
}

struct TestApp {
    router: Router,
    tasks: SyncTasks,
    _root: TempDir,
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.tasks.abort();
    }
}

async fn spawn_app(backend: Arc<ScriptedBackend>) -> TestApp {
    let root = TempDir::new().expect("temp dir");
    let db_path = root.path().join("api.sqlite");
    let config = AppConfig {
        database_url: format!("sqlite://{}?mode=rwc", db_path.to_string_lossy()),
        listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        static_root: root.path().join("static"),
        ai: AiConfig::default(),
        client_id: "api-test".into(),
    };
    let db = init_pool(&config.database_url).await.expect("pool");
    migrate(&db).await.expect("migrations");
    let (state, tasks) = AppState::new(
        config,
        db,
        Arc::new(MemoryTripCollection::new()),
        AiGateway::new(backend),
    )
    .await
    .expect("state");
    TestApp {
        router: create_router(state),
        tasks,
        _root: root,
    }
}

async fn send(app: &TestApp, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(match body {
            Some(value) => Body::from(value.to_string()),
            None => Body::empty(),
        })
        .expect("request");
    let response = app.router.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

fn ai(action: &str, payload: Value) -> Option<Value> {
    Some(json!({ "action": action, "payload": payload }))
}

#[tokio::test]
async fn ai_endpoint_only_accepts_post() {
    let app = spawn_app(ScriptedBackend::replying("{}")).await;
    let (status, _) = send(&app, Method::GET, "/api/ai", None).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn unknown_action_is_rejected_before_the_backend_is_called() {
    let backend = ScriptedBackend::replying("{}");
    let app = spawn_app(backend.clone()).await;
    let (status, body) = send(&app, Method::POST, "/api/ai", ai("book-hotel", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["details"].as_str().unwrap().contains("book-hotel"));
    assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_payload_fields_are_a_client_error() {
    let backend = ScriptedBackend::replying("{}");
    let app = spawn_app(backend.clone()).await;
    let (status, _) = send(&app, Method::POST, "/api/ai", ai("batch-parse", json!({ "date": "2024-04-02" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn receipt_reply_in_a_code_fence_is_parsed() {
    let app = spawn_app(ScriptedBackend::replying("```json\n{\"amount\":100}\n```")).await;
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/ai",
        ai("analyze-receipt", json!({ "imageBase64": "data:image/png;base64,AAAA" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "amount": 100 }));
}

#[tokio::test]
async fn receipt_reply_without_json_falls_back_to_text() {
    let app = spawn_app(ScriptedBackend::replying("Sorry, I can't read this receipt")).await;
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/ai",
        ai("analyze-receipt", json!({ "imageBase64": "AAAA" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "text": "Sorry, I can't read this receipt" }));
}

#[tokio::test]
async fn transport_advice_is_returned_verbatim() {
    let app = spawn_app(ScriptedBackend::replying("  Walk 5 min, then {Ginza} line [exit 3]\n")).await;
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/ai",
        ai(
            "suggest-transport",
            json!({ "currentLocation": "Asakusa", "currentTitle": "Senso-ji" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "text": "Walk 5 min, then {Ginza} line [exit 3]" }));
}

#[tokio::test]
async fn backend_failure_is_a_server_error_with_details() {
    let app = spawn_app(ScriptedBackend::failing("quota exceeded")).await;
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/ai",
        ai("suggest-briefing", json!({ "text": "Day 1: Tokyo" })),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].is_string());
    assert!(body["details"].as_str().unwrap().contains("quota exceeded"));
}

#[tokio::test]
async fn malformed_json_from_the_model_is_a_server_error() {
    let app = spawn_app(ScriptedBackend::replying("{\"time\": \"10:00\", \"title\":")).await;
    let gap = json!({
        "prevItem": { "time": "09:00", "title": "Temple", "location": "Nara" },
        "nextItem": { "time": "13:00", "title": "Lunch", "location": "Nara" }
    });
    let (status, body) = send(&app, Method::POST, "/api/ai", ai("suggest-gap", gap)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["details"].as_str().unwrap().contains("malformed JSON"));
}

#[tokio::test]
async fn trip_lifecycle_over_http() {
    let app = spawn_app(ScriptedBackend::replying("{}")).await;

    let (status, trip) = send(
        &app,
        Method::POST,
        "/api/trips",
        Some(json!({
            "dest": "Tokyo",
            "startDate": "2024-04-01",
            "endDate": "2024-04-05",
            "baseCurrency": "TWD",
            "member": { "name": "Aki", "pin": "1234" }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let trip_id = trip["id"].as_str().unwrap().to_string();
    let member_id = trip["members"][0]["id"].as_str().unwrap().to_string();

    let (status, expense) = send(
        &app,
        Method::POST,
        &format!("/api/trips/{trip_id}/expenses"),
        Some(json!({
            "date": "2024-04-02",
            "title": "Sushi",
            "amount": 1000,
            "currency": "JPY"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(!expense["id"].as_str().unwrap().is_empty());

    let (status, total) = send(&app, Method::GET, &format!("/api/trips/{trip_id}/total?JPY=0.25"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(total["total"], json!(250.0));
    assert_eq!(total["currency"], json!("TWD"));

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/api/trips/{trip_id}/members/{member_id}/remove"),
        Some(json!({ "pin": "0000" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, Method::POST, &format!("/api/trips/{trip_id}/souvenirs"), Some(json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, ui) = send(&app, Method::GET, "/api/ui-state", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ui["currentTripId"], json!(trip_id));
}

#[tokio::test]
async fn schedule_entries_are_validated_and_toggled() {
    let app = spawn_app(ScriptedBackend::replying("{}")).await;
    let (_, trip) = send(
        &app,
        Method::POST,
        "/api/trips",
        Some(json!({
            "destination": "Bangkok",
            "startDate": "2024-06-10",
            "endDate": "2024-06-12",
            "baseCurrency": "THB",
            "member": { "name": "Nok", "pin": "9876" }
        })),
    )
    .await;
    let trip_id = trip["id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/api/trips/{trip_id}/items"),
        Some(json!({ "date": "2024-06-11", "time": "10:00", "title": "  " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, item) = send(
        &app,
        Method::POST,
        &format!("/api/trips/{trip_id}/items"),
        Some(json!({ "date": "2024-06-11", "time": "10:00", "title": "Wat Pho", "category": "sightseeing" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let item_id = item["id"].as_str().unwrap().to_string();

    let (status, toggled) = send(&app, Method::POST, &format!("/api/trips/{trip_id}/toggle/{item_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(toggled["isCompleted"], json!(true));

    let (status, _) = send(&app, Method::DELETE, &format!("/api/trips/{trip_id}/items/{item_id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, trip) = send(&app, Method::GET, &format!("/api/trips/{trip_id}"), None).await;
    assert_eq!(trip["items"], json!([]));
}

async fn create_trip(app: &TestApp, dest: &str, member: &str, pin: &str) -> Value {
    let (status, trip) = send(
        app,
        Method::POST,
        "/api/trips",
        Some(json!({
            "dest": dest,
            "startDate": "2024-04-01",
            "endDate": "2024-04-05",
            "member": { "name": member, "pin": pin }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    trip
}

#[tokio::test]
async fn replacing_a_trip_cannot_drop_members_or_change_pins() {
    let app = spawn_app(ScriptedBackend::replying("{}")).await;
    let trip = create_trip(&app, "Osaka", "Aki", "1234").await;
    let trip_id = trip["id"].as_str().unwrap().to_string();
    let uri = format!("/api/trips/{trip_id}");

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("{uri}/members"),
        Some(json!({ "name": "Ren", "pin": "5678" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let (_, full) = send(&app, Method::GET, &uri, None).await;

    let mut dropped = full.clone();
    dropped["members"].as_array_mut().unwrap().truncate(1);
    let (status, _) = send(&app, Method::PUT, &uri, Some(dropped)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut repinned = full.clone();
    repinned["members"][1]["pin"] = json!("0000");
    let (status, _) = send(&app, Method::PUT, &uri, Some(repinned)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, current) = send(&app, Method::GET, &uri, None).await;
    assert_eq!(current, full);

    let mut renamed = full.clone();
    renamed["dest"] = json!("Kobe");
    let (status, saved) = send(&app, Method::PUT, &uri, Some(renamed)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(saved["dest"], json!("Kobe"));
    assert_eq!(saved["members"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn replacing_a_trip_with_duplicate_entry_ids_is_rejected() {
    let app = spawn_app(ScriptedBackend::replying("{}")).await;
    let mut trip = create_trip(&app, "Nara", "Aki", "1234").await;
    let uri = format!("/api/trips/{}", trip["id"].as_str().unwrap());

    trip["items"] = json!([
        { "id": "x", "date": "2024-04-02", "time": "09:00", "title": "A" },
        { "id": "x", "date": "2024-04-02", "time": "10:00", "title": "B" }
    ]);
    let (status, body) = send(&app, Method::PUT, &uri, Some(trip)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["details"].as_str().unwrap().contains("appears twice"));

    let (_, current) = send(&app, Method::GET, &uri, None).await;
    assert_eq!(current["items"], json!([]));
}

#[tokio::test]
async fn tab_only_ui_update_keeps_the_current_trip() {
    let app = spawn_app(ScriptedBackend::replying("{}")).await;
    let trip = create_trip(&app, "Hanoi", "Linh", "2468").await;

    let (status, ui) = send(&app, Method::PUT, "/api/ui-state", Some(json!({ "activeTab": "expenses" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ui["activeTab"], json!("expenses"));
    assert_eq!(ui["currentTripId"], trip["id"]);

    let (status, ui) = send(&app, Method::PUT, "/api/ui-state", Some(json!({ "currentTripId": null }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ui["currentTripId"], Value::Null);
    assert_eq!(ui["activeTab"], json!("expenses"));
}
