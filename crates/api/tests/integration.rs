//! Integration tests for API routes.
//!
//! Uses `tower::ServiceExt` to test Axum routes without a real HTTP server.
//! The dispatch controller runs against the in-memory store and a fake
//! transport whose lookups wait for the test to release them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use tokio::sync::{Notify, watch};
use tokio_stream::StreamExt;
use tower::ServiceExt;

use relay_api::routes::create_router;
use relay_api::state::AppState;
use relay_common::types::{DispatchEvent, SessionPhase};
use relay_engine::generator::NumberGenerator;
use relay_engine::sink::{BroadcastSink, EventSink};
use relay_engine::{
    ConnectionState, DispatchConfig, DispatchController, DispatchHandle, MemoryRecipientStore,
    RecipientStore, Transport, TransportError,
};

// ============================================================
// Helpers
// ============================================================

/// Transport that holds every lookup until the test releases it.
struct GatedTransport {
    gate: Arc<Notify>,
}

#[async_trait]
impl Transport for GatedTransport {
    async fn connect(&self) -> Result<ConnectionState, TransportError> {
        Ok(ConnectionState::Connected)
    }

    async fn is_connected(&self) -> Result<bool, TransportError> {
        Ok(true)
    }

    async fn lookup(&self, identifier: &str) -> Result<Option<String>, TransportError> {
        self.gate.notified().await;
        Ok(Some(format!("{}@net", identifier)))
    }

    async fn send(&self, _address: &str, _text: &str) -> Result<(), TransportError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "gated"
    }
}

struct TestApp {
    state: AppState,
    dispatch: DispatchHandle,
    store: Arc<MemoryRecipientStore>,
    gate: Arc<Notify>,
    events: BroadcastSink,
}

impl TestApp {
    fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    async fn wait_for_phase(&self, phase: SessionPhase) {
        let mut rx = self.dispatch.subscribe_phase();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|p| *p == phase))
            .await
            .expect("phase change timed out")
            .unwrap();
    }
}

/// Build an AppState wired to a running controller.
fn build_test_app() -> TestApp {
    let store = Arc::new(MemoryRecipientStore::new());
    let gate = Arc::new(Notify::new());
    let transport = Arc::new(GatedTransport { gate: gate.clone() });
    let events = BroadcastSink::new(64);
    let (_, connected) = watch::channel(true);

    let config = DispatchConfig {
        delay_min: Duration::ZERO,
        delay_max: Duration::ZERO,
        page_size: 10,
        resume_enabled: false,
    };
    let (controller, dispatch) = DispatchController::new(
        store.clone(),
        transport,
        Arc::new(events.clone()),
        NumberGenerator::default(),
        config,
        connected.clone(),
    );
    tokio::spawn(controller.run());

    let state = AppState::new(dispatch.clone(), store.clone(), events.clone(), connected);
    TestApp {
        state,
        dispatch,
        store,
        gate,
        events,
    }
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(body).unwrap()))
        .unwrap()
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

fn paste_body(list: &str) -> Value {
    json!({"message": "hello", "source": "paste", "numberList": list})
}

// ============================================================
// Route tests
// ============================================================

#[tokio::test]
async fn test_health_endpoint() {
    let app = build_test_app();

    let (status, json) = get_json(app.router(), "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["service"], "relay-api");
    assert_eq!(json["transport_connected"], true);
}

#[tokio::test]
async fn test_start_conflict_status_and_stop() {
    let app = build_test_app();

    // 1. Start
    let response = app
        .router()
        .oneshot(post_json("/api/dispatch/start", &paste_body("111,222,333")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    app.wait_for_phase(SessionPhase::Sending).await;

    // 2. Second start while sending
    let response = app
        .router()
        .oneshot(post_json("/api/dispatch/start", &paste_body("999")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // 3. Status while the first lookup is held
    let (status, json) = get_json(app.router(), "/api/dispatch/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["phase"], "sending");
    assert_eq!(json["connected"], true);
    assert_eq!(json["total"], 3);
    assert_eq!(json["pending"], 3);

    // 4. Stop, then release the in-flight lookup
    let response = app
        .router()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/dispatch/stop")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    app.gate.notify_one();
    app.wait_for_phase(SessionPhase::Idle).await;

    let (_, json) = get_json(app.router(), "/api/dispatch/status").await;
    assert_eq!(json["phase"], "idle");
    assert_eq!(json["total"], 3);
    assert_eq!(json["pending"], 2);
    assert!(app.store.get("999").await.is_none());
}

#[tokio::test]
async fn test_start_rejects_malformed_body() {
    let app = build_test_app();

    let response = app
        .router()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/dispatch/start")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Well-formed JSON with an unknown source is still a bad request.
    let response = app
        .router()
        .oneshot(post_json(
            "/api/dispatch/start",
            &json!({"message": "hi", "source": "carrier-pigeon"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .router()
        .oneshot(post_json(
            "/api/dispatch/start",
            &json!({"message": "   ", "source": "paste", "numberList": "111"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert_eq!(app.dispatch.phase(), SessionPhase::Idle);
    assert_eq!(app.store.count_all().await.unwrap(), 0);
}

#[tokio::test]
async fn test_stop_while_idle_is_accepted() {
    let app = build_test_app();

    let response = app
        .router()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/dispatch/stop")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["stopping"], false);
}

#[tokio::test]
async fn test_event_stream_delivers_named_events() {
    let app = build_test_app();

    let response = app
        .router()
        .oneshot(Request::builder().uri("/api/events").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );

    app.events
        .publish(DispatchEvent::log("Message sent to 111"))
        .await;

    let mut body = response.into_body().into_data_stream();
    let frame = tokio::time::timeout(Duration::from_secs(5), body.next())
        .await
        .expect("no event received")
        .unwrap()
        .unwrap();
    let text = String::from_utf8(frame.to_vec()).unwrap();

    assert!(text.contains("event: log"));
    assert!(text.contains("Message sent to 111"));
}
