//! Gateway transport against an in-process fake gateway.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use relay_engine::transport::{ConnectionState, Transport, TransportError};
use relay_gateway::GatewayTransport;

// ============================================================
// Fake gateway
// ============================================================

#[derive(Clone, Default)]
struct FakeGateway {
    messages: Arc<Mutex<Vec<Value>>>,
    auth_headers: Arc<Mutex<Vec<String>>>,
}

async fn connect(State(gw): State<FakeGateway>, headers: HeaderMap) -> Json<Value> {
    if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        gw.auth_headers.lock().unwrap().push(auth.to_string());
    }
    Json(json!({"state": "pairing", "pairing_code": "PAIR-0001"}))
}

async fn status() -> Json<Value> {
    Json(json!({"connected": true}))
}

async fn exists(Path(id): Path<String>) -> Result<Json<Value>, StatusCode> {
    match id.as_str() {
        "broken" => Err(StatusCode::INTERNAL_SERVER_ERROR),
        "ghost" => Ok(Json(json!({"exists": false}))),
        _ => Ok(Json(json!({"exists": true, "address": format!("{}@c.us", id)}))),
    }
}

async fn messages(
    State(gw): State<FakeGateway>,
    Json(body): Json<Value>,
) -> Result<StatusCode, (StatusCode, String)> {
    if body["to"] == "blocked@c.us" {
        return Err((StatusCode::TOO_MANY_REQUESTS, "slow down".to_string()));
    }
    gw.messages.lock().unwrap().push(body);
    Ok(StatusCode::CREATED)
}

async fn spawn_gateway() -> (String, FakeGateway) {
    let gw = FakeGateway::default();
    let app = Router::new()
        .route("/session/connect", post(connect))
        .route("/session/status", get(status))
        .route("/contacts/{id}/exists", get(exists))
        .route("/messages", post(messages))
        .with_state(gw.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), gw)
}

fn transport(base: &str, token: Option<&str>) -> GatewayTransport {
    GatewayTransport::new(base, token.map(String::from), Duration::from_secs(5)).unwrap()
}

// ============================================================
// Tests
// ============================================================

#[tokio::test]
async fn test_connect_returns_pairing_code_with_bearer_token() {
    let (base, gw) = spawn_gateway().await;
    let t = transport(&base, Some("secret"));

    let state = t.connect().await.unwrap();
    assert_eq!(
        state,
        ConnectionState::AwaitingPairing {
            code: "PAIR-0001".to_string()
        }
    );
    assert_eq!(*gw.auth_headers.lock().unwrap(), vec!["Bearer secret"]);
    assert!(t.is_connected().await.unwrap());
}

#[tokio::test]
async fn test_lookup_maps_existence() {
    let (base, _gw) = spawn_gateway().await;
    let t = transport(&base, None);

    assert_eq!(
        t.lookup("5511912345678").await.unwrap().as_deref(),
        Some("5511912345678@c.us")
    );
    assert_eq!(t.lookup("ghost").await.unwrap(), None);
    assert!(matches!(
        t.lookup("broken").await,
        Err(TransportError::Query(_))
    ));
}

#[tokio::test]
async fn test_send_posts_message_and_surfaces_rejections() {
    let (base, gw) = spawn_gateway().await;
    let t = transport(&base, None);

    t.send("111@c.us", "hello").await.unwrap();
    assert_eq!(
        *gw.messages.lock().unwrap(),
        vec![json!({"to": "111@c.us", "text": "hello"})]
    );

    let err = t.send("blocked@c.us", "hello").await.unwrap_err();
    match err {
        TransportError::Send(message) => {
            assert!(message.contains("429"));
            assert!(message.contains("slow down"));
        }
        other => panic!("expected send error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unreachable_gateway_is_connect_error() {
    // Bind then drop to get a port nothing listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let t = transport(&format!("http://{}", addr), None);
    assert!(matches!(
        t.connect().await,
        Err(TransportError::Connect(_))
    ));
}
