use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use chrono::{SubsecRound, Utc};
use cipher_relay::chat::protocol::ServerEvent;
use cipher_relay::chat::{RelayService, Role};
use cipher_relay::core::config::{AppState, RelayConfig};
use cipher_relay::core::models::ConnectionId;
use cipher_relay::core::store::{MemoryStore, RelayStore, SqliteStore};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::tempdir;
use tokio::sync::mpsc::{self, Receiver};
use tokio_test::assert_ok;
use tower::ServiceExt;

fn connect(service: &RelayService) -> (ConnectionId, Receiver<ServerEvent>) {
    let (tx, rx) = mpsc::channel(64);
    (service.connect(Role::User, tx), rx)
}

fn drain(rx: &mut Receiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

async fn register(service: &RelayService, conn: ConnectionId, id: &str) {
    let frame = json!({
        "event": "register-identity",
        "data": {
            "id": id,
            "publicKey": vec![42u8; 32],
            "displayName": format!("User {}", id),
            "contactInfo": format!("{}@example.com", id),
        }
    });
    service.handle_frame(conn, &frame.to_string()).await;
}

#[tokio::test]
async fn test_offline_message_survives_restart() {
    let dir = tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("relay.sqlite").display());
    let config = RelayConfig::default();

    {
        // 1. A sends to B while B has never connected
        let store = Arc::new(SqliteStore::connect(&url).await.unwrap());
        let service = RelayService::new(store.clone(), &config);
        let (a, mut rx) = connect(&service);
        register(&service, a, "A").await;

        let frame = json!({
            "event": "send-message",
            "data": {"from": "A", "to": "B", "ciphertext": [1, 2, 3]}
        });
        service.handle_frame(a, &frame.to_string()).await;
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, ServerEvent::MessageStored(s) if s.to == "B")));

        service.disconnect(a).await;
        store.close().await;
    }

    // 2. Fresh process over the same file
    let store = Arc::new(SqliteStore::connect(&url).await.unwrap());
    let service = RelayService::new(store, &config);
    let (b, mut rx) = connect(&service);
    register(&service, b, "B").await;
    drain(&mut rx);

    let frame = json!({"event": "get-conversation", "data": {"id1": "B", "id2": "A"}});
    service.handle_frame(b, &frame.to_string()).await;

    match drain(&mut rx).pop() {
        Some(ServerEvent::ConversationHistory(history)) => {
            assert_eq!(history.len(), 1);
            assert_eq!(history[0].from, "A");
            assert_eq!(history[0].ciphertext.as_bytes(), &[1, 2, 3]);
        }
        other => panic!("unexpected reply: {:?}", other),
    }

    let frame = json!({"event": "get-public-key", "data": "A"});
    service.handle_frame(b, &frame.to_string()).await;
    match drain(&mut rx).pop() {
        Some(ServerEvent::PublicKey(payload)) => {
            assert_eq!(payload.public_key.map(|k| k.len()), Some(32));
        }
        other => panic!("unexpected reply: {:?}", other),
    }
}

#[tokio::test]
async fn test_disconnect_persists_last_seen() {
    let dir = tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("relay.sqlite").display());
    let store: Arc<dyn RelayStore> = Arc::new(SqliteStore::connect(&url).await.unwrap());
    let service = RelayService::new(store.clone(), &RelayConfig::default());

    let (x, _rx) = connect(&service);
    register(&service, x, "X").await;
    assert!(service.presence().is_online("X"));

    // Stored timestamps carry microseconds
    let before = Utc::now().trunc_subsecs(6);
    service.disconnect(x).await;

    assert!(!service.presence().is_online("X"));
    let identity = assert_ok!(store.find_identity("X").await).unwrap();
    assert!(identity.last_seen >= before);
}

fn state_with(config: RelayConfig) -> AppState {
    let relay = Arc::new(RelayService::new(Arc::new(MemoryStore::new()), &config));
    AppState {
        config: Arc::new(config),
        relay,
    }
}

#[tokio::test]
async fn test_health_reports_presence() {
    let app = cipher_relay::app(state_with(RelayConfig::default()));

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["status"], "ok");
    assert_eq!(value["online"], 0);
}

#[tokio::test]
async fn test_developer_endpoint_only_when_enabled() {
    let config = RelayConfig {
        enable_developer_api: false,
        ..RelayConfig::default()
    };
    let app = cipher_relay::app(state_with(config));
    let response = app
        .oneshot(
            Request::builder()
                .uri("/ws/developer")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let app = cipher_relay::app(state_with(RelayConfig::default()));
    let response = app
        .oneshot(
            Request::builder()
                .uri("/ws/developer")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    // Route exists; a plain GET is refused for lacking upgrade headers.
    assert_ne!(response.status(), StatusCode::NOT_FOUND);
}
