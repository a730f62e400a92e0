//! Integration tests for the WebSocket feed.
//!
//! A real listener is bound on an ephemeral port and clients connect with
//! `tokio-tungstenite`, so the upgrade and the frame format are exercised
//! end to end.

use chrono::Duration as TokenTtl;
use crib_server::{
    api::{AppState, create_router},
    auth::TokenVerifier,
};
use cribbage::{
    Hub, MatchManager, MatchSettings,
    db::MemoryMatchStore,
    matches::{Broadcaster, ManagerConfig, MatchId, MoveRequest, match_channel, player_channel},
};
use futures_util::StreamExt;
use serde_json::{Value, json};
use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Error as WsError, Message},
};
use uuid::Uuid;

const SECRET: &str = "test_secret_key_for_testing_only_0123456789";
const FRAME_TIMEOUT: Duration = Duration::from_secs(2);

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    manager: Arc<MatchManager>,
    hub: Arc<Hub>,
    tokens: Arc<TokenVerifier>,
}

impl TestServer {
    async fn spawn(hub_buffer: usize) -> Self {
        let hub = Arc::new(Hub::new(hub_buffer));
        let manager = Arc::new(MatchManager::new(
            Arc::new(MemoryMatchStore::new()),
            hub.clone(),
            ManagerConfig::default(),
        ));
        let tokens = Arc::new(TokenVerifier::new(SECRET));
        let app = create_router(AppState {
            manager: manager.clone(),
            hub: hub.clone(),
            tokens: tokens.clone(),
            database: None,
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            manager,
            hub,
            tokens,
        }
    }

    async fn start_match(&self) -> MatchId {
        let id = Uuid::new_v4();
        self.manager
            .create_match(id, vec![1, 2], MatchSettings::default())
            .await
            .unwrap();
        id
    }

    fn url(&self, match_id: MatchId, player_id: i64) -> String {
        let token = self
            .tokens
            .issue(player_id, TokenTtl::minutes(15))
            .unwrap();
        format!("ws://{}/ws/{match_id}?token={token}", self.addr)
    }

    async fn connect(&self, match_id: MatchId, player_id: i64) -> Client {
        let (client, _) = connect_async(self.url(match_id, player_id)).await.unwrap();
        client
    }
}

/// Next text frame as JSON; panics on close or timeout.
async fn next_frame(client: &mut Client) -> Value {
    loop {
        let message = tokio::time::timeout(FRAME_TIMEOUT, client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .expect("socket error");
        match message {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Close(frame) => panic!("socket closed: {frame:?}"),
            _ => {}
        }
    }
}

/// The next `count` frames, keyed by channel.
async fn frames_by_channel(client: &mut Client, count: usize) -> HashMap<String, Value> {
    let mut frames = HashMap::new();
    for _ in 0..count {
        let frame = next_frame(client).await;
        let channel = frame["channel"].as_str().unwrap().to_string();
        frames.insert(channel, frame);
    }
    frames
}

fn http_status(err: WsError) -> u16 {
    match err {
        WsError::Http(response) => response.status().as_u16(),
        other => panic!("expected an HTTP rejection, got {other}"),
    }
}

#[tokio::test]
async fn test_seated_player_starts_from_private_snapshot() {
    let server = TestServer::spawn(16).await;
    let id = server.start_match().await;
    let mut client = server.connect(id, 1).await;

    let frame = next_frame(&mut client).await;
    assert_eq!(frame["channel"], player_channel(id, 1));
    assert_eq!(frame["type"], "snapshot");
    assert!(frame["timestamp"].is_string());

    let snapshot = &frame["payload"];
    assert_eq!(snapshot["match_id"], id.to_string());
    assert_eq!(snapshot["version"], 1);
    assert_eq!(snapshot["players"][0]["hand"].as_array().unwrap().len(), 6);
    assert_eq!(snapshot["players"][1]["hand"], Value::Null);
    assert_eq!(snapshot["players"][1]["hand_count"], 6);
}

#[tokio::test]
async fn test_spectator_starts_from_public_snapshot() {
    let server = TestServer::spawn(16).await;
    let id = server.start_match().await;
    let mut client = server.connect(id, 99).await;

    let frame = next_frame(&mut client).await;
    assert_eq!(frame["channel"], match_channel(id));
    assert_eq!(frame["type"], "snapshot");
    let players = frame["payload"]["players"].as_array().unwrap();
    assert!(players.iter().all(|p| p["hand"].is_null()));
    assert_eq!(server.hub.subscriber_count(&match_channel(id)), 1);
}

#[tokio::test]
async fn test_moves_reach_public_and_private_channels() {
    let server = TestServer::spawn(16).await;
    let id = server.start_match().await;
    let mut client = server.connect(id, 1).await;
    let first = next_frame(&mut client).await;
    assert_eq!(first["payload"]["version"], 1);

    // Player 2 discards; player 1 hears about it on both channels.
    let opponent = server.manager.snapshot_for_viewer(id, Some(2)).await.unwrap();
    let hand = opponent.players[1].hand.clone().unwrap();
    let request = MoveRequest {
        move_type: "discard".to_string(),
        cards: Some(hand[..2].iter().map(|card| card.code()).collect()),
        card: None,
    };
    server.manager.apply_move(id, 2, &request).await.unwrap();

    let frames = frames_by_channel(&mut client, 2).await;

    let public = &frames[&match_channel(id)];
    assert_eq!(public["type"], "match_updated");
    assert_eq!(public["payload"]["snapshot"]["version"], 2);
    let players = public["payload"]["snapshot"]["players"].as_array().unwrap();
    assert!(players.iter().all(|p| p["hand"].is_null()));
    assert_eq!(players[1]["discarded"], true);

    let private = &frames[&player_channel(id, 1)];
    assert_eq!(private["type"], "match_updated");
    let snapshot = &private["payload"]["snapshot"];
    assert_eq!(snapshot["version"], 2);
    assert_eq!(snapshot["players"][0]["hand"].as_array().unwrap().len(), 6);
    assert_eq!(snapshot["players"][1]["hand"], Value::Null);
    assert_eq!(snapshot["players"][1]["hand_count"], 4);
    assert_eq!(private["payload"]["events"][0]["event"], "discarded");
}

#[tokio::test]
async fn test_socket_closes_when_hub_drops_subscriber() {
    let server = TestServer::spawn(1).await;
    let id = server.start_match().await;
    let mut client = server.connect(id, 99).await;
    next_frame(&mut client).await;

    // Back to back on one thread: the second send finds the queue full.
    server.hub.broadcast(&match_channel(id), "filler", json!({"n": 1}));
    server.hub.broadcast(&match_channel(id), "filler", json!({"n": 2}));
    assert_eq!(server.hub.subscriber_count(&match_channel(id)), 0);

    let frame = next_frame(&mut client).await;
    assert_eq!(frame["type"], "filler");
    assert_eq!(frame["payload"]["n"], 1);

    let closing = tokio::time::timeout(FRAME_TIMEOUT, client.next())
        .await
        .expect("socket stayed open after its subscription was dropped");
    assert!(matches!(closing, Some(Ok(Message::Close(_))) | Some(Err(_)) | None));
}

#[tokio::test]
async fn test_handshake_rejections() {
    let server = TestServer::spawn(16).await;
    let id = server.start_match().await;

    let url = format!("ws://{}/ws/{id}", server.addr);
    assert_eq!(http_status(connect_async(url).await.unwrap_err()), 401);

    let forged = TokenVerifier::new("some_other_secret_that_is_long_enough")
        .issue(1, TokenTtl::minutes(15))
        .unwrap();
    let url = format!("ws://{}/ws/{id}?token={forged}", server.addr);
    assert_eq!(http_status(connect_async(url).await.unwrap_err()), 401);

    let err = connect_async(server.url(Uuid::new_v4(), 1)).await.unwrap_err();
    assert_eq!(http_status(err), 404);
}
