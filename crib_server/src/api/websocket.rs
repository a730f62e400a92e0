//! WebSocket feed of match updates.
//!
//! The socket is receive-only from the client's point of view: moves go
//! through the HTTP API, and everything the hub publishes for the match
//! comes back here.
//!
//! # Connection Flow
//!
//! 1. Client connects via `GET /ws/{match_id}?token=<jwt>`
//! 2. Server validates the token and checks the match exists
//! 3. After the upgrade the socket subscribes to the public match channel
//!    and (for seated players) the caller's private channel, then loads the
//!    caller's snapshot; any update committed in between is already queued
//! 4. The first frame is that snapshot; after it, every envelope published
//!    on either channel is forwarded as it arrives
//! 5. If the hub drops a subscription for falling behind, the socket is
//!    closed so the client reconnects and starts from a fresh snapshot
//! 6. On disconnect both subscriptions are dropped
//!
//! # Example
//!
//! ```javascript
//! const ws = new WebSocket('ws://localhost:8121/ws/<match id>?token=eyJhbGc...');
//! ws.onmessage = (event) => {
//!   const { channel, type, payload } = JSON.parse(event.data);
//!   if (type === "match_updated") render(payload.snapshot);
//! };
//! ```

use axum::{
    extract::{
        Extension, Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use cribbage::{
    MatchSnapshot, PlayerId,
    matches::{Envelope, MatchId, MatchResult, Subscription, match_channel, player_channel},
};
use futures_util::{Sink, SinkExt, StreamExt};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::{AppState, matches::ApiError, request_id::RequestId};
use crate::metrics;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    token: Option<String>,
}

/// One frame on the wire: the envelope plus the channel it came from.
#[derive(Serialize)]
struct Outbound<'a> {
    channel: &'a str,
    #[serde(flatten)]
    envelope: &'a Envelope,
}

/// Upgrade to a WebSocket carrying one match's updates.
///
/// # Response
///
/// - `101 Switching Protocols` on success
/// - `401 Unauthorized`: Missing or invalid token
/// - `404 Not Found`: No such match
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Path(match_id): Path<MatchId>,
    Query(query): Query<WsQuery>,
    Extension(request_id): Extension<RequestId>,
    State(state): State<AppState>,
) -> Response {
    let player_id = match state.tokens.authenticate(query.token.as_deref()) {
        Ok(claims) => claims.sub,
        Err(e) => {
            debug!(
                "Rejected WebSocket token for match {match_id} (request {}): {e}",
                request_id.as_str()
            );
            return (StatusCode::UNAUTHORIZED, "Invalid token").into_response();
        }
    };

    // Only decides the status code and the channels; the snapshot the
    // client sees is taken after subscribing.
    let seated = match state
        .manager
        .snapshot_for_viewer(match_id, Some(player_id))
        .await
    {
        Ok(snapshot) => snapshot.players.iter().any(|p| p.player_id == player_id),
        Err(e) => return ApiError(e).into_response(),
    };

    info!(
        "WebSocket upgrade: match={match_id}, player={player_id}, request={}",
        request_id.as_str()
    );
    ws.on_upgrade(move |socket| handle_socket(socket, state, match_id, player_id, seated))
}

/// Subscriptions for one socket plus the snapshot to start from.
struct Feed {
    public: Subscription,
    private: Option<Subscription>,
    snapshot: MatchSnapshot,
}

fn release(state: &AppState, public: Subscription, private: Option<Subscription>) {
    state.hub.unsubscribe(&public.channel, public.id);
    if let Some(sub) = private {
        state.hub.unsubscribe(&sub.channel, sub.id);
    }
}

/// Subscribes first, then loads the snapshot.
///
/// Anything committed after the snapshot's version is already sitting in
/// the subscriptions' queues, so the client never misses an update.
async fn open_feed(
    state: &AppState,
    match_id: MatchId,
    player_id: PlayerId,
    seated: bool,
) -> MatchResult<Feed> {
    let public = state.hub.subscribe(&match_channel(match_id));
    let private = seated.then(|| state.hub.subscribe(&player_channel(match_id, player_id)));

    match state
        .manager
        .snapshot_for_viewer(match_id, Some(player_id))
        .await
    {
        Ok(snapshot) => Ok(Feed {
            public,
            private,
            snapshot,
        }),
        Err(e) => {
            release(state, public, private);
            Err(e)
        }
    }
}

async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    match_id: MatchId,
    player_id: PlayerId,
    seated: bool,
) {
    let (mut sender, mut receiver) = socket.split();

    let mut feed = match open_feed(&state, match_id, player_id, seated).await {
        Ok(feed) => feed,
        Err(e) => {
            warn!("Could not load match {match_id} for player {player_id}: {e}");
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    info!("WebSocket connected: match={match_id}, player={player_id}, seated={seated}");
    metrics::websocket_connections_total();
    metrics::websocket_connections_active(1.0);

    let public_channel = feed.public.channel.clone();
    let private_channel = feed.private.as_ref().map(|sub| sub.channel.clone());
    let first_channel = private_channel.as_deref().unwrap_or(&public_channel);

    let mut open = match serde_json::to_value(&feed.snapshot) {
        Ok(payload) => send(&mut sender, first_channel, &Envelope::new("snapshot", payload))
            .await
            .is_ok(),
        Err(e) => {
            warn!("Failed to encode snapshot for match {match_id}: {e}");
            false
        }
    };

    while open {
        tokio::select! {
            envelope = feed.public.receiver.recv() => match envelope {
                Some(envelope) => {
                    open = send(&mut sender, &public_channel, &envelope).await.is_ok();
                }
                None => open = dropped(&mut sender, &public_channel).await,
            },
            envelope = recv_private(feed.private.as_mut()) => {
                let channel = private_channel.as_deref().unwrap_or(&public_channel);
                match envelope {
                    Some(envelope) => {
                        open = send(&mut sender, channel, &envelope).await.is_ok();
                    }
                    None => open = dropped(&mut sender, channel).await,
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => open = false,
                Some(Ok(Message::Text(_))) => {
                    debug!("Ignoring client message on match {match_id}; moves go through HTTP");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WebSocket error on match {match_id}: {e}");
                    open = false;
                }
            },
        }
    }

    release(&state, feed.public, feed.private);
    metrics::websocket_connections_active(-1.0);
    info!("WebSocket disconnected: match={match_id}, player={player_id}");
}

/// Next envelope on the private channel; never resolves for spectators.
async fn recv_private(private: Option<&mut Subscription>) -> Option<Envelope> {
    match private {
        Some(sub) => sub.receiver.recv().await,
        None => std::future::pending().await,
    }
}

/// The hub let go of a subscription. Closes the socket; always returns
/// `false` so the loop ends.
async fn dropped<S>(sender: &mut S, channel: &str) -> bool
where
    S: Sink<Message> + Unpin,
{
    warn!("Subscription to {channel} ended, closing WebSocket");
    let _ = sender.send(Message::Close(None)).await;
    false
}

async fn send<S>(sender: &mut S, channel: &str, envelope: &Envelope) -> Result<(), ()>
where
    S: Sink<Message> + Unpin,
{
    let json = serde_json::to_string(&Outbound { channel, envelope }).map_err(|e| {
        warn!("Failed to encode envelope for {channel}: {e}");
    })?;
    sender
        .send(Message::Text(json.into()))
        .await
        .map_err(|_| ())?;
    metrics::websocket_messages_sent();
    Ok(())
}
