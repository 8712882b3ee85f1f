//! Single WebSocket endpoint: clients subscribe/unsubscribe to topics by channel string and
//! receive the matching server events. One outbound task per subscribed channel forwards that
//! channel's `PubSubHub` broadcast onto the connection's shared sender; unsubscribing (or
//! disconnecting) aborts it. `user:ADDR` is gated on the connection's verified identity, every
//! other channel is public (spec §4.6).

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::auth::jwt::JwtManager;
use crate::services::matching::OrderbookSnapshot;
use crate::websocket::channels::Channel;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ClientMessage {
    Auth { token: String },
    Subscribe { channel: String },
    Unsubscribe { channel: String },
    Ping,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ServerMessage<'a> {
    AuthResult { success: bool, message: Option<&'a str> },
    Subscribed { channel: String },
    Unsubscribed { channel: String },
    OrderbookSnapshot { channel: String, data: OrderbookSnapshot },
    Event { channel: String, data: serde_json::Value },
    Error { message: String },
    Pong,
}

fn send_json<T: Serialize>(tx: &mpsc::UnboundedSender<Message>, msg: &T) {
    if let Ok(text) = serde_json::to_string(msg) {
        let _ = tx.send(Message::Text(text));
    }
}

pub async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();

    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if ws_tx.send(msg).await.is_err() {
                break;
            }
        }
    });

    let mut identity: Option<String> = None;
    let mut subscriptions: HashMap<String, tokio::task::JoinHandle<()>> = HashMap::new();

    while let Some(Ok(msg)) = ws_rx.next().await {
        let Message::Text(text) = msg else {
            if matches!(msg, Message::Close(_)) {
                break;
            }
            continue;
        };

        let parsed: Result<ClientMessage, _> = serde_json::from_str(&text);
        match parsed {
            Ok(ClientMessage::Ping) => send_json(&out_tx, &ServerMessage::Pong),
            Ok(ClientMessage::Auth { token }) => {
                let jwt = JwtManager::new(&state.config.jwt_secret, state.config.jwt_expiry_seconds);
                match jwt.verify_token(&token) {
                    Ok(claims) => {
                        identity = Some(claims.sub.clone());
                        send_json(&out_tx, &ServerMessage::AuthResult { success: true, message: None });
                    }
                    Err(e) => send_json(&out_tx, &ServerMessage::AuthResult { success: false, message: Some(&e.to_string()) }),
                }
            }
            Ok(ClientMessage::Subscribe { channel }) => {
                handle_subscribe(&state, &out_tx, &mut subscriptions, &identity, channel).await;
            }
            Ok(ClientMessage::Unsubscribe { channel }) => {
                if let Some(handle) = subscriptions.remove(&channel) {
                    handle.abort();
                }
                send_json(&out_tx, &ServerMessage::Unsubscribed { channel });
            }
            Err(e) => send_json(&out_tx, &ServerMessage::Error { message: format!("bad message: {e}") }),
        }
    }

    for (_, handle) in subscriptions {
        handle.abort();
    }
    writer.abort();
}

async fn handle_subscribe(
    state: &Arc<AppState>,
    out_tx: &mpsc::UnboundedSender<Message>,
    subscriptions: &mut HashMap<String, tokio::task::JoinHandle<()>>,
    identity: &Option<String>,
    channel_str: String,
) {
    let channel = match Channel::parse(&channel_str) {
        Ok(c) => c,
        Err(e) => {
            send_json(out_tx, &ServerMessage::Error { message: e.to_string() });
            return;
        }
    };

    if let Some(required_address) = channel.requires_auth_for() {
        if identity.as_deref() != Some(required_address) {
            send_json(out_tx, &ServerMessage::Error { message: "unauthorized for this channel".into() });
            return;
        }
    }

    if subscriptions.contains_key(&channel_str) {
        send_json(out_tx, &ServerMessage::Subscribed { channel: channel_str });
        return;
    }

    if let Channel::Orderbook(symbol) = &channel {
        if let Ok(snapshot) = state.matching_engine.get_orderbook_snapshot(symbol, 50) {
            send_json(out_tx, &ServerMessage::OrderbookSnapshot { channel: channel_str.clone(), data: snapshot });
        }
    }

    let topic = channel.topic();
    let mut rx = state.pubsub.subscribe(&topic);
    let tx = out_tx.clone();
    let forward_channel = channel_str.clone();
    let handle = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(payload) => {
                    let data: serde_json::Value = serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null);
                    send_json(&tx, &ServerMessage::Event { channel: forward_channel.clone(), data });
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
    subscriptions.insert(channel_str.clone(), handle);
    send_json(out_tx, &ServerMessage::Subscribed { channel: channel_str });
}
