//! WebSocket Handler
//!
//! Fan-out sink for engine match events and settlement transitions. Clients
//! subscribe to `matches:{base}/{quote}` and `settlements:{address}`
//! channels; everything else the engine does stays private.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;

use super::channels::{Channel, ClientMessage, ServerMessage};
use crate::AppState;

pub async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut notifications = state.notifications.subscribe();
    let mut subscriptions: HashSet<Channel> = HashSet::new();

    crate::metrics::set_ws_connections(state.notifications.receiver_count() as i64);

    loop {
        tokio::select! {
            client_msg = receiver.next() => {
                let Some(Ok(msg)) = client_msg else { break };
                match msg {
                    Message::Text(text) => {
                        let reply = handle_client_message(&text, &mut subscriptions);
                        if send_json(&mut sender, &reply).await.is_err() {
                            break;
                        }
                    }
                    Message::Ping(data) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            notification = notifications.recv() => {
                match notification {
                    Ok(event) => {
                        if subscriptions.iter().any(|c| c.wants(&event)) {
                            let msg = ServerMessage::Event { payload: event };
                            if send_json(&mut sender, &msg).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("websocket client lagged {} notifications", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    crate::metrics::set_ws_connections(state.notifications.receiver_count() as i64);
    tracing::debug!("websocket client disconnected");
}

fn handle_client_message(text: &str, subscriptions: &mut HashSet<Channel>) -> ServerMessage {
    let parsed: Result<ClientMessage, _> = serde_json::from_str(text);
    match parsed {
        Ok(ClientMessage::Subscribe { channel }) => match Channel::parse(&channel) {
            Some(parsed_channel) => {
                subscriptions.insert(parsed_channel);
                ServerMessage::Subscribed { channel }
            }
            None => ServerMessage::Error {
                message: format!("unknown channel: {}", channel),
            },
        },
        Ok(ClientMessage::Unsubscribe { channel }) => match Channel::parse(&channel) {
            Some(parsed_channel) => {
                subscriptions.remove(&parsed_channel);
                ServerMessage::Unsubscribed { channel }
            }
            None => ServerMessage::Error {
                message: format!("unknown channel: {}", channel),
            },
        },
        Ok(ClientMessage::Ping) => ServerMessage::Pong,
        Err(e) => ServerMessage::Error {
            message: format!("malformed message: {}", e),
        },
    }
}

async fn send_json(
    sender: &mut (impl SinkExt<Message> + Unpin),
    message: &ServerMessage,
) -> Result<(), ()> {
    let text = serde_json::to_string(message).map_err(|_| ())?;
    sender.send(Message::Text(text)).await.map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_unsubscribe_flow() {
        let mut subs = HashSet::new();

        let reply = handle_client_message(
            r#"{"type":"subscribe","channel":"matches:0xaa/0xbb"}"#,
            &mut subs,
        );
        assert!(matches!(reply, ServerMessage::Subscribed { .. }));
        assert_eq!(subs.len(), 1);

        let reply = handle_client_message(
            r#"{"type":"unsubscribe","channel":"matches:0xaa/0xbb"}"#,
            &mut subs,
        );
        assert!(matches!(reply, ServerMessage::Unsubscribed { .. }));
        assert!(subs.is_empty());
    }

    #[test]
    fn test_bad_channel_reports_error() {
        let mut subs = HashSet::new();
        let reply =
            handle_client_message(r#"{"type":"subscribe","channel":"nope"}"#, &mut subs);
        assert!(matches!(reply, ServerMessage::Error { .. }));
        assert!(subs.is_empty());
    }

    #[test]
    fn test_ping_pong() {
        let mut subs = HashSet::new();
        let reply = handle_client_message(r#"{"type":"ping"}"#, &mut subs);
        assert!(matches!(reply, ServerMessage::Pong));
    }
}
