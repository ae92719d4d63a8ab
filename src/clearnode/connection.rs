//! Multiplexed clearing-network connection.
//!
//! One reader task per connection decodes response frames and routes them to
//! waiters by request id. Writes are serialized through an async mutex on
//! the sink half. The correlation map lock is sync and is never held across
//! an await.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Notify};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use ethers::signers::{LocalWallet, Signer};

use super::types::{RequestFrame, ResponseFrame, METHOD_ERROR};
use super::ClearnodeError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Waiter = oneshot::Sender<Result<serde_json::Value, ClearnodeError>>;

pub struct Connection {
    writer: tokio::sync::Mutex<SplitSink<WsStream, Message>>,
    pending: parking_lot::Mutex<HashMap<u64, Waiter>>,
    next_id: AtomicU64,
    open: AtomicBool,
    closed: Notify,
    response_timeout: Duration,
}

impl Connection {
    /// Connect and start the reader and keepalive tasks.
    pub async fn open(
        url: &str,
        ping_interval: Duration,
        response_timeout: Duration,
    ) -> Result<Arc<Self>, ClearnodeError> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| ClearnodeError::Unreachable(e.to_string()))?;
        let (write, read) = stream.split();

        let conn = Arc::new(Self {
            writer: tokio::sync::Mutex::new(write),
            pending: parking_lot::Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            open: AtomicBool::new(true),
            closed: Notify::new(),
            response_timeout,
        });

        tokio::spawn(Self::read_loop(conn.clone(), read));
        tokio::spawn(Self::ping_loop(conn.clone(), ping_interval));

        Ok(conn)
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Resolves once the underlying socket has closed.
    pub async fn wait_closed(&self) {
        while self.is_open() {
            self.closed.notified().await;
        }
    }

    /// Send a request signed by the given session keys and await the
    /// correlated response. A timed-out or cancelled wait removes the
    /// waiter from the correlation map on the way out.
    pub async fn request_signed_by(
        &self,
        method: &str,
        params: serde_json::Value,
        signers: &[&LocalWallet],
        timeout: Duration,
    ) -> Result<serde_json::Value, ClearnodeError> {
        if !self.is_open() {
            return Err(ClearnodeError::ConnectionClosed);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let timestamp = chrono::Utc::now().timestamp_millis() as u64;
        let req = (id, method.to_string(), params, timestamp);

        let payload = serde_json::to_string(&req)
            .map_err(|e| ClearnodeError::Protocol(e.to_string()))?;
        let mut sig = Vec::with_capacity(signers.len());
        for signer in signers {
            let signature = signer
                .sign_message(payload.as_bytes())
                .await
                .map_err(|e| ClearnodeError::Signing(e.to_string()))?;
            sig.push(format!("0x{}", signature));
        }

        let frame = RequestFrame { req, sig };
        self.send_and_wait(id, frame, timeout).await
    }

    /// Send a request whose signature array was produced out of band
    /// (e.g. an EIP-712 wallet attestation during auth).
    pub async fn request_with_sigs(
        &self,
        method: &str,
        params: serde_json::Value,
        sig: Vec<String>,
        timeout: Duration,
    ) -> Result<serde_json::Value, ClearnodeError> {
        if !self.is_open() {
            return Err(ClearnodeError::ConnectionClosed);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let timestamp = chrono::Utc::now().timestamp_millis() as u64;
        let frame = RequestFrame {
            req: (id, method.to_string(), params, timestamp),
            sig,
        };
        self.send_and_wait(id, frame, timeout).await
    }

    pub async fn request(
        &self,
        method: &str,
        params: serde_json::Value,
        signer: Option<&LocalWallet>,
    ) -> Result<serde_json::Value, ClearnodeError> {
        match signer {
            Some(key) => {
                self.request_signed_by(method, params, &[key], self.response_timeout)
                    .await
            }
            None => {
                self.request_with_sigs(method, params, Vec::new(), self.response_timeout)
                    .await
            }
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.response_timeout
    }

    async fn send_and_wait(
        &self,
        id: u64,
        frame: RequestFrame,
        timeout: Duration,
    ) -> Result<serde_json::Value, ClearnodeError> {
        let text = serde_json::to_string(&frame)
            .map_err(|e| ClearnodeError::Protocol(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        // Removes the waiter on every exit path, including cancellation of
        // the awaiting task; removal after a normal resolution is a no-op
        let _guard = WaiterGuard {
            pending: &self.pending,
            id,
        };

        if let Err(e) = self.writer.lock().await.send(Message::Text(text)).await {
            return Err(ClearnodeError::Unreachable(e.to_string()));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClearnodeError::ConnectionClosed),
            Err(_) => Err(ClearnodeError::Timeout),
        }
    }

    async fn read_loop(conn: Arc<Self>, mut read: SplitStream<WsStream>) {
        while let Some(message) = read.next().await {
            match message {
                Ok(Message::Text(text)) => conn.route_frame(&text),
                Ok(Message::Ping(data)) => {
                    let _ = conn.writer.lock().await.send(Message::Pong(data)).await;
                }
                Ok(Message::Pong(_)) => {}
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("clearnode read error: {}", e);
                    break;
                }
            }
        }

        conn.open.store(false, Ordering::Release);
        conn.closed.notify_waiters();

        // Fail everything still waiting for a response on this socket
        let drained: Vec<Waiter> = {
            let mut pending = conn.pending.lock();
            pending.drain().map(|(_, waiter)| waiter).collect()
        };
        for waiter in drained {
            let _ = waiter.send(Err(ClearnodeError::ConnectionClosed));
        }
        tracing::info!("clearnode connection closed");
    }

    fn route_frame(&self, text: &str) {
        let frame: ResponseFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("unparseable clearnode frame: {}", e);
                return;
            }
        };

        let (id, method, payload, _timestamp) = frame.res;
        let waiter = self.pending.lock().remove(&id);
        let Some(waiter) = waiter else {
            tracing::debug!("clearnode frame for unknown request id {}", id);
            return;
        };

        let result = if method == METHOD_ERROR {
            Err(ClearnodeError::ConsensusRejected(payload.to_string()))
        } else {
            Ok(payload)
        };
        let _ = waiter.send(result);
    }

    async fn ping_loop(conn: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if !conn.is_open() {
                break;
            }
            if let Err(e) = conn.writer.lock().await.send(Message::Ping(Vec::new())).await {
                tracing::warn!("clearnode keepalive failed: {}", e);
                break;
            }
        }
    }

    /// Close the socket; pending waiters resolve with `ConnectionClosed`
    /// once the reader observes the close.
    pub async fn close(&self) {
        self.open.store(false, Ordering::Release);
        let _ = self.writer.lock().await.send(Message::Close(None)).await;
    }
}

struct WaiterGuard<'a> {
    pending: &'a parking_lot::Mutex<HashMap<u64, Waiter>>,
    id: u64,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

/// Deserialize the first element of an array payload, or the payload itself
/// when the network answers with a bare object.
pub fn parse_payload<T: serde::de::DeserializeOwned>(
    payload: serde_json::Value,
) -> Result<T, ClearnodeError> {
    let value = match payload {
        serde_json::Value::Array(mut items) if !items.is_empty() => items.remove(0),
        other => other,
    };
    serde_json::from_value(value).map_err(|e| ClearnodeError::Protocol(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(serde::Deserialize)]
    struct Sample {
        value: i64,
    }

    #[test]
    fn test_parse_payload_array() {
        let parsed: Sample = parse_payload(json!([{"value": 42}])).unwrap();
        assert_eq!(parsed.value, 42);
    }

    #[test]
    fn test_parse_payload_object() {
        let parsed: Sample = parse_payload(json!({"value": 7})).unwrap();
        assert_eq!(parsed.value, 7);
    }

    #[test]
    fn test_parse_payload_rejects_mismatch() {
        assert!(parse_payload::<Sample>(json!(["nope"])).is_err());
    }
}
