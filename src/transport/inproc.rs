//! In-process transport: delivery through a process-wide registry instead of
//! a kernel socket. A `OnceLock<Mutex<HashMap<String, Endpoint>>>` registry
//! of listening endpoints is keyed by name and looked up by `inproc://NAME`.
//!
//! Delivery is synchronous in the sense that `send`/`send_to`/`broadcast`
//! hand the payload directly to the peer's channel via `try_send` rather
//! than going through any serialization or kernel buffering — the one
//! transport where fan-out (`broadcast`) is actually supported.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{PeerId, Transport};
use crate::error::{ErrorCode, RpcError};

struct Endpoint {
    /// Channel the listening server reads `(peer, payload)` pairs from.
    inbound: mpsc::Sender<(PeerId, Vec<u8>)>,
    /// Per-connected-peer channel the server writes responses to.
    peers: Arc<Mutex<HashMap<PeerId, mpsc::Sender<Vec<u8>>>>>,
    next_peer_id: Arc<Mutex<u64>>,
}

fn registry() -> &'static Mutex<HashMap<String, Endpoint>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, Endpoint>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

pub struct InprocTransport {
    name: String,
    /// Set once this instance is the listening side; used so `close` only
    /// removes the registry entry it created.
    is_listener: bool,
    /// Set once this instance is a connected client; used to route `send`.
    client_peer_id: Option<PeerId>,
    client_outbound: Option<mpsc::Sender<Vec<u8>>>,
    connected: bool,
}

impl InprocTransport {
    pub fn new(name: String) -> Self {
        Self {
            name,
            is_listener: false,
            client_peer_id: None,
            client_outbound: None,
            connected: false,
        }
    }
}

#[async_trait]
impl Transport for InprocTransport {
    async fn listen(&mut self) -> Result<mpsc::Receiver<(PeerId, Vec<u8>)>, RpcError> {
        let mut reg = registry().lock().unwrap();
        if reg.contains_key(&self.name) {
            return Err(RpcError::new(
                ErrorCode::AlreadyExists,
                format!("in-process endpoint '{}' already registered", self.name),
            ));
        }
        let (tx, rx) = mpsc::channel(1024);
        reg.insert(
            self.name.clone(),
            Endpoint {
                inbound: tx,
                peers: Arc::new(Mutex::new(HashMap::new())),
                next_peer_id: Arc::new(Mutex::new(1)),
            },
        );
        self.is_listener = true;
        self.connected = true;
        Ok(rx)
    }

    async fn connect(&mut self) -> Result<mpsc::Receiver<Vec<u8>>, RpcError> {
        let (peer_id, inbound, peers) = {
            let reg = registry().lock().unwrap();
            let endpoint = reg.get(&self.name).ok_or_else(|| {
                RpcError::new(
                    ErrorCode::ServiceNotFound,
                    format!("no in-process endpoint listening as '{}'", self.name),
                )
            })?;
            let mut next = endpoint.next_peer_id.lock().unwrap();
            let peer_id = *next;
            *next += 1;
            (peer_id, endpoint.inbound.clone(), endpoint.peers.clone())
        };

        let (out_tx, out_rx) = mpsc::channel(1024);
        peers.lock().unwrap().insert(peer_id, out_tx);

        self.client_peer_id = Some(peer_id);
        self.client_outbound = Some(
            // This is the channel the server's `inbound` side reads from:
            // storing it here lets `send` push straight into the listener.
            inbound_sender_for(&self.name, peer_id, inbound),
        );
        self.connected = true;
        Ok(out_rx)
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<(), RpcError> {
        let outbound = self
            .client_outbound
            .as_ref()
            .ok_or_else(|| RpcError::new(ErrorCode::NotConnected, "not connected"))?;
        outbound
            .try_send(bytes.to_vec())
            .map_err(|_| RpcError::new(ErrorCode::RateLimited, "in-process peer inbound queue full"))
    }

    async fn send_to(&mut self, peer: PeerId, bytes: &[u8]) -> Result<(), RpcError> {
        let reg = registry().lock().unwrap();
        let endpoint = reg
            .get(&self.name)
            .ok_or_else(|| RpcError::new(ErrorCode::NotConnected, "endpoint no longer registered"))?;
        let peers = endpoint.peers.lock().unwrap();
        let out = peers
            .get(&peer)
            .ok_or_else(|| RpcError::new(ErrorCode::NotConnected, format!("unknown peer {peer}")))?;
        out.try_send(bytes.to_vec())
            .map_err(|_| RpcError::new(ErrorCode::RateLimited, "in-process client inbound queue full"))
    }

    async fn broadcast(&mut self, bytes: &[u8]) -> Result<(), RpcError> {
        let reg = registry().lock().unwrap();
        let endpoint = reg
            .get(&self.name)
            .ok_or_else(|| RpcError::new(ErrorCode::NotConnected, "endpoint no longer registered"))?;
        let peers = endpoint.peers.lock().unwrap();
        for out in peers.values() {
            let _ = out.try_send(bytes.to_vec());
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), RpcError> {
        if self.is_listener {
            registry().lock().unwrap().remove(&self.name);
        }
        if let Some(peer_id) = self.client_peer_id.take() {
            if let Some(endpoint) = registry().lock().unwrap().get(&self.name) {
                endpoint.peers.lock().unwrap().remove(&peer_id);
            }
        }
        self.client_outbound = None;
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn name(&self) -> &'static str {
        "inproc"
    }
}

/// A client's `send` needs to push `(peer_id, payload)` into the listener's
/// single inbound channel. This adapts the listener's
/// `Sender<(PeerId, Vec<u8>)>` into a `Sender<Vec<u8>>` bound to one peer id
/// by wrapping it in a forwarding task, keeping `InprocTransport::send`'s
/// signature identical to the other transports'.
fn inbound_sender_for(
    _name: &str,
    peer_id: PeerId,
    inbound: mpsc::Sender<(PeerId, Vec<u8>)>,
) -> mpsc::Sender<Vec<u8>> {
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(1024);
    tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if inbound.try_send((peer_id, payload)).is_err() {
                break;
            }
        }
    });
    tx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn client_server_echo() {
        let mut server = InprocTransport::new("svc-a".to_string());
        let mut server_rx = server.listen().await.unwrap();

        let mut client = InprocTransport::new("svc-a".to_string());
        let mut client_rx = client.connect().await.unwrap();

        client.send(b"ping").await.unwrap();
        let (peer, payload) = server_rx.recv().await.unwrap();
        assert_eq!(payload, b"ping");

        server.send_to(peer, b"pong").await.unwrap();
        let response = client_rx.recv().await.unwrap();
        assert_eq!(response, b"pong");
    }

    #[tokio::test]
    async fn duplicate_listen_is_rejected() {
        let mut first = InprocTransport::new("svc-b".to_string());
        first.listen().await.unwrap();

        let mut second = InprocTransport::new("svc-b".to_string());
        let err = second.listen().await.unwrap_err();
        assert_eq!(err.code, ErrorCode::AlreadyExists);
    }

    #[tokio::test]
    async fn connect_without_listener_is_service_not_found() {
        let mut client = InprocTransport::new("svc-nonexistent".to_string());
        let err = client.connect().await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ServiceNotFound);
    }

    #[tokio::test]
    async fn broadcast_reaches_all_connected_peers() {
        let mut server = InprocTransport::new("svc-c".to_string());
        let _server_rx = server.listen().await.unwrap();

        let mut client_a = InprocTransport::new("svc-c".to_string());
        let mut rx_a = client_a.connect().await.unwrap();
        let mut client_b = InprocTransport::new("svc-c".to_string());
        let mut rx_b = client_b.connect().await.unwrap();

        server.broadcast(b"fanout").await.unwrap();
        assert_eq!(rx_a.recv().await.unwrap(), b"fanout");
        assert_eq!(rx_b.recv().await.unwrap(), b"fanout");
    }
}
