//! IPC transport: a local stream over a named Unix domain socket path.
//! Framing identical to TCP. Follows a socket-file ownership rule: only the
//! listening side unlinks the path on close.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{PeerId, Transport, READ_BUFFER_SIZE};
use crate::error::{ErrorCode, RpcError};
use crate::frame::{self, Decoded};

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

pub struct IpcStreamTransport {
    path: String,
    write_half: Option<OwnedWriteHalf>,
    connections: Arc<Mutex<HashMap<PeerId, OwnedWriteHalf>>>,
    next_peer_id: Arc<AtomicU64>,
    owns_socket_file: bool,
    connected: bool,
    accept_task: Option<tokio::task::JoinHandle<()>>,
    read_tasks: Arc<Mutex<Vec<tokio::task::JoinHandle<()>>>>,
}

impl IpcStreamTransport {
    pub fn new(path: String) -> Self {
        Self {
            path,
            write_half: None,
            connections: Arc::new(Mutex::new(HashMap::new())),
            next_peer_id: Arc::new(AtomicU64::new(1)),
            owns_socket_file: false,
            connected: false,
            accept_task: None,
            read_tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    async fn read_loop(
        mut read_half: tokio::net::unix::OwnedReadHalf,
        forward: impl Fn(Vec<u8>) -> bool + Send + 'static,
        on_close: impl FnOnce() + Send + 'static,
    ) {
        let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
        loop {
            match read_half.read_buf(&mut buf).await {
                Ok(0) => break,
                Ok(_) => loop {
                    match frame::decode(&mut buf) {
                        Ok(Decoded::Frame(payload)) => {
                            if !forward(payload.to_vec()) {
                                on_close();
                                return;
                            }
                        }
                        Ok(Decoded::NeedMore) => break,
                        Err(e) => {
                            warn!("IPC framing error, closing peer: {e}");
                            on_close();
                            return;
                        }
                    }
                },
                Err(e) => {
                    debug!("IPC read error, closing peer: {e}");
                    break;
                }
            }
        }
        on_close();
    }

    async fn write_frame(write_half: &mut OwnedWriteHalf, bytes: &[u8]) -> Result<(), RpcError> {
        let frame = frame::encode(bytes)?;
        let write_fut = async {
            write_half.write_all(&frame).await?;
            write_half.flush().await
        };
        match timeout(SEND_TIMEOUT, write_fut).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(RpcError::from(e)),
            Err(_) => Err(RpcError::new(
                ErrorCode::RateLimited,
                "send blocked past backpressure timeout",
            )),
        }
    }
}

#[async_trait]
impl Transport for IpcStreamTransport {
    async fn listen(&mut self) -> Result<mpsc::Receiver<(PeerId, Vec<u8>)>, RpcError> {
        // Best-effort remove a stale socket file left by a previous run.
        let _ = std::fs::remove_file(&self.path);
        self.owns_socket_file = true;

        let listener = UnixListener::bind(&self.path).map_err(RpcError::from)?;
        debug!("IPC listening on {}", self.path);

        let (tx, rx) = mpsc::channel(1024);
        let connections = self.connections.clone();
        let next_peer_id = self.next_peer_id.clone();
        let read_tasks = self.read_tasks.clone();
        self.connected = true;

        let accept_task = tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("IPC accept failed: {e}");
                        break;
                    }
                };
                let peer_id = next_peer_id.fetch_add(1, Ordering::Relaxed);
                debug!("accepted IPC peer {peer_id}");

                let (read_half, write_half) = stream.into_split();
                connections.lock().await.insert(peer_id, write_half);

                let tx = tx.clone();
                let connections = connections.clone();
                let read_task = tokio::spawn(Self::read_loop(
                    read_half,
                    move |payload| tx.try_send((peer_id, payload)).is_ok(),
                    move || {
                        let connections = connections.clone();
                        tokio::spawn(async move {
                            connections.lock().await.remove(&peer_id);
                        });
                    },
                ));
                read_tasks.lock().await.push(read_task);
            }
        });
        self.accept_task = Some(accept_task);

        Ok(rx)
    }

    async fn connect(&mut self) -> Result<mpsc::Receiver<Vec<u8>>, RpcError> {
        let stream = UnixStream::connect(&self.path).await.map_err(RpcError::from)?;
        let (read_half, write_half) = stream.into_split();
        self.write_half = Some(write_half);
        self.connected = true;

        let (tx, rx) = mpsc::channel(1024);
        tokio::spawn(Self::read_loop(
            read_half,
            move |payload| tx.try_send(payload).is_ok(),
            || {},
        ));
        Ok(rx)
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<(), RpcError> {
        let write_half = self
            .write_half
            .as_mut()
            .ok_or_else(|| RpcError::new(ErrorCode::NotConnected, "no active IPC connection"))?;
        Self::write_frame(write_half, bytes).await
    }

    async fn send_to(&mut self, peer: PeerId, bytes: &[u8]) -> Result<(), RpcError> {
        let mut conns = self.connections.lock().await;
        let write_half = conns
            .get_mut(&peer)
            .ok_or_else(|| RpcError::new(ErrorCode::NotConnected, format!("unknown peer {peer}")))?;
        Self::write_frame(write_half, bytes).await
    }

    async fn close(&mut self) -> Result<(), RpcError> {
        if let Some(accept_task) = self.accept_task.take() {
            accept_task.abort();
        }
        for read_task in self.read_tasks.lock().await.drain(..) {
            read_task.abort();
        }
        self.write_half = None;
        self.connections.lock().await.clear();
        self.connected = false;
        if self.owns_socket_file {
            let _ = std::fs::remove_file(&self.path);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn name(&self) -> &'static str {
        "ipc"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn client_server_echo_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("evrpc-test.sock").to_string_lossy().to_string();

        let mut server = IpcStreamTransport::new(path.clone());
        let mut server_rx = server.listen().await.unwrap();

        let mut client = IpcStreamTransport::new(path);
        let mut client_rx = client.connect().await.unwrap();

        client.send(b"ping").await.unwrap();
        let (peer, payload) = server_rx.recv().await.unwrap();
        assert_eq!(payload, b"ping");

        server.send_to(peer, b"pong").await.unwrap();
        let response = client_rx.recv().await.unwrap();
        assert_eq!(response, b"pong");

        server.close().await.unwrap();
    }

    #[tokio::test]
    async fn close_stops_accepting_new_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("evrpc-test-close.sock").to_string_lossy().to_string();

        let mut server = IpcStreamTransport::new(path.clone());
        server.listen().await.unwrap();
        server.close().await.unwrap();

        let mut late_client = IpcStreamTransport::new(path);
        assert!(late_client.connect().await.is_err());
    }
}
