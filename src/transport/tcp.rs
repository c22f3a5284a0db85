//! TCP transport. Addresses of the form `tcp://host:port`. Backlog 128 on
//! listen; client connect configures `TCP_NODELAY` for low-latency sends via
//! `socket2`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{PeerId, Transport, READ_BUFFER_SIZE};
use crate::error::{ErrorCode, RpcError};
use crate::frame::{self, Decoded};

const LISTEN_BACKLOG: i32 = 128;
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Bind with an explicit listen backlog of 128, which
/// `tokio::net::TcpListener::bind` does not expose directly.
fn bind_with_backlog(addr: &str) -> Result<TcpListener, RpcError> {
    let sock_addr: std::net::SocketAddr = addr
        .parse()
        .map_err(|_| RpcError::new(ErrorCode::InvalidParam, format!("invalid TCP address: {addr}")))?;
    let domain = socket2::Domain::for_address(sock_addr);
    let socket = socket2::Socket::new(domain, socket2::Type::STREAM, Some(socket2::Protocol::TCP))
        .map_err(RpcError::from)?;
    socket.set_reuse_address(true).map_err(RpcError::from)?;
    socket.set_nonblocking(true).map_err(RpcError::from)?;
    socket.bind(&sock_addr.into()).map_err(RpcError::from)?;
    socket.listen(LISTEN_BACKLOG).map_err(RpcError::from)?;
    TcpListener::from_std(socket.into()).map_err(RpcError::from)
}

pub struct TcpTransport {
    host: String,
    port: u16,
    write_half: Option<OwnedWriteHalf>,
    connections: Arc<Mutex<HashMap<PeerId, OwnedWriteHalf>>>,
    next_peer_id: Arc<AtomicU64>,
    connected: bool,
    accept_task: Option<tokio::task::JoinHandle<()>>,
    read_tasks: Arc<Mutex<Vec<tokio::task::JoinHandle<()>>>>,
}

impl TcpTransport {
    pub fn new(host: String, port: u16) -> Self {
        Self {
            host,
            port,
            write_half: None,
            connections: Arc::new(Mutex::new(HashMap::new())),
            next_peer_id: Arc::new(AtomicU64::new(1)),
            connected: false,
            accept_task: None,
            read_tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn apply_nodelay(stream: &TcpStream) -> Result<(), RpcError> {
        stream.set_nodelay(true).map_err(RpcError::from)
    }

    async fn read_loop(
        mut read_half: tokio::net::tcp::OwnedReadHalf,
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
                            warn!("TCP framing error, closing peer: {e}");
                            on_close();
                            return;
                        }
                    }
                },
                Err(e) => {
                    debug!("TCP read error, closing peer: {e}");
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
impl Transport for TcpTransport {
    async fn listen(&mut self) -> Result<mpsc::Receiver<(PeerId, Vec<u8>)>, RpcError> {
        let listener = bind_with_backlog(&self.addr())?;
        debug!("TCP listening on {}", self.addr());

        let (tx, rx) = mpsc::channel(1024);
        let connections = self.connections.clone();
        let next_peer_id = self.next_peer_id.clone();
        let read_tasks = self.read_tasks.clone();
        self.connected = true;

        let accept_task = tokio::spawn(async move {
            loop {
                let (stream, peer_addr) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("TCP accept failed: {e}");
                        break;
                    }
                };
                if let Err(e) = Self::apply_nodelay(&stream) {
                    warn!("failed to tune accepted TCP socket: {e}");
                }
                let peer_id = next_peer_id.fetch_add(1, Ordering::Relaxed);
                debug!("accepted TCP peer {peer_id} from {peer_addr}");

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
        let stream = TcpStream::connect(self.addr()).await.map_err(RpcError::from)?;
        Self::apply_nodelay(&stream)?;
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
            .ok_or_else(|| RpcError::new(ErrorCode::NotConnected, "no active TCP connection"))?;
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
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn name(&self) -> &'static str {
        "tcp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn client_server_echo_frame() {
        let mut server = TcpTransport::new("127.0.0.1".to_string(), 0);
        // port 0 would pick an ephemeral port but we need to know it for the
        // client; bind explicitly to a fixed high port instead.
        server.port = 19501;
        let mut server_rx = server.listen().await.unwrap();

        let mut client = TcpTransport::new("127.0.0.1".to_string(), 19501);
        let mut client_rx = client.connect().await.unwrap();

        client.send(b"hello").await.unwrap();
        let (peer, payload) = server_rx.recv().await.unwrap();
        assert_eq!(payload, b"hello");

        server.send_to(peer, b"world").await.unwrap();
        let response = client_rx.recv().await.unwrap();
        assert_eq!(response, b"world");
    }

    #[tokio::test]
    async fn close_stops_accepting_new_connections() {
        let mut server = TcpTransport::new("127.0.0.1".to_string(), 19502);
        server.listen().await.unwrap();
        server.close().await.unwrap();
        // Give the aborted accept task a moment to actually drop the
        // listener and release the port.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut late_client = TcpTransport::new("127.0.0.1".to_string(), 19502);
        assert!(late_client.connect().await.is_err());
    }
}
