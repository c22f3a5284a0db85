//! # Transport Abstraction
//!
//! A unified interface over the three wire transports this fabric supports
//! (TCP, IPC/Unix-domain-socket, in-process) as one async trait object
//! (`Box<dyn Transport>`), with a shared per-connection bookkeeping pattern:
//! an atomic peer-id counter plus a `Mutex`-guarded connection map.
//!
//! ## Transport guarantees
//!
//! 1. Ordered, reliable bytes between a given client and the server within
//!    one connection.
//! 2. No blocking send: overflow/backpressure surfaces as a retryable
//!    error from `send`/`send_to`.
//! 3. On peer-close, the transport's inbound channel closes exactly once;
//!    further sends to that peer fail with `NotConnected`.

pub mod inproc;
pub mod ipc;
pub mod tcp;

pub use inproc::InprocTransport;
pub use ipc::IpcStreamTransport;
pub use tcp::TcpTransport;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::Address;
use crate::error::{ErrorCode, RpcError};

/// Per-connection identifier assigned by the server on accept, used to
/// route a response back to the originating peer.
pub type PeerId = u64;

/// Per-client-transport read buffer size.
pub const READ_BUFFER_SIZE: usize = 8 * 1024;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Bind and begin accepting connections. Returns a channel over which
    /// `(peer, frame_payload)` pairs arrive as they are decoded off the
    /// wire, in per-peer arrival order.
    async fn listen(&mut self) -> Result<mpsc::Receiver<(PeerId, Vec<u8>)>, RpcError>;

    /// Connect to a server at this transport's configured address. Returns
    /// a channel over which decoded response payloads arrive.
    async fn connect(&mut self) -> Result<mpsc::Receiver<Vec<u8>>, RpcError>;

    /// Client-side send: transmit one frame to the server this transport is
    /// connected to.
    async fn send(&mut self, bytes: &[u8]) -> Result<(), RpcError>;

    /// Server-side send: transmit one frame to a specific connected peer.
    async fn send_to(&mut self, peer: PeerId, bytes: &[u8]) -> Result<(), RpcError>;

    /// Server-side fan-out: transmit one frame to every connected peer.
    /// Only the in-process transport implements true fan-out; other
    /// transports report `Error` rather than silently iterating peers one
    /// at a time.
    async fn broadcast(&mut self, bytes: &[u8]) -> Result<(), RpcError> {
        let _ = bytes;
        Err(RpcError::new(
            ErrorCode::Error,
            format!("{} does not support broadcast", self.name()),
        ))
    }

    async fn close(&mut self) -> Result<(), RpcError>;

    fn is_connected(&self) -> bool;

    fn name(&self) -> &'static str;
}

/// Construct the transport implementation matching an `Address`'s scheme.
pub fn for_address(address: Address) -> Box<dyn Transport> {
    match address {
        Address::Tcp(host, port) => Box::new(TcpTransport::new(host, port)),
        Address::Ipc(path) => Box::new(IpcStreamTransport::new(path)),
        Address::Inproc(name) => Box::new(InprocTransport::new(name)),
    }
}
