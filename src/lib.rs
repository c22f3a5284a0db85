//! # evrpc
//!
//! An in-process and networked RPC fabric over a cooperative event loop.
//! A client multiplexes concurrent calls over one connection; a server
//! dispatches inbound requests to registered method handlers by name;
//! three transports (`tcp://`, `ipc://`, `inproc://`) share one framing and
//! wire-protocol layer; a coordination layer composes calls with
//! `all`/`any`/`race`/`retry_with_backoff`/`timeout`.

pub mod client;
pub mod config;
pub mod coordination;
pub mod error;
pub mod frame;
pub mod logging;
pub mod metrics;
pub mod protocol;
pub mod reactor;
pub mod server;
pub mod transport;

pub use client::Client;
pub use config::{Address, ClientConfig, CommType, PerformanceMode, ServerConfig};
pub use error::{ErrorCode, Result, RpcError};
pub use protocol::{BincodeCodec, Codec, RequestEnvelope, ResponseEnvelope};
pub use reactor::{AsyncWakeup, Handle, LoopTimer, Reactor};
pub use server::Server;
pub use transport::{PeerId, Transport};

/// The current version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
