//! # Configuration Surface
//!
//! `ClientConfig`/`ServerConfig` are small typed structs with explicit
//! defaults, consumed by `Client`/`Server` rather than threaded through as
//! loose parameters.

use std::str::FromStr;
use std::time::Duration;

use crate::error::{ErrorCode, RpcError};

/// Transport addresses are URL-like strings: `tcp://HOST:PORT`,
/// `ipc://PATH`, `inproc://NAME`. Parsing is total — malformed addresses
/// return `INVALID_PARAM` before any resource is acquired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Tcp(String, u16),
    Ipc(String),
    Inproc(String),
}

impl FromStr for Address {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RpcError::new(ErrorCode::InvalidParam, format!("malformed address: {s}"));

        if let Some(rest) = s.strip_prefix("tcp://") {
            let (host, port) = rest.rsplit_once(':').ok_or_else(invalid)?;
            if host.is_empty() {
                return Err(invalid());
            }
            let port: u16 = port.parse().map_err(|_| invalid())?;
            Ok(Address::Tcp(host.to_string(), port))
        } else if let Some(rest) = s.strip_prefix("ipc://") {
            if rest.is_empty() {
                return Err(invalid());
            }
            Ok(Address::Ipc(rest.to_string()))
        } else if let Some(rest) = s.strip_prefix("inproc://") {
            if rest.is_empty() {
                return Err(invalid());
            }
            Ok(Address::Inproc(rest.to_string()))
        } else {
            Err(invalid())
        }
    }
}

/// Communication pattern this endpoint participates in. Currently every
/// endpoint is a plain request/response peer; the field exists so a future
/// pub/sub or streaming pattern can be added without breaking the
/// configuration surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommType {
    #[default]
    ServerClient,
}

/// Tuning hint for buffer sizes and batching thresholds. Defaults to
/// `HighThroughput`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PerformanceMode {
    #[default]
    HighThroughput,
    LowLatency,
}

impl PerformanceMode {
    /// Socket/ring buffer size implied by this mode.
    pub fn buffer_size(self) -> usize {
        match self {
            PerformanceMode::HighThroughput => 64 * 1024,
            PerformanceMode::LowLatency => 8 * 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub address: Address,
    pub comm_type: CommType,
    pub performance_mode: PerformanceMode,
}

impl ServerConfig {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            comm_type: CommType::default(),
            performance_mode: PerformanceMode::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub address: Address,
    pub comm_type: CommType,
    pub performance_mode: PerformanceMode,
    /// Ceiling for in-flight requests. `None` means unbounded.
    pub max_concurrent: Option<usize>,
    /// Automatic retry count on transport-level failure. Default 0.
    pub max_retries: u32,
    pub connect_timeout: Duration,
    /// Per-call deadline. `None` means no deadline.
    pub call_timeout: Option<Duration>,
}

impl ClientConfig {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            comm_type: CommType::default(),
            performance_mode: PerformanceMode::default(),
            max_concurrent: None,
            max_retries: 0,
            connect_timeout: Duration::from_millis(5000),
            call_timeout: None,
        }
    }
}
