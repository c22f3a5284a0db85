//! # Error Kinds and Result Type
//!
//! The numeric error kinds this fabric exposes at every public boundary,
//! plus the typed `RpcError` that carries one of them. Handler failures
//! surface as a non-zero `error_code` inside a normal response (see
//! `protocol::ResponseEnvelope`), never as an `RpcError` — this type is for
//! failures the transport/dispatch/coordination layers themselves raise.

use thiserror::Error;

/// Numeric error kind, distinguishable and stable across the wire.
///
/// `status`/`error_code` fields on the wire carry the `i32` representation
/// of this enum; zero means success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    Ok = 0,
    InvalidParam = 1,
    NoMemory = 2,
    ServiceNotFound = 3,
    Timeout = 4,
    RateLimited = 5,
    NotConnected = 6,
    AlreadyExists = 7,
    Cancelled = 8,
    Protocol = 9,
    Error = 10,
}

impl ErrorCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCode::Ok => "OK",
            ErrorCode::InvalidParam => "INVALID_PARAM",
            ErrorCode::NoMemory => "NO_MEMORY",
            ErrorCode::ServiceNotFound => "SERVICE_NOT_FOUND",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::NotConnected => "NOT_CONNECTED",
            ErrorCode::AlreadyExists => "ALREADY_EXISTS",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::Protocol => "PROTOCOL",
            ErrorCode::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Typed error carried at the crate's public boundary.
#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct RpcError {
    pub code: ErrorCode,
    pub message: String,
}

impl RpcError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Timeout, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Cancelled, message)
    }
}

impl From<std::io::Error> for RpcError {
    fn from(e: std::io::Error) -> Self {
        let code = match e.kind() {
            std::io::ErrorKind::NotConnected | std::io::ErrorKind::BrokenPipe => {
                ErrorCode::NotConnected
            }
            std::io::ErrorKind::TimedOut => ErrorCode::Timeout,
            std::io::ErrorKind::AlreadyExists => ErrorCode::AlreadyExists,
            std::io::ErrorKind::InvalidInput | std::io::ErrorKind::InvalidData => {
                ErrorCode::InvalidParam
            }
            _ => ErrorCode::Error,
        };
        RpcError::new(code, e.to_string())
    }
}

impl From<crate::frame::FrameError> for RpcError {
    fn from(e: crate::frame::FrameError) -> Self {
        RpcError::new(ErrorCode::InvalidParam, e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;
