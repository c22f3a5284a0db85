//! # Wire Protocol
//!
//! Request/response envelopes and the `Codec` trait the core routes through.
//! Envelope *serialization* is deliberately a plug point: the core only
//! requires a type implementing `Codec`, behind a trait object, so alternate
//! wire formats can be swapped in without touching the transport or
//! dispatch layers. `BincodeCodec` is the one concrete implementation this
//! crate ships.

use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, RpcError};

/// Message identifier. Zero is reserved and never assigned to a request.
pub type Mid = u32;

/// Maximum method name length, in bytes.
pub const MAX_METHOD_LEN: usize = 128;

/// Maximum params/result payload length, in bytes.
pub const MAX_PAYLOAD_LEN: usize = 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestEnvelope {
    pub mid: Mid,
    pub method: String,
    pub params: Vec<u8>,
}

impl RequestEnvelope {
    pub fn new(mid: Mid, method: impl Into<String>, params: Vec<u8>) -> Result<Self, RpcError> {
        let method = method.into();
        if mid == 0 {
            return Err(RpcError::new(ErrorCode::InvalidParam, "mid 0 is reserved"));
        }
        if method.len() > MAX_METHOD_LEN {
            return Err(RpcError::new(
                ErrorCode::InvalidParam,
                format!("method name exceeds {MAX_METHOD_LEN} bytes"),
            ));
        }
        if params.len() > MAX_PAYLOAD_LEN {
            return Err(RpcError::new(
                ErrorCode::InvalidParam,
                format!("params exceed {MAX_PAYLOAD_LEN} bytes"),
            ));
        }
        Ok(Self { mid, method, params })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseEnvelope {
    pub mid: Mid,
    /// Transport-level delivery status (0 = delivered).
    pub status: i32,
    /// Handler application-level error code (0 = success).
    pub error_code: i32,
    pub result: Vec<u8>,
}

impl ResponseEnvelope {
    pub fn success(mid: Mid, result: Vec<u8>) -> Self {
        Self {
            mid,
            status: ErrorCode::Ok.as_i32(),
            error_code: ErrorCode::Ok.as_i32(),
            result,
        }
    }

    pub fn status_error(mid: Mid, status: ErrorCode) -> Self {
        Self {
            mid,
            status: status.as_i32(),
            error_code: ErrorCode::Ok.as_i32(),
            result: Vec::new(),
        }
    }

    pub fn application_error(mid: Mid, error_code: i32, result: Vec<u8>) -> Self {
        Self {
            mid,
            status: ErrorCode::Ok.as_i32(),
            error_code,
            result,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ErrorCode::Ok.as_i32() && self.error_code == ErrorCode::Ok.as_i32()
    }
}

/// Envelope serialization plug point. Any codec satisfying this contract
/// (deterministic, self-delimiting within a frame payload) is acceptable.
pub trait Codec: Send + Sync + 'static {
    fn encode_request(&self, req: &RequestEnvelope) -> Result<Vec<u8>, RpcError>;
    fn decode_request(&self, bytes: &[u8]) -> Result<RequestEnvelope, RpcError>;
    fn encode_response(&self, resp: &ResponseEnvelope) -> Result<Vec<u8>, RpcError>;
    fn decode_response(&self, bytes: &[u8]) -> Result<ResponseEnvelope, RpcError>;
}

/// Default codec: bincode over the envelope structs above.
#[derive(Debug, Default, Clone, Copy)]
pub struct BincodeCodec;

impl Codec for BincodeCodec {
    fn encode_request(&self, req: &RequestEnvelope) -> Result<Vec<u8>, RpcError> {
        bincode::serialize(req).map_err(|e| RpcError::new(ErrorCode::Protocol, e.to_string()))
    }

    fn decode_request(&self, bytes: &[u8]) -> Result<RequestEnvelope, RpcError> {
        bincode::deserialize(bytes).map_err(|e| RpcError::new(ErrorCode::Protocol, e.to_string()))
    }

    fn encode_response(&self, resp: &ResponseEnvelope) -> Result<Vec<u8>, RpcError> {
        bincode::serialize(resp).map_err(|e| RpcError::new(ErrorCode::Protocol, e.to_string()))
    }

    fn decode_response(&self, bytes: &[u8]) -> Result<ResponseEnvelope, RpcError> {
        bincode::deserialize(bytes).map_err(|e| RpcError::new(ErrorCode::Protocol, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips_through_bincode() {
        let codec = BincodeCodec;
        let req = RequestEnvelope::new(1, "echo", vec![1, 2, 3]).unwrap();
        let bytes = codec.encode_request(&req).unwrap();
        let decoded = codec.decode_request(&bytes).unwrap();
        assert_eq!(req, decoded);
    }

    #[test]
    fn response_round_trips_through_bincode() {
        let codec = BincodeCodec;
        let resp = ResponseEnvelope::success(7, vec![9, 9]);
        let bytes = codec.encode_response(&resp).unwrap();
        let decoded = codec.decode_response(&bytes).unwrap();
        assert_eq!(resp, decoded);
    }

    #[test]
    fn rejects_reserved_mid() {
        assert!(RequestEnvelope::new(0, "echo", vec![]).is_err());
    }

    #[test]
    fn rejects_oversized_method_name() {
        let long = "a".repeat(MAX_METHOD_LEN + 1);
        assert!(RequestEnvelope::new(1, long, vec![]).is_err());
    }
}
