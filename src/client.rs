//! # Client Multiplexer
//!
//! One `Client` owns one transport connection and multiplexes concurrent
//! `call()`s over it by message id: a pending-request table keyed by `Mid`
//! resolves the right caller's future when its reply arrives, regardless of
//! response ordering on the shared stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{oneshot, Semaphore};
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{ErrorCode, RpcError};
use crate::protocol::{BincodeCodec, Codec, Mid, RequestEnvelope, ResponseEnvelope};
use crate::reactor::Reactor;
use crate::transport::{self, Transport};

struct PendingCall {
    respond_to: oneshot::Sender<ResponseEnvelope>,
}

/// Allocates message ids, skipping ids currently in flight. Only fails once
/// every one of the 2^32 - 1 non-zero ids is outstanding at once.
struct MidAllocator {
    next: AtomicU32,
}

impl MidAllocator {
    fn new() -> Self {
        Self { next: AtomicU32::new(1) }
    }

    fn allocate(&self, in_flight: &HashMap<Mid, PendingCall>) -> Result<Mid, RpcError> {
        if in_flight.len() as u64 >= u32::MAX as u64 {
            return Err(RpcError::new(
                ErrorCode::RateLimited,
                "message id space exhausted: every mid is in flight",
            ));
        }
        loop {
            let candidate = self.next.fetch_add(1, Ordering::Relaxed);
            let mid = if candidate == 0 { self.next.fetch_add(1, Ordering::Relaxed) } else { candidate };
            if mid != 0 && !in_flight.contains_key(&mid) {
                return Ok(mid);
            }
        }
    }
}

/// Client-side RPC handle. One instance per logical connection; `call` may
/// be invoked concurrently from clones sharing the same transport.
pub struct Client {
    config: ClientConfig,
    codec: Arc<dyn Codec>,
    transport: Arc<tokio::sync::Mutex<Box<dyn Transport>>>,
    pending: Arc<Mutex<HashMap<Mid, PendingCall>>>,
    mid_allocator: Arc<MidAllocator>,
    concurrency_limit: Option<Arc<Semaphore>>,
    reactor: Reactor,
    disconnected: std::sync::atomic::AtomicBool,
}

impl Client {
    /// Connect to the configured address and start the background reader
    /// that demultiplexes responses onto their waiting callers.
    pub async fn connect(config: ClientConfig) -> Result<Self, RpcError> {
        let mut transport = transport::for_address(config.address.clone());
        let inbound = tokio::time::timeout(config.connect_timeout, transport.connect())
            .await
            .map_err(|_| RpcError::timeout("connect timed out"))??;

        let codec: Arc<dyn Codec> = Arc::new(BincodeCodec);
        let pending: Arc<Mutex<HashMap<Mid, PendingCall>>> = Arc::new(Mutex::new(HashMap::new()));
        let concurrency_limit = config.max_concurrent.map(|n| Arc::new(Semaphore::new(n)));

        let reactor = Reactor::current();
        reactor.spawn(Self::response_loop(inbound, pending.clone(), codec.clone()));

        Ok(Self {
            config,
            codec,
            transport: Arc::new(tokio::sync::Mutex::new(transport)),
            pending,
            mid_allocator: Arc::new(MidAllocator::new()),
            concurrency_limit,
            reactor,
            disconnected: std::sync::atomic::AtomicBool::new(false),
        })
    }

    async fn response_loop(
        mut inbound: tokio::sync::mpsc::Receiver<Vec<u8>>,
        pending: Arc<Mutex<HashMap<Mid, PendingCall>>>,
        codec: Arc<dyn Codec>,
    ) {
        while let Some(bytes) = inbound.recv().await {
            let response = match codec.decode_response(&bytes) {
                Ok(resp) => resp,
                Err(e) => {
                    warn!("failed to decode response: {e}");
                    continue;
                }
            };
            let waiter = pending.lock().remove(&response.mid);
            match waiter {
                Some(call) => {
                    let _ = call.respond_to.send(response);
                }
                None => debug!("response for unknown or already-resolved mid {}", response.mid),
            }
        }
        // Connection closed: wake every still-pending call with NotConnected
        // rather than leaving it hanging forever.
        for (_, call) in pending.lock().drain() {
            let _ = call.respond_to.send(ResponseEnvelope::status_error(0, ErrorCode::NotConnected));
        }
    }

    /// Invoke `method` with `params`, awaiting the matching response. Honors
    /// `ClientConfig::call_timeout` and `max_retries` (transport-level
    /// retries only — an application error response is never retried).
    pub async fn call(&self, method: &str, params: Vec<u8>) -> Result<Vec<u8>, RpcError> {
        let _permit = match &self.concurrency_limit {
            Some(sem) => Some(sem.clone().try_acquire_owned().map_err(|_| {
                RpcError::new(ErrorCode::RateLimited, "max_concurrent in-flight calls reached")
            })?),
            None => None,
        };

        let mut attempt = 0;
        loop {
            match self.call_once(method, params.clone()).await {
                Ok(result) => return Ok(result),
                Err(e) if attempt < self.config.max_retries && is_retryable(&e) => {
                    attempt += 1;
                    debug!("retrying '{method}' after {e} (attempt {attempt})");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn call_once(&self, method: &str, params: Vec<u8>) -> Result<Vec<u8>, RpcError> {
        let mid = {
            let pending = self.pending.lock();
            self.mid_allocator.allocate(&pending)?
        };
        let req = RequestEnvelope::new(mid, method, params)?;
        let bytes = self.codec.encode_request(&req)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(mid, PendingCall { respond_to: tx });

        if let Err(e) = self.transport.lock().await.send(&bytes).await {
            self.pending.lock().remove(&mid);
            return Err(e);
        }

        let response = match self.config.call_timeout {
            Some(deadline) => tokio::time::timeout(deadline, rx).await.map_err(|_| {
                self.pending.lock().remove(&mid);
                RpcError::timeout(format!("call to '{method}' timed out"))
            })?,
            None => rx.await,
        }
        .map_err(|_| RpcError::new(ErrorCode::NotConnected, "connection closed before reply"))?;

        if response.status != ErrorCode::Ok.as_i32() {
            return Err(RpcError::new(status_to_code(response.status), response_status_message(&response)));
        }
        if response.error_code != ErrorCode::Ok.as_i32() {
            return Err(RpcError::new(
                ErrorCode::Error,
                format!("handler returned application error code {}", response.error_code),
            ));
        }
        Ok(response.result)
    }

    /// Fire a batch of independent calls and await all of them, preserving
    /// input order in the output.
    pub async fn call_batch(
        &self,
        calls: Vec<(&str, Vec<u8>)>,
    ) -> Vec<Result<Vec<u8>, RpcError>> {
        let futures = calls.into_iter().map(|(method, params)| self.call(method, params));
        futures::future::join_all(futures).await
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Close the underlying transport. Every call still awaiting a reply is
    /// failed with `Cancelled` before the transport is torn down, so no
    /// caller is left hanging on the response loop noticing the closed
    /// channel later. Idempotent: a second call is a no-op.
    pub async fn disconnect(&self) -> Result<(), RpcError> {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        for (_, call) in self.pending.lock().drain() {
            let _ = call.respond_to.send(ResponseEnvelope::status_error(0, ErrorCode::Cancelled));
        }
        self.transport.lock().await.close().await
    }

    /// Final, idempotent teardown. Disconnects first if still connected, so
    /// it is always safe to call on its own in place of `disconnect()`.
    pub async fn free(&self) -> Result<(), RpcError> {
        self.disconnect().await
    }
}

#[cfg(debug_assertions)]
impl Drop for Client {
    fn drop(&mut self) {
        if !self.disconnected.load(Ordering::SeqCst) {
            warn!("Client dropped without calling disconnect() or free() first");
        }
    }
}

fn is_retryable(err: &RpcError) -> bool {
    matches!(err.code, ErrorCode::Timeout | ErrorCode::NotConnected | ErrorCode::RateLimited)
}

fn status_to_code(status: i32) -> ErrorCode {
    match status {
        1 => ErrorCode::InvalidParam,
        2 => ErrorCode::NoMemory,
        3 => ErrorCode::ServiceNotFound,
        4 => ErrorCode::Timeout,
        5 => ErrorCode::RateLimited,
        6 => ErrorCode::NotConnected,
        7 => ErrorCode::AlreadyExists,
        8 => ErrorCode::Cancelled,
        9 => ErrorCode::Protocol,
        _ => ErrorCode::Error,
    }
}

fn response_status_message(response: &ResponseEnvelope) -> String {
    format!("request failed with status {}", status_to_code(response.status))
}
