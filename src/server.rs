//! # Server Dispatcher
//!
//! Owns a name -> handler registry and the accept/dispatch loop over one
//! `Transport`: an accept loop spawns one reader per connection, and every
//! inbound frame is decoded as a `RequestEnvelope`, routed by method name,
//! and answered with a `ResponseEnvelope` sent back to the originating
//! peer.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, warn};

use crate::config::ServerConfig;
use crate::error::{ErrorCode, RpcError};
use crate::metrics::MethodMetrics;
use crate::protocol::{BincodeCodec, Codec, RequestEnvelope, ResponseEnvelope};
use crate::reactor::Reactor;
use crate::transport::{self, PeerId, Transport};

/// A registered method handler: takes the raw request params, returns the
/// raw result bytes or an application error code plus payload.
pub type HandlerResult = Result<Vec<u8>, (i32, Vec<u8>)>;
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
pub type Handler = Arc<dyn Fn(Vec<u8>) -> BoxFuture<HandlerResult> + Send + Sync>;

/// Dispatch server. One instance per bound address; `start` may only be
/// called once per instance.
pub struct Server {
    config: ServerConfig,
    handlers: Arc<RwLock<HashMap<String, Handler>>>,
    codec: Arc<dyn Codec>,
    metrics: Arc<MethodMetrics>,
    transport: Option<Arc<AsyncMutex<Box<dyn Transport>>>>,
    started: bool,
    freed: bool,
    reactor: Reactor,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            codec: Arc::new(BincodeCodec),
            metrics: Arc::new(MethodMetrics::new()),
            transport: None,
            started: false,
            freed: false,
            reactor: Reactor::current(),
        }
    }

    /// Register a method handler. Safe to call before or after `start()`:
    /// the dispatch loop reads the handler table fresh on every inbound
    /// frame, so there is no snapshot to go stale. Registering the same
    /// method name twice returns `AlreadyExists`.
    pub fn register<F, Fut>(&mut self, method: impl Into<String>, handler: F) -> Result<(), RpcError>
    where
        F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let method = method.into();
        let mut handlers = self.handlers.write();
        if handlers.contains_key(&method) {
            return Err(RpcError::new(
                ErrorCode::AlreadyExists,
                format!("method '{method}' already registered"),
            ));
        }
        handlers.insert(method, Arc::new(move |params| Box::pin(handler(params))));
        Ok(())
    }

    /// Bind the configured address and begin dispatching inbound requests.
    pub async fn start(&mut self) -> Result<(), RpcError> {
        if self.started {
            return Err(RpcError::new(ErrorCode::AlreadyExists, "server already started"));
        }
        let mut transport = transport::for_address(self.config.address.clone());
        let inbound = transport.listen().await?;
        self.started = true;

        let transport = Arc::new(AsyncMutex::new(transport));
        self.transport = Some(transport.clone());

        let handlers = self.handlers.clone();
        let codec = self.codec.clone();
        let metrics = self.metrics.clone();

        self.reactor
            .spawn(Self::dispatch_loop(transport, inbound, handlers, codec, metrics));
        Ok(())
    }

    async fn dispatch_loop(
        transport: Arc<AsyncMutex<Box<dyn Transport>>>,
        mut inbound: tokio::sync::mpsc::Receiver<(PeerId, Vec<u8>)>,
        handlers: Arc<RwLock<HashMap<String, Handler>>>,
        codec: Arc<dyn Codec>,
        metrics: Arc<MethodMetrics>,
    ) {
        while let Some((peer, payload)) = inbound.recv().await {
            let req = match codec.decode_request(&payload) {
                Ok(req) => req,
                Err(e) => {
                    warn!("failed to decode request from peer {peer}: {e}");
                    continue;
                }
            };

            let handler = handlers.read().get(&req.method).cloned();
            let response = match handler {
                None => ResponseEnvelope::status_error(req.mid, ErrorCode::ServiceNotFound),
                Some(handler) => {
                    let start = std::time::Instant::now();
                    let outcome = handler(req.params).await;
                    metrics.record(&req.method, start.elapsed());
                    match outcome {
                        Ok(result) => ResponseEnvelope::success(req.mid, result),
                        Err((error_code, result)) => {
                            ResponseEnvelope::application_error(req.mid, error_code, result)
                        }
                    }
                }
            };

            let bytes = match codec.encode_response(&response) {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!("failed to encode response for mid {}: {e}", req.mid);
                    continue;
                }
            };
            if let Err(e) = transport.lock().await.send_to(peer, &bytes).await {
                debug!("failed to send response to peer {peer}: {e}");
            }
        }
    }

    /// Broadcast a message to every connected peer via the in-process
    /// fan-out path. Non-in-process transports report `Error`.
    pub async fn broadcast(&mut self, bytes: &[u8]) -> Result<(), RpcError> {
        let transport = self
            .transport
            .as_ref()
            .ok_or_else(|| RpcError::new(ErrorCode::NotConnected, "server not started"))?;
        transport.lock().await.broadcast(bytes).await
    }

    pub fn metrics(&self) -> &MethodMetrics {
        self.metrics.as_ref()
    }

    /// Stop accepting; in-flight handlers already dispatched are left to
    /// complete, but no inbound frame accepted after this returns is
    /// dispatched. Idempotent: a second call is a no-op.
    pub async fn stop(&mut self) -> Result<(), RpcError> {
        if let Some(transport) = self.transport.take() {
            transport.lock().await.close().await?;
        }
        Ok(())
    }

    /// Final, idempotent teardown. Stops first if still running, then
    /// releases any remaining resources (e.g. an `inproc://` registry
    /// entry, removed by `Transport::close` during `stop()`).
    pub async fn free(&mut self) -> Result<(), RpcError> {
        if self.freed {
            return Ok(());
        }
        self.stop().await?;
        self.freed = true;
        Ok(())
    }
}

#[cfg(debug_assertions)]
impl Drop for Server {
    fn drop(&mut self) {
        if self.transport.is_some() && !self.freed {
            warn!("Server dropped without calling stop() or free() first");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Address;
    use crate::protocol::RequestEnvelope;

    #[tokio::test]
    async fn unknown_method_returns_service_not_found() {
        let mut server = Server::new(ServerConfig::new(Address::Inproc("srv-unknown".into())));
        server.start().await.unwrap();
        // Give the dispatch task a moment to finish registering the listener.
        tokio::task::yield_now().await;

        let mut client_transport = transport::InprocTransport::new("srv-unknown".to_string());
        let mut rx = client_transport.connect().await.unwrap();

        let codec = BincodeCodec;
        let req = RequestEnvelope::new(1, "does_not_exist", vec![]).unwrap();
        let bytes = codec.encode_request(&req).unwrap();
        client_transport.send(&bytes).await.unwrap();

        let response_bytes = rx.recv().await.unwrap();
        let response = codec.decode_response(&response_bytes).unwrap();
        assert_eq!(response.status, ErrorCode::ServiceNotFound.as_i32());
    }

    #[tokio::test]
    async fn registered_method_echoes_params() {
        let mut server = Server::new(ServerConfig::new(Address::Inproc("srv-echo".into())));
        server
            .register("echo", |params| async move { Ok(params) })
            .unwrap();
        server.start().await.unwrap();
        tokio::task::yield_now().await;

        let mut client_transport = transport::InprocTransport::new("srv-echo".to_string());
        let mut rx = client_transport.connect().await.unwrap();

        let codec = BincodeCodec;
        let req = RequestEnvelope::new(1, "echo", b"hi".to_vec()).unwrap();
        let bytes = codec.encode_request(&req).unwrap();
        client_transport.send(&bytes).await.unwrap();

        let response_bytes = rx.recv().await.unwrap();
        let response = codec.decode_response(&response_bytes).unwrap();
        assert!(response.is_success());
        assert_eq!(response.result, b"hi");
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let mut server = Server::new(ServerConfig::new(Address::Inproc("srv-dup".into())));
        server.register("m", |_| async { Ok(vec![]) }).unwrap();
        let err = server.register("m", |_| async { Ok(vec![]) }).unwrap_err();
        assert_eq!(err.code, ErrorCode::AlreadyExists);
    }

    #[tokio::test]
    async fn stop_frees_inproc_address_for_reuse() {
        let mut server = Server::new(ServerConfig::new(Address::Inproc("srv-stop-reuse".into())));
        server.start().await.unwrap();
        tokio::task::yield_now().await;
        server.stop().await.unwrap();

        // The address must be immediately available to a new listener; if
        // `stop()` left the in-process registry entry behind this would fail
        // with `AlreadyExists`.
        let mut again = Server::new(ServerConfig::new(Address::Inproc("srv-stop-reuse".into())));
        again.start().await.unwrap();
    }

    #[tokio::test]
    async fn free_is_idempotent_and_stops_if_still_running() {
        let mut server = Server::new(ServerConfig::new(Address::Inproc("srv-free".into())));
        server.start().await.unwrap();
        tokio::task::yield_now().await;

        server.free().await.unwrap();
        server.free().await.unwrap();

        let mut again = Server::new(ServerConfig::new(Address::Inproc("srv-free".into())));
        again.start().await.unwrap();
    }
}
