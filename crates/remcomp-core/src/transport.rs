//! Transports that carry kernel calls.
//!
//! A transport takes a method name and JSON params and returns the JSON
//! result, or a [`RemoteError`] if the call itself failed. It knows nothing
//! about variables or status codes; that is the client's job.
//!
//! - [`TcpTransport`]: one TCP connection to a kernel, length-prefixed JSON-RPC
//! - [`LoopbackTransport`]: calls a [`KernelDispatch`] in-process

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::kernel::KernelDispatch;
use crate::protocol::{read_json, write_json, Outcome, RpcFault, RpcRequest, RpcResponse};
use crate::{RemoteError, Result};

/// Something that can issue one kernel call and wait for its result.
#[async_trait]
pub trait KernelTransport: Send + Sync {
    async fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value>;
}

fn rpc_error(method: &str, err: RpcFault) -> RemoteError {
    RemoteError::protocol(format!(
        "{} failed with RPC error {}: {}",
        method, err.code, err.message
    ))
}

/// TCP transport to a kernel process.
///
/// Calls are serialized through an async mutex, so one transport can be
/// shared between tasks. After a timeout or I/O failure the connection may
/// hold a stale reply, so it is marked broken and every later call fails.
#[derive(Debug)]
pub struct TcpTransport {
    stream: Mutex<TcpStream>,
    addr: SocketAddr,
    next_id: AtomicU64,
    call_timeout: Duration,
    broken: AtomicBool,
}

impl TcpTransport {
    /// Connect to the kernel described by `config`.
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        let target = config.addr();
        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(&target))
            .await
            .map_err(|_| RemoteError::Timeout {
                operation: format!("connect to {}", target),
                after: config.connect_timeout,
            })?
            .map_err(|e| RemoteError::Transport {
                message: format!("failed to connect to {}: {}", target, e),
                source: Some(e),
            })?;
        stream.set_nodelay(true)?;
        let addr = stream.peer_addr()?;

        info!("Connected to kernel at {}", addr);

        Ok(Self {
            stream: Mutex::new(stream),
            addr,
            next_id: AtomicU64::new(1),
            call_timeout: config.call_timeout,
            broken: AtomicBool::new(false),
        })
    }

    /// Address of the connected kernel.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    async fn exchange(&self, request: &RpcRequest) -> Result<RpcResponse> {
        let mut stream = self.stream.lock().await;

        write_json(&mut *stream, request).await?;
        read_json(&mut *stream).await?.ok_or_else(|| {
            RemoteError::transport(format!(
                "kernel at {} closed the connection before answering call {}",
                self.addr, request.id
            ))
        })
    }
}

#[async_trait]
impl KernelTransport for TcpTransport {
    async fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        if self.broken.load(Ordering::Acquire) {
            return Err(RemoteError::transport(format!(
                "connection to {} is no longer usable",
                self.addr
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest::new(method, params, id);

        debug!("-> {} (call {})", method, id);

        let response = match tokio::time::timeout(self.call_timeout, self.exchange(&request)).await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                self.broken.store(true, Ordering::Release);
                return Err(e);
            }
            Err(_) => {
                self.broken.store(true, Ordering::Release);
                return Err(RemoteError::Timeout {
                    operation: method.to_string(),
                    after: self.call_timeout,
                });
            }
        };

        if response.id != Some(id) {
            self.broken.store(true, Ordering::Release);
            return Err(RemoteError::protocol(format!(
                "{} expected reply to call {}, got {:?}",
                method, id, response.id
            )));
        }

        debug!("<- {} (call {})", method, id);

        match response.outcome {
            Outcome::Result(result) => Ok(result),
            Outcome::Error(fault) => Err(rpc_error(method, fault)),
        }
    }
}

/// In-process transport that hands calls straight to a dispatcher.
///
/// Used for tests and for embedding the loopback kernel without sockets.
pub struct LoopbackTransport<D> {
    dispatch: Arc<D>,
}

impl<D: KernelDispatch> LoopbackTransport<D> {
    pub fn new(dispatch: Arc<D>) -> Self {
        Self { dispatch }
    }

    pub fn dispatch(&self) -> &Arc<D> {
        &self.dispatch
    }
}

#[async_trait]
impl<D: KernelDispatch> KernelTransport for LoopbackTransport<D> {
    async fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        debug!("-> {} (loopback)", method);
        self.dispatch
            .dispatch(method, params)
            .await
            .map_err(|e| rpc_error(method, e.into_fault()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{DispatchError, KernelServer};
    use crate::protocol::envelope::fault;

    struct EchoDispatch;

    #[async_trait]
    impl KernelDispatch for EchoDispatch {
        async fn dispatch(
            &self,
            method: &str,
            params: serde_json::Value,
        ) -> std::result::Result<serde_json::Value, DispatchError> {
            match method {
                "echo" => Ok(params),
                "sleep" => {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    Ok(serde_json::json!({}))
                }
                _ => Err(DispatchError::method_not_found(method)),
            }
        }
    }

    fn config_for(addr: SocketAddr) -> ClientConfig {
        ClientConfig::new(addr.ip().to_string(), addr.port())
    }

    #[tokio::test]
    async fn test_tcp_call_roundtrip() {
        let mut handle = KernelServer::start_local(Arc::new(EchoDispatch)).await.unwrap();
        let transport = TcpTransport::connect(&config_for(handle.addr())).await.unwrap();

        let result = transport
            .call("echo", serde_json::json!({"id": 4}))
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!({"id": 4}));
        assert_eq!(transport.addr(), handle.addr());

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_tcp_rpc_error_is_protocol_error() {
        let mut handle = KernelServer::start_local(Arc::new(EchoDispatch)).await.unwrap();
        let transport = TcpTransport::connect(&config_for(handle.addr())).await.unwrap();

        let err = transport
            .call("sendCplx", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Protocol { .. }));
        assert!(err.to_string().contains(&fault::UNKNOWN_METHOD.to_string()));

        // An RPC-level error leaves the connection usable
        assert!(transport.call("echo", serde_json::json!(1)).await.is_ok());

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_tcp_connect_refused_is_transport_error() {
        let config = ClientConfig::new("127.0.0.1", 1)
            .with_connect_timeout(Duration::from_secs(2));
        let err = TcpTransport::connect(&config).await.unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_tcp_call_timeout_breaks_connection() {
        let mut handle = KernelServer::start_local(Arc::new(EchoDispatch)).await.unwrap();
        let config = config_for(handle.addr()).with_call_timeout(Duration::from_millis(50));
        let transport = TcpTransport::connect(&config).await.unwrap();

        let err = transport.call("sleep", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, RemoteError::Timeout { .. }));

        let err = transport.call("echo", serde_json::json!({})).await.unwrap_err();
        assert!(err.is_transport());

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_loopback_maps_dispatch_errors() {
        let transport = LoopbackTransport::new(Arc::new(EchoDispatch));
        assert_eq!(
            transport.call("echo", serde_json::json!([1, 2])).await.unwrap(),
            serde_json::json!([1, 2])
        );
        let err = transport.call("nope", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, RemoteError::Protocol { .. }));
    }
}
