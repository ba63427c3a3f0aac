//! Minimal TCP front end for a [`KernelDispatch`].
//!
//! Serves one client connection at a time, which is all the loopback kernel
//! needs: tests and the CLI each drive it from a single client. Stopping the
//! server drops the connection being served.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ProtocolConfig;
use crate::protocol::envelope::{
    fault, read_raw, write_json, Outcome, RpcFault, RpcRequest, RpcResponse,
};
use crate::Result;

/// Call-level failure produced by a dispatcher.
///
/// Kernel failures (unknown id, type mismatch, ...) are not errors here; they
/// are successful replies carrying a nonzero status code.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct DispatchError {
    pub code: i32,
    pub message: String,
}

impl DispatchError {
    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: fault::UNKNOWN_METHOD,
            message: format!("no kernel method named {}", method),
        }
    }

    pub fn invalid_params(method: &str, reason: impl std::fmt::Display) -> Self {
        Self {
            code: fault::BAD_PARAMS,
            message: format!("bad params for {}: {}", method, reason),
        }
    }

    pub fn into_fault(self) -> RpcFault {
        RpcFault {
            code: self.code,
            message: self.message,
        }
    }
}

/// Handles kernel method calls.
#[async_trait::async_trait]
pub trait KernelDispatch: Send + Sync + 'static {
    async fn dispatch(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, DispatchError>;
}

/// A running server. Dropping it stops the server.
pub struct KernelServerHandle {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl KernelServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Stop serving and close the current connection, if any.
    pub fn shutdown(&mut self) {
        self.task.abort();
    }
}

impl Drop for KernelServerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub struct KernelServer;

impl KernelServer {
    /// Serve on `127.0.0.1` with an OS-assigned port.
    pub async fn start_local<D: KernelDispatch>(dispatch: Arc<D>) -> Result<KernelServerHandle> {
        Self::start(dispatch, "127.0.0.1:0").await
    }

    /// Bind `addr` and serve `dispatch` from a background task.
    pub async fn start<D: KernelDispatch>(
        dispatch: Arc<D>,
        addr: impl ToSocketAddrs,
    ) -> Result<KernelServerHandle> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        info!("Kernel listening on {}", addr);

        let task = tokio::spawn(async move {
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Accept failed: {}", e);
                        continue;
                    }
                };
                debug!("Serving {}", peer);
                if let Err(e) = serve(stream, &*dispatch).await {
                    debug!("Connection {} dropped: {}", peer, e);
                }
            }
        });

        Ok(KernelServerHandle { addr, task })
    }
}

async fn serve<D: KernelDispatch>(mut stream: TcpStream, dispatch: &D) -> Result<()> {
    while let Some(frame) = read_raw(&mut stream).await? {
        let response = answer(&frame, dispatch).await;
        write_json(&mut stream, &response).await?;
    }
    Ok(())
}

async fn answer<D: KernelDispatch>(frame: &[u8], dispatch: &D) -> RpcResponse {
    let request: RpcRequest = match serde_json::from_slice(frame) {
        Ok(request) => request,
        Err(e) => {
            return RpcResponse::fault(None, fault::PARSE, format!("unreadable call: {}", e));
        }
    };
    if request.jsonrpc != ProtocolConfig::JSONRPC_VERSION {
        return RpcResponse::fault(
            Some(request.id),
            fault::INVALID_REQUEST,
            format!("unsupported jsonrpc version {}", request.jsonrpc),
        );
    }

    // Payload-free calls may omit params entirely
    let params = match request.params {
        serde_json::Value::Null => serde_json::json!({}),
        params => params,
    };
    let outcome = match dispatch.dispatch(&request.method, params).await {
        Ok(result) => Outcome::Result(result),
        Err(e) => Outcome::Error(e.into_fault()),
    };
    RpcResponse::reply(Some(request.id), outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::envelope::read_json;
    use serde_json::json;

    struct EchoDispatch;

    #[async_trait::async_trait]
    impl KernelDispatch for EchoDispatch {
        async fn dispatch(
            &self,
            method: &str,
            params: serde_json::Value,
        ) -> std::result::Result<serde_json::Value, DispatchError> {
            match method {
                "echo" => Ok(params),
                _ => Err(DispatchError::method_not_found(method)),
            }
        }
    }

    async fn send_bytes(stream: &mut TcpStream, body: &[u8]) -> RpcResponse {
        use tokio::io::AsyncWriteExt;
        stream.write_all(&(body.len() as u32).to_be_bytes()).await.unwrap();
        stream.write_all(body).await.unwrap();
        read_json(stream).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_answers_calls_in_order_on_one_connection() {
        let server = KernelServer::start_local(Arc::new(EchoDispatch)).await.unwrap();
        assert_eq!(server.addr().ip(), std::net::Ipv4Addr::LOCALHOST);

        let mut stream = TcpStream::connect(server.addr()).await.unwrap();
        for id in 1..=3u64 {
            write_json(&mut stream, &RpcRequest::new("echo", json!([id]), id))
                .await
                .unwrap();
            let reply: RpcResponse = read_json(&mut stream).await.unwrap().unwrap();
            assert_eq!(reply.id, Some(id));
            assert_eq!(reply.outcome, Outcome::Result(json!([id])));
        }
    }

    #[tokio::test]
    async fn test_missing_params_become_empty_object() {
        let server = KernelServer::start_local(Arc::new(EchoDispatch)).await.unwrap();
        let mut stream = TcpStream::connect(server.addr()).await.unwrap();

        let reply = send_bytes(&mut stream, br#"{"jsonrpc":"2.0","method":"echo","id":5}"#).await;
        assert_eq!(reply.outcome, Outcome::Result(json!({})));
    }

    #[tokio::test]
    async fn test_faults_for_bad_calls() {
        let server = KernelServer::start_local(Arc::new(EchoDispatch)).await.unwrap();
        let mut stream = TcpStream::connect(server.addr()).await.unwrap();

        let unknown = send_bytes(
            &mut stream,
            br#"{"jsonrpc":"2.0","method":"sendCplx","params":{},"id":1}"#,
        )
        .await;
        assert!(matches!(
            unknown.outcome,
            Outcome::Error(RpcFault { code: fault::UNKNOWN_METHOD, .. })
        ));

        let garbage = send_bytes(&mut stream, b"not json").await;
        assert_eq!(garbage.id, None);
        assert!(matches!(
            garbage.outcome,
            Outcome::Error(RpcFault { code: fault::PARSE, .. })
        ));

        let old = send_bytes(&mut stream, br#"{"jsonrpc":"1.0","method":"echo","id":3}"#).await;
        assert_eq!(old.id, Some(3));
        assert!(matches!(
            old.outcome,
            Outcome::Error(RpcFault { code: fault::INVALID_REQUEST, .. })
        ));
    }

    #[tokio::test]
    async fn test_next_client_is_served_after_the_first_leaves() {
        let server = KernelServer::start_local(Arc::new(EchoDispatch)).await.unwrap();

        for id in [1u64, 2] {
            let mut stream = TcpStream::connect(server.addr()).await.unwrap();
            write_json(&mut stream, &RpcRequest::new("echo", json!(id), id))
                .await
                .unwrap();
            let reply: RpcResponse = read_json(&mut stream).await.unwrap().unwrap();
            assert_eq!(reply.id, Some(id));
        }
    }

    #[tokio::test]
    async fn test_shutdown_closes_the_connection() {
        let mut server = KernelServer::start_local(Arc::new(EchoDispatch)).await.unwrap();
        let mut stream = TcpStream::connect(server.addr()).await.unwrap();

        server.shutdown();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let closed = read_raw(&mut stream).await;
        assert!(matches!(closed, Ok(None) | Err(_)));
    }
}
