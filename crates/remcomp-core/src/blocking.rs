//! Synchronous façade over [`RemoteVariableClient`].
//!
//! Owns a current-thread tokio runtime and blocks on each call. Must not be
//! used from inside an async context; use the async client there.

use tokio::runtime::{Builder, Runtime};

use crate::client::RemoteVariableClient;
use crate::config::ClientConfig;
use crate::handles::{HandleRegistry, VariableHandle};
use crate::marshal::Marshal;
use crate::protocol::VariableType;
use crate::transport::{KernelTransport, TcpTransport};
use crate::{RemoteError, Result};

fn runtime() -> Result<Runtime> {
    Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| RemoteError::Transport {
            message: format!("failed to create runtime: {}", e),
            source: Some(e),
        })
}

/// Blocking remote variable client.
pub struct BlockingClient<T = TcpTransport> {
    runtime: Runtime,
    inner: RemoteVariableClient<T>,
}

impl BlockingClient<TcpTransport> {
    pub fn connect(config: &ClientConfig) -> Result<Self> {
        let runtime = runtime()?;
        let inner = runtime.block_on(RemoteVariableClient::connect(config))?;
        Ok(Self { runtime, inner })
    }
}

impl<T: KernelTransport> BlockingClient<T> {
    pub fn with_transport(transport: T) -> Result<Self> {
        Ok(Self {
            runtime: runtime()?,
            inner: RemoteVariableClient::with_transport(transport),
        })
    }

    /// The wrapped async client.
    pub fn inner(&self) -> &RemoteVariableClient<T> {
        &self.inner
    }

    pub fn handles(&self) -> &HandleRegistry {
        self.inner.handles()
    }

    pub fn reset(&self) -> Result<()> {
        self.runtime.block_on(self.inner.reset())
    }

    pub fn allocate(&self, dtype: VariableType, dimensions: &[u32]) -> Result<VariableHandle> {
        self.runtime.block_on(self.inner.allocate(dtype, dimensions))
    }

    pub fn allocate_scalar(&self, dtype: VariableType) -> Result<VariableHandle> {
        self.runtime.block_on(self.inner.allocate_scalar(dtype))
    }

    pub fn allocate_with<M: Marshal>(&self, value: &M) -> Result<VariableHandle> {
        self.runtime.block_on(self.inner.allocate_with(value))
    }

    pub fn free(&self, handle: VariableHandle) -> Result<()> {
        self.runtime.block_on(self.inner.free(handle))
    }

    pub fn send<M: Marshal>(&self, handle: VariableHandle, value: &M) -> Result<()> {
        self.runtime.block_on(self.inner.send(handle, value))
    }

    pub fn recv<M: Marshal>(&self, handle: VariableHandle) -> Result<M> {
        self.runtime.block_on(self.inner.recv(handle))
    }

    pub fn recv_scalar<E>(&self, handle: VariableHandle) -> Result<E>
    where
        E: Marshal<Elem = E>,
    {
        self.recv(handle)
    }

    pub fn recv_vector<E>(&self, handle: VariableHandle) -> Result<Vec<E>>
    where
        Vec<E>: Marshal<Elem = E>,
    {
        self.recv(handle)
    }

    pub fn recv_matrix<E>(&self, handle: VariableHandle) -> Result<Vec<Vec<E>>>
    where
        Vec<Vec<E>>: Marshal<Elem = E>,
    {
        self.recv(handle)
    }

    pub fn execute(&self) -> Result<()> {
        self.runtime.block_on(self.inner.execute())
    }

    pub fn send_variable<M>(&self, name: &str, value: &M) -> Result<()>
    where
        M: Marshal<Elem = f64>,
    {
        self.runtime.block_on(self.inner.send_variable(name, value))
    }

    pub fn get_variable<M>(&self, name: &str) -> Result<M>
    where
        M: Marshal<Elem = f64>,
    {
        self.runtime.block_on(self.inner.get_variable(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{KernelServer, MemoryKernel};
    use crate::transport::LoopbackTransport;
    use std::sync::Arc;

    #[test]
    fn test_blocking_loopback_roundtrip() {
        let kernel = Arc::new(MemoryKernel::new());
        let client = BlockingClient::with_transport(LoopbackTransport::new(kernel)).unwrap();

        client.reset().unwrap();
        let v = client.allocate(VariableType::Float32, &[3]).unwrap();
        client.send(v, &vec![0.5f32, 1.5, 2.5]).unwrap();
        assert_eq!(client.recv_vector::<f32>(v).unwrap(), vec![0.5, 1.5, 2.5]);
        client.free(v).unwrap();

        assert!(client.recv_vector::<f32>(v).unwrap_err().is_local());
    }

    #[test]
    fn test_blocking_over_tcp() {
        // The server needs its own runtime that outlives the blocking calls
        let server_rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let handle = server_rt
            .block_on(KernelServer::start_local(Arc::new(MemoryKernel::new())))
            .unwrap();

        let config = ClientConfig::new("127.0.0.1", handle.port());
        let client = BlockingClient::connect(&config).unwrap();

        let m = client.allocate_with(&vec![vec![1, 2], vec![3, 4]]).unwrap();
        assert_eq!(
            client.recv_matrix::<i32>(m).unwrap(),
            vec![vec![1, 2], vec![3, 4]]
        );

        client.send_variable("half", &0.5f64).unwrap();
        assert_eq!(client.get_variable::<f64>("half").unwrap(), 0.5);

        drop(client);
        drop(handle);
    }
}
