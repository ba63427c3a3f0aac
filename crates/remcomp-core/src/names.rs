//! Named variables on top of handles.
//!
//! The legacy named calls only carry float64 data. A [`NameTable`] gives the
//! same ergonomics for every element type by keeping a name-to-handle map on
//! the client side.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tracing::debug;

use crate::client::RemoteVariableClient;
use crate::handles::VariableHandle;
use crate::marshal::Marshal;
use crate::protocol::VariableType;
use crate::transport::{KernelTransport, TcpTransport};
use crate::{RemoteError, Result};

/// Name-to-handle bindings for one client.
pub struct NameTable<'c, T = TcpTransport> {
    client: &'c RemoteVariableClient<T>,
    names: Mutex<HashMap<String, VariableHandle>>,
}

impl<'c, T: KernelTransport> NameTable<'c, T> {
    pub fn new(client: &'c RemoteVariableClient<T>) -> Self {
        Self {
            client,
            names: Mutex::new(HashMap::new()),
        }
    }

    fn is_live(&self, handle: VariableHandle) -> bool {
        self.client
            .handles()
            .state(handle)
            .is_some_and(|s| s.is_live())
    }

    /// Allocate a variable under `name`, freeing whatever was bound before.
    pub async fn bind(
        &self,
        name: &str,
        dtype: VariableType,
        dimensions: &[u32],
    ) -> Result<VariableHandle> {
        let mut names = self.names.lock().await;
        if let Some(previous) = names.remove(name) {
            if self.is_live(previous) {
                debug!("Rebinding '{}', freeing {}", name, previous);
                self.client.free(previous).await?;
            }
        }

        let handle = self.client.allocate(dtype, dimensions).await?;
        names.insert(name.to_string(), handle);
        Ok(handle)
    }

    /// Handle bound to `name`, if it is still live.
    pub async fn get(&self, name: &str) -> Option<VariableHandle> {
        let names = self.names.lock().await;
        names.get(name).copied().filter(|h| self.is_live(*h))
    }

    async fn require(&self, operation: &'static str, name: &str) -> Result<VariableHandle> {
        self.get(name).await.ok_or_else(|| {
            RemoteError::validation(operation, format!("variable '{}'", name), "name is not bound")
        })
    }

    pub async fn send<M: Marshal>(&self, name: &str, value: &M) -> Result<()> {
        let handle = self.require("send", name).await?;
        self.client.send(handle, value).await
    }

    pub async fn recv<M: Marshal>(&self, name: &str) -> Result<M> {
        let handle = self.require("recv", name).await?;
        self.client.recv(handle).await
    }

    /// Remove `name` and free its variable. Returns false if it was not bound.
    pub async fn unbind(&self, name: &str) -> Result<bool> {
        let handle = self.names.lock().await.remove(name);
        match handle {
            Some(handle) if self.is_live(handle) => {
                self.client.free(handle).await?;
                Ok(true)
            }
            Some(_) => Ok(true),
            None => Ok(false),
        }
    }

    /// Free every bound variable. Returns how many were freed.
    ///
    /// Stops at the first failure; bindings not yet freed stay in the table.
    pub async fn clear(&self) -> Result<usize> {
        let mut names = self.names.lock().await;
        let mut entries: Vec<(String, VariableHandle)> = names.drain().collect();
        entries.sort_by(|a, b| a.1.cmp(&b.1));

        let mut freed = 0;
        let mut pending = entries.into_iter();
        while let Some((name, handle)) = pending.next() {
            if !self.is_live(handle) {
                continue;
            }
            if let Err(e) = self.client.free(handle).await {
                names.insert(name, handle);
                names.extend(pending);
                return Err(e);
            }
            freed += 1;
        }
        Ok(freed)
    }

    /// Bound names, sorted.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.names.lock().await.keys().cloned().collect();
        names.sort();
        names
    }
}
