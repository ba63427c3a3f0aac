//! Remote variable client.
//!
//! The façade over a [`KernelTransport`]: it validates payloads against what
//! was allocated, marshals arrays to and from the flat wire encoding, issues
//! one call per operation and turns nonzero kernel status codes into
//! [`RemoteError::Kernel`].
//!
//! # Example
//!
//! ```rust,no_run
//! use remcomp_core::{ClientConfig, RemoteVariableClient, VariableType};
//!
//! # async fn run() -> remcomp_core::Result<()> {
//! let client = RemoteVariableClient::connect(&ClientConfig::new("localhost", 50051)).await?;
//! client.reset().await?;
//!
//! let matrix = client.allocate(VariableType::Float64, &[2, 2]).await?;
//! client.send(matrix, &vec![vec![1.0, 2.0], vec![3.0, 4.0]]).await?;
//! client.execute().await?;
//! let result: Vec<Vec<f64>> = client.recv_matrix(matrix).await?;
//!
//! client.free(matrix).await?;
//! # Ok(())
//! # }
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::handles::{HandleRegistry, HandleState, VariableHandle};
use crate::marshal::{normalize_unit_scalar, Marshal, MarshalError};
use crate::protocol::messages::{
    AllocateRequest, AllocateResult, ErrorResult, ExecuteRequest, FreeRequest,
    GetVariableRequest, GetVariableResult, RecvRequest, RecvResult, ResetRequest, SendRequest,
    SendVariableRequest, StatusResult,
};
use crate::protocol::{method, Element, KernelStatus, VariableType};
use crate::transport::{KernelTransport, TcpTransport};
use crate::{RemoteError, Result};

/// Client for allocating, writing, reading and freeing kernel variables.
///
/// All methods take `&self`; the transport serializes calls internally, so a
/// client can be shared between tasks behind an `Arc`.
pub struct RemoteVariableClient<T = TcpTransport> {
    transport: T,
    handles: HandleRegistry,
    // Shared by allocations, exclusive for reset: a reset never lands between
    // an allocate call and the registration of its id.
    lifecycle: RwLock<()>,
}

impl RemoteVariableClient<TcpTransport> {
    /// Connect to a kernel over TCP.
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        let transport = TcpTransport::connect(config).await?;
        Ok(Self::with_transport(transport))
    }
}

fn named(name: &str) -> String {
    format!("variable '{}'", name)
}

fn from_marshal(operation: &'static str, target: String, err: MarshalError) -> RemoteError {
    match err {
        MarshalError::ShapeMismatch {
            expected_rank,
            dimensions,
            elements,
        } => RemoteError::ShapeMismatch {
            operation,
            target,
            expected_rank,
            dimensions,
            elements,
        },
        other => RemoteError::validation(operation, target, other.to_string()),
    }
}

fn check<R: KernelStatus>(
    operation: &'static str,
    target: impl Into<String>,
    result: R,
) -> Result<R> {
    if result.is_success() {
        Ok(result)
    } else {
        Err(RemoteError::Kernel {
            operation,
            target: target.into(),
            code: result.status_code(),
        })
    }
}

impl<T: KernelTransport> RemoteVariableClient<T> {
    /// Build a client on an existing transport.
    pub fn with_transport(transport: T) -> Self {
        Self {
            transport,
            handles: HandleRegistry::new(),
            lifecycle: RwLock::new(()),
        }
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Handles allocated through this client.
    pub fn handles(&self) -> &HandleRegistry {
        &self.handles
    }

    async fn invoke<Req, Res>(&self, method: &str, request: &Req) -> Result<Res>
    where
        Req: Serialize + Sync,
        Res: DeserializeOwned,
    {
        let params = serde_json::to_value(request)?;
        let value = self.transport.call(method, params).await?;
        serde_json::from_value(value)
            .map_err(|e| RemoteError::protocol(format!("malformed {} reply: {}", method, e)))
    }

    /// Discard every kernel variable and unload loaded modules.
    ///
    /// Safe to call at any time; all handles held by this client become
    /// invalid.
    pub async fn reset(&self) -> Result<()> {
        let _exclusive = self.lifecycle.write().await;
        let result: StatusResult = self.invoke(method::RESET, &ResetRequest {}).await?;
        check("reset", "kernel", result)?;
        let dropped = self.handles.invalidate_all();
        info!("Kernel reset ({} handles invalidated)", dropped);
        Ok(())
    }

    /// Allocate a variable. Empty `dimensions` allocates a scalar; every
    /// listed dimension must be nonzero.
    pub async fn allocate(
        &self,
        dtype: VariableType,
        dimensions: &[u32],
    ) -> Result<VariableHandle> {
        if dimensions.contains(&0) {
            return Err(RemoteError::validation(
                "allocate",
                format!("{} {:?}", dtype, dimensions),
                "dimensions must be nonzero",
            ));
        }

        let _shared = self.lifecycle.read().await;
        let request = AllocateRequest::new(dtype, dimensions.to_vec());
        let result: AllocateResult = self.invoke(method::ALLOCATE, &request).await?;
        let result = check("allocate", format!("{} {:?}", dtype, dimensions), result)?;

        let handle = self.handles.register(result.id, dtype, dimensions.to_vec());
        debug!("Allocated {} {:?} as {}", dtype, dimensions, handle);
        Ok(handle)
    }

    /// Allocate a scalar variable.
    pub async fn allocate_scalar(&self, dtype: VariableType) -> Result<VariableHandle> {
        self.allocate(dtype, &[]).await
    }

    /// Allocate a variable shaped and typed like `value` and send it.
    pub async fn allocate_with<M: Marshal>(&self, value: &M) -> Result<VariableHandle> {
        let flat = value
            .flatten()
            .map_err(|e| from_marshal("allocate", "new variable".to_string(), e))?;
        let handle = self
            .allocate(<M::Elem as Element>::DTYPE, &flat.dimensions)
            .await?;
        self.send(handle, value).await?;
        Ok(handle)
    }

    /// Release kernel storage for `handle`. The handle is unusable afterwards.
    pub async fn free(&self, handle: VariableHandle) -> Result<()> {
        self.handles.live("free", handle)?;

        let result: ErrorResult = self
            .invoke(method::FREE, &FreeRequest { id: handle.id() })
            .await?;
        check("free", handle.to_string(), result)?;

        self.handles.transition(handle, HandleState::Freed);
        debug!("Freed {}", handle);
        Ok(())
    }

    /// Write `value` into a previously allocated variable.
    ///
    /// Type and shape must match the allocation; both are checked before
    /// anything is sent.
    pub async fn send<M: Marshal>(&self, handle: VariableHandle, value: &M) -> Result<()> {
        let info = self.handles.live("send", handle)?;
        let dtype = <M::Elem as Element>::DTYPE;
        if info.dtype != dtype {
            return Err(RemoteError::validation(
                "send",
                handle.to_string(),
                format!("variable holds {}, payload is {}", info.dtype, dtype),
            ));
        }

        let flat = value
            .flatten()
            .map_err(|e| from_marshal("send", handle.to_string(), e))?;
        if flat.dimensions != info.dimensions {
            return Err(RemoteError::validation(
                "send",
                handle.to_string(),
                format!(
                    "payload shape {:?} does not match allocated shape {:?}",
                    flat.dimensions, info.dimensions
                ),
            ));
        }

        let request = SendRequest {
            id: handle.id(),
            data: flat.data,
        };
        let result: ErrorResult = self.invoke(dtype.send_method(), &request).await?;
        check("send", handle.to_string(), result)?;

        self.handles.transition(handle, HandleState::Written);
        debug!("Sent {} {:?} to {}", dtype, flat.dimensions, handle);
        Ok(())
    }

    /// Read a variable back as `M`.
    ///
    /// The requested rank and element type must match the allocation, and
    /// the kernel's reply must carry the allocated dimensions.
    pub async fn recv<M: Marshal>(&self, handle: VariableHandle) -> Result<M> {
        let info = self.handles.live("recv", handle)?;
        let dtype = <M::Elem as Element>::DTYPE;
        if info.dtype != dtype {
            return Err(RemoteError::validation(
                "recv",
                handle.to_string(),
                format!("variable holds {}, requested {}", info.dtype, dtype),
            ));
        }
        if info.rank() != M::RANK {
            return Err(RemoteError::validation(
                "recv",
                handle.to_string(),
                format!(
                    "variable has rank {}, requested rank {}",
                    info.rank(),
                    M::RANK
                ),
            ));
        }

        let result: RecvResult<M::Elem> = self
            .invoke(dtype.recv_method(), &RecvRequest { id: handle.id() })
            .await?;
        let result = check("recv", handle.to_string(), result)?;

        if result.dimensions != info.dimensions {
            return Err(RemoteError::ShapeMismatch {
                operation: "recv",
                target: handle.to_string(),
                expected_rank: M::RANK,
                dimensions: result.dimensions,
                elements: result.data.len(),
            });
        }
        let value = M::unflatten(&result.dimensions, result.data)
            .map_err(|e| from_marshal("recv", handle.to_string(), e))?;

        self.handles.transition(handle, HandleState::Read);
        Ok(value)
    }

    /// Read a scalar.
    pub async fn recv_scalar<E>(&self, handle: VariableHandle) -> Result<E>
    where
        E: Marshal<Elem = E>,
    {
        self.recv::<E>(handle).await
    }

    /// Read a rank-1 variable.
    pub async fn recv_vector<E>(&self, handle: VariableHandle) -> Result<Vec<E>>
    where
        Vec<E>: Marshal<Elem = E>,
    {
        self.recv::<Vec<E>>(handle).await
    }

    /// Read a matrix; the column-major wire data comes back as rows.
    pub async fn recv_matrix<E>(&self, handle: VariableHandle) -> Result<Vec<Vec<E>>>
    where
        Vec<Vec<E>>: Marshal<Elem = E>,
    {
        self.recv::<Vec<Vec<E>>>(handle).await
    }

    /// Run the kernel's computation on the variables sent so far.
    pub async fn execute(&self) -> Result<()> {
        let result: StatusResult = self.invoke(method::EXECUTE, &ExecuteRequest {}).await?;
        check("execute", "kernel", result)?;
        debug!("Execute finished");
        Ok(())
    }

    /// Legacy: store a float64 value under `name`.
    ///
    /// Scalars go out with dimensions `[1]`.
    pub async fn send_variable<M>(&self, name: &str, value: &M) -> Result<()>
    where
        M: Marshal<Elem = f64>,
    {
        let flat = value
            .flatten()
            .map_err(|e| from_marshal("sendVariable", named(name), e))?
            .with_unit_scalar();
        let request = SendVariableRequest {
            variable_name: name.to_string(),
            dimensions: flat.dimensions,
            data: flat.data,
        };
        let result: StatusResult = self.invoke(method::SEND_VARIABLE, &request).await?;
        check("sendVariable", named(name), result)?;
        Ok(())
    }

    /// Legacy: fetch the float64 value stored under `name`.
    pub async fn get_variable<M>(&self, name: &str) -> Result<M>
    where
        M: Marshal<Elem = f64>,
    {
        let request = GetVariableRequest {
            variable_name: name.to_string(),
        };
        let result: GetVariableResult = self.invoke(method::GET_VARIABLE, &request).await?;
        let result = check("getVariable", named(name), result)?;

        let dimensions = normalize_unit_scalar(result.dimensions, M::RANK);
        M::unflatten(&dimensions, result.data)
            .map_err(|e| from_marshal("getVariable", named(name), e))
    }
}
