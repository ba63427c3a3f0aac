//! In-memory kernel used for tests and local demos.
//!
//! Implements the full RPC surface against plain vectors. It stores data in
//! exactly the flat layout it receives, so a client that gets the column-major
//! rule wrong sees transposed matrices here just as it would against a native
//! kernel. `execute` runs an optional [`Routine`] over the stored variables.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::debug;

use super::server::{DispatchError, KernelDispatch};
use crate::marshal::element_count;
use crate::protocol::messages::{
    AllocateRequest, AllocateResult, ErrorResult, FreeRequest, GetVariableRequest,
    GetVariableResult, RecvRequest, RecvResult, SendRequest, SendVariableRequest, StatusResult,
};
use crate::protocol::{method, Element, VariableId, VariableType};

/// Status codes returned by the in-memory kernel.
pub mod status {
    pub const OK: i32 = 0;
    pub const UNKNOWN_ID: i32 = 1;
    pub const TYPE_MISMATCH: i32 = 2;
    pub const SIZE_MISMATCH: i32 = 3;
    pub const UNKNOWN_DTYPE: i32 = 4;
    pub const NAME_NOT_FOUND: i32 = 5;
}

#[doc(hidden)]
#[derive(Debug, Clone, PartialEq)]
pub enum Storage {
    Int(Vec<i32>),
    Flt(Vec<f32>),
    Dbl(Vec<f64>),
}

impl Storage {
    fn zeroed(dtype: VariableType, len: usize) -> Self {
        match dtype {
            VariableType::Int32 => Storage::Int(vec![0; len]),
            VariableType::Float32 => Storage::Flt(vec![0.0; len]),
            VariableType::Float64 => Storage::Dbl(vec![0.0; len]),
        }
    }
}

/// Element types the in-memory kernel can store.
pub trait StoredElement: Element {
    #[doc(hidden)]
    fn slot(storage: &Storage) -> Option<&Vec<Self>>;
    #[doc(hidden)]
    fn slot_mut(storage: &mut Storage) -> Option<&mut Vec<Self>>;
}

macro_rules! impl_stored {
    ($t:ty, $variant:ident) => {
        impl StoredElement for $t {
            fn slot(storage: &Storage) -> Option<&Vec<Self>> {
                match storage {
                    Storage::$variant(data) => Some(data),
                    _ => None,
                }
            }

            fn slot_mut(storage: &mut Storage) -> Option<&mut Vec<Self>> {
                match storage {
                    Storage::$variant(data) => Some(data),
                    _ => None,
                }
            }
        }
    };
}

impl_stored!(i32, Int);
impl_stored!(f32, Flt);
impl_stored!(f64, Dbl);

#[derive(Debug, Clone)]
struct StoredVariable {
    dimensions: Vec<u32>,
    storage: Storage,
}

/// Variables held by the kernel, as seen by an execute routine.
#[derive(Debug)]
pub struct Workspace {
    next_id: VariableId,
    variables: HashMap<VariableId, StoredVariable>,
    named: HashMap<String, (Vec<u32>, Vec<f64>)>,
}

impl Default for Workspace {
    fn default() -> Self {
        Self {
            next_id: 1,
            variables: HashMap::new(),
            named: HashMap::new(),
        }
    }
}

impl Workspace {
    pub fn dimensions(&self, id: VariableId) -> Option<&[u32]> {
        self.variables.get(&id).map(|v| v.dimensions.as_slice())
    }

    /// Flat data of a variable, if it exists and holds `T`.
    pub fn data<T: StoredElement>(&self, id: VariableId) -> Option<&[T]> {
        self.variables
            .get(&id)
            .and_then(|v| T::slot(&v.storage))
            .map(|d| d.as_slice())
    }

    /// Mutable flat data; the length is fixed at allocation.
    pub fn data_mut<T: StoredElement>(&mut self, id: VariableId) -> Option<&mut [T]> {
        self.variables
            .get_mut(&id)
            .and_then(|v| T::slot_mut(&mut v.storage))
            .map(|d| d.as_mut_slice())
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Computation run by `execute`; returns the kernel status code.
pub type Routine = Box<dyn Fn(&mut Workspace) -> i32 + Send + Sync>;

/// Kernel that keeps all variables in process memory.
#[derive(Default)]
pub struct MemoryKernel {
    workspace: Mutex<Workspace>,
    routine: Option<Routine>,
}

fn parse<T: DeserializeOwned>(
    method: &str,
    params: serde_json::Value,
) -> Result<T, DispatchError> {
    serde_json::from_value(params).map_err(|e| DispatchError::invalid_params(method, e))
}

fn reply<T: Serialize>(method: &str, result: T) -> Result<serde_json::Value, DispatchError> {
    serde_json::to_value(result).map_err(|e| DispatchError {
        code: crate::protocol::envelope::fault::BAD_PARAMS,
        message: format!("Failed to encode {} result: {}", method, e),
    })
}

impl MemoryKernel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the computation triggered by `execute`.
    pub fn with_routine<F>(mut self, routine: F) -> Self
    where
        F: Fn(&mut Workspace) -> i32 + Send + Sync + 'static,
    {
        self.routine = Some(Box::new(routine));
        self
    }

    /// Number of variables currently allocated.
    pub async fn variable_count(&self) -> usize {
        self.workspace.lock().await.len()
    }

    async fn reset(&self) -> StatusResult {
        self.workspace.lock().await.clear();
        StatusResult { status: status::OK }
    }

    async fn allocate(&self, req: AllocateRequest) -> AllocateResult {
        let Some(dtype) = VariableType::from_tag(req.dtype) else {
            return AllocateResult {
                id: 0,
                error: status::UNKNOWN_DTYPE,
            };
        };
        let Some(len) = element_count(&req.dimensions).filter(|&len| len > 0) else {
            return AllocateResult {
                id: 0,
                error: status::SIZE_MISMATCH,
            };
        };

        let mut ws = self.workspace.lock().await;
        let id = ws.next_id;
        ws.next_id += 1;
        ws.variables.insert(
            id,
            StoredVariable {
                dimensions: req.dimensions,
                storage: Storage::zeroed(dtype, len),
            },
        );
        debug!("Allocated {} {} ({} elements)", dtype, id, len);

        AllocateResult {
            id,
            error: status::OK,
        }
    }

    async fn free(&self, req: FreeRequest) -> ErrorResult {
        let removed = self.workspace.lock().await.variables.remove(&req.id);
        ErrorResult {
            error: if removed.is_some() {
                status::OK
            } else {
                status::UNKNOWN_ID
            },
        }
    }

    async fn send<T: StoredElement>(&self, req: SendRequest<T>) -> ErrorResult {
        let mut ws = self.workspace.lock().await;
        let error = match ws.variables.get_mut(&req.id) {
            None => status::UNKNOWN_ID,
            Some(var) => match T::slot_mut(&mut var.storage) {
                None => status::TYPE_MISMATCH,
                Some(data) if data.len() != req.data.len() => status::SIZE_MISMATCH,
                Some(data) => {
                    *data = req.data;
                    status::OK
                }
            },
        };
        ErrorResult { error }
    }

    async fn recv<T: StoredElement>(&self, req: RecvRequest) -> RecvResult<T> {
        let ws = self.workspace.lock().await;
        let failed = |error| RecvResult {
            data: Vec::new(),
            dimensions: Vec::new(),
            error,
        };
        match ws.variables.get(&req.id) {
            None => failed(status::UNKNOWN_ID),
            Some(var) => match T::slot(&var.storage) {
                None => failed(status::TYPE_MISMATCH),
                Some(data) => RecvResult {
                    data: data.clone(),
                    dimensions: var.dimensions.clone(),
                    error: status::OK,
                },
            },
        }
    }

    async fn execute(&self) -> StatusResult {
        let status = match &self.routine {
            Some(routine) => routine(&mut *self.workspace.lock().await),
            None => status::OK,
        };
        StatusResult { status }
    }

    async fn get_variable(&self, req: GetVariableRequest) -> GetVariableResult {
        match self.workspace.lock().await.named.get(&req.variable_name) {
            Some((dimensions, data)) => GetVariableResult {
                status: status::OK,
                dimensions: dimensions.clone(),
                data: data.clone(),
            },
            None => GetVariableResult {
                status: status::NAME_NOT_FOUND,
                ..Default::default()
            },
        }
    }

    async fn send_variable(&self, req: SendVariableRequest) -> StatusResult {
        if element_count(&req.dimensions) != Some(req.data.len()) {
            return StatusResult {
                status: status::SIZE_MISMATCH,
            };
        }
        self.workspace
            .lock()
            .await
            .named
            .insert(req.variable_name, (req.dimensions, req.data));
        StatusResult { status: status::OK }
    }
}

#[async_trait]
impl KernelDispatch for MemoryKernel {
    async fn dispatch(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, DispatchError> {
        match method {
            method::RESET => reply(method, self.reset().await),
            method::ALLOCATE => reply(method, self.allocate(parse(method, params)?).await),
            method::FREE => reply(method, self.free(parse(method, params)?).await),
            method::SEND_INT => reply(method, self.send::<i32>(parse(method, params)?).await),
            method::SEND_FLT => reply(method, self.send::<f32>(parse(method, params)?).await),
            method::SEND_DBL => reply(method, self.send::<f64>(parse(method, params)?).await),
            method::RECV_INT => reply(method, self.recv::<i32>(parse(method, params)?).await),
            method::RECV_FLT => reply(method, self.recv::<f32>(parse(method, params)?).await),
            method::RECV_DBL => reply(method, self.recv::<f64>(parse(method, params)?).await),
            method::EXECUTE => reply(method, self.execute().await),
            method::GET_VARIABLE => reply(method, self.get_variable(parse(method, params)?).await),
            method::SEND_VARIABLE => {
                reply(method, self.send_variable(parse(method, params)?).await)
            }
            _ => Err(DispatchError::method_not_found(method)),
        }
    }
}
