//! Request and result bodies for every kernel RPC.
//!
//! These are the `params` and `result` members of the JSON-RPC envelope.
//! Every result carries a status code where `0` means success and any other
//! value is a kernel-defined failure.

use serde::{Deserialize, Serialize};

use super::dtype::VariableType;

/// Kernel-issued variable id as it appears on the wire.
pub type VariableId = i32;

/// RPC method names.
pub mod method {
    pub const RESET: &str = "reset";
    pub const ALLOCATE: &str = "allocate";
    pub const FREE: &str = "free";
    pub const SEND_INT: &str = "sendInt";
    pub const SEND_FLT: &str = "sendFlt";
    pub const SEND_DBL: &str = "sendDbl";
    pub const RECV_INT: &str = "recvInt";
    pub const RECV_FLT: &str = "recvFlt";
    pub const RECV_DBL: &str = "recvDbl";
    pub const EXECUTE: &str = "execute";
    pub const GET_VARIABLE: &str = "getVariable";
    pub const SEND_VARIABLE: &str = "sendVariable";
}

/// Access to the status/error code carried by every result.
pub trait KernelStatus {
    fn status_code(&self) -> i32;

    fn is_success(&self) -> bool {
        self.status_code() == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResetRequest {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {}

/// Result of `reset` and `execute`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusResult {
    pub status: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocateRequest {
    /// Raw type tag; see [`VariableType::tag`].
    pub dtype: i32,
    /// Empty for scalars.
    #[serde(default)]
    pub dimensions: Vec<u32>,
}

impl AllocateRequest {
    pub fn new(dtype: VariableType, dimensions: Vec<u32>) -> Self {
        Self {
            dtype: dtype.tag(),
            dimensions,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AllocateResult {
    pub id: VariableId,
    pub error: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreeRequest {
    pub id: VariableId,
}

/// Result of `free` and the `send*` family.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorResult {
    pub error: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendRequest<T> {
    pub id: VariableId,
    pub data: Vec<T>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecvRequest {
    pub id: VariableId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecvResult<T> {
    #[serde(default)]
    pub data: Vec<T>,
    #[serde(default)]
    pub dimensions: Vec<u32>,
    pub error: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetVariableRequest {
    pub variable_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetVariableResult {
    pub status: i32,
    #[serde(default)]
    pub dimensions: Vec<u32>,
    #[serde(default)]
    pub data: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendVariableRequest {
    pub variable_name: String,
    pub dimensions: Vec<u32>,
    pub data: Vec<f64>,
}

impl KernelStatus for StatusResult {
    fn status_code(&self) -> i32 {
        self.status
    }
}

impl KernelStatus for AllocateResult {
    fn status_code(&self) -> i32 {
        self.error
    }
}

impl KernelStatus for ErrorResult {
    fn status_code(&self) -> i32 {
        self.error
    }
}

impl<T> KernelStatus for RecvResult<T> {
    fn status_code(&self) -> i32 {
        self.error
    }
}

impl KernelStatus for GetVariableResult {
    fn status_code(&self) -> i32 {
        self.status
    }
}
