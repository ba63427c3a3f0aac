//! Element types and their wire tags.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

use super::messages::method;

/// Element kind of a kernel variable, fixed at allocation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableType {
    Int32,
    Float32,
    Float64,
}

impl VariableType {
    /// Wire tag for this type. The values are fixed by the protocol.
    pub fn tag(self) -> i32 {
        match self {
            VariableType::Int32 => 3,
            VariableType::Float32 => 5,
            VariableType::Float64 => 6,
        }
    }

    pub fn from_tag(tag: i32) -> Option<Self> {
        match tag {
            3 => Some(VariableType::Int32),
            5 => Some(VariableType::Float32),
            6 => Some(VariableType::Float64),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VariableType::Int32 => "int32",
            VariableType::Float32 => "float32",
            VariableType::Float64 => "float64",
        }
    }

    /// RPC method used to push data of this type.
    pub fn send_method(self) -> &'static str {
        match self {
            VariableType::Int32 => method::SEND_INT,
            VariableType::Float32 => method::SEND_FLT,
            VariableType::Float64 => method::SEND_DBL,
        }
    }

    /// RPC method used to fetch data of this type.
    pub fn recv_method(self) -> &'static str {
        match self {
            VariableType::Int32 => method::RECV_INT,
            VariableType::Float32 => method::RECV_FLT,
            VariableType::Float64 => method::RECV_DBL,
        }
    }
}

impl std::fmt::Display for VariableType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A scalar type that can live in a kernel variable.
///
/// Implemented for `i32`, `f32` and `f64`; the associated type tag selects
/// the per-type RPC methods. `Default` lets a failed read decode with no data.
pub trait Element:
    Copy + Debug + Default + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const DTYPE: VariableType;
}

impl Element for i32 {
    const DTYPE: VariableType = VariableType::Int32;
}

impl Element for f32 {
    const DTYPE: VariableType = VariableType::Float32;
}

impl Element for f64 {
    const DTYPE: VariableType = VariableType::Float64;
}
