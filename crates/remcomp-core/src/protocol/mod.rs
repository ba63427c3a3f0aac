//! Wire protocol between client and kernel.
//!
//! - [`dtype`]: element types and their fixed wire tags
//! - [`messages`]: request/result bodies for each RPC method
//! - [`envelope`]: JSON-RPC 2.0 envelope and length-prefixed framing

pub mod dtype;
pub mod envelope;
pub mod messages;

pub use dtype::{Element, VariableType};
pub use envelope::{read_json, read_raw, write_json, Outcome, RpcFault, RpcRequest, RpcResponse};
pub use messages::{method, KernelStatus, VariableId};
