//! Loopback kernel for tests and demos.
//!
//! Not a numerical kernel: it stores variables and runs an optional in-process
//! routine on `execute`, which is enough to drive the client end to end.
//!
//! - **Server**: accepts TCP connections and dispatches framed JSON-RPC calls
//! - **Memory**: a [`KernelDispatch`] that keeps every variable in memory

pub mod memory;
pub mod server;

pub use memory::{MemoryKernel, Routine, StoredElement, Workspace};
pub use server::{DispatchError, KernelDispatch, KernelServer, KernelServerHandle};
