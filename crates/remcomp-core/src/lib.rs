//! Remcomp Core - client for remote computation kernels.
//!
//! A kernel is a separate process holding typed numeric variables. This crate
//! allocates them, writes arrays into them, triggers computation and reads the
//! results back, over length-prefixed JSON-RPC.
//!
//! # Modules
//!
//! - [`client`]: [`RemoteVariableClient`], the async façade
//! - [`blocking`]: [`BlockingClient`], the same operations without an async runtime
//! - [`marshal`]: column-major flattening of scalars, vectors and matrices
//! - [`handles`]: client-side variable handle lifecycle
//! - [`names`]: name-to-handle bindings on top of the handle API
//! - [`transport`]: TCP and in-process transports
//! - [`kernel`]: in-memory loopback kernel and TCP server
//!
//! # Example
//!
//! ```rust,no_run
//! use remcomp_core::{BlockingClient, ClientConfig, VariableType};
//!
//! fn main() -> remcomp_core::Result<()> {
//!     let client = BlockingClient::connect(&ClientConfig::default())?;
//!     client.reset()?;
//!
//!     let x = client.allocate_scalar(VariableType::Float64)?;
//!     client.send(x, &42.0f64)?;
//!     client.execute()?;
//!     let value: f64 = client.recv_scalar(x)?;
//!     println!("{}", value);
//!
//!     client.free(x)?;
//!     Ok(())
//! }
//! ```

pub mod blocking;
pub mod client;
pub mod config;
pub mod error;
pub mod handles;
pub mod kernel;
pub mod marshal;
pub mod names;
pub mod protocol;
pub mod transport;

pub use blocking::BlockingClient;
pub use client::RemoteVariableClient;
pub use config::{ClientConfig, ProtocolConfig};
pub use error::{RemoteError, Result};
pub use handles::{HandleRegistry, HandleState, VariableHandle};
pub use marshal::{Marshal, MarshalError};
pub use names::NameTable;
pub use protocol::{Element, VariableType};
pub use transport::{KernelTransport, LoopbackTransport, TcpTransport};
