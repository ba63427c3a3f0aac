//! JSON-RPC 2.0 envelope and framing.
//!
//! Every call is one frame in each direction:
//!
//! ```text
//! [u32 BE: len][UTF-8 JSON bytes of len]
//! ```
//!
//! Call ids are always numeric. A reply carries exactly one of `result` or
//! `error`, which [`Outcome`] encodes directly.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::ProtocolConfig;
use crate::{RemoteError, Result};

/// Error codes for calls that never reached a kernel handler.
pub mod fault {
    pub const PARSE: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const UNKNOWN_METHOD: i32 = -32601;
    pub const BAD_PARAMS: i32 = -32602;
}

fn version() -> String {
    ProtocolConfig::JSONRPC_VERSION.to_string()
}

/// One kernel call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    #[serde(default = "version")]
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
    pub id: u64,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, params: serde_json::Value, id: u64) -> Self {
        Self {
            jsonrpc: version(),
            method: method.into(),
            params,
            id,
        }
    }
}

/// Failure of the call itself, as opposed to a kernel status code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcFault {
    pub code: i32,
    pub message: String,
}

/// What a reply carries: the handler's result or a fault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Result(serde_json::Value),
    Error(RpcFault),
}

/// Reply to one [`RpcRequest`].
///
/// `id` is `None` only when the request could not be parsed far enough to
/// recover its id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default = "version")]
    pub jsonrpc: String,
    pub id: Option<u64>,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl RpcResponse {
    pub fn reply(id: Option<u64>, outcome: Outcome) -> Self {
        Self {
            jsonrpc: version(),
            id,
            outcome,
        }
    }

    pub fn fault(id: Option<u64>, code: i32, message: impl Into<String>) -> Self {
        Self::reply(
            id,
            Outcome::Error(RpcFault {
                code,
                message: message.into(),
            }),
        )
    }
}

fn frame_len(len: usize) -> Result<u32> {
    if len > ProtocolConfig::MAX_FRAME_SIZE {
        return Err(RemoteError::protocol(format!(
            "frame of {} bytes exceeds the {} byte limit",
            len,
            ProtocolConfig::MAX_FRAME_SIZE
        )));
    }
    u32::try_from(len).map_err(|_| RemoteError::protocol(format!("frame of {} bytes", len)))
}

/// Serialize `message` and write it as one frame.
pub async fn write_json<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(message)?;
    let len = frame_len(body.len())?;

    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&body);
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame's payload. `None` means the peer closed between frames.
pub async fn read_raw<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut header = [0u8; 4];
    if let Err(e) = reader.read_exact(&mut header).await {
        return match e.kind() {
            std::io::ErrorKind::UnexpectedEof => Ok(None),
            _ => Err(e.into()),
        };
    }

    let len = frame_len(u32::from_be_bytes(header) as usize)?;
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

/// Read one frame and decode it as `T`.
pub async fn read_json<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    match read_raw(reader).await? {
        Some(body) => Ok(Some(serde_json::from_slice(&body)?)),
        None => Ok(None),
    }
}
