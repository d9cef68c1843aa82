//! Wire protocol for the gateway channel.
//!
//! Frames are a 4-byte big-endian length prefix followed by a UTF-8 JSON
//! payload:
//!
//! ```text
//! [u32 BE: len][UTF-8 JSON bytes of len]
//! ```
//!
//! The payload shapes below are the fixed contract spoken by the embedded
//! directory server's gateway: constructors for its factory objects,
//! method invocations against remote handles, and homogeneous remote
//! arrays.

use crate::config::GatewayDefaults;
use crate::error::{FixtureError, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Opaque reference to an object living in the server process.
///
/// The parent never interprets the identifier; it only threads it back
/// into subsequent calls.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteHandle(String);

impl RemoteHandle {
    /// Well-known identifier of the server controller object. Every other
    /// handle is minted by the server process.
    pub const ENTRY_POINT_ID: &'static str = "entry-point";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Handle designating the top-level server controller.
    pub fn entry_point() -> Self {
        Self(Self::ENTRY_POINT_ID.to_string())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

/// A value crossing the gateway in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "snake_case")]
pub enum RpcValue {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    /// Reference to a remote object.
    Handle(RemoteHandle),
    List(Vec<RpcValue>),
}

/// A single remote invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RpcCall {
    /// Instantiate a remote object of a named kind.
    Constructor { kind: String, args: Vec<RpcValue> },
    /// Invoke a method on an existing remote object.
    Method {
        target: RemoteHandle,
        name: String,
        args: Vec<RpcValue>,
    },
    /// Allocate a homogeneous remote array from the given items.
    NewArray { items: Vec<RpcValue> },
}

/// Request frame payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayRequest {
    pub id: u64,
    #[serde(flatten)]
    pub call: RpcCall,
}

/// Response frame payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayResponse {
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<RpcValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteFault>,
}

impl GatewayResponse {
    pub fn success(id: u64, result: RpcValue) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: u64, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(RemoteFault {
                message: message.into(),
            }),
        }
    }
}

/// Error payload reported by the remote side, passed through verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteFault {
    pub message: String,
}

/// Read a length-prefixed frame from an async reader.
///
/// Returns `None` on clean EOF (peer closed the connection).
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;

    if len > GatewayDefaults::MAX_FRAME_SIZE {
        return Err(FixtureError::Protocol {
            message: format!(
                "frame size {} exceeds maximum {}",
                len,
                GatewayDefaults::MAX_FRAME_SIZE
            ),
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    Ok(Some(payload))
}

/// Write a length-prefixed frame to an async writer.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}
