//! Length-prefixed JSON message codec for the mailindex host.
//!
//! Every message is a native-endian `u32` byte length followed by that many
//! bytes of UTF-8 JSON. Requests are `{id, method, params}`; responses are
//! either `{id, result}` or `{id, error}`, with `id` echoed verbatim.

mod envelope;
mod frame;

pub use envelope::{best_effort_request_id, decode_request, DecodeFailure, RpcRequest, RpcResponse};
pub use frame::{read_frame, write_frame, write_frame_within, write_response};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode frame json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: u64, max: u32 },
    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    TruncatedFrame { expected: usize, actual: usize },
}

impl ProtocolError {
    /// True when the value was rejected before any byte reached the writer.
    pub fn is_encoding(&self) -> bool {
        matches!(self, Self::Json(_) | Self::FrameTooLarge { .. })
    }
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
