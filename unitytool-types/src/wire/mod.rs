//! Schema-exact wire representations.
//!
//! Domain types evolve; wire types do not. The bridge receiver is compiled
//! into the engine and only understands the flat v1 shapes in [`bridge_v1`].

mod bridge_v1;

pub use bridge_v1::{
    BRIDGE_PROTOCOL_VERSION, BridgeOpV1, BridgeRequestV1, BridgeResponseV1, parse_bridge_response,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("bridge response is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bridge response schema violation: {detail}")]
    Schema { detail: String },

    #[error("bridge protocol version mismatch: expected {expected}, received {received}")]
    ProtocolVersion { expected: u32, received: String },
}
