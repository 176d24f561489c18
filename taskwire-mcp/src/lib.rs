mod client;
pub mod normalize;
mod protocol;

pub use client::McpHttpTransport;
pub use protocol::{
    ContentPart, JsonRpcError, JsonRpcRequest, JsonRpcResponse, ToolCallParams, ToolCallResult,
};
