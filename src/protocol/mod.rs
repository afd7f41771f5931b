//! RPC protocol over session transports.

pub mod dispatcher;
pub mod message;

pub use dispatcher::Dispatcher;
pub use message::{RpcRequest, RpcResponse, CALL};
