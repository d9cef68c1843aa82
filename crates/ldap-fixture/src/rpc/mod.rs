//! Loopback RPC bridge to the server process.
//!
//! - **protocol**: framing and payload shapes of the gateway contract
//! - **client**: resilient connect and typed remote calls
//! - **gateway**: channel wrapper, controller entry point, reverse
//!   callback listener

pub mod client;
pub mod gateway;
pub mod protocol;

pub use client::{RetryPolicy, RpcClient, RpcSession};
pub use gateway::{CallbackHandler, RpcGateway};
pub use protocol::{RemoteHandle, RpcValue};
