//! Embedded directory server fixture for integration tests.
//!
//! Launches an external in-memory LDAP server (a Java artifact) as a
//! child process, drives it over a loopback RPC gateway, and exposes
//! per-instance start/stop lifecycle control. The directory engine itself
//! lives entirely in the child process; this crate owns three things:
//!
//! - supervising the server process (spawned once per context, killed
//!   exactly once at teardown),
//! - the resilient bootstrap to its slow-starting gateway listener
//!   (retrying refused connects until the child is ready), and
//! - translating nested fixture configuration into the remote builder
//!   calls that assemble a server configuration object.
//!
//! # Example
//!
//! ```rust,no_run
//! use ldap_fixture::{ContextConfig, LdapServer, ProcessContext, ServerConfig};
//!
//! # async fn run() -> ldap_fixture::Result<()> {
//! let context = ProcessContext::new(ContextConfig::new("ldap-test-server.jar"));
//!
//! let server = LdapServer::new(
//!     &context,
//!     ServerConfig {
//!         port: Some(3333),
//!         ..ServerConfig::default()
//!     },
//! )
//! .await?;
//!
//! server.start().await?;
//! // ... bind and search against ldap://localhost:3333 ...
//! server.stop().await?;
//!
//! context.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod cancel;
pub mod config;
pub mod context;
pub mod error;
pub mod process;
pub mod rpc;
pub mod server;

mod builder;

// Re-export commonly used types
pub use cancel::CancellationToken;
pub use config::{
    DirectoryDefaults, EffectiveConfig, Entry, GatewayDefaults, ServerConfig, Values,
};
pub use context::{ContextConfig, ProcessContext};
pub use error::{FixtureError, Result};
pub use process::{LaunchSettings, ServerProcess};
pub use rpc::client::{RetryPolicy, RpcClient, RpcSession};
pub use rpc::gateway::{CallbackHandler, RpcGateway};
pub use rpc::protocol::{RemoteHandle, RpcValue};
pub use server::LdapServer;
