//! Supervision of the external directory server process.
//!
//! The server engine is a Java artifact launched as a child process. This
//! module only spawns and kills it; readiness is the gateway connector's
//! responsibility.

mod supervisor;

pub use supervisor::{LaunchSettings, ServerProcess};
