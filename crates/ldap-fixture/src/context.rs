//! Process-wide context: one server process, one gateway channel.
//!
//! The context is the explicit owner of the two process-wide resources.
//! Both are created lazily on first use, shared by every fixture built
//! from the same context, never re-established mid-run, and torn down
//! exactly once. Passing the context explicitly keeps the sharing visible
//! instead of hiding it in globals.

use crate::cancel::CancellationToken;
use crate::config::GatewayDefaults;
use crate::error::{FixtureError, Result};
use crate::process::{LaunchSettings, ServerProcess};
use crate::rpc::client::RetryPolicy;
use crate::rpc::gateway::{CallbackHandler, LoggingCallbackHandler, RpcGateway};
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Construction parameters for a [`ProcessContext`].
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Path to the server jar to launch.
    pub server_jar: PathBuf,
    /// Explicit runtime executable; `PATH` is searched otherwise.
    pub runtime: Option<PathBuf>,
    /// Loopback port of the server process's gateway listener.
    pub gateway_port: u16,
    /// Loopback port for the reverse callback listener (0 = OS-assigned).
    pub callback_port: u16,
    /// Retry behavior for the bootstrap connect.
    pub retry: RetryPolicy,
    /// When false, the context attaches to an already-running gateway
    /// instead of launching the jar itself.
    pub manage_process: bool,
}

impl ContextConfig {
    /// Manage a server process launched from `server_jar`.
    pub fn new(server_jar: impl Into<PathBuf>) -> Self {
        Self {
            server_jar: server_jar.into(),
            runtime: None,
            gateway_port: GatewayDefaults::GATEWAY_PORT,
            callback_port: GatewayDefaults::CALLBACK_PORT,
            retry: RetryPolicy::default(),
            manage_process: true,
        }
    }

    /// Attach to a gateway something else already started.
    pub fn attach(gateway_port: u16, callback_port: u16) -> Self {
        Self {
            server_jar: PathBuf::new(),
            runtime: None,
            gateway_port,
            callback_port,
            retry: RetryPolicy::default(),
            manage_process: false,
        }
    }

    pub fn with_runtime(mut self, runtime: impl Into<PathBuf>) -> Self {
        self.runtime = Some(runtime.into());
        self
    }

    pub fn with_gateway_port(mut self, port: u16) -> Self {
        self.gateway_port = port;
        self
    }

    pub fn with_callback_port(mut self, port: u16) -> Self {
        self.callback_port = port;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Owner of the shared server process and gateway channel.
pub struct ProcessContext {
    config: ContextConfig,
    handler: Arc<dyn CallbackHandler>,
    cancel: CancellationToken,
    /// Child process handle. A std mutex so the signal handler can reach
    /// it from outside the runtime.
    process: Arc<StdMutex<Option<ServerProcess>>>,
    gateway: Mutex<Option<Arc<RpcGateway>>>,
}

impl ProcessContext {
    pub fn new(config: ContextConfig) -> Self {
        Self::with_callback_handler(config, Arc::new(LoggingCallbackHandler))
    }

    /// Context with a custom handler for callbacks pushed by the server
    /// process.
    pub fn with_callback_handler(config: ContextConfig, handler: Arc<dyn CallbackHandler>) -> Self {
        Self {
            config,
            handler,
            cancel: CancellationToken::new(),
            process: Arc::new(StdMutex::new(None)),
            gateway: Mutex::new(None),
        }
    }

    /// Token governing the bootstrap connect loop; cancel it to abort a
    /// pending bootstrap.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The shared gateway, bootstrapping the server process and the
    /// channel on first use.
    ///
    /// The process is spawned at most once and the channel opened at most
    /// once per context; later calls return the same gateway. A launch or
    /// connect failure leaves nothing configured, but an already-spawned
    /// process stays tracked so [`shutdown`](Self::shutdown) can reap it.
    pub async fn gateway(&self) -> Result<Arc<RpcGateway>> {
        let mut slot = self.gateway.lock().await;
        if let Some(gateway) = slot.as_ref() {
            return Ok(gateway.clone());
        }

        if self.config.manage_process {
            let mut process = self.process.lock().unwrap();
            if process.is_none() {
                let mut settings = LaunchSettings::new(&self.config.server_jar)
                    .with_gateway_port(self.config.gateway_port);
                if let Some(runtime) = &self.config.runtime {
                    settings = settings.with_runtime(runtime);
                }
                *process = Some(ServerProcess::launch(&settings)?);
            }
        }

        let gateway = Arc::new(
            RpcGateway::open(
                self.config.gateway_port,
                self.config.callback_port,
                &self.config.retry,
                &self.cancel,
                self.handler.clone(),
            )
            .await?,
        );
        info!(
            "gateway channel established on port {}",
            self.config.gateway_port
        );
        *slot = Some(gateway.clone());
        Ok(gateway)
    }

    /// Tear down the channel, then the server process.
    ///
    /// Idempotent, and a no-op for resources that were never acquired.
    pub async fn shutdown(&self) {
        if let Some(gateway) = self.gateway.lock().await.take() {
            gateway.shutdown().await;
        }
        if let Some(mut process) = self.process.lock().unwrap().take() {
            process.terminate();
        }
        debug!("process context shut down");
    }

    /// Kill the server process and cancel pending connects when the user
    /// interrupts the run. The RPC channel is left to die with the
    /// process.
    ///
    /// The underlying handler registration is process-global, so this can
    /// be installed for at most one context per parent process.
    pub fn shutdown_on_ctrlc(&self) -> Result<()> {
        let cancel = self.cancel.clone();
        let process = self.process.clone();
        ctrlc::set_handler(move || {
            cancel.cancel();
            if let Some(mut p) = process.lock().unwrap().take() {
                p.terminate();
            }
        })
        .map_err(|e| FixtureError::Launch {
            message: format!("failed to install signal handler: {}", e),
            source: None,
        })
    }
}
