//! The fixture façade: configure, create, start and stop one embedded
//! directory server instance.

use crate::builder;
use crate::config::{EffectiveConfig, ServerConfig};
use crate::context::ProcessContext;
use crate::error::{FixtureError, Result};
use crate::rpc::gateway::RpcGateway;
use crate::rpc::protocol::{RemoteHandle, RpcValue};
use std::sync::Arc;
use tracing::{debug, info};

/// One embedded directory server instance.
///
/// Construction is the expensive step: it bootstraps the shared server
/// process and gateway (first caller only), translates the merged
/// configuration into a remote configuration object, and registers the
/// instance with the controller, which hands back a per-instance server
/// id. `start` and `stop` are then single remote calls threading that id.
///
/// Several instances can share one context, each with its own remote
/// configuration and id. No local state machine is enforced: starting
/// twice, or stopping before starting, surfaces whatever the server
/// itself replies.
#[derive(Debug)]
pub struct LdapServer {
    gateway: Arc<RpcGateway>,
    config: EffectiveConfig,
    config_handle: RemoteHandle,
    server_id: RemoteHandle,
}

impl LdapServer {
    /// Build a server instance from caller overrides merged over the
    /// defaults.
    pub async fn new(context: &ProcessContext, overrides: ServerConfig) -> Result<Self> {
        let gateway = context.gateway().await?;
        let config = EffectiveConfig::merged(&overrides);

        let mut session = gateway.session().await;
        let config_handle = builder::build_remote_config(&mut session, &config).await?;

        let created = session
            .call_method(
                gateway.entry_point(),
                "create",
                vec![RpcValue::Handle(config_handle.clone())],
            )
            .await?;
        let server_id = match created {
            RpcValue::Handle(id) => id,
            other => {
                return Err(FixtureError::Protocol {
                    message: format!("expected a server id from create, got {:?}", other),
                })
            }
        };
        drop(session);

        info!(
            "directory server instance {} configured on port {}",
            server_id.id(),
            config.port
        );

        Ok(Self {
            gateway,
            config,
            config_handle,
            server_id,
        })
    }

    /// Server instance with the all-default configuration.
    pub async fn with_defaults(context: &ProcessContext) -> Result<Self> {
        Self::new(context, ServerConfig::default()).await
    }

    /// The merged effective configuration; port, bind DN, password and
    /// base are readable here even when the caller relied on defaults.
    pub fn config(&self) -> &EffectiveConfig {
        &self.config
    }

    /// LDAP port the instance listens on once started.
    pub fn port(&self) -> u16 {
        self.config.port
    }

    /// Remote reference to the immutable server configuration object.
    pub fn config_handle(&self) -> &RemoteHandle {
        &self.config_handle
    }

    /// Identifier of this instance inside the server process.
    pub fn server_id(&self) -> &RemoteHandle {
        &self.server_id
    }

    /// Start the instance. Failures come back verbatim from the server.
    pub async fn start(&self) -> Result<()> {
        debug!("starting directory server instance {}", self.server_id.id());
        self.gateway
            .session()
            .await
            .call_method(
                self.gateway.entry_point(),
                "start",
                vec![RpcValue::Handle(self.server_id.clone())],
            )
            .await?;
        Ok(())
    }

    /// Stop the instance. Failures come back verbatim from the server.
    pub async fn stop(&self) -> Result<()> {
        debug!("stopping directory server instance {}", self.server_id.id());
        self.gateway
            .session()
            .await
            .call_method(
                self.gateway.entry_point(),
                "stop",
                vec![RpcValue::Handle(self.server_id.clone())],
            )
            .await?;
        Ok(())
    }
}
