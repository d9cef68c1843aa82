//! Translation of the merged configuration into remote builder calls.
//!
//! The remote surface is a chained-setter configuration builder plus
//! factories for `entry`, `attribute` and `ldif` descriptor objects. The
//! setters are independent and idempotent; the key table below fixes
//! their emission order so the call sequence is deterministic.

use crate::config::{EffectiveConfig, Entry};
use crate::error::{FixtureError, Result};
use crate::rpc::client::RpcSession;
use crate::rpc::protocol::{RemoteHandle, RpcValue};
use tracing::debug;

/// Remote object kinds understood by the gateway.
const KIND_CONFIG: &str = "config";
const KIND_ENTRY: &str = "entry";
const KIND_ATTRIBUTE: &str = "attribute";
const KIND_LDIF: &str = "ldif";

/// Recognized configuration keys, in emission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigKey {
    Port,
    Base,
    Entries,
    Ldifs,
    BindDn,
    Password,
}

const KEY_ORDER: [ConfigKey; 6] = [
    ConfigKey::Port,
    ConfigKey::Base,
    ConfigKey::Entries,
    ConfigKey::Ldifs,
    ConfigKey::BindDn,
    ConfigKey::Password,
];

/// Assemble the remote configuration object for `config`.
///
/// Any failing remote call is wrapped with the step that issued it.
/// Partially constructed remote objects are not cleaned up here; they are
/// garbage on the remote side, bounded by the server process's lifetime.
pub(crate) async fn build_remote_config(
    session: &mut RpcSession<'_>,
    config: &EffectiveConfig,
) -> Result<RemoteHandle> {
    let builder = session
        .call_constructor(KIND_CONFIG, vec![])
        .await
        .map_err(|e| FixtureError::config_build("config", e))?;

    for key in KEY_ORDER {
        match key {
            ConfigKey::Port => {
                session
                    .call_method(&builder, "port", vec![RpcValue::Int(i64::from(config.port))])
                    .await
                    .map_err(|e| FixtureError::config_build("port", e))?;
            }
            ConfigKey::Base => {
                let entry = push_entry(session, &config.base)
                    .await
                    .map_err(|e| FixtureError::config_build("base", e))?;
                session
                    .call_method(&builder, "base", vec![RpcValue::Handle(entry)])
                    .await
                    .map_err(|e| FixtureError::config_build("base", e))?;
            }
            ConfigKey::Entries => {
                let Some(entries) = &config.entries else {
                    continue;
                };
                let step = |e| FixtureError::config_build("entries", e);
                let mut handles = Vec::with_capacity(entries.len());
                for entry in entries {
                    let handle = push_entry(session, entry).await.map_err(step)?;
                    handles.push(RpcValue::Handle(handle));
                }
                let array = session.new_array(handles).await.map_err(step)?;
                session
                    .call_method(&builder, "entries", vec![RpcValue::Handle(array)])
                    .await
                    .map_err(step)?;
            }
            ConfigKey::Ldifs => {
                let Some(ldifs) = &config.ldifs else {
                    continue;
                };
                let step = |e| FixtureError::config_build("ldifs", e);
                let mut handles = Vec::with_capacity(ldifs.len());
                for source in ldifs {
                    let ldif = session
                        .call_constructor(KIND_LDIF, vec![RpcValue::Str(source.clone())])
                        .await
                        .map_err(step)?;
                    handles.push(RpcValue::Handle(ldif));
                }
                let array = session.new_array(handles).await.map_err(step)?;
                session
                    .call_method(&builder, "ldifs", vec![RpcValue::Handle(array)])
                    .await
                    .map_err(step)?;
            }
            ConfigKey::BindDn => {
                session
                    .call_method(
                        &builder,
                        "bindDn",
                        vec![RpcValue::Str(config.bind_dn.clone())],
                    )
                    .await
                    .map_err(|e| FixtureError::config_build("bind_dn", e))?;
            }
            ConfigKey::Password => {
                session
                    .call_method(
                        &builder,
                        "password",
                        vec![RpcValue::Str(config.password.clone())],
                    )
                    .await
                    .map_err(|e| FixtureError::config_build("password", e))?;
            }
        }
    }

    debug!("remote configuration assembled, requesting build");

    let built = session
        .call_method(&builder, "build", vec![])
        .await
        .map_err(|e| FixtureError::config_build("build", e))?;
    match built {
        RpcValue::Handle(handle) => Ok(handle),
        other => Err(FixtureError::config_build(
            "build",
            FixtureError::Protocol {
                message: format!("expected a configuration handle, got {:?}", other),
            },
        )),
    }
}

/// Entry-to-remote-object rule: normalized objectclass array, one remote
/// attribute object per attribute name, then the entry object itself.
async fn push_entry(session: &mut RpcSession<'_>, entry: &Entry) -> Result<RemoteHandle> {
    let classes = entry
        .object_class
        .to_vec()
        .into_iter()
        .map(RpcValue::Str)
        .collect();
    let class_array = session.new_array(classes).await?;

    let mut attributes = Vec::with_capacity(entry.attributes.len());
    for (name, values) in &entry.attributes {
        let value_array = session
            .new_array(values.to_vec().into_iter().map(RpcValue::Str).collect())
            .await?;
        let attribute = session
            .call_constructor(
                KIND_ATTRIBUTE,
                vec![RpcValue::Str(name.clone()), RpcValue::Handle(value_array)],
            )
            .await?;
        attributes.push(RpcValue::Handle(attribute));
    }
    let attribute_array = session.new_array(attributes).await?;

    session
        .call_constructor(
            KIND_ENTRY,
            vec![
                RpcValue::Str(entry.dn.clone()),
                RpcValue::Handle(class_array),
                RpcValue::Handle(attribute_array),
            ],
        )
        .await
}
