//! Fixture configuration: recognized keys, defaults, and the merge rule.
//!
//! The merge is shallow and top-level only: a key present in the caller's
//! overrides replaces the default wholesale, nested values included. An
//! override `base` without attributes does not inherit the default base's
//! attributes; it simply has none.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Gateway channel defaults and limits.
pub struct GatewayDefaults;

impl GatewayDefaults {
    /// Forward channel port the parent dials on loopback.
    pub const GATEWAY_PORT: u16 = 25333;
    /// Reverse channel port offered to the server process for callbacks.
    pub const CALLBACK_PORT: u16 = 25334;
    /// Delay between connect attempts while the server process is still
    /// starting.
    pub const CONNECT_BACKOFF: Duration = Duration::from_millis(100);
    /// Upper bound on a single gateway frame.
    pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;
}

/// Directory defaults applied when the caller omits a key.
pub struct DirectoryDefaults;

impl DirectoryDefaults {
    pub const PORT: u16 = 10389;
    pub const BIND_DN: &'static str = "cn=admin,dc=example,dc=com";
    pub const PASSWORD: &'static str = "password";
    pub const BASE_DN: &'static str = "dc=example,dc=com";

    /// The default root naming context: a `domain` entry at
    /// `dc=example,dc=com` with `dc: example`.
    pub fn base_entry() -> Entry {
        Entry::new(Self::BASE_DN, "domain").with_attribute("dc", "example")
    }
}

/// One or many attribute values.
///
/// Directory attributes are multi-valued; callers may still write a bare
/// string for the common single-value case. Both forms normalize to the
/// same homogeneous sequence before crossing the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Values {
    One(String),
    Many(Vec<String>),
}

impl Values {
    /// Normalize to a sequence; a scalar becomes a single-element
    /// sequence. Already-sequenced input passes through unchanged.
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Values::One(value) => vec![value.clone()],
            Values::Many(values) => values.clone(),
        }
    }
}

impl From<&str> for Values {
    fn from(value: &str) -> Self {
        Values::One(value.to_string())
    }
}

impl From<String> for Values {
    fn from(value: String) -> Self {
        Values::One(value)
    }
}

impl From<Vec<String>> for Values {
    fn from(values: Vec<String>) -> Self {
        Values::Many(values)
    }
}

/// A directory entry: DN, object classes, named multi-valued attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub dn: String,
    #[serde(rename = "objectclass")]
    pub object_class: Values,
    /// Attribute map. Ordered so the remote translation emits attributes
    /// deterministically.
    #[serde(default)]
    pub attributes: BTreeMap<String, Values>,
}

impl Entry {
    pub fn new(dn: impl Into<String>, object_class: impl Into<Values>) -> Self {
        Self {
            dn: dn.into(),
            object_class: object_class.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, values: impl Into<Values>) -> Self {
        self.attributes.insert(name.into(), values.into());
        self
    }
}

/// Caller-supplied configuration overrides.
///
/// Every recognized key is optional. Unknown keys in deserialized input
/// are ignored rather than rejected, so callers can carry extra metadata
/// in the same document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: Option<u16>,
    pub bind_dn: Option<String>,
    pub password: Option<String>,
    pub base: Option<Entry>,
    pub entries: Option<Vec<Entry>>,
    /// LDIF sources loaded at startup, in order. Each element is handed to
    /// the server process as-is (a path or an inline blob).
    pub ldifs: Option<Vec<String>>,
}

/// Effective configuration after merging caller overrides over defaults.
///
/// Returned alongside the server handle so the effective port, bind DN,
/// password and base are readable even when the caller relied on
/// defaults. There are no defaults for `entries` and `ldifs`; when absent,
/// the corresponding remote setters are never invoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectiveConfig {
    pub port: u16,
    pub bind_dn: String,
    pub password: String,
    pub base: Entry,
    pub entries: Option<Vec<Entry>>,
    pub ldifs: Option<Vec<String>>,
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        Self {
            port: DirectoryDefaults::PORT,
            bind_dn: DirectoryDefaults::BIND_DN.to_string(),
            password: DirectoryDefaults::PASSWORD.to_string(),
            base: DirectoryDefaults::base_entry(),
            entries: None,
            ldifs: None,
        }
    }
}

impl EffectiveConfig {
    /// Shallow top-level merge: each key present in `overrides` replaces
    /// the default wholesale; absent keys keep the default unchanged.
    pub fn merged(overrides: &ServerConfig) -> Self {
        let defaults = Self::default();
        Self {
            port: overrides.port.unwrap_or(defaults.port),
            bind_dn: overrides.bind_dn.clone().unwrap_or(defaults.bind_dn),
            password: overrides.password.clone().unwrap_or(defaults.password),
            base: overrides.base.clone().unwrap_or(defaults.base),
            entries: overrides.entries.clone(),
            ldifs: overrides.ldifs.clone(),
        }
    }
}
