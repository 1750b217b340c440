//! Layered resolution of host connection settings.
//!
//! Precedence, most preferred first: environment variable, persisted per-host
//! setting, hardcoded default. The resolvers are separately typed — one for
//! strings, one for booleans — so no caller ever has to type-switch on a
//! generic value. Persisted settings arrive as JSON and may legitimately hold
//! either a native boolean or its textual form; anything else is a
//! configuration error, never a silent default.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default local endpoint of the managed daemon.
pub const DEFAULT_UNIX_SOCKET: &str = "unix:///var/run/docker.sock";

const HOST_ENV_VAR: &str = "HOSTCTL_HOST";
const TLS_VERIFY_ENV_VAR: &str = "HOSTCTL_TLS_VERIFY";
const CERT_PATH_ENV_VAR: &str = "HOSTCTL_CERT_PATH";

/// One lookup descriptor: where a setting may come from and what it falls
/// back to. Stateless, constructed per resolution.
#[derive(Debug, Clone, Copy)]
pub struct ConfigHierarchy<'a> {
    pub env_var: &'a str,
    pub settings_key: &'a str,
    pub default: &'a str,
}

/// Persisted per-host connection settings, keyed by setting name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionSettings {
    settings: HashMap<String, serde_json::Value>,
}

impl ConnectionSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.settings.insert(key.into(), value);
    }

    fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.settings.get(key)
    }

    /// Daemon endpoint URL for this host.
    pub fn host(&self) -> Result<String, ConfigError> {
        resolve_string(
            self,
            ConfigHierarchy {
                env_var: HOST_ENV_VAR,
                settings_key: "Host",
                default: DEFAULT_UNIX_SOCKET,
            },
        )
    }

    /// Whether TLS verification is required when talking to the daemon.
    pub fn tls_verify(&self) -> Result<bool, ConfigError> {
        resolve_bool(
            self,
            ConfigHierarchy {
                env_var: TLS_VERIFY_ENV_VAR,
                settings_key: "TlsVerify",
                default: "false",
            },
        )
    }

    /// Directory holding client certificates.
    pub fn cert_path(&self) -> Result<String, ConfigError> {
        let default = default_cert_path();
        resolve_string(
            self,
            ConfigHierarchy {
                env_var: CERT_PATH_ENV_VAR,
                settings_key: "CertPath",
                default: &default,
            },
        )
    }
}

fn default_cert_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.hostctl")
}

fn env_value(var: &str) -> Option<String> {
    match std::env::var(var) {
        Ok(v) if !v.is_empty() => Some(v),
        _ => None,
    }
}

/// Resolve a string-valued setting through the hierarchy.
///
/// A persisted value of any non-string JSON type is a configuration error.
pub fn resolve_string(
    settings: &ConnectionSettings,
    hierarchy: ConfigHierarchy<'_>,
) -> Result<String, ConfigError> {
    if let Some(v) = env_value(hierarchy.env_var) {
        return Ok(v);
    }
    match settings.get(hierarchy.settings_key) {
        Some(serde_json::Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(ConfigError::InvalidValue {
            key: hierarchy.settings_key.to_string(),
            value: other.to_string(),
            reason: "expected a string".to_string(),
        }),
        None => Ok(hierarchy.default.to_string()),
    }
}

/// Resolve a boolean-valued setting through the hierarchy.
///
/// Environment variables and persisted strings go through strict boolean
/// parsing ("true"/"false"); persisted native booleans are taken as-is.
pub fn resolve_bool(
    settings: &ConnectionSettings,
    hierarchy: ConfigHierarchy<'_>,
) -> Result<bool, ConfigError> {
    if let Some(v) = env_value(hierarchy.env_var) {
        return parse_bool(hierarchy.settings_key, &v);
    }
    match settings.get(hierarchy.settings_key) {
        Some(serde_json::Value::Bool(b)) => Ok(*b),
        Some(serde_json::Value::String(s)) => parse_bool(hierarchy.settings_key, s),
        Some(other) => Err(ConfigError::InvalidValue {
            key: hierarchy.settings_key.to_string(),
            value: other.to_string(),
            reason: "expected a boolean".to_string(),
        }),
        None => parse_bool(hierarchy.settings_key, hierarchy.default),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value
        .trim()
        .parse::<bool>()
        .map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: "expected \"true\" or \"false\"".to_string(),
        })
}
