//! Driver for a pre-existing daemon reachable at a network endpoint.
//!
//! Nothing is provisioned: the host already runs a daemon somewhere and the
//! driver just records where. Lifecycle operations are not supported because
//! this driver has no control channel to the machine itself.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::driver::{unsupported, Driver, DriverFactory};
use crate::error::{ConfigError, Result};
use crate::ssh::SshCommand;
use crate::state::HostState;

/// Options for the socket driver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketOptions {
    /// Daemon endpoint, e.g. `tcp://10.0.0.5:2375`.
    pub url: String,
}

/// Driver wrapping a generic network endpoint.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SocketDriver {
    url: String,
    #[serde(skip)]
    store_path: PathBuf,
}

impl DriverFactory for SocketDriver {
    const NAME: &'static str = "socket";
    type Options = SocketOptions;

    fn new(store_path: PathBuf) -> Self {
        Self {
            url: String::new(),
            store_path,
        }
    }

    fn apply_options(&mut self, options: SocketOptions) -> std::result::Result<(), ConfigError> {
        if options.url.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "url".to_string(),
                value: options.url,
                reason: "the socket driver requires an endpoint URL".to_string(),
            });
        }
        self.url = options.url;
        Ok(())
    }

    fn restore(store_path: PathBuf, state: serde_json::Value) -> Result<Self> {
        let mut driver: SocketDriver = serde_json::from_value(state)?;
        driver.store_path = store_path;
        Ok(driver)
    }
}

#[async_trait]
impl Driver for SocketDriver {
    fn driver_name(&self) -> &'static str {
        Self::NAME
    }

    fn get_url(&self) -> Result<String> {
        Ok(self.url.clone())
    }

    fn get_ip(&self) -> Result<String> {
        let parsed = url::Url::parse(&self.url).map_err(|e| {
            crate::error::Error::Config(ConfigError::InvalidValue {
                key: "url".to_string(),
                value: self.url.clone(),
                reason: e.to_string(),
            })
        })?;
        match parsed.host_str() {
            Some(host) => Ok(host.to_string()),
            None => Err(unsupported(Self::NAME, "get_ip")),
        }
    }

    async fn get_state(&mut self) -> Result<HostState> {
        Ok(HostState::None)
    }

    async fn create(&mut self, _cancel: &CancellationToken) -> Result<()> {
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        Err(unsupported(Self::NAME, "start"))
    }

    async fn stop(&self) -> Result<()> {
        Err(unsupported(Self::NAME, "stop"))
    }

    async fn restart(&self) -> Result<()> {
        Err(unsupported(Self::NAME, "restart"))
    }

    async fn kill(&self) -> Result<()> {
        Err(unsupported(Self::NAME, "kill"))
    }

    async fn remove(&self) -> Result<()> {
        Err(unsupported(Self::NAME, "remove"))
    }

    fn ssh_command(&self, _args: &[&str]) -> Result<SshCommand> {
        Err(unsupported(Self::NAME, "ssh"))
    }

    fn persistent_state(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ip_comes_from_endpoint_host() {
        let mut driver = SocketDriver::new(PathBuf::from("/tmp/x"));
        driver
            .apply_options(SocketOptions {
                url: "tcp://10.0.0.5:2375".to_string(),
            })
            .unwrap();
        assert_eq!(driver.get_ip().unwrap(), "10.0.0.5");
    }

    #[test]
    fn empty_url_is_rejected_before_use() {
        let mut driver = SocketDriver::new(PathBuf::from("/tmp/x"));
        let err = driver.apply_options(SocketOptions::default()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
