//! Driver for the implicit local host.
//!
//! Backs the `"default"` host: no remote resource, no lifecycle. The daemon
//! URL resolves through the usual hierarchy (explicit value, environment,
//! default local socket).

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::{ConnectionSettings, DEFAULT_UNIX_SOCKET};
use crate::driver::{unsupported, Driver, DriverFactory};
use crate::error::{ConfigError, Result};
use crate::ssh::SshCommand;
use crate::state::HostState;

/// Options for the none driver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NoneOptions {
    /// Explicit daemon URL; overrides environment and default.
    pub url: Option<String>,
}

/// Driver representing the local daemon socket.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct NoneDriver {
    url: Option<String>,
    #[serde(skip)]
    store_path: PathBuf,
}

impl DriverFactory for NoneDriver {
    const NAME: &'static str = "none";
    type Options = NoneOptions;

    fn new(store_path: PathBuf) -> Self {
        Self {
            url: None,
            store_path,
        }
    }

    fn apply_options(&mut self, options: NoneOptions) -> std::result::Result<(), ConfigError> {
        self.url = options.url;
        Ok(())
    }

    fn restore(store_path: PathBuf, state: serde_json::Value) -> Result<Self> {
        let mut driver: NoneDriver = serde_json::from_value(state)?;
        driver.store_path = store_path;
        Ok(driver)
    }
}

#[async_trait]
impl Driver for NoneDriver {
    fn driver_name(&self) -> &'static str {
        Self::NAME
    }

    fn get_url(&self) -> Result<String> {
        if let Some(url) = &self.url {
            return Ok(url.clone());
        }
        Ok(ConnectionSettings::new()
            .host()
            .unwrap_or_else(|_| DEFAULT_UNIX_SOCKET.to_string()))
    }

    fn get_ip(&self) -> Result<String> {
        Err(unsupported(Self::NAME, "get_ip"))
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

    #[tokio::test]
    async fn explicit_url_wins() {
        let mut driver = NoneDriver::new(PathBuf::from("/tmp/x"));
        driver
            .apply_options(NoneOptions {
                url: Some("tcp://10.1.1.1:2375".to_string()),
            })
            .unwrap();
        assert_eq!(driver.get_url().unwrap(), "tcp://10.1.1.1:2375");
        assert_eq!(driver.get_state().await.unwrap(), HostState::None);
    }

    #[tokio::test]
    async fn lifecycle_is_unsupported() {
        let driver = NoneDriver::new(PathBuf::from("/tmp/x"));
        assert!(matches!(
            driver.start().await,
            Err(crate::error::Error::Unsupported { .. })
        ));
        assert!(matches!(
            driver.remove().await,
            Err(crate::error::Error::Unsupported { .. })
        ));
    }
}
