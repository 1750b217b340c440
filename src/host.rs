//! Host entity: a named handle to one remote machine.
//!
//! A host binds a unique name, one driver instance and a local storage
//! directory. The driver's full field set is persisted to `config.json` in
//! that directory after every mutation that must survive a process restart;
//! loading rebuilds the driver through the registry.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::driver::Driver;
use crate::drivers::none::NoneDriver;
use crate::error::{Result, StoreError};
use crate::registry::DriverRegistry;
use crate::state::HostState;

/// Name of the host that always logically exists.
pub const DEFAULT_HOST_NAME: &str = "default";

const CONFIG_FILE_NAME: &str = "config.json";

/// On-disk descriptor, one file per host directory.
#[derive(Debug, Serialize, Deserialize)]
struct HostDescriptor {
    name: String,
    driver_name: String,
    created_at: DateTime<Utc>,
    driver: serde_json::Value,
}

/// A named handle to one remote machine.
pub struct Host {
    name: String,
    driver: Box<dyn Driver>,
    store_path: PathBuf,
    created_at: DateTime<Utc>,
}

impl Host {
    pub fn new(name: impl Into<String>, driver: Box<dyn Driver>, store_path: PathBuf) -> Self {
        Self {
            name: name.into(),
            driver,
            store_path,
            created_at: Utc::now(),
        }
    }

    /// The implicit local host, synthesized whether or not a directory for it
    /// exists on disk.
    pub fn default_host(store_path: PathBuf) -> Self {
        Self::new(
            DEFAULT_HOST_NAME,
            Box::new(<NoneDriver as crate::driver::DriverFactory>::new(
                store_path.clone(),
            )),
            store_path,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_default(&self) -> bool {
        self.name == DEFAULT_HOST_NAME
    }

    pub fn driver(&self) -> &dyn Driver {
        self.driver.as_ref()
    }

    pub fn driver_mut(&mut self) -> &mut dyn Driver {
        self.driver.as_mut()
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn config_path(&self) -> PathBuf {
        self.store_path.join(CONFIG_FILE_NAME)
    }

    /// Provision the backing remote resource.
    pub async fn create(&mut self, cancel: &CancellationToken) -> Result<()> {
        tracing::info!(host = %self.name, driver = %self.driver.driver_name(), "creating host");
        self.driver.create(cancel).await
    }

    pub async fn start(&self) -> Result<()> {
        self.driver.start().await
    }

    pub async fn stop(&self) -> Result<()> {
        self.driver.stop().await
    }

    pub async fn restart(&self) -> Result<()> {
        self.driver.restart().await
    }

    pub async fn kill(&self) -> Result<()> {
        self.driver.kill().await
    }

    /// Deprovision the backing remote resource. Local storage is deleted by
    /// an explicit follow-up call to [`Host::delete_storage`], never
    /// implicitly.
    pub async fn remove(&self) -> Result<()> {
        tracing::info!(host = %self.name, "removing host");
        self.driver.remove().await
    }

    /// Fresh remote state query; never served from a cache.
    pub async fn state(&mut self) -> Result<HostState> {
        self.driver.get_state().await
    }

    /// Write the host descriptor, including the driver's full field set.
    pub fn save(&self) -> Result<()> {
        let descriptor = HostDescriptor {
            name: self.name.clone(),
            driver_name: self.driver.driver_name().to_string(),
            created_at: self.created_at,
            driver: self.driver.persistent_state()?,
        };
        let contents = serde_json::to_string_pretty(&descriptor)?;
        std::fs::write(self.config_path(), contents)?;
        Ok(())
    }

    /// Load a host from its directory, rebuilding the driver via the
    /// registry. The default host is synthesized when it has no directory.
    pub fn load(name: &str, store_path: PathBuf, registry: &DriverRegistry) -> Result<Self> {
        let config_path = store_path.join(CONFIG_FILE_NAME);
        if !config_path.exists() {
            if name == DEFAULT_HOST_NAME {
                return Ok(Self::default_host(store_path));
            }
            return Err(StoreError::UnknownHost(name.to_string()).into());
        }

        let contents = std::fs::read_to_string(&config_path)?;
        let descriptor: HostDescriptor = serde_json::from_str(&contents)?;
        let driver = registry.restore_driver(
            &descriptor.driver_name,
            store_path.clone(),
            descriptor.driver,
        )?;
        Ok(Self {
            name: descriptor.name,
            driver,
            store_path,
            created_at: descriptor.created_at,
        })
    }

    /// Delete the host's local storage directory. Explicit, never called as
    /// part of `remove`.
    pub fn delete_storage(&self) -> Result<()> {
        if self.store_path.exists() {
            std::fs::remove_dir_all(&self.store_path)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("name", &self.name)
            .field("driver", &self.driver.driver_name())
            .field("store_path", &self.store_path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DriverFactory;
    use crate::drivers::socket::{SocketDriver, SocketOptions};

    #[test]
    fn save_then_load_round_trips_driver_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();
        let registry = DriverRegistry::with_builtins();

        let mut driver = SocketDriver::new(path.clone());
        driver
            .apply_options(SocketOptions {
                url: "tcp://192.0.2.9:2375".to_string(),
            })
            .unwrap();
        let host = Host::new("edge-1", Box::new(driver), path.clone());
        host.save().unwrap();

        let loaded = Host::load("edge-1", path, &registry).unwrap();
        assert_eq!(loaded.name(), "edge-1");
        assert_eq!(loaded.driver().driver_name(), "socket");
        assert_eq!(loaded.driver().get_url().unwrap(), "tcp://192.0.2.9:2375");
    }

    #[test]
    fn default_host_is_synthesized_without_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let registry = DriverRegistry::with_builtins();
        let host = Host::load(
            DEFAULT_HOST_NAME,
            dir.path().join("default"),
            &registry,
        )
        .unwrap();
        assert!(host.is_default());
        assert_eq!(host.driver().driver_name(), "none");
    }

    #[test]
    fn loading_a_missing_host_is_a_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let registry = DriverRegistry::with_builtins();
        let err = Host::load("ghost", dir.path().join("ghost"), &registry).unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Store(StoreError::UnknownHost(_))
        ));
    }
}
