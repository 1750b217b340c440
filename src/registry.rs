//! Driver registry: name → factory mapping.
//!
//! Populated once via explicit registration calls before any lookup — never
//! lazily on first use. The map is concurrency-safe so registration cannot
//! race a lookup in a multithreaded host, but the expected usage is build at
//! startup, then read-only. Constructing a driver through the registry never
//! provisions anything; provisioning happens only inside `Driver::create`.

use std::path::PathBuf;

use dashmap::DashMap;

use crate::driver::{Driver, DriverFactory};
use crate::error::{Error, Result};

type FactoryFn = fn(PathBuf, Option<serde_json::Value>) -> Result<Box<dyn Driver>>;
type RestoreFn = fn(PathBuf, serde_json::Value) -> Result<Box<dyn Driver>>;

struct RegisteredDriver {
    factory: FactoryFn,
    restore: RestoreFn,
}

/// Process-wide mapping from driver name to construction functions.
pub struct DriverRegistry {
    entries: DashMap<String, RegisteredDriver>,
}

impl DriverRegistry {
    /// Empty registry. Most callers want [`DriverRegistry::with_builtins`].
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Registry pre-populated with every built-in driver.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register::<crate::drivers::none::NoneDriver>();
        registry.register::<crate::drivers::socket::SocketDriver>();
        registry.register::<crate::drivers::ec2::Ec2Driver>();
        registry
    }

    /// Register a driver under its declared name.
    ///
    /// The erased entry decodes the driver's typed options via serde, so the
    /// opaque value the store passes through never needs a caller-visible
    /// type check.
    pub fn register<D: DriverFactory>(&self) {
        self.entries.insert(
            D::NAME.to_string(),
            RegisteredDriver {
                factory: |store_path, options| {
                    let mut driver = D::new(store_path);
                    if let Some(value) = options {
                        let options: D::Options = serde_json::from_value(value)?;
                        driver.apply_options(options)?;
                    }
                    Ok(Box::new(driver) as Box<dyn Driver>)
                },
                restore: |store_path, state| {
                    Ok(Box::new(D::restore(store_path, state)?) as Box<dyn Driver>)
                },
            },
        );
    }

    /// Construct and configure a driver. Does not provision.
    pub fn create_driver(
        &self,
        name: &str,
        store_path: PathBuf,
        options: Option<serde_json::Value>,
    ) -> Result<Box<dyn Driver>> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| Error::UnknownDriver(name.to_string()))?;
        (entry.factory)(store_path, options)
    }

    /// Rebuild a driver from a persisted host descriptor.
    pub fn restore_driver(
        &self,
        name: &str,
        store_path: PathBuf,
        state: serde_json::Value,
    ) -> Result<Box<dyn Driver>> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| Error::UnknownDriver(name.to_string()))?;
        (entry.restore)(store_path, state)
    }

    /// Registered driver names, for diagnostics.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered() {
        let registry = DriverRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["ec2", "none", "socket"]);
    }

    #[test]
    fn unknown_driver_is_a_typed_error() {
        let registry = DriverRegistry::with_builtins();
        let err = registry
            .create_driver("vsphere", PathBuf::from("/tmp/x"), None)
            .unwrap_err();
        assert!(matches!(err, Error::UnknownDriver(name) if name == "vsphere"));
    }

    #[test]
    fn construction_applies_typed_options() {
        let registry = DriverRegistry::with_builtins();
        let driver = registry
            .create_driver(
                "socket",
                PathBuf::from("/tmp/x"),
                Some(serde_json::json!({ "url": "tcp://10.0.0.5:2375" })),
            )
            .unwrap();
        assert_eq!(driver.get_url().unwrap(), "tcp://10.0.0.5:2375");
    }
}
