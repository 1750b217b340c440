//! Directory-backed host store with active-host tracking.
//!
//! One subdirectory per host under the store root, a `config.json` descriptor
//! inside each, and a single `.active` file at the root naming the active
//! host. The active pointer is shared, unlocked state: concurrent writers
//! from independent processes race and the last writer wins, which is
//! acceptable for the assumed single operator and documented here rather
//! than strengthened.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result, StoreError};
use crate::host::{Host, DEFAULT_HOST_NAME};
use crate::registry::DriverRegistry;

const ACTIVE_FILE_NAME: &str = ".active";

/// A `Store::create` failure, carrying the partially-built host when
/// provisioning got far enough to produce one. The caller decides whether to
/// retry or explicitly remove it; the store performs no automatic cleanup.
#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct CreateError {
    pub host: Option<Host>,
    #[source]
    pub source: Error,
}

impl CreateError {
    fn bare(source: Error) -> Self {
        Self { host: None, source }
    }

    fn partial(host: Host, source: Error) -> Self {
        Self {
            host: Some(host),
            source,
        }
    }
}

/// Persists hosts on the filesystem.
pub struct Store {
    root: PathBuf,
    registry: Arc<DriverRegistry>,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>, registry: Arc<DriverRegistry>) -> Self {
        Self {
            root: root.into(),
            registry,
        }
    }

    /// Store rooted at the conventional per-user location.
    pub fn with_default_root(registry: Arc<DriverRegistry>) -> Self {
        Self::new(Self::default_root(), registry)
    }

    /// `$HOME/.hostctl/hosts`.
    pub fn default_root() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        Path::new(&home).join(".hostctl").join("hosts")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn host_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn active_path(&self) -> PathBuf {
        self.root.join(ACTIVE_FILE_NAME)
    }

    /// Create and provision a named host.
    ///
    /// The duplicate-name check happens before any filesystem mutation or
    /// remote call. From directory creation onward, failures return the
    /// partially-built host alongside the error for inspection and retry.
    pub async fn create(
        &self,
        name: &str,
        driver_name: &str,
        options: Option<serde_json::Value>,
        cancel: &CancellationToken,
    ) -> std::result::Result<Host, CreateError> {
        if self.exists(name).map_err(CreateError::bare)? {
            return Err(CreateError::bare(
                StoreError::DuplicateHost(name.to_string()).into(),
            ));
        }

        let host_path = self.host_path(name);
        let driver = self
            .registry
            .create_driver(driver_name, host_path.clone(), options)
            .map_err(CreateError::bare)?;
        let mut host = Host::new(name, driver, host_path.clone());

        std::fs::create_dir_all(&self.root).map_err(|e| CreateError::bare(e.into()))?;
        // Exclusive creation closes the window between the existence check
        // and the directory landing on disk.
        if let Err(e) = std::fs::create_dir(&host_path) {
            let source = if e.kind() == std::io::ErrorKind::AlreadyExists {
                StoreError::DuplicateHost(name.to_string()).into()
            } else {
                e.into()
            };
            return Err(CreateError::bare(source));
        }

        if let Err(e) = host.create(cancel).await {
            return Err(CreateError::partial(host, e));
        }
        if let Err(e) = host.save() {
            return Err(CreateError::partial(host, e));
        }
        Ok(host)
    }

    /// Deprovision a named host. Clears the active pointer first when it
    /// points at this host. Local directory deletion is the caller's
    /// explicit follow-up via [`Host::delete_storage`].
    pub async fn remove(&self, name: &str) -> Result<()> {
        if name == DEFAULT_HOST_NAME {
            return Err(StoreError::CannotRemoveDefault.into());
        }
        let active = self.get_active()?;
        if active.name() == name {
            self.remove_active()?;
        }
        let host = self.load(name)?;
        host.remove().await
    }

    /// Every host in the store. The default host is always present exactly
    /// once; individual load failures are logged and skipped, never aborting
    /// the listing.
    pub fn list(&self) -> Result<Vec<Host>> {
        let mut hosts = vec![self.load(DEFAULT_HOST_NAME)?];

        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(hosts),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            // A single unreadable entry never aborts the listing.
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::error!(error = %e, "error reading store entry, skipping");
                    continue;
                }
            };
            let is_dir = match entry.file_type() {
                Ok(file_type) => file_type.is_dir(),
                Err(e) => {
                    tracing::error!(
                        entry = %entry.file_name().to_string_lossy(),
                        error = %e,
                        "error inspecting store entry, skipping"
                    );
                    continue;
                }
            };
            if !is_dir {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            // A directory literally named "default" would duplicate the
            // synthesized entry.
            if name == DEFAULT_HOST_NAME {
                continue;
            }
            match self.load(&name) {
                Ok(host) => hosts.push(host),
                Err(e) => {
                    tracing::error!(host = %name, error = %e, "error loading host, skipping");
                }
            }
        }
        Ok(hosts)
    }

    /// Whether a named host exists. The default host always does, bypassing
    /// the filesystem.
    pub fn exists(&self, name: &str) -> Result<bool> {
        if name == DEFAULT_HOST_NAME {
            return Ok(true);
        }
        match std::fs::metadata(self.host_path(name)) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn load(&self, name: &str) -> Result<Host> {
        Host::load(name, self.host_path(name), &self.registry)
    }

    /// The host unqualified operations target. With no pointer on disk this
    /// is the default host, never an error.
    pub fn get_active(&self) -> Result<Host> {
        let name = match std::fs::read_to_string(self.active_path()) {
            Ok(name) => name,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return self.load(DEFAULT_HOST_NAME);
            }
            Err(e) => return Err(e.into()),
        };
        self.load(name.trim())
    }

    pub fn set_active(&self, host: &Host) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::write(self.active_path(), host.name())?;
        Ok(())
    }

    pub fn remove_active(&self) -> Result<()> {
        match std::fs::remove_file(self.active_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn is_active(&self, host: &Host) -> Result<bool> {
        Ok(self.get_active()?.name() == host.name())
    }
}
