//! The provider-polymorphic driver contract.
//!
//! Every backing environment — local socket, generic network endpoint, cloud
//! compute — implements [`Driver`]. Instances are held behind a trait object
//! selected at runtime by the registry; the store never knows which variant
//! it is talking to.
//!
//! Side effects are confined to `create`, `start`, `stop`, `restart`, `kill`
//! and `remove`. The read-only operations may still perform a remote call:
//! state is never cached locally, every query round-trips to the provider.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::{ConfigError, Error, Result};
use crate::ssh::SshCommand;
use crate::state::HostState;

/// Capability set every provider implements.
///
/// Once `create` has succeeded the driver owns at most one backing remote
/// resource for its entire lifetime; re-invoking `create` is neither
/// idempotent nor guaranteed safe.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Registered name of this driver.
    fn driver_name(&self) -> &'static str;

    /// Daemon endpoint URL for the managed runtime on this host.
    fn get_url(&self) -> Result<String>;

    /// Public address of the remote machine.
    fn get_ip(&self) -> Result<String>;

    /// Query the remote provider and project its status into the canonical
    /// state set. Never cached.
    async fn get_state(&mut self) -> Result<HostState>;

    /// Provision the backing remote resource. The cancellation token is
    /// honored inside every polling loop.
    async fn create(&mut self, cancel: &CancellationToken) -> Result<()>;

    async fn start(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;
    async fn restart(&self) -> Result<()>;

    /// Hard-stop the remote machine. Providers without a true hard-stop
    /// primitive degrade to the same action as `stop`.
    async fn kill(&self) -> Result<()>;

    /// Deprovision the backing remote resource.
    async fn remove(&self) -> Result<()>;

    /// Build a remote command handle against this host.
    fn ssh_command(&self, args: &[&str]) -> Result<SshCommand>;

    /// The driver's full field set, for the on-disk host descriptor.
    fn persistent_state(&self) -> Result<serde_json::Value>;
}

impl std::fmt::Debug for dyn Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("name", &self.driver_name())
            .finish_non_exhaustive()
    }
}

/// Construction contract tying a driver to its concrete options type.
///
/// Each provider declares its own serde-typed options struct instead of
/// accepting an opaque bag requiring a runtime downcast. The registry erases
/// this per driver at registration time; decoding stays monomorphized.
pub trait DriverFactory: Driver + Sized + 'static {
    /// Name under which the driver registers.
    const NAME: &'static str;

    /// Provider-specific creation options, supplied already-typed by the
    /// CLI collaborator.
    type Options: Serialize + DeserializeOwned + Send;

    /// Construct an unconfigured driver rooted at the host's storage
    /// directory. Must not provision anything.
    fn new(store_path: PathBuf) -> Self;

    /// Validate and apply creation options. Mutually-exclusive combinations
    /// fail here, before any remote call.
    fn apply_options(&mut self, options: Self::Options) -> std::result::Result<(), ConfigError>;

    /// Rebuild a driver from its persisted field set.
    fn restore(store_path: PathBuf, state: serde_json::Value) -> Result<Self>;
}

/// Convenience for drivers that do not implement a lifecycle operation.
pub(crate) fn unsupported(driver: &'static str, operation: &'static str) -> Error {
    Error::Unsupported { driver, operation }
}
