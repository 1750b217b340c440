//! hostctl — provisioning and lifecycle management for remote container
//! hosts.
//!
//! A [`Store`] persists named hosts on the filesystem and tracks which one is
//! active; each [`Host`] delegates provisioning and lifecycle operations to a
//! provider-specific [`Driver`] selected at runtime through the
//! [`DriverRegistry`]. Remote state is never cached: every state query
//! round-trips to the backing provider.
//!
//! Provisioning is a single synchronous call chain on the caller's task. The
//! two bounded polling loops in the cloud driver honor a
//! [`CancellationToken`](tokio_util::sync::CancellationToken) threaded
//! through `create`.

pub mod config;
pub mod driver;
pub mod drivers;
pub mod error;
pub mod host;
pub mod registry;
pub mod ssh;
pub mod state;
pub mod store;

pub use driver::{Driver, DriverFactory};
pub use error::{ConfigError, Error, RemoteApiError, Result, StateError, StoreError};
pub use host::{Host, DEFAULT_HOST_NAME};
pub use registry::DriverRegistry;
pub use ssh::{ProcessShell, RemoteShell, SshCommand};
pub use state::HostState;
pub use store::{CreateError, Store};
