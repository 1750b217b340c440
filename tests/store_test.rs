//! Store behavior against a real temporary directory.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Once};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use hostctl::{
    ConfigError, Driver, DriverFactory, DriverRegistry, Error, Host, HostState, SshCommand, Store,
    StoreError, DEFAULT_HOST_NAME,
};

static INIT_LOGGING: Once = Once::new();

fn init_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

// Tests run in parallel in one binary, so provisioning records are keyed by
// store path; each test only inspects paths under its own temporary root.
static PROVISION_CALLS: Mutex<Vec<PathBuf>> = Mutex::new(Vec::new());

fn provision_count(under: &Path) -> usize {
    PROVISION_CALLS
        .lock()
        .unwrap()
        .iter()
        .filter(|p| p.starts_with(under))
        .count()
}

/// Minimal driver that records provisioning attempts, to prove the store
/// rejects duplicates before reaching the provider.
#[derive(Debug, Serialize, Deserialize)]
struct CountingDriver {
    url: String,
    #[serde(skip)]
    store_path: PathBuf,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CountingOptions {
    url: Option<String>,
}

#[async_trait]
impl Driver for CountingDriver {
    fn driver_name(&self) -> &'static str {
        "counting"
    }

    fn get_url(&self) -> hostctl::Result<String> {
        Ok(self.url.clone())
    }

    fn get_ip(&self) -> hostctl::Result<String> {
        Ok("203.0.113.1".to_string())
    }

    async fn get_state(&mut self) -> hostctl::Result<HostState> {
        Ok(HostState::Running)
    }

    async fn create(&mut self, _cancel: &CancellationToken) -> hostctl::Result<()> {
        PROVISION_CALLS.lock().unwrap().push(self.store_path.clone());
        Ok(())
    }

    async fn start(&self) -> hostctl::Result<()> {
        Ok(())
    }

    async fn stop(&self) -> hostctl::Result<()> {
        Ok(())
    }

    async fn restart(&self) -> hostctl::Result<()> {
        Ok(())
    }

    async fn kill(&self) -> hostctl::Result<()> {
        Ok(())
    }

    async fn remove(&self) -> hostctl::Result<()> {
        Ok(())
    }

    fn ssh_command(&self, _args: &[&str]) -> hostctl::Result<SshCommand> {
        Err(Error::Unsupported {
            driver: "counting",
            operation: "ssh",
        })
    }

    fn persistent_state(&self) -> hostctl::Result<serde_json::Value> {
        Ok(serde_json::to_value(self).map_err(Error::Descriptor)?)
    }
}

impl DriverFactory for CountingDriver {
    const NAME: &'static str = "counting";
    type Options = CountingOptions;

    fn new(store_path: PathBuf) -> Self {
        Self {
            url: "tcp://203.0.113.1:2375".to_string(),
            store_path,
        }
    }

    fn apply_options(&mut self, options: Self::Options) -> Result<(), ConfigError> {
        if let Some(url) = options.url {
            self.url = url;
        }
        Ok(())
    }

    fn restore(store_path: PathBuf, state: serde_json::Value) -> hostctl::Result<Self> {
        let mut driver: Self = serde_json::from_value(state)?;
        driver.store_path = store_path;
        Ok(driver)
    }
}

fn test_registry() -> Arc<DriverRegistry> {
    init_logging();
    let registry = DriverRegistry::with_builtins();
    registry.register::<CountingDriver>();
    Arc::new(registry)
}

fn names(hosts: &[Host]) -> Vec<&str> {
    hosts.iter().map(|h| h.name()).collect()
}

#[tokio::test]
async fn listing_a_missing_root_yields_only_the_default_host() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = Store::new(dir.path().join("does-not-exist"), test_registry());

    let hosts = store.list()?;
    assert_eq!(names(&hosts), vec![DEFAULT_HOST_NAME]);
    assert!(hosts[0].is_default());

    // Same for a root that exists but holds nothing.
    let empty = Store::new(dir.path(), test_registry());
    assert_eq!(names(&empty.list()?), vec![DEFAULT_HOST_NAME]);
    Ok(())
}

#[tokio::test]
async fn default_host_appears_exactly_once_even_with_a_default_directory() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = Store::new(dir.path(), test_registry());

    // A stray directory named like the default host must not duplicate the
    // synthesized entry.
    std::fs::create_dir_all(dir.path().join(DEFAULT_HOST_NAME))?;
    store
        .create("edge-1", "counting", None, &CancellationToken::new())
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let hosts = store.list()?;
    let mut listed = names(&hosts);
    listed.sort();
    assert_eq!(listed, vec![DEFAULT_HOST_NAME, "edge-1"]);
    Ok(())
}

#[tokio::test]
async fn unreadable_host_is_skipped_without_aborting_the_listing() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = Store::new(dir.path(), test_registry());

    store
        .create("good", "counting", None, &CancellationToken::new())
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let broken = dir.path().join("broken");
    std::fs::create_dir_all(&broken)?;
    std::fs::write(broken.join("config.json"), "{ not json")?;

    let hosts = store.list()?;
    let mut listed = names(&hosts);
    listed.sort();
    assert_eq!(listed, vec![DEFAULT_HOST_NAME, "good"]);
    Ok(())
}

#[tokio::test]
async fn stray_root_entries_never_abort_the_listing() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = Store::new(dir.path(), test_registry());

    store
        .create("good", "counting", None, &CancellationToken::new())
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    // Plain files and dangling symlinks in the root are not hosts and must
    // be skipped, not surfaced as errors.
    std::fs::write(dir.path().join("stray.json"), "{}")?;
    #[cfg(unix)]
    std::os::unix::fs::symlink(dir.path().join("gone"), dir.path().join("dangling"))?;

    let hosts = store.list()?;
    let mut listed = names(&hosts);
    listed.sort();
    assert_eq!(listed, vec![DEFAULT_HOST_NAME, "good"]);
    Ok(())
}

#[tokio::test]
async fn duplicate_create_leaves_disk_and_provider_untouched() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = Store::new(dir.path(), test_registry());

    store
        .create("edge-1", "counting", None, &CancellationToken::new())
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert_eq!(provision_count(dir.path()), 1);
    let config = dir.path().join("edge-1").join("config.json");
    let contents_before = std::fs::read_to_string(&config)?;

    let err = store
        .create("edge-1", "counting", None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err.source,
        Error::Store(StoreError::DuplicateHost(ref name)) if name == "edge-1"
    ));
    assert!(err.host.is_none());

    assert_eq!(provision_count(dir.path()), 1);
    assert_eq!(std::fs::read_to_string(&config)?, contents_before);
    Ok(())
}

#[tokio::test]
async fn creating_with_an_unknown_driver_is_a_typed_error() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = Store::new(dir.path(), test_registry());

    let err = store
        .create("edge-1", "vsphere", None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err.source, Error::UnknownDriver(ref name) if name == "vsphere"));
    assert!(!dir.path().join("edge-1").exists());
    Ok(())
}

#[tokio::test]
async fn active_pointer_round_trips_across_store_instances() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let registry = test_registry();
    let store = Store::new(dir.path(), registry.clone());

    let host = store
        .create("edge-1", "counting", None, &CancellationToken::new())
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    store.set_active(&host)?;
    assert!(store.is_active(&host)?);

    let fresh = Store::new(dir.path(), registry);
    assert_eq!(fresh.get_active()?.name(), "edge-1");
    Ok(())
}

#[tokio::test]
async fn active_defaults_to_the_default_host_without_a_pointer() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = Store::new(dir.path(), test_registry());

    let active = store.get_active()?;
    assert!(active.is_default());

    // Clearing an already-absent pointer is not an error.
    store.remove_active()?;
    Ok(())
}

#[tokio::test]
async fn removing_the_active_host_clears_the_pointer() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = Store::new(dir.path(), test_registry());

    let host = store
        .create("edge-1", "counting", None, &CancellationToken::new())
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    store.set_active(&host)?;

    store.remove("edge-1").await?;
    assert!(store.get_active()?.is_default());

    // Deprovisioning leaves local storage in place until explicitly deleted.
    assert!(dir.path().join("edge-1").exists());
    host.delete_storage()?;
    assert!(!dir.path().join("edge-1").exists());
    Ok(())
}

#[tokio::test]
async fn the_default_host_cannot_be_removed() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = Store::new(dir.path(), test_registry());

    let err = store.remove(DEFAULT_HOST_NAME).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Store(StoreError::CannotRemoveDefault)
    ));
    Ok(())
}

#[tokio::test]
async fn exists_reports_the_default_host_without_a_directory() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = Store::new(dir.path(), test_registry());

    assert!(store.exists(DEFAULT_HOST_NAME)?);
    assert!(!store.exists("edge-1")?);

    store
        .create("edge-1", "counting", None, &CancellationToken::new())
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert!(store.exists("edge-1")?);
    Ok(())
}
