//! Cloud compute driver: the canonical provisioning workflow.
//!
//! `create` turns configuration into a running remote machine in seven steps:
//! name synthesis, security-group ensure (with a bounded ingress retry loop
//! absorbing the provider's eventual consistency), key-pair generation,
//! instance launch, blocking readiness poll, remote bootstrap over SSH, and
//! tagging. Partial failure leaves already-created remote resources in place;
//! there is no rollback.

pub mod api;

#[cfg(test)]
mod tests;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::driver::{Driver, DriverFactory};
use crate::error::{ConfigError, Error, Result};
use crate::ssh::{ssh_command, ProcessShell, RemoteShell, SshCommand};
use crate::state::HostState;

use api::{CredentialSigner, Ec2Api, HttpEc2Api, IngressRule, RunInstancesRequest};

pub const DEFAULT_IMAGE_ID: &str = "ami-27939962";
pub const DEFAULT_INSTANCE_TYPE: &str = "t1.micro";
pub const DEFAULT_SSH_USERNAME: &str = "ubuntu";
pub const DEFAULT_SECURITY_GROUP: &str = "hostctl-hosts";
pub const DEFAULT_REGION: &str = "us-west-1";
pub const DEFAULT_DAEMON_PORT: u16 = 2375;

const ACCESS_KEY_ENV_VAR: &str = "AWS_ACCESS_KEY_ID";
const SECRET_KEY_ENV_VAR: &str = "AWS_SECRET_ACCESS_KEY";
const SECURITY_GROUP_DUPLICATE_CODE: &str = "InvalidGroup.Duplicate";
const INSTANCE_NAME_PREFIX: &str = "host";
const SSH_PORT: u16 = 22;

/// Attempt ceilings and delays for the two bounded loops in provisioning.
/// Tests inject zero delays; the ceilings are the documented defaults.
#[derive(Debug, Clone)]
pub struct ProvisionTiming {
    pub ingress_attempts: u32,
    pub ingress_delay: Duration,
    pub readiness_attempts: u32,
    pub readiness_delay: Duration,
    pub probe_timeout: Duration,
}

impl Default for ProvisionTiming {
    fn default() -> Self {
        Self {
            ingress_attempts: 5,
            ingress_delay: Duration::from_secs(1),
            readiness_attempts: 60,
            readiness_delay: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

/// Creation options for the ec2 driver, supplied already-typed by the CLI
/// collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Ec2Options {
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub image_id: String,
    pub instance_name: Option<String>,
    pub instance_type: String,
    pub region: String,
    pub username: String,
    pub security_group: String,
    /// Block in the readiness poll and run bootstrap after launch.
    pub synchronous_provisioning: bool,
    /// Skip installing the managed runtime during bootstrap.
    pub skip_install: bool,
}

impl Default for Ec2Options {
    fn default() -> Self {
        Self {
            access_key: None,
            secret_key: None,
            image_id: DEFAULT_IMAGE_ID.to_string(),
            instance_name: None,
            instance_type: DEFAULT_INSTANCE_TYPE.to_string(),
            region: DEFAULT_REGION.to_string(),
            username: DEFAULT_SSH_USERNAME.to_string(),
            security_group: DEFAULT_SECURITY_GROUP.to_string(),
            synchronous_provisioning: true,
            skip_install: false,
        }
    }
}

fn default_shell() -> Arc<dyn RemoteShell> {
    Arc::new(ProcessShell)
}

/// Driver for one cloud compute instance.
#[derive(Serialize, Deserialize)]
pub struct Ec2Driver {
    access_key: String,
    secret_key: String,
    endpoint: String,
    image_id: String,
    instance_id: String,
    instance_name: String,
    instance_type: String,
    key_name: String,
    public_dns_name: String,
    ip_address: String,
    security_group: String,
    region: String,
    username: String,
    synchronous_provisioning: bool,
    skip_install: bool,
    daemon_port: u16,

    #[serde(skip)]
    store_path: PathBuf,
    #[serde(skip)]
    timing: ProvisionTiming,
    #[serde(skip)]
    api: Option<Arc<dyn Ec2Api>>,
    #[serde(skip, default = "default_shell")]
    shell: Arc<dyn RemoteShell>,
}

impl Ec2Driver {
    /// Construct a driver with injected collaborators. Used by tests and by
    /// callers that bring their own API transport.
    pub fn with_collaborators(
        store_path: PathBuf,
        api: Arc<dyn Ec2Api>,
        shell: Arc<dyn RemoteShell>,
        timing: ProvisionTiming,
    ) -> Self {
        let mut driver = <Self as DriverFactory>::new(store_path);
        driver.api = Some(api);
        driver.shell = shell;
        driver.timing = timing;
        driver
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    fn api(&self) -> Result<&dyn Ec2Api> {
        self.api
            .as_deref()
            .ok_or_else(|| Error::Config(ConfigError::NotConfigured { driver: Self::NAME }))
    }

    fn env_credentials() -> std::result::Result<(String, String), ConfigError> {
        let missing = || ConfigError::MissingCredentials {
            vars: format!("{ACCESS_KEY_ENV_VAR} and {SECRET_KEY_ENV_VAR}"),
        };
        let access = std::env::var(ACCESS_KEY_ENV_VAR)
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or_else(missing)?;
        let secret = std::env::var(SECRET_KEY_ENV_VAR)
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or_else(missing)?;
        Ok((access, secret))
    }

    fn ssh_key_path(&self) -> PathBuf {
        self.store_path.join(format!("{}.pem", self.key_name))
    }

    fn ensure_instance_name(&mut self) {
        if self.instance_name.is_empty() {
            self.instance_name = format!(
                "{INSTANCE_NAME_PREFIX}-{}",
                uuid::Uuid::new_v4().simple()
            );
        }
    }

    async fn delay(&self, duration: Duration, cancel: &CancellationToken) -> Result<()> {
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Step 2: make sure the named security group exists and, when freshly
    /// created, carries the fixed ingress rules.
    async fn ensure_security_group(&self, cancel: &CancellationToken) -> Result<()> {
        tracing::info!(group = %self.security_group, "ensuring security group");
        match self
            .api()?
            .create_security_group(&self.security_group, "hostctl managed hosts")
            .await
        {
            Ok(()) => self.authorize_ingress_rules(cancel).await,
            Err(e) if e.is_code(SECURITY_GROUP_DUPLICATE_CODE) => {
                tracing::debug!(group = %self.security_group, "reusing existing security group");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Apply the fixed ingress rules through a bounded retry loop that
    /// absorbs the provider's lag between group creation and group-dependent
    /// calls. Exhausting the ceiling is an explicit error, never a silent
    /// success.
    async fn authorize_ingress_rules(&self, cancel: &CancellationToken) -> Result<()> {
        let ports = [SSH_PORT, 80, self.daemon_port];
        for port in ports {
            let rule = IngressRule::tcp(port);
            let mut last_err = None;
            for attempt in 1..=self.timing.ingress_attempts {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                match self.api()?.authorize_ingress(&self.security_group, rule).await {
                    Ok(()) => {
                        last_err = None;
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(
                            group = %self.security_group,
                            port,
                            attempt,
                            error = %e,
                            "ingress authorization failed, retrying"
                        );
                        last_err = Some(e);
                        self.delay(self.timing.ingress_delay, cancel).await?;
                    }
                }
            }
            if let Some(source) = last_err {
                return Err(Error::IngressUnconfirmed {
                    group: self.security_group.clone(),
                    attempts: self.timing.ingress_attempts,
                    source,
                });
            }
        }
        Ok(())
    }

    /// Step 3: generate a key pair named after the instance and persist the
    /// private key material with owner-only permissions.
    async fn create_key_pair(&mut self) -> Result<()> {
        self.key_name = format!("{}-key", self.instance_name);
        tracing::info!(key = %self.key_name, "creating key pair");
        let material = self.api()?.create_key_pair(&self.key_name).await?;

        let path = self.ssh_key_path();
        std::fs::write(&path, material.key_material.as_bytes())?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o400))?;
        }
        Ok(())
    }

    /// Step 4: launch exactly one backing compute resource.
    async fn run_instance(&mut self) -> Result<()> {
        tracing::info!(image = %self.image_id, region = %self.region, "creating compute instance");
        let request = RunInstancesRequest {
            image_id: self.image_id.clone(),
            instance_type: self.instance_type.clone(),
            availability_zone: format!("{}a", self.region),
            security_group: self.security_group.clone(),
            key_name: self.key_name.clone(),
        };
        let response = self.api()?.run_instances(&request).await?;
        let instance = response.instances.into_iter().next().ok_or_else(|| {
            crate::error::RemoteApiError::new("RunInstances", "response contained no instances")
        })?;
        self.instance_id = instance.instance_id;
        if let Some(ip) = instance.public_ip {
            self.ip_address = ip;
        }
        if let Some(dns) = instance.public_dns_name {
            self.public_dns_name = dns;
        }
        Ok(())
    }

    /// Step 5: block until the instance reports running and its
    /// administrative port answers a bounded-timeout connection probe.
    async fn wait_for_ready(&mut self, cancel: &CancellationToken) -> Result<()> {
        tracing::info!(instance = %self.instance_id, "waiting for instance to become reachable");
        for _attempt in 1..=self.timing.readiness_attempts {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let state = self.get_state().await?;
            if state == HostState::Running && !self.ip_address.is_empty() {
                if self.probe_daemon_port().await {
                    tracing::info!(instance = %self.instance_id, ip = %self.ip_address, "instance is reachable");
                    return Ok(());
                }
            }
            self.delay(self.timing.readiness_delay, cancel).await?;
        }
        Err(Error::ProvisioningTimeout {
            attempts: self.timing.readiness_attempts,
        })
    }

    async fn probe_daemon_port(&self) -> bool {
        let addr = format!("{}:{}", self.ip_address, self.daemon_port);
        matches!(
            tokio::time::timeout(
                self.timing.probe_timeout,
                tokio::net::TcpStream::connect(&addr),
            )
            .await,
            Ok(Ok(_))
        )
    }

    /// Step 6: run the fixed bootstrap sequence over the remote shell.
    async fn bootstrap(&self) -> Result<()> {
        tracing::info!(instance = %self.instance_id, "provisioning instance");
        if !self.skip_install {
            self.run_bootstrap_step(
                "install runtime",
                "if ! type docker > /dev/null; then curl -sSL https://get.docker.com | sh -; fi",
            )
            .await?;
        }
        let configure = format!(
            "echo 'DOCKER_OPTS=\"--host 0.0.0.0:{}\"' | sudo tee /etc/default/docker",
            self.daemon_port
        );
        self.run_bootstrap_step("configure daemon", &configure).await?;
        self.run_bootstrap_step("restart daemon", "sudo service docker restart")
            .await?;
        Ok(())
    }

    async fn run_bootstrap_step(&self, step: &'static str, command: &str) -> Result<()> {
        let cmd = self.ssh_command(&[command])?;
        self.shell
            .run(&cmd)
            .await
            .map_err(|source| Error::RemoteCommand { step, source })
    }

    /// Step 7: tag the remote resource with its local name.
    async fn tag_instance(&self) -> Result<()> {
        tracing::info!(instance = %self.instance_id, name = %self.instance_name, "tagging instance");
        self.api()?
            .create_tags(&self.instance_id, "Name", &self.instance_name)
            .await?;
        Ok(())
    }
}

impl DriverFactory for Ec2Driver {
    const NAME: &'static str = "ec2";
    type Options = Ec2Options;

    fn new(store_path: PathBuf) -> Self {
        Self {
            access_key: String::new(),
            secret_key: String::new(),
            endpoint: String::new(),
            image_id: String::new(),
            instance_id: String::new(),
            instance_name: String::new(),
            instance_type: String::new(),
            key_name: String::new(),
            public_dns_name: String::new(),
            ip_address: String::new(),
            security_group: String::new(),
            region: String::new(),
            username: String::new(),
            synchronous_provisioning: true,
            skip_install: false,
            daemon_port: DEFAULT_DAEMON_PORT,
            store_path,
            timing: ProvisionTiming::default(),
            api: None,
            shell: default_shell(),
        }
    }

    fn apply_options(&mut self, options: Ec2Options) -> std::result::Result<(), ConfigError> {
        // A non-default region with the default image (or the reverse) means
        // the image id almost certainly does not exist in that region.
        if (options.region == DEFAULT_REGION) != (options.image_id == DEFAULT_IMAGE_ID) {
            return Err(ConfigError::ConflictingOptions {
                reason: "changing the region requires also setting the image id (and vice versa)"
                    .to_string(),
            });
        }

        let (access_key, secret_key) = match (&options.access_key, &options.secret_key) {
            (Some(a), Some(s)) if !a.is_empty() && !s.is_empty() => (a.clone(), s.clone()),
            _ => Self::env_credentials()?,
        };

        self.access_key = access_key;
        self.secret_key = secret_key;
        self.image_id = options.image_id;
        self.instance_name = options.instance_name.unwrap_or_default();
        self.instance_type = options.instance_type;
        self.region = options.region;
        self.username = options.username;
        self.security_group = options.security_group;
        self.synchronous_provisioning = options.synchronous_provisioning;
        self.skip_install = options.skip_install;
        self.endpoint = format!("https://ec2.{}.amazonaws.com", self.region);

        if self.api.is_none() {
            let signer = Arc::new(CredentialSigner::new(
                self.access_key.clone(),
                self.secret_key.clone(),
            ));
            self.api = Some(Arc::new(HttpEc2Api::new(self.endpoint.clone(), signer)));
        }
        Ok(())
    }

    fn restore(store_path: PathBuf, state: serde_json::Value) -> Result<Self> {
        let mut driver: Ec2Driver = serde_json::from_value(state)?;
        driver.store_path = store_path;
        if !driver.access_key.is_empty() && !driver.endpoint.is_empty() {
            let signer = Arc::new(CredentialSigner::new(
                driver.access_key.clone(),
                driver.secret_key.clone(),
            ));
            driver.api = Some(Arc::new(HttpEc2Api::new(driver.endpoint.clone(), signer)));
        }
        Ok(driver)
    }
}

#[async_trait]
impl Driver for Ec2Driver {
    fn driver_name(&self) -> &'static str {
        Self::NAME
    }

    fn get_url(&self) -> Result<String> {
        if self.public_dns_name.is_empty() {
            return Err(Error::EndpointUnavailable {
                what: "public endpoint",
            });
        }
        Ok(format!(
            "tcp://{}:{}",
            self.public_dns_name, self.daemon_port
        ))
    }

    fn get_ip(&self) -> Result<String> {
        if self.ip_address.is_empty() {
            return Err(Error::EndpointUnavailable { what: "IP address" });
        }
        Ok(self.ip_address.clone())
    }

    async fn get_state(&mut self) -> Result<HostState> {
        if self.instance_id.is_empty() {
            return Err(Error::Config(ConfigError::NotConfigured { driver: Self::NAME }));
        }
        let descriptor = self.api()?.describe_instance(&self.instance_id).await?;
        if let Some(ip) = descriptor.public_ip {
            self.ip_address = ip;
        }
        if let Some(dns) = descriptor.public_dns_name {
            self.public_dns_name = dns;
        }
        match HostState::from_provider_status(&descriptor.state.name) {
            Ok(state) => Ok(state),
            Err(e) => {
                tracing::warn!(instance = %self.instance_id, error = %e, "unrecognized instance status");
                Ok(HostState::Error)
            }
        }
    }

    async fn create(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.ensure_instance_name();
        self.ensure_security_group(cancel).await?;
        self.create_key_pair().await?;
        self.run_instance().await?;
        if self.synchronous_provisioning {
            self.wait_for_ready(cancel).await?;
            self.bootstrap().await?;
        }
        self.tag_instance().await?;
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        self.api()?.start_instances(&self.instance_id).await?;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.api()?.stop_instances(&self.instance_id).await?;
        Ok(())
    }

    async fn restart(&self) -> Result<()> {
        self.api()?.reboot_instances(&self.instance_id).await?;
        Ok(())
    }

    async fn kill(&self) -> Result<()> {
        // The provider has no hard power-off primitive; this degrades to the
        // same action as stop.
        self.api()?.stop_instances(&self.instance_id).await?;
        Ok(())
    }

    async fn remove(&self) -> Result<()> {
        self.api()?.terminate_instances(&self.instance_id).await?;
        if !self.key_name.is_empty() {
            self.api()?.delete_key_pair(&self.key_name).await?;
        }
        Ok(())
    }

    fn ssh_command(&self, args: &[&str]) -> Result<SshCommand> {
        if self.ip_address.is_empty() {
            return Err(Error::EndpointUnavailable { what: "IP address" });
        }
        Ok(ssh_command(
            &self.ip_address,
            SSH_PORT,
            &self.username,
            &self.ssh_key_path(),
            args,
        ))
    }

    fn persistent_state(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}
