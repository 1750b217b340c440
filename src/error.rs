//! Typed errors for host provisioning and lifecycle operations.
//!
//! Each category maps to a distinct failure mode: configuration problems are
//! raised before any remote call, remote API failures carry the originating
//! action and the provider's machine-readable code, and the two bounded retry
//! loops in provisioning surface their exhaustion explicitly instead of
//! pretending success.

use crate::ssh::SshError;

/// Result type for host operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Top-level error for all host store and driver operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing credentials, conflicting options, unparseable settings.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Non-success response from the remote provider API.
    #[error(transparent)]
    RemoteApi(#[from] RemoteApiError),

    /// The readiness poll exhausted its attempt ceiling.
    #[error("instance never became reachable after {attempts} readiness attempts")]
    ProvisioningTimeout { attempts: u32 },

    /// The ingress-authorization retry loop exhausted its ceiling without a
    /// confirmed success. The provider may or may not have applied the rules.
    #[error("ingress rules for security group {group:?} unconfirmed after {attempts} attempts: {source}")]
    IngressUnconfirmed {
        group: String,
        attempts: u32,
        #[source]
        source: RemoteApiError,
    },

    /// A bootstrap shell step failed. The remote resource is left running;
    /// there is no automatic teardown.
    #[error("bootstrap step {step:?} failed: {source}")]
    RemoteCommand {
        step: &'static str,
        #[source]
        source: SshError,
    },

    /// Duplicate names, missing hosts, protected hosts.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Lookup of a driver name that was never registered.
    #[error("unknown driver {0:?}")]
    UnknownDriver(String),

    /// Provider status string outside the canonical mapping.
    #[error(transparent)]
    State(#[from] StateError),

    /// A connection detail that only exists after provisioning was asked for
    /// too early.
    #[error("{what} is not available yet")]
    EndpointUnavailable { what: &'static str },

    /// The driver does not implement this lifecycle operation.
    #[error("driver {driver:?} does not support {operation}")]
    Unsupported {
        driver: &'static str,
        operation: &'static str,
    },

    /// The caller's cancellation signal fired inside a polling loop.
    #[error("operation cancelled")]
    Cancelled,

    /// Malformed persisted host descriptor or options payload.
    #[error("descriptor error: {0}")]
    Descriptor(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Configuration failures, all raised before any remote side effect.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("missing credentials: set the {vars} environment variables or pass explicit keys")]
    MissingCredentials { vars: String },

    #[error("conflicting options: {reason}")]
    ConflictingOptions { reason: String },

    #[error("invalid configuration for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("driver {driver:?} has not been configured")]
    NotConfigured { driver: &'static str },
}

/// A decoded failure from the remote provider API.
///
/// `code` is the provider's machine-readable error code when the response
/// carried a structured error envelope. Provisioning uses it to distinguish
/// absorbable failures ("already exists") from fatal ones.
#[derive(Debug, Clone, thiserror::Error)]
#[error("remote API call {action:?} failed: {message}")]
pub struct RemoteApiError {
    pub action: String,
    pub code: Option<String>,
    pub message: String,
    pub status: Option<u16>,
}

impl RemoteApiError {
    pub fn new(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            code: None,
            message: message.into(),
            status: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// True if the provider returned the given machine-readable code.
    pub fn is_code(&self, code: &str) -> bool {
        self.code.as_deref() == Some(code)
    }
}

/// Failures scoped to the on-disk host store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("host {0:?} already exists")]
    DuplicateHost(String),

    #[error("host {0:?} does not exist")]
    UnknownHost(String),

    #[error("the default host cannot be removed")]
    CannotRemoveDefault,
}

/// A provider status string that is not part of the canonical mapping.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StateError {
    #[error("unrecognized provider status {status:?}")]
    UnrecognizedStatus { status: String },
}
