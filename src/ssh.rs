//! Remote-shell collaborator.
//!
//! The core only depends on the "run and report success/failure" contract of
//! [`RemoteShell`]; the default implementation shells out to the system `ssh`
//! binary via `tokio::process`. Tests substitute a scripted implementation.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;

/// A fully-described remote command: target address, port, username, private
/// key path and the command line to run.
#[derive(Debug, Clone)]
pub struct SshCommand {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub key_path: PathBuf,
    pub command: String,
}

impl SshCommand {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        key_path: impl Into<PathBuf>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            key_path: key_path.into(),
            command: command.into(),
        }
    }

    /// Argument vector for the system `ssh` binary.
    pub fn to_args(&self) -> Vec<String> {
        vec![
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-i".to_string(),
            self.key_path.display().to_string(),
            "-p".to_string(),
            self.port.to_string(),
            format!("{}@{}", self.user, self.host),
            self.command.clone(),
        ]
    }

    /// Build an executable process command for this remote command.
    pub fn into_process_command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new("ssh");
        cmd.args(self.to_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

impl std::fmt::Display for SshCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ssh {}", self.to_args().join(" "))
    }
}

/// Failure of a remote command.
#[derive(Debug, thiserror::Error)]
pub enum SshError {
    #[error("failed to spawn ssh: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("remote command exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
}

/// Executes remote commands and reports success or failure.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    async fn run(&self, command: &SshCommand) -> Result<(), SshError>;
}

/// Default [`RemoteShell`] backed by the system `ssh` binary.
#[derive(Debug, Default)]
pub struct ProcessShell;

#[async_trait]
impl RemoteShell for ProcessShell {
    async fn run(&self, command: &SshCommand) -> Result<(), SshError> {
        tracing::debug!(host = %command.host, command = %command.command, "running remote command");
        let output = command.into_process_command().output().await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(SshError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }
}

/// Build a remote command handle for an ad-hoc invocation.
pub fn ssh_command(
    host: &str,
    port: u16,
    user: &str,
    key_path: &Path,
    args: &[&str],
) -> SshCommand {
    SshCommand::new(host, port, user, key_path, args.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_carry_identity_port_and_target() {
        let cmd = ssh_command(
            "198.51.100.7",
            22,
            "ubuntu",
            Path::new("/tmp/key.pem"),
            &["sudo", "service", "docker", "restart"],
        );
        let args = cmd.to_args();
        assert!(args.contains(&"-i".to_string()));
        assert!(args.contains(&"/tmp/key.pem".to_string()));
        assert!(args.contains(&"ubuntu@198.51.100.7".to_string()));
        assert_eq!(args.last().unwrap(), "sudo service docker restart");
    }
}
