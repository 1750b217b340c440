//! Canonical host lifecycle states.
//!
//! These states are a read-through projection of remote status: nothing is
//! cached, every query round-trips to the provider and is mapped through the
//! fixed table in [`HostState::from_provider_status`]. There is no local
//! transition table; ordering constraints come from the provider itself.

use serde::{Deserialize, Serialize};

use crate::error::StateError;

/// Lifecycle state of a host as reported by its backing provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HostState {
    /// The host has no meaningful remote state (e.g. a local socket).
    None,
    Starting,
    Running,
    Paused,
    Saved,
    Stopped,
    /// The provider reported a status outside the canonical mapping, or the
    /// query itself failed.
    Error,
}

impl HostState {
    /// Map a provider status string into the canonical state set.
    ///
    /// Unrecognized statuses return an error so the caller keeps the
    /// diagnostic; drivers degrade them to [`HostState::Error`] after logging.
    pub fn from_provider_status(status: &str) -> Result<Self, StateError> {
        match status.trim() {
            "pending" => Ok(HostState::Starting),
            "running" => Ok(HostState::Running),
            "stopped" | "stopping" => Ok(HostState::Stopped),
            other => Err(StateError::UnrecognizedStatus {
                status: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for HostState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HostState::None => "",
            HostState::Starting => "Starting",
            HostState::Running => "Running",
            HostState::Paused => "Paused",
            HostState::Saved => "Saved",
            HostState::Stopped => "Stopped",
            HostState::Error => "Error",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognized_statuses_map_to_documented_states() {
        assert_eq!(
            HostState::from_provider_status("pending").unwrap(),
            HostState::Starting
        );
        assert_eq!(
            HostState::from_provider_status("running").unwrap(),
            HostState::Running
        );
        assert_eq!(
            HostState::from_provider_status("stopped").unwrap(),
            HostState::Stopped
        );
        assert_eq!(
            HostState::from_provider_status("stopping").unwrap(),
            HostState::Stopped
        );
        // Surrounding whitespace from the wire is tolerated.
        assert_eq!(
            HostState::from_provider_status(" running ").unwrap(),
            HostState::Running
        );
    }

    #[test]
    fn unrecognized_status_yields_diagnostic() {
        let err = HostState::from_provider_status("shutting-down").unwrap_err();
        let StateError::UnrecognizedStatus { status } = err;
        assert_eq!(status, "shutting-down");
    }

    #[test]
    fn display_matches_state_names() {
        assert_eq!(HostState::Running.to_string(), "Running");
        assert_eq!(HostState::None.to_string(), "");
    }
}
