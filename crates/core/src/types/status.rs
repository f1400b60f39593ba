//! Status enums for the edge lifecycle and network state.

use serde::{Deserialize, Serialize};

/// Lifecycle state of an edge worker version.
///
/// Follows the two-phase install/activate lifecycle:
///
/// ```text
/// installing -> installed -> activating -> activated
///      \____________\____________\
///                                 -> redundant
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Precache contents are being fetched.
    #[default]
    Installing,
    /// Precache complete, waiting for activation.
    Installed,
    /// Old-version caches are being evicted.
    Activating,
    /// Serving and controlling clients.
    Activated,
    /// Install or activation failed; this version will never control clients.
    Redundant,
}

impl WorkerState {
    /// Whether moving from `self` to `next` is a legal lifecycle step.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Installing, Self::Installed | Self::Redundant)
                | (Self::Installed, Self::Activating | Self::Redundant)
                | (Self::Activating, Self::Activated | Self::Redundant)
                // A retried install after a failure starts over.
                | (Self::Redundant, Self::Installing)
        )
    }

    /// Whether this version may answer requests on behalf of clients.
    #[must_use]
    pub const fn is_controlling(self) -> bool {
        matches!(self, Self::Activated)
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Installing => write!(f, "installing"),
            Self::Installed => write!(f, "installed"),
            Self::Activating => write!(f, "activating"),
            Self::Activated => write!(f, "activated"),
            Self::Redundant => write!(f, "redundant"),
        }
    }
}

impl std::str::FromStr for WorkerState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "installing" => Ok(Self::Installing),
            "installed" => Ok(Self::Installed),
            "activating" => Ok(Self::Activating),
            "activated" => Ok(Self::Activated),
            "redundant" => Ok(Self::Redundant),
            _ => Err(format!("invalid worker state: {s}")),
        }
    }
}

/// Network reachability of the upstream backend as seen by the edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    Online,
    Offline,
}

impl Connectivity {
    #[must_use]
    pub const fn from_online(online: bool) -> Self {
        if online { Self::Online } else { Self::Offline }
    }

    #[must_use]
    pub const fn is_online(self) -> bool {
        matches!(self, Self::Online)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        assert!(WorkerState::Installing.can_transition_to(WorkerState::Installed));
        assert!(WorkerState::Installed.can_transition_to(WorkerState::Activating));
        assert!(WorkerState::Activating.can_transition_to(WorkerState::Activated));
    }

    #[test]
    fn test_no_skipping() {
        assert!(!WorkerState::Installing.can_transition_to(WorkerState::Activated));
        assert!(!WorkerState::Installing.can_transition_to(WorkerState::Activating));
        assert!(!WorkerState::Activated.can_transition_to(WorkerState::Installing));
    }

    #[test]
    fn test_failures_go_redundant() {
        assert!(WorkerState::Installing.can_transition_to(WorkerState::Redundant));
        assert!(WorkerState::Activating.can_transition_to(WorkerState::Redundant));
        assert!(!WorkerState::Activated.can_transition_to(WorkerState::Redundant));
    }

    #[test]
    fn test_display_roundtrip() {
        for state in [
            WorkerState::Installing,
            WorkerState::Installed,
            WorkerState::Activating,
            WorkerState::Activated,
            WorkerState::Redundant,
        ] {
            assert_eq!(state.to_string().parse::<WorkerState>(), Ok(state));
        }
        assert!("bogus".parse::<WorkerState>().is_err());
    }

    #[test]
    fn test_only_activated_controls() {
        assert!(WorkerState::Activated.is_controlling());
        assert!(!WorkerState::Installed.is_controlling());
    }
}
