use std::fmt;

use serde::{Deserialize, Serialize};

use super::state::{ReplicaIndex, Status, View};

/// Errors a replica answers with. Every variant carries the view the
/// replica is in so the caller can go find the right primary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicaError {
    NotPrimary { view: View, primary: ReplicaIndex },
    NotReady { view: View, status: Status },
    NotPrimaryElect { view: View, primary: ReplicaIndex },
    StaleView { view: View },
    QuorumFailed { view: View, acks: usize, needed: usize },
    RecoveryFailed { view: View, reason: String },
    QueryFailed { view: View, reason: String },
}

impl ReplicaError {
    pub fn view(&self) -> View {
        match self {
            ReplicaError::NotPrimary { view, .. }
            | ReplicaError::NotReady { view, .. }
            | ReplicaError::NotPrimaryElect { view, .. }
            | ReplicaError::StaleView { view }
            | ReplicaError::QuorumFailed { view, .. }
            | ReplicaError::RecoveryFailed { view, .. }
            | ReplicaError::QueryFailed { view, .. } => *view,
        }
    }
}

impl fmt::Display for ReplicaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplicaError::NotPrimary { view, primary } => {
                write!(f, "not the primary of view {view}, try replica {primary}")
            }
            ReplicaError::NotReady { view, status } => {
                write!(f, "replica is {status} in view {view}")
            }
            ReplicaError::NotPrimaryElect { view, primary } => {
                write!(f, "replica {primary} is primary-elect of view {view}")
            }
            ReplicaError::StaleView { view } => write!(f, "stale view, replica is in view {view}"),
            ReplicaError::QuorumFailed { view, acks, needed } => {
                write!(f, "got {acks} of {needed} backup acks in view {view}")
            }
            ReplicaError::RecoveryFailed { view, reason } => {
                write!(f, "recovery failed in view {view}: {reason}")
            }
            ReplicaError::QueryFailed { view, reason } => {
                write!(f, "query failed in view {view}: {reason}")
            }
        }
    }
}

impl std::error::Error for ReplicaError {}
