// Outbound side of the protocol: how a replica reaches its peers.
//
// Implementations only move bytes; the replica wraps every call in
// its own timeout, so an unresponsive peer just never votes.

use std::fmt;

use futures::future::BoxFuture;

use super::error::ReplicaError;
use super::rpc::{
    CommitArgs, HeartBeatReply, PrepareArgs, PrepareReply, RecoveryArgs, RecoveryReply,
    StartViewArgs, ViewChangeArgs, ViewChangeReply,
};
use super::state::ReplicaIndex;

pub type PeerResult<'a, T> = BoxFuture<'a, Result<T, PeerError>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerError {
    Unreachable(String),
    Timeout,
    Rejected(ReplicaError),
}

impl fmt::Display for PeerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerError::Unreachable(reason) => write!(f, "peer unreachable: {reason}"),
            PeerError::Timeout => write!(f, "peer timed out"),
            PeerError::Rejected(err) => write!(f, "peer rejected request: {err}"),
        }
    }
}

impl std::error::Error for PeerError {}

impl From<ReplicaError> for PeerError {
    fn from(value: ReplicaError) -> Self {
        PeerError::Rejected(value)
    }
}

pub trait PeerLink: Send + Sync {
    fn prepare(&self, peer: ReplicaIndex, args: PrepareArgs) -> PeerResult<'_, PrepareReply>;

    fn commit(&self, peer: ReplicaIndex, args: CommitArgs) -> PeerResult<'_, ()>;

    fn recovery(&self, peer: ReplicaIndex, args: RecoveryArgs) -> PeerResult<'_, RecoveryReply>;

    fn view_change(
        &self,
        peer: ReplicaIndex,
        args: ViewChangeArgs,
    ) -> PeerResult<'_, ViewChangeReply>;

    fn start_view(&self, peer: ReplicaIndex, args: StartViewArgs) -> PeerResult<'_, ()>;

    fn who_is_primary(&self, peer: ReplicaIndex) -> PeerResult<'_, ReplicaIndex>;

    fn heart_beat(&self, peer: ReplicaIndex) -> PeerResult<'_, HeartBeatReply>;
}
