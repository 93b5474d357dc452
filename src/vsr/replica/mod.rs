// A single VSR replica.
//
// One mutex guards the whole ReplicaState (state machine included).
// It is only ever held for the mutation itself, never across a peer
// call: every await on the network happens with the lock released.

mod normal;
mod recovery;
mod view_change;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;

pub use normal::Committed;

use super::error::ReplicaError;
use super::link::{PeerError, PeerLink, PeerResult};
use super::rpc::HeartBeatReply;
use super::state::{primary, ReplicaIndex, ReplicaState, Status};

pub struct Replica {
    index: ReplicaIndex,
    cluster_size: usize,
    state: Mutex<ReplicaState>,
    link: Arc<dyn PeerLink>,
    rpc_timeout: Duration,
}

impl Replica {
    pub fn new(state: ReplicaState, link: Arc<dyn PeerLink>, rpc_timeout: Duration) -> Replica {
        state.assert_state();
        Replica {
            index: state.self_index(),
            cluster_size: state.cluster_size(),
            state: Mutex::new(state),
            link,
            rpc_timeout,
        }
    }

    pub fn index(&self) -> ReplicaIndex {
        self.index
    }

    pub fn cluster_size(&self) -> usize {
        self.cluster_size
    }

    fn lock(&self) -> MutexGuard<'_, ReplicaState> {
        // nothing in the state is left half-written by a panic
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read-only look at the state under the lock.
    pub fn with_state<R>(&self, f: impl FnOnce(&ReplicaState) -> R) -> R {
        let state = self.lock();
        f(&state)
    }

    pub fn who_is_primary(&self) -> ReplicaIndex {
        let state = self.lock();
        primary(state.current_view(), self.cluster_size)
    }

    /// Answer a read from the applied state. Only the NORMAL primary
    /// answers, so a read sees every command it acknowledged.
    pub fn query(&self, query: &str) -> Result<String, ReplicaError> {
        let state = self.lock();
        let view = state.current_view();
        if state.status() != Status::Normal {
            return Err(ReplicaError::NotReady {
                view,
                status: state.status(),
            });
        }
        if !state.is_primary() {
            return Err(ReplicaError::NotPrimary {
                view,
                primary: state.primary(),
            });
        }
        state.query(query).map_err(|err| ReplicaError::QueryFailed {
            view,
            reason: err.to_string(),
        })
    }

    pub fn heart_beat(&self) -> HeartBeatReply {
        let state = self.lock();
        HeartBeatReply {
            alive: true,
            current_view: state.current_view(),
        }
    }

    /// Every replica index except our own.
    fn others(&self) -> impl Iterator<Item = ReplicaIndex> + 'static {
        let me = self.index;
        (0..self.cluster_size).filter(move |&i| i != me)
    }

    /// Bound a single peer call by the rpc timeout.
    async fn timed<T>(&self, call: PeerResult<'_, T>) -> Result<T, PeerError> {
        match tokio::time::timeout(self.rpc_timeout, call).await {
            Ok(reply) => reply,
            Err(_) => Err(PeerError::Timeout),
        }
    }

    /// Run `requests` concurrently, each bounded by the rpc timeout. The
    /// caller owns the returned set and is the only one counting replies.
    fn fan_out<'a, T: Send + 'a>(
        &'a self,
        requests: impl Iterator<Item = (ReplicaIndex, PeerResult<'a, T>)>,
    ) -> FuturesUnordered<BoxFuture<'a, (ReplicaIndex, Result<T, PeerError>)>> {
        requests
            .map(|(peer, request)| -> BoxFuture<'a, _> {
                Box::pin(async move { (peer, self.timed(request).await) })
            })
            .collect()
    }

    pub(crate) async fn ping(&self, peer: ReplicaIndex) -> bool {
        matches!(
            self.timed(self.link.heart_beat(peer)).await,
            Ok(HeartBeatReply { alive: true, .. })
        )
    }
}
