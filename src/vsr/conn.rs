//
// TCP layer for the replication core, tarpc over json frames.
//
// Inbound: ConnectionLayer serves the Vsr service for one replica.
// Outbound: TarpcLink implements PeerLink, keeping one client per
// peer around until a call on it fails.
//
use std::future::{self, Future};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::StreamExt;
use tarpc::client::{self, RpcError};
use tarpc::context;
use tarpc::server::{self, Channel};
use tarpc::tokio_serde::formats::Json;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::link::{PeerError, PeerLink, PeerResult};
use super::replica::Replica;
use super::rpc::{
    CommitArgs, HeartBeatReply, PrepareArgs, PrepareReply, RecoveryArgs, RecoveryReply,
    StartViewArgs, Vsr, VsrClient, VsrServer, ViewChangeArgs, ViewChangeReply,
};
use super::state::ReplicaIndex;

const MAX_CHANNELS: usize = 64;

type ConnErrResult<T> = Result<T, ConnErrors>;

#[derive(Debug)]
pub enum ConnErrors {
    TCPTokioError(io::Error),
    RpcError(RpcError),
    UnknownPeer(ReplicaIndex),
}

impl From<io::Error> for ConnErrors {
    fn from(value: io::Error) -> Self {
        ConnErrors::TCPTokioError(value)
    }
}

impl From<RpcError> for ConnErrors {
    fn from(value: RpcError) -> Self {
        ConnErrors::RpcError(value)
    }
}

impl From<ConnErrors> for PeerError {
    fn from(value: ConnErrors) -> Self {
        match value {
            ConnErrors::TCPTokioError(err) => PeerError::Unreachable(err.to_string()),
            ConnErrors::RpcError(err) => PeerError::Unreachable(err.to_string()),
            ConnErrors::UnknownPeer(peer) => PeerError::Unreachable(format!("no peer {peer}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionLayer {
    pub local_addr: SocketAddr,
}

impl ConnectionLayer {
    /// Bind `addr` and serve `replica` on it in the background.
    pub async fn init_layer(
        addr: &SocketAddr,
        replica: Arc<Replica>,
    ) -> ConnErrResult<ConnectionLayer> {
        let mut listener = tarpc::serde_transport::tcp::listen(addr, Json::default).await?;
        listener.config_mut().max_frame_length(usize::MAX);
        let local_addr = listener.local_addr();
        info!(%local_addr, "listening for peers");

        tokio::spawn(async move {
            listener
                .filter_map(|r| future::ready(r.ok()))
                .map(server::BaseChannel::with_defaults)
                .map(|channel| {
                    let server = VsrServer {
                        replica: Arc::clone(&replica),
                    };
                    channel.execute(server.serve())
                })
                .buffer_unordered(MAX_CHANNELS)
                .for_each(|_| async {})
                .await;
        });

        Ok(ConnectionLayer { local_addr })
    }
}

pub struct TarpcLink {
    peers: Vec<SocketAddr>,
    clients: Vec<Mutex<Option<VsrClient>>>,
}

impl TarpcLink {
    pub fn new(peers: Vec<SocketAddr>) -> TarpcLink {
        let clients = peers.iter().map(|_| Mutex::new(None)).collect();
        TarpcLink { peers, clients }
    }

    async fn client(&self, peer: ReplicaIndex) -> ConnErrResult<VsrClient> {
        let (addr, slot) = match (self.peers.get(peer), self.clients.get(peer)) {
            (Some(addr), Some(slot)) => (*addr, slot),
            _ => return Err(ConnErrors::UnknownPeer(peer)),
        };

        let mut slot = slot.lock().await;
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }

        let mut transport = tarpc::serde_transport::tcp::connect(addr, Json::default);
        transport.config_mut().max_frame_length(usize::MAX);
        let client = VsrClient::new(client::Config::default(), transport.await?).spawn();
        debug!(peer, %addr, "connected");
        *slot = Some(client.clone());
        Ok(client)
    }

    async fn call<T, F, Fut>(&self, peer: ReplicaIndex, rpc: F) -> Result<T, PeerError>
    where
        F: FnOnce(VsrClient) -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let client = self.client(peer).await?;
        match rpc(client).await {
            Ok(reply) => Ok(reply),
            Err(err) => {
                // reconnect on the next call
                if let Some(slot) = self.clients.get(peer) {
                    *slot.lock().await = None;
                }
                Err(ConnErrors::from(err).into())
            }
        }
    }
}

impl PeerLink for TarpcLink {
    fn prepare(&self, peer: ReplicaIndex, args: PrepareArgs) -> PeerResult<'_, PrepareReply> {
        Box::pin(async move {
            self.call(peer, |c| async move { c.prepare(context::current(), args).await })
                .await?
                .map_err(PeerError::Rejected)
        })
    }

    fn commit(&self, peer: ReplicaIndex, args: CommitArgs) -> PeerResult<'_, ()> {
        Box::pin(async move {
            self.call(peer, |c| async move { c.commit(context::current(), args).await })
                .await
        })
    }

    fn recovery(&self, peer: ReplicaIndex, args: RecoveryArgs) -> PeerResult<'_, RecoveryReply> {
        Box::pin(async move {
            self.call(peer, |c| async move { c.recovery(context::current(), args).await })
                .await
        })
    }

    fn view_change(
        &self,
        peer: ReplicaIndex,
        args: ViewChangeArgs,
    ) -> PeerResult<'_, ViewChangeReply> {
        Box::pin(async move {
            self.call(peer, |c| async move { c.view_change(context::current(), args).await })
                .await?
                .map_err(PeerError::Rejected)
        })
    }

    fn start_view(&self, peer: ReplicaIndex, args: StartViewArgs) -> PeerResult<'_, ()> {
        Box::pin(async move {
            self.call(peer, |c| async move { c.start_view(context::current(), args).await })
                .await?
                .map_err(PeerError::Rejected)
        })
    }

    fn who_is_primary(&self, peer: ReplicaIndex) -> PeerResult<'_, ReplicaIndex> {
        Box::pin(async move {
            self.call(peer, |c| async move { c.who_is_primary(context::current()).await })
                .await
        })
    }

    fn heart_beat(&self, peer: ReplicaIndex) -> PeerResult<'_, HeartBeatReply> {
        Box::pin(async move {
            self.call(peer, |c| async move { c.heart_beat(context::current()).await })
                .await
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::vsr::error::ReplicaError;
    use crate::vsr::state::tests::{local_peers, RecordingMachine};
    use crate::vsr::state::ReplicaState;

    #[tokio::test]
    async fn prepare_over_tcp() {
        let state = ReplicaState::init_state(
            local_peers(2),
            1,
            Box::new(RecordingMachine::default()),
        );
        let backup = Arc::new(Replica::new(
            state,
            Arc::new(TarpcLink::new(local_peers(2))),
            Duration::from_millis(500),
        ));
        let any_port = SocketAddr::from(([127, 0, 0, 1], 0));
        let layer = ConnectionLayer::init_layer(&any_port, Arc::clone(&backup))
            .await
            .unwrap();

        let link = TarpcLink::new(vec![any_port, layer.local_addr]);
        let beat = link.heart_beat(1).await.unwrap();
        assert_eq!(
            beat,
            HeartBeatReply {
                alive: true,
                current_view: 0
            }
        );

        let args = PrepareArgs {
            view: 0,
            primary_commit: 0,
            index: 1,
            entry: "a".to_owned(),
        };
        let reply = link.prepare(1, args).await.unwrap();
        assert_eq!(reply, PrepareReply { view: 0, success: true });
        assert_eq!(backup.with_state(|s| s.log().to_vec()), vec!["", "a"]);

        // the replica's own refusal comes back typed
        let err = link
            .view_change(1, ViewChangeArgs { view: 0 })
            .await
            .unwrap_err();
        assert_eq!(err, PeerError::Rejected(ReplicaError::StaleView { view: 0 }));

        assert!(matches!(
            link.heart_beat(7).await,
            Err(PeerError::Unreachable(_))
        ));
    }
}
