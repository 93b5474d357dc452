mod storage;
mod utils;
mod vsr;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{debug, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt, Layer};

use storage::store::Store;
use vsr::conn::{ConnectionLayer, TarpcLink};
use vsr::link::PeerLink;
use vsr::replica::Replica;
use vsr::state::ReplicaState;

#[derive(Parser, Debug)]
struct Args {
    #[arg(short, long)]
    conf_path: String,

    /// Position of this node in the peer list, overrides `vsr.node_index`
    #[arg(short, long)]
    index: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = filter::filter_fn(|metadata| metadata.target().starts_with("chirp"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_filter(LevelFilter::DEBUG))
        .init();

    let args = Args::parse();

    let mut config = utils::helpers::parse_config(PathBuf::from(args.conf_path))?;
    if let Some(index) = args.index {
        config.vsr = config.vsr.with_node_index(index)?;
    }
    let vsr_config = config.vsr.clone();

    debug!("initializing replication layer");
    let link = Arc::new(TarpcLink::new(vsr_config.peers.clone()));
    let state = ReplicaState::init_state(
        vsr_config.peers.clone(),
        vsr_config.node_index,
        Box::new(Store::default()),
    );
    let replica = Arc::new(Replica::new(state, link.clone(), vsr_config.rpc_timeout));

    // the only fatal condition once the config is read
    let conn = ConnectionLayer::init_layer(&vsr_config.listener_addr(), Arc::clone(&replica))
        .await
        .map_err(|err| anyhow::anyhow!("could not listen on {}: {err:?}", vsr_config.listener_addr()))?;
    info!(
        node = %config.node_name,
        index = vsr_config.node_index,
        addr = %conn.local_addr,
        "replica started"
    );

    for peer in (0..vsr_config.peers.len()).filter(|&p| p != vsr_config.node_index) {
        match tokio::time::timeout(vsr_config.rpc_timeout, link.who_is_primary(peer)).await {
            Ok(Ok(primary)) => info!(peer, primary, "peer reports primary"),
            _ => debug!(peer, "could not reach peer"),
        }
    }

    debug!("initializing liveness monitor");
    tokio::spawn(vsr::monitor::run(Arc::clone(&replica), vsr_config.heartbeat));

    match signal::ctrl_c().await {
        Ok(()) => {}
        Err(e) => {
            warn!("Unable to listen for shutdown: {:?}", e)
        }
    }

    Ok(())
}
