// Node configuration, read from a yaml file at boot.
//
// The peer list is static: every node of the cluster must be started
// with the same list in the same order.

use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use yaml_rust2::{Yaml, YamlLoader};

const DEFAULT_RPC_TIMEOUT_MS: u64 = 1000;
const DEFAULT_HEARTBEAT_MS: u64 = 500;

#[derive(Debug, Clone)]
pub struct Config {
    pub node_name: String,
    pub vsr: VsrConfig,
}

#[derive(Debug, Clone)]
pub struct VsrConfig {
    pub node_index: usize,
    pub peers: Vec<SocketAddr>,
    pub rpc_timeout: Duration,
    pub heartbeat: Duration,
}

impl VsrConfig {
    pub fn listener_addr(&self) -> SocketAddr {
        self.peers[self.node_index]
    }

    pub fn with_node_index(mut self, node_index: usize) -> anyhow::Result<VsrConfig> {
        if node_index >= self.peers.len() {
            bail!(
                "node index {node_index} out of range for {} peers",
                self.peers.len()
            );
        }
        self.node_index = node_index;
        Ok(self)
    }
}

pub fn parse_config(path: PathBuf) -> anyhow::Result<Config> {
    let text = fs::read_to_string(&path)
        .with_context(|| format!("reading config {}", path.display()))?;
    parse_config_str(&text)
}

pub fn parse_config_str(text: &str) -> anyhow::Result<Config> {
    let docs = YamlLoader::load_from_str(text)?;
    let doc = docs.first().ok_or_else(|| anyhow!("empty config"))?;

    let node_name = doc["node_name"].as_str().unwrap_or("chirp").to_owned();

    let vsr = &doc["vsr"];
    if vsr.is_badvalue() {
        bail!("missing `vsr` section");
    }

    let peers = vsr["peers"]
        .as_vec()
        .ok_or_else(|| anyhow!("`vsr.peers` must be a list"))?
        .iter()
        .map(|peer| {
            let addr = peer
                .as_str()
                .ok_or_else(|| anyhow!("peer {peer:?} is not a string"))?;
            addr.parse::<SocketAddr>()
                .with_context(|| format!("bad peer address {addr}"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    if peers.is_empty() {
        bail!("`vsr.peers` is empty");
    }

    let node_index = uint_or(&vsr["node_index"], 0, "vsr.node_index")? as usize;
    let rpc_timeout = uint_or(&vsr["rpc_timeout_ms"], DEFAULT_RPC_TIMEOUT_MS, "vsr.rpc_timeout_ms")?;
    let heartbeat = uint_or(&vsr["heartbeat_ms"], DEFAULT_HEARTBEAT_MS, "vsr.heartbeat_ms")?;

    let vsr = VsrConfig {
        node_index: 0,
        peers,
        rpc_timeout: Duration::from_millis(rpc_timeout),
        heartbeat: Duration::from_millis(heartbeat),
    }
    .with_node_index(node_index)?;

    Ok(Config { node_name, vsr })
}

/// Non-negative integer field, `default` when absent.
fn uint_or(value: &Yaml, default: u64, field: &str) -> anyhow::Result<u64> {
    if value.is_badvalue() {
        return Ok(default);
    }
    value
        .as_i64()
        .and_then(|v| u64::try_from(v).ok())
        .ok_or_else(|| anyhow!("`{field}` must be a non-negative integer"))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::parse_config_str;

    const CLUSTER: &str = "
node_name: chirp-test
vsr:
  node_index: 2
  peers:
    - 127.0.0.1:50051
    - 127.0.0.1:50052
    - 127.0.0.1:50053
  rpc_timeout_ms: 250
";

    #[test]
    fn parses_cluster() {
        let config = parse_config_str(CLUSTER).unwrap();
        assert_eq!(config.node_name, "chirp-test");
        assert_eq!(config.vsr.peers.len(), 3);
        assert_eq!(config.vsr.node_index, 2);
        assert_eq!(config.vsr.listener_addr().port(), 50053);
        assert_eq!(config.vsr.rpc_timeout, Duration::from_millis(250));
        assert_eq!(config.vsr.heartbeat, Duration::from_millis(500));
    }

    #[test]
    fn index_override() {
        let vsr = parse_config_str(CLUSTER).unwrap().vsr;
        assert_eq!(vsr.clone().with_node_index(0).unwrap().listener_addr().port(), 50051);
        assert!(vsr.with_node_index(3).is_err());
    }

    #[test]
    fn rejects_bad_configs() {
        assert!(parse_config_str("").is_err());
        assert!(parse_config_str("node_name: x").is_err());
        assert!(parse_config_str("vsr:\n  peers: []\n").is_err());
        assert!(parse_config_str("vsr:\n  peers:\n    - nowhere\n").is_err());
        assert!(parse_config_str("vsr:\n  node_index: 1\n  peers:\n    - 127.0.0.1:1\n").is_err());
        assert!(parse_config_str("vsr:\n  node_index: -1\n  peers:\n    - 127.0.0.1:1\n").is_err());
    }
}
