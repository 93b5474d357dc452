// Viewstamped replication of an ordered command log.
//
// Reference:
//   Viewstamped Replication Revisited
//   https://pmg.csail.mit.edu/papers/vr-revisited.pdf

pub mod conn;
pub mod error;
pub mod link;
pub mod monitor;
pub mod replica;
pub mod rpc;
pub mod sm;
pub mod state;
pub mod util;
