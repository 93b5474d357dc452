// Normal operation: the primary appends and prepares, backups append
// in order, and a majority of copies commits an entry.

use futures::StreamExt;
use tracing::{debug, info, warn};

use super::Replica;
use crate::vsr::error::ReplicaError;
use crate::vsr::rpc::{CommitArgs, PrepareArgs, PrepareReply};
use crate::vsr::state::{backup_quorum, Entry, OpNumber, Status, View};

/// A command that reached a majority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Committed {
    pub index: OpNumber,
    pub view: View,
}

impl Replica {
    /// Replicate `command` from the primary. The entry is appended locally
    /// before any backup sees it and stays in the log even when quorum
    /// fails; only an `Ok` means it is durable.
    pub async fn start(&self, command: Entry) -> Result<Committed, ReplicaError> {
        let args = {
            let mut state = self.lock();
            let view = state.current_view();
            if state.status() != Status::Normal {
                debug!(view, status = %state.status(), "refusing start, not NORMAL");
                return Err(ReplicaError::NotReady {
                    view,
                    status: state.status(),
                });
            }
            if !state.is_primary() {
                debug!(view, primary = state.primary(), "refusing start, not primary");
                return Err(ReplicaError::NotPrimary {
                    view,
                    primary: state.primary(),
                });
            }

            let primary_commit = state.commit_index();
            let index = state.append(command.clone());
            PrepareArgs {
                view,
                primary_commit,
                index,
                entry: command,
            }
        };

        let needed = backup_quorum(self.cluster_size());
        let mut acks = 0;
        let mut pending = self.fan_out(
            self.others()
                .map(|peer| (peer, self.link.prepare(peer, args.clone()))),
        );
        while let Some((peer, reply)) = pending.next().await {
            match reply {
                Ok(PrepareReply { success: true, .. }) => acks += 1,
                Ok(reply) => debug!(peer, view = reply.view, op = args.index, "prepare not accepted"),
                Err(err) => debug!(peer, %err, op = args.index, "prepare failed"),
            }
        }

        if acks < needed {
            warn!(
                view = args.view,
                op = args.index,
                acks,
                needed,
                "replication failed, majority of backups unresponsive"
            );
            return Err(ReplicaError::QuorumFailed {
                view: args.view,
                acks,
                needed,
            });
        }

        let commit = {
            let mut state = self.lock();
            if state.current_view() == args.view && state.status() == Status::Normal {
                state.advance_commit(args.index);
            }
            state.commit_index()
        };
        info!(view = args.view, op = args.index, commit, "committed");

        self.broadcast_commit(args.view, commit).await;
        Ok(Committed {
            index: args.index,
            view: args.view,
        })
    }

    /// Backup side of `start`.
    pub async fn prepare(&self, args: PrepareArgs) -> Result<PrepareReply, ReplicaError> {
        {
            let mut state = self.lock();
            let view = state.current_view();
            if args.view < view {
                debug!(view, stale = args.view, "prepare from stale primary");
                return Ok(PrepareReply {
                    view,
                    success: false,
                });
            }
            if args.index <= state.commit_index() {
                return Ok(PrepareReply {
                    view,
                    success: false,
                });
            }

            let in_view = args.view == view && state.status() == Status::Normal;
            if in_view {
                state.advance_commit(args.primary_commit);
            }

            if in_view && args.index == state.op_number() + 1 {
                state.append(args.entry);
                state.advance_commit(args.primary_commit);
                state.assert_state();
                return Ok(PrepareReply {
                    view,
                    success: true,
                });
            }

            warn!(
                view,
                op = state.op_number(),
                prepare_view = args.view,
                prepare_op = args.index,
                "replica is behind, recovering"
            );
            state.status = Status::Recovering;
        }

        self.recover(args.view).await?;
        let view = self.lock().current_view();
        Ok(PrepareReply {
            view,
            success: true,
        })
    }

    /// Commit hint from the primary of our view.
    pub fn commit(&self, args: CommitArgs) {
        let mut state = self.lock();
        if args.view == state.current_view()
            && state.status() == Status::Normal
            && !state.is_primary()
        {
            state.advance_commit(args.commit_index);
        }
    }

    /// Tell every backup how far we have committed. Also serves as the
    /// primary's heartbeat.
    pub(crate) async fn broadcast_commit(&self, view: View, commit_index: OpNumber) {
        let args = CommitArgs { view, commit_index };
        let mut pending =
            self.fan_out(self.others().map(|peer| (peer, self.link.commit(peer, args.clone()))));
        while let Some((peer, sent)) = pending.next().await {
            if let Err(err) = sent {
                debug!(peer, %err, "commit hint not delivered");
            }
        }
    }
}
