// Recovery: a replica that fell behind pulls the log, commit index,
// view and application snapshot from the primary and installs them
// wholesale.

use tracing::{debug, info, warn};

use super::Replica;
use crate::vsr::error::ReplicaError;
use crate::vsr::rpc::{RecoveryArgs, RecoveryReply};
use crate::vsr::state::{primary, Status, View};

impl Replica {
    /// Serve a recovering peer. Answered unconditionally, the requester
    /// is the one checking whether our copy is worth taking.
    pub fn recovery(&self, args: RecoveryArgs) -> RecoveryReply {
        let state = self.lock();
        debug!(
            replica = args.replica,
            view = args.view,
            op = state.op_number(),
            "serving recovery"
        );
        RecoveryReply {
            view: state.current_view(),
            status: state.status(),
            success: true,
            log: state.log().to_vec(),
            primary_commit: state.commit_index(),
            snapshot: state.snapshot(),
        }
    }

    /// Fetch state from the primary of `view` and install it. On error
    /// the replica stays RECOVERING until the next prepare retries.
    pub(crate) async fn recover(&self, view: View) -> Result<(), ReplicaError> {
        let from = primary(view, self.cluster_size());
        let args = RecoveryArgs {
            view,
            replica: self.index(),
        };

        let reply = match self.timed(self.link.recovery(from, args)).await {
            Ok(reply) => reply,
            Err(err) => return Err(self.recovery_failed(format!("replica {from}: {err}"))),
        };
        check_reply(&reply, view).map_err(|reason| self.recovery_failed(reason))?;

        let mut state = self.lock();
        if reply.view < state.current_view()
            || (reply.view == state.current_view()
                && state.status() == Status::Normal
                && reply.primary_commit < state.commit_index())
        {
            let reason = format!("reply from view {} is behind local state", reply.view);
            warn!(from, %reason, "discarding recovery reply");
            return Err(ReplicaError::RecoveryFailed {
                view: state.current_view(),
                reason,
            });
        }

        let op = reply.log.len() - 1;
        state
            .install_recovery(reply.view, reply.log, reply.primary_commit, &reply.snapshot)
            .map_err(|err| ReplicaError::RecoveryFailed {
                view: reply.view,
                reason: err.to_string(),
            })?;
        state.assert_state();
        info!(from, view = reply.view, op, commit = state.commit_index(), "recovery completed");
        Ok(())
    }

    fn recovery_failed(&self, reason: String) -> ReplicaError {
        let view = self.lock().current_view();
        warn!(view, %reason, "recovery failed");
        ReplicaError::RecoveryFailed { view, reason }
    }
}

/// Only take state from a NORMAL replica that is at least as far along
/// as the view that sent us recovering.
fn check_reply(reply: &RecoveryReply, view: View) -> Result<(), String> {
    if !reply.success {
        return Err("responder refused".to_owned());
    }
    if reply.status != Status::Normal {
        return Err(format!("responder is {}", reply.status));
    }
    if reply.view < view {
        return Err(format!("responder is in view {}, wanted {view}", reply.view));
    }
    if reply.log.is_empty() {
        return Err("responder sent an empty log".to_owned());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(view: View, status: Status) -> RecoveryReply {
        RecoveryReply {
            view,
            status,
            success: true,
            log: vec!["".into(), "a".into()],
            primary_commit: 1,
            snapshot: Vec::new(),
        }
    }

    #[test]
    fn accepts_current_normal_responder() {
        assert!(check_reply(&reply(2, Status::Normal), 2).is_ok());
        assert!(check_reply(&reply(3, Status::Normal), 2).is_ok());
    }

    #[test]
    fn rejects_untrustworthy_responder() {
        assert!(check_reply(&reply(1, Status::Normal), 2).is_err());
        assert!(check_reply(&reply(2, Status::Recovering), 2).is_err());
        assert!(check_reply(&reply(2, Status::ViewChange), 2).is_err());

        let mut empty = reply(2, Status::Normal);
        empty.log.clear();
        assert!(check_reply(&empty, 2).is_err());
    }
}
