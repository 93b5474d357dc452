// View change: the primary-elect of a new view collects logs from a
// majority, picks the most complete one and starts the view with it.

use futures::StreamExt;
use tracing::{debug, info, warn};

use super::Replica;
use crate::vsr::error::ReplicaError;
use crate::vsr::rpc::{StartViewArgs, ViewChangeArgs, ViewChangeReply};
use crate::vsr::state::{majority, primary, Entry, Status, View};

/// Pick the log a new view starts from: the replica that was NORMAL most
/// recently wins, the longest log breaks ties. `None` without a majority.
pub fn select_new_view_log(replies: &[ViewChangeReply], cluster_size: usize) -> Option<Vec<Entry>> {
    if replies.len() < majority(cluster_size) {
        return None;
    }
    replies
        .iter()
        .max_by(|a, b| {
            a.last_normal_view
                .cmp(&b.last_normal_view)
                .then(a.log.len().cmp(&b.log.len()))
        })
        .map(|best| best.log.clone())
}

impl Replica {
    pub fn view_change(&self, args: ViewChangeArgs) -> Result<ViewChangeReply, ReplicaError> {
        let mut state = self.lock();
        let view = state.current_view();
        if args.view <= view {
            debug!(view, requested = args.view, "rejecting stale view change");
            return Err(ReplicaError::StaleView { view });
        }

        info!(
            view = args.view,
            primary = primary(args.view, self.cluster_size()),
            "starting view change"
        );
        let (last_normal_view, log) = state.enter_view_change(args.view);
        state.assert_state();
        Ok(ViewChangeReply {
            last_normal_view,
            log,
        })
    }

    pub fn start_view(&self, args: StartViewArgs) -> Result<(), ReplicaError> {
        let mut state = self.lock();
        let view = state.current_view();
        if args.view < view {
            debug!(view, requested = args.view, "rejecting stale start view");
            return Err(ReplicaError::StaleView { view });
        }
        if args.view == view && state.status() == Status::Normal {
            // a late copy, prepares of this view may already be in the log
            debug!(view, "already NORMAL in this view, ignoring start view");
            return Ok(());
        }

        state.start_view(args.view, args.log);
        state.assert_state();
        info!(
            view = args.view,
            primary = primary(args.view, self.cluster_size()),
            op = state.op_number(),
            "new view started"
        );
        Ok(())
    }

    /// Run a view change towards `new_view`, only meaningful on the
    /// primary-elect of that view.
    pub async fn prompt_view_change(&self, new_view: View) -> Result<(), ReplicaError> {
        let n = self.cluster_size();
        {
            let state = self.lock();
            let view = state.current_view();
            let elect = primary(new_view, n);
            if elect != self.index() {
                return Err(ReplicaError::NotPrimaryElect {
                    view,
                    primary: elect,
                });
            }
            if new_view <= view {
                return Err(ReplicaError::StaleView { view });
            }
        }
        info!(new_view, "primary looks down, trying to become the new primary");

        let args = ViewChangeArgs { view: new_view };
        let needed = majority(n);
        let mut replies = Vec::with_capacity(n);
        replies.push(self.view_change(args.clone())?);
        let mut received = 1;

        let mut pending = self.fan_out(
            self.others()
                .map(|peer| (peer, self.link.view_change(peer, args.clone()))),
        );
        while received < n && replies.len() < needed {
            let Some((peer, reply)) = pending.next().await else {
                break;
            };
            received += 1;
            match reply {
                Ok(reply) => replies.push(reply),
                Err(err) => debug!(peer, %err, "no view change vote"),
            }
        }
        drop(pending);

        let Some(log) = select_new_view_log(&replies, n) else {
            warn!(new_view, votes = replies.len(), needed, "view change failed");
            return Err(ReplicaError::QuorumFailed {
                view: new_view,
                acks: replies.len(),
                needed,
            });
        };

        let args = StartViewArgs {
            view: new_view,
            log,
        };
        self.start_view(args.clone())?;
        let mut pending = self.fan_out(
            self.others()
                .map(|peer| (peer, self.link.start_view(peer, args.clone()))),
        );
        while let Some((peer, sent)) = pending.next().await {
            if let Err(err) = sent {
                debug!(peer, %err, "start view not delivered");
            }
        }
        Ok(())
    }
}
