// Liveness monitor: runs next to every replica.
//
// The primary uses each tick to push its commit index (which is also
// its heartbeat). Backups ping the primary and, when it is gone, walk
// the following views until they find a primary-elect that is alive;
// if that is us, we run the view change ourselves. A replica stuck in
// VIEW_CHANGE first gives the elect of its current view a chance.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::replica::Replica;
use super::state::{primary, Status};
use super::util::jittered;

pub async fn run(replica: Arc<Replica>, interval: Duration) {
    loop {
        tokio::time::sleep(jittered(interval)).await;
        tick(&replica).await;
    }
}

pub async fn tick(replica: &Replica) {
    let n = replica.cluster_size();
    let (view, status, is_primary, commit) = replica.with_state(|s| {
        (s.current_view(), s.status(), s.is_primary(), s.commit_index())
    });

    match status {
        Status::Normal if is_primary => {
            replica.broadcast_commit(view, commit).await;
            return;
        }
        Status::Normal => {
            if replica.ping(primary(view, n)).await {
                return;
            }
            warn!(view, primary = primary(view, n), "primary is unreachable");
        }
        // retried on the next prepare from the primary
        Status::Recovering => return,
        Status::ViewChange => {
            let elect = primary(view, n);
            if elect != replica.index() && replica.ping(elect).await {
                debug!(view, elect, "primary-elect is alive, waiting for start view");
                return;
            }
            debug!(view, "view change stalled");
        }
    }

    for next in view + 1..=view + n as u64 {
        let elect = primary(next, n);
        if elect == replica.index() {
            if let Err(err) = replica.prompt_view_change(next).await {
                warn!(view = next, %err, "view change attempt failed");
            }
            return;
        }
        if replica.ping(elect).await {
            debug!(view = next, elect, "leaving view change to primary-elect");
            return;
        }
    }
}
