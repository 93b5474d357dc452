// A replica moves between 3 states:
// - normal, view change and recovering.
//
// Everything here is mutated while holding the replica lock,
// the state machine included, so consensus bookkeeping and
// application of committed entries stay atomic.

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::sm::StateMachine;

pub type View = u64;
pub type OpNumber = usize;
pub type ReplicaIndex = usize;
pub type Entry = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Normal,
    ViewChange,
    Recovering,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Normal => write!(f, "NORMAL"),
            Status::ViewChange => write!(f, "VIEW_CHANGE"),
            Status::Recovering => write!(f, "RECOVERING"),
        }
    }
}

/// Primary of `view` in a cluster of `n` replicas.
pub fn primary(view: View, n: usize) -> ReplicaIndex {
    (view % n as u64) as ReplicaIndex
}

/// Successful backup replies needed before the primary may commit.
/// Together with the primary's own copy this is a majority.
pub fn backup_quorum(n: usize) -> usize {
    n / 2
}

pub fn majority(n: usize) -> usize {
    n / 2 + 1
}

pub struct ReplicaState {
    peers: Vec<SocketAddr>,
    self_index: ReplicaIndex,

    pub(crate) current_view: View,
    pub(crate) status: Status,
    pub(crate) last_normal_view: View,

    // index 0 is a sentinel, real entries start at 1
    pub(crate) log: Vec<Entry>,
    pub(crate) commit_index: OpNumber,
    pub(crate) op_number: OpNumber,
    pub(crate) last_applied: OpNumber,

    machine: Box<dyn StateMachine>,
}

impl fmt::Debug for ReplicaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicaState")
            .field("self_index", &self.self_index)
            .field("current_view", &self.current_view)
            .field("status", &self.status)
            .field("last_normal_view", &self.last_normal_view)
            .field("commit_index", &self.commit_index)
            .field("op_number", &self.op_number)
            .field("last_applied", &self.last_applied)
            .finish()
    }
}

impl ReplicaState {
    pub fn init_state(
        peers: Vec<SocketAddr>,
        self_index: ReplicaIndex,
        machine: Box<dyn StateMachine>,
    ) -> ReplicaState {
        ReplicaState {
            peers,
            self_index,
            current_view: 0,
            status: Status::Normal,
            last_normal_view: 0,
            log: vec![Entry::new()],
            commit_index: 0,
            op_number: 0,
            last_applied: 0,
            machine,
        }
    }

    pub fn cluster_size(&self) -> usize {
        self.peers.len()
    }

    pub fn self_index(&self) -> ReplicaIndex {
        self.self_index
    }

    pub fn current_view(&self) -> View {
        self.current_view
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn log(&self) -> &[Entry] {
        &self.log
    }

    pub fn commit_index(&self) -> OpNumber {
        self.commit_index
    }

    pub fn op_number(&self) -> OpNumber {
        self.op_number
    }

    pub fn primary(&self) -> ReplicaIndex {
        primary(self.current_view, self.cluster_size())
    }

    pub fn is_primary(&self) -> bool {
        self.primary() == self.self_index
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.machine.snapshot()
    }

    pub fn query(&self, query: &str) -> anyhow::Result<String> {
        self.machine.query(query)
    }

    pub(crate) fn append(&mut self, entry: Entry) -> OpNumber {
        self.log.push(entry);
        self.op_number += 1;
        self.op_number
    }

    /// Raise the commit index to `to`, capped by what is in the local
    /// log, and apply everything newly committed.
    pub(crate) fn advance_commit(&mut self, to: OpNumber) {
        let to = to.min(self.op_number);
        if to > self.commit_index {
            self.commit_index = to;
        }
        self.apply_committed();
    }

    fn apply_committed(&mut self) {
        while self.last_applied < self.commit_index {
            self.last_applied += 1;
            let entry = &self.log[self.last_applied];
            if let Err(err) = self.machine.apply(entry) {
                // a rejected command is still consumed, every replica
                // rejects it the same way
                debug!(op = self.last_applied, %err, "command rejected by state machine");
            }
        }
    }

    /// Wholesale replace of log, commit index, view and application
    /// state with what a peer handed us during recovery.
    pub(crate) fn install_recovery(
        &mut self,
        view: View,
        log: Vec<Entry>,
        commit_index: OpNumber,
        snapshot: &[u8],
    ) -> anyhow::Result<()> {
        self.machine.install(snapshot)?;
        self.log = log;
        self.op_number = self.log.len() - 1;
        self.commit_index = commit_index.min(self.op_number);
        self.last_applied = self.commit_index;
        self.current_view = view;
        self.status = Status::Normal;
        self.last_normal_view = view;
        Ok(())
    }

    /// Enter VIEW_CHANGE for `view`, returning the view we were last in
    /// along with a copy of the log.
    pub(crate) fn enter_view_change(&mut self, view: View) -> (View, Vec<Entry>) {
        let last_normal = self.current_view;
        self.last_normal_view = self.current_view;
        self.current_view = view;
        self.status = Status::ViewChange;
        (last_normal, self.log.clone())
    }

    /// Adopt the log selected for the new view and resume NORMAL.
    pub(crate) fn start_view(&mut self, view: View, log: Vec<Entry>) {
        self.current_view = view;
        self.status = Status::Normal;
        self.last_normal_view = view;
        // committed entries are never dropped, whatever the new view says
        if log.len() <= self.commit_index {
            warn!(
                view,
                commit = self.commit_index,
                len = log.len(),
                "start view log is missing committed entries, keeping local log"
            );
        } else {
            self.log = log;
            self.op_number = self.log.len() - 1;
        }
        self.apply_committed();
    }

    pub fn assert_state(&self) {
        debug_assert!(!self.peers.is_empty());
        debug_assert!(self.self_index < self.peers.len());
        debug_assert!(self.commit_index <= self.op_number);
        debug_assert!(self.op_number + 1 == self.log.len());
        debug_assert!(self.last_normal_view <= self.current_view);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::net::SocketAddr;

    use super::*;

    /// Records every applied command; snapshots are the json of that list.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingMachine {
        pub applied: Vec<String>,
    }

    impl StateMachine for RecordingMachine {
        fn apply(&mut self, command: &str) -> anyhow::Result<()> {
            self.applied.push(command.to_owned());
            Ok(())
        }

        fn snapshot(&self) -> Vec<u8> {
            serde_json::to_vec(&self.applied).unwrap()
        }

        fn install(&mut self, snapshot: &[u8]) -> anyhow::Result<()> {
            self.applied = serde_json::from_slice(snapshot)?;
            Ok(())
        }

        fn query(&self, _: &str) -> anyhow::Result<String> {
            Ok(serde_json::to_string(&self.applied)?)
        }
    }

    pub(crate) fn local_peers(n: usize) -> Vec<SocketAddr> {
        (0..n)
            .map(|i| SocketAddr::from(([127, 0, 0, 1], 50051 + i as u16)))
            .collect()
    }

    fn new_state(self_index: ReplicaIndex) -> ReplicaState {
        ReplicaState::init_state(
            local_peers(3),
            self_index,
            Box::new(RecordingMachine::default()),
        )
    }

    fn applied(state: &ReplicaState) -> Vec<String> {
        serde_json::from_slice(&state.snapshot()).unwrap()
    }

    #[test]
    fn test_init() {
        let state = new_state(1);
        assert_eq!(state.commit_index(), 0);
        assert_eq!(state.op_number(), 0);
        assert_eq!(state.log(), &[String::new()]);
        assert_eq!(state.status(), Status::Normal);
        assert!(!state.is_primary());
        state.assert_state();
    }

    #[test]
    fn primary_rotates_with_view() {
        assert_eq!(primary(0, 3), 0);
        assert_eq!(primary(1, 3), 1);
        assert_eq!(primary(5, 3), 2);
        assert_eq!(primary(7, 5), 2);
    }

    #[test]
    fn quorum_sizes() {
        assert_eq!(backup_quorum(3), 1);
        assert_eq!(majority(3), 2);
        assert_eq!(backup_quorum(4), 2);
        assert_eq!(majority(5), 3);
        assert_eq!(backup_quorum(1), 0);
    }

    #[test]
    fn commit_applies_in_order_once() {
        let mut state = new_state(0);
        state.append("a".into());
        state.append("b".into());
        state.append("c".into());

        state.advance_commit(2);
        assert_eq!(applied(&state), vec!["a", "b"]);

        // going backwards is a no-op
        state.advance_commit(1);
        state.advance_commit(3);
        assert_eq!(applied(&state), vec!["a", "b", "c"]);
        state.assert_state();
    }

    #[test]
    fn commit_capped_by_log() {
        let mut state = new_state(1);
        state.append("a".into());
        state.advance_commit(10);
        assert_eq!(state.commit_index(), 1);
        state.assert_state();
    }

    #[test]
    fn recovery_install_is_idempotent() {
        let log: Vec<Entry> = vec!["".into(), "a".into(), "b".into()];
        let snapshot = serde_json::to_vec(&vec!["a"]).unwrap();

        let mut state = new_state(2);
        state.append("stale".into());
        state.status = Status::Recovering;

        state.install_recovery(1, log.clone(), 1, &snapshot).unwrap();
        let first = (state.log().to_vec(), state.commit_index(), applied(&state));
        state.install_recovery(1, log.clone(), 1, &snapshot).unwrap();
        let second = (state.log().to_vec(), state.commit_index(), applied(&state));

        assert_eq!(first, second);
        assert_eq!(state.op_number(), 2);
        assert_eq!(state.current_view(), 1);
        assert_eq!(state.status(), Status::Normal);

        // entries after the snapshot apply on top of it
        state.advance_commit(2);
        assert_eq!(applied(&state), vec!["a", "b"]);
        state.assert_state();
    }

    #[test]
    fn view_change_then_start_view_installs_log() {
        let mut state = new_state(2);
        state.append("a".into());

        let (last_normal, log) = state.enter_view_change(1);
        assert_eq!(last_normal, 0);
        assert_eq!(log.len(), 2);
        assert_eq!(state.status(), Status::ViewChange);
        assert_eq!(state.current_view(), 1);

        state.start_view(1, vec!["".into(), "a".into(), "b".into(), "c".into()]);
        assert_eq!(state.status(), Status::Normal);
        assert_eq!(state.op_number(), 3);
        assert_eq!(state.log()[3], "c");
        state.assert_state();
    }

    #[test]
    fn start_view_never_drops_committed_entries() {
        let mut state = new_state(2);
        state.append("a".into());
        state.append("b".into());
        state.advance_commit(2);

        state.start_view(1, vec!["".into(), "a".into()]);
        assert_eq!(state.log(), &["", "a", "b"]);
        assert_eq!(state.commit_index(), 2);
        assert_eq!(applied(&state), vec!["a", "b"]);

        state.start_view(2, Vec::new());
        assert_eq!(state.op_number(), 2);
        assert_eq!(state.status(), Status::Normal);
        state.assert_state();
    }
}
