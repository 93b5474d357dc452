// SM -> State Machine that is being replicated.
//
// The replica only ever hands it committed log entries, in order
// and exactly once. Recovery swaps it out wholesale through
// snapshot/install, never merging.

pub trait StateMachine: Send {
    fn apply(&mut self, command: &str) -> anyhow::Result<()>;

    fn snapshot(&self) -> Vec<u8>;

    /// Replace the whole application state with `snapshot`.
    fn install(&mut self, snapshot: &[u8]) -> anyhow::Result<()>;

    /// Read-only question against the applied state.
    fn query(&self, query: &str) -> anyhow::Result<String>;
}
