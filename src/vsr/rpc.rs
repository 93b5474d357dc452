use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tarpc::context;

use super::error::ReplicaError;
use super::replica::Replica;
use super::state::{Entry, OpNumber, ReplicaIndex, Status, View};
use crate::storage::kv::{Answer, Command, Query};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareArgs {
    pub view: View,
    pub primary_commit: OpNumber,
    pub index: OpNumber,
    pub entry: Entry,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareReply {
    pub view: View,
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitArgs {
    pub view: View,
    pub commit_index: OpNumber,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryArgs {
    pub view: View,
    pub replica: ReplicaIndex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryReply {
    pub view: View,
    pub status: Status,
    pub success: bool,
    pub log: Vec<Entry>,
    pub primary_commit: OpNumber,
    pub snapshot: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewChangeArgs {
    pub view: View,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewChangeReply {
    pub last_normal_view: View,
    pub log: Vec<Entry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartViewArgs {
    pub view: View,
    pub log: Vec<Entry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartBeatReply {
    pub alive: bool,
    pub current_view: View,
}

/// Outcome of a client mutation, `index` is -1 unless `ok`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReply {
    pub index: i64,
    pub view: View,
    pub ok: bool,
}

#[tarpc::service]
pub trait Vsr {
    async fn prepare(args: PrepareArgs) -> Result<PrepareReply, ReplicaError>;
    async fn commit(args: CommitArgs);
    async fn recovery(args: RecoveryArgs) -> RecoveryReply;
    async fn view_change(args: ViewChangeArgs) -> Result<ViewChangeReply, ReplicaError>;
    async fn start_view(args: StartViewArgs) -> Result<(), ReplicaError>;
    async fn prompt_view_change(new_view: View) -> bool;
    async fn who_is_primary() -> ReplicaIndex;
    async fn heart_beat() -> HeartBeatReply;
    async fn submit(command: Command) -> SubmitReply;
    async fn query(query: Query) -> Result<Answer, ReplicaError>;
}

#[derive(Clone)]
pub struct VsrServer {
    pub replica: Arc<Replica>,
}

impl VsrServer {
    fn query_failed(&self, err: serde_json::Error) -> ReplicaError {
        ReplicaError::QueryFailed {
            view: self.replica.heart_beat().current_view,
            reason: err.to_string(),
        }
    }
}

#[tarpc::server]
impl Vsr for VsrServer {
    async fn prepare(
        self,
        _: context::Context,
        args: PrepareArgs,
    ) -> Result<PrepareReply, ReplicaError> {
        self.replica.prepare(args).await
    }

    async fn commit(self, _: context::Context, args: CommitArgs) {
        self.replica.commit(args)
    }

    async fn recovery(self, _: context::Context, args: RecoveryArgs) -> RecoveryReply {
        self.replica.recovery(args)
    }

    async fn view_change(
        self,
        _: context::Context,
        args: ViewChangeArgs,
    ) -> Result<ViewChangeReply, ReplicaError> {
        self.replica.view_change(args)
    }

    async fn start_view(self, _: context::Context, args: StartViewArgs) -> Result<(), ReplicaError> {
        self.replica.start_view(args)
    }

    async fn prompt_view_change(self, _: context::Context, new_view: View) -> bool {
        self.replica.prompt_view_change(new_view).await.is_ok()
    }

    async fn who_is_primary(self, _: context::Context) -> ReplicaIndex {
        self.replica.who_is_primary()
    }

    async fn heart_beat(self, _: context::Context) -> HeartBeatReply {
        self.replica.heart_beat()
    }

    async fn submit(self, _: context::Context, command: Command) -> SubmitReply {
        let entry = match command.encode() {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(%err, "could not encode command");
                let view = self.replica.heart_beat().current_view;
                return SubmitReply {
                    index: -1,
                    view,
                    ok: false,
                };
            }
        };
        match self.replica.start(entry).await {
            Ok(committed) => SubmitReply {
                index: committed.index as i64,
                view: committed.view,
                ok: true,
            },
            Err(err) => SubmitReply {
                index: -1,
                view: err.view(),
                ok: false,
            },
        }
    }

    async fn query(self, _: context::Context, query: Query) -> Result<Answer, ReplicaError> {
        let query = query.encode().map_err(|err| self.query_failed(err))?;
        let answer = self.replica.query(&query)?;
        Answer::decode(&answer).map_err(|err| self.query_failed(err))
    }
}
