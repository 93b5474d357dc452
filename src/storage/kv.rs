// Mutations a client can ask for. They travel through the replicated
// log as json, the log itself only ever sees strings.
//
// Queries take the same road into the state machine but never touch
// the log.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum Command {
    Register { username: String, password: String },
    DeleteUser { username: String },
    AddTweet { username: String, text: String },
    Follow { username: String, target: String },
}

impl Command {
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn decode(entry: &str) -> serde_json::Result<Command> {
        serde_json::from_str(entry)
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum Query {
    OwnTweets { username: String },
    FriendsTweets { username: String },
    UsersToFollow { username: String },
    UserExists { username: String },
}

impl Query {
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn decode(text: &str) -> serde_json::Result<Query> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum Answer {
    Tweets(Vec<String>),
    /// Tweets of every followed user, keyed by username.
    FriendsTweets(BTreeMap<String, Vec<String>>),
    Users(Vec<String>),
    Exists(bool),
}

impl Answer {
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn decode(text: &str) -> serde_json::Result<Answer> {
        serde_json::from_str(text)
    }
}
