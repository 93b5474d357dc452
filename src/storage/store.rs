// Application state: users, their tweets and who they follow.
//
// Snapshots are MessagePack (rmp_serde) of the whole user table,
// installing one throws away whatever was there before. Reads only
// ever see commands that were committed and applied.
//
use std::collections::{BTreeMap, BTreeSet};

use anyhow::{anyhow, bail};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::kv::{Answer, Command, Query};
use crate::vsr::sm::StateMachine;

#[derive(Debug, Default, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct User {
    pub password: String,
    pub tweets: Vec<String>,
    pub follows: BTreeSet<String>,
}

#[derive(Debug, Default)]
pub struct Store {
    users: BTreeMap<String, User>,
}

impl Store {
    fn execute(&mut self, command: Command) -> anyhow::Result<()> {
        match command {
            Command::Register { username, password } => {
                if self.users.contains_key(&username) {
                    bail!("user {username} already exists");
                }
                debug!(%username, "user added");
                self.users.insert(
                    username,
                    User {
                        password,
                        ..User::default()
                    },
                );
            }
            Command::DeleteUser { username } => {
                self.users.remove(&username);
                debug!(%username, "user deleted");
            }
            Command::AddTweet { username, text } => {
                let user = self
                    .users
                    .get_mut(&username)
                    .ok_or_else(|| anyhow!("no such user {username}"))?;
                user.tweets.push(text);
            }
            Command::Follow { username, target } => {
                if !self.users.contains_key(&target) {
                    bail!("user {target} to follow does not exist");
                }
                let user = self
                    .users
                    .get_mut(&username)
                    .ok_or_else(|| anyhow!("no such user {username}"))?;
                user.follows.insert(target);
            }
        }
        Ok(())
    }

    pub fn user_exists(&self, username: &str) -> bool {
        self.users.contains_key(username)
    }

    pub fn own_tweets(&self, username: &str) -> anyhow::Result<Vec<String>> {
        let user = self
            .users
            .get(username)
            .ok_or_else(|| anyhow!("no such user {username}"))?;
        Ok(user.tweets.clone())
    }

    /// Tweets of everyone `username` follows. A followed user that was
    /// deleted since shows up with no tweets.
    pub fn friends_tweets(&self, username: &str) -> BTreeMap<String, Vec<String>> {
        let Some(user) = self.users.get(username) else {
            return BTreeMap::new();
        };
        user.follows
            .iter()
            .map(|friend| {
                let tweets = self
                    .users
                    .get(friend)
                    .map(|f| f.tweets.clone())
                    .unwrap_or_default();
                (friend.clone(), tweets)
            })
            .collect()
    }

    /// Everyone `username` does not follow yet, themselves excluded.
    pub fn users_to_follow(&self, username: &str) -> anyhow::Result<Vec<String>> {
        let user = self
            .users
            .get(username)
            .ok_or_else(|| anyhow!("no such user {username}"))?;
        Ok(self
            .users
            .keys()
            .filter(|name| name.as_str() != username && !user.follows.contains(*name))
            .cloned()
            .collect())
    }

    fn answer(&self, query: Query) -> anyhow::Result<Answer> {
        let answer = match query {
            Query::OwnTweets { username } => Answer::Tweets(self.own_tweets(&username)?),
            Query::FriendsTweets { username } => {
                Answer::FriendsTweets(self.friends_tweets(&username))
            }
            Query::UsersToFollow { username } => Answer::Users(self.users_to_follow(&username)?),
            Query::UserExists { username } => Answer::Exists(self.user_exists(&username)),
        };
        Ok(answer)
    }
}

impl StateMachine for Store {
    fn apply(&mut self, command: &str) -> anyhow::Result<()> {
        self.execute(Command::decode(command)?)
    }

    fn snapshot(&self) -> Vec<u8> {
        // a map of strings always encodes
        rmp_serde::to_vec(&self.users).unwrap_or_default()
    }

    fn install(&mut self, snapshot: &[u8]) -> anyhow::Result<()> {
        self.users = rmp_serde::from_slice(snapshot)?;
        Ok(())
    }

    fn query(&self, query: &str) -> anyhow::Result<String> {
        let answer = self.answer(Query::decode(query)?)?;
        Ok(answer.encode()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(store: &mut Store, command: Command) -> anyhow::Result<()> {
        store.apply(&command.encode().unwrap())
    }

    fn register(store: &mut Store, name: &str) {
        apply(
            store,
            Command::Register {
                username: name.into(),
                password: "pw".into(),
            },
        )
        .unwrap();
    }

    #[test]
    fn register_tweet_follow() {
        let mut store = Store::default();
        register(&mut store, "alice");
        register(&mut store, "bob");

        apply(
            &mut store,
            Command::AddTweet {
                username: "bob".into(),
                text: "hello".into(),
            },
        )
        .unwrap();
        apply(
            &mut store,
            Command::Follow {
                username: "alice".into(),
                target: "bob".into(),
            },
        )
        .unwrap();

        assert_eq!(store.users["bob"].tweets, vec!["hello"]);
        assert!(store.users["alice"].follows.contains("bob"));
    }

    #[test]
    fn rejected_commands_leave_state_alone() {
        let mut store = Store::default();
        register(&mut store, "alice");

        let dup = Command::Register {
            username: "alice".into(),
            password: "other".into(),
        };
        assert!(apply(&mut store, dup).is_err());
        assert_eq!(store.users["alice"].password, "pw");

        let ghost = Command::Follow {
            username: "alice".into(),
            target: "ghost".into(),
        };
        assert!(apply(&mut store, ghost).is_err());
        assert!(store.users["alice"].follows.is_empty());

        assert!(store.apply("REG alice").is_err());
    }

    #[test]
    fn delete_user() {
        let mut store = Store::default();
        register(&mut store, "alice");
        apply(
            &mut store,
            Command::DeleteUser {
                username: "alice".into(),
            },
        )
        .unwrap();
        assert!(store.users.is_empty());
    }

    #[test]
    fn install_replaces_everything() {
        let mut primary = Store::default();
        register(&mut primary, "alice");
        let snapshot = primary.snapshot();

        let mut backup = Store::default();
        register(&mut backup, "mallory");
        backup.install(&snapshot).unwrap();
        backup.install(&snapshot).unwrap();

        assert_eq!(backup.users, primary.users);
        assert!(backup.install(b"not msgpack").is_err());
    }

    #[test]
    fn reads() {
        let mut store = Store::default();
        for name in ["alice", "bob", "carol"] {
            register(&mut store, name);
        }
        for text in ["one", "two"] {
            apply(
                &mut store,
                Command::AddTweet {
                    username: "bob".into(),
                    text: text.into(),
                },
            )
            .unwrap();
        }
        apply(
            &mut store,
            Command::Follow {
                username: "alice".into(),
                target: "bob".into(),
            },
        )
        .unwrap();

        assert!(store.user_exists("alice"));
        assert!(!store.user_exists("ghost"));
        assert_eq!(store.own_tweets("bob").unwrap(), vec!["one", "two"]);
        assert!(store.own_tweets("ghost").is_err());
        assert_eq!(store.users_to_follow("alice").unwrap(), vec!["carol"]);
        assert_eq!(store.users_to_follow("carol").unwrap(), vec!["alice", "bob"]);
        assert!(store.users_to_follow("ghost").is_err());

        let friends = store.friends_tweets("alice");
        assert_eq!(friends.len(), 1);
        assert_eq!(friends["bob"], vec!["one", "two"]);
        assert!(store.friends_tweets("ghost").is_empty());

        // followed users that are gone keep an empty entry
        apply(
            &mut store,
            Command::DeleteUser {
                username: "bob".into(),
            },
        )
        .unwrap();
        assert!(store.friends_tweets("alice")["bob"].is_empty());
    }

    #[test]
    fn query_through_state_machine() {
        let mut store = Store::default();
        register(&mut store, "alice");

        let ask = |store: &Store, query: Query| {
            store
                .query(&query.encode().unwrap())
                .map(|answer| Answer::decode(&answer).unwrap())
        };
        assert_eq!(
            ask(
                &store,
                Query::UserExists {
                    username: "alice".into()
                }
            )
            .unwrap(),
            Answer::Exists(true)
        );
        assert_eq!(
            ask(
                &store,
                Query::OwnTweets {
                    username: "alice".into()
                }
            )
            .unwrap(),
            Answer::Tweets(Vec::new())
        );
        assert!(ask(
            &store,
            Query::UsersToFollow {
                username: "ghost".into()
            }
        )
        .is_err());
        assert!(store.query("not json").is_err());
    }
}
