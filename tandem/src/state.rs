//! # Summary
//!
//! Commands submitted by clients, and the in-memory key store mapping
//! each key to its latest versioned payload.

use serde_derive::{Deserialize, Serialize};

use crate::message::{Payload, ReplicaId, Tag};

pub type Key = u64;
pub type Value = i64;

/// Placeholder value in replies to operations that return nothing.
pub const NIL: Value = 0;

/// Read-modify-write flavors. The update function travels with the
/// command so every replica applies the same transformation.
#[derive(Serialize, Deserialize)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RmwOp {
    Increment,
}

impl RmwOp {
    pub fn apply(self, value: Value) -> Value {
        match self {
            RmwOp::Increment => value + 1,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Op {
    Get,
    Put,
    Rmw(RmwOp),
}

/// One client operation on one key.
#[derive(Serialize, Deserialize)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Command {
    pub op: Op,
    pub key: Key,
    pub value: Value,
}

/// Key store owned by the replica worker. A key that has never been
/// written reads as `(tag: (0, self), value: 0)`.
pub struct Store {
    id: ReplicaId,
    data: hashbrown::HashMap<Key, Payload>,
}

impl Store {
    pub fn new(id: ReplicaId) -> Self {
        Store {
            id,
            data: hashbrown::HashMap::default(),
        }
    }

    /// Current payload for `key`, defaulting for unseen keys.
    pub fn get(&self, key: Key) -> Payload {
        self.data.get(&key).copied().unwrap_or(Payload {
            tag: Tag { ts: 0, id: self.id },
            value: NIL,
        })
    }

    pub fn contains(&self, key: Key) -> bool {
        self.data.contains_key(&key)
    }

    pub fn insert(&mut self, key: Key, payload: Payload) {
        self.data.insert(key, payload);
    }
}
