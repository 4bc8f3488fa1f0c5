//! # Summary
//!
//! Wire types exchanged between replicas and with clients. Encoding is
//! the socket layer's concern; everything here is a plain serde
//! struct.

use serde_derive::{Deserialize, Serialize};

use crate::state;

/// Replica identifier, assigned by deployment order.
pub type ReplicaId = u32;

/// Index into the instance space.
pub type InstanceId = u32;

/// Log-consensus ballot, made unique per replica by folding the
/// replica id into the low bits.
pub type Ballot = u32;

/// Version stamp on a register value. Totally ordered: by timestamp,
/// then by the id of the replica that minted it.
#[derive(Serialize, Deserialize)]
#[derive(Copy, Clone, Default, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag {
    pub ts: u64,
    pub id: ReplicaId,
}

/// A versioned register value.
#[derive(Serialize, Deserialize)]
#[derive(Copy, Clone, Default, Debug, PartialEq, Eq)]
pub struct Payload {
    pub tag: Tag,
    pub value: state::Value,
}

impl Payload {
    /// Placeholder payload for replies that carry no useful data.
    pub fn empty() -> Self {
        Payload::default()
    }
}

/// Register discovery query. For reads the coordinator's own payload
/// rides along so a lagging peer can adopt it.
#[derive(Serialize, Deserialize)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Get {
    pub replica: ReplicaId,
    pub instance: InstanceId,
    pub write: bool,
    pub key: state::Key,
    pub payload: Payload,
}

#[derive(Serialize, Deserialize)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GetReply {
    pub replica: ReplicaId,
    pub instance: InstanceId,
    pub ok: bool,
    pub write: bool,
    pub key: state::Key,
    pub payload: Payload,
}

/// Register propagate message carrying the chosen payload.
#[derive(Serialize, Deserialize)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Set {
    pub replica: ReplicaId,
    pub instance: InstanceId,
    pub write: bool,
    pub key: state::Key,
    pub payload: Payload,
}

#[derive(Serialize, Deserialize)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SetReply {
    pub instance: InstanceId,
}

/// RMW discovery round, guarded by a ballot.
#[derive(Serialize, Deserialize)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RmwGet {
    pub leader: ReplicaId,
    pub instance: InstanceId,
    pub ballot: Ballot,
    pub cmds: Vec<state::Command>,
}

/// Reply to [`RmwGet`]. A ballot above the one the coordinator sent is
/// a NACK from a peer that has promised a higher ballot.
#[derive(Serialize, Deserialize)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RmwGetReply {
    pub instance: InstanceId,
    pub ballot: Ballot,
    pub key: state::Key,
    pub payload: Payload,
}

/// RMW commit round carrying the computed payload.
#[derive(Serialize, Deserialize)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RmwSet {
    pub leader: ReplicaId,
    pub instance: InstanceId,
    pub ballot: Ballot,
    pub key: state::Key,
    pub payload: Payload,
    pub cmds: Vec<state::Command>,
}

#[derive(Serialize, Deserialize)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RmwSetReply {
    pub instance: InstanceId,
    pub ok: bool,
    pub ballot: Ballot,
}

/// Client request: one command plus client-side bookkeeping that is
/// echoed in the reply.
#[derive(Serialize, Deserialize)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Propose {
    pub cmd_id: u32,
    pub command: state::Command,
    pub timestamp: u64,
}

#[derive(Serialize, Deserialize)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ProposeReply {
    pub ok: bool,
    pub cmd_id: u32,
    pub value: state::Value,
    pub timestamp: u64,
}
