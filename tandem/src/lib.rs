//! # Summary
//!
//! This crate implements the replica core of a linearizable key-value
//! store that runs two quorum protocols in tandem: a fast two-phase
//! register exchange (in the style of ABD) for single-key reads and
//! blind writes, and a ballot-guarded two-phase log exchange (in the
//! style of multi-Paxos) for read-modify-write operations.
//!
//! Every replica runs the same engine: a single worker owns the key
//! store and the instance table and services one message or proposal
//! at a time, selected from typed inboxes. Peripheral tasks -- socket
//! readers and writers, a clock, client connections -- only ever talk
//! to the worker through channels.
//!
//! # Usage
//!
//! Create a [`Config`] describing the replica's id, client port, and
//! cluster size, then call `run` to launch it. Clients connect over
//! TCP and exchange length-delimited `bincode`-encoded [`Propose`] and
//! [`ProposeReply`] frames; the receiving and transmitting halves of a
//! connection are exposed as `socket::Rx<T>` and `socket::Tx<T>` for
//! convenience.
//!
//! ```no_run
//! #[tokio::main]
//! async fn main() {
//!     let handle = tandem::Config::new(0, 7070, 3).run().await;
//!     handle.be_the_leader();
//! }
//! ```
//!
//! # Implementation Details
//!
//! - Register reads piggyback the coordinator's payload on the query
//!   so a lagging peer catches up in the same round trip, and finish
//!   in one phase when the quorum is unanimous on the latest tag.
//! - The propagate phase skips peers already known to hold the latest
//!   tag.
//! - RMW ballots are made unique per replica by folding the replica id
//!   into the low bits; a stale ballot is answered with a NACK and the
//!   coordinator re-prepares at a higher ballot.
//! - When durability is enabled, instance metadata and commands are
//!   appended to a per-replica log file and synced at each protocol
//!   checkpoint.

#[macro_use]
extern crate log;

mod config;
mod instance;
mod internal;
mod message;
mod shared;
mod state;
mod storage;
mod thread;

pub mod socket;

#[cfg(test)]
mod testutil;
#[cfg(test)]
mod test_protocol;

pub use crate::config::{Config, Handle};
pub use crate::message::{Ballot, InstanceId, Payload, Propose, ProposeReply, ReplicaId, Tag};
pub use crate::state::{Command, Key, Op, RmwOp, Value, NIL};
