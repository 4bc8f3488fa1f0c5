//! # Summary
//!
//! This module implements a central hub for outbound message
//! forwarding. We wrap the central `State` type with `Arc<RwLock<T>>`
//! to share the connections between concurrently running tasks.
//!
//! A peer is alive exactly while its transmitting channel is
//! registered here; broadcasts visit peers in round-robin order
//! starting after this replica's own id and skip peers that are not
//! alive.

use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::internal;
use crate::message;
use crate::message::ReplicaId;
use crate::thread::peer;

/// Thread-safe wrapper around the `State` forwarding hub.
pub struct Shared(Arc<RwLock<State>>);

impl Clone for Shared {
    fn clone(&self) -> Self {
        Shared(self.0.clone())
    }
}

impl Shared {
    pub fn new(id: ReplicaId, count: usize) -> Self {
        Shared(Arc::new(RwLock::new(State::new(id, count))))
    }

    /// Acquires a read lock on the underlying state.
    pub fn read(&self) -> RwLockReadGuard<State> {
        self.0.read()
    }

    /// Acquires a write lock on the underlying state.
    pub fn write(&self) -> RwLockWriteGuard<State> {
        self.0.write()
    }
}

/// Collection of outbound transmitting channels.
pub struct State {
    id: ReplicaId,
    count: usize,
    peer_txs: HashMap<ReplicaId, internal::Tx<peer::In>>,
    client_txs: HashMap<usize, internal::Tx<message::ProposeReply>>,
}

impl State {
    fn new(id: ReplicaId, count: usize) -> Self {
        State {
            id,
            count,
            peer_txs: HashMap::default(),
            client_txs: HashMap::default(),
        }
    }

    /// Registers the provided peer channel with this hub, marking the
    /// peer alive.
    pub fn connect_peer(&mut self, id: ReplicaId, tx: internal::Tx<peer::In>) {
        self.peer_txs.insert(id, tx);
    }

    /// Disconnects the provided peer from this hub, marking it dead.
    pub fn disconnect_peer(&mut self, id: ReplicaId) {
        self.peer_txs.remove(&id);
    }

    pub fn alive(&self, id: ReplicaId) -> bool {
        self.peer_txs.contains_key(&id)
    }

    /// Forwards a message to the provided peer replica. Messages to
    /// dead peers are dropped; the protocol recovers by quorum.
    pub fn send(&self, id: ReplicaId, message: peer::In) {
        if let Some(tx) = self.peer_txs.get(&id) {
            tx.try_send(message);
        }
    }

    /// Forwards a message to all live peers, visiting them in
    /// round-robin order starting after this replica's id. Returns how
    /// many peers were actually messaged.
    pub fn broadcast(&self, message: peer::In) -> usize {
        self.broadcast_except(message, &HashSet::default())
    }

    /// Same as `broadcast`, but skips the listed peers as well.
    pub fn broadcast_except(&self, message: peer::In, skip: &HashSet<ReplicaId>) -> usize {
        let mut sent = 0;
        let mut q = self.id;
        for _ in 1..self.count {
            q = (q + 1) % self.count as ReplicaId;
            if q == self.id {
                break;
            }
            if skip.contains(&q) {
                continue;
            }
            if let Some(tx) = self.peer_txs.get(&q) {
                tx.try_send(message.clone());
                sent += 1;
            }
        }
        sent
    }

    /// Registers the provided client channel with this hub.
    pub fn connect_client(&mut self, token: usize, tx: internal::Tx<message::ProposeReply>) {
        self.client_txs.insert(token, tx);
    }

    /// Disconnects the provided client from this hub.
    pub fn disconnect_client(&mut self, token: usize) {
        self.client_txs.remove(&token);
    }

    /// Forwards a reply to an external client. Dropped if the client
    /// has disconnected.
    pub fn reply_to_client(&self, token: usize, reply: message::ProposeReply) {
        if let Some(tx) = self.client_txs.get(&token) {
            tx.try_send(reply);
        }
    }
}
