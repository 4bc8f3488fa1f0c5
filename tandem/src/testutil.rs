//! Deterministic in-memory cluster for protocol tests.
//!
//! Replicas are real `Replica` values whose handlers are invoked
//! directly; the hub's peer channels are looped back into the harness,
//! which shuttles frames between replicas until the cluster goes
//! quiet. No sockets, no tasks, no timing.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::internal;
use crate::message::{Payload, Propose, ProposeReply, ReplicaId};
use crate::shared::Shared;
use crate::state::{Command, Key, Op, RmwOp, Value, NIL};
use crate::thread::peer::{In, Router};
use crate::thread::replica::{Inboxes, Proposal, Replica};

pub fn put(key: Key, value: Value) -> Command {
    Command { op: Op::Put, key, value }
}

pub fn get(key: Key) -> Command {
    Command { op: Op::Get, key, value: NIL }
}

pub fn rmw(key: Key) -> Command {
    Command { op: Op::Rmw(RmwOp::Increment), key, value: NIL }
}

pub struct Cluster {
    pub replicas: Vec<Replica>,
    /// `links[from][to]` receives what `from`'s hub queued for `to`.
    links: Vec<Vec<Option<internal::Rx<In>>>>,
    /// One registered client (token 0) per replica.
    clients: Vec<internal::Rx<ProposeReply>>,
    next_cmd_id: u32,
    // Keep the worker-side channel senders alive.
    _routers: Vec<Router>,
    _proposes: Vec<internal::Tx<Proposal>>,
}

impl Cluster {
    pub fn new(count: usize) -> Self {
        let shareds: Vec<Shared> = (0..count)
            .map(|i| Shared::new(i as ReplicaId, count))
            .collect();

        let mut links: Vec<Vec<Option<internal::Rx<In>>>> =
            (0..count).map(|_| (0..count).map(|_| None).collect()).collect();
        for i in 0..count {
            for j in 0..count {
                if i == j {
                    continue;
                }
                let (rx, tx) = internal::new();
                shareds[i].write().connect_peer(j as ReplicaId, tx);
                links[i][j] = Some(rx);
            }
        }

        let mut replicas = Vec::new();
        let mut clients = Vec::new();
        let mut routers = Vec::new();
        let mut proposes = Vec::new();
        for (i, shared) in shareds.iter().enumerate() {
            let (get_rx, get_tx) = internal::new();
            let (get_reply_rx, get_reply_tx) = internal::new();
            let (set_rx, set_tx) = internal::new();
            let (set_reply_rx, set_reply_tx) = internal::new();
            let (rmw_get_rx, rmw_get_tx) = internal::new();
            let (rmw_get_reply_rx, rmw_get_reply_tx) = internal::new();
            let (rmw_set_rx, rmw_set_tx) = internal::new();
            let (rmw_set_reply_rx, rmw_set_reply_tx) = internal::new();
            let (propose_rx, propose_tx) = internal::new();
            let (control_rx, _control_tx) = internal::new();

            routers.push(Router {
                get: get_tx,
                get_reply: get_reply_tx,
                set: set_tx,
                set_reply: set_reply_tx,
                rmw_get: rmw_get_tx,
                rmw_get_reply: rmw_get_reply_tx,
                rmw_set: rmw_set_tx,
                rmw_set_reply: rmw_set_reply_tx,
            });
            proposes.push(propose_tx);
            let inboxes = Inboxes {
                get: get_rx,
                get_reply: get_reply_rx,
                set: set_rx,
                set_reply: set_reply_rx,
                rmw_get: rmw_get_rx,
                rmw_get_reply: rmw_get_reply_rx,
                rmw_set: rmw_set_rx,
                rmw_set_reply: rmw_set_reply_rx,
                propose: propose_rx,
                control: control_rx,
            };

            let (client_rx, client_tx) = internal::new();
            shared.write().connect_client(0, client_tx);
            clients.push(client_rx);

            replicas.push(Replica::new(
                i as ReplicaId,
                count,
                false,
                shared.clone(),
                None,
                inboxes,
                Arc::new(AtomicBool::new(false)),
            ));
        }

        Cluster {
            replicas,
            links,
            clients,
            next_cmd_id: 0,
            _routers: routers,
            _proposes: proposes,
        }
    }

    /// Submit a command at the given coordinator.
    pub fn propose(&mut self, at: usize, command: Command) -> u32 {
        self.next_cmd_id += 1;
        let cmd_id = self.next_cmd_id;
        self.replicas[at].handle_propose(Proposal {
            propose: Propose { cmd_id, command, timestamp: cmd_id as u64 },
            client: 0,
        });
        cmd_id
    }

    /// Next pending client reply at a replica, if any.
    pub fn reply(&mut self, at: usize) -> Option<ProposeReply> {
        self.clients[at].try_recv()
    }

    pub fn store(&self, at: usize, key: Key) -> Payload {
        self.replicas[at].store.get(key)
    }

    /// Hand a frame straight to a replica, as if it arrived on the
    /// wire.
    pub fn deliver(&mut self, to: usize, message: In) {
        let replica = &mut self.replicas[to];
        match message {
            In::Ping(_) => (),
            In::Get(m) => replica.handle_get(m),
            In::GetReply(m) => replica.handle_get_reply(m),
            In::Set(m) => replica.handle_set(m),
            In::SetReply(m) => replica.handle_set_reply(m),
            In::RmwGet(m) => replica.handle_rmw_get(m),
            In::RmwGetReply(m) => replica.handle_rmw_get_reply(m),
            In::RmwSet(m) => replica.handle_rmw_set(m),
            In::RmwSetReply(m) => replica.handle_rmw_set_reply(m),
        }
    }

    /// Drain every frame queued from one replica to another without
    /// delivering them.
    pub fn take_frames(&mut self, from: usize, to: usize) -> Vec<In> {
        let mut frames = Vec::new();
        if let Some(rx) = self.links[from][to].as_mut() {
            while let Some(frame) = rx.try_recv() {
                frames.push(frame);
            }
        }
        frames
    }

    /// Shuttle frames between replicas until nothing moves.
    pub fn pump(&mut self) {
        loop {
            let mut batch = Vec::new();
            for from in 0..self.replicas.len() {
                for to in 0..self.replicas.len() {
                    if let Some(rx) = self.links[from][to].as_mut() {
                        while let Some(frame) = rx.try_recv() {
                            batch.push((to, frame));
                        }
                    }
                }
            }
            if batch.is_empty() {
                break;
            }
            for (to, frame) in batch {
                self.deliver(to, frame);
            }
        }
    }

    /// Cut a replica off: everyone drops their link to it, and it
    /// drops its links to everyone.
    pub fn partition(&mut self, id: usize) {
        for other in 0..self.replicas.len() {
            if other == id {
                continue;
            }
            self.replicas[other].shared.write().disconnect_peer(id as ReplicaId);
            self.links[other][id] = None;
            self.replicas[id].shared.write().disconnect_peer(other as ReplicaId);
            self.links[id][other] = None;
        }
    }

    /// Reconnect a previously partitioned replica.
    pub fn heal(&mut self, id: usize) {
        for other in 0..self.replicas.len() {
            if other == id {
                continue;
            }
            let (rx, tx) = internal::new();
            self.replicas[other].shared.write().connect_peer(id as ReplicaId, tx);
            self.links[other][id] = Some(rx);
            let (rx, tx) = internal::new();
            self.replicas[id].shared.write().connect_peer(other as ReplicaId, tx);
            self.links[id][other] = Some(rx);
        }
    }
}
