//! # Summary
//!
//! This module defines the `Replica` struct: the single worker that
//! owns the key store, the instance space, and all coordinator
//! bookkeeping, and services exactly one message or proposal per loop
//! iteration.
//!
//! The proposal inbox is gated after each accepted proposal and
//! re-opened on the next clock tick, so protocol traffic for
//! outstanding operations is drained ahead of new work.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::instance::{Instance, Space, Status};
use crate::message;
use crate::message::{Ballot, InstanceId, Payload, ReplicaId, Tag};
use crate::shared::Shared;
use crate::state;
use crate::state::Store;
use crate::storage;
use crate::thread::Rx;

/// Interval between clock ticks. Each tick re-opens the gated proposal
/// inbox; the shutdown flag is polled at least this often.
pub(crate) const CLOCK: Duration = Duration::from_millis(5);

/// A client proposal paired with the connection token to answer on.
#[derive(Debug)]
pub struct Proposal {
    pub propose: message::Propose,
    pub client: usize,
}

/// Out-of-band control events.
#[derive(Debug)]
pub enum Control {
    BeTheLeader,
}

/// Typed inboxes feeding the worker, one per RPC kind.
pub(crate) struct Inboxes {
    pub get: Rx<message::Get>,
    pub get_reply: Rx<message::GetReply>,
    pub set: Rx<message::Set>,
    pub set_reply: Rx<message::SetReply>,
    pub rmw_get: Rx<message::RmwGet>,
    pub rmw_get_reply: Rx<message::RmwGetReply>,
    pub rmw_set: Rx<message::RmwSet>,
    pub rmw_set_reply: Rx<message::RmwSetReply>,
    pub propose: Rx<Proposal>,
    pub control: Rx<Control>,
}

enum Event {
    Tick,
    Get(message::Get),
    GetReply(message::GetReply),
    Set(message::Set),
    SetReply(message::SetReply),
    RmwGet(message::RmwGet),
    RmwGetReply(message::RmwGetReply),
    RmwSet(message::RmwSet),
    RmwSetReply(message::RmwSetReply),
    Propose(Proposal),
    Control(Control),
    Closed,
}

pub(crate) struct Replica {
    pub(crate) id: ReplicaId,
    pub(crate) count: usize,
    pub(crate) is_leader: bool,
    pub(crate) shared: Shared,
    pub(crate) store: Store,
    pub(crate) space: Space,
    /// Highest instance this replica has tried to allocate.
    pub(crate) crt_instance: InstanceId,
    /// Length of the leading fully-committed prefix of the space.
    pub(crate) committed_up_to: InstanceId,
    /// Floor for ballots accepted on slots this replica has not seen.
    pub(crate) default_ballot: Ballot,
    pub(crate) log: Option<storage::Log>,
    shutdown: Arc<AtomicBool>,
    inboxes: Inboxes,
}

impl Replica {
    pub(crate) fn new(
        id: ReplicaId,
        count: usize,
        is_leader: bool,
        shared: Shared,
        log: Option<storage::Log>,
        inboxes: Inboxes,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Replica {
            id,
            count,
            is_leader,
            shared,
            store: Store::new(id),
            space: Space::new(),
            crt_instance: 0,
            committed_up_to: 0,
            default_ballot: 0,
            log,
            shutdown,
            inboxes,
        }
    }

    /// Main processing loop: select one event, dispatch one handler.
    pub(crate) async fn run(mut self) {
        let mut clock = tokio::time::interval(CLOCK);
        let mut gated = false;
        // The control handle may be dropped without tearing the
        // replica down; a closed protocol inbox means the substrate is
        // gone and does stop the loop.
        let mut control_open = true;
        while !self.shutdown.load(Ordering::Relaxed) {
            let event = tokio::select! {
                _ = clock.tick() => Event::Tick,
                m = self.inboxes.get.recv() => m.map_or(Event::Closed, Event::Get),
                m = self.inboxes.get_reply.recv() => m.map_or(Event::Closed, Event::GetReply),
                m = self.inboxes.set.recv() => m.map_or(Event::Closed, Event::Set),
                m = self.inboxes.set_reply.recv() => m.map_or(Event::Closed, Event::SetReply),
                m = self.inboxes.rmw_get.recv() => m.map_or(Event::Closed, Event::RmwGet),
                m = self.inboxes.rmw_get_reply.recv() => m.map_or(Event::Closed, Event::RmwGetReply),
                m = self.inboxes.rmw_set.recv() => m.map_or(Event::Closed, Event::RmwSet),
                m = self.inboxes.rmw_set_reply.recv() => m.map_or(Event::Closed, Event::RmwSetReply),
                m = self.inboxes.propose.recv(), if !gated => m.map_or(Event::Closed, Event::Propose),
                m = self.inboxes.control.recv(), if control_open => match m {
                    Some(control) => Event::Control(control),
                    None => {
                        control_open = false;
                        Event::Tick
                    }
                },
            };
            match event {
                Event::Tick => gated = false,
                Event::Get(m) => self.handle_get(m),
                Event::GetReply(m) => self.handle_get_reply(m),
                Event::Set(m) => self.handle_set(m),
                Event::SetReply(m) => self.handle_set_reply(m),
                Event::RmwGet(m) => self.handle_rmw_get(m),
                Event::RmwGetReply(m) => self.handle_rmw_get_reply(m),
                Event::RmwSet(m) => self.handle_rmw_set(m),
                Event::RmwSetReply(m) => self.handle_rmw_set_reply(m),
                Event::Propose(proposal) => {
                    self.handle_propose(proposal);
                    gated = true;
                }
                Event::Control(control) => self.handle_control(control),
                Event::Closed => break,
            }
        }
        info!("replica {} stopping", self.id);
    }

    /// Allocate the next free slot and dispatch the proposal to the
    /// register or RMW path by operation kind.
    pub(crate) fn handle_propose(&mut self, proposal: Proposal) {
        self.crt_instance = self.space.first_free_from(self.crt_instance);
        let instance = self.crt_instance;
        let command = proposal.propose.command;
        let key = command.key;
        match command.op {
            state::Op::Rmw(_) => {
                let ballot = self.unique_ballot(0);
                self.space
                    .insert(instance, Instance::coordinator(vec![command], ballot, proposal));
                debug!("instance {}: rmw on key {}", instance, key);
                self.bcast_rmw_get(instance);
            }
            state::Op::Put => {
                self.space
                    .insert(instance, Instance::coordinator(vec![command], 0, proposal));
                debug!("instance {}: put on key {}", instance, key);
                self.bcast_get(instance, true, key);
            }
            state::Op::Get => {
                let mut inst = Instance::coordinator(vec![command], 0, proposal);
                if !self.store.contains(key) {
                    let tag = Tag { ts: 0, id: self.id };
                    self.store.insert(key, Payload { tag, value: state::NIL });
                }
                inst.initial_tag = self.store.get(key).tag;
                self.space.insert(instance, inst);
                debug!("instance {}: get on key {}", instance, key);
                self.bcast_get(instance, false, key);
            }
        }
    }

    fn handle_control(&mut self, control: Control) {
        match control {
            Control::BeTheLeader => {
                info!("replica {} told to lead", self.id);
                self.is_leader = true;
            }
        }
    }

    /// Send the client its reply, at most once per instance. Also the
    /// point where a register instance is marked committed.
    pub(crate) fn reply_client(&mut self, instance: InstanceId, value: state::Value) {
        let (token, reply) = {
            let inst = match self.space.get_mut(instance) {
                Some(inst) => inst,
                None => return,
            };
            let book = match inst.book.as_mut() {
                Some(book) => book,
                None => return,
            };
            if book.completed {
                return;
            }
            book.completed = true;
            inst.status = Status::Committed;
            let reply = message::ProposeReply {
                ok: true,
                cmd_id: book.proposal.propose.cmd_id,
                value,
                timestamp: book.proposal.propose.timestamp,
            };
            (book.proposal.client, reply)
        };
        self.shared.read().reply_to_client(token, reply);
        self.update_committed_up_to();
    }

    /// Ballots are made unique across replicas by folding the replica
    /// id into the low bits.
    pub(crate) fn unique_ballot(&self, ballot: Ballot) -> Ballot {
        (ballot << 4) | self.id
    }

    pub(crate) fn update_committed_up_to(&mut self) {
        while self
            .space
            .get(self.committed_up_to)
            .map_or(false, |inst| inst.status == Status::Committed)
        {
            self.committed_up_to += 1;
        }
    }

    /// Append this slot's metadata and commands to stable storage.
    pub(crate) fn record_instance(&mut self, instance: InstanceId) {
        let (ballot, status, cmds) = match self.space.get(instance) {
            Some(inst) => (inst.ballot, inst.status, inst.cmds.clone()),
            None => return,
        };
        if let Some(log) = self.log.as_mut() {
            log.record_instance_metadata(ballot, status);
            log.record_commands(&cmds);
        }
    }

    /// Flush stable storage.
    pub(crate) fn sync(&mut self) {
        if let Some(log) = self.log.as_mut() {
            log.sync();
        }
    }
}

/// `true` when `received` should replace `current` in the key store.
///
/// Tags order by timestamp, then by minting replica. One refinement on
/// exact ties of timestamp: the leader prefers the received tag over a
/// tag it minted itself, so leader-originated reads pick up peer
/// updates of the same round.
pub(crate) fn is_newer(current: Tag, received: Tag, id: ReplicaId, leader: bool) -> bool {
    if received.ts > current.ts {
        true
    } else if received.ts == current.ts {
        if current.id == received.id {
            false
        } else if leader && current.id == id {
            true
        } else {
            current.id < received.id
        }
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_newer_follows_tag_order() {
        let old = Tag { ts: 1, id: 0 };
        let new = Tag { ts: 2, id: 0 };
        assert!(is_newer(old, new, 2, false));
        assert!(!is_newer(new, old, 2, false));
        assert!(!is_newer(new, new, 2, false));
    }

    #[test]
    fn equal_timestamps_break_ties_by_id() {
        let a = Tag { ts: 3, id: 0 };
        let b = Tag { ts: 3, id: 1 };
        assert!(is_newer(a, b, 2, false));
        assert!(!is_newer(b, a, 2, false));
    }

    #[test]
    fn leader_prefers_received_over_its_own_tag() {
        let own = Tag { ts: 3, id: 2 };
        let other = Tag { ts: 3, id: 0 };
        // A non-leader keeps its higher-id tag.
        assert!(!is_newer(own, other, 2, false));
        // The leader lets the received tag win the tie.
        assert!(is_newer(own, other, 2, true));
    }
}
