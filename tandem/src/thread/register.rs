//! # Summary
//!
//! The fast register engine: two-phase quorum reads and blind writes
//! on single keys.
//!
//! The coordinator first discovers the highest tag held by a majority
//! (`Get`), then propagates the chosen payload (`Set`). Reads ride
//! their own payload along on the query so lagging peers catch up in
//! the same round trip, and finish after discovery alone when the
//! quorum already agrees on the latest tag. The propagate phase skips
//! peers whose discovery reply showed they hold the max tag.

use hashbrown::HashSet;

use crate::instance::Status;
use crate::message;
use crate::message::{InstanceId, Payload, ReplicaId, Tag};
use crate::state;
use crate::state::Key;
use crate::thread::peer;
use crate::thread::replica::{is_newer, Replica};

/// Decision taken when the discovery quorum closes.
struct Discovery {
    max: Payload,
    optimized: bool,
    skip: HashSet<ReplicaId>,
    written: state::Value,
}

impl Replica {
    /// Discovery phase (coordinator). Writes probe with an empty
    /// payload; reads send the local view for peers to adopt.
    pub(crate) fn bcast_get(&mut self, instance: InstanceId, write: bool, key: Key) {
        let payload = if write { Payload::empty() } else { self.store.get(key) };
        self.shared.read().broadcast(peer::In::Get(message::Get {
            replica: self.id,
            instance,
            write,
            key,
            payload,
        }));
    }

    /// Peer side of discovery: answer with the newer of the local and
    /// received views, adopting the received one if it wins. Probes
    /// for a write get an empty payload back; the coordinator never
    /// reads it.
    pub(crate) fn handle_get(&mut self, get: message::Get) {
        let payload = if get.write {
            Payload::empty()
        } else {
            let local = self.store.get(get.key);
            if !self.store.contains(get.key)
                || is_newer(local.tag, get.payload.tag, self.id, self.is_leader)
            {
                self.store.insert(get.key, get.payload);
                get.payload
            } else {
                local
            }
        };
        let reply = message::GetReply {
            replica: self.id,
            instance: get.instance,
            ok: true,
            write: get.write,
            key: get.key,
            payload,
        };
        self.shared.read().send(get.replica, peer::In::GetReply(reply));
    }

    /// Coordinator side of discovery. On the reply that completes a
    /// majority: merge the max-observed payload, then either finish
    /// immediately (optimized read) or enter the propagate phase.
    pub(crate) fn handle_get_reply(&mut self, reply: message::GetReply) {
        let key = reply.key;
        let local = self.store.get(key);
        let id = self.id;
        let leader = self.is_leader;
        let half = self.count >> 1;

        let discovery = {
            let inst = match self.space.get_mut(reply.instance) {
                Some(inst) => inst,
                None => return,
            };
            let book = match inst.book.as_mut() {
                Some(book) => book,
                None => return,
            };
            if book.get_done {
                // Late or duplicated reply; the phase already closed.
                return;
            }
            book.get_replies.push((reply.replica, reply.payload));
            if !reply.ok {
                return;
            }
            book.get_oks += 1;
            if book.get_oks + 1 <= half {
                return;
            }

            book.get_done = true;
            book.nacks = 0;
            inst.status = Status::Prepared;

            let mut max = local;
            for &(_, payload) in &book.get_replies {
                if is_newer(max.tag, payload.tag, id, leader) {
                    max = payload;
                }
            }
            // Peers already holding the max tag need no propagate.
            // Only meaningful for reads: a write mints a fresh tag
            // below, which no peer can hold yet.
            if !reply.write {
                for &(from, payload) in &book.get_replies {
                    if payload.tag == max.tag {
                        book.has_max_tag.insert(from);
                    }
                }
            }

            // A read is stable if the quorum was unanimous on one tag
            // and this coordinator was not ahead of it.
            let common = book.get_replies[0].1.tag;
            let unanimous = book
                .get_replies
                .iter()
                .all(|&(_, payload)| payload.tag == common);
            let optimized = !reply.write && unanimous && inst.initial_tag <= common;

            let skip = book.has_max_tag.clone();
            book.get_replies.clear();
            // The written value comes from the retained proposal, not
            // the slot's command list: a competing RMW coordinator may
            // claim this slot id and overwrite the list.
            Discovery { max, optimized, skip, written: book.proposal.propose.command.value }
        };

        self.store.insert(key, discovery.max);

        if discovery.optimized {
            debug!("instance {}: optimized read of key {}", reply.instance, key);
            self.reply_client(reply.instance, discovery.max.value);
            return;
        }

        if reply.write {
            // Mint a strictly higher unique tag for the written value.
            let tag = Tag { ts: discovery.max.tag.ts + 1, id: self.id };
            self.store.insert(key, Payload { tag, value: discovery.written });
        }
        self.sync();
        self.bcast_set(reply.instance, reply.write, key, &discovery.skip);
    }

    /// Propagate phase (coordinator): send the chosen payload to every
    /// live peer not already known to hold its tag.
    pub(crate) fn bcast_set(
        &mut self,
        instance: InstanceId,
        write: bool,
        key: Key,
        skip: &HashSet<ReplicaId>,
    ) {
        let payload = self.store.get(key);
        let sent = self.shared.read().broadcast_except(
            peer::In::Set(message::Set { replica: self.id, instance, write, key, payload }),
            skip,
        );
        if let Some(book) = self
            .space
            .get_mut(instance)
            .and_then(|inst| inst.book.as_mut())
        {
            book.set_targets = sent;
        }
        if sent == 0 {
            // Everyone already holds the tag; the propagate quorum is
            // this replica alone.
            self.finish_register(instance);
        }
    }

    /// Peer side of propagate: adopt the payload if it is newer.
    pub(crate) fn handle_set(&mut self, set: message::Set) {
        let local = self.store.get(set.key);
        if is_newer(local.tag, set.payload.tag, self.id, self.is_leader) {
            self.store.insert(set.key, set.payload);
        }
        trace!("key {}: tag {:?} after set from {}", set.key, self.store.get(set.key).tag, set.replica);
        self.shared
            .read()
            .send(set.replica, peer::In::SetReply(message::SetReply { instance: set.instance }));
    }

    /// Coordinator side of propagate: finish once a majority of the
    /// cluster, or every peer actually messaged, has acknowledged.
    pub(crate) fn handle_set_reply(&mut self, reply: message::SetReply) {
        let half = self.count >> 1;
        let quorum = {
            let book = match self
                .space
                .get_mut(reply.instance)
                .and_then(|inst| inst.book.as_mut())
            {
                Some(book) => book,
                None => return,
            };
            book.set_oks += 1;
            book.set_oks + 1 > book.set_targets || book.set_oks + 1 > half
        };
        if quorum {
            self.finish_register(reply.instance);
        }
    }

    /// Reply to the register client: reads return the value, writes
    /// return NIL.
    fn finish_register(&mut self, instance: InstanceId) {
        let command = match self.space.get(instance).and_then(|inst| inst.book.as_ref()) {
            Some(book) => book.proposal.propose.command,
            None => return,
        };
        let value = match command.op {
            state::Op::Get => self.store.get(command.key).value,
            _ => state::NIL,
        };
        self.reply_client(instance, value);
    }
}
