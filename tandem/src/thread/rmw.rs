//! # Summary
//!
//! The log consensus engine: ballot-guarded two-phase read-modify-write
//! on single keys, one instance slot per RMW.
//!
//! Discovery (`RmwGet`) collects a majority's view of the key under a
//! ballot; the coordinator then applies the command's update function
//! to the max-observed value, persists the checkpoint, and commits the
//! result (`RmwSet`). A peer that has promised a higher ballot answers
//! with that ballot instead of obeying, and the coordinator re-prepares
//! above it.

use crate::instance::{Instance, Status};
use crate::message;
use crate::message::{InstanceId, Payload, Tag};
use crate::state;
use crate::state::Key;
use crate::thread::peer;
use crate::thread::replica::{is_newer, Replica};

enum AfterGet {
    /// Discovery quorum closed; commit this computed payload.
    Commit(Payload),
    /// NACKed; discovery restarted under a higher ballot.
    Reprepare,
    Pending,
}

enum AfterSet {
    Committed,
    Reprepare,
    Pending,
}

impl Replica {
    /// Discovery round (coordinator), also used to re-prepare after a
    /// NACK: the slot's current ballot rides on the message.
    pub(crate) fn bcast_rmw_get(&mut self, instance: InstanceId) {
        let (ballot, cmds) = match self.space.get(instance) {
            // Broadcast the retained proposal: the slot's command list
            // can be overwritten by a competing coordinator reusing
            // this slot id.
            Some(inst) => match inst.book.as_ref() {
                Some(book) => (inst.ballot, vec![book.proposal.propose.command]),
                None => (inst.ballot, inst.cmds.clone()),
            },
            None => return,
        };
        self.shared.read().broadcast(peer::In::RmwGet(message::RmwGet {
            leader: self.id,
            instance,
            ballot,
            cmds,
        }));
    }

    /// Peer side of discovery: accept the command under the ballot and
    /// return the current view of the key, or NACK with the higher
    /// ballot this replica has already promised.
    pub(crate) fn handle_rmw_get(&mut self, m: message::RmwGet) {
        let key = match m.cmds.first() {
            Some(cmd) => cmd.key,
            None => return,
        };
        let reply = if self.space.get(m.instance).is_none() {
            if m.ballot < self.default_ballot {
                warn!("instance {}: stale ballot {} from {}", m.instance, m.ballot, m.leader);
                message::RmwGetReply {
                    instance: m.instance,
                    ballot: self.default_ballot,
                    key,
                    payload: self.store.get(key),
                }
            } else {
                self.space.insert(m.instance, Instance::accepted(m.cmds, m.ballot));
                message::RmwGetReply {
                    instance: m.instance,
                    ballot: m.ballot,
                    key,
                    payload: self.store.get(key),
                }
            }
        } else {
            let local = self.store.get(key);
            let inst = match self.space.get_mut(m.instance) {
                Some(inst) => inst,
                None => return,
            };
            if m.ballot < inst.ballot {
                warn!("instance {}: stale ballot {} from {}", m.instance, m.ballot, m.leader);
                message::RmwGetReply { instance: m.instance, ballot: inst.ballot, key, payload: local }
            } else {
                // Reordered or re-prepared accept.
                inst.cmds = m.cmds;
                inst.ballot = m.ballot;
                if inst.status != Status::Committed {
                    inst.status = Status::Accepted;
                }
                message::RmwGetReply { instance: m.instance, ballot: m.ballot, key, payload: local }
            }
        };
        self.shared.read().send(m.leader, peer::In::RmwGetReply(reply));
    }

    /// Coordinator side of discovery. Acks must echo the ballot the
    /// slot currently runs under; anything higher is a NACK, anything
    /// lower is an ack from an abandoned round.
    pub(crate) fn handle_rmw_get_reply(&mut self, reply: message::RmwGetReply) {
        let key = reply.key;
        let local = self.store.get(key);
        let id = self.id;
        let leader = self.is_leader;
        let half = self.count >> 1;

        let after = {
            let inst = match self.space.get_mut(reply.instance) {
                Some(inst) => inst,
                None => return,
            };
            let book = match inst.book.as_mut() {
                Some(book) => book,
                None => return,
            };
            if book.rmw_get_done {
                return;
            }
            if reply.ballot > inst.ballot {
                book.nacks += 1;
                book.max_recv_ballot = book.max_recv_ballot.max(reply.ballot);
                inst.ballot = (((book.max_recv_ballot >> 4) + 1) << 4) | id;
                book.rmw_get_oks = 0;
                book.rmw_replies.clear();
                AfterGet::Reprepare
            } else if reply.ballot < inst.ballot {
                AfterGet::Pending
            } else {
                book.rmw_replies.push(reply.payload);
                book.rmw_get_oks += 1;
                if book.rmw_get_oks + 1 <= half {
                    AfterGet::Pending
                } else {
                    book.rmw_get_done = true;
                    book.nacks = 0;
                    inst.status = Status::Prepared;

                    let mut max = local;
                    for &payload in &book.rmw_replies {
                        if is_newer(max.tag, payload.tag, id, leader) {
                            max = payload;
                        }
                    }
                    book.rmw_replies.clear();
                    let op = match book.proposal.propose.command.op {
                        state::Op::Rmw(op) => op,
                        _ => return,
                    };
                    AfterGet::Commit(Payload {
                        tag: Tag { ts: max.tag.ts + 1, id },
                        value: op.apply(max.value),
                    })
                }
            }
        };

        match after {
            AfterGet::Pending => (),
            AfterGet::Reprepare => {
                debug!("instance {}: re-preparing after nack", reply.instance);
                self.bcast_rmw_get(reply.instance);
            }
            AfterGet::Commit(result) => {
                self.store.insert(key, result);
                self.record_instance(reply.instance);
                self.sync();
                self.bcast_rmw_set(reply.instance, key);
            }
        }
    }

    /// Commit round (coordinator): ship the computed payload together
    /// with the slot's commands.
    pub(crate) fn bcast_rmw_set(&mut self, instance: InstanceId, key: Key) {
        let (ballot, cmds) = match self.space.get(instance) {
            Some(inst) => match inst.book.as_ref() {
                Some(book) => (inst.ballot, vec![book.proposal.propose.command]),
                None => (inst.ballot, inst.cmds.clone()),
            },
            None => return,
        };
        let payload = self.store.get(key);
        self.shared.read().broadcast(peer::In::RmwSet(message::RmwSet {
            leader: self.id,
            instance,
            ballot,
            key,
            payload,
            cmds,
        }));
    }

    /// Peer side of commit: symmetric to `handle_rmw_get`, plus the
    /// payload merge. Tag order makes the merge safe whatever the
    /// interleaving.
    pub(crate) fn handle_rmw_set(&mut self, m: message::RmwSet) {
        if m.cmds.is_empty() {
            return;
        }
        let reply = if self.space.get(m.instance).is_none() {
            if m.ballot < self.default_ballot {
                message::RmwSetReply { instance: m.instance, ok: false, ballot: self.default_ballot }
            } else {
                self.space.insert(m.instance, Instance::accepted(m.cmds, m.ballot));
                message::RmwSetReply { instance: m.instance, ok: true, ballot: m.ballot }
            }
        } else {
            let inst = match self.space.get_mut(m.instance) {
                Some(inst) => inst,
                None => return,
            };
            if inst.ballot > m.ballot {
                message::RmwSetReply { instance: m.instance, ok: false, ballot: inst.ballot }
            } else {
                inst.cmds = m.cmds;
                inst.ballot = m.ballot;
                if inst.status != Status::Committed {
                    inst.status = Status::Accepted;
                }
                message::RmwSetReply { instance: m.instance, ok: true, ballot: m.ballot }
            }
        };
        let local = self.store.get(m.key);
        if is_newer(local.tag, m.payload.tag, self.id, self.is_leader) {
            self.store.insert(m.key, m.payload);
        }
        self.shared.read().send(m.leader, peer::In::RmwSetReply(reply));
    }

    /// Coordinator side of commit: reply to the client once a majority
    /// acknowledged, or restart discovery on a NACK.
    pub(crate) fn handle_rmw_set_reply(&mut self, reply: message::RmwSetReply) {
        let half = self.count >> 1;
        let id = self.id;

        let after = {
            let inst = match self.space.get_mut(reply.instance) {
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
            if !reply.ok {
                if reply.ballot <= inst.ballot {
                    // NACK from a round this slot has already left.
                    AfterSet::Pending
                } else {
                    book.nacks += 1;
                    book.max_recv_ballot = book.max_recv_ballot.max(reply.ballot);
                    inst.ballot = (((book.max_recv_ballot >> 4) + 1) << 4) | id;
                    book.rmw_get_done = false;
                    book.rmw_get_oks = 0;
                    book.rmw_set_oks = 0;
                    book.rmw_replies.clear();
                    AfterSet::Reprepare
                }
            } else if reply.ballot != inst.ballot {
                // Ack from an abandoned round.
                AfterSet::Pending
            } else {
                book.rmw_set_oks += 1;
                if book.rmw_set_oks + 1 > half {
                    AfterSet::Committed
                } else {
                    AfterSet::Pending
                }
            }
        };

        match after {
            AfterSet::Pending => (),
            AfterSet::Reprepare => {
                debug!("instance {}: commit nacked, re-preparing", reply.instance);
                self.bcast_rmw_get(reply.instance);
            }
            AfterSet::Committed => self.reply_client(reply.instance, state::NIL),
        }
    }
}
