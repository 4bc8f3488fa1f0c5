//! # Summary
//!
//! The instance space: one slot per in-flight or finished operation,
//! indexed by a monotonically allocated instance id, plus the
//! coordinator-side bookkeeping attached to slots this replica drives.

use hashbrown::HashSet;

use crate::message::{Ballot, InstanceId, Payload, ReplicaId, Tag};
use crate::state;
use crate::thread::replica::Proposal;

/// Slot status. Only ever advances.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Status {
    Preparing,
    Prepared,
    Accepted,
    Committed,
}

impl Status {
    pub fn as_byte(self) -> u8 {
        match self {
            Status::Preparing => 0,
            Status::Prepared => 1,
            Status::Accepted => 2,
            Status::Committed => 3,
        }
    }
}

/// One slot in the instance space.
pub struct Instance {
    pub cmds: Vec<state::Command>,
    pub ballot: Ballot,
    pub status: Status,
    /// Coordinator's tag for the key at dispatch time; read path only.
    pub initial_tag: Tag,
    /// Present only on the replica coordinating this slot.
    pub book: Option<Book>,
}

impl Instance {
    /// Slot created on behalf of a local client proposal.
    pub fn coordinator(cmds: Vec<state::Command>, ballot: Ballot, proposal: Proposal) -> Self {
        Instance {
            cmds,
            ballot,
            status: Status::Preparing,
            initial_tag: Tag::default(),
            book: Some(Book::new(proposal)),
        }
    }

    /// Slot created because a peer message referred to it.
    pub fn accepted(cmds: Vec<state::Command>, ballot: Ballot) -> Self {
        Instance {
            cmds,
            ballot,
            status: Status::Accepted,
            initial_tag: Tag::default(),
            book: None,
        }
    }
}

/// Coordinator bookkeeping for a slot: quorum tallies, phase flags,
/// and the payloads collected during discovery.
pub struct Book {
    pub proposal: Proposal,
    pub max_recv_ballot: Ballot,
    pub get_oks: usize,
    pub set_oks: usize,
    /// Number of peers actually messaged in the propagate phase.
    pub set_targets: usize,
    pub rmw_get_oks: usize,
    pub rmw_set_oks: usize,
    pub nacks: usize,
    /// Peers whose discovery reply already carried the max tag.
    pub has_max_tag: HashSet<ReplicaId>,
    pub get_done: bool,
    pub rmw_get_done: bool,
    pub completed: bool,
    /// Register discovery replies, with the responding peer.
    pub get_replies: Vec<(ReplicaId, Payload)>,
    /// RMW discovery payloads.
    pub rmw_replies: Vec<Payload>,
}

impl Book {
    fn new(proposal: Proposal) -> Self {
        Book {
            proposal,
            max_recv_ballot: 0,
            get_oks: 0,
            set_oks: 0,
            set_targets: 0,
            rmw_get_oks: 0,
            rmw_set_oks: 0,
            nacks: 0,
            has_max_tag: HashSet::default(),
            get_done: false,
            rmw_get_done: false,
            completed: false,
            get_replies: Vec::new(),
            rmw_replies: Vec::new(),
        }
    }
}

/// Sparse slot-indexed sequence. Slots are never reclaimed.
pub struct Space {
    slots: Vec<Option<Instance>>,
}

impl Space {
    pub fn new() -> Self {
        Space { slots: Vec::with_capacity(1024) }
    }

    pub fn get(&self, id: InstanceId) -> Option<&Instance> {
        self.slots.get(id as usize).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: InstanceId) -> Option<&mut Instance> {
        self.slots.get_mut(id as usize).and_then(Option::as_mut)
    }

    pub fn insert(&mut self, id: InstanceId, instance: Instance) {
        let index = id as usize;
        if index >= self.slots.len() {
            self.slots.resize_with(index + 1, || None);
        }
        self.slots[index] = Some(instance);
    }

    /// First unused slot at or after `from`.
    pub fn first_free_from(&self, from: InstanceId) -> InstanceId {
        let mut id = from;
        while self.get(id).is_some() {
            id += 1;
        }
        id
    }
}
