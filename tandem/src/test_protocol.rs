//! Protocol scenarios driven over the in-memory cluster: three
//! replicas, deterministic delivery.

use pretty_assertions::assert_eq;

use crate::message::{GetReply, Payload, RmwGet, RmwGetReply, Tag};
use crate::state::NIL;
use crate::testutil::{get, put, rmw, Cluster};
use crate::thread::peer::In;

#[test]
fn single_write_then_read() {
    let mut cluster = Cluster::new(3);

    cluster.propose(0, put(7, 42));
    cluster.pump();
    let reply = cluster.reply(0).expect("write should complete");
    assert!(reply.ok);
    assert_eq!(reply.value, NIL);
    for r in 0..3 {
        assert!(cluster.store(r, 7).tag >= Tag { ts: 1, id: 0 });
        assert_eq!(cluster.store(r, 7).value, 42);
    }

    // Every replica already shares the tag, so the read finishes at
    // the end of discovery without a propagate phase.
    cluster.propose(1, get(7));
    cluster.pump();
    let reply = cluster.reply(1).expect("read should complete");
    assert!(reply.ok);
    assert_eq!(reply.value, 42);
    let inst = cluster.replicas[1].space.get(0).unwrap();
    let book = inst.book.as_ref().unwrap();
    assert!(book.get_done);
    assert_eq!(book.set_oks, 0);
    assert_eq!(book.set_targets, 0);
}

#[test]
fn concurrent_writes_converge_on_the_greater_tag() {
    let mut cluster = Cluster::new(3);

    cluster.propose(0, put(5, 7));
    cluster.propose(1, put(5, 9));
    cluster.pump();

    assert!(cluster.reply(0).expect("first write completes").ok);
    assert!(cluster.reply(1).expect("second write completes").ok);

    // Equal timestamps: the tag minted by the higher-id coordinator
    // wins everywhere.
    let expected = Payload { tag: Tag { ts: 1, id: 1 }, value: 9 };
    for r in 0..3 {
        assert_eq!(cluster.store(r, 5), expected);
    }
}

#[test]
fn partitioned_replica_reads_current_value_after_heal() {
    let mut cluster = Cluster::new(3);

    cluster.partition(2);
    cluster.propose(0, put(1, 9));
    cluster.pump();
    assert!(cluster.reply(0).expect("write completes without replica 2").ok);
    assert_eq!(cluster.store(0, 1).value, 9);
    assert_eq!(cluster.store(1, 1).value, 9);
    assert_eq!(cluster.store(2, 1).value, NIL);

    cluster.heal(2);
    cluster.propose(2, get(1));
    cluster.pump();
    let reply = cluster.reply(2).expect("read completes after heal");
    assert!(reply.ok);
    assert_eq!(reply.value, 9);
    assert_eq!(cluster.store(2, 1).value, 9);
}

#[test]
fn rmw_increments_everywhere_under_a_fresh_tag() {
    let mut cluster = Cluster::new(3);

    cluster.propose(0, put(3, 10));
    cluster.pump();
    assert!(cluster.reply(0).unwrap().ok);
    let before = cluster.store(1, 3).tag;

    cluster.propose(0, rmw(3));
    cluster.pump();
    let reply = cluster.reply(0).expect("rmw completes");
    assert!(reply.ok);
    assert_eq!(reply.value, NIL);
    for r in 0..3 {
        assert_eq!(cluster.store(r, 3).value, 11);
        assert!(cluster.store(r, 3).tag > before);
    }
}

#[test]
fn rmw_racing_a_write_leaves_one_winner() {
    let mut cluster = Cluster::new(3);

    cluster.propose(0, put(4, 100));
    cluster.propose(1, rmw(4));
    cluster.pump();
    assert!(cluster.reply(0).expect("write completes").ok);
    assert!(cluster.reply(1).expect("rmw completes").ok);

    // One of the two tags prevails on every replica; which one is a
    // race, but it is the same one everywhere.
    let winner = cluster.store(0, 4);
    assert!(winner.value == 100 || winner.value == 1);
    for r in 1..3 {
        assert_eq!(cluster.store(r, 4), winner);
    }
}

#[test]
fn duplicate_get_reply_after_discovery_is_ignored() {
    let mut cluster = Cluster::new(3);

    cluster.propose(0, put(2, 5));
    cluster.pump();
    assert!(cluster.reply(0).unwrap().ok);

    cluster.propose(0, get(2));
    cluster.pump();
    assert_eq!(cluster.reply(0).unwrap().value, 5);

    // The read lives in slot 1 and its discovery phase has closed.
    let duplicate = GetReply {
        replica: 1,
        instance: 1,
        ok: true,
        write: false,
        key: 2,
        payload: cluster.store(1, 2),
    };
    cluster.deliver(0, In::GetReply(duplicate));
    cluster.pump();

    let inst = cluster.replicas[0].space.get(1).unwrap();
    let book = inst.book.as_ref().unwrap();
    assert!(book.get_done);
    assert_eq!(book.set_oks, 0);
    assert!(book.get_replies.is_empty());
    // And no second reply reaches the client.
    assert!(cluster.reply(0).is_none());
}

#[test]
fn at_most_one_reply_per_proposal() {
    let mut cluster = Cluster::new(3);
    cluster.propose(0, put(8, 1));
    cluster.pump();
    // Both peers acknowledge the propagate phase; only the first
    // acknowledgement past the majority answers the client.
    assert!(cluster.reply(0).is_some());
    assert!(cluster.reply(0).is_none());
}

#[test]
fn stale_rmw_get_is_nacked_with_the_promised_ballot() {
    let mut cluster = Cluster::new(3);

    // Replica 1 accepts slot 0 under ballot 18 (= (1 << 4) | 2).
    cluster.deliver(1, In::RmwGet(RmwGet {
        leader: 2,
        instance: 0,
        ballot: 18,
        cmds: vec![rmw(6)],
    }));
    let frames = cluster.take_frames(1, 2);
    assert!(matches!(frames.as_slice(), [In::RmwGetReply(reply)] if reply.ballot == 18));

    // A lower ballot for the same slot is answered with the promise,
    // not obeyed.
    cluster.deliver(1, In::RmwGet(RmwGet {
        leader: 0,
        instance: 0,
        ballot: 0,
        cmds: vec![rmw(6)],
    }));
    let frames = cluster.take_frames(1, 0);
    assert!(matches!(frames.as_slice(), [In::RmwGetReply(reply)] if reply.ballot == 18));
    let inst = cluster.replicas[1].space.get(0).unwrap();
    assert_eq!(inst.ballot, 18);
}

#[test]
fn nacked_coordinator_reprepares_above_the_observed_ballot() {
    let mut cluster = Cluster::new(3);

    cluster.propose(0, rmw(9));
    // Drop the initial discovery broadcast and answer with a NACK
    // from a peer that has promised ballot 18.
    cluster.take_frames(0, 1);
    cluster.take_frames(0, 2);
    cluster.deliver(0, In::RmwGetReply(RmwGetReply {
        instance: 0,
        ballot: 18,
        key: 9,
        payload: Payload::empty(),
    }));

    let frames = cluster.take_frames(0, 1);
    match frames.as_slice() {
        [In::RmwGet(m)] => assert_eq!(m.ballot, 32),
        other => panic!("expected one re-prepared RmwGet, got {:?}", other),
    }
    // The copy for the other peer carries the same ballot; let the
    // protocol finish normally from here.
    cluster.pump();
    let reply = cluster.reply(0).expect("rmw completes after re-prepare");
    assert!(reply.ok);
    assert_eq!(cluster.store(0, 9).value, 1);
}

#[test]
fn tags_never_regress_under_a_mixed_workload() {
    let mut cluster = Cluster::new(3);
    let mut high = [Tag::default(); 3];

    let ops = [
        (0, put(11, 1)),
        (1, put(11, 2)),
        (2, rmw(11)),
        (0, get(11)),
        (1, rmw(11)),
        (2, put(11, 9)),
        (0, get(11)),
    ];
    for (at, command) in ops {
        cluster.propose(at, command);
        cluster.pump();
        assert!(cluster.reply(at).expect("operation completes").ok);
        for r in 0..3 {
            let tag = cluster.store(r, 11).tag;
            assert!(tag >= high[r], "tag regressed on replica {}", r);
            high[r] = tag;
        }
    }

    // Sequential operations leave every replica converged.
    assert_eq!(cluster.store(0, 11), cluster.store(1, 11));
    assert_eq!(cluster.store(1, 11), cluster.store(2, 11));
}
