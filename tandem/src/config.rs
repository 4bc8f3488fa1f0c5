//! # Summary
//!
//! Replica configuration and launch: wires the typed inboxes, the
//! shared hub, stable storage, and the listener and dialer tasks
//! around one protocol worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::internal;
use crate::message::ReplicaId;
use crate::shared;
use crate::storage;
use crate::thread;
use crate::thread::replica::{Control, Inboxes, Replica};

/// Base port for replica-to-replica links; replica `i` listens on
/// `REPLICA_PORT + i`.
const REPLICA_PORT: u16 = 20000;

#[derive(Copy, Clone, Debug)]
pub struct Config {
    /// Unique replica ID
    id: ReplicaId,

    /// Port for incoming client requests
    port: u16,

    /// Total number of replicas
    count: usize,

    /// Whether to append protocol checkpoints to stable storage
    durable: bool,

    /// Whether this replica starts out believing it is the leader
    leader: bool,
}

impl Config {
    pub fn new(id: ReplicaId, port: u16, count: usize) -> Self {
        Config { id, port, count, durable: false, leader: false }
    }

    pub fn with_durability(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn with_leader(mut self, leader: bool) -> Self {
        self.leader = leader;
        self
    }

    /// Launch the replica. Resolves once the listeners are bound; the
    /// returned handle controls the running replica.
    pub async fn run(self) -> Handle {
        let (get_rx, get_tx) = internal::new();
        let (get_reply_rx, get_reply_tx) = internal::new();
        let (set_rx, set_tx) = internal::new();
        let (set_reply_rx, set_reply_tx) = internal::new();
        let (rmw_get_rx, rmw_get_tx) = internal::new();
        let (rmw_get_reply_rx, rmw_get_reply_tx) = internal::new();
        let (rmw_set_rx, rmw_set_tx) = internal::new();
        let (rmw_set_reply_rx, rmw_set_reply_tx) = internal::new();
        let (propose_rx, propose_tx) = internal::new();
        let (control_rx, control_tx) = internal::new();

        let router = thread::peer::Router {
            get: get_tx,
            get_reply: get_reply_tx,
            set: set_tx,
            set_reply: set_reply_tx,
            rmw_get: rmw_get_tx,
            rmw_get_reply: rmw_get_reply_tx,
            rmw_set: rmw_set_tx,
            rmw_set_reply: rmw_set_reply_tx,
        };
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

        let shared = shared::Shared::new(self.id, self.count);
        let shutdown = Arc::new(AtomicBool::new(false));
        let log = if self.durable {
            Some(storage::Log::new(format!("replica-{:>02}.tandem", self.id)))
        } else {
            None
        };

        let replica = Replica::new(
            self.id,
            self.count,
            self.leader,
            shared.clone(),
            log,
            inboxes,
            shutdown.clone(),
        );
        tokio::spawn(replica.run());

        // Replica-to-replica links: accept from higher ids, dial lower
        // ids.
        let peer_listener = tokio::net::TcpListener::bind(("127.0.0.1", REPLICA_PORT + self.id as u16))
            .await
            .expect("[INTERNAL ERROR]: failed to bind replica port");
        let self_id = self.id;
        let accept_router = router.clone();
        let accept_shared = shared.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = peer_listener.accept().await {
                let connecting = thread::peer::Connecting::new(
                    self_id,
                    stream,
                    accept_router.clone(),
                    accept_shared.clone(),
                );
                tokio::spawn(async move {
                    if let Some(peer) = connecting.run().await {
                        peer.run().await;
                    }
                });
            }
        });

        for peer_id in 0..self.id {
            let address = format!("127.0.0.1:{}", REPLICA_PORT + peer_id as u16);
            let router = router.clone();
            let shared = shared.clone();
            tokio::spawn(async move {
                let peer = thread::peer::connect(self_id, peer_id, address, router, shared).await;
                peer.run().await;
            });
        }

        // Client connections.
        let client_listener = tokio::net::TcpListener::bind(("127.0.0.1", self.port))
            .await
            .expect("[INTERNAL ERROR]: failed to bind client port");
        let client_shared = shared.clone();
        tokio::spawn(async move {
            let mut token = 0;
            while let Ok((stream, _)) = client_listener.accept().await {
                let client = thread::client::Client::new(
                    token,
                    stream,
                    propose_tx.clone(),
                    client_shared.clone(),
                );
                token += 1;
                tokio::spawn(client.run());
            }
        });

        info!("replica {} listening on port {}", self.id, self.port);
        Handle { control: control_tx, shutdown }
    }
}

/// Control surface of a launched replica.
pub struct Handle {
    control: internal::Tx<Control>,
    shutdown: Arc<AtomicBool>,
}

impl Handle {
    /// Tell the replica it is now the leader. Leadership arrives from
    /// the outside; the core runs no election.
    pub fn be_the_leader(&self) {
        self.control.try_send(Control::BeTheLeader);
    }

    /// Ask the replica to stop. Advisory: in-flight operations are not
    /// aborted, and the worker exits at its next loop iteration.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}
