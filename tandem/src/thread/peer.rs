//! # Summary
//!
//! Connections between replicas. Each link is one TCP stream carrying
//! length-delimited bincode frames of `In`. The dialing side announces
//! itself with a `Ping`; the accepting side waits for that ping to
//! learn who it is talking to.
//!
//! A `Peer` task forwards frames in both directions: decoded frames
//! are routed into the worker's typed inboxes, and messages queued on
//! the hub are written out. Dropping the task marks the peer dead so
//! broadcasts skip it.

use std::time::Duration;

use serde_derive::{Deserialize, Serialize};
use tokio::net;

use crate::internal;
use crate::message;
use crate::message::ReplicaId;
use crate::shared::Shared;
use crate::socket;
use crate::thread::Tx;

/// Frames exchanged between replicas.
#[derive(Serialize, Deserialize)]
#[derive(Clone, Debug)]
pub enum In {
    Ping(ReplicaId),
    Get(message::Get),
    GetReply(message::GetReply),
    Set(message::Set),
    SetReply(message::SetReply),
    RmwGet(message::RmwGet),
    RmwGetReply(message::RmwGetReply),
    RmwSet(message::RmwSet),
    RmwSetReply(message::RmwSetReply),
}

/// Per-RPC-kind inbox registration: hands each decoded frame to the
/// worker inbox of its kind.
#[derive(Clone)]
pub struct Router {
    pub get: Tx<message::Get>,
    pub get_reply: Tx<message::GetReply>,
    pub set: Tx<message::Set>,
    pub set_reply: Tx<message::SetReply>,
    pub rmw_get: Tx<message::RmwGet>,
    pub rmw_get_reply: Tx<message::RmwGetReply>,
    pub rmw_set: Tx<message::RmwSet>,
    pub rmw_set_reply: Tx<message::RmwSetReply>,
}

impl Router {
    pub fn route(&self, message: In) {
        match message {
            In::Ping(_) => (),
            In::Get(m) => self.get.try_send(m),
            In::GetReply(m) => self.get_reply.try_send(m),
            In::Set(m) => self.set.try_send(m),
            In::SetReply(m) => self.set_reply.try_send(m),
            In::RmwGet(m) => self.rmw_get.try_send(m),
            In::RmwGetReply(m) => self.rmw_get_reply.try_send(m),
            In::RmwSet(m) => self.rmw_set.try_send(m),
            In::RmwSetReply(m) => self.rmw_set_reply.try_send(m),
        }
    }
}

/// An accepted connection whose peer has not identified itself yet.
pub struct Connecting {
    self_id: ReplicaId,
    sock_rx: socket::Rx<In>,
    sock_tx: socket::Tx<In>,
    router: Router,
    shared: Shared,
}

impl Connecting {
    pub fn new(self_id: ReplicaId, stream: net::TcpStream, router: Router, shared: Shared) -> Self {
        let (sock_rx, sock_tx) = socket::split(stream);
        Connecting { self_id, sock_rx, sock_tx, router, shared }
    }

    /// Wait for the peer's `Ping`, then promote to a registered link.
    pub async fn run(mut self) -> Option<Peer> {
        while let Some(message) = self.sock_rx.recv().await {
            if let In::Ping(peer_id) = message {
                info!("replica {} connected", peer_id);
                let (rx, tx) = internal::new();
                self.shared.write().connect_peer(peer_id, tx);
                return Some(Peer {
                    self_id: self.self_id,
                    peer_id,
                    rx,
                    sock_rx: self.sock_rx,
                    sock_tx: self.sock_tx,
                    router: self.router,
                    shared: self.shared,
                });
            }
        }
        None
    }
}

/// Dial a peer, retrying until it is up, and announce ourselves.
pub async fn connect(
    self_id: ReplicaId,
    peer_id: ReplicaId,
    address: String,
    router: Router,
    shared: Shared,
) -> Peer {
    let stream = loop {
        match net::TcpStream::connect(&address).await {
            Ok(stream) => break stream,
            Err(_) => tokio::time::sleep(Duration::from_millis(100)).await,
        }
    };
    let (sock_rx, mut sock_tx) = socket::split(stream);
    sock_tx.send(&In::Ping(self_id)).await.ok();
    let (rx, tx) = internal::new();
    shared.write().connect_peer(peer_id, tx);
    info!("connected to replica {}", peer_id);
    Peer { self_id, peer_id, rx, sock_rx, sock_tx, router, shared }
}

/// A registered link to one peer.
pub struct Peer {
    self_id: ReplicaId,
    peer_id: ReplicaId,
    /// Outbound queue filled by the hub.
    rx: internal::Rx<In>,
    sock_rx: socket::Rx<In>,
    sock_tx: socket::Tx<In>,
    router: Router,
    shared: Shared,
}

impl Peer {
    pub async fn run(mut self) {
        let mut ping = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = ping.tick() => {
                    // Doubles as liveness probe; a dead link errors out.
                    if self.sock_tx.send(&In::Ping(self.self_id)).await.is_err() {
                        break;
                    }
                }
                incoming = self.sock_rx.recv() => match incoming {
                    Some(message) => self.router.route(message),
                    None => break,
                },
                outgoing = self.rx.recv() => match outgoing {
                    Some(message) => {
                        if self.sock_tx.send(&message).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        info!("replica {} disconnected", self.peer_id);
        self.shared.write().disconnect_peer(self.peer_id);
    }
}
