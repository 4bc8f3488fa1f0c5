//! # Summary
//!
//! This module defines external connections to clients. Responsible
//! for turning incoming `Propose` frames into coordinator proposals
//! and draining replies back out.

use tokio::net;

use crate::internal;
use crate::message;
use crate::shared::Shared;
use crate::socket;
use crate::thread::replica;
use crate::thread::Tx;

pub struct Client {
    /// Connection token; the worker answers through the hub by token.
    token: usize,
    rx: internal::Rx<message::ProposeReply>,
    sock_rx: socket::Rx<message::Propose>,
    sock_tx: socket::Tx<message::ProposeReply>,
    propose_tx: Tx<replica::Proposal>,
    shared: Shared,
}

impl Client {
    pub fn new(
        token: usize,
        stream: net::TcpStream,
        propose_tx: Tx<replica::Proposal>,
        shared: Shared,
    ) -> Self {
        let (sock_rx, sock_tx) = socket::split(stream);
        let (rx, tx) = internal::new();
        shared.write().connect_client(token, tx);
        info!("client {} connected", token);
        Client { token, rx, sock_rx, sock_tx, propose_tx, shared }
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                incoming = self.sock_rx.recv() => match incoming {
                    Some(propose) => {
                        trace!("client {}: {:?}", self.token, propose);
                        self.propose_tx.send(replica::Proposal {
                            propose,
                            client: self.token,
                        });
                    }
                    None => break,
                },
                outgoing = self.rx.recv() => match outgoing {
                    Some(reply) => {
                        if self.sock_tx.send(&reply).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        info!("client {} disconnected", self.token);
        self.shared.write().disconnect_client(self.token);
    }
}
