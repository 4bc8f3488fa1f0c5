//! # Summary
//!
//! This module abstracts over external connections to clients and peer
//! replicas.
//!
//! A TCP stream is split into a receiving and a transmitting half,
//! each wrapped in a length-delimited frame codec carrying
//! `bincode`-encoded Rust data. This allows us to serialize and
//! deserialize Rust structs through a TCP connection with minimal
//! boilerplate on the sending and receiving ends.

use std::io;
use std::marker::PhantomData;

use bytes::Bytes;
use futures::SinkExt;
use futures::StreamExt;
use tokio::net;
use tokio::net::tcp;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

pub struct Rx<T> {
    frames: FramedRead<tcp::OwnedReadHalf, LengthDelimitedCodec>,
    _marker: PhantomData<T>,
}

pub struct Tx<T> {
    frames: FramedWrite<tcp::OwnedWriteHalf, LengthDelimitedCodec>,
    _marker: PhantomData<T>,
}

/// Split a connected stream into typed receiving and transmitting
/// halves.
pub fn split<R, T>(stream: net::TcpStream) -> (Rx<R>, Tx<T>)
where
    R: serde::de::DeserializeOwned,
    T: serde::Serialize,
{
    let (rx, tx) = stream.into_split();
    let rx = FramedRead::new(rx, LengthDelimitedCodec::new());
    let tx = FramedWrite::new(tx, LengthDelimitedCodec::new());
    (
        Rx { frames: rx, _marker: PhantomData },
        Tx { frames: tx, _marker: PhantomData },
    )
}

impl<T: serde::de::DeserializeOwned> Rx<T> {
    /// Next decoded message, or `None` once the connection is closed
    /// or produces an undecodable frame.
    pub async fn recv(&mut self) -> Option<T> {
        let frame = match self.frames.next().await? {
            Ok(frame) => frame,
            Err(_) => return None,
        };
        bincode::deserialize(&frame).ok()
    }
}

impl<T: serde::Serialize> Tx<T> {
    pub async fn send(&mut self, message: &T) -> io::Result<()> {
        let bytes = bincode::serialize(message)
            .expect("[INTERNAL ERROR]: failed to serialize message");
        self.frames.send(Bytes::from(bytes)).await
    }
}
