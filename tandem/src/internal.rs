//! # Summary
//!
//! This module abstracts over internal connections between tasks.
//!
//! Currently backed by `tokio::sync::mpsc` unbounded channels. Since
//! the channels are unbounded, the only way for a send to fail is if
//! the receiving end has been dropped, which should be impossible
//! unless there's some logic error in the implementation. This is why
//! the `send` method on `Tx` calls `expect` internally.

use tokio::sync::mpsc;

/// Intra-replica receiving channel.
#[derive(Debug)]
pub struct Rx<T>(mpsc::UnboundedReceiver<T>);

/// Intra-replica transmitting channel. All clones send to the same
/// receiving end.
#[derive(Debug)]
pub struct Tx<T>(mpsc::UnboundedSender<T>);

impl<T> Clone for Tx<T> {
    fn clone(&self) -> Self {
        Tx(self.0.clone())
    }
}

/// Create a new pair of linked receiving and transmitting channels.
pub fn new<T>() -> (Rx<T>, Tx<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Rx(rx), Tx(tx))
}

impl<T> Tx<T> {
    /// Force a message through the channel.
    /// Panics if the receiving end has been dropped.
    pub fn send(&self, message: T) {
        self.0
            .send(message)
            .ok()
            .expect("[INTERNAL ERROR]: receiver dropped");
    }

    /// Attempt to send a message through the channel.
    /// Does nothing if the receiving end has been dropped.
    pub fn try_send(&self, message: T) {
        self.0.send(message).ok();
    }
}

impl<T> Rx<T> {
    pub async fn recv(&mut self) -> Option<T> {
        self.0.recv().await
    }
}

#[cfg(test)]
impl<T> Rx<T> {
    /// Drain one message if immediately available.
    pub fn try_recv(&mut self) -> Option<T> {
        self.0.try_recv().ok()
    }
}
