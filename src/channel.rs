// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

use crate::{Error, Result, Shutdown};
use crossbeam_channel::{select, Receiver, Sender, TryRecvError};

/// Create a FIFO channel owned by `owner` (used only in diagnostics).
///
/// With `capacity == None` the channel is unbounded and `send` never blocks.
/// With `Some(n)` a full channel blocks senders until the reader catches up
/// or shutdown is triggered.
pub fn channel<T>(owner: impl Into<String>, capacity: Option<usize>) -> (Outbox<T>, Inbox<T>) {
    let (tx, rx) = match capacity {
        None => crossbeam_channel::unbounded(),
        Some(n) => crossbeam_channel::bounded(n),
    };
    let owner = owner.into();
    (
        Outbox {
            owner: owner.clone(),
            tx,
        },
        Inbox { owner, rx },
    )
}

/// Writing end. Any number of clones may send concurrently.
#[derive(Debug)]
pub struct Outbox<T> {
    owner: String,
    tx: Sender<T>,
}

impl<T> Clone for Outbox<T> {
    fn clone(&self) -> Self {
        Outbox {
            owner: self.owner.clone(),
            tx: self.tx.clone(),
        }
    }
}

impl<T> Outbox<T> {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn send(&self, msg: T, shutdown: &Shutdown) -> Result<()> {
        if self.tx.capacity().is_none() {
            return self
                .tx
                .send(msg)
                .map_err(|_| Error::ChannelClosed(self.owner.clone()));
        }
        select! {
            send(self.tx, msg) -> res => res.map_err(|_| Error::ChannelClosed(self.owner.clone())),
            recv(shutdown.signal()) -> _ => Err(Error::Shutdown),
        }
    }
}

/// Reading end. Deliberately not `Clone`: each channel has one reader.
#[derive(Debug)]
pub struct Inbox<T> {
    owner: String,
    rx: Receiver<T>,
}

impl<T> Inbox<T> {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Suspend until a message arrives. Returns `None` once shutdown has been
    /// triggered, even if messages are still queued.
    pub fn recv(&self, shutdown: &Shutdown) -> Option<T> {
        if shutdown.is_triggered() {
            return None;
        }
        select! {
            recv(self.rx) -> msg => msg.ok(),
            recv(shutdown.signal()) -> _ => None,
        }
    }

    pub fn try_recv(&self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(msg) => Some(msg),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
