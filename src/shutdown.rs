// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use std::sync::Arc;

/// A cloneable cancellation token.
///
/// Nothing is ever sent on the inner channel: triggering drops the only
/// sender, so every clone's receiver becomes disconnected at once. That makes
/// the signal usable as one arm of a `crossbeam_channel::select!`, which is
/// how channel reads and bounded sends observe it while suspended.
#[derive(Clone, Debug)]
pub struct Shutdown {
    trigger: Arc<Mutex<Option<Sender<()>>>>,
    signal: Receiver<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::bounded(0);
        Shutdown {
            trigger: Arc::new(Mutex::new(Some(tx))),
            signal: rx,
        }
    }

    /// Idempotent.
    pub fn trigger(&self) {
        self.trigger.lock().take();
    }

    pub fn is_triggered(&self) -> bool {
        matches!(self.signal.try_recv(), Err(TryRecvError::Disconnected))
    }

    pub(crate) fn signal(&self) -> &Receiver<()> {
        &self.signal
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
