// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

use crate::{Error, Result, TxnId};
use im::OrdSet as ArcOrdSet;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Where transaction identifiers come from.
#[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdSupply {
    /// A finite universe. Allocation fails with `Exhausted` once every id is
    /// allocated or completed; used for verification and bounded test runs.
    Bounded(Vec<u64>),
    /// A monotonic counter starting at `start`. Only exhausts if it reaches
    /// `u64::MAX`, which is never handed out.
    Unbounded { start: u64 },
}

impl IdSupply {
    pub fn range(ids: std::ops::RangeInclusive<u64>) -> Self {
        IdSupply::Bounded(ids.collect())
    }
}

/// The allocation and completion state behind a `Registry`, without the lock.
///
/// Kept as a plain hashable value so the model checker can snapshot it, and
/// so every operation is a single `&mut self` step that the `Registry` can
/// run inside one critical section.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct IdSpace {
    universe: Option<ArcOrdSet<TxnId>>,
    next: u64,
    allocated: ArcOrdSet<TxnId>,
    // Only tracked for bounded supplies; an unbounded counter never revisits
    // an id, so completion there is just a count.
    completed: ArcOrdSet<TxnId>,
    completed_count: u64,
}

impl IdSpace {
    pub fn new(supply: &IdSupply) -> Self {
        let (universe, next) = match supply {
            IdSupply::Bounded(ids) => (Some(ids.iter().copied().map(TxnId).collect()), 0),
            IdSupply::Unbounded { start } => (None, *start),
        };
        IdSpace {
            universe,
            next,
            allocated: ArcOrdSet::new(),
            completed: ArcOrdSet::new(),
            completed_count: 0,
        }
    }

    /// Ids that `claim` would currently accept, lowest first. For an
    /// unbounded supply this is just the next counter value.
    pub fn available(&self) -> Vec<TxnId> {
        match &self.universe {
            Some(universe) => universe
                .iter()
                .filter(|id| !self.allocated.contains(id) && !self.completed.contains(id))
                .copied()
                .collect(),
            None if self.next == u64::MAX => Vec::new(),
            None => vec![TxnId(self.next)],
        }
    }

    pub fn allocate(&mut self) -> Result<TxnId> {
        let id = match &self.universe {
            Some(_) => match self.available().first() {
                Some(id) => *id,
                None => return Err(Error::Exhausted),
            },
            None if self.next == u64::MAX => return Err(Error::Exhausted),
            None => TxnId(self.next),
        };
        self.claim(id)?;
        Ok(id)
    }

    /// Allocate a specific id.
    pub fn claim(&mut self, id: TxnId) -> Result<()> {
        if self.allocated.contains(&id) || self.completed.contains(&id) {
            return Err(Error::DuplicateAllocation(id));
        }
        match &self.universe {
            Some(universe) if !universe.contains(&id) => return Err(Error::UnknownIdentifier(id)),
            Some(_) => (),
            None => {
                if id.0 < self.next {
                    return Err(Error::DuplicateAllocation(id));
                }
                self.next = id.0.checked_add(1).ok_or(Error::Exhausted)?;
            }
        }
        self.allocated.insert(id);
        trace!("allocated {}", id);
        Ok(())
    }

    pub fn complete(&mut self, id: TxnId) -> Result<()> {
        if self.allocated.remove(&id).is_none() {
            return Err(Error::UnknownIdentifier(id));
        }
        if self.universe.is_some() {
            self.completed.insert(id);
        }
        self.completed_count += 1;
        trace!("completed {}", id);
        Ok(())
    }

    pub fn is_allocated(&self, id: TxnId) -> bool {
        self.allocated.contains(&id)
    }

    pub fn is_completed(&self, id: TxnId) -> bool {
        match &self.universe {
            Some(_) => self.completed.contains(&id),
            None => id.0 < self.next && !self.allocated.contains(&id),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.allocated.len()
    }

    pub fn completed_count(&self) -> u64 {
        self.completed_count
    }

    pub fn is_exhausted(&self) -> bool {
        match &self.universe {
            Some(universe) => self.allocated.len() + self.completed.len() == universe.len(),
            None => self.next == u64::MAX,
        }
    }

    /// Bounded: every id in the universe has completed. Unbounded: nothing
    /// is in flight.
    pub fn all_completed(&self) -> bool {
        match &self.universe {
            Some(universe) => self.completed.len() == universe.len(),
            None => self.allocated.is_empty(),
        }
    }
}

/// The shared, thread-safe identifier registry.
#[derive(Debug)]
pub struct Registry {
    space: Mutex<IdSpace>,
}

impl Registry {
    pub fn new(supply: &IdSupply) -> Self {
        Registry {
            space: Mutex::new(IdSpace::new(supply)),
        }
    }

    pub fn allocate(&self) -> Result<TxnId> {
        self.space.lock().allocate()
    }

    pub fn complete(&self, id: TxnId) -> Result<()> {
        self.space.lock().complete(id)
    }

    pub fn in_flight(&self) -> usize {
        self.space.lock().in_flight()
    }

    pub fn completed_count(&self) -> u64 {
        self.space.lock().completed_count()
    }

    pub fn is_exhausted(&self) -> bool {
        self.space.lock().is_exhausted()
    }

    pub fn all_completed(&self) -> bool {
        self.space.lock().all_completed()
    }

    /// A consistent copy of the current state.
    pub fn snapshot(&self) -> IdSpace {
        self.space.lock().clone()
    }
}
