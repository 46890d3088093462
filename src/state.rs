// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

use crate::{ParticipantId, TxnId, Vote};
use im::{OrdMap as ArcOrdMap, OrdSet as ArcOrdSet};
use serde::{Deserialize, Serialize};

/// What a coordinator tracks for the one transaction it has in flight.
///
/// `outstanding` is redundant with `targets` and `seen`, but it's the number
/// the protocol is phrased in terms of, so we keep it and check the two
/// agree in `is_consistent`.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct TxnState {
    pub id: TxnId,
    pub targets: ArcOrdSet<ParticipantId>,
    pub(crate) unsent: ArcOrdSet<ParticipantId>,
    pub outstanding: usize,
    pub seen: ArcOrdMap<ParticipantId, Vote>,
}

impl TxnState {
    pub fn new(id: TxnId, targets: ArcOrdSet<ParticipantId>) -> Self {
        TxnState {
            id,
            outstanding: targets.len(),
            unsent: targets.clone(),
            targets,
            seen: ArcOrdMap::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.outstanding == 0
    }

    /// `outstanding = |targets| - |seen|` and `seen ⊆ targets`.
    pub fn is_consistent(&self) -> bool {
        self.seen.len() <= self.targets.len()
            && self.outstanding == self.targets.len() - self.seen.len()
            && self.seen.keys().all(|p| self.targets.contains(p))
            && self.unsent.iter().all(|p| self.targets.contains(p))
    }
}

/// A finished transaction: who was asked, and what each of them said.
#[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: TxnId,
    pub votes: ArcOrdMap<ParticipantId, Vote>,
}

impl TransactionRecord {
    pub fn participants(&self) -> ArcOrdSet<ParticipantId> {
        self.votes.keys().copied().collect()
    }

    /// One possible outcome rule layered on top of the collected votes. The
    /// protocol itself never consults it.
    pub fn unanimous_commit(&self) -> bool {
        self.votes.values().all(|v| *v == Vote::Commit)
    }
}

impl From<TxnState> for TransactionRecord {
    fn from(txn: TxnState) -> Self {
        TransactionRecord {
            id: txn.id,
            votes: txn.seen,
        }
    }
}
