// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

use crate::{
    CoordinatorId, Error, MismatchKind, ParticipantId, Request, Response, Result,
    TransactionRecord, TxnId, TxnState,
};
use im::OrdSet as ArcOrdSet;
use tracing::{debug, trace};

// As with participants, the coordinator is an explicit state machine rather
// than a blocking loop: each call performs one transition (or one send, or
// accepts one response) and never touches a channel. The runtime drives it
// from a thread; the model checker drives it one action at a time and
// snapshots it between actions.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum CoordinatorStage {
    Selecting,  // Between transactions; next step is allocate + select.
    Sending,    // Fanning requests out to the target set.
    Awaiting,   // Draining our channel until every target has answered.
    Completing, // All answers in; id not yet marked complete.
    Done,       // Shut down or out of identifiers.
}

impl CoordinatorStage {
    fn name(self) -> &'static str {
        match self {
            CoordinatorStage::Selecting => "selecting",
            CoordinatorStage::Sending => "sending",
            CoordinatorStage::Awaiting => "awaiting responses",
            CoordinatorStage::Completing => "completing",
            CoordinatorStage::Done => "done",
        }
    }
}

/// A `Coordinator` runs one transaction at a time: given an identifier and a
/// non-empty subset of the participants it knows about, it emits one
/// `Request` per target, then accepts exactly one matching `Response` per
/// target, in any order, before reporting the transaction finished.
///
/// It never learns whether a target is alive, and never aggregates the votes
/// it collects into a decision; the finished `TransactionRecord` just carries
/// them.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct Coordinator {
    pub id: CoordinatorId,
    known: ArcOrdSet<ParticipantId>,
    stage: CoordinatorStage,
    txn: Option<TxnState>,
}

impl Coordinator {
    pub fn new<I>(id: CoordinatorId, known: I) -> Self
    where
        I: IntoIterator<Item = ParticipantId>,
    {
        Coordinator {
            id,
            known: known.into_iter().collect(),
            stage: CoordinatorStage::Selecting,
            txn: None,
        }
    }

    pub fn known(&self) -> &ArcOrdSet<ParticipantId> {
        &self.known
    }

    pub fn stage(&self) -> CoordinatorStage {
        self.stage
    }

    /// The transaction in flight, if any.
    pub fn current(&self) -> Option<&TxnState> {
        self.txn.as_ref()
    }

    pub fn is_done(&self) -> bool {
        self.stage == CoordinatorStage::Done
    }

    fn expect_stage(&self, want: CoordinatorStage, step: &'static str) -> Result<()> {
        if self.stage == want {
            Ok(())
        } else {
            Err(Error::InvalidStage {
                unit: self.id.to_string(),
                step,
                stage: self.stage.name(),
            })
        }
    }

    /// Check a selection policy's answer without changing any state.
    pub fn validate_subset(&self, subset: &ArcOrdSet<ParticipantId>) -> Result<()> {
        if subset.is_empty() {
            return Err(Error::EmptySubset);
        }
        match subset.iter().find(|p| !self.known.contains(p)) {
            Some(p) => Err(Error::UnknownParticipant(*p)),
            None => Ok(()),
        }
    }

    /// Start transaction `txn` against `subset`.
    pub fn begin(&mut self, txn: TxnId, subset: ArcOrdSet<ParticipantId>) -> Result<()> {
        self.expect_stage(CoordinatorStage::Selecting, "begin")?;
        self.validate_subset(&subset)?;
        debug!(
            "coordinator {} begins {} with {} participant(s)",
            self.id,
            txn,
            subset.len()
        );
        self.txn = Some(TxnState::new(txn, subset));
        self.stage = CoordinatorStage::Sending;
        Ok(())
    }

    /// The next request to deliver. Handing out the last one moves the
    /// coordinator on to awaiting responses; outside the sending stage this
    /// is always `None`.
    pub fn next_request(&mut self) -> Option<(ParticipantId, Request)> {
        if self.stage != CoordinatorStage::Sending {
            return None;
        }
        let txn = self.txn.as_mut()?;
        let p = txn.unsent.remove_min()?;
        trace!("coordinator {} sends {} to {}", self.id, txn.id, p);
        if txn.unsent.is_empty() {
            debug!(
                "coordinator {} awaiting {} response(s) for {}",
                self.id, txn.outstanding, txn.id
            );
            self.stage = CoordinatorStage::Awaiting;
        }
        Some((
            p,
            Request {
                id: txn.id,
                coordinator: self.id,
            },
        ))
    }

    fn mismatch(&self, resp: &Response, kind: MismatchKind) -> Error {
        Error::MismatchedResponse {
            coordinator: self.id,
            response: *resp,
            kind,
        }
    }

    /// Count `resp` toward the transaction in flight. Anything that isn't the
    /// first response from a target for the current id is refused with
    /// `MismatchedResponse`, leaving the state as it was.
    pub fn receive(&mut self, resp: &Response) -> Result<()> {
        let txn = match (&self.stage, &self.txn) {
            (CoordinatorStage::Awaiting, Some(txn)) if txn.id == resp.id => txn,
            (CoordinatorStage::Awaiting, Some(txn)) => {
                return Err(self.mismatch(
                    resp,
                    MismatchKind::ForeignId {
                        expected: Some(txn.id),
                    },
                ))
            }
            _ => return Err(self.mismatch(resp, MismatchKind::ForeignId { expected: None })),
        };
        if !txn.targets.contains(&resp.participant) {
            return Err(self.mismatch(resp, MismatchKind::NotTargeted));
        }
        if txn.seen.contains_key(&resp.participant) {
            return Err(self.mismatch(resp, MismatchKind::Duplicate));
        }
        let txn = match self.txn.as_mut() {
            Some(txn) => txn,
            None => return Err(self.mismatch(resp, MismatchKind::ForeignId { expected: None })),
        };
        txn.seen.insert(resp.participant, resp.vote);
        txn.outstanding -= 1;
        trace!(
            "coordinator {} got {:?} from {} for {}, {} outstanding",
            self.id,
            resp.vote,
            resp.participant,
            resp.id,
            txn.outstanding
        );
        if txn.is_complete() {
            debug!("coordinator {} has every response for {}", self.id, txn.id);
            self.stage = CoordinatorStage::Completing;
        }
        Ok(())
    }

    /// Retire the finished transaction and return to selecting. The caller
    /// is responsible for marking the id complete in the registry.
    pub fn finish(&mut self) -> Result<TransactionRecord> {
        self.expect_stage(CoordinatorStage::Completing, "finish")?;
        match self.txn.take() {
            Some(txn) => {
                self.stage = CoordinatorStage::Selecting;
                Ok(txn.into())
            }
            None => Err(Error::InvalidStage {
                unit: self.id.to_string(),
                step: "finish",
                stage: "completing without a transaction",
            }),
        }
    }

    /// Stop for good, abandoning anything in flight. Nothing is reported
    /// complete for an abandoned transaction.
    pub fn halt(&mut self) -> Option<TxnState> {
        if self.stage != CoordinatorStage::Done {
            debug!("coordinator {} halts in stage {:?}", self.id, self.stage);
        }
        self.stage = CoordinatorStage::Done;
        self.txn.take()
    }
}
