// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

use crate::{CoordinatorId, Error, ParticipantId, Request, Response, Result, Vote, VotePolicy};
use tracing::trace;

// Each request is taken through three explicit stages rather than in one
// call, so a model checker can interleave other units between dequeuing a
// request, deciding on it, and answering it.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum ParticipantStage {
    Idle,       // Waiting on our channel.
    Processing, // Holding a request, no vote yet.
    Responding, // Holding a request and its vote.
    Done,       // Shut down.
}

impl ParticipantStage {
    fn name(self) -> &'static str {
        match self {
            ParticipantStage::Idle => "idle",
            ParticipantStage::Processing => "processing",
            ParticipantStage::Responding => "responding",
            ParticipantStage::Done => "done",
        }
    }
}

/// `Participant`s answer every request they're handed with a vote, sent back
/// to whichever coordinator asked. They keep no state between requests and
/// have no idea which other participants were asked, or whether the
/// transaction a request belongs to ever finishes.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct Participant {
    pub id: ParticipantId,
    stage: ParticipantStage,
    request: Option<Request>,
    vote: Option<Vote>,
}

impl Participant {
    pub fn new(id: ParticipantId) -> Self {
        Participant {
            id,
            stage: ParticipantStage::Idle,
            request: None,
            vote: None,
        }
    }

    pub fn stage(&self) -> ParticipantStage {
        self.stage
    }

    /// The request being worked on, if any.
    pub fn pending(&self) -> Option<&Request> {
        self.request.as_ref()
    }

    fn wrong_stage(&self, step: &'static str) -> Error {
        Error::InvalidStage {
            unit: self.id.to_string(),
            step,
            stage: self.stage.name(),
        }
    }

    pub fn accept(&mut self, req: Request) -> Result<()> {
        if self.stage != ParticipantStage::Idle {
            return Err(self.wrong_stage("accept"));
        }
        trace!(
            "participant {} accepts {} from {}",
            self.id,
            req.id,
            req.coordinator
        );
        self.request = Some(req);
        self.stage = ParticipantStage::Processing;
        Ok(())
    }

    pub fn record_vote(&mut self, vote: Vote) -> Result<()> {
        if self.stage != ParticipantStage::Processing {
            return Err(self.wrong_stage("vote"));
        }
        self.vote = Some(vote);
        self.stage = ParticipantStage::Responding;
        Ok(())
    }

    /// The response to deliver, and the coordinator whose channel it goes to.
    pub fn respond(&mut self) -> Result<(CoordinatorId, Response)> {
        if self.stage != ParticipantStage::Responding {
            return Err(self.wrong_stage("respond"));
        }
        match (self.request.take(), self.vote.take()) {
            (Some(req), Some(vote)) => {
                self.stage = ParticipantStage::Idle;
                trace!(
                    "participant {} answers {} with {:?}",
                    self.id,
                    req.id,
                    vote
                );
                Ok((req.coordinator, req.answer(self.id, vote)))
            }
            _ => Err(self.wrong_stage("respond")),
        }
    }

    /// Take `req` from idle back to idle, asking `policy` for the vote.
    pub fn handle(
        &mut self,
        req: Request,
        policy: &mut dyn VotePolicy,
    ) -> Result<(CoordinatorId, Response)> {
        self.accept(req)?;
        let vote = policy.decide(&req);
        self.record_vote(vote)?;
        self.respond()
    }

    pub fn halt(&mut self) {
        self.request = None;
        self.vote = None;
        self.stage = ParticipantStage::Done;
    }
}
