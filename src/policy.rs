// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

//! Pluggable collaborators: how a participant votes, and which participants a
//! coordinator asks. The protocol has to be correct for every implementation
//! here, including the unhelpful ones.

use crate::{ParticipantId, Request, Vote};
use im::OrdSet as ArcOrdSet;
use itertools::Itertools;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub trait VotePolicy {
    fn decide(&mut self, req: &Request) -> Vote;
}

impl<F> VotePolicy for F
where
    F: FnMut(&Request) -> Vote,
{
    fn decide(&mut self, req: &Request) -> Vote {
        self(req)
    }
}

/// Must return a non-empty subset of `known`; coordinators reject anything
/// else before sending.
pub trait SelectionPolicy {
    fn select(&mut self, known: &ArcOrdSet<ParticipantId>) -> ArcOrdSet<ParticipantId>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysCommit;

impl VotePolicy for AlwaysCommit {
    fn decide(&mut self, _req: &Request) -> Vote {
        Vote::Commit
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysAbort;

impl VotePolicy for AlwaysAbort {
    fn decide(&mut self, _req: &Request) -> Vote {
        Vote::Abort
    }
}

/// Commits with probability `commit_ratio`.
#[derive(Clone, Debug)]
pub struct RandomVote {
    rng: StdRng,
    commit_ratio: f64,
}

impl RandomVote {
    pub fn new(commit_ratio: f64) -> Self {
        RandomVote {
            rng: StdRng::from_entropy(),
            commit_ratio: commit_ratio.max(0.0).min(1.0),
        }
    }

    pub fn seeded(seed: u64, commit_ratio: f64) -> Self {
        RandomVote {
            rng: StdRng::seed_from_u64(seed),
            commit_ratio: commit_ratio.max(0.0).min(1.0),
        }
    }
}

impl VotePolicy for RandomVote {
    fn decide(&mut self, _req: &Request) -> Vote {
        if self.rng.gen_bool(self.commit_ratio) {
            Vote::Commit
        } else {
            Vote::Abort
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SelectAll;

impl SelectionPolicy for SelectAll {
    fn select(&mut self, known: &ArcOrdSet<ParticipantId>) -> ArcOrdSet<ParticipantId> {
        known.clone()
    }
}

/// Asks exactly one participant per transaction, rotating through them.
#[derive(Clone, Copy, Debug, Default)]
pub struct SelectMinimal {
    turn: usize,
}

impl SelectionPolicy for SelectMinimal {
    fn select(&mut self, known: &ArcOrdSet<ParticipantId>) -> ArcOrdSet<ParticipantId> {
        let mut subset = ArcOrdSet::new();
        if known.is_empty() {
            return subset;
        }
        if let Some(p) = known.iter().nth(self.turn % known.len()) {
            subset.insert(*p);
        }
        self.turn = self.turn.wrapping_add(1);
        subset
    }
}

/// Uniform over the non-empty subsets of `known`.
#[derive(Clone, Debug)]
pub struct RandomSubset {
    rng: StdRng,
}

impl RandomSubset {
    pub fn new() -> Self {
        RandomSubset {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        RandomSubset {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomSubset {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionPolicy for RandomSubset {
    fn select(&mut self, known: &ArcOrdSet<ParticipantId>) -> ArcOrdSet<ParticipantId> {
        if known.is_empty() {
            return ArcOrdSet::new();
        }
        // Flip a coin per participant, rejecting the empty outcome.
        loop {
            let subset: ArcOrdSet<ParticipantId> = known
                .iter()
                .filter(|_| self.rng.gen_bool(0.5))
                .copied()
                .collect();
            if !subset.is_empty() {
                return subset;
            }
        }
    }
}

/// Always the same subset, whatever the coordinator knows about. Useful for
/// pinning down scenarios, and for feeding coordinators bad subsets.
#[derive(Clone, Debug, Default)]
pub struct FixedSubset(pub ArcOrdSet<ParticipantId>);

impl SelectionPolicy for FixedSubset {
    fn select(&mut self, _known: &ArcOrdSet<ParticipantId>) -> ArcOrdSet<ParticipantId> {
        self.0.clone()
    }
}

/// Every non-empty subset of `known`, smallest first. Exponential; meant for
/// exhaustive exploration over a handful of participants.
pub fn all_nonempty_subsets(known: &ArcOrdSet<ParticipantId>) -> Vec<ArcOrdSet<ParticipantId>> {
    let mut subsets = Vec::new();
    for sz in 1..=known.len() {
        for subset in known.iter().combinations(sz) {
            subsets.push(subset.into_iter().copied().collect());
        }
    }
    subsets
}
