// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

// Exhaustive exploration of every interleaving of a small carousel: a few
// coordinators and participants, a finite identifier universe, and every
// subset and vote the policies could possibly pick. Channels are explicit
// queues in the state so each dequeue is its own step.

use crate::*;
use im::{OrdSet as ArcOrdSet, Vector as ArcVector};
use stateright::{Checker, Model, Property};

#[derive(Clone, Copy, Debug)]
enum SubsetChoice {
    Any,
    Minimal,
    All,
}

#[derive(Clone, Debug)]
struct CarouselModel {
    coordinators: usize,
    participants: usize,
    ids: Vec<u64>,
    subsets: SubsetChoice,
    votes: Vec<Vote>,
    // How many times the transport may duplicate an already-sent response.
    retransmits: u8,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct CarouselState {
    space: IdSpace,
    coordinators: Vec<Coordinator>,
    participants: Vec<Participant>,
    to_coordinator: Vec<ArcVector<Response>>,
    to_participant: Vec<ArcVector<Request>>,

    // History variables, for the properties below.
    dequeued: ArcOrdSet<(TxnId, ParticipantId)>,
    sent: ArcOrdSet<(CoordinatorId, Response)>,
    retransmitted: u8,
    discarded: u8,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
enum Action {
    Begin(usize, TxnId, ArcOrdSet<ParticipantId>),
    Halt(usize),
    Send(usize),
    Deliver(usize),
    Complete(usize),
    Accept(usize),
    Decide(usize, Vote),
    Respond(usize),
    Retransmit(CoordinatorId, Response),
}

impl CarouselModel {
    fn known(&self) -> ArcOrdSet<ParticipantId> {
        (0..self.participants).map(ParticipantId).collect()
    }

    fn candidate_subsets(&self) -> Vec<ArcOrdSet<ParticipantId>> {
        let known = self.known();
        match self.subsets {
            SubsetChoice::Any => all_nonempty_subsets(&known),
            SubsetChoice::Minimal => known.iter().map(|p| ArcOrdSet::unit(*p)).collect(),
            SubsetChoice::All => vec![known],
        }
    }
}

impl Model for CarouselModel {
    type State = CarouselState;
    type Action = Action;

    fn init_states(&self) -> Vec<Self::State> {
        let known = self.known();
        vec![CarouselState {
            space: IdSpace::new(&IdSupply::Bounded(self.ids.clone())),
            coordinators: (0..self.coordinators)
                .map(|i| Coordinator::new(CoordinatorId(i), known.iter().copied()))
                .collect(),
            participants: (0..self.participants)
                .map(|i| Participant::new(ParticipantId(i)))
                .collect(),
            to_coordinator: vec![ArcVector::new(); self.coordinators],
            to_participant: vec![ArcVector::new(); self.participants],
            dequeued: ArcOrdSet::new(),
            sent: ArcOrdSet::new(),
            retransmitted: 0,
            discarded: 0,
        }]
    }

    fn actions(&self, state: &Self::State, actions: &mut Vec<Self::Action>) {
        for (i, c) in state.coordinators.iter().enumerate() {
            match c.stage() {
                CoordinatorStage::Selecting => {
                    let available = state.space.available();
                    if available.is_empty() {
                        actions.push(Action::Halt(i));
                    }
                    for id in available {
                        for subset in self.candidate_subsets() {
                            actions.push(Action::Begin(i, id, subset));
                        }
                    }
                }
                CoordinatorStage::Sending => actions.push(Action::Send(i)),
                CoordinatorStage::Awaiting => {
                    if !state.to_coordinator[i].is_empty() {
                        actions.push(Action::Deliver(i));
                    }
                }
                CoordinatorStage::Completing => actions.push(Action::Complete(i)),
                CoordinatorStage::Done => (),
            }
        }
        for (j, p) in state.participants.iter().enumerate() {
            match p.stage() {
                ParticipantStage::Idle => {
                    if !state.to_participant[j].is_empty() {
                        actions.push(Action::Accept(j));
                    }
                }
                ParticipantStage::Processing => {
                    for vote in &self.votes {
                        actions.push(Action::Decide(j, *vote));
                    }
                }
                ParticipantStage::Responding => actions.push(Action::Respond(j)),
                ParticipantStage::Done => (),
            }
        }
        if state.retransmitted < self.retransmits {
            for (to, resp) in state.sent.iter() {
                actions.push(Action::Retransmit(*to, *resp));
            }
        }
    }

    fn next_state(&self, last: &Self::State, action: Self::Action) -> Option<Self::State> {
        let mut st = last.clone();
        match action {
            Action::Begin(i, id, subset) => {
                st.space.claim(id).ok()?;
                st.coordinators[i].begin(id, subset).ok()?;
            }
            Action::Halt(i) => {
                st.coordinators[i].halt();
            }
            Action::Send(i) => {
                let (to, req) = st.coordinators[i].next_request()?;
                st.to_participant[to.0].push_back(req);
            }
            Action::Deliver(i) => {
                let resp = st.to_coordinator[i].pop_front()?;
                match st.coordinators[i].receive(&resp) {
                    Ok(()) => (),
                    Err(Error::MismatchedResponse { .. }) => st.discarded += 1,
                    Err(_) => return None,
                }
            }
            Action::Complete(i) => {
                let record = st.coordinators[i].finish().ok()?;
                st.space.complete(record.id).ok()?;
            }
            Action::Accept(j) => {
                let req = st.to_participant[j].pop_front()?;
                st.participants[j].accept(req).ok()?;
                st.dequeued.insert((req.id, ParticipantId(j)));
            }
            Action::Decide(j, vote) => {
                st.participants[j].record_vote(vote).ok()?;
            }
            Action::Respond(j) => {
                let (to, resp) = st.participants[j].respond().ok()?;
                st.to_coordinator[to.0].push_back(resp);
                st.sent.insert((to, resp));
            }
            Action::Retransmit(to, resp) => {
                st.to_coordinator[to.0].push_back(resp);
                st.retransmitted += 1;
            }
        }
        Some(st)
    }

    fn properties(&self) -> Vec<Property<Self>> {
        let mut props = vec![
            Property::<Self>::always("identifiers held by one coordinator", |_, st| {
                let held: Vec<TxnId> = st
                    .coordinators
                    .iter()
                    .filter_map(|c| c.current().map(|txn| txn.id))
                    .collect();
                let distinct: ArcOrdSet<TxnId> = held.iter().copied().collect();
                distinct.len() == held.len()
                    && held
                        .iter()
                        .all(|id| st.space.is_allocated(*id) && !st.space.is_completed(*id))
            }),
            Property::<Self>::always("transaction bookkeeping consistent", |_, st| {
                st.coordinators.iter().all(|c| match c.current() {
                    Some(txn) => {
                        txn.is_consistent()
                            && (c.stage() != CoordinatorStage::Awaiting || txn.outstanding > 0)
                    }
                    None => true,
                })
            }),
            Property::<Self>::always("complete only with one response per target", |_, st| {
                st.coordinators.iter().all(|c| {
                    if c.stage() != CoordinatorStage::Completing {
                        return true;
                    }
                    match c.current() {
                        Some(txn) => {
                            let answered: ArcOrdSet<ParticipantId> =
                                txn.seen.keys().copied().collect();
                            answered == txn.targets
                                && txn.seen.iter().all(|(p, vote)| {
                                    st.sent.contains(&(
                                        c.id,
                                        Response {
                                            id: txn.id,
                                            participant: *p,
                                            vote: *vote,
                                        },
                                    ))
                                })
                        }
                        None => false,
                    }
                })
            }),
            Property::<Self>::always("responses follow requests", |_, st| {
                st.sent
                    .iter()
                    .all(|(_, resp)| st.dequeued.contains(&(resp.id, resp.participant)))
            }),
            Property::<Self>::always("only retransmissions are discarded", |_, st| {
                st.discarded <= st.retransmitted
            }),
            Property::<Self>::eventually("every identifier completes", |_, st| {
                st.space.all_completed()
            }),
        ];
        if self.coordinators > 1 {
            props.push(Property::<Self>::sometimes(
                "transactions overlap",
                |_, st| {
                    st.coordinators
                        .iter()
                        .filter(|c| c.stage() == CoordinatorStage::Awaiting)
                        .count()
                        > 1
                },
            ));
        }
        if self.retransmits > 0 {
            props.push(Property::<Self>::sometimes("duplicate discarded", |_, st| {
                st.discarded > 0
            }));
        }
        props
    }
}

fn check(model: CarouselModel) -> usize {
    let checker = model.checker().threads(num_cpus::get()).spawn_bfs().join();
    checker.assert_properties();
    checker.unique_state_count()
}

#[test]
fn model_check() {
    let states = check(CarouselModel {
        coordinators: 2,
        participants: 2,
        ids: vec![1, 2],
        subsets: SubsetChoice::Any,
        votes: vec![Vote::Commit, Vote::Abort],
        retransmits: 0,
    });
    assert!(states > 1);
}

#[test]
fn model_check_minimal_subsets_always_abort() {
    check(CarouselModel {
        coordinators: 2,
        participants: 3,
        ids: vec![1, 2, 3],
        subsets: SubsetChoice::Minimal,
        votes: vec![Vote::Abort],
        retransmits: 0,
    });
}

#[test]
fn model_check_single_coordinator_two_participants() {
    check(CarouselModel {
        coordinators: 1,
        participants: 2,
        ids: vec![1, 2],
        subsets: SubsetChoice::All,
        votes: vec![Vote::Commit, Vote::Abort],
        retransmits: 0,
    });
}

#[test]
fn model_check_with_retransmitted_responses() {
    check(CarouselModel {
        coordinators: 1,
        participants: 2,
        ids: vec![1, 2],
        subsets: SubsetChoice::Any,
        votes: vec![Vote::Commit],
        retransmits: 1,
    });
}
