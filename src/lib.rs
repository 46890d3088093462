// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

/*!
 * This crate implements the "carousel" broadcast-collect transaction
 * protocol, which is about as small as a coordination protocol gets:
 *
 *   - A coordinator takes a fresh, globally unique transaction identifier,
 *     picks some non-empty subset of the participants it knows about, and
 *     sends each of them a request tagged with the identifier.
 *
 *   - Each participant answers every request it gets with a vote, sent back
 *     to the coordinator that asked.
 *
 *   - The coordinator waits until it has exactly one response, for that
 *     identifier, from every participant it asked, marks the identifier
 *     complete, and goes around again.
 *
 * Any number of coordinators and participants run at once, and the only
 * thing they share is a FIFO channel per unit plus the identifier registry.
 * No participant knows who else was asked; no coordinator knows about any
 * other coordinator. The interesting parts are therefore all bookkeeping:
 * never handing the same identifier to two coordinators, matching responses
 * that arrive in any order back to the transaction that caused them, and
 * noticing when the last one has arrived.
 *
 * Votes are collected but never combined into an overall outcome. The only
 * thing the protocol promises is "everyone asked has answered"; whether to
 * treat the transaction as committed is up to whatever sits on top (see
 * `TransactionRecord::unanimous_commit` for one such rule).
 *
 * ## Layout
 *
 * `Coordinator` and `Participant` are explicit, cloneable state machines that
 * never touch a channel themselves. The `runtime` module drives them from OS
 * threads over `channel`s, with a `Shutdown` token observed wherever a unit
 * might block. The same machines are what the test suite hands to an
 * explicit-state model checker.
 *
 * Identifiers come from a `Registry`, either a finite universe (useful for
 * exhaustive checking, where running out is how things end) or an unbounded
 * counter (where only a shutdown ends things).
 *
 * ## Name
 *
 * Requests go round to each rider in turn, and the ride doesn't stop until
 * everyone who got on has got off.
 */

// TODO: per-transaction timeouts, so a dead participant doesn't wedge its
// coordinator forever.

mod channel;
mod config;
mod coordinator;
mod error;
mod message;
mod participant;
mod policy;
mod registry;
pub mod runtime;
mod shutdown;
mod state;

pub use channel::{channel, Inbox, Outbox};
pub use config::{Config, MismatchPolicy};
pub use coordinator::{Coordinator, CoordinatorStage};
pub use error::{Error, MismatchKind, Result};
pub use message::{CoordinatorId, ParticipantId, Request, Response, TxnId, Vote};
pub use participant::{Participant, ParticipantStage};
pub use policy::{
    all_nonempty_subsets, AlwaysAbort, AlwaysCommit, FixedSubset, RandomSubset, RandomVote,
    SelectAll, SelectMinimal, SelectionPolicy, VotePolicy,
};
pub use registry::{IdSpace, IdSupply, Registry};
pub use runtime::{Cluster, ClusterBuilder, ClusterReport, CoordinatorReport, ParticipantReport};
pub use shutdown::Shutdown;
pub use state::{TransactionRecord, TxnState};

#[cfg(test)]
mod stateright_tests;
