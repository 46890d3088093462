// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one transaction: the tag stamped on every `Request` fanned out
/// for it and on every `Response` collected for it.
#[derive(
    Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TxnId(pub u64);

/// Names a coordinator, and thereby the channel its responses arrive on.
#[derive(
    Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct CoordinatorId(pub usize);

/// Names a participant, and thereby the channel its requests arrive on.
#[derive(
    Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ParticipantId(pub usize);

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for CoordinatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// A participant's decision for one request. The protocol core only counts
/// votes; it never interprets them.
#[derive(
    Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum Vote {
    Commit,
    Abort,
}

/// Sent once per (transaction, selected participant) pair, from the
/// coordinator that owns `id` to the participant's channel.
#[derive(
    Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Request {
    pub id: TxnId,
    pub coordinator: CoordinatorId,
}

/// Sent once per received `Request`, from the participant back to the
/// coordinator named in that request.
#[derive(
    Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Response {
    pub id: TxnId,
    pub participant: ParticipantId,
    pub vote: Vote,
}

impl Request {
    /// Build the response `participant` owes this request.
    pub fn answer(&self, participant: ParticipantId, vote: Vote) -> Response {
        Response {
            id: self.id,
            participant,
            vote,
        }
    }
}
