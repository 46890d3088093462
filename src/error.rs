// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

use crate::{CoordinatorId, ParticipantId, Response, TxnId};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Why a coordinator refused a `Response`.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum MismatchKind {
    /// Tagged with an id other than the coordinator's current transaction
    /// (stale, misrouted, or arriving while no transaction is awaiting).
    ForeignId { expected: Option<TxnId> },
    /// From a participant outside the current target set.
    NotTargeted,
    /// Second response from a participant already counted.
    Duplicate,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The registry handed out an id it already considered allocated or
    /// completed. The registry is broken; never recover from this.
    #[error("identifier {0} allocated twice")]
    DuplicateAllocation(TxnId),

    /// A bounded identifier supply has nothing left to allocate.
    #[error("identifier supply exhausted")]
    Exhausted,

    #[error("coordinator {coordinator} rejected response {response:?}: {kind:?}")]
    MismatchedResponse {
        coordinator: CoordinatorId,
        response: Response,
        kind: MismatchKind,
    },

    /// `complete` on an id that is not currently allocated.
    #[error("identifier {0} is not allocated")]
    UnknownIdentifier(TxnId),

    #[error("selection policy returned an empty participant subset")]
    EmptySubset,

    #[error("unknown participant {0}")]
    UnknownParticipant(ParticipantId),

    #[error("unknown coordinator {0}")]
    UnknownCoordinator(CoordinatorId),

    /// A state-machine step was invoked from the wrong stage.
    #[error("{unit} cannot {step} while {stage}")]
    InvalidStage {
        unit: String,
        step: &'static str,
        stage: &'static str,
    },

    /// The single reader of a channel has gone away.
    #[error("channel of {0} is closed")]
    ChannelClosed(String),

    #[error("shutdown requested")]
    Shutdown,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to spawn worker thread {0}")]
    Spawn(String),

    #[error("worker thread {0} panicked")]
    WorkerPanicked(String),
}

impl Error {
    /// Programmer-error class: the offending unit must stop rather than log
    /// and carry on.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::DuplicateAllocation(_)
            | Error::UnknownIdentifier(_)
            | Error::InvalidStage { .. }
            | Error::EmptySubset
            | Error::UnknownParticipant(_)
            | Error::UnknownCoordinator(_)
            | Error::WorkerPanicked(_) => true,
            Error::Exhausted
            | Error::MismatchedResponse { .. }
            | Error::ChannelClosed(_)
            | Error::Shutdown
            | Error::InvalidConfig(_)
            | Error::Spawn(_) => false,
        }
    }
}
