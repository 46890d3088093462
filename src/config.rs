// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

use crate::{Error, IdSupply, Result};
use serde::{Deserialize, Serialize};

/// What a coordinator does with a response it can't match to its current
/// transaction.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum MismatchPolicy {
    /// Stop the coordinator with the error. Right for verification runs,
    /// where nothing should ever be misrouted.
    Fatal,
    /// Log it, count it, and keep waiting for the responses we do want.
    /// Right when the transport may duplicate or reorder.
    Discard,
}

/// Shape of a `Cluster`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub coordinators: usize,
    pub participants: usize,
    pub ids: IdSupply,
    /// `None` for unbounded channels. With a bound, senders block while the
    /// target channel is full, which makes liveness depend on readers
    /// draining promptly.
    pub channel_capacity: Option<usize>,
    pub mismatch: MismatchPolicy,
    /// Keep every `TransactionRecord` in coordinator reports. Turn off for
    /// long-running clusters; completion counts are kept either way.
    pub record_history: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config::production()
    }
}

impl Config {
    /// Bounded identifier universe, mismatches fatal.
    pub fn verification(ids: IdSupply) -> Self {
        Config {
            coordinators: 2,
            participants: 3,
            ids,
            channel_capacity: None,
            mismatch: MismatchPolicy::Fatal,
            record_history: true,
        }
    }

    /// Unbounded identifiers, mismatches discarded, no history.
    pub fn production() -> Self {
        Config {
            coordinators: 1,
            participants: 2,
            ids: IdSupply::Unbounded { start: 1 },
            channel_capacity: None,
            mismatch: MismatchPolicy::Discard,
            record_history: false,
        }
    }

    pub fn with_units(mut self, coordinators: usize, participants: usize) -> Self {
        self.coordinators = coordinators;
        self.participants = participants;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.coordinators == 0 {
            return Err(Error::InvalidConfig("need at least one coordinator".into()));
        }
        if self.participants == 0 {
            return Err(Error::InvalidConfig("need at least one participant".into()));
        }
        if self.channel_capacity == Some(0) {
            return Err(Error::InvalidConfig(
                "channel capacity must be positive; use None for unbounded".into(),
            ));
        }
        match &self.ids {
            IdSupply::Bounded(ids) if ids.is_empty() => {
                return Err(Error::InvalidConfig("bounded id supply is empty".into()));
            }
            IdSupply::Unbounded { start } if *start == u64::MAX => {
                return Err(Error::InvalidConfig(
                    "unbounded id supply cannot start at u64::MAX".into(),
                ));
            }
            _ => (),
        }
        Ok(())
    }
}
