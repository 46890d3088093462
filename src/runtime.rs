// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

//! Drives the state machines on OS threads, one per unit, with a channel per
//! unit as the only way they talk to one another.

use crate::{
    channel, AlwaysCommit, Config, Coordinator, CoordinatorId, CoordinatorStage, Error, IdSupply,
    Inbox, MismatchPolicy, Outbox, Participant, ParticipantId, RandomSubset, Registry, Request,
    Response, Result, SelectionPolicy, Shutdown, TransactionRecord, TxnId, Vote, VotePolicy,
};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, info_span, warn};

/// Maps unit ids to the writing ends of their channels.
#[derive(Debug)]
pub struct Router {
    participants: Vec<Outbox<Request>>,
    coordinators: Vec<Outbox<Response>>,
}

impl Router {
    /// `participants[i]` must belong to `ParticipantId(i)`, and likewise for
    /// coordinators.
    pub fn new(participants: Vec<Outbox<Request>>, coordinators: Vec<Outbox<Response>>) -> Self {
        Router {
            participants,
            coordinators,
        }
    }

    pub fn participant(&self, id: ParticipantId) -> Result<&Outbox<Request>> {
        self.participants
            .get(id.0)
            .ok_or(Error::UnknownParticipant(id))
    }

    pub fn coordinator(&self, id: CoordinatorId) -> Result<&Outbox<Response>> {
        self.coordinators
            .get(id.0)
            .ok_or(Error::UnknownCoordinator(id))
    }

    pub fn participant_ids(&self) -> impl Iterator<Item = ParticipantId> {
        (0..self.participants.len()).map(ParticipantId)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoordinatorReport {
    pub id: CoordinatorId,
    /// Only filled in when `Config::record_history` is set.
    pub transactions: Vec<TransactionRecord>,
    pub completed: u64,
    pub discarded: u64,
    /// The transaction that was in flight when shutdown arrived.
    pub abandoned: Option<TxnId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParticipantReport {
    pub id: ParticipantId,
    pub handled: u64,
    pub commits: u64,
    pub aborts: u64,
    /// Responses whose coordinator was gone by the time they were sent.
    pub undeliverable: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClusterReport {
    pub coordinators: Vec<CoordinatorReport>,
    pub participants: Vec<ParticipantReport>,
}

impl ClusterReport {
    pub fn completed(&self) -> u64 {
        self.coordinators.iter().map(|c| c.completed).sum()
    }

    pub fn transactions(&self) -> impl Iterator<Item = &TransactionRecord> {
        self.coordinators.iter().flat_map(|c| c.transactions.iter())
    }

    pub fn responses_sent(&self) -> u64 {
        self.participants
            .iter()
            .map(|p| p.handled - p.undeliverable)
            .sum()
    }
}

pub(crate) struct CoordinatorWorker {
    machine: Coordinator,
    inbox: Inbox<Response>,
    router: Arc<Router>,
    registry: Arc<Registry>,
    selection: Box<dyn SelectionPolicy + Send>,
    shutdown: Shutdown,
    mismatch: MismatchPolicy,
    record_history: bool,
}

impl CoordinatorWorker {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: CoordinatorId,
        inbox: Inbox<Response>,
        router: Arc<Router>,
        registry: Arc<Registry>,
        selection: Box<dyn SelectionPolicy + Send>,
        shutdown: Shutdown,
        mismatch: MismatchPolicy,
        record_history: bool,
    ) -> Self {
        let machine = Coordinator::new(id, router.participant_ids());
        CoordinatorWorker {
            machine,
            inbox,
            router,
            registry,
            selection,
            shutdown,
            mismatch,
            record_history,
        }
    }

    pub(crate) fn run(mut self) -> Result<CoordinatorReport> {
        let id = self.machine.id;
        let span = info_span!("coordinator", id = %id);
        let _enter = span.enter();
        info!("coordinator {} started", id);
        let mut report = CoordinatorReport {
            id,
            transactions: Vec::new(),
            completed: 0,
            discarded: 0,
            abandoned: None,
        };
        let shutdown = self.shutdown.clone();
        let res = guarded(format!("coordinator-{}", id.0), &shutdown, || {
            self.run_loop(&mut report)
        });
        match res {
            Ok(()) => {
                info!(
                    "coordinator {} stopped after {} transaction(s)",
                    id, report.completed
                );
                Ok(report)
            }
            Err(e) => {
                error!("coordinator {} aborting: {}", id, e);
                self.machine.halt();
                Err(e)
            }
        }
    }

    fn abandon(&mut self, report: &mut CoordinatorReport) {
        report.abandoned = self.machine.halt().map(|txn| txn.id);
        if let Some(txn) = report.abandoned {
            debug!("coordinator {} abandons {}", self.machine.id, txn);
        }
    }

    fn run_loop(&mut self, report: &mut CoordinatorReport) -> Result<()> {
        loop {
            if self.shutdown.is_triggered() {
                self.abandon(report);
                return Ok(());
            }

            // Pick targets before taking an id, so a bad subset never leaves
            // an id allocated with nobody to complete it.
            let subset = self.selection.select(self.machine.known());
            self.machine.validate_subset(&subset)?;
            let txn = match self.registry.allocate() {
                Ok(txn) => txn,
                Err(Error::Exhausted) => {
                    debug!("coordinator {} found no identifiers left", self.machine.id);
                    self.machine.halt();
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            self.machine.begin(txn, subset)?;

            while let Some((p, req)) = self.machine.next_request() {
                let sent = self
                    .router
                    .participant(p)
                    .and_then(|outbox| outbox.send(req, &self.shutdown));
                match sent {
                    Ok(()) => (),
                    Err(Error::Shutdown) => {
                        self.abandon(report);
                        return Ok(());
                    }
                    Err(Error::ChannelClosed(_)) if self.shutdown.is_triggered() => {
                        self.abandon(report);
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                }
            }

            while self.machine.stage() == CoordinatorStage::Awaiting {
                let resp = match self.inbox.recv(&self.shutdown) {
                    Some(resp) => resp,
                    None => {
                        self.abandon(report);
                        return Ok(());
                    }
                };
                match self.machine.receive(&resp) {
                    Ok(()) => (),
                    Err(e @ Error::MismatchedResponse { .. }) => match self.mismatch {
                        MismatchPolicy::Fatal => return Err(e),
                        MismatchPolicy::Discard => {
                            warn!("discarding: {}", e);
                            report.discarded += 1;
                        }
                    },
                    Err(e) => return Err(e),
                }
            }

            let record = self.machine.finish()?;
            self.registry.complete(record.id)?;
            report.completed += 1;
            if self.record_history {
                report.transactions.push(record);
            }
        }
    }
}

pub(crate) struct ParticipantWorker {
    machine: Participant,
    inbox: Inbox<Request>,
    router: Arc<Router>,
    policy: Box<dyn VotePolicy + Send>,
    shutdown: Shutdown,
}

impl ParticipantWorker {
    pub(crate) fn new(
        id: ParticipantId,
        inbox: Inbox<Request>,
        router: Arc<Router>,
        policy: Box<dyn VotePolicy + Send>,
        shutdown: Shutdown,
    ) -> Self {
        ParticipantWorker {
            machine: Participant::new(id),
            inbox,
            router,
            policy,
            shutdown,
        }
    }

    pub(crate) fn run(mut self) -> Result<ParticipantReport> {
        let id = self.machine.id;
        let span = info_span!("participant", id = %id);
        let _enter = span.enter();
        info!("participant {} started", id);
        let mut report = ParticipantReport {
            id,
            handled: 0,
            commits: 0,
            aborts: 0,
            undeliverable: 0,
        };
        let shutdown = self.shutdown.clone();
        let res = guarded(format!("participant-{}", id.0), &shutdown, || {
            self.run_loop(&mut report)
        });
        match res {
            Ok(()) => {
                info!("participant {} stopped after {} request(s)", id, report.handled);
                Ok(report)
            }
            Err(e) => {
                error!("participant {} aborting: {}", id, e);
                self.machine.halt();
                Err(e)
            }
        }
    }

    fn run_loop(&mut self, report: &mut ParticipantReport) -> Result<()> {
        while let Some(req) = self.inbox.recv(&self.shutdown) {
            let (to, resp) = self.machine.handle(req, &mut *self.policy)?;
            report.handled += 1;
            match resp.vote {
                Vote::Commit => report.commits += 1,
                Vote::Abort => report.aborts += 1,
            }
            let sent = self
                .router
                .coordinator(to)
                .and_then(|outbox| outbox.send(resp, &self.shutdown));
            match sent {
                Ok(()) => (),
                Err(Error::Shutdown) => break,
                Err(e @ Error::ChannelClosed(_)) | Err(e @ Error::UnknownCoordinator(_)) => {
                    warn!("dropping response for {}: {}", resp.id, e);
                    report.undeliverable += 1;
                }
                Err(e) => return Err(e),
            }
        }
        self.machine.halt();
        Ok(())
    }
}

/// Runs a unit's loop, turning a panic into `WorkerPanicked`. A panic or a
/// fatal error triggers the cluster-wide shutdown, which releases any peer
/// blocked waiting on this unit.
fn guarded<F>(name: String, shutdown: &Shutdown, body: F) -> Result<()>
where
    F: FnOnce() -> Result<()>,
{
    let res = match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(res) => res,
        Err(_) => Err(Error::WorkerPanicked(name)),
    };
    if let Err(e) = &res {
        if e.is_fatal() {
            warn!("{}; shutting the cluster down", e);
            shutdown.trigger();
        }
    }
    res
}

pub type VotePolicyFactory = Box<dyn Fn(ParticipantId) -> Box<dyn VotePolicy + Send>>;
pub type SelectionPolicyFactory = Box<dyn Fn(CoordinatorId) -> Box<dyn SelectionPolicy + Send>>;

/// Sets up the channels, registry and policies for a `Cluster`.
pub struct ClusterBuilder {
    config: Config,
    vote: VotePolicyFactory,
    selection: SelectionPolicyFactory,
}

impl ClusterBuilder {
    /// Defaults to participants that always commit and coordinators that
    /// pick uniformly random subsets.
    pub fn new(config: Config) -> Self {
        ClusterBuilder {
            config,
            vote: Box::new(|_: ParticipantId| -> Box<dyn VotePolicy + Send> {
                Box::new(AlwaysCommit)
            }),
            selection: Box::new(|_: CoordinatorId| -> Box<dyn SelectionPolicy + Send> {
                Box::new(RandomSubset::new())
            }),
        }
    }

    pub fn vote_policy<F>(mut self, factory: F) -> Self
    where
        F: Fn(ParticipantId) -> Box<dyn VotePolicy + Send> + 'static,
    {
        self.vote = Box::new(factory);
        self
    }

    pub fn selection_policy<F>(mut self, factory: F) -> Self
    where
        F: Fn(CoordinatorId) -> Box<dyn SelectionPolicy + Send> + 'static,
    {
        self.selection = Box::new(factory);
        self
    }

    pub fn spawn(self) -> Result<Cluster> {
        let config = self.config;
        config.validate()?;

        let (p_out, p_in): (Vec<_>, Vec<_>) = (0..config.participants)
            .map(|i| channel::<Request>(ParticipantId(i).to_string(), config.channel_capacity))
            .unzip();
        let (c_out, c_in): (Vec<_>, Vec<_>) = (0..config.coordinators)
            .map(|i| channel::<Response>(CoordinatorId(i).to_string(), config.channel_capacity))
            .unzip();
        let router = Arc::new(Router::new(p_out, c_out));
        let registry = Arc::new(Registry::new(&config.ids));
        let shutdown = Shutdown::new();

        let mut cluster = Cluster {
            bounded: matches!(config.ids, IdSupply::Bounded(_)),
            registry: registry.clone(),
            router: router.clone(),
            shutdown: shutdown.clone(),
            coordinators: Vec::new(),
            participants: Vec::new(),
        };

        for (i, inbox) in p_in.into_iter().enumerate() {
            let id = ParticipantId(i);
            let worker = ParticipantWorker::new(
                id,
                inbox,
                router.clone(),
                (self.vote)(id),
                shutdown.clone(),
            );
            let handle = spawn_named(format!("participant-{}", i), move || worker.run());
            match handle {
                Ok(h) => cluster.participants.push((id, h)),
                Err(e) => {
                    cluster.abort();
                    return Err(e);
                }
            }
        }

        for (i, inbox) in c_in.into_iter().enumerate() {
            let id = CoordinatorId(i);
            let worker = CoordinatorWorker::new(
                id,
                inbox,
                router.clone(),
                registry.clone(),
                (self.selection)(id),
                shutdown.clone(),
                config.mismatch,
                config.record_history,
            );
            let handle = spawn_named(format!("coordinator-{}", i), move || worker.run());
            match handle {
                Ok(h) => cluster.coordinators.push((id, h)),
                Err(e) => {
                    cluster.abort();
                    return Err(e);
                }
            }
        }

        info!(
            "cluster running with {} coordinator(s) and {} participant(s)",
            config.coordinators, config.participants
        );
        Ok(cluster)
    }
}

fn spawn_named<T, F>(name: String, f: F) -> Result<JoinHandle<Result<T>>>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    thread::Builder::new()
        .name(name.clone())
        .spawn(f)
        .map_err(|e| Error::Spawn(format!("{}: {}", name, e)))
}

fn join_unit<T>(name: String, handle: JoinHandle<Result<T>>) -> Result<T> {
    match handle.join() {
        Ok(res) => res,
        Err(_) => Err(Error::WorkerPanicked(name)),
    }
}

/// A running set of coordinator and participant threads.
pub struct Cluster {
    bounded: bool,
    registry: Arc<Registry>,
    router: Arc<Router>,
    shutdown: Shutdown,
    coordinators: Vec<(CoordinatorId, JoinHandle<Result<CoordinatorReport>>)>,
    participants: Vec<(ParticipantId, JoinHandle<Result<ParticipantReport>>)>,
}

impl Cluster {
    pub fn builder(config: Config) -> ClusterBuilder {
        ClusterBuilder::new(config)
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn shutdown_signal(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Bounded supplies only: wait for every coordinator to run out of
    /// identifiers, then stop the participants.
    pub fn run_to_exhaustion(mut self) -> Result<ClusterReport> {
        if !self.bounded {
            self.abort();
            return Err(Error::InvalidConfig(
                "run_to_exhaustion needs a bounded id supply".into(),
            ));
        }
        let coordinators = self.join_coordinators();
        self.shutdown.trigger();
        let participants = self.join_participants();
        assemble(coordinators, participants)
    }

    /// Signal every unit to stop at its next suspension point and collect
    /// their reports.
    pub fn shutdown(mut self) -> Result<ClusterReport> {
        info!("cluster shutting down");
        self.shutdown.trigger();
        let coordinators = self.join_coordinators();
        let participants = self.join_participants();
        assemble(coordinators, participants)
    }

    fn abort(&mut self) {
        self.shutdown.trigger();
        let _ = self.join_coordinators();
        let _ = self.join_participants();
    }

    fn join_coordinators(&mut self) -> Vec<Result<CoordinatorReport>> {
        self.coordinators
            .drain(..)
            .map(|(id, h)| join_unit(format!("coordinator-{}", id.0), h))
            .collect()
    }

    fn join_participants(&mut self) -> Vec<Result<ParticipantReport>> {
        self.participants
            .drain(..)
            .map(|(id, h)| join_unit(format!("participant-{}", id.0), h))
            .collect()
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        // Anything not yet joined is left to wind down on its own.
        if !self.coordinators.is_empty() || !self.participants.is_empty() {
            self.shutdown.trigger();
        }
    }
}

fn assemble(
    coordinators: Vec<Result<CoordinatorReport>>,
    participants: Vec<Result<ParticipantReport>>,
) -> Result<ClusterReport> {
    Ok(ClusterReport {
        coordinators: coordinators.into_iter().collect::<Result<_>>()?,
        participants: participants.into_iter().collect::<Result<_>>()?,
    })
}
