//! Caller-facing election service
//!
//! [`ElectionService`] wires the engine components together and applies the
//! policies that span several of them:
//! - positions change only while their election is stopped
//! - candidacies are frozen while an election's results are published
//! - published results are only handed out after publication

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::engine::{
    BallotStore, BallotStoreStats, CandidateRegistry, ElectionController, ElectionResults,
    IntegrityReport, PositionResults, RegistryEvent, RegistryStats, ResultsAggregator,
    SweeperHandle, VoteCaster, VoterDirectory,
};
use crate::storage::{FileJournal, Journal, MemoryJournal};
use crate::types::{
    Ballot, Candidate, CandidateId, CastReceipt, Election, ElectionId, ElectionStatus, Position,
    PositionId, Selections, UserId, VoteStatus, VoterId,
};
use crate::{Error, Result, validation_error};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// The three journals backing an engine instance
///
/// Cloning shares the underlying journals, which is how a restart is
/// simulated in memory.
#[derive(Clone)]
pub struct Journals {
    pub elections: Arc<dyn Journal<Election>>,
    pub registry: Arc<dyn Journal<RegistryEvent>>,
    pub ballots: Arc<dyn Journal<Ballot>>,
}

impl Journals {
    /// Process-local journals
    pub fn in_memory() -> Self {
        Self {
            elections: Arc::new(MemoryJournal::<Election>::new()),
            registry: Arc::new(MemoryJournal::<RegistryEvent>::new()),
            ballots: Arc::new(MemoryJournal::<Ballot>::new()),
        }
    }

    /// JSON-lines journals under `dir`
    pub fn on_disk(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        Ok(Self {
            elections: Arc::new(FileJournal::open(dir, "elections")?),
            registry: Arc::new(FileJournal::open(dir, "registry")?),
            ballots: Arc::new(FileJournal::open(dir, "ballots")?),
        })
    }

    /// On disk when a data directory is configured, in memory otherwise
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        match &config.data_dir {
            Some(dir) => Self::on_disk(dir),
            None => {
                tracing::warn!("⚠️  No data directory configured, state will not survive restarts");
                Ok(Self::in_memory())
            }
        }
    }
}

/// What a voter is shown for an open election
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BallotView {
    pub election: Election,
    /// In position creation order
    pub positions: Vec<BallotViewPosition>,
}

/// One position of a [`BallotView`] with its approved candidates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BallotViewPosition {
    pub position: Position,
    pub candidates: Vec<Candidate>,
}

/// Service-wide statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStats {
    pub elections: usize,
    pub running_elections: usize,
    pub registry: RegistryStats,
    pub ballots: BallotStoreStats,
}

/// Entry point for admin and voter operations
pub struct ElectionService {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    voters: Arc<dyn VoterDirectory>,
    controller: Arc<ElectionController>,
    registry: Arc<CandidateRegistry>,
    store: Arc<BallotStore>,
    caster: VoteCaster,
    results: ResultsAggregator,
}

impl ElectionService {
    /// Open the service with journals chosen from `config`
    pub fn open(
        config: EngineConfig,
        voters: Arc<dyn VoterDirectory>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let journals = Journals::from_config(&config)?;
        Self::with_journals(config, journals, voters, clock)
    }

    /// Open the service on explicit journals, replaying their contents
    pub fn with_journals(
        config: EngineConfig,
        journals: Journals,
        voters: Arc<dyn VoterDirectory>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let controller = Arc::new(ElectionController::open(
            journals.elections,
            clock.clone(),
            &config,
        )?);
        let registry = Arc::new(CandidateRegistry::open(journals.registry, clock.clone())?);
        let store = Arc::new(BallotStore::open(journals.ballots)?);

        let caster = VoteCaster::new(
            controller.clone(),
            registry.clone(),
            store.clone(),
            voters.clone(),
            clock.clone(),
        );
        let results = ResultsAggregator::new(controller.clone(), registry.clone(), store.clone());

        tracing::info!("🚀 Election service ready");

        Ok(Self {
            config,
            clock,
            voters,
            controller,
            registry,
            store,
            caster,
            results,
        })
    }

    // Election lifecycle

    /// Create a stopped election; `auto_close` defaults to the configured value
    pub fn create_election(
        &self,
        title: &str,
        year: &str,
        description: Option<String>,
        auto_close: Option<bool>,
    ) -> Result<Election> {
        self.controller.create_election(
            title,
            year,
            description,
            auto_close.unwrap_or(self.config.auto_close),
        )
    }

    /// Start a voting window; `duration` defaults to the configured value
    pub fn start_election(
        &self,
        election_id: ElectionId,
        duration: Option<Duration>,
    ) -> Result<Election> {
        let duration = duration.unwrap_or_else(|| self.config.default_duration());
        self.controller.start_when(election_id, duration, |election| {
            if self.registry.positions_of(election.id)?.is_empty() {
                tracing::warn!("🚫 Election {} cannot start without positions", election.id);
                return Err(validation_error!("election {} has no positions", election.id));
            }
            Ok(())
        })
    }

    pub fn pause_election(&self, election_id: ElectionId) -> Result<Election> {
        self.controller.pause(election_id)
    }

    pub fn resume_election(&self, election_id: ElectionId) -> Result<Election> {
        self.controller.resume(election_id)
    }

    pub fn stop_election(&self, election_id: ElectionId) -> Result<Election> {
        self.controller.stop(election_id)
    }

    pub fn extend_election(&self, election_id: ElectionId, delta: Duration) -> Result<Election> {
        self.controller.extend(election_id, delta)
    }

    pub fn election(&self, election_id: ElectionId) -> Result<Election> {
        self.controller.get(election_id)
    }

    pub fn elections(&self) -> Result<Vec<Election>> {
        self.controller.list()
    }

    /// Elections accepting ballots right now
    pub fn open_elections(&self) -> Result<Vec<Election>> {
        self.controller.open_elections(self.clock.now())
    }

    /// Elections that have run at least once
    pub fn results_visible_elections(&self) -> Result<Vec<Election>> {
        self.controller.results_visible_elections()
    }

    /// Start the background auto-close sweeper on the current tokio runtime
    pub fn spawn_sweeper(&self) -> SweeperHandle {
        SweeperHandle::spawn(
            self.controller.clone(),
            self.clock.clone(),
            self.config.sweep_interval(),
        )
    }

    // Positions and candidates

    /// Add a position to a stopped election
    pub fn add_position(&self, election_id: ElectionId, name: &str) -> Result<Position> {
        self.controller.with_locked(election_id, |election| {
            require_stopped(election, "add a position to")?;
            self.registry.add_position(election_id, name)
        })
    }

    /// Remove a position of a stopped election that nobody applied for
    pub fn remove_position(&self, position_id: PositionId) -> Result<()> {
        let position = self.registry.position(position_id)?;
        self.controller.with_locked(position.election_id, |election| {
            require_stopped(election, "remove a position from")?;
            self.registry.remove_position(position_id)
        })
    }

    pub fn positions(&self, election_id: ElectionId) -> Result<Vec<Position>> {
        self.controller.get(election_id)?;
        self.registry.positions_of(election_id)
    }

    /// File a pending candidacy on behalf of an eligible voter
    pub fn apply_candidate(
        &self,
        voter_id: VoterId,
        election_id: ElectionId,
        position_id: PositionId,
        platform_statement: Option<String>,
    ) -> Result<Candidate> {
        if !self.voters.is_eligible_voter(voter_id)? {
            return Err(Error::NotEligible {
                voter: voter_id.to_string(),
            });
        }
        self.controller.with_locked(election_id, |election| {
            require_unlocked(election)?;
            self.registry
                .submit_application(voter_id, election_id, position_id, platform_statement)
        })
    }

    /// Edit the platform statement of a pending application
    pub fn update_candidate_application(
        &self,
        candidate_id: CandidateId,
        platform_statement: Option<String>,
    ) -> Result<Candidate> {
        self.with_candidate_unlocked(candidate_id, || {
            self.registry
                .update_application(candidate_id, platform_statement)
        })
    }

    pub fn withdraw_candidate(&self, candidate_id: CandidateId) -> Result<()> {
        self.with_candidate_unlocked(candidate_id, || self.registry.withdraw(candidate_id))
    }

    pub fn approve_candidate(&self, candidate_id: CandidateId) -> Result<Candidate> {
        self.with_candidate_unlocked(candidate_id, || self.registry.approve(candidate_id))
    }

    pub fn reject_candidate(&self, candidate_id: CandidateId) -> Result<Candidate> {
        self.with_candidate_unlocked(candidate_id, || self.registry.reject(candidate_id))
    }

    pub fn candidate(&self, candidate_id: CandidateId) -> Result<Candidate> {
        self.registry.candidate(candidate_id)
    }

    /// Every candidacy of an election regardless of status
    pub fn candidates(&self, election_id: ElectionId) -> Result<Vec<Candidate>> {
        self.controller.get(election_id)?;
        self.registry.candidates_of(election_id)
    }

    /// Applications filed by a voter across all elections
    pub fn applications_of(&self, voter_id: VoterId) -> Result<Vec<Candidate>> {
        self.registry.applications_of(voter_id)
    }

    pub fn pending_applications(&self) -> Result<Vec<Candidate>> {
        self.registry.pending_applications()
    }

    // Voting

    /// Positions and approved candidates of an election accepting ballots
    pub fn ballot_view(&self, election_id: ElectionId) -> Result<BallotView> {
        let election = self.controller.get(election_id)?;
        if !election.accepts_ballots(self.clock.now()) {
            return Err(Error::ElectionNotOpen { election_id });
        }

        let positions = self
            .registry
            .positions_of(election_id)?
            .into_iter()
            .map(|position| {
                let candidates = self.registry.approved_candidates(position.id)?;
                Ok(BallotViewPosition {
                    position,
                    candidates,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(BallotView {
            election,
            positions,
        })
    }

    pub fn submit_ballot(
        &self,
        voter_id: VoterId,
        election_id: ElectionId,
        selections: Selections,
    ) -> Result<CastReceipt> {
        self.caster
            .submit_with_receipt(voter_id, election_id, selections)
    }

    pub fn submit_ballot_for_user(
        &self,
        user_id: &UserId,
        election_id: ElectionId,
        selections: Selections,
    ) -> Result<CastReceipt> {
        self.caster.submit_for_user(user_id, election_id, selections)
    }

    pub fn has_voted(&self, voter_id: VoterId, election_id: ElectionId) -> Result<bool> {
        self.controller.get(election_id)?;
        self.store.has_voted(voter_id, election_id)
    }

    pub fn vote_status(&self, voter_id: VoterId, election_id: ElectionId) -> Result<VoteStatus> {
        self.controller.get(election_id)?;
        self.store.vote_status(voter_id, election_id)
    }

    // Results

    /// Current tallies, published or not
    pub fn get_results(&self, election_id: ElectionId) -> Result<ElectionResults> {
        self.results.election_results(election_id)
    }

    pub fn position_results(&self, position_id: PositionId) -> Result<PositionResults> {
        self.results.position_results(position_id)
    }

    pub fn publish_results(&self, election_id: ElectionId) -> Result<Election> {
        self.controller.publish_results(election_id)
    }

    /// Tallies of an election whose results have been published
    pub fn published_results(&self, election_id: ElectionId) -> Result<ElectionResults> {
        let results = self.results.election_results(election_id)?;
        if !results.results_published {
            return Err(Error::ResultsWithheld { election_id });
        }
        Ok(results)
    }

    pub fn verify_integrity(&self, election_id: ElectionId) -> Result<IntegrityReport> {
        self.controller.get(election_id)?;
        self.store.verify_integrity(election_id)
    }

    pub fn get_stats(&self) -> Result<ServiceStats> {
        let elections = self.controller.list()?;
        Ok(ServiceStats {
            elections: elections.len(),
            running_elections: elections
                .iter()
                .filter(|e| e.status == ElectionStatus::Running)
                .count(),
            registry: self.registry.stats()?,
            ballots: self.store.stats()?,
        })
    }

    fn with_candidate_unlocked<T>(
        &self,
        candidate_id: CandidateId,
        change: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let candidate = self.registry.candidate(candidate_id)?;
        self.controller
            .with_locked(candidate.election_id, |election| {
                require_unlocked(election)?;
                change()
            })
    }
}

fn require_stopped(election: &Election, action: &'static str) -> Result<()> {
    if election.status == ElectionStatus::Stopped {
        return Ok(());
    }
    Err(Error::InvalidTransition {
        election_id: election.id,
        action,
        status: election.status,
    })
}

fn require_unlocked(election: &Election) -> Result<()> {
    if election.results_published {
        tracing::warn!("🔒 Candidate change refused: election {} results are published", election.id);
        return Err(Error::CandidateLocked {
            election_id: election.id,
        });
    }
    Ok(())
}
