//! Positions and candidacies per election
//!
//! The registry answers two questions for ballot validation: which positions
//! an election has, and which candidates are approved for a position. All
//! changes are recorded as [`RegistryEvent`]s; the in-memory state is the
//! fold of those events, both live and on replay.

use crate::clock::Clock;
use crate::storage::Journal;
use crate::types::{
    ApprovalStatus, Candidate, CandidateId, ElectionId, Position, PositionId, VoterId,
};
use crate::{Error, Result, validation_error};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A change to the registry as stored in its journal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RegistryEvent {
    PositionAdded { position: Position },
    PositionRemoved { position_id: PositionId },
    CandidateRegistered { candidate: Candidate },
    CandidateDecided {
        candidate_id: CandidateId,
        status: ApprovalStatus,
    },
    CandidateWithdrawn { candidate_id: CandidateId },
    CandidateUpdated {
        candidate_id: CandidateId,
        platform_statement: Option<String>,
    },
}

/// Candidate counts by approval status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub positions: usize,
    pub approved: usize,
    pub pending: usize,
    pub rejected: usize,
}

#[derive(Default)]
struct RegistryState {
    positions: HashMap<PositionId, Position>,
    /// Positions per election in creation order
    election_positions: HashMap<ElectionId, Vec<PositionId>>,
    candidates: HashMap<CandidateId, Candidate>,
    /// Candidates per position in registration order
    position_candidates: HashMap<PositionId, Vec<CandidateId>>,
    next_sequence: u64,
}

impl RegistryState {
    fn apply(&mut self, event: &RegistryEvent) {
        match event {
            RegistryEvent::PositionAdded { position } => {
                self.election_positions
                    .entry(position.election_id)
                    .or_default()
                    .push(position.id);
                self.positions.insert(position.id, position.clone());
            }
            RegistryEvent::PositionRemoved { position_id } => {
                if let Some(position) = self.positions.remove(position_id) {
                    if let Some(ids) = self.election_positions.get_mut(&position.election_id) {
                        ids.retain(|id| id != position_id);
                    }
                }
                self.position_candidates.remove(position_id);
            }
            RegistryEvent::CandidateRegistered { candidate } => {
                self.position_candidates
                    .entry(candidate.position_id)
                    .or_default()
                    .push(candidate.id);
                self.next_sequence = self.next_sequence.max(candidate.sequence + 1);
                self.candidates.insert(candidate.id, candidate.clone());
            }
            RegistryEvent::CandidateDecided {
                candidate_id,
                status,
            } => {
                if let Some(candidate) = self.candidates.get_mut(candidate_id) {
                    candidate.approval_status = *status;
                }
            }
            RegistryEvent::CandidateWithdrawn { candidate_id } => {
                if let Some(candidate) = self.candidates.remove(candidate_id) {
                    if let Some(ids) = self.position_candidates.get_mut(&candidate.position_id) {
                        ids.retain(|id| id != candidate_id);
                    }
                }
            }
            RegistryEvent::CandidateUpdated {
                candidate_id,
                platform_statement,
            } => {
                if let Some(candidate) = self.candidates.get_mut(candidate_id) {
                    candidate.platform_statement = platform_statement.clone();
                }
            }
        }
    }

    fn position(&self, position_id: PositionId) -> Result<&Position> {
        self.positions
            .get(&position_id)
            .ok_or_else(|| Error::not_found("position", position_id))
    }

    fn candidate(&self, candidate_id: CandidateId) -> Result<&Candidate> {
        self.candidates
            .get(&candidate_id)
            .ok_or_else(|| Error::not_found("candidate", candidate_id))
    }

    fn candidates_for(&self, position_id: PositionId) -> impl Iterator<Item = &Candidate> {
        self.position_candidates
            .get(&position_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.candidates.get(id))
    }
}

/// Registry of positions and candidacies
pub struct CandidateRegistry {
    state: RwLock<RegistryState>,
    journal: Arc<dyn Journal<RegistryEvent>>,
    clock: Arc<dyn Clock>,
}

impl CandidateRegistry {
    /// Rebuild the registry from its journal
    pub fn open(journal: Arc<dyn Journal<RegistryEvent>>, clock: Arc<dyn Clock>) -> Result<Self> {
        let mut state = RegistryState::default();
        let events = journal.replay()?;
        for event in &events {
            state.apply(event);
        }

        tracing::info!(
            "🗂️  Candidate registry opened: {} events, {} positions, {} candidates",
            events.len(),
            state.positions.len(),
            state.candidates.len()
        );

        Ok(Self {
            state: RwLock::new(state),
            journal,
            clock,
        })
    }

    /// Add a position to an election
    pub fn add_position(&self, election_id: ElectionId, name: &str) -> Result<Position> {
        let name = name.trim();
        if name.is_empty() {
            return Err(validation_error!("position name"));
        }

        let position = Position {
            id: PositionId::new(),
            election_id,
            name: name.to_string(),
        };
        self.record(|state| {
            let duplicate = state
                .election_positions
                .get(&election_id)
                .into_iter()
                .flatten()
                .filter_map(|id| state.positions.get(id))
                .any(|existing| existing.name.eq_ignore_ascii_case(name));
            if duplicate {
                return Err(validation_error!("position '{}' already exists", name));
            }
            Ok(RegistryEvent::PositionAdded {
                position: position.clone(),
            })
        })?;

        tracing::info!(
            "📌 Position added: election={}, position={}, name={}",
            election_id,
            position.id,
            position.name
        );
        Ok(position)
    }

    /// Remove a position nobody has applied for yet
    pub fn remove_position(&self, position_id: PositionId) -> Result<()> {
        self.record(|state| {
            state.position(position_id)?;
            if state.candidates_for(position_id).next().is_some() {
                return Err(validation_error!(
                    "position {} has candidates and cannot be removed",
                    position_id
                ));
            }
            Ok(RegistryEvent::PositionRemoved { position_id })
        })?;

        tracing::info!("🗑️  Position removed: position={}", position_id);
        Ok(())
    }

    /// Record a pending application by `voter_id` for `position_id`
    ///
    /// A voter may hold one candidacy per election.
    pub fn submit_application(
        &self,
        voter_id: VoterId,
        election_id: ElectionId,
        position_id: PositionId,
        platform_statement: Option<String>,
    ) -> Result<Candidate> {
        let applied_at = self.clock.now();
        let event = self.record(|state| {
            let position = state.position(position_id)?;
            if position.election_id != election_id {
                return Err(validation_error!(
                    "position {} does not belong to election {}",
                    position_id,
                    election_id
                ));
            }

            let already_applied = state
                .candidates
                .values()
                .any(|c| c.election_id == election_id && c.voter_id == voter_id);
            if already_applied {
                return Err(Error::AlreadyApplied {
                    voter_id,
                    election_id,
                });
            }

            Ok(RegistryEvent::CandidateRegistered {
                candidate: Candidate {
                    id: CandidateId::new(),
                    election_id,
                    position_id,
                    voter_id,
                    platform_statement: platform_statement.clone(),
                    approval_status: ApprovalStatus::Pending,
                    applied_at,
                    sequence: state.next_sequence,
                },
            })
        })?;

        let RegistryEvent::CandidateRegistered { candidate } = event else {
            return Err(Error::internal("unexpected registry event"));
        };
        tracing::info!(
            "📝 Candidate application received: candidate={}, position={}",
            candidate.id,
            position_id
        );
        Ok(candidate)
    }

    /// PENDING → APPROVED
    pub fn approve(&self, candidate_id: CandidateId) -> Result<Candidate> {
        self.decide(candidate_id, ApprovalStatus::Approved)
    }

    /// PENDING → REJECTED
    pub fn reject(&self, candidate_id: CandidateId) -> Result<Candidate> {
        self.decide(candidate_id, ApprovalStatus::Rejected)
    }

    /// Withdraw a pending application
    pub fn withdraw(&self, candidate_id: CandidateId) -> Result<()> {
        self.record(|state| {
            if state.candidate(candidate_id)?.approval_status != ApprovalStatus::Pending {
                return Err(Error::NotPending { candidate_id });
            }
            Ok(RegistryEvent::CandidateWithdrawn { candidate_id })
        })?;

        tracing::info!("↩️  Candidate application withdrawn: candidate={}", candidate_id);
        Ok(())
    }

    /// Replace the platform statement of a pending application
    ///
    /// A blank statement clears it.
    pub fn update_application(
        &self,
        candidate_id: CandidateId,
        platform_statement: Option<String>,
    ) -> Result<Candidate> {
        let platform_statement = platform_statement
            .map(|statement| statement.trim().to_string())
            .filter(|statement| !statement.is_empty());
        self.record(|state| {
            if state.candidate(candidate_id)?.approval_status != ApprovalStatus::Pending {
                return Err(Error::NotPending { candidate_id });
            }
            Ok(RegistryEvent::CandidateUpdated {
                candidate_id,
                platform_statement: platform_statement.clone(),
            })
        })?;

        tracing::info!("✏️  Candidate application updated: candidate={}", candidate_id);
        self.candidate(candidate_id)
    }

    /// Approved candidates for a position, in registration order
    pub fn approved_candidates(&self, position_id: PositionId) -> Result<Vec<Candidate>> {
        let state = self.read()?;
        state.position(position_id)?;
        Ok(state
            .candidates_for(position_id)
            .filter(|c| c.is_approved())
            .cloned()
            .collect())
    }

    /// Positions of an election, in creation order
    pub fn positions_of(&self, election_id: ElectionId) -> Result<Vec<Position>> {
        let state = self.read()?;
        Ok(state
            .election_positions
            .get(&election_id)
            .into_iter()
            .flatten()
            .filter_map(|id| state.positions.get(id))
            .cloned()
            .collect())
    }

    pub fn position(&self, position_id: PositionId) -> Result<Position> {
        self.read()?.position(position_id).cloned()
    }

    pub fn candidate(&self, candidate_id: CandidateId) -> Result<Candidate> {
        self.read()?.candidate(candidate_id).cloned()
    }

    /// Every candidacy of an election regardless of status
    pub fn candidates_of(&self, election_id: ElectionId) -> Result<Vec<Candidate>> {
        let state = self.read()?;
        let mut candidates: Vec<_> = state
            .candidates
            .values()
            .filter(|c| c.election_id == election_id)
            .cloned()
            .collect();
        candidates.sort_by_key(|c| c.sequence);
        Ok(candidates)
    }

    /// Every application filed by a voter, oldest first
    pub fn applications_of(&self, voter_id: VoterId) -> Result<Vec<Candidate>> {
        let state = self.read()?;
        let mut applications: Vec<_> = state
            .candidates
            .values()
            .filter(|c| c.voter_id == voter_id)
            .cloned()
            .collect();
        applications.sort_by_key(|c| c.sequence);
        Ok(applications)
    }

    /// Applications awaiting an admin decision, oldest first
    pub fn pending_applications(&self) -> Result<Vec<Candidate>> {
        let state = self.read()?;
        let mut pending: Vec<_> = state
            .candidates
            .values()
            .filter(|c| c.approval_status == ApprovalStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|c| c.sequence);
        Ok(pending)
    }

    pub fn stats(&self) -> Result<RegistryStats> {
        let state = self.read()?;
        let mut stats = RegistryStats {
            positions: state.positions.len(),
            ..RegistryStats::default()
        };
        for candidate in state.candidates.values() {
            match candidate.approval_status {
                ApprovalStatus::Approved => stats.approved += 1,
                ApprovalStatus::Pending => stats.pending += 1,
                ApprovalStatus::Rejected => stats.rejected += 1,
            }
        }
        Ok(stats)
    }

    fn decide(&self, candidate_id: CandidateId, status: ApprovalStatus) -> Result<Candidate> {
        self.record(|state| {
            if state.candidate(candidate_id)?.approval_status != ApprovalStatus::Pending {
                return Err(Error::NotPending { candidate_id });
            }
            Ok(RegistryEvent::CandidateDecided {
                candidate_id,
                status,
            })
        })?;

        tracing::info!(
            "✅ Candidate decision recorded: candidate={}, status={:?}",
            candidate_id,
            status
        );
        self.candidate(candidate_id)
    }

    /// Validate and build an event under the write lock, journal it, then
    /// fold it into the state
    fn record(
        &self,
        build: impl FnOnce(&RegistryState) -> Result<RegistryEvent>,
    ) -> Result<RegistryEvent> {
        let mut state = self
            .state
            .write()
            .map_err(|_| Error::internal("Registry write error"))?;
        let event = build(&state)?;
        self.journal.append(&event)?;
        state.apply(&event);
        Ok(event)
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, RegistryState>> {
        self.state
            .read()
            .map_err(|_| Error::internal("Registry read error"))
    }
}
