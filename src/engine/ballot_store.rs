//! Durable, append-only store of committed ballots
//!
//! The store owns the `(voter, election)` uniqueness index. [`BallotStore::commit`]
//! is the only write path: under one write lock it checks the index, appends
//! the ballot to the journal and then inserts it. Either the whole ballot and
//! its index entry become visible, or nothing does.

use crate::storage::Journal;
use crate::types::{Ballot, BallotId, ElectionId, VoteStatus, VoterId};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Store-wide counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotStoreStats {
    pub total_ballots: usize,
    pub elections_with_ballots: usize,
    pub rejected_duplicates: u64,
}

/// Result of re-verifying every ballot digest of an election
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub election_id: ElectionId,
    pub ballots_checked: usize,
    pub mismatched: Vec<BallotId>,
}

impl IntegrityReport {
    pub fn is_intact(&self) -> bool {
        self.mismatched.is_empty()
    }
}

#[derive(Default)]
struct StoreState {
    ballots: HashMap<BallotId, Ballot>,
    /// The uniqueness index
    by_voter: HashMap<(VoterId, ElectionId), BallotId>,
    /// Commit order per election
    by_election: HashMap<ElectionId, Vec<BallotId>>,
    rejected_duplicates: u64,
}

impl StoreState {
    fn insert(&mut self, ballot: Ballot) {
        self.by_voter
            .insert((ballot.voter_id, ballot.election_id), ballot.id);
        self.by_election
            .entry(ballot.election_id)
            .or_default()
            .push(ballot.id);
        self.ballots.insert(ballot.id, ballot);
    }
}

/// Committed ballots and the one-ballot-per-voter index
pub struct BallotStore {
    state: RwLock<StoreState>,
    journal: Arc<dyn Journal<Ballot>>,
}

impl BallotStore {
    /// Rebuild the store, and its uniqueness index, from the journal
    ///
    /// A journal holding two ballots for the same voter and election, or a
    /// ballot whose digest does not match its content, is rejected.
    pub fn open(journal: Arc<dyn Journal<Ballot>>) -> Result<Self> {
        let mut state = StoreState::default();
        for ballot in journal.replay()? {
            if !ballot.verify_digest()? {
                return Err(Error::corrupted(format!(
                    "ballot {} failed digest verification",
                    ballot.id
                )));
            }
            if state
                .by_voter
                .contains_key(&(ballot.voter_id, ballot.election_id))
                || state.ballots.contains_key(&ballot.id)
            {
                return Err(Error::corrupted(format!(
                    "duplicate ballot {} for voter {} in election {}",
                    ballot.id, ballot.voter_id, ballot.election_id
                )));
            }
            state.insert(ballot);
        }

        tracing::info!("🗳️  Ballot store opened with {} ballots", state.ballots.len());

        Ok(Self {
            state: RwLock::new(state),
            journal,
        })
    }

    /// Whether the voter has a committed ballot for the election
    pub fn has_voted(&self, voter_id: VoterId, election_id: ElectionId) -> Result<bool> {
        Ok(self.read()?.by_voter.contains_key(&(voter_id, election_id)))
    }

    /// Whether and when the voter voted
    pub fn vote_status(&self, voter_id: VoterId, election_id: ElectionId) -> Result<VoteStatus> {
        let state = self.read()?;
        let ballot = state
            .by_voter
            .get(&(voter_id, election_id))
            .and_then(|id| state.ballots.get(id));

        Ok(VoteStatus {
            has_voted: ballot.is_some(),
            voted_at: ballot.map(|b| b.submitted_at),
            ballot_id: ballot.map(|b| b.id),
        })
    }

    /// Atomically record a ballot and its uniqueness marker
    ///
    /// Fails with [`Error::AlreadyVoted`] if the voter already has a ballot for
    /// the election, and with [`Error::StorageUnavailable`] if the journal
    /// write fails; in both cases nothing is recorded.
    pub fn commit(&self, ballot: Ballot) -> Result<BallotId> {
        let mut state = self
            .state
            .write()
            .map_err(|_| Error::internal("Ballot store write error"))?;

        let key = (ballot.voter_id, ballot.election_id);
        if state.by_voter.contains_key(&key) {
            state.rejected_duplicates += 1;
            tracing::warn!(
                "🚫 Duplicate ballot rejected: voter={}, election={}",
                ballot.voter_id,
                ballot.election_id
            );
            return Err(Error::AlreadyVoted {
                voter_id: ballot.voter_id,
                election_id: ballot.election_id,
            });
        }
        if state.ballots.contains_key(&ballot.id) {
            return Err(Error::internal(format!("ballot id {} reused", ballot.id)));
        }

        self.journal.append(&ballot)?;

        let ballot_id = ballot.id;
        tracing::info!(
            "🗳️  Ballot committed: ballot={}, election={}, positions={}",
            ballot_id,
            ballot.election_id,
            ballot.selections.len()
        );
        state.insert(ballot);
        Ok(ballot_id)
    }

    /// Committed ballots of an election, in commit order
    ///
    /// The ballots are a snapshot taken under the read lock, so the iterator
    /// never reflects commits that happen while it is consumed.
    pub fn tally(&self, election_id: ElectionId) -> Result<impl Iterator<Item = Ballot> + use<>> {
        let state = self.read()?;
        let ballots: Vec<Ballot> = state
            .by_election
            .get(&election_id)
            .into_iter()
            .flatten()
            .filter_map(|id| state.ballots.get(id))
            .cloned()
            .collect();
        Ok(ballots.into_iter())
    }

    pub fn ballot(&self, ballot_id: BallotId) -> Result<Ballot> {
        self.read()?
            .ballots
            .get(&ballot_id)
            .cloned()
            .ok_or_else(|| Error::not_found("ballot", ballot_id))
    }

    pub fn ballot_count(&self, election_id: ElectionId) -> Result<usize> {
        Ok(self
            .read()?
            .by_election
            .get(&election_id)
            .map_or(0, Vec::len))
    }

    /// Recompute the digest of every ballot of an election
    pub fn verify_integrity(&self, election_id: ElectionId) -> Result<IntegrityReport> {
        let mut report = IntegrityReport {
            election_id,
            ballots_checked: 0,
            mismatched: Vec::new(),
        };
        for ballot in self.tally(election_id)? {
            report.ballots_checked += 1;
            if !ballot.verify_digest()? {
                report.mismatched.push(ballot.id);
            }
        }

        if !report.is_intact() {
            tracing::error!(
                "❌ Integrity check failed: election={}, mismatched={}",
                election_id,
                report.mismatched.len()
            );
        }
        Ok(report)
    }

    pub fn stats(&self) -> Result<BallotStoreStats> {
        let state = self.read()?;
        Ok(BallotStoreStats {
            total_ballots: state.ballots.len(),
            elections_with_ballots: state.by_election.len(),
            rejected_duplicates: state.rejected_duplicates,
        })
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, StoreState>> {
        self.state
            .read()
            .map_err(|_| Error::internal("Ballot store read error"))
    }
}
