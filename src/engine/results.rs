//! Tabulation of committed ballots
//!
//! Results are derived on demand from a snapshot of the ballot store and are
//! never stored. Tabulating the same snapshot twice yields the same output.
//!
//! Ranking uses standard competition ranking: candidates with equal counts
//! share a rank and the next rank skips accordingly (1, 1, 3). Every rank-1
//! candidate with at least one vote is a leader; two or more leaders make a
//! tie. Among equal counts candidates are listed in registration order.

use crate::engine::{BallotStore, CandidateRegistry, ElectionController};
use crate::types::{
    Ballot, Candidate, CandidateId, Election, ElectionId, ElectionStatus, Position, PositionId,
    Selection, VoterId,
};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Full results of one election
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectionResults {
    pub election_id: ElectionId,
    pub title: String,
    pub year: String,
    pub status: ElectionStatus,
    pub results_published: bool,
    pub cycle: u32,
    pub total_ballots_cast: usize,
    /// In position creation order
    pub positions: Vec<PositionResults>,
}

/// Tally of one position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionResults {
    pub position_id: PositionId,
    pub position_name: String,
    /// Ranked, highest count first
    pub candidates: Vec<CandidateTally>,
    pub none_of_the_above_votes: u64,
    /// Share of all selections made for this position, NOTA included
    pub none_of_the_above_percentage: f64,
    /// Sum of candidate votes; NOTA is not counted
    pub total_votes: u64,
    pub outcome: Outcome,
}

impl PositionResults {
    /// Candidates sharing first place with at least one vote
    pub fn leaders(&self) -> impl Iterator<Item = &CandidateTally> {
        self.candidates.iter().filter(|c| c.is_leader)
    }
}

/// Votes received by one candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateTally {
    pub candidate_id: CandidateId,
    /// The voter who ran as this candidate
    pub voter_id: VoterId,
    pub vote_count: u64,
    /// Share of `total_votes`, rounded to one decimal
    pub percentage: f64,
    pub rank: u32,
    pub is_leader: bool,
}

/// Who leads a position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    /// No candidate received a vote
    NoVotes,
    Winner { candidate_id: CandidateId },
    /// Several candidates share the highest count
    Tie { candidate_ids: Vec<CandidateId> },
}

/// Derives results from committed ballots
pub struct ResultsAggregator {
    controller: Arc<ElectionController>,
    registry: Arc<CandidateRegistry>,
    store: Arc<BallotStore>,
}

impl ResultsAggregator {
    pub fn new(
        controller: Arc<ElectionController>,
        registry: Arc<CandidateRegistry>,
        store: Arc<BallotStore>,
    ) -> Self {
        Self {
            controller,
            registry,
            store,
        }
    }

    /// Results for every position of an election
    pub fn election_results(&self, election_id: ElectionId) -> Result<ElectionResults> {
        let election = self.controller.get(election_id)?;
        let positions = self.registry.positions_of(election_id)?;
        let candidates = self.candidates_by_position(&positions)?;
        let ballots: Vec<Ballot> = self.store.tally(election_id)?.collect();

        let results = ElectionResults {
            total_ballots_cast: ballots.len(),
            positions: tabulate(&positions, &candidates, &ballots),
            ..summary(&election)
        };

        tracing::debug!(
            "📊 Results computed: election={}, ballots={}, positions={}",
            election_id,
            results.total_ballots_cast,
            results.positions.len()
        );
        Ok(results)
    }

    /// Results for a single position
    pub fn position_results(&self, position_id: PositionId) -> Result<PositionResults> {
        let position = self.registry.position(position_id)?;
        let candidates = self.candidates_by_position(std::slice::from_ref(&position))?;
        let ballots: Vec<Ballot> = self.store.tally(position.election_id)?.collect();

        tabulate(std::slice::from_ref(&position), &candidates, &ballots)
            .pop()
            .ok_or_else(|| crate::Error::internal("position missing from its own tally"))
    }

    fn candidates_by_position(
        &self,
        positions: &[Position],
    ) -> Result<HashMap<PositionId, Vec<Candidate>>> {
        positions
            .iter()
            .map(|position| {
                let approved = self.registry.approved_candidates(position.id)?;
                Ok((position.id, approved))
            })
            .collect()
    }
}

fn summary(election: &Election) -> ElectionResults {
    ElectionResults {
        election_id: election.id,
        title: election.title.clone(),
        year: election.year.clone(),
        status: election.status,
        results_published: election.results_published,
        cycle: election.cycle,
        total_ballots_cast: 0,
        positions: Vec::new(),
    }
}

/// Count `ballots` for each of `positions`
///
/// `candidates` holds the approved candidates per position; each of them
/// appears in the output even with zero votes.
pub fn tabulate(
    positions: &[Position],
    candidates: &HashMap<PositionId, Vec<Candidate>>,
    ballots: &[Ballot],
) -> Vec<PositionResults> {
    let mut counts: HashMap<PositionId, HashMap<CandidateId, u64>> = HashMap::new();
    let mut nota: HashMap<PositionId, u64> = HashMap::new();

    for ballot in ballots {
        for (position_id, selection) in &ballot.selections {
            match selection {
                Selection::Candidate(candidate_id) => {
                    *counts
                        .entry(*position_id)
                        .or_default()
                        .entry(*candidate_id)
                        .or_default() += 1;
                }
                Selection::NoneOfTheAbove => *nota.entry(*position_id).or_default() += 1,
            }
        }
    }

    let no_counts = HashMap::new();
    positions
        .iter()
        .map(|position| {
            tally_position(
                position,
                candidates.get(&position.id).map(Vec::as_slice).unwrap_or_default(),
                counts.get(&position.id).unwrap_or(&no_counts),
                nota.get(&position.id).copied().unwrap_or(0),
            )
        })
        .collect()
}

fn tally_position(
    position: &Position,
    candidates: &[Candidate],
    counts: &HashMap<CandidateId, u64>,
    nota: u64,
) -> PositionResults {
    let mut rows: Vec<(&Candidate, u64)> = candidates
        .iter()
        .map(|candidate| (candidate, counts.get(&candidate.id).copied().unwrap_or(0)))
        .collect();
    rows.sort_by(|(a, a_votes), (b, b_votes)| {
        b_votes.cmp(a_votes).then(a.sequence.cmp(&b.sequence))
    });

    let total_votes: u64 = rows.iter().map(|(_, votes)| votes).sum();
    let tallies: Vec<CandidateTally> = rows
        .iter()
        .map(|&(candidate, votes)| {
            let ahead = rows.iter().filter(|(_, other)| *other > votes).count();
            let rank = ahead as u32 + 1;
            CandidateTally {
                candidate_id: candidate.id,
                voter_id: candidate.voter_id,
                vote_count: votes,
                percentage: percentage(votes, total_votes),
                rank,
                is_leader: rank == 1 && votes > 0,
            }
        })
        .collect();

    let leaders: Vec<CandidateId> = tallies
        .iter()
        .filter(|t| t.is_leader)
        .map(|t| t.candidate_id)
        .collect();
    let outcome = match leaders.as_slice() {
        [] => Outcome::NoVotes,
        [winner] => Outcome::Winner {
            candidate_id: *winner,
        },
        _ => Outcome::Tie {
            candidate_ids: leaders,
        },
    };

    PositionResults {
        position_id: position.id,
        position_name: position.name.clone(),
        candidates: tallies,
        none_of_the_above_votes: nota,
        none_of_the_above_percentage: percentage(nota, total_votes + nota),
        total_votes,
        outcome,
    }
}

/// `part / whole` as a percentage rounded to one decimal; 0 when `whole` is 0
fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 / whole as f64 * 1000.0).round() / 10.0
}
