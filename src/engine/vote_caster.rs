//! Ballot validation and submission
//!
//! Checks run in a fixed order so callers always see the same error for the
//! same request: eligibility, voting window, prior ballot, position coverage,
//! candidate approval. Coverage, approval and the commit run together under
//! the election's lock; the store's uniqueness index is the final arbiter.

use crate::clock::Clock;
use crate::engine::{BallotStore, CandidateRegistry, ElectionController, VoterDirectory};
use crate::types::{
    Ballot, BallotId, CastReceipt, ElectionId, PositionId, Selection, Selections, UserId, VoterId,
};
use crate::{Error, Result};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Validates and commits ballots
pub struct VoteCaster {
    controller: Arc<ElectionController>,
    registry: Arc<CandidateRegistry>,
    store: Arc<BallotStore>,
    voters: Arc<dyn VoterDirectory>,
    clock: Arc<dyn Clock>,
}

impl VoteCaster {
    pub fn new(
        controller: Arc<ElectionController>,
        registry: Arc<CandidateRegistry>,
        store: Arc<BallotStore>,
        voters: Arc<dyn VoterDirectory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            controller,
            registry,
            store,
            voters,
            clock,
        }
    }

    /// Validate and commit one ballot covering every position of the election
    pub fn submit(
        &self,
        voter_id: VoterId,
        election_id: ElectionId,
        selections: Selections,
    ) -> Result<BallotId> {
        self.submit_with_receipt(voter_id, election_id, selections)
            .map(|receipt| receipt.ballot_id)
    }

    /// Same as [`submit`](Self::submit), for a voter known only by account
    pub fn submit_for_user(
        &self,
        user_id: &UserId,
        election_id: ElectionId,
        selections: Selections,
    ) -> Result<CastReceipt> {
        let voter_id = self
            .voters
            .resolve_voter_id(user_id)?
            .ok_or_else(|| Error::NotEligible {
                voter: user_id.to_string(),
            })?;
        self.submit_with_receipt(voter_id, election_id, selections)
    }

    /// Same as [`submit`](Self::submit), returning the ballot's receipt
    pub fn submit_with_receipt(
        &self,
        voter_id: VoterId,
        election_id: ElectionId,
        selections: Selections,
    ) -> Result<CastReceipt> {
        if !self.voters.is_eligible_voter(voter_id)? {
            tracing::warn!("🚫 Ballot refused: voter {} is not eligible", voter_id);
            return Err(Error::NotEligible {
                voter: voter_id.to_string(),
            });
        }

        let now = self.clock.now();
        if !self.controller.can_accept_ballots(election_id, now)? {
            tracing::debug!("🚫 Ballot refused: election {} is not open", election_id);
            return Err(Error::ElectionNotOpen { election_id });
        }

        if self.store.has_voted(voter_id, election_id)? {
            tracing::debug!(
                "🚫 Ballot refused: voter {} already voted in {}",
                voter_id,
                election_id
            );
            return Err(Error::AlreadyVoted {
                voter_id,
                election_id,
            });
        }

        // Positions and approvals change only under the election's lock
        let receipt = self
            .controller
            .while_accepting(election_id, self.clock.now(), || {
                self.check_coverage(election_id, &selections)?;
                self.check_candidates(&selections)?;

                let ballot = Ballot::new(election_id, voter_id, selections, now)?;
                let receipt = ballot.receipt();
                self.store.commit(ballot)?;
                Ok(receipt)
            })?;

        tracing::info!(
            "✅ Ballot accepted: election={}, ballot={}",
            election_id,
            receipt.ballot_id
        );
        Ok(receipt)
    }

    /// The selection keys must equal the election's positions
    fn check_coverage(&self, election_id: ElectionId, selections: &Selections) -> Result<()> {
        let positions: BTreeSet<PositionId> = self
            .registry
            .positions_of(election_id)?
            .into_iter()
            .map(|position| position.id)
            .collect();

        let selected: BTreeSet<PositionId> = selections.keys().copied().collect();
        let missing: Vec<PositionId> = positions.difference(&selected).copied().collect();
        let unexpected: Vec<PositionId> = selected.difference(&positions).copied().collect();

        if missing.is_empty() && unexpected.is_empty() {
            return Ok(());
        }
        tracing::debug!(
            "🚫 Ballot refused: {} positions missing, {} unexpected",
            missing.len(),
            unexpected.len()
        );
        Err(Error::IncompletePositions {
            missing,
            unexpected,
        })
    }

    /// Every named candidate must be approved for the position it is filed under
    fn check_candidates(&self, selections: &Selections) -> Result<()> {
        for (&position_id, selection) in selections {
            let Selection::Candidate(candidate_id) = *selection else {
                continue;
            };
            let approved = self
                .registry
                .approved_candidates(position_id)?
                .iter()
                .any(|candidate| candidate.id == candidate_id);
            if !approved {
                tracing::debug!(
                    "🚫 Ballot refused: candidate {} not approved for position {}",
                    candidate_id,
                    position_id
                );
                return Err(Error::InvalidCandidate {
                    candidate_id,
                    position_id,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::EngineConfig;
    use crate::engine::MemoryVoterDirectory;
    use crate::storage::MemoryJournal;
    use crate::engine::RegistryEvent;
    use crate::types::{CandidateId, Election, Position, Timestamp};
    use chrono::Duration;
    use std::sync::Mutex;

    struct Fixture {
        caster: VoteCaster,
        controller: Arc<ElectionController>,
        registry: Arc<CandidateRegistry>,
        store: Arc<BallotStore>,
        voters: Arc<MemoryVoterDirectory>,
        ballot_journal: Arc<MemoryJournal<Ballot>>,
        clock: ManualClock,
        election_id: ElectionId,
        president: Position,
        secretary: Position,
        alice: CandidateId,
    }

    /// Clock that runs a one-off action on its n-th reading
    struct InterruptingClock {
        inner: ManualClock,
        pending: Mutex<Option<(usize, Box<dyn FnOnce() + Send>)>>,
    }

    impl InterruptingClock {
        fn interrupt_on(&self, nth_reading: usize, action: impl FnOnce() + Send + 'static) {
            *self.pending.lock().unwrap() = Some((nth_reading, Box::new(action)));
        }
    }

    impl Clock for InterruptingClock {
        fn now(&self) -> Timestamp {
            let due = {
                let mut pending = self.pending.lock().unwrap();
                match pending.take() {
                    Some((1, action)) => Some(action),
                    Some((n, action)) => {
                        *pending = Some((n - 1, action));
                        None
                    }
                    None => None,
                }
            };
            if let Some(action) = due {
                action();
            }
            self.inner.now()
        }
    }

    fn fixture() -> Fixture {
        let clock = ManualClock::starting_now();
        fixture_on(Arc::new(clock.clone()), clock)
    }

    fn fixture_on(shared_clock: Arc<dyn Clock>, clock: ManualClock) -> Fixture {
        let controller = Arc::new(
            ElectionController::open(
                Arc::new(MemoryJournal::<Election>::new()),
                shared_clock.clone(),
                &EngineConfig::for_testing(),
            )
            .unwrap(),
        );
        let registry = Arc::new(
            CandidateRegistry::open(
                Arc::new(MemoryJournal::<RegistryEvent>::new()),
                shared_clock.clone(),
            )
            .unwrap(),
        );
        let ballot_journal = Arc::new(MemoryJournal::<Ballot>::new());
        let store = Arc::new(BallotStore::open(ballot_journal.clone()).unwrap());
        let voters = Arc::new(MemoryVoterDirectory::new());

        let election_id = controller
            .create_election("Council", "2025", None, true)
            .unwrap()
            .id;
        let president = registry.add_position(election_id, "President").unwrap();
        let secretary = registry.add_position(election_id, "Secretary").unwrap();
        let applicant = voters.register("alice").unwrap();
        let alice = registry
            .submit_application(applicant.id, election_id, president.id, None)
            .unwrap()
            .id;
        registry.approve(alice).unwrap();
        controller.start(election_id, Duration::hours(24)).unwrap();

        let caster = VoteCaster::new(
            controller.clone(),
            registry.clone(),
            store.clone(),
            voters.clone(),
            shared_clock,
        );

        Fixture {
            caster,
            controller,
            registry,
            store,
            voters,
            ballot_journal,
            clock,
            election_id,
            president,
            secretary,
            alice,
        }
    }

    impl Fixture {
        fn full_ballot(&self) -> Selections {
            Selections::from([
                (self.president.id, Selection::Candidate(self.alice)),
                (self.secretary.id, Selection::NoneOfTheAbove),
            ])
        }
    }

    #[test]
    fn test_valid_ballot_is_committed() {
        let f = fixture();
        let voter = f.voters.register("bob").unwrap();

        let receipt = f
            .caster
            .submit_with_receipt(voter.id, f.election_id, f.full_ballot())
            .unwrap();

        assert!(f.store.has_voted(voter.id, f.election_id).unwrap());
        let stored = f.store.ballot(receipt.ballot_id).unwrap();
        assert_eq!(stored.digest, receipt.digest);
        assert_eq!(stored.selections, f.full_ballot());
    }

    #[test]
    fn test_second_ballot_rejected() {
        let f = fixture();
        let voter = f.voters.register("bob").unwrap();

        f.caster.submit(voter.id, f.election_id, f.full_ballot()).unwrap();
        let err = f
            .caster
            .submit(voter.id, f.election_id, f.full_ballot())
            .unwrap_err();
        assert!(err.is_already_voted());
        assert_eq!(f.store.ballot_count(f.election_id).unwrap(), 1);
    }

    #[test]
    fn test_ineligible_voter_rejected_first() {
        let f = fixture();
        let voter = f.voters.register("bob").unwrap();
        f.voters.set_eligibility(voter.id, false).unwrap();
        f.controller.pause(f.election_id).unwrap();

        // Eligibility is checked before the window
        assert!(matches!(
            f.caster.submit(voter.id, f.election_id, Selections::new()),
            Err(Error::NotEligible { .. })
        ));
        assert!(matches!(
            f.caster.submit(VoterId::new(), f.election_id, f.full_ballot()),
            Err(Error::NotEligible { .. })
        ));
    }

    #[test]
    fn test_closed_window_rejected() {
        let f = fixture();
        let voter = f.voters.register("bob").unwrap();

        f.controller.pause(f.election_id).unwrap();
        assert!(matches!(
            f.caster.submit(voter.id, f.election_id, f.full_ballot()),
            Err(Error::ElectionNotOpen { .. })
        ));

        f.controller.resume(f.election_id).unwrap();
        f.clock.advance(Duration::hours(24));
        assert!(matches!(
            f.caster.submit(voter.id, f.election_id, f.full_ballot()),
            Err(Error::ElectionNotOpen { .. })
        ));
        assert!(f.ballot_journal.is_empty());
    }

    #[test]
    fn test_missing_and_unexpected_positions() {
        let f = fixture();
        let voter = f.voters.register("bob").unwrap();

        let partial = Selections::from([(f.president.id, Selection::NoneOfTheAbove)]);
        match f.caster.submit(voter.id, f.election_id, partial) {
            Err(Error::IncompletePositions {
                missing,
                unexpected,
            }) => {
                assert_eq!(missing, vec![f.secretary.id]);
                assert!(unexpected.is_empty());
            }
            other => panic!("expected IncompletePositions, got {other:?}"),
        }

        let stray = PositionId::new();
        let mut extra = f.full_ballot();
        extra.insert(stray, Selection::NoneOfTheAbove);
        match f.caster.submit(voter.id, f.election_id, extra) {
            Err(Error::IncompletePositions { unexpected, .. }) => {
                assert_eq!(unexpected, vec![stray]);
            }
            other => panic!("expected IncompletePositions, got {other:?}"),
        }
        assert!(!f.store.has_voted(voter.id, f.election_id).unwrap());
    }

    #[test]
    fn test_candidate_must_be_approved_for_that_position() {
        let f = fixture();
        let voter = f.voters.register("bob").unwrap();

        // Approved, but filed under the wrong position
        let misplaced = Selections::from([
            (f.president.id, Selection::NoneOfTheAbove),
            (f.secretary.id, Selection::Candidate(f.alice)),
        ]);
        assert!(matches!(
            f.caster.submit(voter.id, f.election_id, misplaced),
            Err(Error::InvalidCandidate { .. })
        ));

        // Still pending
        let carol = f.voters.register("carol").unwrap();
        let pending = f
            .registry
            .submit_application(carol.id, f.election_id, f.secretary.id, None)
            .unwrap();
        let with_pending = Selections::from([
            (f.president.id, Selection::Candidate(f.alice)),
            (f.secretary.id, Selection::Candidate(pending.id)),
        ]);
        assert!(matches!(
            f.caster.submit(voter.id, f.election_id, with_pending),
            Err(Error::InvalidCandidate { .. })
        ));
    }

    #[test]
    fn test_submit_for_user() {
        let f = fixture();
        f.voters.register("bob").unwrap();

        let receipt = f
            .caster
            .submit_for_user(&UserId::from("bob"), f.election_id, f.full_ballot())
            .unwrap();
        assert_eq!(receipt.election_id, f.election_id);

        assert!(matches!(
            f.caster
                .submit_for_user(&UserId::from("mallory"), f.election_id, f.full_ballot()),
            Err(Error::NotEligible { .. })
        ));
    }

    #[test]
    fn test_positions_added_mid_submission_are_enforced() {
        let manual = ManualClock::starting_now();
        let clock = Arc::new(InterruptingClock {
            inner: manual.clone(),
            pending: Mutex::new(None),
        });
        let f = fixture_on(clock.clone(), manual);
        let voter = f.voters.register("bob").unwrap();

        // Between the early checks and the commit an admin restarts the
        // election with an extra position
        let controller = f.controller.clone();
        let registry = f.registry.clone();
        let election_id = f.election_id;
        let treasurer = Arc::new(Mutex::new(None));
        let added = treasurer.clone();
        clock.interrupt_on(2, move || {
            controller.stop(election_id).unwrap();
            let position = registry.add_position(election_id, "Treasurer").unwrap();
            *added.lock().unwrap() = Some(position.id);
            controller.start(election_id, Duration::hours(24)).unwrap();
        });

        match f.caster.submit(voter.id, f.election_id, f.full_ballot()) {
            Err(Error::IncompletePositions { missing, unexpected }) => {
                assert_eq!(missing, vec![treasurer.lock().unwrap().unwrap()]);
                assert!(unexpected.is_empty());
            }
            other => panic!("expected IncompletePositions, got {other:?}"),
        }
        assert!(!f.store.has_voted(voter.id, f.election_id).unwrap());
        assert!(f.ballot_journal.is_empty());
        assert_eq!(f.registry.positions_of(f.election_id).unwrap().len(), 3);
    }

    #[test]
    fn test_storage_failure_is_retryable() {
        let f = fixture();
        let voter = f.voters.register("bob").unwrap();

        f.ballot_journal.set_unavailable(true);
        let err = f
            .caster
            .submit(voter.id, f.election_id, f.full_ballot())
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(!f.store.has_voted(voter.id, f.election_id).unwrap());

        f.ballot_journal.set_unavailable(false);
        f.caster.submit(voter.id, f.election_id, f.full_ballot()).unwrap();
    }
}
