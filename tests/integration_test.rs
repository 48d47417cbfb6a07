//! End-to-end election workflows through the public service
//!
//! Covers the full admin and voter journey:
//! - election setup, candidacy intake and approval
//! - voting inside the window, duplicate and late ballots
//! - auto-close, results and publication
//! - durability of every piece of state across restarts

use ballotbox::{
    Clock, ElectionService, EngineConfig, Error, Journals, ManualClock, Result,
    engine::{MemoryVoterDirectory, Outcome},
    types::{ElectionStatus, Selection, Selections, UserId},
};
use chrono::Duration;
use std::sync::Arc;

struct Harness {
    service: ElectionService,
    voters: Arc<MemoryVoterDirectory>,
    clock: ManualClock,
    journals: Journals,
}

impl Harness {
    fn new() -> Result<Self> {
        Self::on(Journals::in_memory())
    }

    fn on(journals: Journals) -> Result<Self> {
        let voters = Arc::new(MemoryVoterDirectory::new());
        let clock = ManualClock::starting_now();
        let service = ElectionService::with_journals(
            EngineConfig::for_testing(),
            journals.clone(),
            voters.clone(),
            Arc::new(clock.clone()),
        )?;
        Ok(Self {
            service,
            voters,
            clock,
            journals,
        })
    }

    /// Reopen the service on the same journals, keeping voters and clock
    fn restart(self) -> Result<Self> {
        let service = ElectionService::with_journals(
            EngineConfig::for_testing(),
            self.journals.clone(),
            self.voters.clone(),
            Arc::new(self.clock.clone()),
        )?;
        drop(self.service);
        Ok(Self { service, ..self })
    }
}

#[tokio::test]
async fn test_complete_election_workflow() -> Result<()> {
    println!("🗳️  Testing complete election workflow...");

    let h = Harness::new()?;
    let election = h
        .service
        .create_election("Student Council", "2025", Some("Annual vote".into()), None)?;
    let president = h.service.add_position(election.id, "President")?;
    let secretary = h.service.add_position(election.id, "Secretary")?;
    println!("✅ Election created with 2 positions");

    // Candidacy intake
    let alice = h.voters.register("alice")?;
    let carol = h.voters.register("carol")?;
    let c1 = h
        .service
        .apply_candidate(alice.id, election.id, president.id, Some("More study rooms".into()))?;
    let c2 = h
        .service
        .apply_candidate(carol.id, election.id, secretary.id, None)?;
    assert_eq!(h.service.pending_applications()?.len(), 2);

    h.service.approve_candidate(c1.id)?;
    h.service.reject_candidate(c2.id)?;
    println!("✅ Candidates decided");

    // 24 hour window
    let started = h.service.start_election(election.id, Some(Duration::hours(24)))?;
    assert_eq!(started.status, ElectionStatus::Running);
    assert_eq!(h.service.open_elections()?.len(), 1);

    let view = h.service.ballot_view(election.id)?;
    assert_eq!(view.positions[0].candidates.len(), 1);
    assert!(view.positions[1].candidates.is_empty());

    let bob = h.voters.register("bob")?;
    let ballot = Selections::from([
        (president.id, Selection::Candidate(c1.id)),
        (secretary.id, Selection::NoneOfTheAbove),
    ]);
    let receipt = h.service.submit_ballot(bob.id, election.id, ballot.clone())?;
    println!("✅ Ballot committed: {}", receipt.ballot_id);

    assert!(h.service.has_voted(bob.id, election.id)?);
    let status = h.service.vote_status(bob.id, election.id)?;
    assert_eq!(status.voted_at, Some(h.clock.now()));

    let duplicate = h.service.submit_ballot(bob.id, election.id, ballot.clone());
    assert!(duplicate.unwrap_err().is_already_voted());
    println!("✅ Duplicate ballot rejected");

    // Past the window: auto-close applies on the next read
    h.clock.advance(Duration::hours(25));
    let dave = h.voters.register("dave")?;
    assert!(matches!(
        h.service.submit_ballot(dave.id, election.id, ballot),
        Err(Error::ElectionNotOpen { .. })
    ));
    let closed = h.service.election(election.id)?;
    assert_eq!(closed.status, ElectionStatus::Stopped);
    assert!(closed.end_time.is_none());
    println!("✅ Election auto-closed after 24 hours");

    // Results
    let results = h.service.get_results(election.id)?;
    assert_eq!(results.total_ballots_cast, 1);
    let president_results = &results.positions[0];
    assert_eq!(president_results.candidates[0].vote_count, 1);
    assert_eq!(president_results.candidates[0].percentage, 100.0);
    assert_eq!(
        president_results.outcome,
        Outcome::Winner { candidate_id: c1.id }
    );
    let secretary_results = &results.positions[1];
    assert_eq!(secretary_results.none_of_the_above_votes, 1);
    assert_eq!(secretary_results.none_of_the_above_percentage, 100.0);
    assert_eq!(secretary_results.outcome, Outcome::NoVotes);

    assert!(matches!(
        h.service.published_results(election.id),
        Err(Error::ResultsWithheld { .. })
    ));
    h.service.publish_results(election.id)?;
    assert_eq!(h.service.published_results(election.id)?, {
        let mut expected = results.clone();
        expected.results_published = true;
        expected
    });
    println!("✅ Results published");

    Ok(())
}

#[tokio::test]
async fn test_published_results_reference_scenario() -> Result<()> {
    println!("📊 Testing 152 / 127 / 98 tally...");

    let h = Harness::new()?;
    let election = h.service.create_election("Council", "2025", None, None)?;
    let position = h.service.add_position(election.id, "President")?;

    let mut candidates = Vec::new();
    for name in ["ana", "ben", "cat"] {
        let voter = h.voters.register(name)?;
        let candidate = h
            .service
            .apply_candidate(voter.id, election.id, position.id, None)?;
        h.service.approve_candidate(candidate.id)?;
        candidates.push(candidate.id);
    }
    h.service.start_election(election.id, None)?;

    for (candidate, votes) in candidates.iter().zip([152, 127, 98]) {
        for n in 0..votes {
            let voter = h.voters.register(format!("voter-{candidate}-{n}"))?;
            h.service.submit_ballot(
                voter.id,
                election.id,
                Selections::from([(position.id, Selection::Candidate(*candidate))]),
            )?;
        }
    }
    h.service.stop_election(election.id)?;

    let results = h.service.position_results(position.id)?;
    assert_eq!(results.total_votes, 377);
    let percentages: Vec<f64> = results.candidates.iter().map(|c| c.percentage).collect();
    assert_eq!(percentages, vec![40.3, 33.7, 26.0]);
    assert_eq!(
        results.outcome,
        Outcome::Winner {
            candidate_id: candidates[0]
        }
    );
    println!("✅ Percentages: {percentages:?}");

    // Tabulating again gives the same answer
    assert_eq!(h.service.position_results(position.id)?, results);

    Ok(())
}

#[tokio::test]
async fn test_pause_resume_extend_workflow() -> Result<()> {
    println!("⏸️  Testing pause, resume and extend...");

    let h = Harness::new()?;
    let election = h.service.create_election("Council", "2025", None, None)?;
    let position = h.service.add_position(election.id, "President")?;
    let voter = h.voters.register("bob")?;
    let ballot = Selections::from([(position.id, Selection::NoneOfTheAbove)]);

    let started = h.service.start_election(election.id, Some(Duration::hours(2)))?;
    let original_end = started.end_time.expect("running election has an end");

    h.clock.advance(Duration::minutes(30));
    h.service.pause_election(election.id)?;
    assert!(matches!(
        h.service.submit_ballot(voter.id, election.id, ballot.clone()),
        Err(Error::ElectionNotOpen { .. })
    ));

    h.clock.advance(Duration::hours(1));
    let resumed = h.service.resume_election(election.id)?;
    assert_eq!(resumed.end_time, Some(original_end + Duration::hours(1)));

    let extended = h.service.extend_election(election.id, Duration::hours(3))?;
    assert_eq!(extended.end_time, Some(original_end + Duration::hours(4)));
    assert!(matches!(
        h.service.extend_election(election.id, Duration::zero()),
        Err(Error::Validation { .. })
    ));

    h.service.submit_ballot(voter.id, election.id, ballot)?;
    h.service.stop_election(election.id)?;
    assert!(matches!(
        h.service.pause_election(election.id),
        Err(Error::InvalidTransition { .. })
    ));
    println!("✅ Lifecycle transitions behave");

    Ok(())
}

#[tokio::test]
async fn test_state_survives_restart() -> Result<()> {
    println!("🔁 Testing restart durability...");

    let h = Harness::new()?;
    let election = h.service.create_election("Council", "2025", None, None)?;
    let position = h.service.add_position(election.id, "President")?;
    let alice = h.voters.register("alice")?;
    let candidate = h
        .service
        .apply_candidate(alice.id, election.id, position.id, None)?;
    h.service.approve_candidate(candidate.id)?;
    h.service.start_election(election.id, None)?;

    let bob = h.voters.register("bob")?;
    let ballot = Selections::from([(position.id, Selection::Candidate(candidate.id))]);
    h.service.submit_ballot(bob.id, election.id, ballot.clone())?;
    let before = h.service.get_results(election.id)?;

    let h = h.restart()?;
    assert_eq!(h.service.election(election.id)?.status, ElectionStatus::Running);
    assert!(h.service.has_voted(bob.id, election.id)?);
    assert!(
        h.service
            .submit_ballot(bob.id, election.id, ballot)
            .unwrap_err()
            .is_already_voted()
    );
    assert_eq!(h.service.get_results(election.id)?, before);
    assert!(h.service.candidate(candidate.id)?.is_approved());
    println!("✅ Elections, candidates and ballots restored");

    Ok(())
}

#[tokio::test]
async fn test_file_journals_survive_restart() -> Result<()> {
    println!("💾 Testing file-backed journals...");

    let dir = tempfile::tempdir()?;
    let h = Harness::on(Journals::on_disk(dir.path())?)?;
    let election = h.service.create_election("Council", "2025", None, None)?;
    let position = h.service.add_position(election.id, "President")?;
    h.service.start_election(election.id, None)?;

    let bob = h.voters.register("bob")?;
    let receipt = h.service.submit_ballot_for_user(
        &UserId::from("bob"),
        election.id,
        Selections::from([(position.id, Selection::NoneOfTheAbove)]),
    )?;

    // A fresh process reads everything back from disk
    let voters = h.voters.clone();
    let clock = h.clock.clone();
    drop(h);
    let service = ElectionService::with_journals(
        EngineConfig::for_testing(),
        Journals::on_disk(dir.path())?,
        voters,
        Arc::new(clock),
    )?;

    let status = service.vote_status(bob.id, election.id)?;
    assert_eq!(status.ballot_id, Some(receipt.ballot_id));
    assert!(service.verify_integrity(election.id)?.is_intact());
    assert_eq!(service.positions(election.id)?, vec![position]);
    println!("✅ File journals replayed");

    Ok(())
}
