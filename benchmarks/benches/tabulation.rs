use ballotbox::{
    engine::tabulate,
    types::{
        ApprovalStatus, Ballot, Candidate, CandidateId, ElectionId, Position, PositionId,
        Selection, Selections, VoterId,
    },
};
use chrono::Utc;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::collections::HashMap;
use std::hint::black_box;

struct Election {
    positions: Vec<Position>,
    candidates: HashMap<PositionId, Vec<Candidate>>,
}

fn election(positions: usize, candidates_per_position: usize) -> Election {
    let election_id = ElectionId::new();
    let mut sequence = 0;
    let positions: Vec<Position> = (0..positions)
        .map(|p| Position {
            id: PositionId::new(),
            election_id,
            name: format!("Position {p}"),
        })
        .collect();
    let candidates = positions
        .iter()
        .map(|position| {
            let slate = (0..candidates_per_position)
                .map(|_| {
                    sequence += 1;
                    Candidate {
                        id: CandidateId::new(),
                        election_id,
                        position_id: position.id,
                        voter_id: VoterId::new(),
                        platform_statement: None,
                        approval_status: ApprovalStatus::Approved,
                        applied_at: Utc::now(),
                        sequence,
                    }
                })
                .collect();
            (position.id, slate)
        })
        .collect();
    Election {
        positions,
        candidates,
    }
}

/// Ballots spread over the candidates, with every seventh selection a NOTA
fn ballots(election: &Election, count: usize) -> Vec<Ballot> {
    (0..count)
        .map(|i| {
            let selections: Selections = election
                .positions
                .iter()
                .map(|position| {
                    let slate = &election.candidates[&position.id];
                    let selection = if i % 7 == 0 {
                        Selection::NoneOfTheAbove
                    } else {
                        Selection::Candidate(slate[i % slate.len()].id)
                    };
                    (position.id, selection)
                })
                .collect();
            Ballot::new(
                election.positions[0].election_id,
                VoterId::new(),
                selections,
                Utc::now(),
            )
            .unwrap()
        })
        .collect()
}

fn bench_tabulation(c: &mut Criterion) {
    let mut group = c.benchmark_group("tabulation");
    let election = election(5, 4);

    for count in [100, 1_000, 10_000] {
        let ballots = ballots(&election, count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("ballots", count), &ballots, |b, ballots| {
            b.iter(|| {
                black_box(tabulate(
                    black_box(&election.positions),
                    black_box(&election.candidates),
                    black_box(ballots),
                ))
            })
        });
    }

    group.finish();
}

fn bench_digest(c: &mut Criterion) {
    let mut group = c.benchmark_group("ballot_digest");
    let election = election(5, 4);
    let ballot = ballots(&election, 1).remove(0);

    group.bench_function("seal", |b| {
        b.iter(|| {
            Ballot::new(
                ballot.election_id,
                black_box(ballot.voter_id),
                black_box(ballot.selections.clone()),
                ballot.submitted_at,
            )
            .unwrap()
        })
    });

    group.bench_function("verify", |b| {
        b.iter(|| assert!(black_box(&ballot).verify_digest().unwrap()))
    });

    group.finish();
}

criterion_group!(benches, bench_tabulation, bench_digest);

criterion_main!(benches);
