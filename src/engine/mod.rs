//! Election engine components

pub mod ballot_store;
pub mod controller;
pub mod eligibility;
pub mod registry;
pub mod results;
pub mod sweeper;
pub mod vote_caster;

// Re-export lifecycle types
pub use controller::ElectionController;
pub use sweeper::{AutoCloseSweeper, SweeperHandle};

// Re-export candidate and voter types
pub use eligibility::{MemoryVoterDirectory, VoterDirectory};
pub use registry::{CandidateRegistry, RegistryEvent, RegistryStats};

// Re-export ballot types
pub use ballot_store::{BallotStore, BallotStoreStats, IntegrityReport};
pub use vote_caster::VoteCaster;

// Re-export tabulation types
pub use results::{CandidateTally, ElectionResults, Outcome, PositionResults, ResultsAggregator, tabulate};
