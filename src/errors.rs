//! Error handling for the election engine

use crate::types::{CandidateId, ElectionId, ElectionStatus, PositionId, VoterId};

/// Result type alias for the election engine
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the election engine
///
/// Every variant is scoped to a single request. Only [`Error::StorageUnavailable`]
/// is worth retrying; everything else describes a caller mistake or a state
/// that will not change by asking again.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Election state machine misuse
    #[error("cannot {action} election {election_id} while it is {status}")]
    InvalidTransition {
        election_id: ElectionId,
        action: &'static str,
        status: ElectionStatus,
    },

    /// Ballot submitted outside a running voting window
    #[error("election {election_id} is not accepting ballots")]
    ElectionNotOpen { election_id: ElectionId },

    /// The voter already has a committed ballot for this election
    #[error("voter {voter_id} has already voted in election {election_id}")]
    AlreadyVoted {
        voter_id: VoterId,
        election_id: ElectionId,
    },

    /// Ballot does not cover exactly the positions of the election
    #[error(
        "ballot must select every position exactly once (missing: {}, unexpected: {})",
        display_ids(.missing),
        display_ids(.unexpected)
    )]
    IncompletePositions {
        missing: Vec<PositionId>,
        unexpected: Vec<PositionId>,
    },

    /// Selection names a candidate that is not approved for that position
    #[error("candidate {candidate_id} is not an approved candidate for position {position_id}")]
    InvalidCandidate {
        candidate_id: CandidateId,
        position_id: PositionId,
    },

    /// Voter is unknown or not allowed to vote
    #[error("voter {voter} is not eligible to vote")]
    NotEligible { voter: String },

    /// Approval, rejection or withdrawal of a candidate that is not pending
    #[error("candidate {candidate_id} is not pending approval")]
    NotPending { candidate_id: CandidateId },

    /// The voter already applied for a position in this election
    #[error("voter {voter_id} has already applied for a position in election {election_id}")]
    AlreadyApplied {
        voter_id: VoterId,
        election_id: ElectionId,
    },

    /// Candidate records are frozen once results are published
    #[error("candidates of election {election_id} are locked after results publication")]
    CandidateLocked { election_id: ElectionId },

    /// Results have not been published yet
    #[error("results of election {election_id} have not been published")]
    ResultsWithheld { election_id: ElectionId },

    /// Referenced entity does not exist
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Input validation errors
    #[error("Validation failed: {field}")]
    Validation { field: String },

    /// Durable storage could not be read or written
    #[error("Storage unavailable: {message}")]
    StorageUnavailable { message: String },

    /// Persisted data failed an integrity check
    #[error("Storage corrupted: {message}")]
    Corrupted { message: String },

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

fn display_ids(ids: &[PositionId]) -> String {
    if ids.is_empty() {
        return "none".to_string();
    }
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl Error {
    /// Create a new not-found error
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Create a new validation error
    pub fn validation(field: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
        }
    }

    /// Create a new storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::StorageUnavailable {
            message: message.into(),
        }
    }

    /// Create a new corruption error
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Create a new internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether a caller may reasonably retry the same request
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageUnavailable { .. })
    }

    /// Whether this is the "you already voted" condition
    pub fn is_already_voted(&self) -> bool {
        matches!(self, Self::AlreadyVoted { .. })
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::storage(err.to_string())
    }
}

/// Convenience macros for creating specific error types
#[macro_export]
macro_rules! storage_error {
    ($msg:expr) => {
        $crate::Error::storage($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::Error::storage(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! validation_error {
    ($msg:expr) => {
        $crate::Error::validation($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::Error::validation(format!($fmt, $($arg)*))
    };
}
