//! # Core Types for the Election Engine
//!
//! This module defines the data model shared by every engine component:
//! elections and their lifecycle status, positions, candidates, voters and
//! the immutable ballots they cast.
//!
//! Identifiers are UUID v4 values wrapped in dedicated newtypes so that a
//! position identifier can never be passed where a candidate identifier is
//! expected. All of them serialize transparently as plain UUID strings.
//!
//! ## Usage Examples
//!
//! ```rust
//! use ballotbox::types::*;
//! use chrono::Utc;
//!
//! let election = Election::new("Student Council", "2025", None, true, Utc::now());
//! assert_eq!(election.status, ElectionStatus::Stopped);
//! assert!(!election.accepts_ballots(Utc::now()));
//! ```

use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Point in time used throughout the engine (UTC)
pub type Timestamp = DateTime<Utc>;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a fresh random identifier
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

uuid_id!(
    /// Identifier of an [`Election`]
    ElectionId
);
uuid_id!(
    /// Identifier of a [`Position`]
    PositionId
);
uuid_id!(
    /// Identifier of a [`Candidate`]
    CandidateId
);
uuid_id!(
    /// Identifier of a [`Voter`]
    VoterId
);
uuid_id!(
    /// Identifier of a committed [`Ballot`]
    BallotId
);

/// Account identifier issued by the external identity system
///
/// The engine never interprets it; it is only resolved to a [`VoterId`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Election lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ElectionStatus {
    /// Not accepting ballots. Initial state and end of every cycle.
    Stopped,
    /// Accepting ballots inside the voting window.
    Running,
    /// Temporarily halted; the remaining window is kept for resumption.
    Paused,
}

impl fmt::Display for ElectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Stopped => "STOPPED",
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
        };
        f.write_str(label)
    }
}

/// An election and its voting window
///
/// Only the [`ElectionController`](crate::engine::ElectionController) mutates
/// `status`, `start_time`, `end_time` and `paused_at`. The window fields are
/// `None` whenever the election is stopped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Election {
    pub id: ElectionId,
    pub title: String,
    /// Year label shown to voters, e.g. "2025"
    pub year: String,
    pub description: Option<String>,
    pub status: ElectionStatus,
    pub start_time: Option<Timestamp>,
    pub end_time: Option<Timestamp>,
    /// Set while paused; used to give the paused time back on resume
    pub paused_at: Option<Timestamp>,
    /// Stop automatically once `end_time` has passed
    pub auto_close: bool,
    pub results_published: bool,
    /// Number of times the election has been started
    pub cycle: u32,
    pub created_at: Timestamp,
}

impl Election {
    /// Create a stopped election with no voting window
    pub fn new(
        title: impl Into<String>,
        year: impl Into<String>,
        description: Option<String>,
        auto_close: bool,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: ElectionId::new(),
            title: title.into(),
            year: year.into(),
            description,
            status: ElectionStatus::Stopped,
            start_time: None,
            end_time: None,
            paused_at: None,
            auto_close,
            results_published: false,
            cycle: 0,
            created_at,
        }
    }

    /// Whether `now` falls inside `[start_time, end_time)`
    pub fn window_contains(&self, now: Timestamp) -> bool {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => start <= now && now < end,
            _ => false,
        }
    }

    /// Whether a running election has reached the end of its window
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.status == ElectionStatus::Running && self.end_time.is_some_and(|end| now >= end)
    }

    /// Whether ballots may be committed at `now`
    ///
    /// This is a pure check on a snapshot; the controller applies the lazy
    /// auto-close transition before relying on it.
    pub fn accepts_ballots(&self, now: Timestamp) -> bool {
        self.status == ElectionStatus::Running && self.window_contains(now)
    }
}

/// A role candidates run for inside one election
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Position {
    pub id: PositionId,
    pub election_id: ElectionId,
    pub name: String,
}

/// Admin decision on a candidacy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

/// A voter's application to run for a position
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    pub id: CandidateId,
    pub election_id: ElectionId,
    pub position_id: PositionId,
    /// The voter who applied
    pub voter_id: VoterId,
    pub platform_statement: Option<String>,
    pub approval_status: ApprovalStatus,
    pub applied_at: Timestamp,
    /// Registration order inside the registry, used to order equal tallies
    pub sequence: u64,
}

impl Candidate {
    pub fn is_approved(&self) -> bool {
        self.approval_status == ApprovalStatus::Approved
    }
}

/// A verified, profile-complete student as seen by the engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Voter {
    pub id: VoterId,
    pub user_id: UserId,
    pub eligible: bool,
}

/// What a ballot records for one position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    Candidate(CandidateId),
    NoneOfTheAbove,
}

impl Selection {
    pub fn candidate(&self) -> Option<CandidateId> {
        match self {
            Self::Candidate(id) => Some(*id),
            Self::NoneOfTheAbove => None,
        }
    }
}

/// Per-position selections of one ballot, ordered by position
pub type Selections = BTreeMap<PositionId, Selection>;

/// One voter's committed, immutable ballot for one election
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ballot {
    pub id: BallotId,
    pub election_id: ElectionId,
    pub voter_id: VoterId,
    pub selections: Selections,
    pub submitted_at: Timestamp,
    /// Hex-encoded blake3 digest over every other field
    pub digest: String,
}

#[derive(Serialize)]
struct DigestInput<'a> {
    id: &'a BallotId,
    election_id: &'a ElectionId,
    voter_id: &'a VoterId,
    selections: &'a Selections,
    submitted_at: &'a Timestamp,
}

impl Ballot {
    /// Build a ballot and seal it with its content digest
    pub fn new(
        election_id: ElectionId,
        voter_id: VoterId,
        selections: Selections,
        submitted_at: Timestamp,
    ) -> Result<Self> {
        let mut ballot = Self {
            id: BallotId::new(),
            election_id,
            voter_id,
            selections,
            submitted_at,
            digest: String::new(),
        };
        ballot.digest = ballot.compute_digest()?;
        Ok(ballot)
    }

    /// Recompute the digest from the ballot content
    pub fn compute_digest(&self) -> Result<String> {
        let encoded = serde_json::to_vec(&DigestInput {
            id: &self.id,
            election_id: &self.election_id,
            voter_id: &self.voter_id,
            selections: &self.selections,
            submitted_at: &self.submitted_at,
        })?;
        Ok(hex::encode(blake3::hash(&encoded).as_bytes()))
    }

    /// Check the stored digest against the content in constant time
    pub fn verify_digest(&self) -> Result<bool> {
        use subtle::ConstantTimeEq;
        let expected = self.compute_digest()?;
        Ok(expected.as_bytes().ct_eq(self.digest.as_bytes()).into())
    }

    /// Receipt handed back to the voter after a successful commit
    pub fn receipt(&self) -> CastReceipt {
        CastReceipt {
            ballot_id: self.id,
            election_id: self.election_id,
            submitted_at: self.submitted_at,
            digest: self.digest.clone(),
        }
    }
}

/// Proof of a committed ballot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CastReceipt {
    pub ballot_id: BallotId,
    pub election_id: ElectionId,
    pub submitted_at: Timestamp,
    pub digest: String,
}

/// Whether and when a voter voted in an election
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoteStatus {
    pub has_voted: bool,
    pub voted_at: Option<Timestamp>,
    pub ballot_id: Option<BallotId>,
}
