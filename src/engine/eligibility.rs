//! Voter eligibility
//!
//! Who is a voter, and whether they may vote, is decided by the identity side
//! of the system (verified account, completed student profile). The engine
//! only asks through [`VoterDirectory`].

use crate::types::{UserId, Voter, VoterId};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::RwLock;

/// Lookup of voters and their eligibility
pub trait VoterDirectory: Send + Sync {
    /// Whether the voter exists and may vote
    fn is_eligible_voter(&self, voter_id: VoterId) -> Result<bool>;

    /// The voter record attached to an account, if any
    fn resolve_voter_id(&self, user_id: &UserId) -> Result<Option<VoterId>>;
}

#[derive(Default)]
struct DirectoryState {
    voters: HashMap<VoterId, Voter>,
    by_user: HashMap<UserId, VoterId>,
}

/// In-memory voter directory
#[derive(Default)]
pub struct MemoryVoterDirectory {
    state: RwLock<DirectoryState>,
}

impl MemoryVoterDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an eligible voter for an account
    ///
    /// Registering the same account twice returns the existing voter.
    pub fn register(&self, user_id: impl Into<UserId>) -> Result<Voter> {
        let user_id = user_id.into();
        let mut state = self
            .state
            .write()
            .map_err(|_| Error::internal("Voter directory write error"))?;

        if let Some(existing) = state.by_user.get(&user_id).and_then(|id| state.voters.get(id)) {
            return Ok(existing.clone());
        }

        let voter = Voter {
            id: VoterId::new(),
            user_id: user_id.clone(),
            eligible: true,
        };
        state.by_user.insert(user_id, voter.id);
        state.voters.insert(voter.id, voter.clone());

        tracing::debug!("👤 Voter registered: voter={}, user={}", voter.id, voter.user_id);
        Ok(voter)
    }

    /// Grant or revoke the right to vote
    pub fn set_eligibility(&self, voter_id: VoterId, eligible: bool) -> Result<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| Error::internal("Voter directory write error"))?;
        let voter = state
            .voters
            .get_mut(&voter_id)
            .ok_or_else(|| Error::not_found("voter", voter_id))?;
        voter.eligible = eligible;

        tracing::info!("👤 Voter eligibility changed: voter={}, eligible={}", voter_id, eligible);
        Ok(())
    }

    pub fn voter(&self, voter_id: VoterId) -> Result<Voter> {
        self.state
            .read()
            .map_err(|_| Error::internal("Voter directory read error"))?
            .voters
            .get(&voter_id)
            .cloned()
            .ok_or_else(|| Error::not_found("voter", voter_id))
    }
}

impl VoterDirectory for MemoryVoterDirectory {
    fn is_eligible_voter(&self, voter_id: VoterId) -> Result<bool> {
        Ok(self
            .state
            .read()
            .map_err(|_| Error::internal("Voter directory read error"))?
            .voters
            .get(&voter_id)
            .is_some_and(|voter| voter.eligible))
    }

    fn resolve_voter_id(&self, user_id: &UserId) -> Result<Option<VoterId>> {
        Ok(self
            .state
            .read()
            .map_err(|_| Error::internal("Voter directory read error"))?
            .by_user
            .get(user_id)
            .copied())
    }
}
