//! Election state machine and voting-window clock
//!
//! The controller is the only writer of an election's status and window.
//! Each election sits behind its own mutex, so transitions on one election are
//! serialized while different elections proceed independently. A transition
//! that was already applied wins; a caller acting on stale state gets
//! [`Error::InvalidTransition`].
//!
//! Auto-close is evaluated lazily: every access to an election first stops it
//! if `auto_close` is set and its window has run out. [`sweep_expired`]
//! performs the same check proactively for the background sweeper.
//!
//! [`sweep_expired`]: ElectionController::sweep_expired

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::storage::Journal;
use crate::types::{Election, ElectionId, ElectionStatus, Timestamp};
use crate::{Error, Result, validation_error};
use chrono::Duration;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

type ElectionHandle = Arc<Mutex<Election>>;

/// Owner of every election's lifecycle state
pub struct ElectionController {
    elections: RwLock<HashMap<ElectionId, ElectionHandle>>,
    journal: Arc<dyn Journal<Election>>,
    clock: Arc<dyn Clock>,
    max_extension: Duration,
}

impl ElectionController {
    /// Rebuild the controller from its journal
    ///
    /// The journal holds a snapshot after every change; the last snapshot per
    /// election wins.
    pub fn open(
        journal: Arc<dyn Journal<Election>>,
        clock: Arc<dyn Clock>,
        config: &EngineConfig,
    ) -> Result<Self> {
        let mut elections = HashMap::new();
        for snapshot in journal.replay()? {
            elections.insert(snapshot.id, snapshot);
        }

        tracing::info!("🗂️  Election controller opened with {} elections", elections.len());

        Ok(Self {
            elections: RwLock::new(
                elections
                    .into_iter()
                    .map(|(id, election)| (id, Arc::new(Mutex::new(election))))
                    .collect(),
            ),
            journal,
            clock,
            max_extension: config.max_extension(),
        })
    }

    /// Register a new, stopped election
    pub fn create_election(
        &self,
        title: &str,
        year: &str,
        description: Option<String>,
        auto_close: bool,
    ) -> Result<Election> {
        if title.trim().is_empty() {
            return Err(validation_error!("title"));
        }

        let election = Election::new(title.trim(), year.trim(), description, auto_close, self.clock.now());

        let mut elections = self
            .elections
            .write()
            .map_err(|_| Error::internal("Election registry write error"))?;
        self.journal.append(&election)?;
        elections.insert(election.id, Arc::new(Mutex::new(election.clone())));

        tracing::info!("🆕 Election created: id={}, title={}", election.id, election.title);
        Ok(election)
    }

    /// STOPPED → RUNNING with a window of `duration` starting now
    pub fn start(&self, election_id: ElectionId, duration: Duration) -> Result<Election> {
        self.start_when(election_id, duration, |_| Ok(()))
    }

    /// Like [`start`](Self::start), but only once `ready` accepts the stopped
    /// election; `ready` runs under the election's lock
    pub fn start_when(
        &self,
        election_id: ElectionId,
        duration: Duration,
        ready: impl FnOnce(&Election) -> Result<()>,
    ) -> Result<Election> {
        if duration <= Duration::zero() {
            return Err(validation_error!("duration must be positive"));
        }

        let election = self.transition(election_id, |election, now| {
            require(election, "start", &[ElectionStatus::Stopped])?;
            ready(election)?;
            let end = window_end(now, duration)?;
            election.status = ElectionStatus::Running;
            election.start_time = Some(now);
            election.end_time = Some(end);
            election.paused_at = None;
            election.results_published = false;
            election.cycle += 1;
            Ok(())
        })?;

        tracing::info!(
            "▶️  Election started: id={}, cycle={}, window={:?}..{:?}",
            election.id,
            election.cycle,
            election.start_time,
            election.end_time
        );
        Ok(election)
    }

    /// RUNNING → PAUSED; the remaining window is kept
    pub fn pause(&self, election_id: ElectionId) -> Result<Election> {
        let election = self.transition(election_id, |election, now| {
            require(election, "pause", &[ElectionStatus::Running])?;
            election.status = ElectionStatus::Paused;
            election.paused_at = Some(now);
            Ok(())
        })?;

        tracing::info!("⏸️  Election paused: id={}", election.id);
        Ok(election)
    }

    /// PAUSED → RUNNING; the end of the window moves by the time spent paused
    pub fn resume(&self, election_id: ElectionId) -> Result<Election> {
        let election = self.transition(election_id, |election, now| {
            require(election, "resume", &[ElectionStatus::Paused])?;
            if let (Some(paused_at), Some(end)) = (election.paused_at, election.end_time) {
                let paused_for = (now - paused_at).max(Duration::zero());
                election.end_time = Some(window_end(end, paused_for)?);
            }
            election.status = ElectionStatus::Running;
            election.paused_at = None;
            Ok(())
        })?;

        tracing::info!(
            "▶️  Election resumed: id={}, ends={:?}",
            election.id,
            election.end_time
        );
        Ok(election)
    }

    /// RUNNING or PAUSED → STOPPED; clears the window
    pub fn stop(&self, election_id: ElectionId) -> Result<Election> {
        let election = self.transition(election_id, |election, _now| {
            require(
                election,
                "stop",
                &[ElectionStatus::Running, ElectionStatus::Paused],
            )?;
            close(election);
            Ok(())
        })?;

        tracing::info!("⏹️  Election stopped: id={}", election.id);
        Ok(election)
    }

    /// Push the end of a running election's window back by `delta`
    pub fn extend(&self, election_id: ElectionId, delta: Duration) -> Result<Election> {
        if delta <= Duration::zero() {
            return Err(validation_error!("extension must be positive"));
        }
        if delta > self.max_extension {
            return Err(validation_error!(
                "extension exceeds the maximum of {} hours",
                self.max_extension.num_hours()
            ));
        }

        let election = self.transition(election_id, |election, _now| {
            require(election, "extend", &[ElectionStatus::Running])?;
            election.end_time = election
                .end_time
                .map(|end| window_end(end, delta))
                .transpose()?;
            Ok(())
        })?;

        tracing::info!(
            "⏩ Election extended: id={}, ends={:?}",
            election.id,
            election.end_time
        );
        Ok(election)
    }

    /// Mark the results of a stopped election as published
    pub fn publish_results(&self, election_id: ElectionId) -> Result<Election> {
        let election = self.transition(election_id, |election, _now| {
            require(election, "publish results of", &[ElectionStatus::Stopped])?;
            if election.cycle == 0 {
                return Err(validation_error!("election has never been started"));
            }
            election.results_published = true;
            Ok(())
        })?;

        tracing::info!("📣 Results published: id={}", election.id);
        Ok(election)
    }

    /// Snapshot of an election after the lazy auto-close check
    pub fn get(&self, election_id: ElectionId) -> Result<Election> {
        self.transition(election_id, |_, _| Ok(()))
    }

    /// Current status after the lazy auto-close check
    pub fn status(&self, election_id: ElectionId) -> Result<ElectionStatus> {
        Ok(self.get(election_id)?.status)
    }

    /// Whether ballots may be committed to the election at `now`
    pub fn can_accept_ballots(&self, election_id: ElectionId, now: Timestamp) -> Result<bool> {
        self.with_election(election_id, now, |election| Ok(election.accepts_ballots(now)))
    }

    /// Run `commit` while holding the election's lock, provided the election
    /// accepts ballots at `now`
    ///
    /// Holding the lock keeps a concurrent `stop` or `pause` from taking effect
    /// between the window check and the commit.
    pub fn while_accepting<T>(
        &self,
        election_id: ElectionId,
        now: Timestamp,
        commit: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        self.with_election(election_id, now, |election| {
            if !election.accepts_ballots(now) {
                return Err(Error::ElectionNotOpen { election_id });
            }
            commit()
        })
    }

    /// Run `f` on the election while holding its lock
    ///
    /// Makes a change elsewhere conditional on the election's state without a
    /// transition slipping in between the check and the change.
    pub fn with_locked<T>(
        &self,
        election_id: ElectionId,
        f: impl FnOnce(&Election) -> Result<T>,
    ) -> Result<T> {
        self.with_election(election_id, self.clock.now(), f)
    }

    /// Every election, oldest first
    pub fn list(&self) -> Result<Vec<Election>> {
        let mut elections = self
            .ids()?
            .into_iter()
            .map(|id| self.get(id))
            .collect::<Result<Vec<_>>>()?;
        elections.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(elections)
    }

    /// Elections accepting ballots at `now`
    pub fn open_elections(&self, now: Timestamp) -> Result<Vec<Election>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|election| election.accepts_ballots(now))
            .collect())
    }

    /// Elections that have run at least once and so have results to show
    pub fn results_visible_elections(&self) -> Result<Vec<Election>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|election| election.cycle > 0)
            .collect())
    }

    /// Stop every auto-close election whose window ended before `now`
    pub fn sweep_expired(&self, now: Timestamp) -> Result<Vec<ElectionId>> {
        let mut stopped = Vec::new();
        for id in self.ids()? {
            if self.expire_if_due(id, now)? {
                stopped.push(id);
            }
        }
        if !stopped.is_empty() {
            tracing::info!("🧹 Sweep stopped {} expired elections", stopped.len());
        }
        Ok(stopped)
    }

    fn ids(&self) -> Result<Vec<ElectionId>> {
        Ok(self
            .elections
            .read()
            .map_err(|_| Error::internal("Election registry read error"))?
            .keys()
            .copied()
            .collect())
    }

    fn handle(&self, election_id: ElectionId) -> Result<ElectionHandle> {
        self.elections
            .read()
            .map_err(|_| Error::internal("Election registry read error"))?
            .get(&election_id)
            .cloned()
            .ok_or_else(|| Error::not_found("election", election_id))
    }

    /// Apply `change` to a draft copy under the election's lock, journal the
    /// result and only then make it visible
    fn transition(
        &self,
        election_id: ElectionId,
        change: impl FnOnce(&mut Election, Timestamp) -> Result<()>,
    ) -> Result<Election> {
        let now = self.clock.now();
        let handle = self.handle(election_id)?;
        let mut current = handle
            .lock()
            .map_err(|_| Error::internal("Election lock poisoned"))?;
        self.apply_auto_close(&mut current, now)?;

        let mut draft = current.clone();
        change(&mut draft, now)?;

        if draft != *current {
            self.journal.append(&draft)?;
            *current = draft;
        }
        Ok(current.clone())
    }

    /// Run `f` on the election under its lock, after the lazy auto-close check
    fn with_election<T>(
        &self,
        election_id: ElectionId,
        now: Timestamp,
        f: impl FnOnce(&Election) -> Result<T>,
    ) -> Result<T> {
        let handle = self.handle(election_id)?;
        let mut current = handle
            .lock()
            .map_err(|_| Error::internal("Election lock poisoned"))?;
        self.apply_auto_close(&mut current, now)?;
        f(&current)
    }

    fn expire_if_due(&self, election_id: ElectionId, now: Timestamp) -> Result<bool> {
        let handle = self.handle(election_id)?;
        let mut current = handle
            .lock()
            .map_err(|_| Error::internal("Election lock poisoned"))?;
        self.apply_auto_close(&mut current, now)
    }

    /// Stop an expired auto-close election, persisting the change first
    fn apply_auto_close(&self, current: &mut Election, now: Timestamp) -> Result<bool> {
        if !(current.auto_close && current.is_expired(now)) {
            return Ok(false);
        }

        let mut draft = current.clone();
        close(&mut draft);
        self.journal.append(&draft)?;
        *current = draft;

        tracing::info!("⌛ Election auto-closed: id={}", current.id);
        Ok(true)
    }
}

fn require(election: &Election, action: &'static str, allowed: &[ElectionStatus]) -> Result<()> {
    if allowed.contains(&election.status) {
        return Ok(());
    }
    tracing::warn!(
        "🚫 Rejected transition: cannot {} election {} while it is {}",
        action,
        election.id,
        election.status
    );
    Err(Error::InvalidTransition {
        election_id: election.id,
        action,
        status: election.status,
    })
}

/// `from + length`, refusing windows past the representable date range
fn window_end(from: Timestamp, length: Duration) -> Result<Timestamp> {
    from.checked_add_signed(length)
        .ok_or_else(|| validation_error!("voting window ends beyond the supported date range"))
}

fn close(election: &mut Election) {
    election.status = ElectionStatus::Stopped;
    election.start_time = None;
    election.end_time = None;
    election.paused_at = None;
}
