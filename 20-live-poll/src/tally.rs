//! Vote counting for the active poll session.
//!
//! The store is the single owner of the per-option counters, the set of
//! consumed vote keys and the open/closed flag. It is shared behind an `Arc`
//! between the hub (votes and status queries) and the admin HTTP handlers
//! (open, close, dump), so every operation takes the same mutex and finishes
//! inside one critical section.

use std::{
    collections::{BTreeMap, HashSet},
    sync::{Mutex, MutexGuard, PoisonError},
};

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::ballot::BallotOption;

/// Reasons a vote submission is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VoteError {
    #[error("vote is closed")]
    VoteClosed,
    #[error("already voted")]
    AlreadyVoted,
    #[error("invalid vote")]
    InvalidVote,
}

/// What a participant holding a given vote key may currently do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteStatus {
    VotesClosed,
    AlreadyVoted,
    CanVote,
}

impl VoteStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            VoteStatus::VotesClosed => "votes_closed",
            VoteStatus::AlreadyVoted => "already_voted",
            VoteStatus::CanVote => "can_vote",
        }
    }
}

/// Per-option vote counts. Every option is always present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Tally {
    counts: BTreeMap<BallotOption, u64>,
}

impl Tally {
    fn zeroed() -> Self {
        Self {
            counts: BallotOption::ALL.into_iter().map(|option| (option, 0)).collect(),
        }
    }

    pub fn count(&self, option: BallotOption) -> u64 {
        self.counts.get(&option).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Iterates counts from -3 up to 3.
    pub fn iter(&self) -> impl Iterator<Item = (BallotOption, u64)> + '_ {
        self.counts.iter().map(|(option, count)| (*option, *count))
    }

    fn increment(&mut self, option: BallotOption) {
        *self.counts.entry(option).or_insert(0) += 1;
    }
}

type ChangeNotifier = Box<dyn Fn(bool) + Send + Sync>;

struct Session {
    tally: Tally,
    used_keys: HashSet<String>,
    open: bool,
    notifier: Option<ChangeNotifier>,
}

impl Session {
    fn reset(&mut self) {
        self.tally = Tally::zeroed();
        self.used_keys.clear();
        info!("resetting vote");
    }

    fn notify(&self, open: bool) {
        if let Some(notifier) = &self.notifier {
            notifier(open);
        }
    }
}

/// Thread-safe tally of the current poll session.
///
/// Starts closed with all counts at zero.
pub struct TallyStore {
    session: Mutex<Session>,
}

impl Default for TallyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TallyStore {
    pub fn new() -> Self {
        Self {
            session: Mutex::new(Session {
                tally: Tally::zeroed(),
                used_keys: HashSet::new(),
                open: false,
                notifier: None,
            }),
        }
    }

    // Every critical section leaves the session consistent, so a panic in
    // another holder does not invalidate the data.
    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers the function called with the new state on every open/close
    /// transition, replacing any previous one.
    ///
    /// The notifier runs while the store is locked, which keeps notifications
    /// in transition order. It must not block or call back into the store.
    pub fn set_change_notifier<F>(&self, notifier: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.lock().notifier = Some(Box::new(notifier));
    }

    /// Opens voting, clearing all counts and used keys. No-op when already open.
    pub fn open(&self) {
        let mut session = self.lock();
        if session.open {
            return;
        }
        session.reset();
        session.open = true;
        info!("opening vote");
        session.notify(true);
    }

    /// Closes voting. Counts stay readable. No-op when already closed.
    pub fn close(&self) {
        let mut session = self.lock();
        if !session.open {
            return;
        }
        session.open = false;
        info!("closing vote");
        session.notify(false);
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    /// Records one vote for `vote` under the single-use `vote_key`.
    ///
    /// Checks run in order: session open, key unused, option valid.
    pub fn submit_vote(&self, vote: &str, vote_key: &str) -> Result<BallotOption, VoteError> {
        let mut session = self.lock();

        if !session.open {
            return Err(VoteError::VoteClosed);
        }

        if session.used_keys.contains(vote_key) {
            warn!(vote_key, "used vote key already");
            return Err(VoteError::AlreadyVoted);
        }

        let option = match vote.parse::<BallotOption>() {
            Ok(option) => option,
            Err(_) => {
                warn!(vote_key, vote, "invalid vote");
                return Err(VoteError::InvalidVote);
            }
        };

        session.tally.increment(option);
        session.used_keys.insert(vote_key.to_string());
        info!(vote_key, %option, "vote submitted");
        Ok(option)
    }

    pub fn vote_status(&self, vote_key: &str) -> VoteStatus {
        let session = self.lock();

        if !session.open {
            VoteStatus::VotesClosed
        } else if session.used_keys.contains(vote_key) {
            VoteStatus::AlreadyVoted
        } else {
            VoteStatus::CanVote
        }
    }

    /// Returns a copy of the current counts.
    pub fn snapshot(&self) -> Tally {
        self.lock().tally.clone()
    }
}
