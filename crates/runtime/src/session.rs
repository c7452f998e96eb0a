//! Per-user conversation state.
//!
//! Entries live in a sharded map keyed by user id, so users never contend on
//! one lock.  Accessors copy values out and release the shard immediately;
//! nothing here is held across an `.await`.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use dealfinder_search::Category;

/// Chat-platform user identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub category: Category,
    pub updated_at: DateTime<Utc>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            category: Category::All,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<UserId, Session>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start over with an unfiltered session.
    pub fn reset(&self, user: UserId) {
        self.sessions.insert(user, Session::default());
    }

    /// Last write wins.
    pub fn set_category(&self, user: UserId, category: Category) {
        self.sessions.insert(
            user,
            Session {
                category,
                updated_at: Utc::now(),
            },
        );
    }

    /// Current category, creating a default session on first contact.
    pub fn category(&self, user: UserId) -> Category {
        self.sessions.entry(user).or_default().category
    }

    pub fn session(&self, user: UserId) -> Option<Session> {
        self.sessions.get(&user).map(|entry| *entry)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
