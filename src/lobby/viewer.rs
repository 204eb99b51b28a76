//! Viewer identity
//!
//! Username, personal block-list and privilege flag of the logged-in user.
//! Visibility and ordering read it; only the block-list changes at runtime.

use hashbrown::HashSet;

/// The logged-in actor whose identity drives filtering and ordering
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Viewer {
    pub username: String,
    /// Usernames this viewer has blocked
    blocked_users: HashSet<String>,
    /// Moderators and admins see every game regardless of blocks
    pub privileged: bool,
}

impl Viewer {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Default::default()
        }
    }

    pub fn with_blocked<I, S>(mut self, users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set_blocked_users(users);
        self
    }

    pub fn with_privileged(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }

    /// Replace the block-list
    pub fn set_blocked_users<I, S>(&mut self, users: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.blocked_users = users.into_iter().map(Into::into).collect();
    }

    pub fn has_blocked(&self, username: &str) -> bool {
        self.blocked_users.contains(username)
    }

    pub fn blocked_count(&self) -> usize {
        self.blocked_users.len()
    }
}
