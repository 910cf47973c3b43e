//! Local identity and the known-users sequence presence is reconciled
//! into.

use parking_lot::Mutex;

/// Identity provided by the hosting application. The dispatcher reads the
/// current user and reads/writes `known_users` while folding presence
/// events; everything else about session handling (persistence, login) is
/// the host's business.
pub struct UserSession {
    user: String,
    known_users: Mutex<Vec<String>>,
}

impl UserSession {
    /// A session for `user`. The known-users sequence starts with the user
    /// itself; presence reconciliation keeps that entry unless a refresh
    /// clears the whole set.
    pub fn new(user: impl Into<String>) -> Self {
        let user = user.into();
        Self {
            known_users: Mutex::new(vec![user.clone()]),
            user,
        }
    }

    pub fn current_user(&self) -> &str {
        &self.user
    }

    /// Snapshot of the known-users sequence, in insertion order.
    pub fn known_users(&self) -> Vec<String> {
        self.known_users.lock().clone()
    }

    /// Mutate the known-users sequence and return the resulting snapshot.
    pub(crate) fn reconcile(&self, apply: impl FnOnce(&mut Vec<String>)) -> Vec<String> {
        let mut users = self.known_users.lock();
        apply(&mut users);
        users.clone()
    }
}
