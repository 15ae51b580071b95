use chrono::NaiveDateTime;
use ride_core::{Match, RideRequest, Routine, User};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct NotificationKey {
    pub key: String,
    pub expires_at: NaiveDateTime,
}

/// On-disk image of every collection.
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct Snapshot {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub requests: Vec<RideRequest>,
    #[serde(default)]
    pub routines: Vec<Routine>,
    #[serde(default)]
    pub matches: Vec<Match>,
    #[serde(default)]
    pub notifications: Vec<NotificationKey>,
}

impl Snapshot {
    /// Deterministic ordering keeps snapshot diffs readable.
    pub fn sort(&mut self) {
        self.users.sort_by(|a, b| a.id.cmp(&b.id));
        self.requests
            .sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        self.routines
            .sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        self.matches
            .sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        self.notifications.sort_by(|a, b| a.key.cmp(&b.key));
    }
}
