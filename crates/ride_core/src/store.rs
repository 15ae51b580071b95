//! Document store contract
//!
//! The store exposes get/put, query-by-filter and an atomic conditional
//! update per document. A conditional update runs a mutation closure against
//! the current version of the document while the backend holds it exclusively;
//! the closure returns `false` to leave the document untouched. Backends must
//! guarantee that no other update of the same document interleaves with it.
//!
//! Queries return records ordered by creation time (then id), which gives
//! callers a stable discovery order.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use thiserror::Error;
use uuid::Uuid;

use crate::model::{Match, RequestKind, RequestStatus, RideRequest, Routine, User};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),

    #[error("duplicate record: {0}")]
    Duplicate(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Mutation applied under the document's exclusive hold. Returns whether the
/// change should be committed.
pub type Mutation<T> = Box<dyn FnOnce(&mut T) -> bool + Send>;

/// Result of a conditional update.
#[derive(Debug, Clone, PartialEq)]
pub enum Conditional<T> {
    /// The precondition held; carries the committed document.
    Applied(T),
    /// The precondition failed; carries the unchanged document.
    Unchanged(T),
    /// No such document.
    Missing,
}

impl<T> Conditional<T> {
    pub fn is_applied(&self) -> bool {
        matches!(self, Conditional::Applied(_))
    }

    pub fn applied(self) -> Option<T> {
        match self {
            Conditional::Applied(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_current(self) -> Option<T> {
        match self {
            Conditional::Applied(value) | Conditional::Unchanged(value) => Some(value),
            Conditional::Missing => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestFilter {
    pub requester_id: Option<String>,
    pub kind: Option<RequestKind>,
    /// Empty means any status.
    pub statuses: Vec<RequestStatus>,
    pub destination: Option<String>,
    /// Requests with an embedded entry for this driver.
    pub driver_id: Option<String>,
    /// Requests with an embedded entry with this match id.
    pub match_id: Option<Uuid>,
}

impl RequestFilter {
    pub fn open(kind: RequestKind) -> Self {
        Self {
            kind: Some(kind),
            statuses: vec![RequestStatus::Pending, RequestStatus::Matched],
            ..Default::default()
        }
    }

    pub fn by_requester(requester_id: impl Into<String>) -> Self {
        Self {
            requester_id: Some(requester_id.into()),
            ..Default::default()
        }
    }

    pub fn by_driver(driver_id: impl Into<String>) -> Self {
        Self {
            driver_id: Some(driver_id.into()),
            ..Default::default()
        }
    }

    pub fn by_match(match_id: Uuid) -> Self {
        Self {
            match_id: Some(match_id),
            ..Default::default()
        }
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn with_statuses(mut self, statuses: &[RequestStatus]) -> Self {
        self.statuses = statuses.to_vec();
        self
    }

    pub fn matches(&self, request: &RideRequest) -> bool {
        if let Some(requester) = &self.requester_id {
            if &request.requester_id != requester {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if request.kind != kind {
                return false;
            }
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&request.status) {
            return false;
        }
        if let Some(destination) = &self.destination {
            if &request.destination != destination {
                return false;
            }
        }
        if let Some(driver) = &self.driver_id {
            if !request.matched_drivers.iter().any(|e| &e.driver_id == driver) {
                return false;
            }
        }
        if let Some(match_id) = self.match_id {
            if request.entry(match_id).is_none() {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoutineFilter {
    pub owner_id: Option<String>,
    pub destination: Option<String>,
    pub active_only: bool,
}

impl RoutineFilter {
    pub fn active() -> Self {
        Self {
            active_only: true,
            ..Default::default()
        }
    }

    pub fn by_owner(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: Some(owner_id.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, routine: &Routine) -> bool {
        if self.active_only && !routine.active {
            return false;
        }
        if let Some(owner) = &self.owner_id {
            if &routine.owner_id != owner {
                return false;
            }
        }
        if let Some(destination) = &self.destination {
            if &routine.destination != destination {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchFilter {
    pub request_id: Option<Uuid>,
    pub driver_id: Option<String>,
}

impl MatchFilter {
    pub fn matches(&self, record: &Match) -> bool {
        if let Some(request_id) = self.request_id {
            if record.request_id != request_id {
                return false;
            }
        }
        if let Some(driver) = &self.driver_id {
            if &record.driver_id != driver {
                return false;
            }
        }
        true
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_user(&self, id: &str) -> StoreResult<Option<User>>;
    async fn put_user(&self, user: &User) -> StoreResult<()>;
    async fn delete_user(&self, id: &str) -> StoreResult<bool>;

    async fn insert_request(&self, request: &RideRequest) -> StoreResult<()>;
    async fn get_request(&self, id: Uuid) -> StoreResult<Option<RideRequest>>;
    async fn update_request(
        &self,
        id: Uuid,
        mutation: Mutation<RideRequest>,
    ) -> StoreResult<Conditional<RideRequest>>;
    async fn find_requests(&self, filter: &RequestFilter) -> StoreResult<Vec<RideRequest>>;
    async fn delete_requests_by(&self, requester_id: &str) -> StoreResult<usize>;

    async fn insert_routine(&self, routine: &Routine) -> StoreResult<()>;
    async fn update_routine(
        &self,
        id: Uuid,
        mutation: Mutation<Routine>,
    ) -> StoreResult<Conditional<Routine>>;
    async fn find_routines(&self, filter: &RoutineFilter) -> StoreResult<Vec<Routine>>;
    async fn delete_routines_by(&self, owner_id: &str) -> StoreResult<usize>;

    async fn insert_match(&self, record: &Match) -> StoreResult<()>;
    async fn update_match(&self, id: Uuid, mutation: Mutation<Match>)
        -> StoreResult<Conditional<Match>>;
    async fn find_matches(&self, filter: &MatchFilter) -> StoreResult<Vec<Match>>;
    /// Remove match mirrors where the user is either side.
    async fn delete_matches_for(&self, user_id: &str) -> StoreResult<usize>;

    /// Atomically record a notification key that stays meaningful until
    /// `expires_at`. Returns `false` when the key was already present.
    async fn record_notification(&self, key: &str, expires_at: NaiveDateTime)
        -> StoreResult<bool>;
    /// Drop a key recorded for a send that did not go out.
    async fn release_notification(&self, key: &str) -> StoreResult<bool>;
    /// Remove keys that expired before `cutoff`.
    async fn purge_notifications(&self, cutoff: NaiveDateTime) -> StoreResult<usize>;
}
