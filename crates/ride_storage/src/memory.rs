//! In-process document store backed by concurrent maps.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::NaiveDateTime;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ride_core::{
    Conditional, DocumentStore, Match, MatchFilter, Mutation, RequestFilter, RideRequest, Routine,
    RoutineFilter, StoreError, StoreResult, User,
};
use uuid::Uuid;

use crate::snapshot::{NotificationKey, Snapshot};

/// Documents kept in memory. Conditional updates run under the map's entry
/// lock, so two updates of the same document never interleave.
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: DashMap<String, User>,
    requests: DashMap<Uuid, RideRequest>,
    routines: DashMap<Uuid, Routine>,
    matches: DashMap<Uuid, Match>,
    notifications: DashMap<String, NaiveDateTime>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails with `StoreError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store marked unavailable".into()));
        }
        Ok(())
    }

    pub(crate) fn from_snapshot(snapshot: Snapshot) -> Self {
        let store = Self::new();
        for user in snapshot.users {
            store.users.insert(user.id.clone(), user);
        }
        for request in snapshot.requests {
            store.requests.insert(request.id, request);
        }
        for routine in snapshot.routines {
            store.routines.insert(routine.id, routine);
        }
        for record in snapshot.matches {
            store.matches.insert(record.id, record);
        }
        for record in snapshot.notifications {
            store.notifications.insert(record.key, record.expires_at);
        }
        store
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        let mut snapshot = Snapshot {
            users: self.users.iter().map(|e| e.value().clone()).collect(),
            requests: self.requests.iter().map(|e| e.value().clone()).collect(),
            routines: self.routines.iter().map(|e| e.value().clone()).collect(),
            matches: self.matches.iter().map(|e| e.value().clone()).collect(),
            notifications: self
                .notifications
                .iter()
                .map(|e| NotificationKey {
                    key: e.key().clone(),
                    expires_at: *e.value(),
                })
                .collect(),
        };
        snapshot.sort();
        snapshot
    }
}

/// Run `mutation` on a copy of the document and commit it only when the
/// mutation reports a change.
fn apply<K, T>(map: &DashMap<K, T>, id: &K, mutation: Mutation<T>) -> Conditional<T>
where
    K: std::hash::Hash + Eq,
    T: Clone,
{
    match map.get_mut(id) {
        Some(mut current) => {
            let mut draft = current.value().clone();
            if mutation(&mut draft) {
                *current = draft.clone();
                Conditional::Applied(draft)
            } else {
                Conditional::Unchanged(draft)
            }
        }
        None => Conditional::Missing,
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get_user(&self, id: &str) -> StoreResult<Option<User>> {
        self.check_available()?;
        Ok(self.users.get(id).map(|u| u.value().clone()))
    }

    async fn put_user(&self, user: &User) -> StoreResult<()> {
        self.check_available()?;
        self.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn delete_user(&self, id: &str) -> StoreResult<bool> {
        self.check_available()?;
        Ok(self.users.remove(id).is_some())
    }

    async fn insert_request(&self, request: &RideRequest) -> StoreResult<()> {
        self.check_available()?;
        if self.requests.contains_key(&request.id) {
            return Err(StoreError::Duplicate(format!("request {}", request.id)));
        }
        self.requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn get_request(&self, id: Uuid) -> StoreResult<Option<RideRequest>> {
        self.check_available()?;
        Ok(self.requests.get(&id).map(|r| r.value().clone()))
    }

    async fn update_request(
        &self,
        id: Uuid,
        mutation: Mutation<RideRequest>,
    ) -> StoreResult<Conditional<RideRequest>> {
        self.check_available()?;
        Ok(apply(&self.requests, &id, mutation))
    }

    async fn find_requests(&self, filter: &RequestFilter) -> StoreResult<Vec<RideRequest>> {
        self.check_available()?;
        let mut found: Vec<RideRequest> = self
            .requests
            .iter()
            .filter(|r| filter.matches(r.value()))
            .map(|r| r.value().clone())
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn delete_requests_by(&self, requester_id: &str) -> StoreResult<usize> {
        self.check_available()?;
        let before = self.requests.len();
        self.requests.retain(|_, r| r.requester_id != requester_id);
        Ok(before.saturating_sub(self.requests.len()))
    }

    async fn insert_routine(&self, routine: &Routine) -> StoreResult<()> {
        self.check_available()?;
        if self.routines.contains_key(&routine.id) {
            return Err(StoreError::Duplicate(format!("routine {}", routine.id)));
        }
        self.routines.insert(routine.id, routine.clone());
        Ok(())
    }

    async fn update_routine(
        &self,
        id: Uuid,
        mutation: Mutation<Routine>,
    ) -> StoreResult<Conditional<Routine>> {
        self.check_available()?;
        Ok(apply(&self.routines, &id, mutation))
    }

    async fn find_routines(&self, filter: &RoutineFilter) -> StoreResult<Vec<Routine>> {
        self.check_available()?;
        let mut found: Vec<Routine> = self
            .routines
            .iter()
            .filter(|r| filter.matches(r.value()))
            .map(|r| r.value().clone())
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn delete_routines_by(&self, owner_id: &str) -> StoreResult<usize> {
        self.check_available()?;
        let before = self.routines.len();
        self.routines.retain(|_, r| r.owner_id != owner_id);
        Ok(before.saturating_sub(self.routines.len()))
    }

    async fn insert_match(&self, record: &Match) -> StoreResult<()> {
        self.check_available()?;
        if self.matches.contains_key(&record.id) {
            return Err(StoreError::Duplicate(format!("match {}", record.id)));
        }
        self.matches.insert(record.id, record.clone());
        Ok(())
    }

    async fn update_match(
        &self,
        id: Uuid,
        mutation: Mutation<Match>,
    ) -> StoreResult<Conditional<Match>> {
        self.check_available()?;
        Ok(apply(&self.matches, &id, mutation))
    }

    async fn find_matches(&self, filter: &MatchFilter) -> StoreResult<Vec<Match>> {
        self.check_available()?;
        let mut found: Vec<Match> = self
            .matches
            .iter()
            .filter(|m| filter.matches(m.value()))
            .map(|m| m.value().clone())
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn delete_matches_for(&self, user_id: &str) -> StoreResult<usize> {
        self.check_available()?;
        let before = self.matches.len();
        self.matches
            .retain(|_, m| m.driver_id != user_id && m.hitchhiker_id != user_id);
        Ok(before.saturating_sub(self.matches.len()))
    }

    async fn record_notification(
        &self,
        key: &str,
        expires_at: NaiveDateTime,
    ) -> StoreResult<bool> {
        self.check_available()?;
        match self.notifications.entry(key.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(expires_at);
                Ok(true)
            }
        }
    }

    async fn release_notification(&self, key: &str) -> StoreResult<bool> {
        self.check_available()?;
        Ok(self.notifications.remove(key).is_some())
    }

    async fn purge_notifications(&self, cutoff: NaiveDateTime) -> StoreResult<usize> {
        self.check_available()?;
        let before = self.notifications.len();
        self.notifications.retain(|_, expires_at| *expires_at >= cutoff);
        Ok(before.saturating_sub(self.notifications.len()))
    }
}
