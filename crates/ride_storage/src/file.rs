//! JSON snapshot store

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDateTime;
use ride_core::{
    Conditional, DocumentStore, Match, MatchFilter, Mutation, RequestFilter, RideRequest, Routine,
    RoutineFilter, StoreResult, User,
};
use tokio::fs;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::memory::MemoryStore;
use crate::snapshot::Snapshot;

/// A [`MemoryStore`] persisted to a single JSON file. The file is loaded on
/// open and rewritten after every committed change.
#[derive(Debug)]
pub struct JsonFileStore {
    inner: MemoryStore,
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub async fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();

        let inner = if path.exists() {
            let contents = fs::read_to_string(&path).await?;
            let snapshot: Snapshot = serde_json::from_str(&contents)?;
            tracing::info!(
                path = %path.display(),
                users = snapshot.users.len(),
                requests = snapshot.requests.len(),
                routines = snapshot.routines.len(),
                "loaded store snapshot"
            );
            MemoryStore::from_snapshot(snapshot)
        } else {
            tracing::info!(path = %path.display(), "starting with an empty store");
            MemoryStore::new()
        };

        Ok(Self {
            inner,
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let contents = serde_json::to_string_pretty(&self.inner.snapshot())?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, contents).await?;
        fs::rename(&tmp, &self.path).await?;

        tracing::trace!(path = %self.path.display(), "store snapshot written");
        Ok(())
    }

    async fn persist_if_applied<T>(
        &self,
        result: Conditional<T>,
    ) -> StoreResult<Conditional<T>> {
        if result.is_applied() {
            self.persist().await?;
        }
        Ok(result)
    }
}

#[async_trait]
impl DocumentStore for JsonFileStore {
    async fn get_user(&self, id: &str) -> StoreResult<Option<User>> {
        self.inner.get_user(id).await
    }

    async fn put_user(&self, user: &User) -> StoreResult<()> {
        self.inner.put_user(user).await?;
        self.persist().await
    }

    async fn delete_user(&self, id: &str) -> StoreResult<bool> {
        let removed = self.inner.delete_user(id).await?;
        if removed {
            self.persist().await?;
        }
        Ok(removed)
    }

    async fn insert_request(&self, request: &RideRequest) -> StoreResult<()> {
        self.inner.insert_request(request).await?;
        self.persist().await
    }

    async fn get_request(&self, id: Uuid) -> StoreResult<Option<RideRequest>> {
        self.inner.get_request(id).await
    }

    async fn update_request(
        &self,
        id: Uuid,
        mutation: Mutation<RideRequest>,
    ) -> StoreResult<Conditional<RideRequest>> {
        let result = self.inner.update_request(id, mutation).await?;
        self.persist_if_applied(result).await
    }

    async fn find_requests(&self, filter: &RequestFilter) -> StoreResult<Vec<RideRequest>> {
        self.inner.find_requests(filter).await
    }

    async fn delete_requests_by(&self, requester_id: &str) -> StoreResult<usize> {
        let removed = self.inner.delete_requests_by(requester_id).await?;
        if removed > 0 {
            self.persist().await?;
        }
        Ok(removed)
    }

    async fn insert_routine(&self, routine: &Routine) -> StoreResult<()> {
        self.inner.insert_routine(routine).await?;
        self.persist().await
    }

    async fn update_routine(
        &self,
        id: Uuid,
        mutation: Mutation<Routine>,
    ) -> StoreResult<Conditional<Routine>> {
        let result = self.inner.update_routine(id, mutation).await?;
        self.persist_if_applied(result).await
    }

    async fn find_routines(&self, filter: &RoutineFilter) -> StoreResult<Vec<Routine>> {
        self.inner.find_routines(filter).await
    }

    async fn delete_routines_by(&self, owner_id: &str) -> StoreResult<usize> {
        let removed = self.inner.delete_routines_by(owner_id).await?;
        if removed > 0 {
            self.persist().await?;
        }
        Ok(removed)
    }

    async fn insert_match(&self, record: &Match) -> StoreResult<()> {
        self.inner.insert_match(record).await?;
        self.persist().await
    }

    async fn update_match(
        &self,
        id: Uuid,
        mutation: Mutation<Match>,
    ) -> StoreResult<Conditional<Match>> {
        let result = self.inner.update_match(id, mutation).await?;
        self.persist_if_applied(result).await
    }

    async fn find_matches(&self, filter: &MatchFilter) -> StoreResult<Vec<Match>> {
        self.inner.find_matches(filter).await
    }

    async fn delete_matches_for(&self, user_id: &str) -> StoreResult<usize> {
        let removed = self.inner.delete_matches_for(user_id).await?;
        if removed > 0 {
            self.persist().await?;
        }
        Ok(removed)
    }

    async fn record_notification(
        &self,
        key: &str,
        expires_at: NaiveDateTime,
    ) -> StoreResult<bool> {
        let inserted = self.inner.record_notification(key, expires_at).await?;
        if inserted {
            self.persist().await?;
        }
        Ok(inserted)
    }

    async fn release_notification(&self, key: &str) -> StoreResult<bool> {
        let removed = self.inner.release_notification(key).await?;
        if removed {
            self.persist().await?;
        }
        Ok(removed)
    }

    async fn purge_notifications(&self, cutoff: NaiveDateTime) -> StoreResult<usize> {
        let purged = self.inner.purge_notifications(cutoff).await?;
        if purged > 0 {
            self.persist().await?;
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate, NaiveTime};
    use ride_core::{DailyWindow, DaySet, RequestStatus};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_snapshot_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store").join("rides.json");
        let expires = NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();

        let routine = Routine::new(
            "d1",
            "חיפה",
            DaySet::workweek(),
            DailyWindow::new(
                NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(7, 30, 0).unwrap(),
            ),
            None,
        );
        {
            let store = JsonFileStore::open(&path).await.unwrap();
            store.put_user(&User::new("d1", "initial")).await.unwrap();
            store.insert_routine(&routine).await.unwrap();
            assert!(store.record_notification("expired:1", expires).await.unwrap());
            assert!(store.record_notification("expired:2", expires).await.unwrap());
            assert!(store.release_notification("expired:2").await.unwrap());
        }
        assert!(path.exists());

        let reopened = JsonFileStore::open(&path).await.unwrap();
        assert!(reopened.get_user("d1").await.unwrap().is_some());
        let routines = reopened.find_routines(&RoutineFilter::active()).await.unwrap();
        assert_eq!(routines, vec![routine]);
        assert!(!reopened.record_notification("expired:1", expires).await.unwrap());
        assert!(reopened.record_notification("expired:2", expires).await.unwrap());

        let cutoff = expires + Duration::minutes(1);
        assert_eq!(reopened.purge_notifications(cutoff).await.unwrap(), 2);
        let purged = JsonFileStore::open(&path).await.unwrap();
        assert!(purged.record_notification("expired:1", expires).await.unwrap());
    }

    #[tokio::test]
    async fn test_unchanged_update_leaves_file_alone() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rides.json");
        let store = JsonFileStore::open(&path).await.unwrap();

        let result = store
            .update_request(Uuid::new_v4(), Box::new(|r| {
                r.status = RequestStatus::Found;
                true
            }))
            .await
            .unwrap();
        assert_eq!(result, Conditional::Missing);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rides.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(JsonFileStore::open(&path).await.is_err());
    }
}
