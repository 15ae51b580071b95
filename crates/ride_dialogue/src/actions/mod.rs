//! Action dispatcher
//!
//! States name their side effects; the dispatcher maps each name to an
//! [`Action`] that calls into the ride workflows.

mod profile;
mod ride;
mod routine;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use ride_core::{DocumentStore, NormalizedTime, RideError, RideResult, TimeNormalizer, User};
use ride_matching::RideService;
use serde::de::DeserializeOwned;
use serde_json::Value;
use uuid::Uuid;

pub use profile::{CompleteRegistration, ShowStatus};
pub use ride::{CreateRideOffer, CreateRideRequest};
pub use routine::{PauseRoutines, SaveRoutine};

/// A named side effect run when the conversation enters a state or picks an
/// option. The returned text, if any, is added to the reply.
#[async_trait]
pub trait Action: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(&self, user: &mut User, now: NaiveDateTime) -> RideResult<Option<String>>;
}

#[derive(Clone, Default)]
pub struct ActionDispatcher {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every action the shipped state table uses.
    pub fn with_builtin(
        service: RideService,
        store: Arc<dyn DocumentStore>,
        normalizer: TimeNormalizer,
    ) -> Self {
        let mut dispatcher = Self::new();
        dispatcher.register(Arc::new(CompleteRegistration));
        dispatcher.register(Arc::new(SaveRoutine::new(service.clone())));
        dispatcher.register(Arc::new(PauseRoutines::new(service.clone())));
        dispatcher.register(Arc::new(CreateRideRequest::new(service.clone(), normalizer)));
        dispatcher.register(Arc::new(CreateRideOffer::new(service, normalizer)));
        dispatcher.register(Arc::new(ShowStatus::new(store)));
        dispatcher
    }

    pub fn register(&mut self, action: Arc<dyn Action>) {
        self.actions.insert(action.name().to_string(), action);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub async fn dispatch(
        &self,
        name: &str,
        user: &mut User,
        now: NaiveDateTime,
    ) -> RideResult<Option<String>> {
        let action = self
            .actions
            .get(name)
            .ok_or_else(|| RideError::Configuration(format!("unknown action '{name}'")))?;
        tracing::info!(action = name, user_id = %user.id, state = %user.current_state, "dispatching action");
        action.execute(user, now).await
    }
}

fn required_str(user: &User, key: &str) -> RideResult<String> {
    user.context_str(key)
        .map(str::to_string)
        .ok_or_else(|| RideError::Validation(format!("missing {}", key.replace('_', " "))))
}

fn required_value<T: DeserializeOwned>(user: &User, key: &str) -> RideResult<T> {
    let value = user
        .context
        .get(key)
        .cloned()
        .ok_or_else(|| RideError::Validation(format!("missing {}", key.replace('_', " "))))?;
    serde_json::from_value(value)
        .map_err(|err| RideError::Validation(format!("invalid {}: {err}", key.replace('_', " "))))
}

/// Id of the record an action is about to submit. A fresh id is saved with
/// the user under `key` before the submit, so a turn retried after an
/// upstream failure resubmits the same record.
async fn pending_id(store: &dyn DocumentStore, user: &mut User, key: &str) -> RideResult<Uuid> {
    if let Some(id) = user.context_str(key).and_then(|id| Uuid::parse_str(id).ok()) {
        return Ok(id);
    }
    let id = Uuid::new_v4();
    user.set_field(key, Value::String(id.to_string()));
    store.put_user(user).await?;
    Ok(id)
}

/// The window of a one-off ride: an exact answer wins over a timing
/// keyword, and nothing at all falls back to the default window.
fn resolve_time(
    user: &mut User,
    exact_key: &str,
    keyword_key: &str,
    normalizer: &TimeNormalizer,
    now: NaiveDateTime,
) -> NormalizedTime {
    let keyword = user
        .take_context(keyword_key)
        .and_then(|value| value.as_str().map(str::to_string));
    if let Some(exact) = user.take_context(exact_key) {
        if let Ok(time) = serde_json::from_value::<NormalizedTime>(exact) {
            return time;
        }
    }
    normalizer.normalize(keyword.as_deref().unwrap_or_default(), now)
}
