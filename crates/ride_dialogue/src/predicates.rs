//! Named conditions over a user profile.
//!
//! A state's `condition` is resolved here. Names may carry one argument after
//! a colon, e.g. `has_field:routine_return_time`.

use std::collections::HashMap;

use ride_core::User;

/// Context key holding answers proposed by the extraction assistant.
pub(crate) const PREFILL_KEY: &str = "prefill";

pub type Predicate = fn(&User, Option<&str>) -> bool;

#[derive(Clone)]
pub struct PredicateRegistry {
    predicates: HashMap<String, Predicate>,
}

impl Default for PredicateRegistry {
    fn default() -> Self {
        let mut registry = Self {
            predicates: HashMap::new(),
        };
        registry.register("is_registered", |user, _| user.registered);
        registry.register("is_driver", |user, _| user.role.is_driver());
        registry.register("is_hitchhiker", |user, _| user.role.is_hitchhiker());
        registry.register("has_home_settlement", |user, _| {
            user.home_settlement.is_some()
        });
        registry.register("has_contact_preference", |user, _| {
            user.contact_preference.is_some()
        });
        registry.register("has_field", |user, field| {
            field.is_some_and(|field| user.field(field).is_some_and(|v| !v.is_null()))
        });
        registry.register("has_prefill", |user, field| {
            field.is_some_and(|field| {
                user.context
                    .get(PREFILL_KEY)
                    .and_then(|prefill| prefill.get(field))
                    .is_some()
            })
        });
        registry
    }
}

impl PredicateRegistry {
    pub fn register(&mut self, name: impl Into<String>, predicate: Predicate) {
        self.predicates.insert(name.into(), predicate);
    }

    pub fn contains(&self, condition: &str) -> bool {
        let (name, _) = split(condition);
        self.predicates.contains_key(name)
    }

    /// `None` when the condition names no registered predicate.
    pub fn evaluate(&self, condition: &str, user: &User) -> Option<bool> {
        let (name, argument) = split(condition);
        self.predicates
            .get(name)
            .map(|predicate| predicate(user, argument))
    }
}

fn split(condition: &str) -> (&str, Option<&str>) {
    match condition.split_once(':') {
        Some((name, argument)) => (name.trim(), Some(argument.trim())),
        None => (condition.trim(), None),
    }
}
