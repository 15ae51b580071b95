use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::history::StateHistory;

/// Context keys starting with this prefix are scratch data of the current
/// state and are dropped on every committed transition.
pub const SCRATCH_PREFIX: &str = "_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Hitchhiker,
    Driver,
    Both,
    #[default]
    Unset,
}

impl Role {
    pub fn is_driver(&self) -> bool {
        matches!(self, Role::Driver | Role::Both)
    }

    pub fn is_hitchhiker(&self) -> bool {
        matches!(self, Role::Hitchhiker | Role::Both)
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "hitchhiker" | "טרמפיסט" => Some(Role::Hitchhiker),
            "driver" | "נהג" => Some(Role::Driver),
            "both" | "שניהם" => Some(Role::Both),
            "unset" => Some(Role::Unset),
            _ => None,
        }
    }
}

/// Whether a driver's contact details reach a matched hitchhiker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactPreference {
    /// Approve automatically and share name and number.
    Always,
    /// Ask before approving, then ask whether to share the name.
    Ask,
    /// Ask before approving, never share the name.
    Never,
}

impl ContactPreference {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "always" => Some(Self::Always),
            "ask" => Some(Self::Ask),
            "never" => Some(Self::Never),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    /// Name supplied by the transport (e.g. the messaging profile name).
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub home_settlement: Option<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub contact_preference: Option<ContactPreference>,
    pub current_state: String,
    /// The prompt of `current_state` was shown and the next message answers it.
    #[serde(default)]
    pub awaiting_input: bool,
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
    #[serde(default)]
    pub history: StateHistory,
    #[serde(default)]
    pub registered: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(id: impl Into<String>, initial_state: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            display_name: None,
            full_name: None,
            home_settlement: None,
            role: Role::Unset,
            contact_preference: None,
            current_state: initial_state.into(),
            awaiting_input: false,
            context: BTreeMap::new(),
            history: StateHistory::default(),
            registered: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// A blank profile for the same identity. Only the transport-supplied
    /// display name and the history capacity survive.
    pub fn restarted(&self, initial_state: impl Into<String>) -> Self {
        let mut fresh = User::new(self.id.clone(), initial_state);
        fresh.display_name = self.display_name.clone();
        fresh.history = StateHistory::with_capacity(self.history.capacity());
        fresh
    }

    pub fn name(&self) -> &str {
        self.full_name
            .as_deref()
            .or(self.display_name.as_deref())
            .unwrap_or(&self.id)
    }

    pub fn contact_preference_or_default(&self) -> ContactPreference {
        self.contact_preference.unwrap_or(ContactPreference::Never)
    }

    /// Store a collected field. Profile fields land on the record itself,
    /// everything else in the context map.
    pub fn set_field(&mut self, field: &str, value: Value) {
        match field {
            "full_name" => self.full_name = value.as_str().map(str::to_string),
            "home_settlement" => self.home_settlement = value.as_str().map(str::to_string),
            "role" => {
                if let Some(role) = value.as_str().and_then(Role::parse) {
                    self.role = role;
                }
            }
            "contact_preference" => {
                self.contact_preference = value.as_str().and_then(ContactPreference::parse);
            }
            _ => {
                self.context.insert(field.to_string(), value);
            }
        }
        self.touch();
    }

    /// Read a collected field back, regardless of where it is stored.
    pub fn field(&self, field: &str) -> Option<Value> {
        match field {
            "full_name" => self.full_name.clone().map(Value::String),
            "home_settlement" => self.home_settlement.clone().map(Value::String),
            "role" => match self.role {
                Role::Unset => None,
                role => serde_json::to_value(role).ok(),
            },
            "contact_preference" => self
                .contact_preference
                .and_then(|pref| serde_json::to_value(pref).ok()),
            _ => self.context.get(field).cloned(),
        }
    }

    pub fn context_str(&self, key: &str) -> Option<&str> {
        self.context.get(key).and_then(Value::as_str)
    }

    pub fn take_context(&mut self, key: &str) -> Option<Value> {
        self.context.remove(key)
    }

    pub fn clear_scratch(&mut self) {
        self.context.retain(|key, _| !key.starts_with(SCRATCH_PREFIX));
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_profile_fields_land_on_record() {
        let mut user = User::new("972500000001", "initial");
        user.set_field("full_name", json!("Dana Levi"));
        user.set_field("role", json!("both"));
        user.set_field("contact_preference", json!("ask"));
        user.set_field("ride_destination", json!("חיפה"));

        assert_eq!(user.full_name.as_deref(), Some("Dana Levi"));
        assert_eq!(user.role, Role::Both);
        assert_eq!(user.contact_preference, Some(ContactPreference::Ask));
        assert_eq!(user.context_str("ride_destination"), Some("חיפה"));
        assert_eq!(user.field("role"), Some(json!("both")));
    }

    #[test]
    fn test_restart_keeps_only_display_name() {
        let mut user = User::new("972500000002", "main_menu");
        user.display_name = Some("Dana".to_string());
        user.full_name = Some("Dana Levi".to_string());
        user.registered = true;
        user.context.insert("routine_days".to_string(), json!("MON"));
        user.history.push("ask_full_name");

        let fresh = user.restarted("initial");
        assert_eq!(fresh.id, user.id);
        assert_eq!(fresh.display_name.as_deref(), Some("Dana"));
        assert!(fresh.full_name.is_none());
        assert!(!fresh.registered);
        assert!(fresh.context.is_empty());
        assert!(fresh.history.is_empty());
        assert_eq!(fresh.current_state, "initial");
    }

    #[test]
    fn test_clear_scratch_keeps_collected_fields() {
        let mut user = User::new("u", "initial");
        user.context.insert("_suggestions".to_string(), json!(["חיפה"]));
        user.context.insert("ride_destination".to_string(), json!("חיפה"));
        user.clear_scratch();
        assert!(user.context.contains_key("ride_destination"));
        assert!(!user.context.contains_key("_suggestions"));
    }
}
