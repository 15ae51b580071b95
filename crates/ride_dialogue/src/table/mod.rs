//! State table
//!
//! A read-only, declarative description of the dialogue. Each state is keyed
//! by id and carries its prompt, the kind of input it expects, the options of
//! a choice, its transitions and the names of the condition and action it
//! uses. The engine interprets the table at runtime.

mod loader;

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::PathBuf;

use ride_core::Role;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::validators::FieldKind;

pub use loader::parse_table;

#[derive(Error, Debug)]
pub enum StateTableError {
    #[error("state table not found: {0}")]
    FileNotFound(PathBuf),

    #[error("state table path is not a file: {0}")]
    NotAFile(PathBuf),

    #[error("failed to read state table {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse state table {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("state '{state}' references unknown state '{target}'")]
    MissingReference { state: String, target: String },

    #[error("routing cycle through states without input: {}", .path.join(" -> "))]
    RoutingCycle { path: Vec<String> },

    #[error("state '{state}' uses unknown condition '{condition}'")]
    UnknownCondition { state: String, condition: String },

    #[error("state '{state}' uses unknown action '{action}'")]
    UnknownAction { state: String, action: String },

    #[error("invalid state '{state}': {message}")]
    InvalidState { state: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    /// Routing or terminal state. Never waits for the user.
    #[default]
    None,
    Choice,
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceOption {
    pub label: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Persisted into the state's field when the option is picked.
    #[serde(default)]
    pub value: Option<serde_json::Value>,
    /// Sent before the next state's prompt.
    #[serde(default)]
    pub reply: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub next: Option<String>,
}

impl ChoiceOption {
    fn answers(&self, normalized: &str) -> bool {
        normalize_answer(&self.label) == normalized
            || self
                .aliases
                .iter()
                .any(|alias| normalize_answer(alias) == normalized)
    }
}

/// Where a choice state sends an assistant proposal, per role.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    #[serde(default)]
    pub hitchhiker: Option<ExtractionTarget>,
    #[serde(default)]
    pub driver: Option<ExtractionTarget>,
}

impl Extraction {
    pub fn target_for(&self, role: Role) -> Option<&ExtractionTarget> {
        match role {
            Role::Driver => self.driver.as_ref().or(self.hitchhiker.as_ref()),
            Role::Hitchhiker | Role::Both | Role::Unset => {
                self.hitchhiker.as_ref().or(self.driver.as_ref())
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionTarget {
    /// State the conversation jumps to once the proposal is stored.
    pub state: String,
    /// Proposal part (`origin`, `destination`, `schedule`) to field name.
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDef {
    /// Filled from the key of the `states` mapping.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub input: InputKind,
    /// Field the answer is stored under. Defaults to the id without `ask_`.
    #[serde(default)]
    pub field: Option<String>,
    /// Validator for text input. Inferred from the id when absent.
    #[serde(default)]
    pub validator: Option<FieldKind>,
    #[serde(default)]
    pub examples: Option<String>,
    #[serde(default)]
    pub options: Vec<ChoiceOption>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default, alias = "next_state")]
    pub next: Option<String>,
    #[serde(default, alias = "else_next_state")]
    pub else_next: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub extraction: Option<Extraction>,
}

impl StateDef {
    pub fn expects_input(&self) -> bool {
        self.input != InputKind::None
    }

    pub fn field_name(&self) -> String {
        match &self.field {
            Some(field) => field.clone(),
            None => self
                .id
                .strip_prefix("ask_")
                .unwrap_or(&self.id)
                .to_string(),
        }
    }

    pub fn field_kind(&self) -> FieldKind {
        self.validator
            .unwrap_or_else(|| FieldKind::infer(&self.field_name()))
    }

    /// Match an answer against the options. Choice states also accept the
    /// 1-based position of an option.
    pub fn find_option(&self, text: &str) -> Option<&ChoiceOption> {
        let normalized = normalize_answer(text);
        if let Some(option) = self.options.iter().find(|o| o.answers(&normalized)) {
            return Some(option);
        }
        if self.input == InputKind::Choice {
            if let Ok(position) = normalized.parse::<usize>() {
                return position
                    .checked_sub(1)
                    .and_then(|index| self.options.get(index));
            }
        }
        None
    }

    pub fn option_labels(&self) -> Vec<String> {
        self.options.iter().map(|o| o.label.clone()).collect()
    }

    fn references(&self) -> Vec<&str> {
        let mut targets: Vec<&str> = Vec::new();
        targets.extend(self.next.as_deref());
        targets.extend(self.else_next.as_deref());
        targets.extend(self.options.iter().filter_map(|o| o.next.as_deref()));
        if let Some(extraction) = &self.extraction {
            targets.extend(extraction.hitchhiker.as_ref().map(|t| t.state.as_str()));
            targets.extend(extraction.driver.as_ref().map(|t| t.state.as_str()));
        }
        targets
    }

    fn actions(&self) -> impl Iterator<Item = &str> {
        self.action
            .as_deref()
            .into_iter()
            .chain(self.options.iter().filter_map(|o| o.action.as_deref()))
    }
}

/// Phrases that trigger the global commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Commands {
    pub help: Vec<String>,
    pub restart: Vec<String>,
    pub back: Vec<String>,
    pub delete_data: Vec<String>,
    pub ride_found: Vec<String>,
}

impl Default for Commands {
    fn default() -> Self {
        fn phrases(items: &[&str]) -> Vec<String> {
            items.iter().map(|s| s.to_string()).collect()
        }
        Self {
            help: phrases(&["help", "/help", "?", "עזרה"]),
            restart: phrases(&["restart", "/restart", "start over", "התחל מחדש"]),
            back: phrases(&["back", "/back", "go back", "חזור", "חזרה"]),
            delete_data: phrases(&["delete my data", "/delete", "מחק את הנתונים שלי"]),
            ride_found: phrases(&["ride found", "found a ride", "מצאתי טרמפ"]),
        }
    }
}

/// Fixed replies of the engine. `{placeholders}` are filled in at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Messages {
    pub help: String,
    pub generic_error: String,
    pub choose_one_of: String,
    pub examples: String,
    pub suggestions: String,
    pub restarted: String,
    pub data_deleted: String,
    pub nothing_to_go_back_to: String,
    pub ride_found: String,
    pub no_open_requests: String,
    pub approved: String,
    pub rejected: String,
    pub no_longer_available: String,
    pub unknown_code: String,
    pub name_shared: String,
    pub name_hidden: String,
}

impl Default for Messages {
    fn default() -> Self {
        Self {
            help: "Commands: 'back' returns to the previous question, 'restart' starts over, \
                   'ride found' closes your open requests and 'delete my data' removes everything."
                .to_string(),
            generic_error: "Something went wrong. Please try again.".to_string(),
            choose_one_of: "Please choose one of: {options}".to_string(),
            examples: "For example: {examples}".to_string(),
            suggestions: "I could not find \"{input}\". Did you mean:\n{suggestions}\nReply with a number or the name."
                .to_string(),
            restarted: "Starting over.".to_string(),
            data_deleted: "All your data was deleted. Send any message to start again.".to_string(),
            nothing_to_go_back_to: "There is no previous question.".to_string(),
            ride_found: "Great! {count} open request(s) were closed.".to_string(),
            no_open_requests: "You have no open ride requests.".to_string(),
            approved: "Approved.".to_string(),
            rejected: "Rejected.".to_string(),
            no_longer_available: "That ride is no longer waiting for you.".to_string(),
            unknown_code: "No ride is waiting for your answer under code {code}.".to_string(),
            name_shared: "Your name was shared.".to_string(),
            name_hidden: "Only your phone number was shared.".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTable {
    pub initial_state: String,
    #[serde(default)]
    pub commands: Commands,
    #[serde(default)]
    pub messages: Messages,
    pub states: BTreeMap<String, StateDef>,
}

impl StateTable {
    pub fn state(&self, id: &str) -> Option<&StateDef> {
        self.states.get(id)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Structural checks: every referenced state exists, input states can
    /// leave, and no chain of input-less states loops back on itself.
    pub fn validate(&self) -> Result<(), StateTableError> {
        if !self.states.contains_key(&self.initial_state) {
            return Err(StateTableError::MissingReference {
                state: "initial_state".to_string(),
                target: self.initial_state.clone(),
            });
        }

        for (id, state) in &self.states {
            for target in state.references() {
                if !self.states.contains_key(target) {
                    return Err(StateTableError::MissingReference {
                        state: id.clone(),
                        target: target.to_string(),
                    });
                }
            }

            match state.input {
                InputKind::Choice if state.options.is_empty() => {
                    return Err(invalid(id, "choice state requires at least one option"));
                }
                InputKind::Choice => {
                    if state.next.is_none() && state.options.iter().any(|o| o.next.is_none()) {
                        return Err(invalid(id, "every option needs a next state"));
                    }
                }
                InputKind::Text if state.next.is_none() => {
                    return Err(invalid(id, "text state requires a next state"));
                }
                _ => {}
            }

            if state.condition.is_some() && state.next.is_none() {
                return Err(invalid(id, "condition requires a next state"));
            }
        }

        self.detect_routing_cycle()
    }

    /// Checks that every condition and action name is known.
    pub fn check_names<C, A>(&self, is_condition: C, is_action: A) -> Result<(), StateTableError>
    where
        C: Fn(&str) -> bool,
        A: Fn(&str) -> bool,
    {
        for (id, state) in &self.states {
            if let Some(condition) = &state.condition {
                if !is_condition(condition) {
                    return Err(StateTableError::UnknownCondition {
                        state: id.clone(),
                        condition: condition.clone(),
                    });
                }
            }
            for action in state.actions() {
                if !is_action(action) {
                    return Err(StateTableError::UnknownAction {
                        state: id.clone(),
                        action: action.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn detect_routing_cycle(&self) -> Result<(), StateTableError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit<'a>(
            table: &'a StateTable,
            id: &'a str,
            marks: &mut HashMap<&'a str, Mark>,
            path: &mut Vec<&'a str>,
        ) -> Result<(), StateTableError> {
            match marks.get(id) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => {
                    let start = path.iter().position(|p| *p == id).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        path[start..].iter().map(|s| s.to_string()).collect();
                    cycle.push(id.to_string());
                    return Err(StateTableError::RoutingCycle { path: cycle });
                }
                None => {}
            }
            let Some(state) = table.states.get(id) else {
                return Ok(());
            };
            if state.expects_input() {
                marks.insert(id, Mark::Done);
                return Ok(());
            }

            marks.insert(id, Mark::Visiting);
            path.push(id);
            for target in [state.next.as_deref(), state.else_next.as_deref()]
                .into_iter()
                .flatten()
            {
                visit(table, target, marks, path)?;
            }
            path.pop();
            marks.insert(id, Mark::Done);
            Ok(())
        }

        let mut marks = HashMap::new();
        let mut path = Vec::new();
        for id in self.states.keys() {
            visit(self, id, &mut marks, &mut path)?;
        }
        Ok(())
    }
}

fn invalid(state: &str, message: &str) -> StateTableError {
    StateTableError::InvalidState {
        state: state.to_string(),
        message: message.to_string(),
    }
}

/// Lowercased, trimmed, inner whitespace collapsed.
pub(crate) fn normalize_answer(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
