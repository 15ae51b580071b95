//! Conversation engine
//!
//! Interprets the [`StateTable`] against a user's persisted state. One call to
//! [`ConversationEngine::process`] is one turn: resolve global commands,
//! otherwise show the current prompt or consume the answer, then follow
//! routing states until the conversation waits for input again.
//!
//! Turns of the same user are serialized with [`SessionLocks`]; turns of
//! different users run concurrently.

use std::sync::Arc;

use ride_core::{
    Clock, DocumentStore, ExtractionAssistant, OutboundChannel, RequestFilter, RideConfig,
    RideError, RideResult, StateHistory, SystemClock, User,
};
use ride_matching::RideService;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::actions::{Action, ActionDispatcher};
use crate::commands::GlobalCommand;
use crate::locks::SessionLocks;
use crate::predicates::{Predicate, PredicateRegistry, PREFILL_KEY};
use crate::settlements::SettlementCatalog;
use crate::table::{InputKind, StateDef, StateTable, StateTableError};
use crate::validators::{FieldKind, InputValidator, Validation};

/// Scratch key of the settlement suggestions offered in the current state.
const SUGGESTIONS_KEY: &str = "_suggestions";

/// What the transport sends back to the user.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    pub text: String,
    pub choices: Option<Vec<String>>,
}

#[derive(Debug, Default)]
struct Turn {
    parts: Vec<String>,
    choices: Option<Vec<String>>,
}

impl Turn {
    fn say(&mut self, text: impl Into<String>) {
        let text = text.into();
        if !text.trim().is_empty() {
            self.parts.push(text);
        }
    }

    fn offer(&mut self, choices: Vec<String>) {
        self.choices = (!choices.is_empty()).then_some(choices);
    }

    fn append(&mut self, other: Turn) {
        self.parts.extend(other.parts);
        if other.choices.is_some() {
            self.choices = other.choices;
        }
    }

    fn into_reply(self) -> Reply {
        Reply {
            text: self.parts.join("\n\n"),
            choices: self.choices,
        }
    }
}

pub struct EngineBuilder {
    table: StateTable,
    store: Arc<dyn DocumentStore>,
    channel: Arc<dyn OutboundChannel>,
    config: RideConfig,
    catalog: Option<SettlementCatalog>,
    assistant: Option<Arc<dyn ExtractionAssistant>>,
    clock: Option<Arc<dyn Clock>>,
    predicates: PredicateRegistry,
    actions: Vec<Arc<dyn Action>>,
}

impl EngineBuilder {
    pub fn new(
        table: StateTable,
        store: Arc<dyn DocumentStore>,
        channel: Arc<dyn OutboundChannel>,
        config: &RideConfig,
    ) -> Self {
        Self {
            table,
            store,
            channel,
            config: config.clone(),
            catalog: None,
            assistant: None,
            clock: None,
            predicates: PredicateRegistry::default(),
            actions: Vec::new(),
        }
    }

    pub fn catalog(mut self, catalog: SettlementCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn assistant(mut self, assistant: Arc<dyn ExtractionAssistant>) -> Self {
        self.assistant = Some(assistant);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn predicate(mut self, name: impl Into<String>, predicate: Predicate) -> Self {
        self.predicates.register(name, predicate);
        self
    }

    /// Register an extra action, replacing a built-in one of the same name.
    pub fn action(mut self, action: Arc<dyn Action>) -> Self {
        self.actions.push(action);
        self
    }

    /// Wire everything together. Fails when the table names a condition or
    /// an action nobody registered.
    pub fn build(self) -> Result<ConversationEngine, StateTableError> {
        let catalog = Arc::new(self.catalog.unwrap_or_default());
        let validator = InputValidator::new(catalog, &self.config);
        let service = RideService::new(self.store.clone(), self.channel, &self.config);

        let mut actions = ActionDispatcher::with_builtin(
            service.clone(),
            self.store.clone(),
            *validator.normalizer(),
        );
        for action in self.actions {
            actions.register(action);
        }

        self.table.check_names(
            |condition| self.predicates.contains(condition),
            |action| actions.contains(action),
        )?;

        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => match self.config.timezone() {
                Ok(tz) => Arc::new(SystemClock::new(tz)),
                Err(err) => {
                    tracing::warn!(error = %err, "invalid time zone, using the default");
                    Arc::new(SystemClock::default())
                }
            },
        };

        Ok(ConversationEngine {
            table: Arc::new(self.table),
            store: self.store,
            service,
            actions,
            predicates: self.predicates,
            validator,
            assistant: self.assistant,
            clock,
            locks: SessionLocks::new(),
            history_capacity: self.config.history_capacity,
        })
    }
}

pub struct ConversationEngine {
    table: Arc<StateTable>,
    store: Arc<dyn DocumentStore>,
    service: RideService,
    actions: ActionDispatcher,
    predicates: PredicateRegistry,
    validator: InputValidator,
    assistant: Option<Arc<dyn ExtractionAssistant>>,
    clock: Arc<dyn Clock>,
    locks: SessionLocks,
    history_capacity: usize,
}

impl ConversationEngine {
    pub fn table(&self) -> &StateTable {
        &self.table
    }

    pub fn service(&self) -> &RideService {
        &self.service
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub async fn process(&self, user_id: &str, text: &str) -> RideResult<Reply> {
        self.process_as(user_id, None, text).await
    }

    /// Handle one inbound message. `display_name` is the transport's profile
    /// name, if it has one.
    ///
    /// Only `RideError::Upstream` reaches the caller; the user record is not
    /// saved in that case, so the whole turn can be retried.
    pub async fn process_as(
        &self,
        user_id: &str,
        display_name: Option<&str>,
        text: &str,
    ) -> RideResult<Reply> {
        let _guard = self.locks.acquire(user_id).await;

        let mut user = match self.store.get_user(user_id).await? {
            Some(user) => user,
            None => {
                tracing::info!(user_id, "new user");
                let mut user = User::new(user_id, self.table.initial_state.clone());
                user.history = StateHistory::with_capacity(self.history_capacity);
                user
            }
        };
        if let Some(name) = display_name {
            user.display_name = Some(name.to_string());
        }

        let mut turn = Turn::default();
        let keep_user = match self.run_turn(&mut user, text.trim(), &mut turn).await {
            Ok(keep_user) => keep_user,
            Err(err) => self.recover(&mut user, err, &mut turn)?,
        };
        if keep_user {
            user.touch();
            self.store.put_user(&user).await?;
        }
        Ok(turn.into_reply())
    }

    async fn run_turn(&self, user: &mut User, text: &str, turn: &mut Turn) -> RideResult<bool> {
        if let Some(command) = GlobalCommand::parse(text, &self.table.commands) {
            return self.run_command(user, command, turn).await;
        }

        if self.table.state(&user.current_state).is_none() {
            tracing::warn!(
                user_id = %user.id,
                state = %user.current_state,
                "unknown state, resetting to the initial state"
            );
            self.reset(user);
        }

        if !user.awaiting_input {
            self.enter(user, turn).await?;
            return Ok(true);
        }

        let Some(state) = self.table.state(&user.current_state) else {
            return Err(RideError::Configuration(format!(
                "unknown state '{}'",
                user.current_state
            )));
        };
        if let Some(next) = self.answer(user, state, text, turn).await? {
            self.transition(user, &next);
            self.enter(user, turn).await?;
        }
        Ok(true)
    }

    /// Turn a failed turn into a reply. Upstream failures are handed back.
    fn recover(&self, user: &mut User, err: RideError, turn: &mut Turn) -> RideResult<bool> {
        match err {
            RideError::Upstream(_) => return Err(err),
            RideError::Validation(message) => turn.say(message),
            RideError::NotFound { .. } => {
                tracing::warn!(user_id = %user.id, error = %err, "referenced record is missing");
                turn.say(self.table.messages.generic_error.clone());
            }
            RideError::ConcurrencyConflict(_) => {
                tracing::debug!(user_id = %user.id, error = %err, "lost a race, nothing to do");
            }
            RideError::Configuration(_) => {
                tracing::error!(
                    user_id = %user.id,
                    state = %user.current_state,
                    error = %err,
                    "state table misconfigured, resetting user"
                );
                self.reset(user);
                turn.say(self.table.messages.generic_error.clone());
            }
        }
        Ok(true)
    }

    /// Show the current state: run its action, follow routing states and
    /// stop at the first state that waits for input.
    async fn enter(&self, user: &mut User, turn: &mut Turn) -> RideResult<()> {
        for _ in 0..=self.table.len() {
            let Some(state) = self.table.state(&user.current_state) else {
                return Err(RideError::Configuration(format!(
                    "unknown state '{}'",
                    user.current_state
                )));
            };

            if state.extraction.is_some() {
                user.take_context(PREFILL_KEY);
            }
            if let Some(action) = &state.action {
                self.store.put_user(user).await?;
                self.run_action(action, user, turn).await?;
            }

            if !state.expects_input() {
                if let Some(prompt) = &state.prompt {
                    turn.say(render(prompt, user));
                }
                match self.route(state, user) {
                    Some(next) => self.transition(user, &next),
                    None => {
                        // Terminal: the next message goes through the initial state.
                        self.transition(user, &self.table.initial_state);
                        return Ok(());
                    }
                }
                continue;
            }

            if let Some(prefilled) = take_prefill(user, &state.field_name()) {
                let mut attempt = Turn::default();
                if let Some(next) = self.answer(user, state, &prefilled, &mut attempt).await? {
                    tracing::debug!(user_id = %user.id, state = %state.id, "answered from prefill");
                    turn.append(attempt);
                    self.transition(user, &next);
                    continue;
                }
                self.prompt(user, state, turn);
                turn.append(attempt);
                return Ok(());
            }

            self.prompt(user, state, turn);
            return Ok(());
        }

        Err(RideError::Configuration(format!(
            "routing did not settle within {} states",
            self.table.len()
        )))
    }

    fn prompt(&self, user: &mut User, state: &StateDef, turn: &mut Turn) {
        if let Some(prompt) = &state.prompt {
            turn.say(render(prompt, user));
        }
        turn.offer(state.option_labels());
        user.awaiting_input = true;
    }

    /// Consume `text` as the answer to `state`. Returns the next state when
    /// the answer was accepted.
    async fn answer(
        &self,
        user: &mut User,
        state: &StateDef,
        text: &str,
        turn: &mut Turn,
    ) -> RideResult<Option<String>> {
        if let Some(option) = state.find_option(text) {
            if let Some(value) = &option.value {
                user.set_field(&state.field_name(), value.clone());
            }
            if let Some(reply) = &option.reply {
                turn.say(render(reply, user));
            }
            if let Some(action) = &option.action {
                self.store.put_user(user).await?;
                self.run_action(action, user, turn).await?;
            }
            return Ok(option.next.clone().or_else(|| self.route(state, user)));
        }

        match state.input {
            InputKind::Choice => {
                if let Some(next) = self.try_extraction(user, state, text).await {
                    return Ok(Some(next));
                }
                let labels = state.option_labels();
                turn.say(
                    self.table
                        .messages
                        .choose_one_of
                        .replace("{options}", &labels.join(", ")),
                );
                turn.offer(labels);
                Ok(None)
            }
            InputKind::Text => Ok(self.answer_text(user, state, text, turn)),
            InputKind::None => Ok(self.route(state, user)),
        }
    }

    fn answer_text(
        &self,
        user: &mut User,
        state: &StateDef,
        text: &str,
        turn: &mut Turn,
    ) -> Option<String> {
        let field = state.field_name();
        if let Some(picked) = pick_suggestion(user, text) {
            user.set_field(&field, Value::String(picked));
            return self.route(state, user);
        }

        match self
            .validator
            .validate(state.field_kind(), text, self.clock.now())
        {
            Validation::Valid(value) => {
                user.set_field(&field, value);
                self.route(state, user)
            }
            Validation::Invalid(reason) => {
                user.take_context(SUGGESTIONS_KEY);
                turn.say(reason);
                if let Some(examples) = &state.examples {
                    turn.say(self.table.messages.examples.replace("{examples}", examples));
                }
                turn.offer(state.option_labels());
                None
            }
            Validation::Suggestions(names) => {
                let listing = names
                    .iter()
                    .enumerate()
                    .map(|(index, name)| format!("{}. {name}", index + 1))
                    .collect::<Vec<_>>()
                    .join("\n");
                turn.say(
                    self.table
                        .messages
                        .suggestions
                        .replace("{input}", text)
                        .replace("{suggestions}", &listing),
                );
                user.context
                    .insert(SUGGESTIONS_KEY.to_string(), json!(names));
                turn.offer(names);
                None
            }
        }
    }

    /// Let the assistant read an unmatched answer to a choice state. Its
    /// proposal is stored as prefill for the states that collect it.
    async fn try_extraction(&self, user: &mut User, state: &StateDef, text: &str) -> Option<String> {
        let extraction = state.extraction.as_ref()?;
        let assistant = self.assistant.as_ref()?;

        let proposal = match assistant.propose(&user.id, text).await {
            Ok(Some(proposal)) if !proposal.is_empty() => proposal,
            Ok(_) => return None,
            Err(err) => {
                tracing::warn!(user_id = %user.id, error = %err, "assistant failed, continuing with the form");
                return None;
            }
        };
        let target = extraction.target_for(proposal.role.unwrap_or(user.role))?;

        let now = self.clock.now();
        let mut prefill = Map::new();
        for (part, field) in &target.fields {
            let proposed = match part.as_str() {
                "origin" => proposal.origin.as_deref(),
                "destination" => proposal.destination.as_deref(),
                "schedule" => proposal.schedule.as_deref(),
                _ => None,
            };
            let Some(proposed) = proposed else {
                continue;
            };
            if self.collects(field) {
                prefill.insert(field.clone(), Value::String(proposed.to_string()));
            } else if let Validation::Valid(value) =
                self.validator
                    .validate(FieldKind::infer(field), proposed, now)
            {
                user.set_field(field, value);
            }
        }
        if !prefill.is_empty() {
            user.context
                .insert(PREFILL_KEY.to_string(), Value::Object(prefill));
        }

        tracing::info!(user_id = %user.id, target = %target.state, "using assistant proposal");
        Some(target.state.clone())
    }

    fn collects(&self, field: &str) -> bool {
        self.table
            .states
            .values()
            .any(|state| state.expects_input() && state.field_name() == field)
    }

    fn route(&self, state: &StateDef, user: &User) -> Option<String> {
        let Some(condition) = &state.condition else {
            return state.next.clone();
        };
        let holds = self
            .predicates
            .evaluate(condition, user)
            .unwrap_or_else(|| {
                tracing::warn!(state = %state.id, condition = %condition, "unknown condition");
                false
            });
        if holds {
            state.next.clone()
        } else {
            state.else_next.clone()
        }
    }

    fn transition(&self, user: &mut User, next: &str) {
        let vacated = std::mem::replace(&mut user.current_state, next.to_string());
        tracing::debug!(user_id = %user.id, from = %vacated, to = next, "transition");
        user.history.push(vacated);
        user.awaiting_input = false;
        user.clear_scratch();
        user.touch();
    }

    fn reset(&self, user: &mut User) {
        user.current_state = self.table.initial_state.clone();
        user.awaiting_input = false;
        user.clear_scratch();
    }

    async fn run_action(&self, name: &str, user: &mut User, turn: &mut Turn) -> RideResult<()> {
        match self.actions.dispatch(name, user, self.clock.now()).await {
            Ok(Some(message)) => turn.say(message),
            Ok(None) => {}
            Err(RideError::Validation(message)) => {
                tracing::info!(user_id = %user.id, action = name, %message, "action declined");
                turn.say(message);
            }
            Err(err) => return Err(err),
        }
        Ok(())
    }

    async fn run_command(
        &self,
        user: &mut User,
        command: GlobalCommand,
        turn: &mut Turn,
    ) -> RideResult<bool> {
        tracing::info!(user_id = %user.id, ?command, "global command");
        let messages = &self.table.messages;

        match command {
            GlobalCommand::Help => {
                turn.say(messages.help.clone());
                if user.awaiting_input {
                    if let Some(state) = self.table.state(&user.current_state) {
                        turn.offer(state.option_labels());
                    }
                }
            }
            GlobalCommand::Restart => {
                let routines = self.store.delete_routines_by(&user.id).await?;
                tracing::info!(user_id = %user.id, routines, "user restarted");
                *user = user.restarted(self.table.initial_state.clone());
                turn.say(messages.restarted.clone());
                self.enter(user, turn).await?;
            }
            GlobalCommand::Back => self.go_back(user, turn).await?,
            GlobalCommand::DeleteData => {
                self.delete_data(&user.id).await?;
                turn.say(messages.data_deleted.clone());
                return Ok(false);
            }
            GlobalCommand::RideFound => {
                let closed = self.service.approvals().mark_found(&user.id).await?;
                if closed == 0 {
                    turn.say(messages.no_open_requests.clone());
                } else {
                    turn.say(messages.ride_found.replace("{count}", &closed.to_string()));
                }
            }
            GlobalCommand::Approve(code) => {
                if let Some(match_id) = self.find_entry(user, &code, turn).await? {
                    let approved = self
                        .service
                        .approvals()
                        .approve(match_id, &user.id, false)
                        .await?;
                    turn.say(if approved {
                        messages.approved.clone()
                    } else {
                        messages.no_longer_available.clone()
                    });
                }
            }
            GlobalCommand::Reject(code) => {
                if let Some(match_id) = self.find_entry(user, &code, turn).await? {
                    let rejected = self.service.approvals().reject(match_id, &user.id).await?;
                    turn.say(if rejected {
                        messages.rejected.clone()
                    } else {
                        messages.no_longer_available.clone()
                    });
                }
            }
            GlobalCommand::ShareName(code) => self.answer_name_sharing(user, &code, true, turn).await?,
            GlobalCommand::HideName(code) => self.answer_name_sharing(user, &code, false, turn).await?,
        }
        Ok(true)
    }

    async fn answer_name_sharing(
        &self,
        user: &User,
        code: &str,
        share: bool,
        turn: &mut Turn,
    ) -> RideResult<()> {
        let Some(match_id) = self.find_entry(user, code, turn).await? else {
            return Ok(());
        };
        let answered = self
            .service
            .approvals()
            .respond_name_sharing(match_id, &user.id, share)
            .await?;
        let messages = &self.table.messages;
        turn.say(match (answered, share) {
            (false, _) => messages.no_longer_available.clone(),
            (true, true) => messages.name_shared.clone(),
            (true, false) => messages.name_hidden.clone(),
        });
        Ok(())
    }

    /// Return to the last state that asked a question.
    async fn go_back(&self, user: &mut User, turn: &mut Turn) -> RideResult<()> {
        while let Some(previous) = user.history.pop() {
            let asks = self
                .table
                .state(&previous)
                .is_some_and(StateDef::expects_input);
            if asks {
                tracing::debug!(user_id = %user.id, from = %user.current_state, to = %previous, "going back");
                user.current_state = previous;
                user.awaiting_input = false;
                user.clear_scratch();
                return self.enter(user, turn).await;
            }
        }
        turn.say(self.table.messages.nothing_to_go_back_to.clone());
        Ok(())
    }

    async fn delete_data(&self, user_id: &str) -> RideResult<()> {
        let routines = self.store.delete_routines_by(user_id).await?;
        let requests = self.store.delete_requests_by(user_id).await?;
        let matches = self.store.delete_matches_for(user_id).await?;
        self.store.delete_user(user_id).await?;
        tracing::info!(user_id, routines, requests, matches, "user data deleted");
        Ok(())
    }

    /// The newest entry of this driver whose match id starts with `code`.
    async fn find_entry(
        &self,
        user: &User,
        code: &str,
        turn: &mut Turn,
    ) -> RideResult<Option<Uuid>> {
        let requests = self
            .store
            .find_requests(&RequestFilter::by_driver(user.id.clone()))
            .await?;
        let found = requests
            .iter()
            .rev()
            .flat_map(|request| request.matched_drivers.iter())
            .find(|entry| entry.driver_id == user.id && entry.short_code() == code)
            .map(|entry| entry.match_id);
        if found.is_none() {
            turn.say(self.table.messages.unknown_code.replace("{code}", code));
        }
        Ok(found)
    }
}

fn render(template: &str, user: &User) -> String {
    template.replace("{name}", user.name())
}

fn take_prefill(user: &mut User, field: &str) -> Option<String> {
    let prefill = user.context.get_mut(PREFILL_KEY)?.as_object_mut()?;
    let value = prefill.remove(field);
    let exhausted = prefill.is_empty();
    if exhausted {
        user.context.remove(PREFILL_KEY);
    }
    value?.as_str().map(str::to_string)
}

fn pick_suggestion(user: &User, text: &str) -> Option<String> {
    let position: usize = text.trim().parse().ok()?;
    let names = user.context.get(SUGGESTIONS_KEY)?.as_array()?;
    names
        .get(position.checked_sub(1)?)?
        .as_str()
        .map(str::to_string)
}
