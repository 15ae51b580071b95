//! ride_dialogue - Table-driven conversation engine
//!
//! - `table` - state table model, YAML loader and load-time validation
//! - `predicates` / `validators` / `settlements` - what the table refers to by name
//! - `actions` - named side effects dispatched into the ride workflows
//! - `engine` - the `process(user_id, text)` entry point

pub mod actions;
pub mod commands;
pub mod engine;
pub mod locks;
pub mod predicates;
pub mod settlements;
pub mod table;
pub mod validators;

pub use actions::{Action, ActionDispatcher};
pub use commands::GlobalCommand;
pub use engine::{ConversationEngine, EngineBuilder, Reply};
pub use locks::{SessionGuard, SessionLocks};
pub use predicates::{Predicate, PredicateRegistry};
pub use settlements::SettlementCatalog;
pub use table::{
    ChoiceOption, Commands, Extraction, ExtractionTarget, InputKind, Messages, StateDef,
    StateTable, StateTableError,
};
pub use validators::{parse_days, FieldKind, InputValidator, Validation};
