//! ride_core - Core records and collaborator contracts for the ride-matching service
//!
//! This crate provides the foundational types used across all ride crates:
//! - `model` - User, RideRequest, Routine, MatchedDriver, Match
//! - `time` - the time normalizer producing canonical windows
//! - `store` / `channel` / `assistant` - narrow interfaces to external collaborators
//! - `error` - the error taxonomy shared by the engine and the workflows

pub mod assistant;
pub mod channel;
pub mod clock;
pub mod config;
pub mod error;
pub mod history;
pub mod model;
pub mod store;
pub mod time;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

// Re-export commonly used types
pub use assistant::{AssistantError, ExtractionAssistant, RideProposal};
pub use channel::{ChannelError, OutboundChannel};
pub use clock::{Clock, SystemClock};
pub use config::{ConfigError, RideConfig};
pub use error::{RideError, RideResult};
pub use history::StateHistory;
pub use model::{
    ContactPreference, DailyWindow, DaySet, GuardFlag, Match, MatchSource, MatchStatus,
    MatchedDriver, RequestKind, RequestStatus, RideRequest, Role, Routine, TimeWindow,
    TimingClass, User,
};
pub use store::{
    Conditional, DocumentStore, MatchFilter, Mutation, RequestFilter, RoutineFilter, StoreError,
    StoreResult,
};
pub use time::{format_window, parse_clock, weekday_from_word, NormalizedTime, TimeNormalizer};
