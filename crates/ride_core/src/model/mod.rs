//! Persisted records
//!
//! Users, ride requests with their embedded matched drivers, routines and the
//! standalone match mirror.

mod request;
mod routine;
mod schedule;
mod user;

pub use request::{
    GuardFlag, Match, MatchSource, MatchStatus, MatchedDriver, RequestKind, RequestStatus,
    RideRequest,
};
pub use routine::Routine;
pub use schedule::{DailyWindow, DaySet, TimeWindow, TimingClass};
pub use user::{ContactPreference, Role, User, SCRATCH_PREFIX};
