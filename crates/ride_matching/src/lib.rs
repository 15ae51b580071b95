//! ride_matching - Matching, approval and notification for ride requests
//!
//! - `matcher` scores drivers for requests and requests for drivers
//! - `approval` moves matched drivers through approval, including the
//!   guarded auto-approval path, ride-found closure and expiry
//! - `notifications` sends and de-duplicates outbound messages
//! - `service` chains them for new requests, offers and routines

pub mod approval;
pub mod matcher;
pub mod notifications;
pub mod service;

pub use approval::ApprovalWorkflow;
pub use matcher::{Availability, Candidate, DriverContext, HitchhikerCandidate, Matcher};
pub use notifications::{
    approve_command, hide_command, reject_command, share_command, Delivery, NameDisclosure,
    Notifier,
};
pub use service::{MatchOutcome, RideService};
