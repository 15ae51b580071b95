use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::schedule::{TimeWindow, TimingClass};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    HitchhikerRequest,
    DriverOffer,
}

/// Lifecycle: pending -> matched -> approved | found | expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Matched,
    Approved,
    Found,
    Expired,
}

impl RequestStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Matched)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    PendingApproval,
    Approved,
    Rejected,
    Found,
}

impl MatchStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::PendingApproval)
    }
}

/// Where a candidate driver was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum MatchSource {
    Routine { routine_id: Uuid },
    Offer { request_id: Uuid },
}

/// The three auto-approval guards of a matched driver entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardFlag {
    Processing,
    NotificationSending,
    NotificationSent,
}

impl GuardFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuardFlag::Processing => "auto_approval_processing",
            GuardFlag::NotificationSending => "auto_approval_notification_sending",
            GuardFlag::NotificationSent => "auto_approval_notification_sent",
        }
    }
}

/// A candidate driver embedded in a ride request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedDriver {
    pub match_id: Uuid,
    pub driver_id: String,
    pub status: MatchStatus,
    pub score: f64,
    pub source: MatchSource,
    #[serde(default)]
    pub auto_approve: bool,
    #[serde(default)]
    pub auto_approval_processing: bool,
    #[serde(default)]
    pub auto_approval_notification_sending: bool,
    #[serde(default)]
    pub auto_approval_notification_sent: bool,
    /// Set once the approve/reject prompt reached the driver.
    #[serde(default)]
    pub prompt_sent_at: Option<DateTime<Utc>>,
    /// Answer to the name-sharing question (`ask` preference only).
    #[serde(default)]
    pub share_name: Option<bool>,
    #[serde(default)]
    pub requester_notified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub decided_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MatchedDriver {
    pub fn pending(driver_id: impl Into<String>, score: f64, source: MatchSource) -> Self {
        let now = Utc::now();
        Self {
            match_id: Uuid::new_v4(),
            driver_id: driver_id.into(),
            status: MatchStatus::PendingApproval,
            score,
            source,
            auto_approve: false,
            auto_approval_processing: false,
            auto_approval_notification_sending: false,
            auto_approval_notification_sent: false,
            prompt_sent_at: None,
            share_name: None,
            requester_notified_at: None,
            decided_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Short code the driver types back in approve/reject commands.
    pub fn short_code(&self) -> String {
        short_code(&self.match_id)
    }

    pub fn flag(&self, flag: GuardFlag) -> bool {
        match flag {
            GuardFlag::Processing => self.auto_approval_processing,
            GuardFlag::NotificationSending => self.auto_approval_notification_sending,
            GuardFlag::NotificationSent => self.auto_approval_notification_sent,
        }
    }

    pub fn set_flag(&mut self, flag: GuardFlag, value: bool) {
        match flag {
            GuardFlag::Processing => self.auto_approval_processing = value,
            GuardFlag::NotificationSending => self.auto_approval_notification_sending = value,
            GuardFlag::NotificationSent => self.auto_approval_notification_sent = value,
        }
        self.updated_at = Utc::now();
    }

    pub fn set_status(&mut self, status: MatchStatus) {
        self.status = status;
        self.updated_at = Utc::now();
        if status != MatchStatus::PendingApproval {
            self.decided_at = Some(self.updated_at);
        }
    }
}

pub fn short_code(id: &Uuid) -> String {
    id.simple().to_string()[..6].to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideRequest {
    pub id: Uuid,
    pub requester_id: String,
    pub kind: RequestKind,
    #[serde(default)]
    pub origin: Option<String>,
    pub destination: String,
    pub window: TimeWindow,
    pub timing: TimingClass,
    pub status: RequestStatus,
    #[serde(default)]
    pub matched_drivers: Vec<MatchedDriver>,
    /// The requester was told about the request; auto-approvals wait for this.
    #[serde(default)]
    pub requester_confirmed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RideRequest {
    pub fn new(
        requester_id: impl Into<String>,
        kind: RequestKind,
        origin: Option<String>,
        destination: impl Into<String>,
        window: TimeWindow,
        timing: TimingClass,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            requester_id: requester_id.into(),
            kind,
            origin,
            destination: destination.into(),
            window,
            timing,
            status: RequestStatus::Pending,
            matched_drivers: Vec::new(),
            requester_confirmed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn entry(&self, match_id: Uuid) -> Option<&MatchedDriver> {
        self.matched_drivers.iter().find(|e| e.match_id == match_id)
    }

    pub fn entry_mut(&mut self, match_id: Uuid) -> Option<&mut MatchedDriver> {
        self.matched_drivers
            .iter_mut()
            .find(|e| e.match_id == match_id)
    }

    pub fn entry_for_driver(&self, driver_id: &str) -> Option<&MatchedDriver> {
        self.matched_drivers
            .iter()
            .find(|e| e.driver_id == driver_id)
    }

    pub fn approved_entry(&self) -> Option<&MatchedDriver> {
        self.matched_drivers
            .iter()
            .find(|e| e.status == MatchStatus::Approved)
    }

    pub fn approved_count(&self) -> usize {
        self.matched_drivers
            .iter()
            .filter(|e| e.status == MatchStatus::Approved)
            .count()
    }

    pub fn has_pending_entries(&self) -> bool {
        self.matched_drivers
            .iter()
            .any(|e| e.status == MatchStatus::PendingApproval)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Standalone mirror of a matched driver entry created from a routine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    /// Same id as the embedded entry.
    pub id: Uuid,
    pub request_id: Uuid,
    pub driver_id: String,
    pub hitchhiker_id: String,
    #[serde(default)]
    pub routine_id: Option<Uuid>,
    pub status: MatchStatus,
    pub score: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Match {
    pub fn mirror(request: &RideRequest, entry: &MatchedDriver) -> Self {
        let routine_id = match entry.source {
            MatchSource::Routine { routine_id } => Some(routine_id),
            MatchSource::Offer { .. } => None,
        };
        Self {
            id: entry.match_id,
            request_id: request.id,
            driver_id: entry.driver_id.clone(),
            hitchhiker_id: request.requester_id.clone(),
            routine_id,
            status: entry.status,
            score: entry.score,
            created_at: entry.created_at,
            updated_at: entry.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn sample_request() -> RideRequest {
        let start = NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        RideRequest::new(
            "hitchhiker",
            RequestKind::HitchhikerRequest,
            Some("קריית שמונה".to_string()),
            "חיפה",
            TimeWindow::starting_at(start, Duration::hours(1)),
            TimingClass::Specific,
        )
    }

    #[test]
    fn test_entry_lookup_and_approved_count() {
        let mut request = sample_request();
        let routine_id = Uuid::new_v4();
        let mut first = MatchedDriver::pending("d1", 3.0, MatchSource::Routine { routine_id });
        first.set_status(MatchStatus::Approved);
        let second = MatchedDriver::pending("d2", 4.5, MatchSource::Routine { routine_id });
        let second_id = second.match_id;
        request.matched_drivers.push(first);
        request.matched_drivers.push(second);

        assert_eq!(request.approved_count(), 1);
        assert_eq!(request.entry(second_id).unwrap().driver_id, "d2");
        assert!(request.entry_for_driver("d1").unwrap().decided_at.is_some());
        assert!(request.has_pending_entries());
    }

    #[test]
    fn test_short_code_is_prefix_of_match_id() {
        let entry = MatchedDriver::pending(
            "d1",
            1.0,
            MatchSource::Offer {
                request_id: Uuid::new_v4(),
            },
        );
        let code = entry.short_code();
        assert_eq!(code.len(), 6);
        assert!(entry.match_id.simple().to_string().starts_with(&code));
    }

    #[test]
    fn test_guard_flags_round_trip_through_setter() {
        let mut entry = MatchedDriver::pending(
            "d1",
            1.0,
            MatchSource::Offer {
                request_id: Uuid::new_v4(),
            },
        );
        for flag in [
            GuardFlag::Processing,
            GuardFlag::NotificationSending,
            GuardFlag::NotificationSent,
        ] {
            assert!(!entry.flag(flag));
            entry.set_flag(flag, true);
            assert!(entry.flag(flag));
        }
    }
}
