use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use ride_core::{
    DocumentStore, MatchStatus, RequestFilter, RequestKind, RequestStatus, RideResult,
    RoutineFilter, User,
};

use super::Action;

/// `complete_registration`: the profile is complete from here on.
pub struct CompleteRegistration;

#[async_trait]
impl Action for CompleteRegistration {
    fn name(&self) -> &'static str {
        "complete_registration"
    }

    async fn execute(&self, user: &mut User, _now: NaiveDateTime) -> RideResult<Option<String>> {
        if !user.registered {
            user.registered = true;
            user.touch();
            tracing::info!(user_id = %user.id, role = ?user.role, "registration completed");
        }
        Ok(None)
    }
}

/// `show_status`: list open requests, offers and routines.
pub struct ShowStatus {
    store: Arc<dyn DocumentStore>,
}

impl ShowStatus {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Action for ShowStatus {
    fn name(&self) -> &'static str {
        "show_status"
    }

    async fn execute(&self, user: &mut User, _now: NaiveDateTime) -> RideResult<Option<String>> {
        let requests = self
            .store
            .find_requests(&RequestFilter::by_requester(user.id.clone()).with_statuses(&[
                RequestStatus::Pending,
                RequestStatus::Matched,
                RequestStatus::Approved,
            ]))
            .await?;
        let routines = self
            .store
            .find_routines(&RoutineFilter::by_owner(user.id.clone()))
            .await?;

        if requests.is_empty() && routines.is_empty() {
            return Ok(Some(
                "You have no open requests, offers or routines.".to_string(),
            ));
        }

        let mut lines = Vec::new();
        if !requests.is_empty() {
            lines.push("Your open rides:".to_string());
            for request in &requests {
                let kind = match request.kind {
                    RequestKind::HitchhikerRequest => "request",
                    RequestKind::DriverOffer => "offer",
                };
                let pending = request
                    .matched_drivers
                    .iter()
                    .filter(|entry| entry.status == MatchStatus::PendingApproval)
                    .count();
                lines.push(format!(
                    "- {kind} to {} {} ({}, {pending} waiting for approval)",
                    request.destination,
                    request.window,
                    status_label(request.status),
                ));
            }
        }
        if !routines.is_empty() {
            lines.push("Your routines:".to_string());
            for routine in &routines {
                lines.push(format!(
                    "- to {} on {} at {}{}",
                    routine.destination,
                    routine.days,
                    routine.outbound,
                    if routine.active { "" } else { " (paused)" },
                ));
            }
        }
        Ok(Some(lines.join("\n")))
    }
}

fn status_label(status: RequestStatus) -> &'static str {
    match status {
        RequestStatus::Pending => "pending",
        RequestStatus::Matched => "matched",
        RequestStatus::Approved => "approved",
        RequestStatus::Found => "found",
        RequestStatus::Expired => "expired",
    }
}
