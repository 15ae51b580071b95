//! Ride service
//!
//! The sequences the dialogue layer triggers: a new hitchhiker request, a
//! new driver offer and a new routine. Each one stores the record, runs the
//! matcher, creates entries, confirms to the creator and only then runs the
//! deferred auto-approvals.
//!
//! Every sequence can be re-run with the same record after an upstream
//! failure: a record that already exists is resumed instead of inserted,
//! and the steps after it skip whatever was already done.

use std::sync::Arc;

use ride_core::{
    DocumentStore, MatchSource, OutboundChannel, RequestKind, RequestStatus, RideConfig,
    RideError, RideRequest, RideResult, Routine, RoutineFilter,
};

use crate::approval::ApprovalWorkflow;
use crate::matcher::{Availability, Candidate, DriverContext, Matcher};
use crate::notifications::Notifier;

/// What a submit call produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchOutcome {
    /// Entries created by this call.
    pub entries_created: usize,
    /// Entries auto-approved and notified by this call.
    pub auto_approved: usize,
}

#[derive(Clone)]
pub struct RideService {
    store: Arc<dyn DocumentStore>,
    matcher: Matcher,
    approvals: ApprovalWorkflow,
}

impl RideService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        channel: Arc<dyn OutboundChannel>,
        config: &RideConfig,
    ) -> Self {
        let notifier = Notifier::new(store.clone(), channel);
        Self {
            matcher: Matcher::new(store.clone(), config),
            approvals: ApprovalWorkflow::new(store.clone(), notifier, config),
            store,
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    pub fn approvals(&self) -> &ApprovalWorkflow {
        &self.approvals
    }

    /// Store a hitchhiker request and match it against drivers.
    pub async fn submit_request(&self, request: RideRequest) -> RideResult<MatchOutcome> {
        if request.kind != RequestKind::HitchhikerRequest {
            return Err(RideError::Validation(
                "submit_request expects a hitchhiker request".to_string(),
            ));
        }
        let request = self.store_or_resume(request).await?;
        if !request.status.is_open() {
            return Ok(MatchOutcome::default());
        }

        let ranked = self.matcher.find_drivers(&request).await?;
        let created = self.approvals.create_matches(request.id, &ranked).await?;
        self.confirm_once(&request).await?;
        let auto_approved = self
            .approvals
            .process_pending_auto_approvals(request.id)
            .await?;

        Ok(MatchOutcome {
            entries_created: created.len(),
            auto_approved,
        })
    }

    /// Store a driver offer and attach it to matching hitchhiker requests.
    pub async fn publish_offer(
        &self,
        offer: RideRequest,
        home_settlement: Option<String>,
    ) -> RideResult<MatchOutcome> {
        if offer.kind != RequestKind::DriverOffer {
            return Err(RideError::Validation(
                "publish_offer expects a driver offer".to_string(),
            ));
        }
        let offer = self.store_or_resume(offer).await?;

        let driver = DriverContext {
            driver_id: offer.requester_id.clone(),
            home_settlement,
        };
        let availability = Availability::Once {
            window: offer.window,
            timing: offer.timing,
        };
        let outcome = self
            .attach_driver(
                &driver,
                &offer.destination,
                &availability,
                MatchSource::Offer {
                    request_id: offer.id,
                },
            )
            .await?;

        if outcome.entries_created > 0 {
            self.store
                .update_request(
                    offer.id,
                    Box::new(|offer| {
                        if offer.status != RequestStatus::Pending {
                            return false;
                        }
                        offer.status = RequestStatus::Matched;
                        offer.touch();
                        true
                    }),
                )
                .await?;
        }
        if offer.requester_confirmed_at.is_none() {
            self.approvals
                .notifier()
                .confirm_request(&offer, outcome.entries_created)
                .await?;
        }
        Ok(outcome)
    }

    /// Store a routine and scan open requests it could serve.
    pub async fn register_routine(
        &self,
        routine: Routine,
        home_settlement: Option<String>,
    ) -> RideResult<MatchOutcome> {
        let known = self
            .store
            .find_routines(&RoutineFilter::by_owner(&routine.owner_id))
            .await?
            .iter()
            .any(|existing| existing.id == routine.id);
        if known {
            tracing::info!(routine_id = %routine.id, "resuming routine registration");
        } else {
            self.store.insert_routine(&routine).await?;
            tracing::info!(
                routine_id = %routine.id,
                driver_id = %routine.owner_id,
                destination = %routine.destination,
                days = %routine.days,
                "routine created"
            );
        }

        let driver = DriverContext {
            driver_id: routine.owner_id.clone(),
            home_settlement,
        };
        self.attach_driver(
            &driver,
            &routine.destination,
            &Availability::of_routine(&routine),
            MatchSource::Routine {
                routine_id: routine.id,
            },
        )
        .await
    }

    /// Deactivate every routine of a driver. Returns how many changed.
    pub async fn pause_routines(&self, owner_id: &str) -> RideResult<usize> {
        let mut paused = 0;
        for routine in self
            .store
            .find_routines(&RoutineFilter::by_owner(owner_id))
            .await?
        {
            let result = self
                .store
                .update_routine(
                    routine.id,
                    Box::new(|routine| {
                        if !routine.active {
                            return false;
                        }
                        routine.active = false;
                        true
                    }),
                )
                .await?;
            if result.is_applied() {
                paused += 1;
            }
        }
        tracing::info!(owner_id, paused, "routines paused");
        Ok(paused)
    }

    /// Insert a new request, or pick up the stored copy of one an earlier
    /// attempt already inserted.
    async fn store_or_resume(&self, request: RideRequest) -> RideResult<RideRequest> {
        if let Some(existing) = self.store.get_request(request.id).await? {
            tracing::info!(request_id = %existing.id, "resuming ride request");
            return Ok(existing);
        }
        self.store.insert_request(&request).await?;
        tracing::info!(
            request_id = %request.id,
            requester_id = %request.requester_id,
            kind = ?request.kind,
            destination = %request.destination,
            window = %request.window,
            "ride request created"
        );
        Ok(request)
    }

    /// Confirm a hitchhiker request unless an earlier attempt already did.
    /// The candidate count covers entries from earlier attempts.
    async fn confirm_once(&self, request: &RideRequest) -> RideResult<()> {
        let current = self
            .store
            .get_request(request.id)
            .await?
            .ok_or_else(|| RideError::not_found("ride request", request.id))?;
        if current.requester_confirmed_at.is_some() {
            return Ok(());
        }
        self.approvals
            .notifier()
            .confirm_request(&current, current.matched_drivers.len())
            .await
    }

    async fn attach_driver(
        &self,
        driver: &DriverContext,
        destination: &str,
        availability: &Availability,
        source: MatchSource,
    ) -> RideResult<MatchOutcome> {
        let found = self
            .matcher
            .find_hitchhikers(driver, destination, availability)
            .await?;

        let mut outcome = MatchOutcome::default();
        for candidate in found {
            let entry = Candidate {
                driver_id: driver.driver_id.clone(),
                score: candidate.score,
                source,
            };
            let created = self
                .approvals
                .create_matches(candidate.request_id, std::slice::from_ref(&entry))
                .await?;
            outcome.entries_created += created.len();
            // The requester was confirmed when the request was created.
            outcome.auto_approved += self
                .approvals
                .process_pending_auto_approvals(candidate.request_id)
                .await?;
        }
        Ok(outcome)
    }
}
