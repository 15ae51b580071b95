//! Approval workflow
//!
//! Moves matched drivers through `pending_approval -> approved | rejected`.
//!
//! All state changes go through the store's conditional update on the parent
//! request, so the single-approval rule is decided inside one atomic
//! mutation: an entry is only approved while no sibling is approved, and the
//! same mutation rejects every still-pending sibling.
//!
//! The auto-approval path is guarded by three flags per entry. Each is claimed
//! with a compare-and-set; a worker that loses a claim walks away, and a
//! worker that fails after claiming releases what it claimed.

use std::sync::Arc;

use chrono::{Duration, NaiveDateTime, Utc};
use ride_core::{
    Conditional, ContactPreference, DocumentStore, GuardFlag, Match, MatchSource, MatchStatus,
    MatchedDriver, RequestFilter, RequestKind, RequestStatus, RideConfig, RideError, RideRequest,
    RideResult, User,
};
use uuid::Uuid;

use crate::matcher::Candidate;
use crate::notifications::{NameDisclosure, Notifier};

#[derive(Clone)]
pub struct ApprovalWorkflow {
    store: Arc<dyn DocumentStore>,
    notifier: Notifier,
    auto_approval_enabled: bool,
    expiry_grace: Duration,
}

impl ApprovalWorkflow {
    pub fn new(store: Arc<dyn DocumentStore>, notifier: Notifier, config: &RideConfig) -> Self {
        Self {
            store,
            notifier,
            auto_approval_enabled: config.auto_approval_enabled,
            expiry_grace: config.expiry_grace(),
        }
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Attach one pending entry per candidate to the request.
    ///
    /// Drivers that already have an entry are skipped, and nothing is added
    /// once the request has an approved driver or is closed. `always` drivers
    /// are only flagged; every other pending driver without a prompt gets an
    /// approve/reject prompt, including entries left from an earlier attempt.
    /// Returns the entries that were added.
    pub async fn create_matches(
        &self,
        request_id: Uuid,
        ranked: &[Candidate],
    ) -> RideResult<Vec<MatchedDriver>> {
        if ranked.is_empty() {
            return Ok(Vec::new());
        }

        let mut prepared = Vec::with_capacity(ranked.len());
        for candidate in ranked {
            let preference = self
                .store
                .get_user(&candidate.driver_id)
                .await?
                .map(|driver| driver.contact_preference_or_default())
                .unwrap_or(ContactPreference::Never);
            let mut entry =
                MatchedDriver::pending(&candidate.driver_id, candidate.score, candidate.source);
            entry.auto_approve =
                self.auto_approval_enabled && preference == ContactPreference::Always;
            prepared.push(entry);
        }

        let proposed: Vec<Uuid> = prepared.iter().map(|e| e.match_id).collect();
        let result = self
            .store
            .update_request(
                request_id,
                Box::new(move |request| {
                    if !request.status.is_open() || request.approved_count() > 0 {
                        return false;
                    }
                    let mut added = false;
                    for entry in prepared {
                        if request.entry_for_driver(&entry.driver_id).is_some() {
                            continue;
                        }
                        request.matched_drivers.push(entry);
                        added = true;
                    }
                    if added {
                        request.status = RequestStatus::Matched;
                        request.touch();
                    }
                    added
                }),
            )
            .await?;

        let (request, added) = match result {
            Conditional::Applied(request) => {
                let added: Vec<MatchedDriver> = request
                    .matched_drivers
                    .iter()
                    .filter(|e| proposed.contains(&e.match_id))
                    .cloned()
                    .collect();
                (request, added)
            }
            Conditional::Unchanged(request) => (request, Vec::new()),
            Conditional::Missing => return Err(RideError::not_found("ride request", request_id)),
        };

        for entry in &added {
            if matches!(entry.source, MatchSource::Routine { .. }) {
                self.store.insert_match(&Match::mirror(&request, entry)).await?;
            }
            tracing::info!(
                request_id = %request.id,
                match_id = %entry.match_id,
                driver_id = %entry.driver_id,
                score = entry.score,
                auto_approve = entry.auto_approve,
                "matched driver entry created"
            );
        }

        if !request.status.is_open() || request.approved_count() > 0 {
            return Ok(added);
        }
        let unprompted: Vec<&MatchedDriver> = request
            .matched_drivers
            .iter()
            .filter(|e| {
                !e.auto_approve
                    && e.status == MatchStatus::PendingApproval
                    && e.prompt_sent_at.is_none()
            })
            .collect();
        if !unprompted.is_empty() {
            let requester = self.load_user(&request.requester_id).await?;
            for entry in unprompted {
                self.notifier.prompt_driver(&request, entry, &requester).await?;
            }
        }

        Ok(added)
    }

    /// Approve an entry for `driver_id`. Returns `false` when the caller is
    /// not the entry's driver, the entry is no longer pending, or another
    /// driver was approved first.
    pub async fn approve(&self, match_id: Uuid, driver_id: &str, is_auto: bool) -> RideResult<bool> {
        let request = self.request_for_match(match_id).await?;
        if !self.owns_entry(&request, match_id, driver_id) {
            return Ok(false);
        }

        let result = self
            .store
            .update_request(
                request.id,
                Box::new(move |request| {
                    if !request.status.is_open() || request.approved_count() > 0 {
                        return false;
                    }
                    match request.entry(match_id) {
                        Some(entry) if entry.status == MatchStatus::PendingApproval => {}
                        _ => return false,
                    }
                    for entry in request.matched_drivers.iter_mut() {
                        if entry.match_id == match_id {
                            entry.set_status(MatchStatus::Approved);
                        } else if entry.status == MatchStatus::PendingApproval {
                            entry.set_status(MatchStatus::Rejected);
                        }
                    }
                    request.status = RequestStatus::Approved;
                    request.touch();
                    true
                }),
            )
            .await?;

        let Some(approved) = result.applied() else {
            tracing::debug!(%match_id, driver_id, "approval not applied");
            return Ok(false);
        };
        tracing::info!(
            request_id = %approved.id,
            %match_id,
            driver_id,
            is_auto,
            "driver approved"
        );

        self.sync_mirrors(&request, &approved).await?;

        let Some(entry) = approved.entry(match_id).cloned() else {
            return Ok(true);
        };
        if !is_auto {
            let driver = self.load_user(driver_id).await?;
            let requester = self.load_user(&approved.requester_id).await?;
            self.notifier
                .approval_outcome(&approved, &entry, &driver, &requester)
                .await?;
        }

        for sibling in &approved.matched_drivers {
            let was_pending = request
                .entry(sibling.match_id)
                .map(|before| before.status == MatchStatus::PendingApproval)
                .unwrap_or(false);
            if sibling.match_id != match_id && was_pending {
                self.notifier.request_taken(&approved, sibling).await?;
            }
        }

        Ok(true)
    }

    /// Reject an entry for `driver_id`. Siblings are untouched; when nobody
    /// is left the requester is told.
    pub async fn reject(&self, match_id: Uuid, driver_id: &str) -> RideResult<bool> {
        let request = self.request_for_match(match_id).await?;
        if !self.owns_entry(&request, match_id, driver_id) {
            return Ok(false);
        }

        let result = self
            .store
            .update_request(
                request.id,
                Box::new(move |request| match request.entry_mut(match_id) {
                    Some(entry) if entry.status == MatchStatus::PendingApproval => {
                        entry.set_status(MatchStatus::Rejected);
                        request.touch();
                        true
                    }
                    _ => false,
                }),
            )
            .await?;

        let Some(updated) = result.applied() else {
            return Ok(false);
        };
        tracing::info!(request_id = %updated.id, %match_id, driver_id, "driver rejected");

        self.sync_mirrors(&request, &updated).await?;

        let anyone_left = updated.matched_drivers.iter().any(|e| {
            matches!(
                e.status,
                MatchStatus::PendingApproval | MatchStatus::Approved
            )
        });
        if !anyone_left && updated.kind == RequestKind::HitchhikerRequest {
            self.notifier.no_driver_left(&updated).await?;
        }
        Ok(true)
    }

    /// The driver's answer to the name-sharing question of an `ask` approval.
    pub async fn respond_name_sharing(
        &self,
        match_id: Uuid,
        driver_id: &str,
        share: bool,
    ) -> RideResult<bool> {
        let request = self.request_for_match(match_id).await?;
        if !self.owns_entry(&request, match_id, driver_id) {
            return Ok(false);
        }

        let result = self
            .store
            .update_request(
                request.id,
                Box::new(move |request| match request.entry_mut(match_id) {
                    Some(entry)
                        if entry.status == MatchStatus::Approved && entry.share_name.is_none() =>
                    {
                        entry.share_name = Some(share);
                        entry.updated_at = Utc::now();
                        true
                    }
                    _ => false,
                }),
            )
            .await?;

        let Some(updated) = result.applied() else {
            return Ok(false);
        };
        let Some(entry) = updated.entry(match_id).cloned() else {
            return Ok(false);
        };

        let driver = self.load_user(driver_id).await?;
        let disclosure = if share {
            NameDisclosure::WithName
        } else {
            NameDisclosure::PhoneOnly
        };
        self.notifier
            .contact_to_requester(&updated, &entry, &driver, disclosure)
            .await?;
        Ok(true)
    }

    /// Run the deferred auto-approval for every eligible entry of a request.
    ///
    /// Does nothing until the requester's confirmation went out. Returns the
    /// number of entries this call notified.
    pub async fn process_pending_auto_approvals(&self, request_id: Uuid) -> RideResult<usize> {
        let request = self
            .store
            .get_request(request_id)
            .await?
            .ok_or_else(|| RideError::not_found("ride request", request_id))?;

        if request.requester_confirmed_at.is_none() {
            tracing::debug!(%request_id, "requester not confirmed yet, auto-approval deferred");
            return Ok(0);
        }

        let eligible: Vec<MatchedDriver> = request
            .matched_drivers
            .iter()
            .filter(|e| {
                e.auto_approve
                    && !e.auto_approval_notification_sent
                    && !e.auto_approval_processing
                    && matches!(
                        e.status,
                        MatchStatus::PendingApproval | MatchStatus::Approved
                    )
            })
            .cloned()
            .collect();

        let mut notified = 0;
        for entry in eligible {
            match self.claim(request_id, entry.match_id, GuardFlag::Processing).await {
                Ok(()) => {}
                Err(RideError::ConcurrencyConflict(reason)) => {
                    tracing::debug!(%request_id, %reason, "auto-approval skipped");
                    continue;
                }
                Err(err) => return Err(err),
            }

            let mut held = vec![GuardFlag::Processing];
            match self.auto_approve_entry(request_id, &entry, &mut held).await {
                Ok(true) => notified += 1,
                Ok(false) => {
                    self.release(request_id, entry.match_id, &held).await?;
                }
                Err(err) => {
                    tracing::warn!(
                        %request_id,
                        match_id = %entry.match_id,
                        error = %err,
                        "auto-approval failed, releasing guards"
                    );
                    if let Err(release_err) = self.release(request_id, entry.match_id, &held).await
                    {
                        tracing::error!(
                            %request_id,
                            match_id = %entry.match_id,
                            error = %release_err,
                            "failed to release auto-approval guards"
                        );
                    }
                    return Err(err);
                }
            }
        }

        Ok(notified)
    }

    /// Approve (unless already approved), claim the messaging right, notify
    /// both sides and seal the entry. `held` tracks the claimed flags.
    async fn auto_approve_entry(
        &self,
        request_id: Uuid,
        entry: &MatchedDriver,
        held: &mut Vec<GuardFlag>,
    ) -> RideResult<bool> {
        let match_id = entry.match_id;

        if entry.status == MatchStatus::PendingApproval
            && !self.approve(match_id, &entry.driver_id, true).await?
        {
            // Approved by a racing worker, or a sibling won.
            let current = self.store.get_request(request_id).await?;
            let approved_here = current
                .as_ref()
                .and_then(|r| r.entry(match_id))
                .map(|e| e.status == MatchStatus::Approved)
                .unwrap_or(false);
            if !approved_here {
                tracing::debug!(%request_id, %match_id, "auto-approval lost to another driver");
                return Ok(false);
            }
        }

        match self
            .claim(request_id, match_id, GuardFlag::NotificationSending)
            .await
        {
            Ok(()) => held.push(GuardFlag::NotificationSending),
            Err(RideError::ConcurrencyConflict(reason)) => {
                tracing::debug!(%request_id, %reason, "auto-approval notification skipped");
                return Ok(false);
            }
            Err(err) => return Err(err),
        }

        let request = self
            .store
            .get_request(request_id)
            .await?
            .ok_or_else(|| RideError::not_found("ride request", request_id))?;
        let current = request
            .entry(match_id)
            .cloned()
            .ok_or_else(|| RideError::not_found("matched driver", match_id))?;
        let driver = self.load_user(&current.driver_id).await?;
        let requester = self.load_user(&request.requester_id).await?;

        self.notifier
            .auto_approved(&request, &current, &driver, &requester)
            .await?;

        let sealed = self
            .store
            .update_request(
                request_id,
                Box::new(move |request| match request.entry_mut(match_id) {
                    Some(entry) if !entry.auto_approval_notification_sent => {
                        entry.set_flag(GuardFlag::NotificationSent, true);
                        entry.set_flag(GuardFlag::NotificationSending, false);
                        entry.set_flag(GuardFlag::Processing, false);
                        true
                    }
                    _ => false,
                }),
            )
            .await?;
        if sealed.is_applied() {
            held.clear();
        }

        tracing::info!(
            %request_id,
            %match_id,
            driver_id = %current.driver_id,
            "auto-approval notified"
        );
        Ok(true)
    }

    /// Compare-and-set one guard flag. The processing claim additionally
    /// requires the entry not to be sealed or mid-send; the sending claim
    /// requires processing to be held. A lost claim is a
    /// `ConcurrencyConflict`.
    async fn claim(&self, request_id: Uuid, match_id: Uuid, flag: GuardFlag) -> RideResult<()> {
        let result = self
            .store
            .update_request(
                request_id,
                Box::new(move |request| {
                    let Some(entry) = request.entry_mut(match_id) else {
                        return false;
                    };
                    if entry.flag(flag) || entry.auto_approval_notification_sent {
                        return false;
                    }
                    let allowed = match flag {
                        GuardFlag::Processing => {
                            entry.auto_approve && !entry.auto_approval_notification_sending
                        }
                        GuardFlag::NotificationSending => entry.auto_approval_processing,
                        GuardFlag::NotificationSent => true,
                    };
                    if allowed {
                        entry.set_flag(flag, true);
                    }
                    allowed
                }),
            )
            .await?;

        match result {
            Conditional::Applied(_) => Ok(()),
            Conditional::Unchanged(_) => Err(RideError::ConcurrencyConflict(format!(
                "{} already held on {match_id}",
                flag.as_str()
            ))),
            Conditional::Missing => Err(RideError::not_found("ride request", request_id)),
        }
    }

    async fn release(&self, request_id: Uuid, match_id: Uuid, held: &[GuardFlag]) -> RideResult<()> {
        if held.is_empty() {
            return Ok(());
        }
        let flags = held.to_vec();
        self.store
            .update_request(
                request_id,
                Box::new(move |request| match request.entry_mut(match_id) {
                    Some(entry) => {
                        for flag in flags {
                            entry.set_flag(flag, false);
                        }
                        true
                    }
                    None => false,
                }),
            )
            .await?;
        Ok(())
    }

    /// Close every open request of a hitchhiker who found a ride. Drivers who
    /// were already prompted are told. Returns the number of closed requests.
    pub async fn mark_found(&self, requester_id: &str) -> RideResult<usize> {
        let open = self
            .store
            .find_requests(
                &RequestFilter::by_requester(requester_id).with_statuses(&[
                    RequestStatus::Pending,
                    RequestStatus::Matched,
                    RequestStatus::Approved,
                ]),
            )
            .await?;

        let mut closed = 0;
        for request in open {
            if request.kind != RequestKind::HitchhikerRequest {
                continue;
            }
            let result = self
                .store
                .update_request(
                    request.id,
                    Box::new(|request| {
                        if !matches!(
                            request.status,
                            RequestStatus::Pending | RequestStatus::Matched | RequestStatus::Approved
                        ) {
                            return false;
                        }
                        for entry in request.matched_drivers.iter_mut() {
                            if entry.status == MatchStatus::PendingApproval {
                                entry.set_status(MatchStatus::Found);
                            }
                        }
                        request.status = RequestStatus::Found;
                        request.touch();
                        true
                    }),
                )
                .await?;
            let Some(updated) = result.applied() else {
                continue;
            };
            closed += 1;
            self.sync_mirrors(&request, &updated).await?;

            for entry in &updated.matched_drivers {
                if entry.status == MatchStatus::Found {
                    self.notifier.request_closed(&updated, entry).await?;
                }
            }
        }

        tracing::info!(requester_id, closed, "requests marked as found");
        Ok(closed)
    }

    /// Expire open requests whose window ended more than the grace period
    /// before `now`. Pending entries are rejected. Returns the number expired.
    pub async fn expire_stale_requests(&self, now: NaiveDateTime) -> RideResult<usize> {
        let cutoff = now - self.expiry_grace;
        let open = self
            .store
            .find_requests(
                &RequestFilter::default()
                    .with_statuses(&[RequestStatus::Pending, RequestStatus::Matched]),
            )
            .await?;

        let mut expired = 0;
        for request in open {
            if !request.window.has_ended_before(cutoff) {
                continue;
            }
            let result = self
                .store
                .update_request(
                    request.id,
                    Box::new(|request| {
                        if !request.status.is_open() {
                            return false;
                        }
                        for entry in request.matched_drivers.iter_mut() {
                            if entry.status == MatchStatus::PendingApproval {
                                entry.set_status(MatchStatus::Rejected);
                            }
                        }
                        request.status = RequestStatus::Expired;
                        request.touch();
                        true
                    }),
                )
                .await?;
            let Some(updated) = result.applied() else {
                continue;
            };
            expired += 1;
            self.sync_mirrors(&request, &updated).await?;
            self.notifier.request_expired(&updated).await?;
        }

        if expired > 0 {
            tracing::info!(expired, "stale requests expired");
        }
        let purged = self.store.purge_notifications(cutoff).await?;
        if purged > 0 {
            tracing::debug!(purged, "expired notification keys purged");
        }
        Ok(expired)
    }

    /// Copy entry status changes onto the standalone match records.
    async fn sync_mirrors(&self, before: &RideRequest, after: &RideRequest) -> RideResult<()> {
        for entry in &after.matched_drivers {
            let changed = before
                .entry(entry.match_id)
                .map(|old| old.status != entry.status)
                .unwrap_or(true);
            if !changed || !matches!(entry.source, MatchSource::Routine { .. }) {
                continue;
            }
            let status = entry.status;
            self.store
                .update_match(
                    entry.match_id,
                    Box::new(move |record| {
                        if record.status == status {
                            return false;
                        }
                        record.status = status;
                        record.updated_at = Utc::now();
                        true
                    }),
                )
                .await?;
        }
        Ok(())
    }

    async fn request_for_match(&self, match_id: Uuid) -> RideResult<RideRequest> {
        self.store
            .find_requests(&RequestFilter::by_match(match_id))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RideError::not_found("match", match_id))
    }

    fn owns_entry(&self, request: &RideRequest, match_id: Uuid, driver_id: &str) -> bool {
        let owns = request
            .entry(match_id)
            .map(|entry| entry.driver_id == driver_id)
            .unwrap_or(false);
        if !owns {
            tracing::warn!(%match_id, driver_id, "caller does not own the matched driver entry");
        }
        owns
    }

    async fn load_user(&self, id: &str) -> RideResult<User> {
        Ok(self
            .store
            .get_user(id)
            .await?
            .unwrap_or_else(|| User::new(id, "initial")))
    }
}
