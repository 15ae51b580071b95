//! Notification coordinator
//!
//! Decides who is told what about requests, matches and outcomes, and keeps
//! repeatable notifications from going out twice. A repeatable notification
//! carries a key that is recorded with an atomic insert-if-absent on the
//! store; when the key already exists the send is suppressed. A key whose
//! send fails is released again, so a retry delivers it. Keys expire with the
//! window of the request they belong to.

use std::sync::Arc;

use chrono::{Duration, NaiveDateTime, Utc};
use ride_core::{
    ContactPreference, DocumentStore, MatchedDriver, OutboundChannel, RequestKind, RideError,
    RideRequest, RideResult, User,
};
use uuid::Uuid;

/// Choice texts the driver sends back for a match prompt.
pub fn approve_command(code: &str) -> String {
    format!("approve {code}")
}

pub fn reject_command(code: &str) -> String {
    format!("reject {code}")
}

pub fn share_command(code: &str) -> String {
    format!("share {code}")
}

pub fn hide_command(code: &str) -> String {
    format!("hide {code}")
}

/// Result of a keyed send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// The key was already recorded.
    Suppressed,
    /// The channel accepted the message without delivering it.
    Undelivered,
}

impl Delivery {
    pub fn is_sent(self) -> bool {
        self == Delivery::Sent
    }
}

/// Whether the requester learns the driver's name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameDisclosure {
    WithName,
    PhoneOnly,
}

#[derive(Clone)]
pub struct Notifier {
    store: Arc<dyn DocumentStore>,
    channel: Arc<dyn OutboundChannel>,
}

impl Notifier {
    pub fn new(store: Arc<dyn DocumentStore>, channel: Arc<dyn OutboundChannel>) -> Self {
        Self { store, channel }
    }

    /// Deliver a message. A transport that accepts but does not deliver is
    /// logged and reported as `false`.
    pub async fn send(
        &self,
        recipient: &str,
        text: &str,
        choices: Option<&[String]>,
    ) -> RideResult<bool> {
        let delivered = self.channel.send(recipient, text, choices).await?;
        if delivered {
            tracing::debug!(recipient, "notification sent");
        } else {
            tracing::warn!(recipient, "channel accepted but did not deliver notification");
        }
        Ok(delivered)
    }

    /// Send once per `key`. The key stays recorded only when the message
    /// went out.
    pub async fn send_once(
        &self,
        key: &str,
        expires_at: NaiveDateTime,
        recipient: &str,
        text: &str,
        choices: Option<&[String]>,
    ) -> RideResult<Delivery> {
        if !self.store.record_notification(key, expires_at).await? {
            tracing::debug!(key, recipient, "duplicate notification suppressed");
            return Ok(Delivery::Suppressed);
        }
        match self.send(recipient, text, choices).await {
            Ok(true) => Ok(Delivery::Sent),
            Ok(false) => {
                self.store.release_notification(key).await?;
                Ok(Delivery::Undelivered)
            }
            Err(err) => {
                if let Err(release_err) = self.store.release_notification(key).await {
                    tracing::warn!(key, error = %release_err, "failed to release notification key");
                }
                Err(err)
            }
        }
    }

    /// Tell the requester their request was saved, then record the
    /// confirmation. Auto-approvals for the request wait for this mark.
    pub async fn confirm_request(&self, request: &RideRequest, candidates: usize) -> RideResult<()> {
        let text = match (request.kind, candidates) {
            (RequestKind::HitchhikerRequest, 0) => format!(
                "Your ride request to {} ({}) was saved. No driver is available yet; we will let you know when one turns up.",
                request.destination, request.window
            ),
            (RequestKind::HitchhikerRequest, n) => format!(
                "Your ride request to {} ({}) was saved. We found {n} possible driver(s) and asked them to confirm.",
                request.destination, request.window
            ),
            (RequestKind::DriverOffer, 0) => format!(
                "Your ride offer to {} ({}) was published. Nobody is looking for this ride yet.",
                request.destination, request.window
            ),
            (RequestKind::DriverOffer, n) => format!(
                "Your ride offer to {} ({}) was published. {n} hitchhiker(s) are looking for this ride.",
                request.destination, request.window
            ),
        };
        self.send(&request.requester_id, &text, None).await?;

        let confirmed = self
            .store
            .update_request(
                request.id,
                Box::new(|r| {
                    if r.requester_confirmed_at.is_some() {
                        return false;
                    }
                    r.requester_confirmed_at = Some(Utc::now());
                    r.touch();
                    true
                }),
            )
            .await?;
        if confirmed.into_current().is_none() {
            return Err(RideError::not_found("ride request", request.id));
        }
        Ok(())
    }

    /// Approve/reject prompt for a driver. Marks the entry as prompted when
    /// the message went out.
    pub async fn prompt_driver(
        &self,
        request: &RideRequest,
        entry: &MatchedDriver,
        requester: &User,
    ) -> RideResult<bool> {
        let key = format!(
            "prompt:{}:{}:{}:{}",
            entry.driver_id,
            request.requester_id,
            request.destination,
            request.window.date()
        );
        let code = entry.short_code();
        let text = format!(
            "{} is looking for a ride to {} ({}). Can you take them? Reply \"{}\" or \"{}\".",
            requester.name(),
            request.destination,
            request.window,
            approve_command(&code),
            reject_command(&code)
        );
        let choices = vec![approve_command(&code), reject_command(&code)];
        let delivered = self
            .send_once(&key, key_expiry(request), &entry.driver_id, &text, Some(&choices))
            .await?
            .is_sent();
        if delivered {
            self.mark_entry(request.id, entry.match_id, |e| {
                e.prompt_sent_at = Some(Utc::now());
            })
            .await?;
        }
        Ok(delivered)
    }

    /// Outcome of a manual approval. With `ask` the driver first decides
    /// whether the requester sees their name.
    pub async fn approval_outcome(
        &self,
        request: &RideRequest,
        entry: &MatchedDriver,
        driver: &User,
        requester: &User,
    ) -> RideResult<()> {
        self.confirm_to_driver(request, driver, requester).await?;
        match driver.contact_preference_or_default() {
            ContactPreference::Always => {
                self.contact_to_requester(request, entry, driver, NameDisclosure::WithName)
                    .await?;
            }
            ContactPreference::Ask => {
                let code = entry.short_code();
                let text = format!(
                    "May we share your name with {}? Reply \"{}\" or \"{}\".",
                    requester.name(),
                    share_command(&code),
                    hide_command(&code)
                );
                let choices = vec![share_command(&code), hide_command(&code)];
                self.send(&driver.id, &text, Some(&choices)).await?;
            }
            ContactPreference::Never => {
                self.contact_to_requester(request, entry, driver, NameDisclosure::PhoneOnly)
                    .await?;
            }
        }
        Ok(())
    }

    /// Both sides of an auto-approved match. Each side is keyed on its own,
    /// so a retry after a partial failure only sends what is still missing.
    pub async fn auto_approved(
        &self,
        request: &RideRequest,
        entry: &MatchedDriver,
        driver: &User,
        requester: &User,
    ) -> RideResult<()> {
        let key = format!("auto:{}", entry.match_id);
        let text = format!(
            "You were automatically matched with {} for a ride to {} ({}). Their number: {}.",
            requester.name(),
            request.destination,
            request.window,
            requester.id
        );
        let to_driver = self
            .send_once(&key, key_expiry(request), &driver.id, &text, None)
            .await?;
        if to_driver == Delivery::Undelivered {
            return Err(RideError::Upstream(format!(
                "auto-approval notice for {} was not delivered",
                entry.match_id
            )));
        }

        let to_requester = self
            .contact_to_requester(request, entry, driver, NameDisclosure::WithName)
            .await?;
        if to_requester == Delivery::Undelivered {
            return Err(RideError::Upstream(format!(
                "contact details for {} were not delivered",
                entry.match_id
            )));
        }
        Ok(())
    }

    /// Contact details for the requester, once per match.
    pub async fn contact_to_requester(
        &self,
        request: &RideRequest,
        entry: &MatchedDriver,
        driver: &User,
        disclosure: NameDisclosure,
    ) -> RideResult<Delivery> {
        let key = format!("contact:{}", entry.match_id);
        let text = match disclosure {
            NameDisclosure::WithName => format!(
                "Good news! {} can take you to {} ({}). Their number: {}.",
                driver.name(),
                request.destination,
                request.window,
                driver.id
            ),
            NameDisclosure::PhoneOnly => format!(
                "Good news! A driver can take you to {} ({}). Their number: {}.",
                request.destination, request.window, driver.id
            ),
        };
        let delivery = self
            .send_once(&key, key_expiry(request), &request.requester_id, &text, None)
            .await?;
        if delivery.is_sent() {
            self.mark_entry(request.id, entry.match_id, |e| {
                e.requester_notified_at = Some(Utc::now());
            })
            .await?;
        }
        Ok(delivery)
    }

    /// A driver who was prompted learns the request is no longer open.
    pub async fn request_taken(&self, request: &RideRequest, entry: &MatchedDriver) -> RideResult<()> {
        if entry.prompt_sent_at.is_none() {
            return Ok(());
        }
        let key = format!("taken:{}:{}", request.id, entry.driver_id);
        let text = format!(
            "Thanks! The ride to {} ({}) was already taken by another driver.",
            request.destination, request.window
        );
        self.send_once(&key, key_expiry(request), &entry.driver_id, &text, None)
            .await?;
        Ok(())
    }

    /// A driver who was prompted learns the hitchhiker found a ride.
    pub async fn request_closed(&self, request: &RideRequest, entry: &MatchedDriver) -> RideResult<()> {
        if entry.prompt_sent_at.is_none() {
            return Ok(());
        }
        let key = format!("found:{}:{}", request.id, entry.driver_id);
        let text = format!(
            "The ride request to {} ({}) is closed; the hitchhiker already found a ride.",
            request.destination, request.window
        );
        self.send_once(&key, key_expiry(request), &entry.driver_id, &text, None)
            .await?;
        Ok(())
    }

    /// Every candidate declined.
    pub async fn no_driver_left(&self, request: &RideRequest) -> RideResult<()> {
        let key = format!("exhausted:{}", request.id);
        let text = format!(
            "The drivers we found for your ride to {} ({}) cannot make it. We will keep looking.",
            request.destination, request.window
        );
        self.send_once(&key, key_expiry(request), &request.requester_id, &text, None)
            .await?;
        Ok(())
    }

    pub async fn request_expired(&self, request: &RideRequest) -> RideResult<()> {
        let key = format!("expired:{}", request.id);
        let text = format!(
            "Your ride request to {} ({}) has expired.",
            request.destination, request.window
        );
        self.send_once(&key, key_expiry(request), &request.requester_id, &text, None)
            .await?;
        Ok(())
    }

    async fn confirm_to_driver(
        &self,
        request: &RideRequest,
        driver: &User,
        requester: &User,
    ) -> RideResult<()> {
        let text = format!(
            "Thanks! You are taking {} to {} ({}). Their number: {}.",
            requester.name(),
            request.destination,
            request.window,
            requester.id
        );
        self.send(&driver.id, &text, None).await?;
        Ok(())
    }

    async fn mark_entry<F>(&self, request_id: Uuid, match_id: Uuid, change: F) -> RideResult<()>
    where
        F: FnOnce(&mut MatchedDriver) + Send + 'static,
    {
        self.store
            .update_request(
                request_id,
                Box::new(move |r| match r.entry_mut(match_id) {
                    Some(entry) => {
                        change(entry);
                        true
                    }
                    None => false,
                }),
            )
            .await?;
        Ok(())
    }
}

/// Keys outlive the request window by a day. That also covers the
/// day-scoped prompt key.
fn key_expiry(request: &RideRequest) -> NaiveDateTime {
    request.window.end + Duration::days(1)
}
