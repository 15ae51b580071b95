use async_trait::async_trait;
use chrono::NaiveDateTime;
use ride_core::{RequestKind, RideError, RideRequest, RideResult, TimeNormalizer, User};
use ride_matching::RideService;

use super::{pending_id, required_str, resolve_time, Action};

const PENDING_REQUEST_KEY: &str = "_pending_request_id";
const PENDING_OFFER_KEY: &str = "_pending_offer_id";

/// `create_ride_request`: store the collected hitchhiker request and match it.
pub struct CreateRideRequest {
    service: RideService,
    normalizer: TimeNormalizer,
}

impl CreateRideRequest {
    pub fn new(service: RideService, normalizer: TimeNormalizer) -> Self {
        Self {
            service,
            normalizer,
        }
    }
}

#[async_trait]
impl Action for CreateRideRequest {
    fn name(&self) -> &'static str {
        "create_ride_request"
    }

    async fn execute(&self, user: &mut User, now: NaiveDateTime) -> RideResult<Option<String>> {
        let destination = required_str(user, "ride_destination")?;
        let id = pending_id(&**self.service.store(), user, PENDING_REQUEST_KEY).await?;
        let time = resolve_time(user, "ride_time", "ride_timing", &self.normalizer, now);
        let origin = user
            .take_context("ride_origin")
            .and_then(|value| value.as_str().map(str::to_string))
            .or_else(|| user.home_settlement.clone());

        let mut request = RideRequest::new(
            user.id.clone(),
            RequestKind::HitchhikerRequest,
            origin,
            destination,
            time.window,
            time.class,
        );
        request.id = id;
        let outcome = self.service.submit_request(request).await?;
        user.take_context("ride_destination");
        user.take_context(PENDING_REQUEST_KEY);
        tracing::debug!(
            user_id = %user.id,
            entries = outcome.entries_created,
            auto_approved = outcome.auto_approved,
            "ride request submitted"
        );
        // The requester hears about the result through the outbound channel.
        Ok(None)
    }
}

/// `create_ride_offer`: publish a one-off driver offer.
pub struct CreateRideOffer {
    service: RideService,
    normalizer: TimeNormalizer,
}

impl CreateRideOffer {
    pub fn new(service: RideService, normalizer: TimeNormalizer) -> Self {
        Self {
            service,
            normalizer,
        }
    }
}

#[async_trait]
impl Action for CreateRideOffer {
    fn name(&self) -> &'static str {
        "create_ride_offer"
    }

    async fn execute(&self, user: &mut User, now: NaiveDateTime) -> RideResult<Option<String>> {
        if !user.role.is_driver() {
            return Err(RideError::Validation(
                "Only drivers can offer rides.".to_string(),
            ));
        }
        let destination = required_str(user, "offer_destination")?;
        let id = pending_id(&**self.service.store(), user, PENDING_OFFER_KEY).await?;
        let time = resolve_time(user, "offer_time", "offer_timing", &self.normalizer, now);

        let mut offer = RideRequest::new(
            user.id.clone(),
            RequestKind::DriverOffer,
            user.home_settlement.clone(),
            destination,
            time.window,
            time.class,
        );
        offer.id = id;
        let outcome = self
            .service
            .publish_offer(offer, user.home_settlement.clone())
            .await?;
        user.take_context("offer_destination");
        user.take_context(PENDING_OFFER_KEY);
        tracing::debug!(
            user_id = %user.id,
            entries = outcome.entries_created,
            "ride offer published"
        );
        Ok(None)
    }
}
