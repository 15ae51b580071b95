use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use ride_core::testing::RecordingChannel;
use ride_core::{
    ChannelError, ContactPreference, DailyWindow, DaySet, DocumentStore, MatchFilter, MatchSource,
    MatchStatus, MatchedDriver, OutboundChannel, RequestFilter, RequestKind, RequestStatus,
    RideConfig, RideRequest, Role, Routine, TimeWindow, TimingClass, User,
};
use ride_matching::{approve_command, share_command, Candidate, RideService};
use ride_storage::MemoryStore;
use uuid::Uuid;

// 2026-03-03 is a Tuesday.
fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 3, day)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

fn time(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

struct Fixture {
    store: Arc<MemoryStore>,
    channel: Arc<RecordingChannel>,
    service: RideService,
}

fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let channel = Arc::new(RecordingChannel::new());
    let service = RideService::new(store.clone(), channel.clone(), &RideConfig::default());
    Fixture {
        store,
        channel,
        service,
    }
}

async fn driver(store: &MemoryStore, id: &str, preference: ContactPreference) {
    let mut user = User::new(id, "main_menu");
    user.full_name = Some(format!("Driver {id}"));
    user.role = Role::Driver;
    user.home_settlement = Some("קצרין".to_string());
    user.contact_preference = Some(preference);
    user.registered = true;
    store.put_user(&user).await.unwrap();
}

async fn hitchhiker(store: &MemoryStore, id: &str) {
    let mut user = User::new(id, "main_menu");
    user.full_name = Some(format!("Rider {id}"));
    user.role = Role::Hitchhiker;
    user.registered = true;
    store.put_user(&user).await.unwrap();
}

fn commute(owner: &str) -> Routine {
    Routine::new(
        owner,
        "חיפה",
        DaySet::MON | DaySet::WED,
        DailyWindow::new(time(7, 0), time(7, 30)),
        None,
    )
}

fn request_now(requester: &str) -> RideRequest {
    RideRequest::new(
        requester,
        RequestKind::HitchhikerRequest,
        None,
        "חיפה",
        TimeWindow::starting_at(at(3, 10, 0), Duration::minutes(15)),
        TimingClass::Now,
    )
}

/// Records like [`RecordingChannel`] but fails messages to one recipient
/// containing `needle` until disarmed.
struct FlakyChannel {
    inner: RecordingChannel,
    recipient: &'static str,
    needle: &'static str,
    armed: AtomicBool,
}

impl FlakyChannel {
    fn failing_for(recipient: &'static str, needle: &'static str) -> Self {
        Self {
            inner: RecordingChannel::new(),
            recipient,
            needle,
            armed: AtomicBool::new(true),
        }
    }

    fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl OutboundChannel for FlakyChannel {
    async fn send(
        &self,
        recipient: &str,
        text: &str,
        choices: Option<&[String]>,
    ) -> Result<bool, ChannelError> {
        if self.armed.load(Ordering::SeqCst)
            && recipient == self.recipient
            && text.contains(self.needle)
        {
            return Err(ChannelError::Unavailable("flaky channel".into()));
        }
        self.inner.send(recipient, text, choices).await
    }
}

#[tokio::test]
async fn test_always_driver_auto_approved_after_confirmation() {
    let fx = fixture();
    driver(&fx.store, "A", ContactPreference::Always).await;
    hitchhiker(&fx.store, "B").await;
    fx.store.insert_routine(&commute("A")).await.unwrap();

    let request = request_now("B");
    let ranked = fx.service.matcher().find_drivers(&request).await.unwrap();
    assert_eq!(ranked.len(), 1);
    assert_eq!(ranked[0].driver_id, "A");
    assert!(ranked[0].score >= 3.0);

    let outcome = fx.service.submit_request(request.clone()).await.unwrap();
    assert_eq!(outcome.entries_created, 1);
    assert_eq!(outcome.auto_approved, 1);

    let to_a = fx.channel.messages_to("A");
    assert_eq!(to_a.len(), 1);
    assert!(to_a[0].text.contains("automatically matched"));

    // B's confirmation precedes the contact details.
    let to_b = fx.channel.messages_to("B");
    assert!(to_b[0].text.contains("was saved"));
    assert!(to_b[1].text.contains("Driver A"));

    let stored = fx.store.get_request(request.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::Approved);
    let entry = &stored.matched_drivers[0];
    assert_eq!(entry.status, MatchStatus::Approved);
    assert!(entry.auto_approval_notification_sent);
    assert!(!entry.auto_approval_processing);
    assert!(!entry.auto_approval_notification_sending);

    // Routine-sourced entries are mirrored.
    let mirrors = fx.store.find_matches(&MatchFilter::default()).await.unwrap();
    assert_eq!(mirrors.len(), 1);
    assert_eq!(mirrors[0].status, MatchStatus::Approved);

    // Running again is a no-op.
    let again = fx
        .service
        .approvals()
        .process_pending_auto_approvals(request.id)
        .await
        .unwrap();
    assert_eq!(again, 0);
    assert_eq!(fx.channel.messages_to("A").len(), 1);
}

#[tokio::test]
async fn test_auto_approval_waits_for_confirmation() {
    let fx = fixture();
    driver(&fx.store, "A", ContactPreference::Always).await;
    fx.store.insert_routine(&commute("A")).await.unwrap();

    let request = request_now("B");
    fx.store.insert_request(&request).await.unwrap();
    let ranked = fx.service.matcher().find_drivers(&request).await.unwrap();
    fx.service
        .approvals()
        .create_matches(request.id, &ranked)
        .await
        .unwrap();

    let processed = fx
        .service
        .approvals()
        .process_pending_auto_approvals(request.id)
        .await
        .unwrap();
    assert_eq!(processed, 0);
    assert!(fx.channel.messages_to("A").is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_auto_approval_notifies_once() {
    let fx = fixture();
    for id in ["A1", "A2", "A3"] {
        driver(&fx.store, id, ContactPreference::Always).await;
    }
    hitchhiker(&fx.store, "B").await;

    let request = request_now("B");
    fx.store.insert_request(&request).await.unwrap();
    let ranked: Vec<Candidate> = ["A1", "A2", "A3"]
        .iter()
        .map(|id| Candidate {
            driver_id: id.to_string(),
            score: 3.0,
            source: MatchSource::Offer {
                request_id: Uuid::new_v4(),
            },
        })
        .collect();
    fx.service
        .approvals()
        .create_matches(request.id, &ranked)
        .await
        .unwrap();
    fx.service
        .approvals()
        .notifier()
        .confirm_request(&request, ranked.len())
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let approvals = fx.service.approvals().clone();
        let id = request.id;
        handles.push(tokio::spawn(async move {
            approvals.process_pending_auto_approvals(id).await.unwrap()
        }));
    }
    let mut total = 0;
    for handle in handles {
        total += handle.await.unwrap();
    }

    assert_eq!(total, 1);
    let notified: usize = ["A1", "A2", "A3"]
        .iter()
        .map(|id| fx.channel.count_containing(id, "automatically matched"))
        .sum();
    assert_eq!(notified, 1);

    let stored = fx.store.get_request(request.id).await.unwrap().unwrap();
    assert_eq!(stored.approved_count(), 1);
    assert!(!stored.has_pending_entries());
    assert!(stored
        .matched_drivers
        .iter()
        .all(|e| !e.auto_approval_processing && !e.auto_approval_notification_sending));
}

#[tokio::test]
async fn test_manual_approval_rejects_siblings_and_tells_them() {
    let fx = fixture();
    driver(&fx.store, "A1", ContactPreference::Never).await;
    driver(&fx.store, "A2", ContactPreference::Never).await;
    hitchhiker(&fx.store, "B").await;
    for owner in ["A1", "A2"] {
        fx.store.insert_routine(&commute(owner)).await.unwrap();
    }

    let request = request_now("B");
    let outcome = fx.service.submit_request(request.clone()).await.unwrap();
    assert_eq!(outcome.entries_created, 2);
    assert_eq!(outcome.auto_approved, 0);

    let stored = fx.store.get_request(request.id).await.unwrap().unwrap();
    let first = stored.entry_for_driver("A1").unwrap().clone();
    let second = stored.entry_for_driver("A2").unwrap().clone();
    assert!(fx.channel.messages_to("A1")[0]
        .choices
        .as_ref()
        .unwrap()
        .contains(&approve_command(&first.short_code())));

    // Wrong caller.
    assert!(!fx
        .service
        .approvals()
        .approve(first.match_id, "A2", false)
        .await
        .unwrap());

    assert!(fx
        .service
        .approvals()
        .approve(first.match_id, "A1", false)
        .await
        .unwrap());
    assert!(!fx
        .service
        .approvals()
        .approve(second.match_id, "A2", false)
        .await
        .unwrap());

    let stored = fx.store.get_request(request.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::Approved);
    assert_eq!(
        stored.entry(second.match_id).unwrap().status,
        MatchStatus::Rejected
    );
    assert_eq!(fx.channel.count_containing("A2", "already taken"), 1);

    // `never`: the requester gets the number without the name.
    let contact = fx.channel.messages_to("B").pop().unwrap();
    assert!(contact.text.contains("A1"));
    assert!(!contact.text.contains("Driver A1"));
}

#[tokio::test]
async fn test_ask_driver_decides_name_sharing() {
    let fx = fixture();
    driver(&fx.store, "A", ContactPreference::Ask).await;
    hitchhiker(&fx.store, "B").await;
    fx.store.insert_routine(&commute("A")).await.unwrap();

    let request = request_now("B");
    fx.service.submit_request(request.clone()).await.unwrap();
    let entry = fx
        .store
        .get_request(request.id)
        .await
        .unwrap()
        .unwrap()
        .matched_drivers[0]
        .clone();

    fx.service
        .approvals()
        .approve(entry.match_id, "A", false)
        .await
        .unwrap();
    let prompt = fx.channel.messages_to("A").pop().unwrap();
    assert_eq!(
        prompt.choices.as_ref().unwrap()[0],
        share_command(&entry.short_code())
    );
    let before = fx.channel.messages_to("B").len();

    assert!(fx
        .service
        .approvals()
        .respond_name_sharing(entry.match_id, "A", true)
        .await
        .unwrap());
    assert!(!fx
        .service
        .approvals()
        .respond_name_sharing(entry.match_id, "A", false)
        .await
        .unwrap());

    let to_b = fx.channel.messages_to("B");
    assert_eq!(to_b.len(), before + 1);
    assert!(to_b[before].text.contains("Driver A"));
}

#[tokio::test]
async fn test_reject_last_driver_tells_requester() {
    let fx = fixture();
    driver(&fx.store, "A", ContactPreference::Never).await;
    hitchhiker(&fx.store, "B").await;
    fx.store.insert_routine(&commute("A")).await.unwrap();

    let request = request_now("B");
    fx.service.submit_request(request.clone()).await.unwrap();
    let entry = fx
        .store
        .get_request(request.id)
        .await
        .unwrap()
        .unwrap()
        .matched_drivers[0]
        .clone();

    assert!(fx
        .service
        .approvals()
        .reject(entry.match_id, "A")
        .await
        .unwrap());
    assert!(!fx
        .service
        .approvals()
        .reject(entry.match_id, "A")
        .await
        .unwrap());
    assert_eq!(fx.channel.count_containing("B", "cannot make it"), 1);
}

#[tokio::test]
async fn test_create_matches_is_idempotent() {
    let fx = fixture();
    driver(&fx.store, "A", ContactPreference::Never).await;
    fx.store.insert_routine(&commute("A")).await.unwrap();

    let request = request_now("B");
    fx.store.insert_request(&request).await.unwrap();
    let ranked = fx.service.matcher().find_drivers(&request).await.unwrap();

    let first = fx
        .service
        .approvals()
        .create_matches(request.id, &ranked)
        .await
        .unwrap();
    let second = fx
        .service
        .approvals()
        .create_matches(request.id, &ranked)
        .await
        .unwrap();
    assert_eq!(first.len(), 1);
    assert!(second.is_empty());

    let stored = fx.store.get_request(request.id).await.unwrap().unwrap();
    assert_eq!(stored.matched_drivers.len(), 1);
    assert_eq!(stored.status, RequestStatus::Matched);
}

#[tokio::test]
async fn test_routine_scan_attaches_open_requests() {
    let fx = fixture();
    driver(&fx.store, "A", ContactPreference::Always).await;
    hitchhiker(&fx.store, "B").await;

    // Wednesday morning request with nobody around yet.
    let request = RideRequest::new(
        "B",
        RequestKind::HitchhikerRequest,
        None,
        "חיפה",
        TimeWindow::new(at(4, 7, 0), at(4, 8, 0)),
        TimingClass::Specific,
    );
    let outcome = fx.service.submit_request(request.clone()).await.unwrap();
    assert_eq!(outcome.entries_created, 0);

    let outcome = fx
        .service
        .register_routine(commute("A"), Some("קצרין".to_string()))
        .await
        .unwrap();
    assert_eq!(outcome.entries_created, 1);
    assert_eq!(outcome.auto_approved, 1);

    let stored = fx.store.get_request(request.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::Approved);
    assert_eq!(fx.channel.count_containing("A", "automatically matched"), 1);
}

#[tokio::test]
async fn test_driver_offer_prompts_driver() {
    let fx = fixture();
    driver(&fx.store, "A", ContactPreference::Ask).await;
    hitchhiker(&fx.store, "B").await;

    let request = request_now("B");
    fx.service.submit_request(request.clone()).await.unwrap();

    let offer = RideRequest::new(
        "A",
        RequestKind::DriverOffer,
        None,
        "חיפה",
        TimeWindow::starting_at(at(3, 10, 5), Duration::minutes(15)),
        TimingClass::Now,
    );
    let outcome = fx.service.publish_offer(offer.clone(), None).await.unwrap();
    assert_eq!(outcome.entries_created, 1);

    let to_a = fx.channel.messages_to("A");
    assert!(to_a.iter().any(|m| m.text.contains("is looking for a ride")));
    assert!(to_a.iter().any(|m| m.text.contains("was published")));

    let stored_offer = fx.store.get_request(offer.id).await.unwrap().unwrap();
    assert_eq!(stored_offer.status, RequestStatus::Matched);
}

#[tokio::test]
async fn test_mark_found_closes_and_tells_prompted_drivers() {
    let fx = fixture();
    driver(&fx.store, "A", ContactPreference::Never).await;
    hitchhiker(&fx.store, "B").await;
    fx.store.insert_routine(&commute("A")).await.unwrap();

    let request = request_now("B");
    fx.service.submit_request(request.clone()).await.unwrap();

    let closed = fx.service.approvals().mark_found("B").await.unwrap();
    assert_eq!(closed, 1);
    let stored = fx.store.get_request(request.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::Found);
    assert_eq!(stored.matched_drivers[0].status, MatchStatus::Found);
    assert_eq!(fx.channel.count_containing("A", "is closed"), 1);

    // Nothing left to close.
    assert_eq!(fx.service.approvals().mark_found("B").await.unwrap(), 0);
}

#[tokio::test]
async fn test_expire_stale_requests() {
    let fx = fixture();
    driver(&fx.store, "A", ContactPreference::Never).await;
    fx.store.insert_routine(&commute("A")).await.unwrap();

    let request = request_now("B");
    fx.service.submit_request(request.clone()).await.unwrap();
    let fresh = RideRequest::new(
        "C",
        RequestKind::HitchhikerRequest,
        None,
        "עכו",
        TimeWindow::new(at(3, 12, 0), at(3, 13, 0)),
        TimingClass::Specific,
    );
    fx.store.insert_request(&fresh).await.unwrap();

    // 10:15 + 60 minutes of grace has passed, 13:00 has not.
    let expired = fx
        .service
        .approvals()
        .expire_stale_requests(at(3, 11, 30))
        .await
        .unwrap();
    assert_eq!(expired, 1);

    let stored = fx.store.get_request(request.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::Expired);
    assert_eq!(stored.matched_drivers[0].status, MatchStatus::Rejected);
    let untouched = fx.store.get_request(fresh.id).await.unwrap().unwrap();
    assert_eq!(untouched.status, RequestStatus::Pending);
    assert_eq!(fx.channel.count_containing("B", "has expired"), 1);
}

#[tokio::test]
async fn test_store_outage_is_upstream() {
    let fx = fixture();
    fx.store.set_unavailable(true);
    let err = fx
        .service
        .submit_request(request_now("B"))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_unknown_match_is_not_found() {
    let fx = fixture();
    let err = fx
        .service
        .approvals()
        .approve(Uuid::new_v4(), "A", false)
        .await
        .unwrap_err();
    assert!(matches!(err, ride_core::RideError::NotFound { .. }));
}

#[tokio::test]
async fn test_entries_track_prompt_time() {
    let fx = fixture();
    driver(&fx.store, "A", ContactPreference::Never).await;
    fx.store.insert_routine(&commute("A")).await.unwrap();
    let request = request_now("B");
    fx.service.submit_request(request.clone()).await.unwrap();

    let stored = fx.store.get_request(request.id).await.unwrap().unwrap();
    let entry: &MatchedDriver = &stored.matched_drivers[0];
    assert!(entry.prompt_sent_at.is_some());
    assert!(!entry.auto_approve);
}

#[tokio::test]
async fn test_auto_approval_retry_sends_each_side_once() {
    let store = Arc::new(MemoryStore::new());
    let channel = Arc::new(FlakyChannel::failing_for("B", "Good news"));
    let service = RideService::new(store.clone(), channel.clone(), &RideConfig::default());
    driver(&store, "A", ContactPreference::Always).await;
    hitchhiker(&store, "B").await;
    store.insert_routine(&commute("A")).await.unwrap();

    let request = request_now("B");
    let err = service.submit_request(request.clone()).await.unwrap_err();
    assert!(err.is_retryable());

    let stored = store.get_request(request.id).await.unwrap().unwrap();
    let entry = &stored.matched_drivers[0];
    assert_eq!(entry.status, MatchStatus::Approved);
    assert!(!entry.auto_approval_notification_sent);
    assert!(!entry.auto_approval_processing);
    assert!(!entry.auto_approval_notification_sending);

    channel.disarm();
    let notified = service
        .approvals()
        .process_pending_auto_approvals(request.id)
        .await
        .unwrap();
    assert_eq!(notified, 1);

    assert_eq!(channel.inner.count_containing("A", "automatically matched"), 1);
    assert_eq!(channel.inner.count_containing("B", "Good news!"), 1);
    let stored = store.get_request(request.id).await.unwrap().unwrap();
    let entry = &stored.matched_drivers[0];
    assert!(entry.auto_approval_notification_sent);
    assert!(entry.requester_notified_at.is_some());

    let again = service
        .approvals()
        .process_pending_auto_approvals(request.id)
        .await
        .unwrap();
    assert_eq!(again, 0);
    assert_eq!(channel.inner.messages_to("A").len(), 1);
}

#[tokio::test]
async fn test_resubmitted_request_prompts_driver_after_channel_recovers() {
    let fx = fixture();
    driver(&fx.store, "A", ContactPreference::Never).await;
    hitchhiker(&fx.store, "B").await;
    fx.store.insert_routine(&commute("A")).await.unwrap();

    let request = request_now("B");
    fx.channel.set_failing(true);
    let err = fx.service.submit_request(request.clone()).await.unwrap_err();
    assert!(err.is_retryable());

    fx.channel.set_failing(false);
    let outcome = fx.service.submit_request(request.clone()).await.unwrap();
    assert_eq!(outcome.entries_created, 0);

    assert_eq!(fx.channel.count_containing("A", "is looking for a ride"), 1);
    assert_eq!(fx.channel.count_containing("B", "1 possible driver"), 1);

    let requests = fx
        .store
        .find_requests(&RequestFilter::by_requester("B"))
        .await
        .unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].matched_drivers.len(), 1);
    assert!(requests[0].matched_drivers[0].prompt_sent_at.is_some());
    assert!(requests[0].requester_confirmed_at.is_some());

    // A third run changes nothing.
    fx.service.submit_request(request).await.unwrap();
    assert_eq!(fx.channel.messages_to("A").len(), 1);
    assert_eq!(fx.channel.messages_to("B").len(), 1);
}

#[tokio::test]
async fn test_expiry_sweep_purges_old_notification_keys() {
    let fx = fixture();
    let request = request_now("B");
    fx.service.submit_request(request.clone()).await.unwrap();
    fx.service
        .approvals()
        .expire_stale_requests(at(3, 11, 30))
        .await
        .unwrap();
    assert_eq!(fx.channel.count_containing("B", "has expired"), 1);

    let key = format!("expired:{}", request.id);
    let expires = at(5, 0, 0);
    assert!(!fx.store.record_notification(&key, expires).await.unwrap());

    // Two days later the key has outlived the request window.
    fx.service
        .approvals()
        .expire_stale_requests(at(5, 12, 0))
        .await
        .unwrap();
    assert!(fx.store.record_notification(&key, expires).await.unwrap());
}
