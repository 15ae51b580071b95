//! Random approve/reject interleavings never leave more than one approved
//! driver on a request.

use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use proptest::prelude::*;
use ride_core::testing::RecordingChannel;
use ride_core::{
    ContactPreference, DocumentStore, MatchSource, MatchStatus, RequestKind, RideConfig,
    RideRequest, TimeWindow, TimingClass, User,
};
use ride_matching::{Candidate, RideService};
use ride_storage::MemoryStore;
use uuid::Uuid;

const DRIVERS: usize = 4;

#[derive(Debug, Clone)]
enum Op {
    Approve { entry: usize, as_owner: bool },
    Reject { entry: usize, as_owner: bool },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..DRIVERS, any::<bool>()).prop_map(|(entry, as_owner)| Op::Approve { entry, as_owner }),
        (0..DRIVERS, any::<bool>()).prop_map(|(entry, as_owner)| Op::Reject { entry, as_owner }),
    ]
}

async fn run(ops: Vec<Op>) -> RideRequest {
    let store = Arc::new(MemoryStore::new());
    let channel = Arc::new(RecordingChannel::new());
    let service = RideService::new(store.clone(), channel, &RideConfig::default());

    let drivers: Vec<String> = (0..DRIVERS).map(|i| format!("driver-{i}")).collect();
    for id in &drivers {
        let mut user = User::new(id.as_str(), "main_menu");
        user.contact_preference = Some(ContactPreference::Never);
        store.put_user(&user).await.unwrap();
    }

    let start = NaiveDate::from_ymd_opt(2026, 3, 3)
        .unwrap()
        .and_hms_opt(9, 0, 0)
        .unwrap();
    let request = RideRequest::new(
        "hitchhiker",
        RequestKind::HitchhikerRequest,
        None,
        "חיפה",
        TimeWindow::starting_at(start, Duration::hours(1)),
        TimingClass::Specific,
    );
    store.insert_request(&request).await.unwrap();

    let ranked: Vec<Candidate> = drivers
        .iter()
        .map(|id| Candidate {
            driver_id: id.clone(),
            score: 3.0,
            source: MatchSource::Offer {
                request_id: Uuid::new_v4(),
            },
        })
        .collect();
    let entries = service
        .approvals()
        .create_matches(request.id, &ranked)
        .await
        .unwrap();

    for op in ops {
        let (index, as_owner, approve) = match op {
            Op::Approve { entry, as_owner } => (entry, as_owner, true),
            Op::Reject { entry, as_owner } => (entry, as_owner, false),
        };
        let entry = &entries[index];
        let caller = if as_owner {
            entry.driver_id.clone()
        } else {
            drivers[(index + 1) % DRIVERS].clone()
        };
        if approve {
            service
                .approvals()
                .approve(entry.match_id, &caller, false)
                .await
                .unwrap();
        } else {
            service
                .approvals()
                .reject(entry.match_id, &caller)
                .await
                .unwrap();
        }
    }

    store.get_request(request.id).await.unwrap().unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn at_most_one_driver_is_approved(ops in prop::collection::vec(op(), 0..16)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let request = runtime.block_on(run(ops));

        prop_assert!(request.approved_count() <= 1);
        if request.approved_count() == 1 {
            prop_assert!(request
                .matched_drivers
                .iter()
                .all(|e| e.status != MatchStatus::PendingApproval));
        }
    }
}
