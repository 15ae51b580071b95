//! Matching engine
//!
//! Scores counter-parties for a ride request or a driver's availability.
//! The matcher only reads from the store; creating entries is the approval
//! workflow's job.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use ride_core::{
    DailyWindow, DaySet, DocumentStore, MatchSource, RequestFilter, RequestKind, RideConfig,
    RideRequest, RideResult, Routine, RoutineFilter, TimeWindow, TimingClass,
};
use uuid::Uuid;

const BASE_SCORE: f64 = 1.0;
const DESTINATION_BONUS: f64 = 2.0;
const TIME_BONUS: f64 = 1.5;
const RELATIVE_TIMING_BONUS: f64 = 0.5;

/// A driver scored against a hitchhiker request.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub driver_id: String,
    pub score: f64,
    pub source: MatchSource,
}

/// A hitchhiker request scored against a driver's availability.
#[derive(Debug, Clone, PartialEq)]
pub struct HitchhikerCandidate {
    pub request_id: Uuid,
    pub hitchhiker_id: String,
    pub score: f64,
}

/// The driver side of a `find_hitchhikers` query.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverContext {
    pub driver_id: String,
    pub home_settlement: Option<String>,
}

/// When a driver is available.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Availability {
    /// A one-off offer.
    Once {
        window: TimeWindow,
        timing: TimingClass,
    },
    /// A standing routine on the given days.
    Weekly {
        days: DaySet,
        outbound: DailyWindow,
        return_window: Option<DailyWindow>,
    },
}

impl Availability {
    pub fn of_routine(routine: &Routine) -> Self {
        Availability::Weekly {
            days: routine.days,
            outbound: routine.outbound,
            return_window: routine.return_window,
        }
    }
}

#[derive(Clone)]
pub struct Matcher {
    store: Arc<dyn DocumentStore>,
    tolerance: Duration,
    min_score: f64,
}

impl Matcher {
    pub fn new(store: Arc<dyn DocumentStore>, config: &RideConfig) -> Self {
        Self {
            store,
            tolerance: config.overlap_tolerance(),
            min_score: config.min_match_score,
        }
    }

    /// Drivers for a hitchhiker request, from standing routines and live
    /// offers. Highest score first; equal scores keep discovery order.
    pub async fn find_drivers(&self, request: &RideRequest) -> RideResult<Vec<Candidate>> {
        let mut ranked = Ranked::default();

        for routine in self.store.find_routines(&RoutineFilter::active()).await? {
            if routine.owner_id == request.requester_id {
                continue;
            }
            if let Some(score) = self.score_routine(&routine, request).await? {
                ranked.offer(
                    routine.owner_id.clone(),
                    score,
                    MatchSource::Routine {
                        routine_id: routine.id,
                    },
                );
            }
        }

        let offers = self
            .store
            .find_requests(&RequestFilter::open(RequestKind::DriverOffer))
            .await?;
        for offer in offers {
            if offer.requester_id == request.requester_id {
                continue;
            }
            if let Some(score) = self.score_once(
                &offer.destination,
                &offer.window,
                offer.timing,
                request,
            ) {
                ranked.offer(
                    offer.requester_id.clone(),
                    score,
                    MatchSource::Offer {
                        request_id: offer.id,
                    },
                );
            }
        }

        let candidates = ranked.into_sorted();
        tracing::debug!(
            request_id = %request.id,
            candidates = candidates.len(),
            "driver candidates ranked"
        );
        Ok(candidates)
    }

    /// Open hitchhiker requests a driver could serve. Requests the driver is
    /// already attached to are listed too; creating entries skips them.
    pub async fn find_hitchhikers(
        &self,
        driver: &DriverContext,
        destination: &str,
        availability: &Availability,
    ) -> RideResult<Vec<HitchhikerCandidate>> {
        let requests = self
            .store
            .find_requests(&RequestFilter::open(RequestKind::HitchhikerRequest))
            .await?;

        let mut found: Vec<HitchhikerCandidate> = Vec::new();
        for request in requests {
            if request.requester_id == driver.driver_id {
                continue;
            }

            let score = match availability {
                Availability::Once { window, timing } => {
                    self.score_once(destination, window, *timing, &request)
                }
                Availability::Weekly {
                    days,
                    outbound,
                    return_window,
                } => self.score_weekly(
                    *days,
                    destination,
                    outbound,
                    return_window.as_ref(),
                    driver.home_settlement.as_deref(),
                    &request,
                ),
            };

            if let Some(score) = score {
                found.push(HitchhikerCandidate {
                    request_id: request.id,
                    hitchhiker_id: request.requester_id.clone(),
                    score,
                });
            }
        }

        found.sort_by(|a, b| b.score.total_cmp(&a.score));
        tracing::debug!(
            driver_id = %driver.driver_id,
            destination,
            candidates = found.len(),
            "hitchhiker candidates ranked"
        );
        Ok(found)
    }

    async fn score_routine(
        &self,
        routine: &Routine,
        request: &RideRequest,
    ) -> RideResult<Option<f64>> {
        let home = match routine.return_window {
            Some(_) => self
                .store
                .get_user(&routine.owner_id)
                .await?
                .and_then(|owner| owner.home_settlement),
            None => None,
        };
        Ok(self.score_weekly(
            routine.days,
            &routine.destination,
            &routine.outbound,
            routine.return_window.as_ref(),
            home.as_deref(),
            request,
        ))
    }

    /// Weekly availability against a request: the better of the outbound leg
    /// to `destination` and the return leg to `home`. A leg qualifies on its
    /// destination alone; the time bonus needs the request to fall on one of
    /// the routine's days and overlap that day's window. Both matching
    /// directions score through here.
    fn score_weekly(
        &self,
        days: DaySet,
        destination: &str,
        outbound: &DailyWindow,
        return_window: Option<&DailyWindow>,
        home: Option<&str>,
        request: &RideRequest,
    ) -> Option<f64> {
        let runs = days.contains_weekday(request.window.weekday());
        let date = request.window.date();
        let leg = |window: &DailyWindow| {
            if runs {
                self.score_leg(&window.on(date), &request.window)
            } else {
                BASE_SCORE + DESTINATION_BONUS
            }
        };

        let outbound_leg = (request.destination == destination).then(|| leg(outbound));
        let return_leg = match (return_window, home) {
            (Some(window), Some(home)) if request.destination == home => Some(leg(window)),
            _ => None,
        };
        best(outbound_leg, return_leg).filter(|score| *score >= self.min_score)
    }

    /// A one-off window against a request. Destinations must match.
    fn score_once(
        &self,
        destination: &str,
        window: &TimeWindow,
        timing: TimingClass,
        request: &RideRequest,
    ) -> Option<f64> {
        if destination != request.destination {
            return None;
        }
        let mut score = self.score_leg(window, &request.window);
        if timing.is_relative() && timing == request.timing {
            score += RELATIVE_TIMING_BONUS;
        }
        (score >= self.min_score).then_some(score)
    }

    /// Base plus destination plus the overlap bonus when the windows meet.
    fn score_leg(&self, available: &TimeWindow, wanted: &TimeWindow) -> f64 {
        let mut score = BASE_SCORE + DESTINATION_BONUS;
        if available.overlaps_within(wanted, self.tolerance) {
            score += TIME_BONUS;
        }
        score
    }
}

fn best(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

/// Candidates keyed by driver in discovery order; a later discovery of the
/// same driver only replaces the score when it is higher.
#[derive(Default)]
struct Ranked {
    order: Vec<Candidate>,
    index: HashMap<String, usize>,
}

impl Ranked {
    fn offer(&mut self, driver_id: String, score: f64, source: MatchSource) {
        match self.index.get(&driver_id) {
            Some(&position) => {
                let existing = &mut self.order[position];
                if score > existing.score {
                    existing.score = score;
                    existing.source = source;
                }
            }
            None => {
                self.index.insert(driver_id.clone(), self.order.len());
                self.order.push(Candidate {
                    driver_id,
                    score,
                    source,
                });
            }
        }
    }

    fn into_sorted(mut self) -> Vec<Candidate> {
        // sort_by is stable, so ties keep discovery order
        self.order.sort_by(|a, b| b.score.total_cmp(&a.score));
        self.order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
    use ride_core::User;
    use ride_storage::MemoryStore;

    // 2026-03-02 is a Monday.
    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, day)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn hitchhiker_request(destination: &str, window: TimeWindow, timing: TimingClass) -> RideRequest {
        RideRequest::new(
            "hitchhiker",
            RequestKind::HitchhikerRequest,
            None,
            destination,
            window,
            timing,
        )
    }

    fn commute(owner: &str, destination: &str) -> Routine {
        Routine::new(
            owner,
            destination,
            DaySet::MON | DaySet::WED,
            DailyWindow::new(time(7, 0), time(7, 30)),
            Some(DailyWindow::new(time(17, 0), time(18, 0))),
        )
    }

    fn matcher(store: Arc<MemoryStore>) -> Matcher {
        Matcher::new(store, &RideConfig::default())
    }

    #[tokio::test]
    async fn test_routine_destination_and_time_score() {
        let store = Arc::new(MemoryStore::new());
        store.insert_routine(&commute("driver", "חיפה")).await.unwrap();
        let matcher = matcher(store);

        let monday = hitchhiker_request(
            "חיפה",
            TimeWindow::new(at(2, 7, 15), at(2, 8, 15)),
            TimingClass::Specific,
        );
        let ranked = matcher.find_drivers(&monday).await.unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].score, 4.5);

        // Tuesday: destination still matches, time does not.
        let tuesday = hitchhiker_request(
            "חיפה",
            TimeWindow::new(at(3, 7, 15), at(3, 8, 15)),
            TimingClass::Specific,
        );
        let ranked = matcher.find_drivers(&tuesday).await.unwrap();
        assert_eq!(ranked[0].score, 3.0);

        let elsewhere = hitchhiker_request(
            "עכו",
            TimeWindow::new(at(2, 7, 15), at(2, 8, 15)),
            TimingClass::Specific,
        );
        assert!(matcher.find_drivers(&elsewhere).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_return_leg_matches_home_settlement() {
        let store = Arc::new(MemoryStore::new());
        let mut driver = User::new("driver", "initial");
        driver.home_settlement = Some("קצרין".to_string());
        store.put_user(&driver).await.unwrap();
        store.insert_routine(&commute("driver", "חיפה")).await.unwrap();

        let request = hitchhiker_request(
            "קצרין",
            TimeWindow::new(at(4, 17, 30), at(4, 18, 30)),
            TimingClass::Specific,
        );
        let ranked = Matcher::new(store, &RideConfig::default())
            .find_drivers(&request)
            .await
            .unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].score, 4.5);
    }

    #[tokio::test]
    async fn test_duplicate_driver_keeps_higher_score() {
        let store = Arc::new(MemoryStore::new());
        store.insert_routine(&commute("driver", "חיפה")).await.unwrap();
        let offer = RideRequest::new(
            "driver",
            RequestKind::DriverOffer,
            None,
            "חיפה",
            TimeWindow::new(at(3, 12, 0), at(3, 12, 30)),
            TimingClass::Now,
        );
        store.insert_request(&offer).await.unwrap();
        let other_offer = RideRequest::new(
            "other",
            RequestKind::DriverOffer,
            None,
            "חיפה",
            TimeWindow::new(at(5, 12, 0), at(5, 12, 30)),
            TimingClass::Specific,
        );
        store.insert_request(&other_offer).await.unwrap();

        let request = hitchhiker_request(
            "חיפה",
            TimeWindow::new(at(3, 12, 0), at(3, 12, 15)),
            TimingClass::Now,
        );
        let ranked = matcher(store).find_drivers(&request).await.unwrap();

        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].driver_id, "driver");
        assert_eq!(ranked[0].score, 5.0);
        assert_eq!(
            ranked[0].source,
            MatchSource::Offer {
                request_id: offer.id
            }
        );
        assert_eq!(ranked[1].driver_id, "other");
        assert_eq!(ranked[1].score, 3.0);
    }

    #[tokio::test]
    async fn test_requester_never_matches_self() {
        let store = Arc::new(MemoryStore::new());
        store.insert_routine(&commute("hitchhiker", "חיפה")).await.unwrap();
        let request = hitchhiker_request(
            "חיפה",
            TimeWindow::new(at(2, 7, 0), at(2, 8, 0)),
            TimingClass::Specific,
        );
        assert!(matcher(store).find_drivers(&request).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_find_hitchhikers_for_routine_scores_day_into_time_bonus() {
        let store = Arc::new(MemoryStore::new());
        let monday = hitchhiker_request(
            "חיפה",
            TimeWindow::new(at(2, 7, 0), at(2, 8, 0)),
            TimingClass::Specific,
        );
        let tuesday = hitchhiker_request(
            "חיפה",
            TimeWindow::new(at(3, 7, 0), at(3, 8, 0)),
            TimingClass::Specific,
        );
        store.insert_request(&monday).await.unwrap();
        store.insert_request(&tuesday).await.unwrap();

        let routine = commute("driver", "חיפה");
        let driver = DriverContext {
            driver_id: "driver".to_string(),
            home_settlement: None,
        };
        let found = matcher(store)
            .find_hitchhikers(&driver, "חיפה", &Availability::of_routine(&routine))
            .await
            .unwrap();

        assert_eq!(found.len(), 2);
        assert_eq!(found[0].request_id, monday.id);
        assert_eq!(found[0].score, 4.5);
        assert_eq!(found[1].request_id, tuesday.id);
        assert_eq!(found[1].score, 3.0);
    }

    #[tokio::test]
    async fn test_off_day_routine_scores_alike_in_both_directions() {
        let store = Arc::new(MemoryStore::new());
        let routine = commute("A", "חיפה");
        store.insert_routine(&routine).await.unwrap();
        let tuesday = hitchhiker_request(
            "חיפה",
            TimeWindow::new(at(3, 7, 0), at(3, 7, 15)),
            TimingClass::Now,
        );
        store.insert_request(&tuesday).await.unwrap();
        let matcher = matcher(store);

        let drivers = matcher.find_drivers(&tuesday).await.unwrap();
        assert_eq!(drivers.len(), 1);
        assert_eq!(drivers[0].driver_id, "A");
        assert_eq!(drivers[0].score, 3.0);

        let driver = DriverContext {
            driver_id: "A".to_string(),
            home_settlement: None,
        };
        let hitchhikers = matcher
            .find_hitchhikers(&driver, "חיפה", &Availability::of_routine(&routine))
            .await
            .unwrap();
        assert_eq!(hitchhikers.len(), 1);
        assert_eq!(hitchhikers[0].request_id, tuesday.id);
        assert_eq!(hitchhikers[0].score, drivers[0].score);
    }

    #[tokio::test]
    async fn test_find_hitchhikers_for_offer() {
        let store = Arc::new(MemoryStore::new());
        let request = hitchhiker_request(
            "חיפה",
            TimeWindow::new(at(3, 9, 0), at(3, 10, 0)),
            TimingClass::Specific,
        );
        store.insert_request(&request).await.unwrap();

        let driver = DriverContext {
            driver_id: "driver".to_string(),
            home_settlement: None,
        };
        let availability = Availability::Once {
            window: TimeWindow::new(at(3, 10, 30), at(3, 11, 0)),
            timing: TimingClass::Specific,
        };
        let found = matcher(store.clone())
            .find_hitchhikers(&driver, "חיפה", &availability)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].hitchhiker_id, "hitchhiker");

        let found = matcher(store)
            .find_hitchhikers(&driver, "עכו", &availability)
            .await
            .unwrap();
        assert!(found.is_empty());
    }
}
