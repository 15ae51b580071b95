use async_trait::async_trait;
use chrono::NaiveDateTime;
use ride_core::{DailyWindow, DaySet, RideResult, Routine, User};
use ride_matching::RideService;

use super::{pending_id, required_str, required_value, Action};

const PENDING_ROUTINE_KEY: &str = "_pending_routine_id";

const ROUTINE_FIELDS: &[&str] = &[
    "routine_destination",
    "routine_days",
    "routine_departure_time",
    "routine_return_time",
];

/// `save_routine`: turn the collected commute into a routine and scan
/// open requests it can already serve.
pub struct SaveRoutine {
    service: RideService,
}

impl SaveRoutine {
    pub fn new(service: RideService) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Action for SaveRoutine {
    fn name(&self) -> &'static str {
        "save_routine"
    }

    async fn execute(&self, user: &mut User, _now: NaiveDateTime) -> RideResult<Option<String>> {
        let destination = required_str(user, "routine_destination")?;
        let days: DaySet = required_value(user, "routine_days")?;
        let outbound: DailyWindow = required_value(user, "routine_departure_time")?;
        let return_window: Option<DailyWindow> = user
            .context
            .get("routine_return_time")
            .and_then(|value| serde_json::from_value(value.clone()).ok());

        let mut summary = format!("Routine saved: to {destination} on {days}, leaving {outbound}");
        if let Some(window) = &return_window {
            summary.push_str(&format!(", returning {window}"));
        }
        summary.push('.');

        let mut routine = Routine::new(user.id.clone(), destination, days, outbound, return_window);
        routine.id = pending_id(&**self.service.store(), user, PENDING_ROUTINE_KEY).await?;
        let outcome = self
            .service
            .register_routine(routine, user.home_settlement.clone())
            .await?;
        if outcome.entries_created > 0 {
            summary.push_str(&format!(
                " It already fits {} open request(s).",
                outcome.entries_created
            ));
        }

        for field in ROUTINE_FIELDS {
            user.take_context(field);
        }
        user.take_context(PENDING_ROUTINE_KEY);
        Ok(Some(summary))
    }
}

/// `pause_routines`: deactivate every routine of the user.
pub struct PauseRoutines {
    service: RideService,
}

impl PauseRoutines {
    pub fn new(service: RideService) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Action for PauseRoutines {
    fn name(&self) -> &'static str {
        "pause_routines"
    }

    async fn execute(&self, user: &mut User, _now: NaiveDateTime) -> RideResult<Option<String>> {
        let paused = self.service.pause_routines(&user.id).await?;
        Ok(Some(match paused {
            0 => "You have no active routines.".to_string(),
            n => format!("{n} routine(s) paused."),
        }))
    }
}
