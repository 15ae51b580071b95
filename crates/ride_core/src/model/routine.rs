use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::schedule::{DailyWindow, DaySet};

/// A driver's recurring commute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Routine {
    pub id: Uuid,
    pub owner_id: String,
    pub destination: String,
    pub days: DaySet,
    pub outbound: DailyWindow,
    /// Window for the way back to the owner's home settlement.
    #[serde(default)]
    pub return_window: Option<DailyWindow>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Routine {
    pub fn new(
        owner_id: impl Into<String>,
        destination: impl Into<String>,
        days: DaySet,
        outbound: DailyWindow,
        return_window: Option<DailyWindow>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            destination: destination.into(),
            days,
            outbound,
            return_window,
            active: true,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    #[test]
    fn test_new_routines_are_active_and_distinct() {
        let window = DailyWindow::new(
            NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(7, 30, 0).unwrap(),
        );
        let first = Routine::new("driver", "חיפה", DaySet::MON | DaySet::WED, window, None);
        let second = Routine::new("driver", "חיפה", DaySet::MON | DaySet::WED, window, None);

        assert!(first.active);
        assert!(first.return_window.is_none());
        assert_ne!(first.id, second.id);
    }
}
