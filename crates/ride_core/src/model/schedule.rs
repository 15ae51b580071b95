//! Canonical time windows and weekday sets.

use std::fmt;

use bitflags::bitflags;
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

/// A (start, end) instant pair in the service's local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TimeWindow {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    pub fn starting_at(start: NaiveDateTime, span: Duration) -> Self {
        Self {
            start,
            end: start + span,
        }
    }

    /// True when the windows overlap once each is widened by `tolerance`.
    pub fn overlaps_within(&self, other: &TimeWindow, tolerance: Duration) -> bool {
        self.start <= other.end + tolerance && other.start <= self.end + tolerance
    }

    pub fn date(&self) -> NaiveDate {
        self.start.date()
    }

    pub fn weekday(&self) -> Weekday {
        self.start.weekday()
    }

    pub fn has_ended_before(&self, instant: NaiveDateTime) -> bool {
        self.end < instant
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start.date() == self.end.date() {
            write!(
                f,
                "{} {}-{}",
                self.start.format("%d/%m"),
                self.start.format("%H:%M"),
                self.end.format("%H:%M")
            )
        } else {
            write!(
                f,
                "{} - {}",
                self.start.format("%d/%m %H:%M"),
                self.end.format("%d/%m %H:%M")
            )
        }
    }
}

/// A time-of-day window repeated on every matching day of a routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DailyWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl DailyWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Symmetric window of `radius` around a departure time.
    pub fn around(departure: NaiveTime, radius: Duration) -> Self {
        let (start, _) = departure.overflowing_sub_signed(radius);
        let (end, _) = departure.overflowing_add_signed(radius);
        Self { start, end }
    }

    /// Anchor the window on a date. An end before the start rolls into the next day.
    pub fn on(&self, date: NaiveDate) -> TimeWindow {
        let start = date.and_time(self.start);
        let mut end = date.and_time(self.end);
        if end < start {
            end += Duration::days(1);
        }
        TimeWindow { start, end }
    }
}

impl fmt::Display for DailyWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            self.start.format("%H:%M"),
            self.end.format("%H:%M")
        )
    }
}

/// How a request's window was expressed. Two relative requests of the same
/// class score a small bonus against each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingClass {
    Now,
    Within30Minutes,
    WithinHour,
    WithinHours,
    Range,
    Specific,
    Routine,
    Fallback,
}

impl TimingClass {
    pub fn is_relative(&self) -> bool {
        matches!(
            self,
            Self::Now | Self::Within30Minutes | Self::WithinHour | Self::WithinHours
        )
    }
}

bitflags! {
    /// Days of the week a routine runs on.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct DaySet: u8 {
        const SUN = 1 << 0;
        const MON = 1 << 1;
        const TUE = 1 << 2;
        const WED = 1 << 3;
        const THU = 1 << 4;
        const FRI = 1 << 5;
        const SAT = 1 << 6;
    }
}

const WEEK: [(Weekday, DaySet, &str); 7] = [
    (Weekday::Sun, DaySet::SUN, "Sun"),
    (Weekday::Mon, DaySet::MON, "Mon"),
    (Weekday::Tue, DaySet::TUE, "Tue"),
    (Weekday::Wed, DaySet::WED, "Wed"),
    (Weekday::Thu, DaySet::THU, "Thu"),
    (Weekday::Fri, DaySet::FRI, "Fri"),
    (Weekday::Sat, DaySet::SAT, "Sat"),
];

impl DaySet {
    /// Sunday through Thursday, the local work week.
    pub fn workweek() -> Self {
        DaySet::SUN | DaySet::MON | DaySet::TUE | DaySet::WED | DaySet::THU
    }

    pub fn from_weekday(day: Weekday) -> Self {
        WEEK.iter()
            .find(|(weekday, _, _)| *weekday == day)
            .map(|(_, flag, _)| *flag)
            .unwrap_or_else(DaySet::empty)
    }

    pub fn contains_weekday(&self, day: Weekday) -> bool {
        self.contains(Self::from_weekday(day))
    }

    pub fn weekdays(&self) -> impl Iterator<Item = Weekday> + '_ {
        WEEK.iter()
            .filter(move |(_, flag, _)| self.contains(*flag))
            .map(|(weekday, _, _)| *weekday)
    }
}

impl fmt::Display for DaySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = WEEK
            .iter()
            .filter(|(_, flag, _)| self.contains(*flag))
            .map(|(_, _, name)| *name)
            .collect();
        write!(f, "{}", names.join(", "))
    }
}
