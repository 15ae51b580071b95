//! Time normalizer
//!
//! Turns the ways people say when they travel into one canonical
//! [`TimeWindow`]: relative keywords ("now", "within an hour"), explicit
//! ranges ("7-9", "08:00-10:00"), specific times with optional day words
//! ("tomorrow 8:30", "מחר ב-8", "25/12 07:00") and routine departure times.
//!
//! Everything here is a pure function of the input and the reference `now`.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::RideConfig;
use crate::model::{DailyWindow, TimeWindow, TimingClass};

static CLOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{1,2})(?:[:.]?(\d{2}))?\s*(am|pm)?$").expect("clock regex is valid")
});

static RANGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:from\s+|between\s+|בין\s+|מ-?)?(.+?)\s*(?:-|–|—|\bto\b|\buntil\b|\band\b|עד|ל-)\s*(.+)$")
        .expect("range regex is valid")
});

static DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{1,2})[/.](\d{1,2})(?:[/.](\d{2,4}))?(?:\s+|$)").expect("date regex is valid")
});

static MINUTES_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:within|in|תוך)\s+(\d{1,3})\s*(?:minutes?|mins?|m|דקות)$")
        .expect("minutes regex is valid")
});

static HOURS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:within|in|תוך)\s+(\d{1,2})\s*(?:hours?|hrs?|h|שעות)$")
        .expect("hours regex is valid")
});

const RELATIVE_PHRASES: &[(&str, TimingClass, i64)] = &[
    ("now", TimingClass::Now, 15),
    ("right now", TimingClass::Now, 15),
    ("asap", TimingClass::Now, 15),
    ("immediately", TimingClass::Now, 15),
    ("עכשיו", TimingClass::Now, 15),
    ("מיד", TimingClass::Now, 15),
    ("within_30_minutes", TimingClass::Within30Minutes, 30),
    ("within half an hour", TimingClass::Within30Minutes, 30),
    ("in half an hour", TimingClass::Within30Minutes, 30),
    ("תוך חצי שעה", TimingClass::Within30Minutes, 30),
    ("בחצי השעה הקרובה", TimingClass::Within30Minutes, 30),
    ("within_1_hour", TimingClass::WithinHour, 60),
    ("within an hour", TimingClass::WithinHour, 60),
    ("within the hour", TimingClass::WithinHour, 60),
    ("in an hour", TimingClass::WithinHour, 60),
    ("תוך שעה", TimingClass::WithinHour, 60),
    ("בשעה הקרובה", TimingClass::WithinHour, 60),
    ("within_2_5_hours", TimingClass::WithinHours, 300),
    ("within 2-5 hours", TimingClass::WithinHours, 300),
    ("within a few hours", TimingClass::WithinHours, 300),
    ("in a few hours", TimingClass::WithinHours, 300),
    ("בשעות הקרובות", TimingClass::WithinHours, 300),
    ("תוך כמה שעות", TimingClass::WithinHours, 300),
];

// Longer phrases first so "day after tomorrow" wins over "tomorrow".
const DAY_WORDS: &[(&str, i64)] = &[
    ("day after tomorrow", 2),
    ("מחרתיים", 2),
    ("tomorrow", 1),
    ("מחר", 1),
    ("today", 0),
    ("tonight", 0),
    ("היום", 0),
    ("הערב", 0),
];

const WEEKDAY_WORDS: &[(&str, Weekday)] = &[
    ("sunday", Weekday::Sun),
    ("monday", Weekday::Mon),
    ("tuesday", Weekday::Tue),
    ("wednesday", Weekday::Wed),
    ("thursday", Weekday::Thu),
    ("friday", Weekday::Fri),
    ("saturday", Weekday::Sat),
    ("sun", Weekday::Sun),
    ("mon", Weekday::Mon),
    ("tue", Weekday::Tue),
    ("wed", Weekday::Wed),
    ("thu", Weekday::Thu),
    ("fri", Weekday::Fri),
    ("sat", Weekday::Sat),
    ("ראשון", Weekday::Sun),
    ("שני", Weekday::Mon),
    ("שלישי", Weekday::Tue),
    ("רביעי", Weekday::Wed),
    ("חמישי", Weekday::Thu),
    ("שישי", Weekday::Fri),
    ("שבת", Weekday::Sat),
    ("א", Weekday::Sun),
    ("ב", Weekday::Mon),
    ("ג", Weekday::Tue),
    ("ד", Weekday::Wed),
    ("ה", Weekday::Thu),
    ("ו", Weekday::Fri),
    ("ש", Weekday::Sat),
];

/// A canonical window together with how it was expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedTime {
    pub window: TimeWindow,
    pub class: TimingClass,
}

#[derive(Debug, Clone, Copy)]
pub struct TimeNormalizer {
    routine_radius: Duration,
    specific_span: Duration,
    fallback_span: Duration,
}

impl Default for TimeNormalizer {
    fn default() -> Self {
        Self::from_config(&RideConfig::default())
    }
}

impl TimeNormalizer {
    pub fn from_config(config: &RideConfig) -> Self {
        Self {
            routine_radius: config.routine_radius(),
            specific_span: config.specific_span(),
            fallback_span: config.fallback_span(),
        }
    }

    /// Normalize any supported phrase; unparseable input falls back to
    /// `(now, now + 30min)`.
    pub fn normalize(&self, text: &str, now: NaiveDateTime) -> NormalizedTime {
        if let Some(normalized) = self.try_normalize(text, now) {
            return normalized;
        }
        tracing::warn!(input = %text, "time phrase not understood, using fallback window");
        NormalizedTime {
            window: TimeWindow::starting_at(now, self.fallback_span),
            class: TimingClass::Fallback,
        }
    }

    /// Strict variant used by input validation: `None` when nothing matched.
    pub fn try_normalize(&self, text: &str, now: NaiveDateTime) -> Option<NormalizedTime> {
        if let Some(normalized) = self.relative(text, now) {
            return Some(normalized);
        }
        if let Some(window) = self.parse_range(text, now) {
            return Some(NormalizedTime {
                window,
                class: TimingClass::Range,
            });
        }
        self.parse_specific(text, now).map(|window| NormalizedTime {
            window,
            class: TimingClass::Specific,
        })
    }

    /// Relative keywords: `(now, now + delta)`.
    pub fn relative(&self, text: &str, now: NaiveDateTime) -> Option<NormalizedTime> {
        let phrase = normalize_phrase(text);

        if let Some((_, class, minutes)) = RELATIVE_PHRASES.iter().find(|(p, _, _)| *p == phrase) {
            return Some(NormalizedTime {
                window: TimeWindow::starting_at(now, Duration::minutes(*minutes)),
                class: *class,
            });
        }

        if let Some(caps) = MINUTES_RE.captures(&phrase) {
            let minutes: i64 = caps[1].parse().ok()?;
            let class = match minutes {
                0 => return None,
                1..=30 => TimingClass::Within30Minutes,
                31..=60 => TimingClass::WithinHour,
                _ => return None,
            };
            return Some(NormalizedTime {
                window: TimeWindow::starting_at(now, Duration::minutes(minutes)),
                class,
            });
        }

        if let Some(caps) = HOURS_RE.captures(&phrase) {
            let hours: i64 = caps[1].parse().ok()?;
            let class = match hours {
                1 => TimingClass::WithinHour,
                2..=5 => TimingClass::WithinHours,
                _ => return None,
            };
            return Some(NormalizedTime {
                window: TimeWindow::starting_at(now, Duration::hours(hours)),
                class,
            });
        }

        None
    }

    /// Explicit ranges on the same day, optionally prefixed with a day word.
    /// An end before the start rolls into the next day.
    pub fn parse_range(&self, text: &str, now: NaiveDateTime) -> Option<TimeWindow> {
        let phrase = normalize_phrase(text);
        let (date, rest) = split_day(&phrase, now.date());
        let caps = RANGE_RE.captures(rest)?;
        let start_time = parse_clock(&caps[1])?;
        let end_time = parse_clock(&caps[2])?;
        if start_time == end_time {
            return None;
        }
        Some(DailyWindow::new(start_time, end_time).on(date.unwrap_or_else(|| now.date())))
    }

    /// A specific date/time phrase: `(instant, instant + 1h)`.
    ///
    /// A bare time that already passed today refers to tomorrow. A day
    /// without a time keeps the current time of day.
    pub fn parse_specific(&self, text: &str, now: NaiveDateTime) -> Option<TimeWindow> {
        let phrase = normalize_phrase(text);
        let (mut date, mut rest) = split_day(&phrase, now.date());

        if date.is_none() {
            if let Some(caps) = DATE_RE.captures(rest) {
                if let Some(parsed) = explicit_date(&caps, now.date()) {
                    date = Some(parsed);
                    rest = rest[caps[0].len()..].trim();
                }
            }
        }

        let time = strip_time_prefix(rest);
        let time = if time.is_empty() {
            None
        } else {
            Some(parse_clock(time)?)
        };

        let instant = match (date, time) {
            (Some(date), Some(time)) => date.and_time(time),
            (Some(date), None) if date == now.date() => now,
            (Some(date), None) => date.and_time(now.time()),
            (None, Some(time)) => {
                let today = now.date().and_time(time);
                if today < now {
                    today + Duration::days(1)
                } else {
                    today
                }
            }
            (None, None) => return None,
        };

        Some(TimeWindow::starting_at(instant, self.specific_span))
    }

    /// A routine departure time becomes a window of +/- the routine radius.
    pub fn routine_window(&self, departure: NaiveTime) -> DailyWindow {
        DailyWindow::around(departure, self.routine_radius)
    }

    /// Routine time input: either an explicit range or a single departure time.
    pub fn daily_window(&self, text: &str) -> Option<DailyWindow> {
        let phrase = normalize_phrase(text);
        if let Some(caps) = RANGE_RE.captures(&phrase) {
            if let (Some(start), Some(end)) = (parse_clock(&caps[1]), parse_clock(&caps[2])) {
                if start != end {
                    return Some(DailyWindow::new(start, end));
                }
            }
        }
        parse_clock(strip_time_prefix(&phrase)).map(|departure| self.routine_window(departure))
    }
}

/// Format a window the way `parse_range` reads it back.
pub fn format_window(window: &TimeWindow) -> String {
    format!(
        "{}-{}",
        window.start.format("%H:%M"),
        window.end.format("%H:%M")
    )
}

/// Parse "7", "07", "7:30", "07.30", "0730", "7pm".
pub fn parse_clock(text: &str) -> Option<NaiveTime> {
    let caps = CLOCK_RE.captures(text.trim())?;
    let mut hour: u32 = caps[1].parse().ok()?;
    let minute: u32 = match caps.get(2) {
        Some(m) => m.as_str().parse().ok()?,
        None => 0,
    };
    match caps.get(3).map(|m| m.as_str()) {
        Some("pm") if hour < 12 => hour += 12,
        Some("am") if hour == 12 => hour = 0,
        Some(_) if hour > 12 => return None,
        _ => {}
    }
    NaiveTime::from_hms_opt(hour, minute, 0)
}

/// Map a weekday word (English or Hebrew, long or short) to a weekday.
pub fn weekday_from_word(word: &str) -> Option<Weekday> {
    let word = word.trim().trim_start_matches("יום ").trim_end_matches(['\'', '׳']);
    let word = word.to_lowercase();
    WEEKDAY_WORDS
        .iter()
        .find(|(name, _)| *name == word)
        .map(|(_, day)| *day)
}

fn normalize_phrase(text: &str) -> String {
    text.trim()
        .trim_end_matches(['.', '!', '?'])
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Peel a leading or trailing day word ("tomorrow", "מחר", "sunday") off the phrase.
fn split_day(phrase: &str, today: NaiveDate) -> (Option<NaiveDate>, &str) {
    for (word, offset) in DAY_WORDS {
        if let Some(rest) = phrase.strip_prefix(word) {
            return (Some(today + Duration::days(*offset)), rest.trim());
        }
        if let Some(rest) = phrase.strip_suffix(word) {
            return (Some(today + Duration::days(*offset)), rest.trim());
        }
    }

    let stripped = phrase
        .strip_prefix("on ")
        .or_else(|| phrase.strip_prefix("ביום "))
        .or_else(|| phrase.strip_prefix("יום "))
        .unwrap_or(phrase);
    if let Some((first, rest)) = stripped.split_once(' ') {
        // Single-letter Hebrew day names collide with the "ב" time prefix.
        if first.chars().count() > 1 {
            if let Some(day) = weekday_from_word(first) {
                return (Some(next_weekday(today, day)), rest.trim());
            }
        }
    }

    (None, phrase)
}

fn next_weekday(today: NaiveDate, day: Weekday) -> NaiveDate {
    let ahead = (7 + day.num_days_from_sunday() as i64
        - today.weekday().num_days_from_sunday() as i64)
        % 7;
    today + Duration::days(ahead)
}

fn explicit_date(caps: &regex::Captures<'_>, today: NaiveDate) -> Option<NaiveDate> {
    let day: u32 = caps[1].parse().ok()?;
    let month: u32 = caps[2].parse().ok()?;
    match caps.get(3) {
        Some(year) => {
            let mut year: i32 = year.as_str().parse().ok()?;
            if year < 100 {
                year += 2000;
            }
            NaiveDate::from_ymd_opt(year, month, day)
        }
        None => {
            let this_year = NaiveDate::from_ymd_opt(today.year(), month, day)?;
            if this_year < today {
                NaiveDate::from_ymd_opt(today.year() + 1, month, day)
            } else {
                Some(this_year)
            }
        }
    }
}

fn strip_time_prefix(text: &str) -> &str {
    let text = text.trim();
    for prefix in ["at ", "בשעה ", "ב-", "@"] {
        if let Some(rest) = text.strip_prefix(prefix) {
            return rest.trim();
        }
    }
    match text.strip_prefix('ב') {
        Some(rest) if rest.starts_with(|c: char| c.is_ascii_digit()) => rest,
        _ => text,
    }
}
