//! Input validators
//!
//! One validator per kind of field. Each returns the normalized value to
//! store, a user-facing reason, or settlement suggestions.

use std::sync::Arc;

use chrono::{NaiveDateTime, Weekday};
use ride_core::{weekday_from_word, DaySet, NormalizedTime, RideConfig, TimeNormalizer, TimingClass};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::settlements::SettlementCatalog;

const NAME_MAX_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Name,
    Settlement,
    Days,
    /// A routine departure: a daily window.
    Time,
    TimeRange,
    /// A one-off ride time: a dated window.
    RideTime,
    Text,
}

impl FieldKind {
    /// The validator implied by a field name.
    pub fn infer(field: &str) -> Self {
        if field.contains("name") {
            FieldKind::Name
        } else if ["settlement", "destination", "origin"]
            .iter()
            .any(|part| field.contains(part))
        {
            FieldKind::Settlement
        } else if field.ends_with("days") {
            FieldKind::Days
        } else if field.contains("range") {
            FieldKind::TimeRange
        } else if field.starts_with("routine_") && field.contains("time") {
            FieldKind::Time
        } else if field.contains("time") {
            FieldKind::RideTime
        } else {
            FieldKind::Text
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    Valid(Value),
    Invalid(String),
    /// Not valid as typed, but close to these settlements.
    Suggestions(Vec<String>),
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validation::Valid(_))
    }
}

#[derive(Debug, Clone)]
pub struct InputValidator {
    catalog: Arc<SettlementCatalog>,
    normalizer: TimeNormalizer,
    suggestion_threshold: f64,
    max_suggestions: usize,
}

impl InputValidator {
    pub fn new(catalog: Arc<SettlementCatalog>, config: &RideConfig) -> Self {
        Self {
            catalog,
            normalizer: TimeNormalizer::from_config(config),
            suggestion_threshold: config.suggestion_threshold,
            max_suggestions: config.max_suggestions,
        }
    }

    pub fn catalog(&self) -> &SettlementCatalog {
        &self.catalog
    }

    pub fn normalizer(&self) -> &TimeNormalizer {
        &self.normalizer
    }

    pub fn validate(&self, kind: FieldKind, text: &str, now: NaiveDateTime) -> Validation {
        let text = text.trim();
        if text.is_empty() {
            return Validation::Invalid("Please type an answer.".to_string());
        }
        match kind {
            FieldKind::Name => validate_name(text),
            FieldKind::Settlement => self.validate_settlement(text),
            FieldKind::Days => match parse_days(text) {
                Some(days) => to_value(days),
                None => Validation::Invalid(
                    "I did not understand which days. Use day names or a range.".to_string(),
                ),
            },
            FieldKind::Time => match self.normalizer.daily_window(text) {
                Some(window) => to_value(window),
                None => Validation::Invalid("Please enter a time such as 07:30.".to_string()),
            },
            FieldKind::TimeRange => match self.normalizer.parse_range(text, now) {
                Some(window) => to_value(NormalizedTime {
                    window,
                    class: TimingClass::Range,
                }),
                None => Validation::Invalid(
                    "Please enter a range with a start and an end time.".to_string(),
                ),
            },
            FieldKind::RideTime => match self.normalizer.try_normalize(text, now) {
                Some(time) => to_value(time),
                None => Validation::Invalid("I did not understand when you travel.".to_string()),
            },
            FieldKind::Text => Validation::Valid(Value::String(text.to_string())),
        }
    }

    fn validate_settlement(&self, text: &str) -> Validation {
        if let Some(name) = self.catalog.lookup(text) {
            return Validation::Valid(Value::String(name.to_string()));
        }
        let suggestions =
            self.catalog
                .suggest(text, self.suggestion_threshold, self.max_suggestions);
        if suggestions.is_empty() {
            Validation::Invalid(format!("\"{text}\" is not a settlement I know."))
        } else {
            Validation::Suggestions(suggestions)
        }
    }
}

fn to_value<T: Serialize>(value: T) -> Validation {
    match serde_json::to_value(value) {
        Ok(value) => Validation::Valid(value),
        Err(err) => Validation::Invalid(err.to_string()),
    }
}

fn validate_name(text: &str) -> Validation {
    let name = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let letters = name.chars().filter(|c| c.is_alphabetic()).count();
    let allowed = name
        .chars()
        .all(|c| c.is_alphabetic() || matches!(c, ' ' | '-' | '\'' | '"' | '.' | '׳'));

    if !allowed || letters < 2 || name.chars().count() > NAME_MAX_CHARS {
        return Validation::Invalid(format!(
            "Please write your name in letters only, 2 to {NAME_MAX_CHARS} characters."
        ));
    }
    Validation::Valid(Value::String(name))
}

const EVERY_DAY: &[&str] = &["every day", "daily", "all week", "כל יום", "כל הימים"];
const WORK_WEEK: &[&str] = &["weekdays", "workdays", "work week", "ימי חול", "ימי עבודה"];

/// Parse a set of days: presets, ranges ("sun-thu", "א-ה") or lists
/// ("mon, wed", "שני ורביעי").
pub fn parse_days(text: &str) -> Option<DaySet> {
    let phrase = text.trim().to_lowercase();
    if EVERY_DAY.contains(&phrase.as_str()) {
        return Some(DaySet::all());
    }
    if WORK_WEEK.contains(&phrase.as_str()) {
        return Some(DaySet::workweek());
    }

    if let Some((from, to)) = phrase.split_once(['-', '–']) {
        let from = weekday_from_word(from)?;
        let to = weekday_from_word(to)?;
        return Some(day_range(from, to));
    }

    let mut days = DaySet::empty();
    for token in phrase
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty() && !matches!(*t, "and" | "יום" | "ימים"))
    {
        days |= DaySet::from_weekday(list_weekday(token)?);
    }
    (!days.is_empty()).then_some(days)
}

/// Hebrew lists join the last day with a leading "ו".
fn list_weekday(token: &str) -> Option<Weekday> {
    weekday_from_word(token).or_else(|| {
        token
            .strip_prefix('ו')
            .filter(|rest| !rest.is_empty())
            .and_then(|rest| weekday_from_word(rest.trim_start_matches("יום")))
    })
}

fn day_range(from: Weekday, to: Weekday) -> DaySet {
    let mut days = DaySet::from_weekday(from);
    let mut day = from;
    while day != to {
        day = day.succ();
        days |= DaySet::from_weekday(day);
    }
    days
}
