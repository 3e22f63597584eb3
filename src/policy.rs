use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use chrono::{NaiveDate, Weekday};
use serde::Deserialize;

use crate::limits::*;
use crate::model::{parse_clock, BookingDate, TimeSlot};

/// Booking-window rules and the daily slot catalog. Supplied by the caller
/// on every resolver call; nothing here is process-wide state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingPolicy {
    /// Bookings may target at most this many days after today.
    pub horizon_days: i64,
    pub excluded_weekdays: Vec<Weekday>,
    pub holidays: BTreeSet<BookingDate>,
    /// Ordered, non-overlapping daily slots.
    pub slot_catalog: Vec<TimeSlot>,
    pub max_reasons: usize,
    pub max_group_size: usize,
    /// Required suffix for group member emails, e.g. `@edu.vut.ac.za`.
    pub member_email_domain: Option<String>,
}

pub const DEFAULT_HORIZON_DAYS: i64 = 10;
pub const DEFAULT_MAX_REASONS: usize = 5;
pub const DEFAULT_MAX_GROUP_SIZE: usize = 5;

/// Hourly slots 08:00-09:00 through 16:00-17:00.
pub fn default_catalog() -> Vec<TimeSlot> {
    (8..17)
        .filter_map(|h| TimeSlot::from_label(&format!("{h:02}:00-{:02}:00", h + 1)))
        .collect()
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            horizon_days: DEFAULT_HORIZON_DAYS,
            excluded_weekdays: vec![Weekday::Sat, Weekday::Sun],
            holidays: BTreeSet::new(),
            slot_catalog: default_catalog(),
            max_reasons: DEFAULT_MAX_REASONS,
            max_group_size: DEFAULT_MAX_GROUP_SIZE,
            member_email_domain: None,
        }
    }
}

#[derive(Debug)]
pub enum PolicyError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Invalid(String),
}

impl std::fmt::Display for PolicyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyError::Io(e) => write!(f, "cannot read policy file: {e}"),
            PolicyError::Parse(e) => write!(f, "cannot parse policy file: {e}"),
            PolicyError::Invalid(msg) => write!(f, "invalid policy: {msg}"),
        }
    }
}

impl std::error::Error for PolicyError {}

impl From<std::io::Error> for PolicyError {
    fn from(e: std::io::Error) -> Self {
        PolicyError::Io(e)
    }
}

impl From<toml::de::Error> for PolicyError {
    fn from(e: toml::de::Error) -> Self {
        PolicyError::Parse(e)
    }
}

/// Weekday numbering follows the browser convention: 0 = Sunday … 6 = Saturday.
pub fn weekday_from_number(n: u8) -> Option<Weekday> {
    match n {
        0 => Some(Weekday::Sun),
        1 => Some(Weekday::Mon),
        2 => Some(Weekday::Tue),
        3 => Some(Weekday::Wed),
        4 => Some(Weekday::Thu),
        5 => Some(Weekday::Fri),
        6 => Some(Weekday::Sat),
        _ => None,
    }
}

// ── On-disk format ───────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct PolicyFile {
    horizon_days: Option<i64>,
    excluded_weekdays: Option<Vec<u8>>,
    holidays: Vec<String>,
    slot_catalog: Option<Vec<SlotEntry>>,
    max_reasons: Option<usize>,
    max_group_size: Option<usize>,
    member_email_domain: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SlotEntry {
    label: Option<String>,
    start: String,
    end: String,
}

impl TryFrom<PolicyFile> for BookingPolicy {
    type Error = PolicyError;

    fn try_from(file: PolicyFile) -> Result<Self, Self::Error> {
        let mut policy = BookingPolicy::default();

        if let Some(h) = file.horizon_days {
            policy.horizon_days = h;
        }
        if let Some(days) = file.excluded_weekdays {
            let mut excluded = Vec::with_capacity(days.len());
            for n in days {
                let wd = weekday_from_number(n)
                    .ok_or_else(|| PolicyError::Invalid(format!("weekday out of range: {n}")))?;
                if !excluded.contains(&wd) {
                    excluded.push(wd);
                }
            }
            policy.excluded_weekdays = excluded;
        }
        for raw in &file.holidays {
            let d = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
                .map_err(|_| PolicyError::Invalid(format!("bad holiday date: {raw}")))?;
            policy.holidays.insert(d);
        }
        if let Some(entries) = file.slot_catalog {
            let mut catalog = Vec::with_capacity(entries.len());
            for e in entries {
                let (Some(start), Some(end)) = (parse_clock(&e.start), parse_clock(&e.end)) else {
                    return Err(PolicyError::Invalid(format!(
                        "bad slot time: {}-{}",
                        e.start, e.end
                    )));
                };
                if start >= end {
                    return Err(PolicyError::Invalid(format!(
                        "slot must end after it starts: {}-{}",
                        e.start, e.end
                    )));
                }
                let label = e
                    .label
                    .unwrap_or_else(|| format!("{}-{}", start.format("%H:%M"), end.format("%H:%M")));
                catalog.push(TimeSlot::new(label, start, end));
            }
            policy.slot_catalog = catalog;
        }
        if let Some(n) = file.max_reasons {
            policy.max_reasons = n;
        }
        if let Some(n) = file.max_group_size {
            policy.max_group_size = n;
        }
        policy.member_email_domain = file.member_email_domain;

        policy.validate()?;
        Ok(policy)
    }
}

impl BookingPolicy {
    pub fn from_toml_str(s: &str) -> Result<Self, PolicyError> {
        let file: PolicyFile = toml::from_str(s)?;
        file.try_into()
    }

    pub fn load(path: &Path) -> Result<Self, PolicyError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Structural checks for policies that come from configuration.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if !(0..=MAX_HORIZON_DAYS).contains(&self.horizon_days) {
            return Err(PolicyError::Invalid(format!(
                "horizon_days must be within 0..={MAX_HORIZON_DAYS}"
            )));
        }
        if self.slot_catalog.is_empty() {
            return Err(PolicyError::Invalid("slot catalog is empty".into()));
        }
        if self.slot_catalog.len() > MAX_CATALOG_SLOTS {
            return Err(PolicyError::Invalid("slot catalog too large".into()));
        }
        let mut labels = HashSet::new();
        for slot in &self.slot_catalog {
            if slot.label.trim().is_empty() {
                return Err(PolicyError::Invalid("slot label is empty".into()));
            }
            if !labels.insert(slot.label.as_str()) {
                return Err(PolicyError::Invalid(format!("duplicate slot label: {}", slot.label)));
            }
        }
        let mut spans: Vec<_> = self.slot_catalog.iter().map(|s| s.span).collect();
        spans.sort_by_key(|s| s.start);
        for pair in spans.windows(2) {
            if pair[0].overlaps(&pair[1]) {
                return Err(PolicyError::Invalid("slot catalog entries overlap".into()));
            }
        }
        if self.max_reasons == 0 {
            return Err(PolicyError::Invalid("max_reasons must be at least 1".into()));
        }
        if self.max_group_size < 2 {
            return Err(PolicyError::Invalid("max_group_size must be at least 2".into()));
        }
        Ok(())
    }

    pub fn slot(&self, label: &str) -> Option<&TimeSlot> {
        self.slot_catalog.iter().find(|s| s.label == label)
    }

    pub fn excludes_weekday(&self, wd: Weekday) -> bool {
        self.excluded_weekdays.contains(&wd)
    }

    pub fn is_holiday(&self, date: BookingDate) -> bool {
        self.holidays.contains(&date)
    }
}
