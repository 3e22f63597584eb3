use std::collections::{BTreeMap, HashSet};

use chrono::{Datelike, Days};

use crate::limits::MAX_HORIZON_DAYS;
use crate::model::*;
use crate::policy::BookingPolicy;

// ── Calendar rules ────────────────────────────────────────────────

/// Whether `date` may be booked at all, ignoring occupancy.
///
/// Bookings target a strictly future date within the horizon:
/// `today < date <= today + horizon_days`, on a weekday the policy does not
/// exclude, and not on a listed holiday. `today` itself is never eligible.
pub fn is_date_eligible(date: BookingDate, policy: &BookingPolicy, today: BookingDate) -> bool {
    if policy.horizon_days <= 0 {
        return false;
    }
    let ahead = date.signed_duration_since(today).num_days();
    ahead >= 1
        && ahead <= policy.horizon_days
        && !policy.excludes_weekday(date.weekday())
        && !policy.is_holiday(date)
}

// ── Interval helpers ─────────────────────────────────────────────

/// Merge sorted overlapping/adjacent spans into disjoint spans.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// Disjoint, sorted blocked windows of `advisor_id` on `date`.
pub fn blocked_windows(advisor_id: &str, date: BookingDate, blocked: &[BlockedRange]) -> Vec<Span> {
    let mut spans: Vec<Span> = blocked
        .iter()
        .filter(|b| b.advisor_id == advisor_id && b.date == date)
        .map(|b| b.span)
        .collect();
    spans.sort_by_key(|s| s.start);
    merge_overlapping(&spans)
}

/// True if `slot` intersects any of the disjoint sorted `windows`.
fn intersects_any(slot: &Span, windows: &[Span]) -> bool {
    // Windows ending at or before the slot start cannot intersect it.
    let first = windows.partition_point(|w| w.end <= slot.start);
    windows.get(first).is_some_and(|w| w.overlaps(slot))
}

/// Catalog slots that are neither held by a live reservation nor blocked,
/// in catalog order. `occupied` holds slot labels; `windows` is disjoint and sorted.
fn free_in_catalog<'p>(
    policy: &'p BookingPolicy,
    occupied: &HashSet<&str>,
    windows: &[Span],
) -> impl Iterator<Item = &'p TimeSlot> {
    policy
        .slot_catalog
        .iter()
        .filter(move |slot| !occupied.contains(slot.label.as_str()) && !intersects_any(&slot.span, windows))
}

fn occupied_labels<'r>(
    advisor_id: &str,
    date: BookingDate,
    reservations: &'r [Reservation],
) -> HashSet<&'r str> {
    reservations
        .iter()
        .filter(|r| r.is_live() && r.advisor_id == advisor_id && r.date == date)
        .map(|r| r.slot_label.as_str())
        .collect()
}

// ── Resolver ─────────────────────────────────────────────────────

/// Slots of the catalog still bookable for `advisor_id` on `date`.
///
/// Rejects an ineligible date on its own (empty result) rather than trusting
/// the caller. Reservations and ranges of other advisors or dates are ignored.
pub fn compute_bookable_slots(
    advisor_id: &str,
    date: BookingDate,
    policy: &BookingPolicy,
    reservations: &[Reservation],
    blocked: &[BlockedRange],
    today: BookingDate,
) -> Vec<TimeSlot> {
    if !is_date_eligible(date, policy, today) {
        return Vec::new();
    }
    let occupied = occupied_labels(advisor_id, date, reservations);
    let windows = blocked_windows(advisor_id, date, blocked);
    free_in_catalog(policy, &occupied, &windows).cloned().collect()
}

/// Eligible dates in `(today, today + horizon]`, ascending, that still have
/// at least one free slot for `advisor_id`.
pub fn compute_bookable_dates(
    advisor_id: &str,
    policy: &BookingPolicy,
    reservations: &[Reservation],
    blocked: &[BlockedRange],
    today: BookingDate,
) -> Vec<BookingDate> {
    if policy.horizon_days <= 0 {
        return Vec::new();
    }

    // Index the inputs once instead of rescanning them per date.
    let mut occupied: BTreeMap<BookingDate, HashSet<&str>> = BTreeMap::new();
    for r in reservations
        .iter()
        .filter(|r| r.is_live() && r.advisor_id == advisor_id && r.date > today)
    {
        occupied.entry(r.date).or_default().insert(r.slot_label.as_str());
    }
    let mut ranges: BTreeMap<BookingDate, Vec<Span>> = BTreeMap::new();
    for b in blocked
        .iter()
        .filter(|b| b.advisor_id == advisor_id && b.date > today)
    {
        ranges.entry(b.date).or_default().push(b.span);
    }

    // Policies built in code may skip `validate`; never walk past the hard cap.
    let horizon = policy.horizon_days.min(MAX_HORIZON_DAYS) as u64;
    let empty = HashSet::new();
    let mut dates = Vec::new();
    for offset in 1..=horizon {
        let Some(date) = today.checked_add_days(Days::new(offset)) else {
            break;
        };
        if !is_date_eligible(date, policy, today) {
            continue;
        }
        let windows = match ranges.get_mut(&date) {
            Some(spans) => {
                spans.sort_by_key(|s| s.start);
                merge_overlapping(spans)
            }
            None => Vec::new(),
        };
        let taken = occupied.get(&date).unwrap_or(&empty);
        if free_in_catalog(policy, taken, &windows).next().is_some() {
            dates.push(date);
        }
    }
    dates
}
