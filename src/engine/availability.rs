use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

// ── Availability Index ────────────────────────────────────────────

/// The single open interval holding every night of `[check_in, check_out)`.
///
/// A stay straddling two intervals is not covered, even when the intervals
/// touch: intervals are never stitched together at query time.
pub fn query_covering(
    calendar: &ListingCalendar,
    check_in: NaiveDate,
    check_out: NaiveDate,
) -> Option<&AvailabilityInterval> {
    let nights = Stay::new(check_in, check_out).nights_range()?;
    calendar
        .overlapping(&nights)
        .find(|i| i.days().contains(&nights))
}

/// Split `interval` around `[start, end]`, returning the left and right
/// remainders. Either is absent when the removed range reaches that edge.
pub fn carve(
    interval: &AvailabilityInterval,
    start: NaiveDate,
    end: NaiveDate,
) -> (Option<AvailabilityInterval>, Option<AvailabilityInterval>) {
    let left = if interval.start < start {
        start
            .pred_opt()
            .map(|last| AvailabilityInterval::new(interval.listing_id, interval.start, last))
    } else {
        None
    };
    let right = if interval.end > end {
        end.succ_opt()
            .map(|first| AvailabilityInterval::new(interval.listing_id, first, interval.end))
    } else {
        None
    };
    (left, right)
}

/// A fresh open interval `[start, end]`, with no regard for its neighbours.
pub fn restore(listing_id: Ulid, start: NaiveDate, end: NaiveDate) -> AvailabilityInterval {
    AvailabilityInterval::new(listing_id, start, end)
}

/// Merge `days` with every open interval it touches, transitively.
///
/// Returns the merged interval and the ids of the intervals it replaces.
pub fn coalesce(calendar: &ListingCalendar, days: DayRange) -> (AvailabilityInterval, Vec<Ulid>) {
    let intervals = &calendar.intervals;
    let mut merged = days;
    let mut absorbed: Vec<Ulid> = Vec::new();

    // Sorted and disjoint: once a neighbour fails to touch, nothing beyond it can.
    let split = intervals.partition_point(|i| i.start < days.first);
    for interval in intervals[..split].iter().rev() {
        if !interval.days().touches(&merged) {
            break;
        }
        merged = merged.hull(&interval.days());
        absorbed.push(interval.id);
    }
    for interval in &intervals[split..] {
        if !interval.days().touches(&merged) {
            break;
        }
        merged = merged.hull(&interval.days());
        absorbed.push(interval.id);
    }
    (
        restore(calendar.listing_id, merged.first, merged.last),
        absorbed,
    )
}

/// All open days of a listing, clamped to `window`, as disjoint sorted ranges.
pub fn open_days_within(calendar: &ListingCalendar, window: &DayRange) -> Vec<DayRange> {
    calendar
        .overlapping(window)
        .map(|i| DayRange::new(i.start.max(window.first), i.end.min(window.last)))
        .collect()
}
