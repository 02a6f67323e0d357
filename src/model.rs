use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// End date of an open-ended availability interval.
pub const OPEN_END: NaiveDate = NaiveDate::MAX;

/// Closed range of calendar days `[first, last]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DayRange {
    pub first: NaiveDate,
    pub last: NaiveDate,
}

impl DayRange {
    pub fn new(first: NaiveDate, last: NaiveDate) -> Self {
        debug_assert!(first <= last, "DayRange first must not be after last");
        Self { first, last }
    }

    pub fn len_days(&self) -> i64 {
        (self.last - self.first).num_days() + 1
    }

    pub fn contains_day(&self, day: NaiveDate) -> bool {
        self.first <= day && day <= self.last
    }

    pub fn contains(&self, other: &DayRange) -> bool {
        self.first <= other.first && other.last <= self.last
    }

    pub fn overlaps(&self, other: &DayRange) -> bool {
        self.first <= other.last && other.first <= self.last
    }

    /// Overlapping, or adjacent with no day in between.
    pub fn touches(&self, other: &DayRange) -> bool {
        self.overlaps(other)
            || self.last.succ_opt() == Some(other.first)
            || other.last.succ_opt() == Some(self.first)
    }

    /// Smallest range containing both.
    pub fn hull(&self, other: &DayRange) -> DayRange {
        DayRange::new(self.first.min(other.first), self.last.max(other.last))
    }
}

/// Half-open stay `[check_in, check_out)`: one night per day from check-in up to,
/// but not including, check-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stay {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

impl Stay {
    pub fn new(check_in: NaiveDate, check_out: NaiveDate) -> Self {
        Self { check_in, check_out }
    }

    pub fn nights(&self) -> i64 {
        (self.check_out - self.check_in).num_days()
    }

    pub fn overlaps(&self, other: &Stay) -> bool {
        self.check_in < other.check_out && self.check_out > other.check_in
    }

    /// The nights as a closed day range, or `None` for an empty stay.
    pub fn nights_range(&self) -> Option<DayRange> {
        if self.check_out <= self.check_in {
            return None;
        }
        let last = self.check_out.pred_opt()?;
        Some(DayRange::new(self.check_in, last))
    }
}

/// An open date range on a listing's calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityInterval {
    pub id: Ulid,
    pub listing_id: Ulid,
    pub start: NaiveDate,
    /// Inclusive. `OPEN_END` means the interval never ends.
    pub end: NaiveDate,
}

impl AvailabilityInterval {
    pub fn new(listing_id: Ulid, start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start <= end, "interval end must not be before start");
        Self {
            id: Ulid::new(),
            listing_id,
            start,
            end,
        }
    }

    pub fn is_open_ended(&self) -> bool {
        self.end == OPEN_END
    }

    pub fn days(&self) -> DayRange {
        DayRange::new(self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Eur,
    Usd,
    Gbp,
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Currency::Eur => "EUR",
            Currency::Usd => "USD",
            Currency::Gbp => "GBP",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Cancelled | BookingStatus::Completed)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who asked for a cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Actor {
    Guest,
    Host,
    Admin,
}

impl Actor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Actor::Guest => "guest",
            Actor::Host => "host",
            Actor::Admin => "admin",
        }
    }
}

/// What cancelling a confirmed booking gives back to the calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestorePolicy {
    /// Restore `[check_in, check_out - 1]` as a new interval, never merged
    /// with its neighbours.
    #[default]
    Fragment,
    /// Restore exactly the days the confirmation took and merge them with
    /// every touching open interval.
    Coalesce,
}

impl FromStr for RestorePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fragment" => Ok(RestorePolicy::Fragment),
            "coalesce" => Ok(RestorePolicy::Coalesce),
            other => Err(format!("unknown restore policy: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub listing_id: Ulid,
    pub guest_id: Ulid,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    /// Snapshot of the listing's nightly rate at creation.
    pub price_per_night: Decimal,
    pub currency: Currency,
    pub total_price: Decimal,
    pub status: BookingStatus,
    /// Last day the guest may cancel a confirmed booking.
    pub cancellation_deadline: NaiveDate,
    /// Days withdrawn from availability by the confirmation.
    pub held_days: Option<DayRange>,
    pub created_on: NaiveDate,
}

/// One listing's calendar: open intervals plus every booking made against it.
#[derive(Debug, Clone)]
pub struct ListingCalendar {
    pub listing_id: Ulid,
    /// Open intervals, sorted by `start`, pairwise disjoint.
    pub intervals: Vec<AvailabilityInterval>,
    pub bookings: BTreeMap<Ulid, Booking>,
}

impl ListingCalendar {
    pub fn new(listing_id: Ulid) -> Self {
        Self {
            listing_id,
            intervals: Vec::new(),
            bookings: BTreeMap::new(),
        }
    }

    /// Insert interval maintaining sort order by start.
    pub fn insert_interval(&mut self, interval: AvailabilityInterval) {
        let pos = self
            .intervals
            .binary_search_by_key(&interval.start, |i| i.start)
            .unwrap_or_else(|e| e);
        self.intervals.insert(pos, interval);
    }

    pub fn remove_interval(&mut self, id: Ulid) -> Option<AvailabilityInterval> {
        let pos = self.intervals.iter().position(|i| i.id == id)?;
        Some(self.intervals.remove(pos))
    }

    /// Intervals sharing at least one day with `query`.
    pub fn overlapping(&self, query: &DayRange) -> impl Iterator<Item = &AvailabilityInterval> {
        // Everything at index >= right_bound starts after query.last.
        let right_bound = self.intervals.partition_point(|i| i.start <= query.last);
        self.intervals[..right_bound]
            .iter()
            .filter(move |i| i.end >= query.first)
    }

    pub fn bookings_with_status(&self, status: BookingStatus) -> impl Iterator<Item = &Booking> {
        self.bookings.values().filter(move |b| b.status == status)
    }
}

/// WAL record. Each variant is one complete unit of work on one listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    DatesOpened {
        interval: AvailabilityInterval,
    },
    DatesWithdrawn {
        id: Ulid,
        listing_id: Ulid,
    },
    /// A new pending booking, or a full snapshot written by compaction.
    BookingCreated {
        booking: Booking,
    },
    BookingAmended {
        id: Ulid,
        listing_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
        total_price: Decimal,
        cancellation_deadline: NaiveDate,
    },
    BookingConfirmed {
        id: Ulid,
        listing_id: Ulid,
        /// Covering interval removed by the carve.
        consumed: Ulid,
        remainders: Vec<AvailabilityInterval>,
        held_days: DayRange,
        /// Overlapping pending bookings cancelled by this confirmation.
        rejected: Vec<Ulid>,
    },
    BookingCancelled {
        id: Ulid,
        listing_id: Ulid,
        restored: Option<AvailabilityInterval>,
        /// Open intervals merged into `restored`.
        absorbed: Vec<Ulid>,
    },
    BookingCompleted {
        id: Ulid,
        listing_id: Ulid,
    },
}

impl Event {
    pub fn listing_id(&self) -> Ulid {
        match self {
            Event::DatesOpened { interval } => interval.listing_id,
            Event::BookingCreated { booking } => booking.listing_id,
            Event::DatesWithdrawn { listing_id, .. }
            | Event::BookingAmended { listing_id, .. }
            | Event::BookingConfirmed { listing_id, .. }
            | Event::BookingCancelled { listing_id, .. }
            | Event::BookingCompleted { listing_id, .. } => *listing_id,
        }
    }
}

// ── Operation results ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmOutcome {
    pub booking: Booking,
    pub remainders: Vec<AvailabilityInterval>,
    pub rejected: Vec<Ulid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn interval(start: NaiveDate, end: NaiveDate) -> AvailabilityInterval {
        AvailabilityInterval::new(Ulid::new(), start, end)
    }

    #[test]
    fn day_range_basics() {
        let r = DayRange::new(d(2025, 6, 1), d(2025, 6, 30));
        assert_eq!(r.len_days(), 30);
        assert!(r.contains_day(d(2025, 6, 1)));
        assert!(r.contains_day(d(2025, 6, 30))); // inclusive
        assert!(!r.contains_day(d(2025, 7, 1)));
    }

    #[test]
    fn day_range_touches_adjacent() {
        let a = DayRange::new(d(2025, 6, 1), d(2025, 6, 9));
        let b = DayRange::new(d(2025, 6, 10), d(2025, 6, 14));
        let c = DayRange::new(d(2025, 6, 16), d(2025, 6, 30));
        assert!(!a.overlaps(&b));
        assert!(a.touches(&b));
        assert!(b.touches(&a));
        assert!(!b.touches(&c)); // one-day gap
        assert_eq!(a.hull(&b), DayRange::new(d(2025, 6, 1), d(2025, 6, 14)));
    }

    #[test]
    fn touches_open_end_does_not_overflow() {
        let open = DayRange::new(d(2025, 6, 1), OPEN_END);
        let later = DayRange::new(d(2026, 1, 1), d(2026, 1, 2));
        assert!(open.touches(&later));
    }

    #[test]
    fn stay_nights_and_overlap() {
        let a = Stay::new(d(2025, 6, 10), d(2025, 6, 15));
        let b = Stay::new(d(2025, 6, 14), d(2025, 6, 16));
        let c = Stay::new(d(2025, 6, 15), d(2025, 6, 20));
        assert_eq!(a.nights(), 5);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // back-to-back, half-open
        assert_eq!(
            a.nights_range(),
            Some(DayRange::new(d(2025, 6, 10), d(2025, 6, 14)))
        );
        assert_eq!(Stay::new(d(2025, 6, 10), d(2025, 6, 10)).nights_range(), None);
    }

    #[test]
    fn calendar_keeps_intervals_sorted() {
        let mut cal = ListingCalendar::new(Ulid::new());
        cal.insert_interval(interval(d(2025, 8, 1), d(2025, 8, 31)));
        cal.insert_interval(interval(d(2025, 6, 1), d(2025, 6, 30)));
        cal.insert_interval(interval(d(2025, 7, 1), d(2025, 7, 31)));
        let starts: Vec<_> = cal.intervals.iter().map(|i| i.start).collect();
        assert_eq!(starts, vec![d(2025, 6, 1), d(2025, 7, 1), d(2025, 8, 1)]);
    }

    #[test]
    fn calendar_remove_interval() {
        let mut cal = ListingCalendar::new(Ulid::new());
        let i = interval(d(2025, 6, 1), d(2025, 6, 30));
        let id = i.id;
        cal.insert_interval(i);
        assert!(cal.remove_interval(Ulid::new()).is_none());
        assert_eq!(cal.remove_interval(id).map(|i| i.id), Some(id));
        assert!(cal.intervals.is_empty());
    }

    #[test]
    fn overlapping_filters_both_sides() {
        let mut cal = ListingCalendar::new(Ulid::new());
        cal.insert_interval(interval(d(2025, 5, 1), d(2025, 5, 31)));
        cal.insert_interval(interval(d(2025, 6, 10), d(2025, 6, 20)));
        cal.insert_interval(interval(d(2025, 7, 1), OPEN_END));

        let q = DayRange::new(d(2025, 6, 1), d(2025, 6, 15));
        let hits: Vec<_> = cal.overlapping(&q).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].start, d(2025, 6, 10));

        let far = DayRange::new(d(2030, 1, 1), d(2030, 1, 5));
        let hits: Vec<_> = cal.overlapping(&far).collect();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].is_open_ended());
    }

    #[test]
    fn overlapping_single_shared_day() {
        let mut cal = ListingCalendar::new(Ulid::new());
        cal.insert_interval(interval(d(2025, 6, 1), d(2025, 6, 10)));
        let q = DayRange::new(d(2025, 6, 10), d(2025, 6, 12));
        assert_eq!(cal.overlapping(&q).count(), 1);
        let q = DayRange::new(d(2025, 6, 11), d(2025, 6, 12));
        assert_eq!(cal.overlapping(&q).count(), 0);
    }

    #[test]
    fn restore_policy_parses() {
        assert_eq!("fragment".parse::<RestorePolicy>(), Ok(RestorePolicy::Fragment));
        assert_eq!(" Coalesce ".parse::<RestorePolicy>(), Ok(RestorePolicy::Coalesce));
        assert!("merge".parse::<RestorePolicy>().is_err());
        assert_eq!(RestorePolicy::default(), RestorePolicy::Fragment);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let listing_id = Ulid::new();
        let event = Event::BookingCreated {
            booking: Booking {
                id: Ulid::new(),
                listing_id,
                guest_id: Ulid::new(),
                check_in: d(2025, 6, 10),
                check_out: d(2025, 6, 15),
                price_per_night: Decimal::new(12050, 2),
                currency: Currency::Eur,
                total_price: Decimal::new(60250, 2),
                status: BookingStatus::Pending,
                cancellation_deadline: d(2025, 6, 8),
                held_days: None,
                created_on: d(2025, 5, 1),
            },
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
        assert_eq!(decoded.listing_id(), listing_id);
    }
}
