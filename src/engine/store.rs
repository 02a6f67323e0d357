use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

use super::SharedCalendar;

/// Listing calendars plus reverse indexes from booking and interval ids to
/// their listing.
pub struct CalendarStore {
    calendars: DashMap<Ulid, SharedCalendar>,
    booking_to_listing: DashMap<Ulid, Ulid>,
    interval_to_listing: DashMap<Ulid, Ulid>,
}

impl Default for CalendarStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CalendarStore {
    pub fn new() -> Self {
        Self {
            calendars: DashMap::new(),
            booking_to_listing: DashMap::new(),
            interval_to_listing: DashMap::new(),
        }
    }

    // ── Calendars ────────────────────────────────────────────

    pub fn calendar_count(&self) -> usize {
        self.calendars.len()
    }

    pub fn get_calendar(&self, listing_id: &Ulid) -> Option<SharedCalendar> {
        self.calendars.get(listing_id).map(|e| e.value().clone())
    }

    pub fn get_or_create_calendar(&self, listing_id: Ulid) -> SharedCalendar {
        self.calendars
            .entry(listing_id)
            .or_insert_with(|| Arc::new(RwLock::new(ListingCalendar::new(listing_id))))
            .value()
            .clone()
    }

    pub fn listing_ids(&self) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = self.calendars.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    // ── Entity indexes ───────────────────────────────────────

    pub fn listing_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_listing.get(booking_id).map(|e| *e.value())
    }

    pub fn listing_for_interval(&self, interval_id: &Ulid) -> Option<Ulid> {
        self.interval_to_listing.get(interval_id).map(|e| *e.value())
    }

    fn add_interval(&self, cal: &mut ListingCalendar, interval: AvailabilityInterval) {
        self.interval_to_listing.insert(interval.id, interval.listing_id);
        cal.insert_interval(interval);
    }

    fn drop_interval(&self, cal: &mut ListingCalendar, id: Ulid) {
        cal.remove_interval(id);
        self.interval_to_listing.remove(&id);
    }

    // ── Event application ────────────────────────────────────

    /// Apply one WAL record to a calendar. The caller holds the calendar's
    /// write lock (or is the sole owner during replay).
    pub fn apply_event(&self, cal: &mut ListingCalendar, event: &Event) {
        match event {
            Event::DatesOpened { interval } => {
                self.add_interval(cal, interval.clone());
            }
            Event::DatesWithdrawn { id, .. } => {
                self.drop_interval(cal, *id);
            }
            Event::BookingCreated { booking } => {
                self.booking_to_listing.insert(booking.id, booking.listing_id);
                cal.bookings.insert(booking.id, booking.clone());
            }
            Event::BookingAmended {
                id,
                check_in,
                check_out,
                total_price,
                cancellation_deadline,
                ..
            } => {
                if let Some(b) = cal.bookings.get_mut(id) {
                    b.check_in = *check_in;
                    b.check_out = *check_out;
                    b.total_price = *total_price;
                    b.cancellation_deadline = *cancellation_deadline;
                }
            }
            Event::BookingConfirmed {
                id,
                consumed,
                remainders,
                held_days,
                rejected,
                ..
            } => {
                self.drop_interval(cal, *consumed);
                for r in remainders {
                    self.add_interval(cal, r.clone());
                }
                for other in rejected {
                    if let Some(b) = cal.bookings.get_mut(other) {
                        b.status = BookingStatus::Cancelled;
                    }
                }
                if let Some(b) = cal.bookings.get_mut(id) {
                    b.status = BookingStatus::Confirmed;
                    b.held_days = Some(*held_days);
                }
            }
            Event::BookingCancelled {
                id,
                restored,
                absorbed,
                ..
            } => {
                for a in absorbed {
                    self.drop_interval(cal, *a);
                }
                if let Some(r) = restored {
                    self.add_interval(cal, r.clone());
                }
                if let Some(b) = cal.bookings.get_mut(id) {
                    b.status = BookingStatus::Cancelled;
                }
            }
            Event::BookingCompleted { id, .. } => {
                if let Some(b) = cal.bookings.get_mut(id) {
                    b.status = BookingStatus::Completed;
                }
            }
        }
    }
}
