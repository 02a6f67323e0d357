use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::availability::{open_days_within, query_covering};
use super::lifecycle::validate_stay;
use super::{Engine, EngineError, SharedCalendar};

impl Engine {
    pub fn get_calendar(&self, listing_id: &Ulid) -> Option<SharedCalendar> {
        self.store.get_calendar(listing_id)
    }

    pub fn listing_ids(&self) -> Vec<Ulid> {
        self.store.listing_ids()
    }

    /// Would a booking for these dates be accepted right now? Advisory only:
    /// the answer can change before the booking is confirmed.
    pub async fn check_availability(
        &self,
        listing_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
    ) -> bool {
        self.ensure_available(listing_id, check_in, check_out)
            .await
            .is_ok()
    }

    /// Like `check_availability`, but says why the dates are refused.
    pub async fn ensure_available(
        &self,
        listing_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
    ) -> Result<(), EngineError> {
        let terms = self.terms(listing_id).await?;
        validate_stay(check_in, check_out, self.clock.today(), &terms)?;
        let cal = self
            .store
            .get_calendar(&listing_id)
            .ok_or(EngineError::NotAvailable)?;
        let guard = cal.read().await;
        query_covering(&guard, check_in, check_out)
            .map(|_| ())
            .ok_or(EngineError::NotAvailable)
    }

    /// The open interval that would serve this stay, if any.
    pub async fn query_covering(
        &self,
        listing_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
    ) -> Option<AvailabilityInterval> {
        let cal = self.store.get_calendar(&listing_id)?;
        let guard = cal.read().await;
        query_covering(&guard, check_in, check_out).cloned()
    }

    pub async fn open_intervals(
        &self,
        listing_id: Ulid,
    ) -> Result<Vec<AvailabilityInterval>, EngineError> {
        let cal = self
            .store
            .get_calendar(&listing_id)
            .ok_or(EngineError::NotFound(listing_id))?;
        let guard = cal.read().await;
        Ok(guard.intervals.clone())
    }

    /// Open days of a listing within `[from, to]`, as disjoint sorted ranges.
    pub async fn open_days(
        &self,
        listing_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DayRange>, EngineError> {
        if to < from {
            return Err(super::ValidationError::EndBeforeStart.into());
        }
        let cal = self
            .store
            .get_calendar(&listing_id)
            .ok_or(EngineError::NotFound(listing_id))?;
        let guard = cal.read().await;
        Ok(open_days_within(&guard, &DayRange::new(from, to)))
    }

    pub async fn get_booking(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        let listing_id = self
            .store
            .listing_for_booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let cal = self
            .store
            .get_calendar(&listing_id)
            .ok_or(EngineError::NotFound(listing_id))?;
        let guard = cal.read().await;
        guard
            .bookings
            .get(&booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))
    }

    /// Bookings of a listing in id (creation) order, optionally by status.
    pub async fn list_bookings(
        &self,
        listing_id: Ulid,
        status: Option<BookingStatus>,
    ) -> Result<Vec<Booking>, EngineError> {
        let cal = self
            .store
            .get_calendar(&listing_id)
            .ok_or(EngineError::NotFound(listing_id))?;
        let guard = cal.read().await;
        Ok(guard
            .bookings
            .values()
            .filter(|b| status.is_none_or(|s| b.status == s))
            .cloned()
            .collect())
    }
}
