use chrono::{Days, NaiveDate};
use rust_decimal::Decimal;
use ulid::Ulid;

use crate::limits::*;
use crate::listing::ListingTerms;
use crate::model::*;

use super::{EngineError, ValidationError};

/// Lifecycle events a booking can receive after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Confirm,
    Cancel(Actor),
    Complete,
}

impl Transition {
    fn action(&self) -> &'static str {
        match self {
            Transition::Confirm => "confirm",
            Transition::Cancel(_) => "cancel",
            Transition::Complete => "complete",
        }
    }
}

pub fn total_price(price_per_night: Decimal, nights: i64) -> Decimal {
    price_per_night * Decimal::from(nights)
}

pub fn cancellation_deadline(check_in: NaiveDate, days_before: u32) -> NaiveDate {
    check_in
        .checked_sub_days(Days::new(u64::from(days_before)))
        .unwrap_or(NaiveDate::MIN)
}

/// Input checks that run before any availability lookup. Returns the night count.
pub(crate) fn validate_stay(
    check_in: NaiveDate,
    check_out: NaiveDate,
    today: NaiveDate,
    terms: &ListingTerms,
) -> Result<i64, EngineError> {
    if check_out <= check_in {
        return Err(ValidationError::CheckOutNotAfterCheckIn.into());
    }
    let nights = Stay::new(check_in, check_out).nights();
    if nights < i64::from(terms.minimum_stay) {
        return Err(ValidationError::BelowMinimumStay(terms.minimum_stay).into());
    }
    if nights > MAX_STAY_NIGHTS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    if check_in <= today {
        return Err(ValidationError::CheckInNotInFuture.into());
    }
    if (check_in - today).num_days() > MAX_BOOKING_HORIZON_DAYS {
        return Err(EngineError::LimitExceeded("check-in too far ahead"));
    }
    Ok(nights)
}

impl Booking {
    /// A new pending booking with price and deadline derived from `terms`.
    pub fn new(
        listing_id: Ulid,
        guest_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
        terms: &ListingTerms,
        today: NaiveDate,
    ) -> Result<Self, EngineError> {
        let nights = Stay::new(check_in, check_out).nights();
        if nights < 1 {
            return Err(ValidationError::CheckOutNotAfterCheckIn.into());
        }
        Ok(Self {
            id: Ulid::new(),
            listing_id,
            guest_id,
            check_in,
            check_out,
            price_per_night: terms.price_per_night,
            currency: terms.currency,
            total_price: total_price(terms.price_per_night, nights),
            status: BookingStatus::Pending,
            cancellation_deadline: cancellation_deadline(check_in, terms.cancellation_days_before),
            held_days: None,
            created_on: today,
        })
    }

    pub fn stay(&self) -> Stay {
        Stay::new(self.check_in, self.check_out)
    }

    pub fn nights(&self) -> i64 {
        self.stay().nights()
    }

    pub fn can_be_cancelled(&self, today: NaiveDate) -> bool {
        matches!(self.status, BookingStatus::Pending | BookingStatus::Confirmed)
            && today <= self.cancellation_deadline
    }

    /// The guest is currently staying.
    pub fn is_active(&self, today: NaiveDate) -> bool {
        self.status == BookingStatus::Confirmed
            && self.check_in <= today
            && today <= self.check_out
    }

    pub fn is_upcoming(&self, today: NaiveDate) -> bool {
        self.status == BookingStatus::Confirmed && self.check_in > today
    }

    /// Check `transition` against the lifecycle table, returning the target status.
    pub fn check_transition(
        &self,
        transition: Transition,
        today: NaiveDate,
    ) -> Result<BookingStatus, EngineError> {
        use BookingStatus::*;
        let invalid = || EngineError::InvalidState {
            id: self.id,
            status: self.status,
            action: transition.action(),
        };
        match (self.status, transition) {
            (Pending, Transition::Confirm) => Ok(Confirmed),
            (Pending, Transition::Cancel(_)) => Ok(Cancelled),
            (Confirmed, Transition::Cancel(Actor::Guest)) => {
                if today <= self.cancellation_deadline {
                    Ok(Cancelled)
                } else {
                    Err(EngineError::CancellationWindowClosed {
                        id: self.id,
                        deadline: self.cancellation_deadline,
                    })
                }
            }
            (Confirmed, Transition::Cancel(Actor::Host | Actor::Admin)) => Ok(Cancelled),
            (Confirmed, Transition::Complete) if self.check_out < today => Ok(Completed),
            _ => Err(invalid()),
        }
    }

    /// Price and deadline this pending booking would carry for new dates.
    /// The nightly rate stays the one captured at creation.
    pub(crate) fn rescheduled(
        &self,
        check_in: NaiveDate,
        check_out: NaiveDate,
        cancellation_days_before: u32,
    ) -> Result<(Decimal, NaiveDate), EngineError> {
        if self.status != BookingStatus::Pending {
            return Err(EngineError::InvalidState {
                id: self.id,
                status: self.status,
                action: "amend",
            });
        }
        let nights = Stay::new(check_in, check_out).nights();
        if nights < 1 {
            return Err(ValidationError::CheckOutNotAfterCheckIn.into());
        }
        Ok((
            total_price(self.price_per_night, nights),
            cancellation_deadline(check_in, cancellation_days_before),
        ))
    }
}
