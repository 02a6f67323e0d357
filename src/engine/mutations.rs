use chrono::NaiveDate;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{
    BOOKINGS_CREATED_TOTAL, CANCELLATIONS_TOTAL, COMPLETIONS_TOTAL, CONFIRMS_TOTAL,
    LISTINGS_LOADED, WAL_COMPACTIONS_TOTAL,
};

use super::availability::{carve, coalesce, query_covering, restore};
use super::lifecycle::{validate_stay, Transition};
use super::{Engine, EngineError, ValidationError, WalCommand};

impl Engine {
    // ── Host calendar ────────────────────────────────────────

    /// Open `[start, end]` for booking; `end = None` opens it indefinitely.
    pub async fn open_dates(
        &self,
        listing_id: Ulid,
        start: NaiveDate,
        end: Option<NaiveDate>,
    ) -> Result<AvailabilityInterval, EngineError> {
        let end = end.unwrap_or(OPEN_END);
        if end < start {
            return Err(ValidationError::EndBeforeStart.into());
        }
        self.terms(listing_id).await?;

        let cal = match self.store.get_calendar(&listing_id) {
            Some(cal) => cal,
            None => {
                if self.store.calendar_count() >= MAX_LISTINGS {
                    return Err(EngineError::LimitExceeded("too many listings"));
                }
                let cal = self.store.get_or_create_calendar(listing_id);
                metrics::gauge!(LISTINGS_LOADED).set(self.store.calendar_count() as f64);
                cal
            }
        };
        let mut guard = self.lock_calendar(cal).await;
        if guard.intervals.len() >= MAX_INTERVALS_PER_LISTING {
            return Err(EngineError::LimitExceeded("too many intervals on listing"));
        }

        let days = DayRange::new(start, end);
        if let Some(open) = guard.overlapping(&days).next() {
            return Err(EngineError::Overlap(open.id));
        }
        if let Some(held) = guard
            .bookings_with_status(BookingStatus::Confirmed)
            .find(|b| b.held_days.is_some_and(|h| h.overlaps(&days)))
        {
            return Err(EngineError::Overlap(held.id));
        }

        let interval = AvailabilityInterval::new(listing_id, start, end);
        let event = Event::DatesOpened {
            interval: interval.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(%listing_id, interval_id = %interval.id, %start, %end, "dates opened");
        Ok(interval)
    }

    /// Remove an open interval. Returns the listing it belonged to.
    pub async fn withdraw_dates(&self, interval_id: Ulid) -> Result<Ulid, EngineError> {
        let (listing_id, mut guard) = self.resolve_interval_write(&interval_id).await?;
        let event = Event::DatesWithdrawn {
            id: interval_id,
            listing_id,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(%listing_id, %interval_id, "dates withdrawn");
        Ok(listing_id)
    }

    // ── Bookings ─────────────────────────────────────────────

    /// Record a pending booking request. Dates must currently be open, but
    /// nothing is held until the booking is confirmed.
    pub async fn create_booking(
        &self,
        listing_id: Ulid,
        guest_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
    ) -> Result<Booking, EngineError> {
        let terms = self.terms(listing_id).await?;
        let today = self.clock.today();
        if let Err(e) = validate_stay(check_in, check_out, today, &terms) {
            debug!(%listing_id, %check_in, %check_out, error = %e, "booking request rejected");
            return Err(e);
        }
        let cal = self
            .store
            .get_calendar(&listing_id)
            .ok_or(EngineError::NotAvailable)?;
        let mut guard = self.lock_calendar(cal).await;
        if query_covering(&guard, check_in, check_out).is_none() {
            debug!(%listing_id, %check_in, %check_out, "booking request rejected: not available");
            return Err(EngineError::NotAvailable);
        }
        if guard.bookings.len() >= MAX_BOOKINGS_PER_LISTING {
            return Err(EngineError::LimitExceeded("too many bookings on listing"));
        }

        let booking = Booking::new(listing_id, guest_id, check_in, check_out, &terms, today)?;
        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(BOOKINGS_CREATED_TOTAL).increment(1);
        info!(
            booking_id = %booking.id,
            %listing_id,
            %check_in,
            %check_out,
            total_price = %booking.total_price,
            "booking created"
        );
        Ok(booking)
    }

    /// Move a pending booking to new dates. Price and cancellation deadline
    /// are re-derived; the nightly rate captured at creation is kept.
    pub async fn amend_booking(
        &self,
        booking_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
    ) -> Result<Booking, EngineError> {
        let (listing_id, mut guard) = self.resolve_booking_write(&booking_id).await?;
        let booking = guard
            .bookings
            .get(&booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))?;
        let terms = self.terms(listing_id).await?;
        let (total_price, cancellation_deadline) =
            booking.rescheduled(check_in, check_out, terms.cancellation_days_before)?;
        validate_stay(check_in, check_out, self.clock.today(), &terms)?;
        if query_covering(&guard, check_in, check_out).is_none() {
            return Err(EngineError::NotAvailable);
        }

        let event = Event::BookingAmended {
            id: booking_id,
            listing_id,
            check_in,
            check_out,
            total_price,
            cancellation_deadline,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(%booking_id, %listing_id, %check_in, %check_out, "booking amended");
        guard
            .bookings
            .get(&booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))
    }

    /// Confirm a pending booking: carve its dates out of availability and
    /// cancel every other pending booking competing for the same nights.
    pub async fn confirm(&self, booking_id: Ulid) -> Result<ConfirmOutcome, EngineError> {
        let listing_id = self
            .store
            .listing_for_booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let cal = self
            .store
            .get_calendar(&listing_id)
            .ok_or(EngineError::NotFound(listing_id))?;
        let terms = self.terms(listing_id).await?;
        let today = self.clock.today();

        // Advisory pass under the read lock; the decision is retaken below.
        {
            let guard = cal.read().await;
            let booking = guard
                .bookings
                .get(&booking_id)
                .ok_or(EngineError::NotFound(booking_id))?;
            booking.check_transition(Transition::Confirm, today)?;
            validate_stay(booking.check_in, booking.check_out, today, &terms)?;
            if query_covering(&guard, booking.check_in, booking.check_out).is_none() {
                metrics::counter!(CONFIRMS_TOTAL, "outcome" => "not_available").increment(1);
                debug!(%booking_id, %listing_id, "confirm rejected: not available");
                return Err(EngineError::NotAvailable);
            }
        }

        let mut guard = self.lock_calendar(cal).await;
        let booking = guard
            .bookings
            .get(&booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))?;
        // Pending in the advisory pass, so a cancellation since then means a
        // rival confirm took the dates.
        if booking.status == BookingStatus::Cancelled {
            return Err(lost_race(booking_id, listing_id));
        }
        booking.check_transition(Transition::Confirm, today)?;
        let covering = match query_covering(&guard, booking.check_in, booking.check_out) {
            Some(i) => i.clone(),
            None => return Err(lost_race(booking_id, listing_id)),
        };

        let (left, right) = carve(&covering, booking.check_in, booking.check_out);
        let remainders: Vec<AvailabilityInterval> = left.into_iter().chain(right).collect();
        let held_days = DayRange::new(booking.check_in, booking.check_out.min(covering.end));
        let stay = booking.stay();
        let rejected: Vec<Ulid> = guard
            .bookings_with_status(BookingStatus::Pending)
            .filter(|o| o.id != booking_id && o.stay().overlaps(&stay))
            .map(|o| o.id)
            .collect();

        let event = Event::BookingConfirmed {
            id: booking_id,
            listing_id,
            consumed: covering.id,
            remainders: remainders.clone(),
            held_days,
            rejected: rejected.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(CONFIRMS_TOTAL, "outcome" => "confirmed").increment(1);
        info!(
            %booking_id,
            %listing_id,
            remainders = remainders.len(),
            rejected = rejected.len(),
            "booking confirmed"
        );

        let booking = guard
            .bookings
            .get(&booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))?;
        Ok(ConfirmOutcome {
            booking,
            remainders,
            rejected,
        })
    }

    /// Cancel a booking on behalf of `actor`. Cancelling a confirmed booking
    /// gives its dates back and returns the interval that now holds them.
    pub async fn cancel(
        &self,
        booking_id: Ulid,
        actor: Actor,
    ) -> Result<Option<AvailabilityInterval>, EngineError> {
        let (listing_id, mut guard) = self.resolve_booking_write(&booking_id).await?;
        let booking = guard
            .bookings
            .get(&booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))?;
        if let Err(e) = booking.check_transition(Transition::Cancel(actor), self.clock.today()) {
            debug!(%booking_id, actor = actor.as_str(), error = %e, "cancel rejected");
            return Err(e);
        }

        let (restored, absorbed) = if booking.status == BookingStatus::Confirmed {
            match self.policy {
                RestorePolicy::Fragment => {
                    let nights = booking
                        .stay()
                        .nights_range()
                        .ok_or(ValidationError::CheckOutNotAfterCheckIn)?;
                    (Some(restore(listing_id, nights.first, nights.last)), Vec::new())
                }
                RestorePolicy::Coalesce => {
                    let days = match booking.held_days.or_else(|| booking.stay().nights_range()) {
                        Some(days) => days,
                        None => return Err(ValidationError::CheckOutNotAfterCheckIn.into()),
                    };
                    let (merged, absorbed) = coalesce(&guard, days);
                    (Some(merged), absorbed)
                }
            }
        } else {
            (None, Vec::new())
        };

        let event = Event::BookingCancelled {
            id: booking_id,
            listing_id,
            restored: restored.clone(),
            absorbed,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(CANCELLATIONS_TOTAL, "actor" => actor.as_str()).increment(1);
        info!(
            %booking_id,
            %listing_id,
            actor = actor.as_str(),
            was = booking.status.as_str(),
            restored = restored.is_some(),
            "booking cancelled"
        );
        Ok(restored)
    }

    /// Mark a confirmed booking as completed once its check-out day has passed.
    pub async fn complete(&self, booking_id: Ulid) -> Result<(), EngineError> {
        let (listing_id, mut guard) = self.resolve_booking_write(&booking_id).await?;
        let booking = guard
            .bookings
            .get(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        booking.check_transition(Transition::Complete, self.clock.today())?;

        let event = Event::BookingCompleted {
            id: booking_id,
            listing_id,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(COMPLETIONS_TOTAL).increment(1);
        info!(%booking_id, %listing_id, "booking completed");
        Ok(())
    }

    /// Confirmed bookings whose check-out day is before `today`.
    pub async fn collect_due_completions(&self, today: NaiveDate) -> Vec<Ulid> {
        let mut due = Vec::new();
        for listing_id in self.store.listing_ids() {
            let Some(cal) = self.store.get_calendar(&listing_id) else {
                continue;
            };
            let guard = cal.read().await;
            due.extend(
                guard
                    .bookings_with_status(BookingStatus::Confirmed)
                    .filter(|b| b.check_out < today)
                    .map(|b| b.id),
            );
        }
        due
    }

    /// Complete every confirmed booking whose stay is over. Returns how many
    /// were completed.
    pub async fn complete_due(&self) -> Result<usize, EngineError> {
        let due = self.collect_due_completions(self.clock.today()).await;
        let mut completed = 0;
        for booking_id in due {
            match self.complete(booking_id).await {
                Ok(()) => completed += 1,
                Err(e @ EngineError::Storage(_)) => return Err(e),
                // Cancelled or completed since it was collected.
                Err(e) => debug!(%booking_id, error = %e, "completion skipped"),
            }
        }
        Ok(completed)
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL as the minimal event set that recreates current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // Exclusive gate: no mutation is between its WAL append and its apply.
        let _gate = self.commit_gate.write().await;

        let mut events = Vec::new();
        for listing_id in self.store.listing_ids() {
            let Some(cal) = self.store.get_calendar(&listing_id) else {
                continue;
            };
            let guard = cal.read().await;
            events.extend(guard.intervals.iter().map(|interval| Event::DatesOpened {
                interval: interval.clone(),
            }));
            events.extend(guard.bookings.values().map(|booking| Event::BookingCreated {
                booking: booking.clone(),
            }));
        }
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        metrics::counter!(WAL_COMPACTIONS_TOTAL).increment(1);
        info!(events = count, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

fn lost_race(booking_id: Ulid, listing_id: Ulid) -> EngineError {
    metrics::counter!(CONFIRMS_TOTAL, "outcome" => "conflict").increment(1);
    warn!(%booking_id, %listing_id, "confirm lost race: dates no longer available");
    EngineError::Conflict(booking_id)
}
