mod availability;
mod error;
mod lifecycle;
mod mutations;
mod queries;
mod store;

pub use availability::{carve, coalesce, open_days_within, query_covering, restore};
pub use error::{EngineError, ValidationError};
pub use lifecycle::{cancellation_deadline, total_price, Transition};
pub use store::CalendarStore;

use std::io;
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::clock::Clock;
use crate::listing::{ListingDirectory, ListingTerms};
use crate::model::*;
use crate::wal::Wal;

pub type SharedCalendar = Arc<RwLock<ListingCalendar>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends.
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders with the batch result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                if let Err(e) = &result {
                    tracing::error!(error = %e, events = batch.len(), "WAL flush failed");
                }
                respond_batch(batch, &result);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

/// Buffer and sync the whole batch. On any failure the batch is cut back out
/// of the log, so records reported as failed can never surface on replay.
fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    if result.is_err() {
        wal.discard_unsynced().unwrap_or_else(|e| {
            tracing::error!(error = %e, "WAL rollback failed, retrying before next append");
        });
    }
    result
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let batch = vec![(event, response)];
            let result = flush_batch(wal, &batch);
            respond_batch(batch, &result);
        }
    }
}

/// Write access to one listing's calendar, paired with a shared hold on the
/// commit gate so compaction never snapshots mid-mutation.
pub(crate) struct CalendarWrite {
    _gate: OwnedRwLockReadGuard<()>,
    guard: OwnedRwLockWriteGuard<ListingCalendar>,
}

impl Deref for CalendarWrite {
    type Target = ListingCalendar;

    fn deref(&self) -> &ListingCalendar {
        &self.guard
    }
}

impl DerefMut for CalendarWrite {
    fn deref_mut(&mut self) -> &mut ListingCalendar {
        &mut self.guard
    }
}

/// The reservation coordinator: every operation on listings and bookings.
pub struct Engine {
    pub(crate) store: CalendarStore,
    pub(crate) wal_tx: mpsc::Sender<WalCommand>,
    /// Mutations hold it shared; compaction holds it exclusively.
    pub(crate) commit_gate: Arc<RwLock<()>>,
    pub(crate) listings: Arc<dyn ListingDirectory>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) policy: RestorePolicy,
}

impl Engine {
    /// Replay the WAL at `wal_path` and start the background writer.
    /// Must be called inside a tokio runtime.
    pub fn new(
        wal_path: PathBuf,
        listings: Arc<dyn ListingDirectory>,
        clock: Arc<dyn Clock>,
        policy: RestorePolicy,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            store: CalendarStore::new(),
            wal_tx,
            commit_gate: Arc::new(RwLock::new(())),
            listings,
            clock,
            policy,
        };

        // Sole owner of every calendar here, so try_write never contends.
        for event in &events {
            let cal = engine.store.get_or_create_calendar(event.listing_id());
            let mut guard = cal
                .try_write()
                .map_err(|_| io::Error::other("replay: calendar already locked"))?;
            engine.store.apply_event(&mut guard, event);
        }
        metrics::gauge!(crate::observability::LISTINGS_LOADED)
            .set(engine.store.calendar_count() as f64);
        tracing::info!(
            events = events.len(),
            listings = engine.store.calendar_count(),
            path = %wal_path.display(),
            "calendar store replayed"
        );

        Ok(engine)
    }

    pub fn restore_policy(&self) -> RestorePolicy {
        self.policy
    }

    pub fn today(&self) -> chrono::NaiveDate {
        self.clock.today()
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    /// Durably log the event, then apply it. Nothing is applied if the log write fails.
    pub(super) async fn persist_and_apply(
        &self,
        cal: &mut ListingCalendar,
        event: &Event,
    ) -> Result<(), EngineError> {
        if let Err(e) = self.wal_append(event).await {
            tracing::warn!(listing_id = %cal.listing_id, error = %e, "commit aborted");
            return Err(e);
        }
        self.store.apply_event(cal, event);
        Ok(())
    }

    pub(super) async fn terms(&self, listing_id: Ulid) -> Result<ListingTerms, EngineError> {
        self.listings
            .get_listing(listing_id)
            .await
            .ok_or(EngineError::NotFound(listing_id))
    }

    /// Take the commit gate, then the calendar's write lock. Always in this order.
    pub(crate) async fn lock_calendar(&self, cal: SharedCalendar) -> CalendarWrite {
        let gate = self.commit_gate.clone().read_owned().await;
        let guard = cal.write_owned().await;
        CalendarWrite { _gate: gate, guard }
    }

    /// Lookup booking → listing, acquire the listing's write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<(Ulid, CalendarWrite), EngineError> {
        let listing_id = self
            .store
            .listing_for_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let cal = self
            .store
            .get_calendar(&listing_id)
            .ok_or(EngineError::NotFound(listing_id))?;
        Ok((listing_id, self.lock_calendar(cal).await))
    }

    /// Lookup interval → listing, acquire the listing's write lock.
    pub(super) async fn resolve_interval_write(
        &self,
        interval_id: &Ulid,
    ) -> Result<(Ulid, CalendarWrite), EngineError> {
        let listing_id = self
            .store
            .listing_for_interval(interval_id)
            .ok_or(EngineError::NotFound(*interval_id))?;
        let cal = self
            .store
            .get_calendar(&listing_id)
            .ok_or(EngineError::NotFound(listing_id))?;
        Ok((listing_id, self.lock_calendar(cal).await))
    }
}
