pub mod calendar;
mod conflict;
mod error;
pub mod ids;
mod mutations;
mod queries;
mod users;
#[cfg(test)]
mod tests;

pub use calendar::{CalendarEntry, DayMap, Source};
pub use conflict::{find_conflict, has_conflict, Candidate, Slot};
pub use error::EngineError;
pub use mutations::{ManualEventUpdate, NewManualEvent, NewReservation};
pub use users::{NewUser, UserUpdate};

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::warn;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedFacilityState = Arc<RwLock<FacilityState>>;

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
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(batch, &result);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
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
            let result = Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// All state of one tenant: facilities with their bookings, users and the activity log.
///
/// Lock order, outermost first: `users`, `reservation_ids`, facility locks (sorted by
/// code when several are held), `activity`.
pub struct Engine {
    pub(super) facilities: DashMap<String, SharedFacilityState>,
    pub(super) users: RwLock<BTreeMap<String, User>>,
    pub(super) activity: RwLock<Vec<ActivityLog>>,
    /// Reverse lookup: booking id (reservation or manual event) → facility code.
    pub(super) booking_to_facility: DashMap<String, String>,
    /// Held across reservation id allocation and insert.
    pub(super) reservation_ids: Mutex<()>,
    /// Held across facility code allocation and insert.
    pub(super) facility_codes: Mutex<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
}

/// Apply a facility-scoped event. No locking; the caller holds the facility lock.
fn apply_to_facility(fs: &mut FacilityState, event: &Event, index: &DashMap<String, String>) {
    match event {
        Event::FacilityRenamed { name, .. } => fs.name = name.clone(),
        Event::ReservationSubmitted(r) => {
            index.insert(r.id.clone(), fs.code.clone());
            fs.insert_reservation(r.clone());
        }
        Event::ReservationStatusChanged { id, status, .. } => {
            if let Some(r) = fs.reservation_mut(id) {
                r.status = *status;
            }
        }
        Event::ManualEventAdded(e) => {
            index.insert(e.id.to_string(), fs.code.clone());
            fs.insert_manual_event(e.clone());
        }
        Event::ManualEventUpdated(e) => {
            fs.remove_manual_event(e.id);
            fs.insert_manual_event(e.clone());
        }
        Event::ManualEventRemoved { id, .. } => {
            fs.remove_manual_event(*id);
            index.remove(&id.to_string());
        }
        // Created/Deleted are handled at the map level; users and logs aren't facility-scoped.
        Event::FacilityCreated { .. }
        | Event::FacilityDeleted { .. }
        | Event::UserCreated(_)
        | Event::UserUpdated(_)
        | Event::UserDeleted { .. }
        | Event::ActivityLogged(_) => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let facilities: DashMap<String, FacilityState> = DashMap::new();
        let booking_to_facility = DashMap::new();
        let mut users = BTreeMap::new();
        let mut activity = Vec::new();

        for event in events {
            match event {
                Event::FacilityCreated { code, name } => {
                    facilities.insert(code.clone(), FacilityState::new(code, name));
                }
                Event::FacilityDeleted { code } => {
                    facilities.remove(&code);
                }
                Event::UserCreated(user) | Event::UserUpdated(user) => {
                    users.insert(user.id.clone(), user);
                }
                Event::UserDeleted { id } => {
                    users.remove(&id);
                }
                Event::ActivityLogged(entry) => activity.push(entry),
                other => {
                    let code = other.facility().map(str::to_string);
                    match code.and_then(|c| facilities.get_mut(&c)) {
                        Some(mut fs) => apply_to_facility(&mut fs, &other, &booking_to_facility),
                        None => warn!("replay: dropping event for unknown facility: {other:?}"),
                    }
                }
            }
        }

        let facilities = facilities
            .into_iter()
            .map(|(code, fs)| (code, Arc::new(RwLock::new(fs))))
            .collect();

        Ok(Self {
            facilities,
            users: RwLock::new(users),
            activity: RwLock::new(activity),
            booking_to_facility,
            reservation_ids: Mutex::new(()),
            facility_codes: Mutex::new(()),
            wal_tx,
            notify,
        })
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_facility(&self, code: &str) -> Option<SharedFacilityState> {
        self.facilities.get(code).map(|e| e.value().clone())
    }

    pub fn facility_for_booking(&self, booking_id: &str) -> Option<String> {
        self.booking_to_facility.get(booking_id).map(|e| e.value().clone())
    }

    /// WAL-append + apply + notify for a facility-scoped event.
    pub(super) async fn persist_and_apply(&self, fs: &mut FacilityState, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_facility(fs, event, &self.booking_to_facility);
        self.notify.publish(event);
        Ok(())
    }

    /// Write lock on a live facility. A facility deleted while the caller waited
    /// for the lock is reported as `NotFound`.
    pub(super) async fn lock_facility(
        &self,
        code: &str,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<FacilityState>, EngineError> {
        let fs = self
            .get_facility(code)
            .ok_or_else(|| EngineError::NotFound(code.to_string()))?;
        let guard = fs.write_owned().await;
        if guard.deleted {
            return Err(EngineError::NotFound(code.to_string()));
        }
        Ok(guard)
    }

    /// Lookup booking → facility, then lock the facility.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &str,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<FacilityState>, EngineError> {
        let code = self
            .facility_for_booking(booking_id)
            .ok_or_else(|| EngineError::NotFound(booking_id.to_string()))?;
        self.lock_facility(&code).await
    }

    /// Append to the activity log. The mutation it describes is already committed,
    /// so a failure here is logged rather than returned.
    pub(super) async fn record_activity(&self, actor: &Actor, action: String) {
        let entry = ActivityLog {
            id: ulid::Ulid::new(),
            user_id: actor.user_id.clone(),
            action,
            ip_address: actor.ip_address.clone(),
            timestamp: now_ms(),
        };
        let event = Event::ActivityLogged(entry.clone());
        let mut log = self.activity.write().await;
        match self.wal_append(&event).await {
            Ok(()) => {
                log.push(entry);
                self.notify.publish(&event);
            }
            Err(e) => warn!("activity log append failed for {}: {e}", actor.user_id),
        }
    }
}
