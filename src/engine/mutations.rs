use std::collections::HashMap;

use chrono::NaiveDate;
use tokio::sync::oneshot;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_batch_disjoint, check_no_conflict, validate_title, Against, Candidate};
use super::ids::{facility_prefix, next_id, RESERVATION_PREFIX};
use super::{apply_to_facility, Engine, EngineError, WalCommand};

/// A reservation as submitted through the request form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    /// Facility code or name.
    pub facility: String,
    pub date: NaiveDate,
    pub start: Option<WallTime>,
    pub end: Option<WallTime>,
    pub title: String,
    /// Defaults to the acting user.
    pub requester: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewManualEvent {
    /// Facility code or name.
    pub facility: String,
    pub date: NaiveDate,
    pub start: Option<WallTime>,
    pub end: Option<WallTime>,
    pub title: String,
}

/// Fields left `None` keep their current value. The facility never changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManualEventUpdate {
    pub date: Option<NaiveDate>,
    pub start: Option<WallTime>,
    pub end: Option<WallTime>,
    pub title: Option<String>,
}

fn validate_facility_name(name: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::validation("facility name must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("facility name too long"));
    }
    Ok(())
}

fn check_capacity(fs: &FacilityState) -> Result<(), EngineError> {
    if fs.booking_count() >= MAX_BOOKINGS_PER_FACILITY {
        return Err(EngineError::LimitExceeded("too many bookings on facility"));
    }
    Ok(())
}

impl Engine {
    // ── Facilities ───────────────────────────────────────────

    pub async fn create_facility(&self, actor: &Actor, name: &str) -> Result<FacilityInfo, EngineError> {
        let name = name.trim();
        validate_facility_name(name)?;
        if self.facilities.len() >= MAX_FACILITIES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many facilities"));
        }

        let codes_lock = self.facility_codes.lock().await;
        if self.facility_name_taken(name, None).await {
            return Err(EngineError::AlreadyExists(name.to_string()));
        }
        let existing: Vec<String> = self.facilities.iter().map(|e| e.key().clone()).collect();
        let code = next_id(&facility_prefix(name), existing.iter().map(String::as_str));

        let event = Event::FacilityCreated {
            code: code.clone(),
            name: name.to_string(),
        };
        self.wal_append(&event).await?;
        self.facilities.insert(
            code.clone(),
            std::sync::Arc::new(tokio::sync::RwLock::new(FacilityState::new(code.clone(), name.to_string()))),
        );
        self.notify.publish(&event);
        drop(codes_lock);

        self.record_activity(actor, format!("created facility {code}")).await;
        Ok(FacilityInfo {
            code,
            name: name.to_string(),
        })
    }

    pub async fn rename_facility(&self, actor: &Actor, code: &str, name: &str) -> Result<FacilityInfo, EngineError> {
        let name = name.trim();
        validate_facility_name(name)?;
        let codes_lock = self.facility_codes.lock().await;
        if self.facility_name_taken(name, Some(code)).await {
            return Err(EngineError::AlreadyExists(name.to_string()));
        }
        let mut guard = self.lock_facility(code).await?;
        let event = Event::FacilityRenamed {
            code: code.to_string(),
            name: name.to_string(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        drop(guard);
        drop(codes_lock);

        self.record_activity(actor, format!("renamed facility {code} to {name}")).await;
        Ok(FacilityInfo {
            code: code.to_string(),
            name: name.to_string(),
        })
    }

    /// Refused while any reservation or manual event references the facility.
    pub async fn delete_facility(&self, actor: &Actor, code: &str) -> Result<(), EngineError> {
        let codes_lock = self.facility_codes.lock().await;
        let mut guard = self.lock_facility(code).await?;
        if guard.booking_count() > 0 {
            return Err(EngineError::HasBookings(code.to_string()));
        }
        let event = Event::FacilityDeleted { code: code.to_string() };
        self.wal_append(&event).await?;
        guard.deleted = true;
        self.facilities.remove(code);
        self.notify.publish(&event);
        drop(guard);
        drop(codes_lock);

        self.record_activity(actor, format!("deleted facility {code}")).await;
        Ok(())
    }

    /// Case-insensitive name clash with any facility other than `except`.
    async fn facility_name_taken(&self, name: &str, except: Option<&str>) -> bool {
        let states: Vec<_> = self
            .facilities
            .iter()
            .filter(|e| Some(e.key().as_str()) != except)
            .map(|e| e.value().clone())
            .collect();
        for fs in states {
            if fs.read().await.name.eq_ignore_ascii_case(name) {
                return true;
            }
        }
        false
    }

    // ── Reservations ─────────────────────────────────────────

    /// Checked against every non-rejected reservation and every manual event on the
    /// same facility and day. The check, id allocation and insert happen under the
    /// facility write lock, so two overlapping submissions cannot both succeed.
    pub async fn submit_reservation(&self, actor: &Actor, req: NewReservation) -> Result<Reservation, EngineError> {
        validate_title(&req.title)?;
        let code = self.resolve_facility(&req.facility).await?;
        let candidate = Candidate::new(code.clone(), req.date, req.start, req.end)?;
        let requester = req.requester.unwrap_or_else(|| actor.user_id.clone());

        let users = self.users.read().await;
        if !users.contains_key(&requester) {
            return Err(EngineError::NotFound(requester));
        }

        let ids_lock = self.reservation_ids.lock().await;
        let mut guard = self.lock_facility(&code).await?;
        check_capacity(&guard)?;
        check_no_conflict(&guard, &candidate, Against::Active, None)?;

        let existing: Vec<String> = self
            .booking_to_facility
            .iter()
            .filter(|e| e.key().starts_with(RESERVATION_PREFIX))
            .map(|e| e.key().clone())
            .collect();
        let reservation = Reservation {
            id: next_id(RESERVATION_PREFIX, existing.iter().map(String::as_str)),
            facility: code,
            date: candidate.date,
            span: candidate.span,
            title: req.title.trim().to_string(),
            requester,
            status: ReservationStatus::Request,
            created_at: now_ms(),
        };
        let event = Event::ReservationSubmitted(reservation.clone());
        self.persist_and_apply(&mut guard, &event).await?;
        drop(guard);
        drop(ids_lock);
        drop(users);

        self.record_activity(actor, format!("submitted reservation {}", reservation.id))
            .await;
        Ok(reservation)
    }

    /// Moves a reservation along `request → pending → {approved | rejected}`.
    /// Approval re-checks the slot against approved reservations and manual events.
    pub async fn set_reservation_status(
        &self,
        actor: &Actor,
        id: &str,
        status: ReservationStatus,
    ) -> Result<Reservation, EngineError> {
        let mut guard = self.resolve_booking_write(id).await?;
        let current = guard
            .reservations
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;

        if !current.status.can_transition_to(status) {
            return Err(EngineError::InvalidTransition {
                from: current.status,
                to: status,
            });
        }
        if status.is_confirmed() {
            let candidate = Candidate {
                facility: current.facility.clone(),
                date: current.date,
                span: current.span,
            };
            check_no_conflict(&guard, &candidate, Against::Confirmed, Some(id))?;
        }

        let event = Event::ReservationStatusChanged {
            id: id.to_string(),
            facility: current.facility.clone(),
            status,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        drop(guard);

        let action = match status {
            ReservationStatus::Approved => format!("approved reservation {id}"),
            ReservationStatus::Rejected => format!("rejected reservation {id}"),
            other => format!("marked reservation {id} as {other}"),
        };
        self.record_activity(actor, action).await;
        Ok(Reservation { status, ..current })
    }

    // ── Manual events ────────────────────────────────────────

    pub async fn add_manual_event(&self, actor: &Actor, new: NewManualEvent) -> Result<ManualEvent, EngineError> {
        let mut added = self.add_manual_events(actor, vec![new]).await?;
        added.pop().ok_or_else(|| EngineError::validation("no event to add"))
    }

    /// All-or-nothing: every row is checked against stored confirmed bookings and
    /// against the other rows before any is committed.
    pub async fn add_manual_events(
        &self,
        actor: &Actor,
        batch: Vec<NewManualEvent>,
    ) -> Result<Vec<ManualEvent>, EngineError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        if batch.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }

        let now = now_ms();
        let mut events = Vec::with_capacity(batch.len());
        for new in batch {
            validate_title(&new.title)?;
            let code = self.resolve_facility(&new.facility).await?;
            let candidate = Candidate::new(code, new.date, new.start, new.end)?;
            events.push(ManualEvent {
                id: Ulid::new(),
                facility: candidate.facility,
                date: candidate.date,
                span: candidate.span,
                title: new.title.trim().to_string(),
                created_by: actor.user_id.clone(),
                created_at: now,
            });
        }
        check_batch_disjoint(&events)?;

        // Acquire write locks in sorted order to prevent deadlocks.
        let mut codes: Vec<&str> = events.iter().map(|e| e.facility.as_str()).collect();
        codes.sort_unstable();
        codes.dedup();

        let mut guards = HashMap::with_capacity(codes.len());
        for code in codes {
            let guard = self.lock_facility(code).await?;
            check_capacity(&guard)?;
            guards.insert(code.to_string(), guard);
        }

        // Phase 1: validate everything.
        for event in &events {
            let candidate = Candidate {
                facility: event.facility.clone(),
                date: event.date,
                span: event.span,
            };
            check_no_conflict(&guards[&event.facility], &candidate, Against::Confirmed, None)?;
        }

        // Phase 2: commit.
        for event in &events {
            let record = Event::ManualEventAdded(event.clone());
            self.wal_append(&record).await?;
            if let Some(guard) = guards.get_mut(&event.facility) {
                apply_to_facility(guard, &record, &self.booking_to_facility);
            }
            self.notify.publish(&record);
        }
        drop(guards);

        let action = match events.as_slice() {
            [one] => format!("added event {} on {} {}", one.title, one.facility, one.date),
            many => format!("added {} events", many.len()),
        };
        self.record_activity(actor, action).await;
        Ok(events)
    }

    pub async fn update_manual_event(
        &self,
        actor: &Actor,
        id: Ulid,
        update: ManualEventUpdate,
    ) -> Result<ManualEvent, EngineError> {
        let key = id.to_string();
        let mut guard = self.resolve_booking_write(&key).await?;
        let current = guard
            .manual_event(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(key.clone()))?;

        let title = match update.title {
            Some(title) => {
                validate_title(&title)?;
                title.trim().to_string()
            }
            None => current.title.clone(),
        };
        let candidate = Candidate::new(
            current.facility.clone(),
            update.date.unwrap_or(current.date),
            update.start.or(Some(current.span.start_time())),
            update.end.or(Some(current.span.end_time())),
        )?;
        check_no_conflict(&guard, &candidate, Against::Confirmed, Some(&key))?;

        let updated = ManualEvent {
            date: candidate.date,
            span: candidate.span,
            title,
            ..current
        };
        let event = Event::ManualEventUpdated(updated.clone());
        self.persist_and_apply(&mut guard, &event).await?;
        drop(guard);

        self.record_activity(actor, format!("updated event {}", updated.title)).await;
        Ok(updated)
    }

    pub async fn remove_manual_event(&self, actor: &Actor, id: Ulid) -> Result<ManualEvent, EngineError> {
        let key = id.to_string();
        let mut guard = self.resolve_booking_write(&key).await?;
        let current = guard
            .manual_event(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(key))?;
        let event = Event::ManualEventRemoved {
            id,
            facility: current.facility.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        drop(guard);

        self.record_activity(actor, format!("deleted event {}", current.title)).await;
        Ok(current)
    }

    /// Copy an event to another day under a fresh id.
    pub async fn duplicate_manual_event(
        &self,
        actor: &Actor,
        id: Ulid,
        date: NaiveDate,
    ) -> Result<ManualEvent, EngineError> {
        let key = id.to_string();
        let mut guard = self.resolve_booking_write(&key).await?;
        check_capacity(&guard)?;
        let source = guard
            .manual_event(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(key))?;

        let copy = ManualEvent {
            id: Ulid::new(),
            date,
            created_by: actor.user_id.clone(),
            created_at: now_ms(),
            ..source
        };
        let candidate = Candidate {
            facility: copy.facility.clone(),
            date: copy.date,
            span: copy.span,
        };
        check_no_conflict(&guard, &candidate, Against::Confirmed, None)?;

        let event = Event::ManualEventAdded(copy.clone());
        self.persist_and_apply(&mut guard, &event).await?;
        drop(guard);

        self.record_activity(actor, format!("duplicated event {} to {date}", copy.title))
            .await;
        Ok(copy)
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate the current state.
    /// Every lock that guards a WAL append is held until the new file is in place.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let users = self.users.read().await;
        let _codes_lock = self.facility_codes.lock().await;

        // Sorted acquisition, same as batch writers.
        let mut states: Vec<_> = self
            .facilities
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        let mut guards = Vec::with_capacity(states.len());
        for (_, fs) in states {
            let guard = fs.read_owned().await;
            if !guard.deleted {
                guards.push(guard);
            }
        }
        let activity = self.activity.read().await;

        let mut events = Vec::new();
        for guard in &guards {
            events.push(Event::FacilityCreated {
                code: guard.code.clone(),
                name: guard.name.clone(),
            });
            events.extend(guard.reservations.iter().cloned().map(Event::ReservationSubmitted));
            events.extend(guard.manual_events.iter().cloned().map(Event::ManualEventAdded));
        }
        events.extend(users.values().cloned().map(Event::UserCreated));
        events.extend(activity.iter().cloned().map(Event::ActivityLogged));

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
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
