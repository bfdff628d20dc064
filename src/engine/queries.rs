use chrono::NaiveDate;

use crate::limits::*;
use crate::model::*;

use super::calendar::{by_day, merge, CalendarEntry, DayMap};
use super::conflict::{Candidate, Slot};
use super::{Engine, EngineError};

/// Unreadable times count as touching.
fn touches<S: Slot>(slot: &S, candidate: &Candidate) -> bool {
    slot.span().map_or(true, |span| span.overlaps(&candidate.span))
}

fn page_size(limit: Option<usize>) -> Result<usize, EngineError> {
    match limit {
        Some(n) if n > MAX_PAGE_SIZE => Err(EngineError::LimitExceeded("page size too large")),
        Some(n) => Ok(n),
        None => Ok(DEFAULT_PAGE_SIZE),
    }
}

impl Engine {
    pub async fn list_facilities(&self) -> Vec<FacilityInfo> {
        let states: Vec<_> = self.facilities.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(states.len());
        for fs in states {
            let guard = fs.read().await;
            if guard.deleted {
                continue;
            }
            out.push(FacilityInfo {
                code: guard.code.clone(),
                name: guard.name.clone(),
            });
        }
        out.sort_by(|a, b| a.code.cmp(&b.code));
        out
    }

    pub async fn facility_name(&self, code: &str) -> Option<String> {
        let fs = self.get_facility(code)?;
        let name = fs.read().await.name.clone();
        Some(name)
    }

    /// Accepts a facility code, or a facility name in any letter case.
    pub async fn resolve_facility(&self, key: &str) -> Result<String, EngineError> {
        let key = key.trim();
        if self.facilities.contains_key(key) {
            return Ok(key.to_string());
        }
        self.list_facilities()
            .await
            .into_iter()
            .find(|f| f.name.eq_ignore_ascii_case(key))
            .map(|f| f.code)
            .ok_or_else(|| EngineError::NotFound(key.to_string()))
    }

    pub async fn get_user(&self, id: &str) -> Option<UserInfo> {
        self.users.read().await.get(id).map(User::info)
    }

    /// Ordered by id. `total` counts matches before `LIMIT`/`OFFSET`.
    pub async fn list_users(&self, filter: &UserFilter) -> Result<UserPage, EngineError> {
        let limit = page_size(filter.limit)?;
        let needle = filter.search.as_deref().map(str::to_lowercase);
        let users = self.users.read().await;

        let matching: Vec<&User> = users
            .values()
            .filter(|u| filter.role.is_none_or(|role| u.role == role))
            .filter(|u| match &needle {
                Some(n) => [&u.first_name, &u.last_name, &u.email, &u.id]
                    .iter()
                    .any(|field| field.to_lowercase().contains(n.as_str())),
                None => true,
            })
            .collect();

        Ok(UserPage {
            total: matching.len(),
            users: matching
                .into_iter()
                .skip(filter.offset)
                .take(limit)
                .map(User::info)
                .collect(),
        })
    }

    /// Sorted by `(date, start, id)`.
    pub async fn list_reservations(&self, filter: &ReservationFilter) -> Result<Vec<Reservation>, EngineError> {
        let codes: Vec<String> = match (&filter.id, &filter.facility) {
            (Some(id), _) => self.facility_for_booking(id).into_iter().collect(),
            (None, Some(key)) => vec![self.resolve_facility(key).await?],
            (None, None) => self.facilities.iter().map(|e| e.key().clone()).collect(),
        };

        let mut out = Vec::new();
        for code in codes {
            let Some(fs) = self.get_facility(&code) else { continue };
            let guard = fs.read().await;
            let rows = match filter.date {
                Some(date) => guard.reservations_on(date),
                None => &guard.reservations[..],
            };
            out.extend(
                rows.iter()
                    .filter(|r| filter.id.as_ref().is_none_or(|id| &r.id == id))
                    .filter(|r| filter.status.is_none_or(|s| r.status == s))
                    .filter(|r| filter.requester.as_ref().is_none_or(|u| &r.requester == u))
                    .cloned(),
            );
        }
        out.sort_by(|a, b| (a.date, a.span.start, &a.id).cmp(&(b.date, b.span.start, &b.id)));
        Ok(out)
    }

    pub async fn list_manual_events(
        &self,
        facility: Option<&str>,
        date: Option<NaiveDate>,
    ) -> Result<Vec<ManualEvent>, EngineError> {
        let codes: Vec<String> = match facility {
            Some(key) => vec![self.resolve_facility(key).await?],
            None => self.facilities.iter().map(|e| e.key().clone()).collect(),
        };

        let mut out = Vec::new();
        for code in codes {
            let Some(fs) = self.get_facility(&code) else { continue };
            let guard = fs.read().await;
            match date {
                Some(d) => out.extend_from_slice(guard.manual_events_on(d)),
                None => out.extend_from_slice(&guard.manual_events),
            }
        }
        out.sort_by(|a, b| (a.date, a.span.start, a.id).cmp(&(b.date, b.span.start, b.id)));
        Ok(out)
    }

    /// Manual events merged with approved reservations for `from..=to`.
    pub async fn calendar(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        facility: Option<&str>,
    ) -> Result<DayMap, EngineError> {
        if to < from {
            return Err(EngineError::validation(format!("calendar range ends before it starts: {from} > {to}")));
        }
        if (to - from).num_days() >= MAX_CALENDAR_WINDOW_DAYS {
            return Err(EngineError::LimitExceeded("calendar window too wide"));
        }
        let codes: Vec<String> = match facility {
            Some(key) => vec![self.resolve_facility(key).await?],
            None => self.facilities.iter().map(|e| e.key().clone()).collect(),
        };

        let mut manual = Vec::new();
        let mut approved = Vec::new();
        for code in codes {
            let Some(fs) = self.get_facility(&code) else { continue };
            let guard = fs.read().await;
            manual.extend_from_slice(guard.manual_events_between(from, to));
            approved.extend(
                guard
                    .reservations_between(from, to)
                    .iter()
                    .filter(|r| r.status.is_confirmed())
                    .cloned(),
            );
        }

        Ok(merge(
            &by_day(&manual, |e: &ManualEvent| e.date),
            &by_day(&approved, |r: &Reservation| r.date),
        ))
    }

    /// Every booking a new reservation for this slot would collide with: non-rejected
    /// reservations and manual events. Empty means the slot is free.
    pub async fn conflicts(
        &self,
        facility: &str,
        date: NaiveDate,
        start: Option<WallTime>,
        end: Option<WallTime>,
    ) -> Result<Vec<CalendarEntry>, EngineError> {
        let code = self.resolve_facility(facility).await?;
        let candidate = Candidate::new(code.clone(), date, start, end)?;
        let fs = self.get_facility(&code).ok_or(EngineError::NotFound(code))?;
        let guard = fs.read().await;

        let mut out: Vec<CalendarEntry> = guard
            .manual_events_on(date)
            .iter()
            .filter(|e| touches(*e, &candidate))
            .map(CalendarEntry::from)
            .collect();
        out.extend(
            guard
                .reservations_on(date)
                .iter()
                .filter(|r| r.status.is_active() && touches(*r, &candidate))
                .map(CalendarEntry::from),
        );
        out.sort_by(|a, b| (a.span.start, a.span.end).cmp(&(b.span.start, b.span.end)));
        Ok(out)
    }

    /// Newest first.
    pub async fn activity_logs(
        &self,
        user_id: Option<&str>,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<ActivityLog>, EngineError> {
        let limit = page_size(limit)?;
        let log = self.activity.read().await;
        Ok(log
            .iter()
            .rev()
            .filter(|entry| user_id.is_none_or(|u| entry.user_id == u))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }
}
