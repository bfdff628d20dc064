use chrono::NaiveDate;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// Anything that occupies a facility for part of a day.
pub trait Slot {
    fn facility(&self) -> &str;
    fn date(&self) -> NaiveDate;
    /// Occupied range; `Err` for times that cannot be interpreted.
    fn span(&self) -> Result<Span, TimeError>;
    /// Identifier reported back on conflict.
    fn slot_id(&self) -> String;
}

impl Slot for Reservation {
    fn facility(&self) -> &str {
        &self.facility
    }
    fn date(&self) -> NaiveDate {
        self.date
    }
    fn span(&self) -> Result<Span, TimeError> {
        Ok(self.span)
    }
    fn slot_id(&self) -> String {
        self.id.clone()
    }
}

impl Slot for ManualEvent {
    fn facility(&self) -> &str {
        &self.facility
    }
    fn date(&self) -> NaiveDate {
        self.date
    }
    fn span(&self) -> Result<Span, TimeError> {
        Ok(self.span)
    }
    fn slot_id(&self) -> String {
        self.id.to_string()
    }
}

/// A proposed booking, validated before any conflict check runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub facility: String,
    pub date: NaiveDate,
    pub span: Span,
}

impl Candidate {
    /// Missing or inverted times are rejected here, never treated as "no conflict".
    pub fn new(
        facility: impl Into<String>,
        date: NaiveDate,
        start: Option<WallTime>,
        end: Option<WallTime>,
    ) -> Result<Self, EngineError> {
        let start = start.ok_or_else(|| EngineError::validation("start time is required"))?;
        let end = end.ok_or_else(|| EngineError::validation("end time is required"))?;
        let span = Span::between(start, end).ok_or_else(|| {
            EngineError::validation(format!("start {start} must be before end {end}"))
        })?;
        Ok(Self {
            facility: facility.into(),
            date,
            span,
        })
    }
}

/// First existing slot on the candidate's facility and day that overlaps it.
/// Slots whose times cannot be read count as overlapping.
pub fn find_conflict<'a, S, I>(candidate: &Candidate, existing: I) -> Option<&'a S>
where
    S: Slot + 'a,
    I: IntoIterator<Item = &'a S>,
{
    existing.into_iter().find(|slot| {
        slot.facility() == candidate.facility
            && slot.date() == candidate.date
            && slot.span().map_or(true, |span| span.overlaps(&candidate.span))
    })
}

pub fn has_conflict<'a, S, I>(candidate: &Candidate, existing: I) -> bool
where
    S: Slot + 'a,
    I: IntoIterator<Item = &'a S>,
{
    find_conflict(candidate, existing).is_some()
}

/// Which stored bookings a new booking is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Against {
    /// Approved reservations and manual events.
    Confirmed,
    /// Everything not rejected, plus manual events.
    Active,
}

/// Check a candidate against a facility's stored bookings. Caller holds the facility lock.
/// `skip` excludes one booking by id (an event being edited).
pub(crate) fn check_no_conflict(
    fs: &FacilityState,
    candidate: &Candidate,
    against: Against,
    skip: Option<&str>,
) -> Result<(), EngineError> {
    let keep = |id: String| skip != Some(id.as_str());

    let reservations = fs.reservations_on(candidate.date).iter().filter(|r| match against {
        Against::Confirmed => r.status.is_confirmed(),
        Against::Active => r.status.is_active(),
    });
    if let Some(hit) = find_conflict(candidate, reservations.filter(|r| keep(r.slot_id()))) {
        return Err(EngineError::Conflict { with: hit.slot_id() });
    }

    let manual = fs.manual_events_on(candidate.date).iter();
    if let Some(hit) = find_conflict(candidate, manual.filter(|e| keep(e.slot_id()))) {
        return Err(EngineError::Conflict { with: hit.slot_id() });
    }
    Ok(())
}

/// Pairwise check inside a batch; stored bookings are checked separately.
pub(crate) fn check_batch_disjoint(batch: &[ManualEvent]) -> Result<(), EngineError> {
    for (i, a) in batch.iter().enumerate() {
        for b in &batch[i + 1..] {
            if a.facility == b.facility && a.date == b.date && a.span.overlaps(&b.span) {
                return Err(EngineError::Conflict { with: b.id.to_string() });
            }
        }
    }
    Ok(())
}

pub(crate) fn validate_title(title: &str) -> Result<(), EngineError> {
    if title.trim().is_empty() {
        return Err(EngineError::validation("title must not be empty"));
    }
    if title.len() > MAX_TITLE_LEN {
        return Err(EngineError::LimitExceeded("title too long"));
    }
    Ok(())
}
