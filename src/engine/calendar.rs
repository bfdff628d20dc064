use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

/// Where a calendar entry came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Source {
    Manual(Ulid),
    Reservation(String),
}

impl Source {
    pub fn kind(&self) -> &'static str {
        match self {
            Source::Manual(_) => "manual",
            Source::Reservation(_) => "reservation",
        }
    }

    pub fn id(&self) -> String {
        match self {
            Source::Manual(id) => id.to_string(),
            Source::Reservation(id) => id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarEntry {
    pub facility: String,
    pub span: Span,
    pub title: String,
    pub source: Source,
}

impl CalendarEntry {
    fn dedup_key(&self) -> (&str, Span, &str) {
        (&self.facility, self.span, &self.title)
    }
}

impl From<&ManualEvent> for CalendarEntry {
    fn from(e: &ManualEvent) -> Self {
        Self {
            facility: e.facility.clone(),
            span: e.span,
            title: e.title.clone(),
            source: Source::Manual(e.id),
        }
    }
}

impl From<&Reservation> for CalendarEntry {
    fn from(r: &Reservation) -> Self {
        Self {
            facility: r.facility.clone(),
            span: r.span,
            title: r.title.clone(),
            source: Source::Reservation(r.id.clone()),
        }
    }
}

pub type DayMap = BTreeMap<NaiveDate, Vec<CalendarEntry>>;

/// Merge manual events and approved reservations into one calendar.
///
/// Per day, entries equal on (facility, start, end, title) appear once; the manual
/// copy wins since it is visited first. Each day is sorted by start, with end,
/// facility and title as tie-breakers so repeated merges produce identical output.
pub fn merge(manual: &DayMap, approved: &DayMap) -> DayMap {
    let mut merged = DayMap::new();
    let days: std::collections::BTreeSet<&NaiveDate> = manual.keys().chain(approved.keys()).collect();

    for day in days {
        let mut seen = HashSet::new();
        let mut entries: Vec<CalendarEntry> = Vec::new();
        let sources = manual.get(day).into_iter().chain(approved.get(day)).flatten();
        for entry in sources {
            if seen.insert(entry.dedup_key()) {
                entries.push(entry.clone());
            }
        }
        if entries.is_empty() {
            continue;
        }
        entries.sort_by(|a, b| {
            (a.span.start, a.span.end, &a.facility, &a.title)
                .cmp(&(b.span.start, b.span.end, &b.facility, &b.title))
        });
        merged.insert(*day, entries);
    }
    merged
}

/// Group bookings by day for [`merge`].
pub fn by_day<'a, T, I>(items: I, date_of: impl Fn(&T) -> NaiveDate) -> DayMap
where
    T: 'a,
    I: IntoIterator<Item = &'a T>,
    CalendarEntry: From<&'a T>,
{
    let mut map = DayMap::new();
    for item in items {
        map.entry(date_of(item)).or_default().push(CalendarEntry::from(item));
    }
    map
}
