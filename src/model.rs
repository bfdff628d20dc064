use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, used for audit timestamps.
pub type Ms = i64;

/// Minutes since local midnight.
pub type Minute = u16;

const MINUTES_PER_DAY: Minute = 24 * 60;

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeError {
    #[error("malformed time {0:?} (expected HH:MM)")]
    Time(String),
    #[error("malformed date {0:?} (expected YYYY-MM-DD)")]
    Date(String),
}

/// Wall-clock time of day, facility-local.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WallTime(Minute);

impl WallTime {
    pub fn from_hm(hour: u16, minute: u16) -> Option<Self> {
        if hour < 24 && minute < 60 {
            Some(Self(hour * 60 + minute))
        } else {
            None
        }
    }

    pub fn minutes(self) -> Minute {
        self.0
    }
}

impl FromStr for WallTime {
    type Err = TimeError;

    /// Accepts `HH:MM` and `HH:MM:SS` with zero seconds (the form Postgres `time` columns print).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || TimeError::Time(s.to_string());
        let mut parts = s.trim().split(':');
        let hour = parts.next().ok_or_else(bad)?;
        let minute = parts.next().ok_or_else(bad)?;
        if let Some(seconds) = parts.next()
            && seconds != "00" {
                return Err(bad());
            }
        if parts.next().is_some() || hour.is_empty() || hour.len() > 2 || minute.len() != 2 {
            return Err(bad());
        }
        let hour: u16 = hour.parse().map_err(|_| bad())?;
        let minute: u16 = minute.parse().map_err(|_| bad())?;
        Self::from_hm(hour, minute).ok_or_else(bad)
    }
}

impl fmt::Display for WallTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

pub fn parse_date(s: &str) -> Result<NaiveDate, TimeError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|_| TimeError::Date(s.to_string()))
}

/// Half-open interval `[start, end)` within one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Minute,
    pub end: Minute,
}

impl Span {
    pub fn new(start: Minute, end: Minute) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        debug_assert!(end <= MINUTES_PER_DAY, "Span must end within the day");
        Self { start, end }
    }

    /// `None` unless `start` is strictly before `end`.
    pub fn between(start: WallTime, end: WallTime) -> Option<Self> {
        (start < end).then(|| Self::new(start.minutes(), end.minutes()))
    }

    pub fn duration_minutes(&self) -> Minute {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn start_time(&self) -> WallTime {
        WallTime(self.start)
    }

    pub fn end_time(&self) -> WallTime {
        WallTime(self.end)
    }
}

// ── Reservations ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Request,
    Pending,
    Approved,
    Rejected,
}

impl ReservationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Request => "request",
            ReservationStatus::Pending => "pending",
            ReservationStatus::Approved => "approved",
            ReservationStatus::Rejected => "rejected",
        }
    }

    /// `request → pending → {approved | rejected}`; nothing else.
    pub fn can_transition_to(self, next: ReservationStatus) -> bool {
        matches!(
            (self, next),
            (ReservationStatus::Request, ReservationStatus::Pending)
                | (ReservationStatus::Pending, ReservationStatus::Approved)
                | (ReservationStatus::Pending, ReservationStatus::Rejected)
        )
    }

    /// Still occupying its slot (everything except rejected).
    pub fn is_active(self) -> bool {
        !matches!(self, ReservationStatus::Rejected)
    }

    pub fn is_confirmed(self) -> bool {
        matches!(self, ReservationStatus::Approved)
    }

    pub fn is_open(self) -> bool {
        matches!(self, ReservationStatus::Request | ReservationStatus::Pending)
    }
}

impl FromStr for ReservationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "request" => Ok(ReservationStatus::Request),
            "pending" => Ok(ReservationStatus::Pending),
            "approved" => Ok(ReservationStatus::Approved),
            "rejected" => Ok(ReservationStatus::Rejected),
            other => Err(format!("unknown reservation status: {other}")),
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: String,
    /// Facility code.
    pub facility: String,
    pub date: NaiveDate,
    pub span: Span,
    pub title: String,
    /// User id of the submitter.
    pub requester: String,
    pub status: ReservationStatus,
    pub created_at: Ms,
}

/// Staff-entered booking that skips the approval workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualEvent {
    pub id: Ulid,
    pub facility: String,
    pub date: NaiveDate,
    pub span: Span,
    pub title: String,
    pub created_by: String,
    pub created_at: Ms,
}

// ── Users ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    SuperAdmin,
    Admin,
    Staff,
    User,
}

impl Role {
    /// Lenient: `"Super Admin"`, `"super_admin"` and `"SUPERADMIN"` are the same role.
    /// Unknown names fall back to [`Role::User`].
    pub fn from_name(name: &str) -> Self {
        let normalized: String = name
            .chars()
            .filter(|c| !matches!(c, ' ' | '_' | '-'))
            .flat_map(char::to_lowercase)
            .collect();
        match normalized.as_str() {
            "superadmin" => Role::SuperAdmin,
            "admin" => Role::Admin,
            "staff" => Role::Staff,
            _ => Role::User,
        }
    }

    pub fn id_prefix(self) -> &'static str {
        match self {
            Role::SuperAdmin => "SA",
            Role::Admin => "A",
            Role::Staff => "S",
            Role::User => "U",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::SuperAdmin => "super_admin",
            Role::Admin => "admin",
            Role::Staff => "staff",
            Role::User => "user",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored password. The scheme is explicit; values are never sniffed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Credential {
    /// PHC-format argon2 hash.
    Argon2(String),
    /// Plaintext carried over from imported rows; upgraded on first login.
    Legacy(String),
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Argon2(_) => f.write_str("Argon2(..)"),
            Credential::Legacy(_) => f.write_str("Legacy(..)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub email: String,
    pub credential: Credential,
    pub created_at: Ms,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn info(&self) -> UserInfo {
        UserInfo {
            id: self.id.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            role: self.role,
            email: self.email.clone(),
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityLog {
    pub id: Ulid,
    pub user_id: String,
    pub action: String,
    pub ip_address: String,
    pub timestamp: Ms,
}

/// Who performed a mutation and from where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: String,
    pub ip_address: String,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, ip_address: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ip_address: ip_address.into(),
        }
    }
}

// ── Facility state ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FacilityState {
    pub code: String,
    pub name: String,
    /// Sorted by `(date, span.start)`.
    pub reservations: Vec<Reservation>,
    /// Sorted by `(date, span.start)`.
    pub manual_events: Vec<ManualEvent>,
    /// Set under the write lock when the facility is removed. A handle taken before
    /// the removal sees it once the lock is granted.
    pub deleted: bool,
}

impl FacilityState {
    pub fn new(code: String, name: String) -> Self {
        Self {
            code,
            name,
            reservations: Vec::new(),
            manual_events: Vec::new(),
            deleted: false,
        }
    }

    pub fn booking_count(&self) -> usize {
        self.reservations.len() + self.manual_events.len()
    }

    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let key = (reservation.date, reservation.span.start);
        let pos = self
            .reservations
            .partition_point(|r| (r.date, r.span.start) <= key);
        self.reservations.insert(pos, reservation);
    }

    pub fn reservation_mut(&mut self, id: &str) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    pub fn insert_manual_event(&mut self, event: ManualEvent) {
        let key = (event.date, event.span.start);
        let pos = self
            .manual_events
            .partition_point(|e| (e.date, e.span.start) <= key);
        self.manual_events.insert(pos, event);
    }

    pub fn remove_manual_event(&mut self, id: Ulid) -> Option<ManualEvent> {
        let pos = self.manual_events.iter().position(|e| e.id == id)?;
        Some(self.manual_events.remove(pos))
    }

    pub fn manual_event(&self, id: Ulid) -> Option<&ManualEvent> {
        self.manual_events.iter().find(|e| e.id == id)
    }

    /// Reservations on `date`, found by binary search over the sorted list.
    pub fn reservations_on(&self, date: NaiveDate) -> &[Reservation] {
        let lo = self.reservations.partition_point(|r| r.date < date);
        let hi = self.reservations.partition_point(|r| r.date <= date);
        &self.reservations[lo..hi]
    }

    pub fn manual_events_on(&self, date: NaiveDate) -> &[ManualEvent] {
        let lo = self.manual_events.partition_point(|e| e.date < date);
        let hi = self.manual_events.partition_point(|e| e.date <= date);
        &self.manual_events[lo..hi]
    }

    /// Reservations with `from <= date <= to`.
    pub fn reservations_between(&self, from: NaiveDate, to: NaiveDate) -> &[Reservation] {
        let lo = self.reservations.partition_point(|r| r.date < from);
        let hi = self.reservations.partition_point(|r| r.date <= to);
        &self.reservations[lo..hi.max(lo)]
    }

    pub fn manual_events_between(&self, from: NaiveDate, to: NaiveDate) -> &[ManualEvent] {
        let lo = self.manual_events.partition_point(|e| e.date < from);
        let hi = self.manual_events.partition_point(|e| e.date <= to);
        &self.manual_events[lo..hi.max(lo)]
    }
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    FacilityCreated {
        code: String,
        name: String,
    },
    FacilityRenamed {
        code: String,
        name: String,
    },
    FacilityDeleted {
        code: String,
    },
    UserCreated(User),
    UserUpdated(User),
    UserDeleted {
        id: String,
    },
    ReservationSubmitted(Reservation),
    ReservationStatusChanged {
        id: String,
        facility: String,
        status: ReservationStatus,
    },
    ManualEventAdded(ManualEvent),
    ManualEventUpdated(ManualEvent),
    ManualEventRemoved {
        id: Ulid,
        facility: String,
    },
    ActivityLogged(ActivityLog),
}

impl Event {
    /// Facility this event is scoped to, if any.
    pub fn facility(&self) -> Option<&str> {
        match self {
            Event::FacilityCreated { code, .. }
            | Event::FacilityRenamed { code, .. }
            | Event::FacilityDeleted { code } => Some(code),
            Event::ReservationSubmitted(r) => Some(&r.facility),
            Event::ReservationStatusChanged { facility, .. }
            | Event::ManualEventRemoved { facility, .. } => Some(facility),
            Event::ManualEventAdded(e) | Event::ManualEventUpdated(e) => Some(&e.facility),
            Event::UserCreated(_)
            | Event::UserUpdated(_)
            | Event::UserDeleted { .. }
            | Event::ActivityLogged(_) => None,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacilityInfo {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserInfo {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub email: String,
    pub created_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserPage {
    pub users: Vec<UserInfo>,
    /// Matching rows before pagination.
    pub total: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserFilter {
    pub role: Option<Role>,
    pub search: Option<String>,
    pub limit: Option<usize>,
    pub offset: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationFilter {
    pub id: Option<String>,
    pub facility: Option<String>,
    pub date: Option<NaiveDate>,
    pub status: Option<ReservationStatus>,
    pub requester: Option<String>,
}

/// Session identity returned by a successful credential check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub user_name: String,
    pub role: Role,
}
