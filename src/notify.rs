use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Channels a client may `LISTEN` on. Per-facility channels are `facility_<code>`.
pub const TOPICS: &[&str] = &[
    "calendar",
    "reservations",
    "manual_events",
    "users",
    "facilities",
    "activity_logs",
];

/// One message for one channel; `payload` is JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub channel: String,
    pub payload: String,
}

/// `facility_ph_001` for `PH-001`: a plain lowercase identifier that `LISTEN` accepts unquoted.
pub fn facility_channel(code: &str) -> String {
    let ident: String = code
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    format!("facility_{ident}")
}

/// Normalize a `LISTEN` target. `None` for names nothing is ever published on.
pub fn normalize_channel(name: &str) -> Option<String> {
    let name = name.trim().trim_matches('"').to_ascii_lowercase();
    if TOPICS.contains(&name.as_str()) {
        return Some(name);
    }
    name.strip_prefix("facility_")
        .filter(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
        .map(|_| name.clone())
}

/// Channels an event is published on.
pub fn channels_for(event: &Event) -> Vec<String> {
    let table = match event {
        Event::FacilityCreated { .. } | Event::FacilityRenamed { .. } | Event::FacilityDeleted { .. } => {
            "facilities"
        }
        Event::UserCreated(_) | Event::UserUpdated(_) | Event::UserDeleted { .. } => "users",
        Event::ReservationSubmitted(_) | Event::ReservationStatusChanged { .. } => "reservations",
        Event::ManualEventAdded(_) | Event::ManualEventUpdated(_) | Event::ManualEventRemoved { .. } => {
            "manual_events"
        }
        Event::ActivityLogged(_) => "activity_logs",
    };
    let mut channels = vec![table.to_string()];

    // The calendar shows manual events and approved reservations under facility names.
    let calendar = matches!(
        event,
        Event::ManualEventAdded(_)
            | Event::ManualEventUpdated(_)
            | Event::ManualEventRemoved { .. }
            | Event::ReservationStatusChanged { .. }
            | Event::FacilityRenamed { .. }
    );
    if calendar {
        channels.push("calendar".to_string());
    }
    if let Some(code) = event.facility() {
        channels.push(facility_channel(code));
    }
    channels
}

fn manual_event_payload(op: &str, e: &crate::model::ManualEvent) -> Value {
    json!({
        "op": op,
        "id": e.id.to_string(),
        "facility": e.facility,
        "date": e.date,
        "time_start": e.span.start_time().to_string(),
        "time_end": e.span.end_time().to_string(),
        "title": e.title,
    })
}

/// JSON body of a notification. Credentials never leave the process.
pub fn payload(event: &Event) -> Value {
    match event {
        Event::FacilityCreated { code, name } => json!({"op": "facility_created", "code": code, "name": name}),
        Event::FacilityRenamed { code, name } => json!({"op": "facility_renamed", "code": code, "name": name}),
        Event::FacilityDeleted { code } => json!({"op": "facility_deleted", "code": code}),
        Event::UserCreated(user) => json!({"op": "user_created", "user": user.info()}),
        Event::UserUpdated(user) => json!({"op": "user_updated", "user": user.info()}),
        Event::UserDeleted { id } => json!({"op": "user_deleted", "id": id}),
        Event::ReservationSubmitted(r) => json!({
            "op": "reservation_submitted",
            "id": r.id,
            "facility": r.facility,
            "date": r.date,
            "time_start": r.span.start_time().to_string(),
            "time_end": r.span.end_time().to_string(),
            "title": r.title,
            "requester": r.requester,
            "status": r.status.as_str(),
        }),
        Event::ReservationStatusChanged { id, facility, status } => json!({
            "op": "reservation_status_changed",
            "id": id,
            "facility": facility,
            "status": status.as_str(),
        }),
        Event::ManualEventAdded(e) => manual_event_payload("manual_event_added", e),
        Event::ManualEventUpdated(e) => manual_event_payload("manual_event_updated", e),
        Event::ManualEventRemoved { id, facility } => {
            json!({"op": "manual_event_removed", "id": id.to_string(), "facility": facility})
        }
        Event::ActivityLogged(entry) => json!({
            "op": "activity_logged",
            "user_id": entry.user_id,
            "action": entry.action,
            "timestamp": entry.timestamp,
        }),
    }
}

/// Broadcast hub behind `LISTEN`/`NOTIFY`, one channel per topic.
pub struct NotifyHub {
    channels: DashMap<String, broadcast::Sender<Notification>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Creates the channel on first use.
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<Notification> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Fan an event out to its channels. Channels nobody listens on are skipped.
    pub fn publish(&self, event: &Event) {
        let mut body = None;
        for channel in channels_for(event) {
            let Some(sender) = self.channels.get(&channel) else { continue };
            if sender.receiver_count() == 0 {
                continue;
            }
            let payload = body.get_or_insert_with(|| payload(event).to_string()).clone();
            let _ = sender.send(Notification { channel, payload });
        }
    }

    /// Drop channels whose listeners have all gone away.
    pub fn prune(&self) {
        self.channels.retain(|_, sender| sender.receiver_count() > 0);
    }
}
