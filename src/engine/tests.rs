use super::*;
use crate::limits::*;

use chrono::NaiveDate;
use ulid::Ulid;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("hallbook_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn engine(name: &str) -> Engine {
    Engine::new(test_wal_path(name), Arc::new(NotifyHub::new())).unwrap()
}

fn admin() -> Actor {
    Actor::new("A-001", "10.0.0.1")
}

fn june(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, day).unwrap()
}

fn at(hm: &str) -> Option<WallTime> {
    Some(hm.parse().unwrap())
}

fn new_user(first: &str, role: Role, email: &str) -> NewUser {
    NewUser {
        first_name: first.into(),
        last_name: "Santos".into(),
        role,
        email: email.into(),
        password: "secret".into(),
    }
}

/// Palma Hall plus a requester, imported so no hashing runs.
async fn seed(engine: &Engine) -> String {
    engine
        .import_user(&admin(), "U-001", new_user("Maria", Role::User, "maria@campus.edu"))
        .await
        .unwrap();
    engine.create_facility(&admin(), "Palma Hall").await.unwrap().code
}

fn request(facility: &str, date: NaiveDate, start: &str, end: &str) -> NewReservation {
    NewReservation {
        facility: facility.into(),
        date,
        start: at(start),
        end: at(end),
        title: "Org meeting".into(),
        requester: Some("U-001".into()),
    }
}

fn manual(facility: &str, date: NaiveDate, start: &str, end: &str, title: &str) -> NewManualEvent {
    NewManualEvent {
        facility: facility.into(),
        date,
        start: at(start),
        end: at(end),
        title: title.into(),
    }
}

async fn approve(engine: &Engine, id: &str) -> Reservation {
    engine
        .set_reservation_status(&admin(), id, ReservationStatus::Pending)
        .await
        .unwrap();
    engine
        .set_reservation_status(&admin(), id, ReservationStatus::Approved)
        .await
        .unwrap()
}

// ── Facilities ───────────────────────────────────────────

#[tokio::test]
async fn facility_codes_follow_initials() {
    let engine = engine("facility_codes.wal");
    let palma = engine.create_facility(&admin(), "Palma Hall").await.unwrap();
    let physics = engine.create_facility(&admin(), "Physics Hall").await.unwrap();
    let gym = engine.create_facility(&admin(), "  Gym ").await.unwrap();

    assert_eq!(palma.code, "PH-001");
    assert_eq!(physics.code, "PH-002");
    assert_eq!(gym.code, "G-001");
    assert_eq!(gym.name, "Gym");

    let codes: Vec<_> = engine.list_facilities().await.into_iter().map(|f| f.code).collect();
    assert_eq!(codes, ["G-001", "PH-001", "PH-002"]);
}

#[tokio::test]
async fn facility_names_are_unique_ignoring_case() {
    let engine = engine("facility_unique.wal");
    engine.create_facility(&admin(), "Palma Hall").await.unwrap();
    let err = engine.create_facility(&admin(), "palma hall").await.unwrap_err();
    assert!(matches!(err, EngineError::AlreadyExists(_)));

    let err = engine.create_facility(&admin(), "   ").await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn rename_facility_keeps_code() {
    let engine = engine("facility_rename.wal");
    let code = engine.create_facility(&admin(), "Palma Hall").await.unwrap().code;
    engine.create_facility(&admin(), "Gym").await.unwrap();

    let renamed = engine.rename_facility(&admin(), &code, "Palma Annex").await.unwrap();
    assert_eq!(renamed.code, code);
    assert_eq!(engine.facility_name(&code).await.as_deref(), Some("Palma Annex"));
    assert_eq!(engine.resolve_facility("PALMA ANNEX").await.unwrap(), code);

    let err = engine.rename_facility(&admin(), &code, "GYM").await.unwrap_err();
    assert!(matches!(err, EngineError::AlreadyExists(_)));
    // Renaming to its own name in another case is allowed.
    engine.rename_facility(&admin(), &code, "palma annex").await.unwrap();

    let err = engine.rename_facility(&admin(), "X-001", "Nowhere").await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn delete_facility_refused_while_booked() {
    let engine = engine("facility_delete.wal");
    let code = seed(&engine).await;
    let gym = engine.create_facility(&admin(), "Gym").await.unwrap().code;
    engine.submit_reservation(&admin(), request(&code, june(2), "09:00", "10:00")).await.unwrap();

    let err = engine.delete_facility(&admin(), &code).await.unwrap_err();
    assert!(matches!(err, EngineError::HasBookings(_)));

    engine.delete_facility(&admin(), &gym).await.unwrap();
    assert!(engine.get_facility(&gym).is_none());
    let err = engine.delete_facility(&admin(), &gym).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn writers_queued_behind_delete_see_facility_gone() {
    let path = test_wal_path("facility_delete_race.wal");
    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(path.clone(), notify.clone()).unwrap());
    let code = seed(&engine).await;

    let held = engine.get_facility(&code).unwrap().write_owned().await;
    let delete = tokio::spawn({
        let (engine, code) = (engine.clone(), code.clone());
        async move { engine.delete_facility(&admin(), &code).await }
    });
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let submit = tokio::spawn({
        let (engine, code) = (engine.clone(), code.clone());
        async move { engine.submit_reservation(&admin(), request(&code, june(2), "09:00", "10:00")).await }
    });
    let compact = tokio::spawn({
        let engine = engine.clone();
        async move { engine.compact_wal().await }
    });
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    drop(held);

    delete.await.unwrap().unwrap();
    let err = submit.await.unwrap().unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
    compact.await.unwrap().unwrap();
    assert!(engine.list_facilities().await.is_empty());
    assert!(engine.list_reservations(&ReservationFilter::default()).await.unwrap().is_empty());

    // The compacted log must not bring the facility back.
    drop(engine);
    let reopened = Engine::new(path, notify).unwrap();
    assert!(reopened.list_facilities().await.is_empty());
}

// ── Reservations ─────────────────────────────────────────

#[tokio::test]
async fn submission_starts_as_request() {
    let engine = engine("submit_request.wal");
    let code = seed(&engine).await;

    // Facility name, any case.
    let r = engine
        .submit_reservation(&admin(), request("palma hall", june(2), "09:00", "10:30"))
        .await
        .unwrap();
    assert_eq!(r.id, "R-001");
    assert_eq!(r.facility, code);
    assert_eq!(r.status, ReservationStatus::Request);
    assert_eq!(r.requester, "U-001");
    assert_eq!(r.span.start_time().to_string(), "09:00");
    assert_eq!(r.span.end_time().to_string(), "10:30");

    let second = engine
        .submit_reservation(&admin(), request(&code, june(3), "09:00", "10:30"))
        .await
        .unwrap();
    assert_eq!(second.id, "R-002");
    assert_eq!(engine.facility_for_booking("R-002").as_deref(), Some(code.as_str()));
}

#[tokio::test]
async fn requester_defaults_to_actor() {
    let engine = engine("submit_actor.wal");
    let code = seed(&engine).await;
    let actor = Actor::new("U-001", "10.0.0.7");
    let r = engine
        .submit_reservation(&actor, NewReservation { requester: None, ..request(&code, june(2), "09:00", "10:00") })
        .await
        .unwrap();
    assert_eq!(r.requester, "U-001");
}

#[tokio::test]
async fn submission_needs_known_requester() {
    let engine = engine("submit_unknown_user.wal");
    let code = seed(&engine).await;
    let err = engine
        .submit_reservation(
            &admin(),
            NewReservation { requester: Some("U-999".into()), ..request(&code, june(2), "09:00", "10:00") },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(id) if id == "U-999"));
}

#[tokio::test]
async fn submission_rejects_bad_input() {
    let engine = engine("submit_invalid.wal");
    let code = seed(&engine).await;

    let missing_start = NewReservation { start: None, ..request(&code, june(2), "09:00", "10:00") };
    let inverted = request(&code, june(2), "10:00", "09:00");
    let zero_length = request(&code, june(2), "09:00", "09:00");
    let blank_title = NewReservation { title: "  ".into(), ..request(&code, june(2), "09:00", "10:00") };
    for req in [missing_start, inverted, zero_length, blank_title] {
        let err = engine.submit_reservation(&admin(), req).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)), "{err:?}");
    }

    let long_title = NewReservation {
        title: "x".repeat(MAX_TITLE_LEN + 1),
        ..request(&code, june(2), "09:00", "10:00")
    };
    let err = engine.submit_reservation(&admin(), long_title).await.unwrap_err();
    assert!(matches!(err, EngineError::LimitExceeded(_)));

    let err = engine
        .submit_reservation(&admin(), request("Library", june(2), "09:00", "10:00"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
    assert!(engine.list_reservations(&ReservationFilter::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn overlap_conflicts_but_back_to_back_does_not() {
    let engine = engine("submit_overlap.wal");
    let code = seed(&engine).await;
    engine.submit_reservation(&admin(), request(&code, june(2), "09:00", "10:00")).await.unwrap();

    let err = engine
        .submit_reservation(&admin(), request(&code, june(2), "09:30", "10:30"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict { with } if with == "R-001"));

    engine.submit_reservation(&admin(), request(&code, june(2), "10:00", "11:00")).await.unwrap();
    engine.submit_reservation(&admin(), request(&code, june(3), "09:30", "10:30")).await.unwrap();
}

#[tokio::test]
async fn other_facility_same_slot_is_free() {
    let engine = engine("submit_other_facility.wal");
    let code = seed(&engine).await;
    let gym = engine.create_facility(&admin(), "Gym").await.unwrap().code;
    engine.submit_reservation(&admin(), request(&code, june(2), "09:00", "10:00")).await.unwrap();
    engine.submit_reservation(&admin(), request(&gym, june(2), "09:00", "10:00")).await.unwrap();
}

#[tokio::test]
async fn rejected_reservation_frees_its_slot() {
    let engine = engine("submit_after_reject.wal");
    let code = seed(&engine).await;
    engine.submit_reservation(&admin(), request(&code, june(2), "09:00", "10:00")).await.unwrap();
    engine
        .set_reservation_status(&admin(), "R-001", ReservationStatus::Pending)
        .await
        .unwrap();
    engine
        .set_reservation_status(&admin(), "R-001", ReservationStatus::Rejected)
        .await
        .unwrap();

    let r = engine
        .submit_reservation(&admin(), request(&code, june(2), "09:30", "10:30"))
        .await
        .unwrap();
    assert_eq!(r.id, "R-002");
}

#[tokio::test]
async fn manual_event_blocks_submission() {
    let engine = engine("submit_vs_manual.wal");
    let code = seed(&engine).await;
    let event = engine
        .add_manual_event(&admin(), manual(&code, june(2), "09:00", "10:00", "Faculty meeting"))
        .await
        .unwrap();

    let err = engine
        .submit_reservation(&admin(), request(&code, june(2), "09:30", "10:30"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict { with } if with == event.id.to_string()));
}

#[tokio::test]
async fn status_follows_workflow() {
    let engine = engine("status_workflow.wal");
    let code = seed(&engine).await;
    engine.submit_reservation(&admin(), request(&code, june(2), "09:00", "10:00")).await.unwrap();

    let err = engine
        .set_reservation_status(&admin(), "R-001", ReservationStatus::Approved)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidTransition { from: ReservationStatus::Request, to: ReservationStatus::Approved }
    ));

    let pending = engine
        .set_reservation_status(&admin(), "R-001", ReservationStatus::Pending)
        .await
        .unwrap();
    assert_eq!(pending.status, ReservationStatus::Pending);

    let err = engine
        .set_reservation_status(&admin(), "R-001", ReservationStatus::Pending)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));

    let approved = engine
        .set_reservation_status(&admin(), "R-001", ReservationStatus::Approved)
        .await
        .unwrap();
    assert_eq!(approved.status, ReservationStatus::Approved);

    // Terminal.
    for next in [ReservationStatus::Rejected, ReservationStatus::Request, ReservationStatus::Pending] {
        let err = engine.set_reservation_status(&admin(), "R-001", next).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
    }

    let err = engine
        .set_reservation_status(&admin(), "R-404", ReservationStatus::Pending)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn approval_rechecks_confirmed_bookings() {
    let engine = engine("approve_recheck.wal");
    let code = seed(&engine).await;
    engine.submit_reservation(&admin(), request(&code, june(2), "09:00", "10:00")).await.unwrap();
    engine
        .set_reservation_status(&admin(), "R-001", ReservationStatus::Pending)
        .await
        .unwrap();

    // Manual events only check confirmed bookings, so staff can overlap a pending request.
    let event = engine
        .add_manual_event(&admin(), manual(&code, june(2), "09:30", "10:30", "Board exam"))
        .await
        .unwrap();

    let err = engine
        .set_reservation_status(&admin(), "R-001", ReservationStatus::Approved)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict { with } if with == event.id.to_string()));

    // Still pending; rejection needs no check.
    let rejected = engine
        .set_reservation_status(&admin(), "R-001", ReservationStatus::Rejected)
        .await
        .unwrap();
    assert_eq!(rejected.status, ReservationStatus::Rejected);
}

#[tokio::test]
async fn list_reservations_filters() {
    let engine = engine("list_reservations.wal");
    let code = seed(&engine).await;
    let gym = engine.create_facility(&admin(), "Gym").await.unwrap().code;
    engine.submit_reservation(&admin(), request(&code, june(3), "09:00", "10:00")).await.unwrap();
    engine.submit_reservation(&admin(), request(&gym, june(2), "13:00", "14:00")).await.unwrap();
    engine.submit_reservation(&admin(), request(&code, june(2), "08:00", "09:00")).await.unwrap();
    approve(&engine, "R-002").await;

    let all = engine.list_reservations(&ReservationFilter::default()).await.unwrap();
    let ids: Vec<_> = all.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, ["R-003", "R-002", "R-001"]);

    let palma = ReservationFilter { facility: Some("Palma Hall".into()), ..Default::default() };
    assert_eq!(engine.list_reservations(&palma).await.unwrap().len(), 2);

    let approved = ReservationFilter { status: Some(ReservationStatus::Approved), ..Default::default() };
    let approved = engine.list_reservations(&approved).await.unwrap();
    assert_eq!(approved.len(), 1);
    assert_eq!(approved[0].id, "R-002");

    let on_day = ReservationFilter { date: Some(june(2)), ..Default::default() };
    assert_eq!(engine.list_reservations(&on_day).await.unwrap().len(), 2);

    let by_id = ReservationFilter { id: Some("R-001".into()), ..Default::default() };
    assert_eq!(engine.list_reservations(&by_id).await.unwrap()[0].date, june(3));

    let missing = ReservationFilter { id: Some("R-404".into()), ..Default::default() };
    assert!(engine.list_reservations(&missing).await.unwrap().is_empty());
}

// ── Manual events ────────────────────────────────────────

#[tokio::test]
async fn manual_batch_is_all_or_nothing() {
    let engine = engine("manual_batch_atomic.wal");
    let code = seed(&engine).await;
    engine.submit_reservation(&admin(), request(&code, june(2), "13:00", "14:00")).await.unwrap();
    approve(&engine, "R-001").await;

    let batch = vec![
        manual(&code, june(2), "08:00", "09:00", "Mass"),
        manual(&code, june(2), "13:30", "14:30", "Seminar"),
    ];
    let err = engine.add_manual_events(&admin(), batch).await.unwrap_err();
    assert!(matches!(err, EngineError::Conflict { with } if with == "R-001"));
    assert!(engine.list_manual_events(None, None).await.unwrap().is_empty());

    // Rows in the same batch must not overlap each other either.
    let batch = vec![
        manual(&code, june(4), "08:00", "09:00", "Mass"),
        manual(&code, june(4), "08:30", "09:30", "Choir"),
    ];
    let err = engine.add_manual_events(&admin(), batch).await.unwrap_err();
    assert!(matches!(err, EngineError::Conflict { .. }));
    assert!(engine.list_manual_events(None, None).await.unwrap().is_empty());

    // One bad row fails the batch before any conflict check.
    let batch = vec![
        manual(&code, june(4), "08:00", "09:00", "Mass"),
        manual("Library", june(4), "08:00", "09:00", "Reading"),
    ];
    let err = engine.add_manual_events(&admin(), batch).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
    assert!(engine.list_manual_events(None, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn manual_batch_spans_facilities() {
    let engine = engine("manual_batch_multi.wal");
    let code = seed(&engine).await;
    let gym = engine.create_facility(&admin(), "Gym").await.unwrap().code;

    let added = engine
        .add_manual_events(
            &admin(),
            vec![
                manual(&gym, june(2), "08:00", "09:00", "PE class"),
                manual(&code, june(2), "08:00", "09:00", "Mass"),
                manual(&code, june(2), "09:00", "10:00", "Choir"),
            ],
        )
        .await
        .unwrap();
    assert_eq!(added.len(), 3);
    assert!(added.iter().all(|e| e.created_by == "A-001"));

    assert_eq!(engine.list_manual_events(Some("gym"), None).await.unwrap().len(), 1);
    assert_eq!(engine.list_manual_events(Some(&code), Some(june(2))).await.unwrap().len(), 2);
    assert!(engine.list_manual_events(Some(&code), Some(june(3))).await.unwrap().is_empty());

    let logs = engine.activity_logs(Some("A-001"), Some(1), 0).await.unwrap();
    assert_eq!(logs[0].action, "added 3 events");

    assert!(engine.add_manual_events(&admin(), Vec::new()).await.unwrap().is_empty());
}

#[tokio::test]
async fn manual_batch_size_limit() {
    let engine = engine("manual_batch_limit.wal");
    let code = seed(&engine).await;
    let batch = (0..=MAX_BATCH_SIZE)
        .map(|i| manual(&code, june(1) + chrono::Days::new(i as u64), "08:00", "09:00", "Mass"))
        .collect();
    let err = engine.add_manual_events(&admin(), batch).await.unwrap_err();
    assert!(matches!(err, EngineError::LimitExceeded(_)));
}

#[tokio::test]
async fn manual_event_ignores_unapproved_requests() {
    let engine = engine("manual_vs_pending.wal");
    let code = seed(&engine).await;
    engine.submit_reservation(&admin(), request(&code, june(2), "09:00", "10:00")).await.unwrap();
    engine
        .set_reservation_status(&admin(), "R-001", ReservationStatus::Pending)
        .await
        .unwrap();

    engine
        .add_manual_event(&admin(), manual(&code, june(2), "09:00", "10:00", "Board exam"))
        .await
        .unwrap();
}

#[tokio::test]
async fn update_manual_event_moves_and_rechecks() {
    let engine = engine("manual_update.wal");
    let code = seed(&engine).await;
    let mass = engine
        .add_manual_event(&admin(), manual(&code, june(2), "08:00", "09:00", "Mass"))
        .await
        .unwrap();
    let choir = engine
        .add_manual_event(&admin(), manual(&code, june(2), "10:00", "11:00", "Choir"))
        .await
        .unwrap();

    // Stretching over its own slot is fine.
    let longer = engine
        .update_manual_event(&admin(), mass.id, ManualEventUpdate { end: at("09:30"), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(longer.span.end_time().to_string(), "09:30");
    assert_eq!(longer.span.start_time().to_string(), "08:00");
    assert_eq!(longer.id, mass.id);

    let err = engine
        .update_manual_event(&admin(), mass.id, ManualEventUpdate { end: at("10:30"), ..Default::default() })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict { with } if with == choir.id.to_string()));

    let moved = engine
        .update_manual_event(
            &admin(),
            mass.id,
            ManualEventUpdate {
                date: Some(june(3)),
                title: Some("Sunday Mass".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(moved.date, june(3));
    assert_eq!(moved.title, "Sunday Mass");
    assert_eq!(moved.facility, code);
    assert_eq!(engine.list_manual_events(None, Some(june(2))).await.unwrap().len(), 1);
    assert_eq!(engine.list_manual_events(None, Some(june(3))).await.unwrap()[0].id, mass.id);

    let err = engine
        .update_manual_event(&admin(), mass.id, ManualEventUpdate { start: at("12:00"), ..Default::default() })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let err = engine
        .update_manual_event(&admin(), Ulid::new(), ManualEventUpdate::default())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn duplicate_manual_event_to_another_day() {
    let engine = engine("manual_duplicate.wal");
    let code = seed(&engine).await;
    let mass = engine
        .add_manual_event(&admin(), manual(&code, june(2), "08:00", "09:00", "Mass"))
        .await
        .unwrap();

    let copy = engine.duplicate_manual_event(&admin(), mass.id, june(9)).await.unwrap();
    assert_ne!(copy.id, mass.id);
    assert_eq!(copy.date, june(9));
    assert_eq!(copy.title, "Mass");
    assert_eq!(copy.span, mass.span);
    assert_eq!(engine.facility_for_booking(&copy.id.to_string()).as_deref(), Some(code.as_str()));

    // Same day collides with the source.
    let err = engine.duplicate_manual_event(&admin(), mass.id, june(2)).await.unwrap_err();
    assert!(matches!(err, EngineError::Conflict { with } if with == mass.id.to_string()));

    let err = engine.duplicate_manual_event(&admin(), Ulid::new(), june(2)).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn remove_manual_event_frees_slot() {
    let engine = engine("manual_remove.wal");
    let code = seed(&engine).await;
    let mass = engine
        .add_manual_event(&admin(), manual(&code, june(2), "08:00", "09:00", "Mass"))
        .await
        .unwrap();

    let removed = engine.remove_manual_event(&admin(), mass.id).await.unwrap();
    assert_eq!(removed.id, mass.id);
    assert!(engine.facility_for_booking(&mass.id.to_string()).is_none());
    assert!(engine.list_manual_events(None, None).await.unwrap().is_empty());

    let err = engine.remove_manual_event(&admin(), mass.id).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));

    engine.submit_reservation(&admin(), request(&code, june(2), "08:00", "09:00")).await.unwrap();
    // With nothing left on it the facility could go, but the new request holds it.
    assert!(matches!(
        engine.delete_facility(&admin(), &code).await.unwrap_err(),
        EngineError::HasBookings(_)
    ));
}

// ── Calendar and conflicts ───────────────────────────────

#[tokio::test]
async fn calendar_shows_manual_and_approved_only() {
    let engine = engine("calendar_merge.wal");
    let code = seed(&engine).await;
    let gym = engine.create_facility(&admin(), "Gym").await.unwrap().code;

    engine
        .add_manual_event(&admin(), manual(&code, june(2), "13:00", "14:00", "Mass"))
        .await
        .unwrap();
    engine.submit_reservation(&admin(), request(&code, june(2), "09:00", "10:00")).await.unwrap();
    engine.submit_reservation(&admin(), request(&code, june(3), "09:00", "10:00")).await.unwrap();
    engine.submit_reservation(&admin(), request(&gym, june(2), "07:00", "08:00")).await.unwrap();
    approve(&engine, "R-001").await;
    approve(&engine, "R-003").await;

    let days = engine.calendar(june(1), june(30), None).await.unwrap();
    assert_eq!(days.len(), 1);
    let day = &days[&june(2)];
    let sources: Vec<_> = day.iter().map(|e| e.source.id()).collect();
    assert_eq!(sources[..2], ["R-003".to_string(), "R-001".to_string()]);
    assert_eq!(day[2].source.kind(), "manual");
    assert_eq!(day[2].title, "Mass");

    let palma = engine.calendar(june(2), june(2), Some("Palma Hall")).await.unwrap();
    assert_eq!(palma[&june(2)].len(), 2);
    assert!(palma[&june(2)].iter().all(|e| e.facility == code));

    assert!(engine.calendar(june(3), june(30), None).await.unwrap().is_empty());
}

#[tokio::test]
async fn calendar_window_is_bounded() {
    let engine = engine("calendar_window.wal");
    seed(&engine).await;

    let err = engine.calendar(june(5), june(4), None).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let far = june(1) + chrono::Days::new(MAX_CALENDAR_WINDOW_DAYS as u64);
    let err = engine.calendar(june(1), far, None).await.unwrap_err();
    assert!(matches!(err, EngineError::LimitExceeded(_)));

    let err = engine.calendar(june(1), june(2), Some("Library")).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn conflicts_lists_every_blocker() {
    let engine = engine("conflicts_query.wal");
    let code = seed(&engine).await;
    engine.submit_reservation(&admin(), request(&code, june(2), "09:00", "10:00")).await.unwrap();
    engine.submit_reservation(&admin(), request(&code, june(2), "11:00", "12:00")).await.unwrap();
    engine
        .set_reservation_status(&admin(), "R-002", ReservationStatus::Pending)
        .await
        .unwrap();
    engine
        .set_reservation_status(&admin(), "R-002", ReservationStatus::Rejected)
        .await
        .unwrap();
    engine
        .add_manual_event(&admin(), manual(&code, june(2), "10:30", "11:00", "Mass"))
        .await
        .unwrap();

    let hits = engine.conflicts(&code, june(2), at("09:30"), at("11:30")).await.unwrap();
    let kinds: Vec<_> = hits.iter().map(|e| e.source.kind()).collect();
    assert_eq!(kinds, ["reservation", "manual"]);
    assert_eq!(hits[0].source.id(), "R-001");

    assert!(engine.conflicts(&code, june(2), at("10:00"), at("10:30")).await.unwrap().is_empty());
    assert!(engine.conflicts(&code, june(3), at("09:00"), at("12:00")).await.unwrap().is_empty());

    let err = engine.conflicts(&code, june(2), None, at("10:00")).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

// ── Users ────────────────────────────────────────────────

#[tokio::test]
async fn user_ids_follow_role_prefix() {
    let engine = engine("user_ids.wal");
    let a1 = engine.create_user(&admin(), new_user("Ana", Role::Admin, "ana@campus.edu")).await.unwrap();
    let a2 = engine.create_user(&admin(), new_user("Ben", Role::Admin, "ben@campus.edu")).await.unwrap();
    let u1 = engine.create_user(&admin(), new_user("Cy", Role::User, "cy@campus.edu")).await.unwrap();
    let sa = engine
        .create_user(&admin(), new_user("Dee", Role::SuperAdmin, "dee@campus.edu"))
        .await
        .unwrap();

    assert_eq!(a1.id, "A-001");
    assert_eq!(a2.id, "A-002");
    assert_eq!(u1.id, "U-001");
    assert_eq!(sa.id, "SA-001");
    assert_eq!(engine.get_user("A-002").await.unwrap().email, "ben@campus.edu");
}

#[tokio::test]
async fn user_email_unique_and_valid() {
    let engine = engine("user_email.wal");
    engine.create_user(&admin(), new_user("Ana", Role::Staff, "ana@campus.edu")).await.unwrap();

    let err = engine
        .create_user(&admin(), new_user("Ana", Role::Staff, "ANA@campus.edu"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::AlreadyExists(_)));

    let err = engine
        .create_user(&admin(), new_user("Bo", Role::Staff, "not-an-email"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let err = engine.create_user(&admin(), new_user(" ", Role::Staff, "bo@campus.edu")).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let no_password = NewUser { password: String::new(), ..new_user("Bo", Role::Staff, "bo@campus.edu") };
    let err = engine.create_user(&admin(), no_password).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn update_user_changes_fields_but_not_id() {
    let engine = engine("user_update.wal");
    engine.create_user(&admin(), new_user("Ana", Role::Staff, "ana@campus.edu")).await.unwrap();
    engine.create_user(&admin(), new_user("Ben", Role::Staff, "ben@campus.edu")).await.unwrap();

    let updated = engine
        .update_user(
            &admin(),
            "S-001",
            UserUpdate { role: Some(Role::Admin), last_name: Some("Reyes".into()), ..Default::default() },
        )
        .await
        .unwrap();
    assert_eq!(updated.id, "S-001");
    assert_eq!(updated.role, Role::Admin);
    assert_eq!(updated.last_name, "Reyes");
    assert_eq!(updated.first_name, "Ana");

    let err = engine
        .update_user(&admin(), "S-001", UserUpdate { email: Some("ben@campus.edu".into()), ..Default::default() })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::AlreadyExists(_)));

    engine
        .update_user(&admin(), "S-001", UserUpdate { password: Some("changed".into()), ..Default::default() })
        .await
        .unwrap();
    assert!(engine.authenticate("ana@campus.edu", "changed", "10.0.0.2").await.is_ok());
    assert!(matches!(
        engine.authenticate("ana@campus.edu", "secret", "10.0.0.2").await.unwrap_err(),
        EngineError::Authentication
    ));

    let err = engine.update_user(&admin(), "S-404", UserUpdate::default()).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn delete_user_guards() {
    let engine = engine("user_delete.wal");
    let code = seed(&engine).await;
    engine.submit_reservation(&admin(), request(&code, june(2), "09:00", "10:00")).await.unwrap();

    let me = Actor::new("U-001", "10.0.0.3");
    let err = engine.delete_user(&me, "U-001").await.unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));

    let err = engine.delete_user(&admin(), "U-001").await.unwrap_err();
    assert!(matches!(err, EngineError::HasBookings(_)));

    engine
        .set_reservation_status(&admin(), "R-001", ReservationStatus::Pending)
        .await
        .unwrap();
    engine
        .set_reservation_status(&admin(), "R-001", ReservationStatus::Rejected)
        .await
        .unwrap();
    engine.delete_user(&admin(), "U-001").await.unwrap();
    assert!(engine.get_user("U-001").await.is_none());

    let err = engine.delete_user(&admin(), "U-001").await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn list_users_filters_and_pages() {
    let engine = engine("user_list.wal");
    for (i, name) in ["Ana", "Ben", "Carla", "Dan"].iter().enumerate() {
        let email = format!("{}@campus.edu", name.to_lowercase());
        let role = if i % 2 == 0 { Role::Staff } else { Role::User };
        engine
            .import_user(&admin(), &format!("{}-00{}", role.id_prefix(), i + 1), new_user(name, role, &email))
            .await
            .unwrap();
    }

    let all = engine.list_users(&UserFilter::default()).await.unwrap();
    assert_eq!(all.total, 4);
    assert_eq!(all.users.len(), 4);

    let staff = engine
        .list_users(&UserFilter { role: Some(Role::Staff), ..Default::default() })
        .await
        .unwrap();
    let names: Vec<_> = staff.users.iter().map(|u| u.first_name.as_str()).collect();
    assert_eq!(names, ["Ana", "Carla"]);

    let search = engine
        .list_users(&UserFilter { search: Some("CAR".into()), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(search.total, 1);
    assert_eq!(search.users[0].first_name, "Carla");

    let page = engine
        .list_users(&UserFilter { limit: Some(1), offset: 1, ..Default::default() })
        .await
        .unwrap();
    assert_eq!(page.total, 4);
    assert_eq!(page.users.len(), 1);

    let err = engine
        .list_users(&UserFilter { limit: Some(MAX_PAGE_SIZE + 1), ..Default::default() })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::LimitExceeded(_)));
}

#[tokio::test]
async fn authenticate_checks_password() {
    let engine = engine("auth_argon.wal");
    engine.create_user(&admin(), new_user("Ana", Role::Admin, "ana@campus.edu")).await.unwrap();

    let session = engine.authenticate(" ANA@campus.edu ", "secret", "192.168.1.5").await.unwrap();
    assert_eq!(session.user_id, "A-001");
    assert_eq!(session.user_name, "Ana Santos");
    assert_eq!(session.role, Role::Admin);

    let logs = engine.activity_logs(Some("A-001"), Some(1), 0).await.unwrap();
    assert_eq!(logs[0].action, "signed in");
    assert_eq!(logs[0].ip_address, "192.168.1.5");

    for (email, password) in [("ana@campus.edu", "wrong"), ("nobody@campus.edu", "secret")] {
        let err = engine.authenticate(email, password, "192.168.1.5").await.unwrap_err();
        assert!(matches!(err, EngineError::Authentication));
    }
}

#[tokio::test]
async fn legacy_credential_upgraded_on_login() {
    let path = test_wal_path("auth_legacy.wal");
    let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap();
    engine
        .import_user(&admin(), "U-017", new_user("Lito", Role::User, "lito@campus.edu"))
        .await
        .unwrap();
    assert!(matches!(engine.users.read().await["U-017"].credential, Credential::Legacy(_)));

    let err = engine.import_user(&admin(), "U-017", new_user("Lito", Role::User, "other@campus.edu")).await;
    assert!(matches!(err, Err(EngineError::AlreadyExists(_))));

    assert!(engine.authenticate("lito@campus.edu", "wrong", "10.0.0.4").await.is_err());
    assert!(matches!(engine.users.read().await["U-017"].credential, Credential::Legacy(_)));

    engine.authenticate("lito@campus.edu", "secret", "10.0.0.4").await.unwrap();
    assert!(matches!(engine.users.read().await["U-017"].credential, Credential::Argon2(_)));

    // The upgrade is durable and the password still works.
    let reopened = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
    assert!(matches!(reopened.users.read().await["U-017"].credential, Credential::Argon2(_)));
    reopened.authenticate("lito@campus.edu", "secret", "10.0.0.4").await.unwrap();

    // Ids picked up from imports feed the sequence.
    let next = reopened.create_user(&admin(), new_user("Mia", Role::User, "mia@campus.edu")).await.unwrap();
    assert_eq!(next.id, "U-018");
}

// ── Activity log ─────────────────────────────────────────

#[tokio::test]
async fn activity_log_is_newest_first() {
    let engine = engine("activity_order.wal");
    let code = seed(&engine).await;
    engine.submit_reservation(&admin(), request(&code, june(2), "09:00", "10:00")).await.unwrap();
    approve(&engine, "R-001").await;

    let logs = engine.activity_logs(Some("A-001"), None, 0).await.unwrap();
    let actions: Vec<_> = logs.iter().map(|l| l.action.as_str()).collect();
    assert_eq!(
        actions,
        [
            "approved reservation R-001",
            "marked reservation R-001 as pending",
            "submitted reservation R-001",
            "created facility PH-001",
            "imported user U-001",
        ]
    );
    assert!(logs.iter().all(|l| l.ip_address == "10.0.0.1"));
    assert!(logs.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));

    let page = engine.activity_logs(None, Some(2), 1).await.unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].action, "marked reservation R-001 as pending");

    assert!(engine.activity_logs(Some("U-001"), None, 0).await.unwrap().is_empty());
}

// ── Notifications ────────────────────────────────────────

#[tokio::test]
async fn mutations_publish_to_channels() {
    let engine = engine("notify_publish.wal");
    let code = seed(&engine).await;
    let mut reservations = engine.notify.subscribe("reservations");
    let mut facility = engine.notify.subscribe(&crate::notify::facility_channel(&code));

    engine.submit_reservation(&admin(), request(&code, june(2), "09:00", "10:00")).await.unwrap();

    let note = reservations.recv().await.unwrap();
    assert_eq!(note.channel, "reservations");
    let body: serde_json::Value = serde_json::from_str(&note.payload).unwrap();
    assert_eq!(body["op"], "reservation_submitted");
    assert_eq!(body["id"], "R-001");
    assert_eq!(body["time_start"], "09:00");

    let note = facility.recv().await.unwrap();
    assert_eq!(note.channel, "facility_ph_001");
}

#[tokio::test]
async fn failed_mutation_publishes_nothing() {
    let engine = engine("notify_failed.wal");
    let code = seed(&engine).await;
    engine.submit_reservation(&admin(), request(&code, june(2), "09:00", "10:00")).await.unwrap();
    let mut rx = engine.notify.subscribe("reservations");

    assert!(engine.submit_reservation(&admin(), request(&code, june(2), "09:30", "10:30")).await.is_err());
    assert!(rx.try_recv().is_err());
}

// ── WAL replay ───────────────────────────────────────────

#[tokio::test]
async fn replay_restores_everything() {
    let path = test_wal_path("replay_full.wal");
    let notify = Arc::new(NotifyHub::new());
    let (mass_id, copy_id) = {
        let engine = Engine::new(path.clone(), notify.clone()).unwrap();
        let code = seed(&engine).await;
        let gym = engine.create_facility(&admin(), "Gym").await.unwrap().code;
        engine.rename_facility(&admin(), &code, "Palma Annex").await.unwrap();
        engine.create_facility(&admin(), "Library").await.unwrap();
        engine.delete_facility(&admin(), "L-001").await.unwrap();

        engine.submit_reservation(&admin(), request(&code, june(2), "09:00", "10:00")).await.unwrap();
        engine.submit_reservation(&admin(), request(&gym, june(2), "09:00", "10:00")).await.unwrap();
        approve(&engine, "R-001").await;

        let mass = engine
            .add_manual_event(&admin(), manual(&code, june(3), "08:00", "09:00", "Mass"))
            .await
            .unwrap();
        let copy = engine.duplicate_manual_event(&admin(), mass.id, june(4)).await.unwrap();
        engine
            .update_manual_event(&admin(), mass.id, ManualEventUpdate { title: Some("High Mass".into()), ..Default::default() })
            .await
            .unwrap();
        let gone = engine
            .add_manual_event(&admin(), manual(&gym, june(5), "08:00", "09:00", "Drill"))
            .await
            .unwrap();
        engine.remove_manual_event(&admin(), gone.id).await.unwrap();
        engine
            .update_user(&admin(), "U-001", UserUpdate { last_name: Some("Reyes".into()), ..Default::default() })
            .await
            .unwrap();
        (mass.id, copy.id)
    };

    let engine = Engine::new(path, notify).unwrap();
    let facilities = engine.list_facilities().await;
    let names: Vec<_> = facilities.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["Gym", "Palma Annex"]);

    let approved = engine
        .list_reservations(&ReservationFilter { status: Some(ReservationStatus::Approved), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(approved.len(), 1);
    assert_eq!(approved[0].id, "R-001");

    let events = engine.list_manual_events(None, None).await.unwrap();
    let ids: Vec<_> = events.iter().map(|e| e.id).collect();
    assert_eq!(ids, [mass_id, copy_id]);
    assert_eq!(events[0].title, "High Mass");

    assert_eq!(engine.get_user("U-001").await.unwrap().last_name, "Reyes");
    assert_eq!(engine.activity_logs(None, Some(MAX_PAGE_SIZE), 0).await.unwrap().len(), 16);

    // Indexes and sequences are rebuilt too.
    engine
        .set_reservation_status(&admin(), "R-002", ReservationStatus::Pending)
        .await
        .unwrap();
    let next = engine
        .submit_reservation(&admin(), request("Gym", june(6), "09:00", "10:00"))
        .await
        .unwrap();
    assert_eq!(next.id, "R-003");
    assert_eq!(engine.conflicts("PH-001", june(2), at("09:30"), at("09:45")).await.unwrap().len(), 1);
}

#[tokio::test]
async fn writes_after_torn_tail_survive_restart() {
    use std::io::Write;

    let path = test_wal_path("torn_restart.wal");
    let notify = Arc::new(NotifyHub::new());
    {
        let engine = Engine::new(path.clone(), notify.clone()).unwrap();
        engine.create_facility(&admin(), "Palma Hall").await.unwrap();
    }
    {
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(&[40u8, 0, 0]).unwrap();
    }
    {
        let engine = Engine::new(path.clone(), notify.clone()).unwrap();
        engine.create_facility(&admin(), "Gym").await.unwrap();
    }

    let engine = Engine::new(path, notify).unwrap();
    let names: Vec<_> = engine.list_facilities().await.into_iter().map(|f| f.name).collect();
    assert_eq!(names, ["Gym", "Palma Hall"]);
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compact_state.wal");
    let notify = Arc::new(NotifyHub::new());
    let engine = Engine::new(path.clone(), notify.clone()).unwrap();
    let code = seed(&engine).await;
    for day in 2..6 {
        engine.submit_reservation(&admin(), request(&code, june(day), "09:00", "10:00")).await.unwrap();
    }
    approve(&engine, "R-002").await;
    let mass = engine
        .add_manual_event(&admin(), manual(&code, june(2), "13:00", "14:00", "Mass"))
        .await
        .unwrap();
    engine
        .update_manual_event(&admin(), mass.id, ManualEventUpdate { title: Some("High Mass".into()), ..Default::default() })
        .await
        .unwrap();
    assert!(engine.wal_appends_since_compact().await > 0);

    engine.compact_wal().await.unwrap();
    assert_eq!(engine.wal_appends_since_compact().await, 0);

    // Still writable after the swap.
    engine.submit_reservation(&admin(), request(&code, june(9), "09:00", "10:00")).await.unwrap();
    let before = engine.list_reservations(&ReservationFilter::default()).await.unwrap();
    let log_len = engine.activity_logs(None, Some(MAX_PAGE_SIZE), 0).await.unwrap().len();

    let reopened = Engine::new(path, notify).unwrap();
    assert_eq!(reopened.list_reservations(&ReservationFilter::default()).await.unwrap(), before);
    let events = reopened.list_manual_events(None, None).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].title, "High Mass");
    assert_eq!(reopened.activity_logs(None, Some(MAX_PAGE_SIZE), 0).await.unwrap().len(), log_len);
    assert!(matches!(reopened.users.read().await["U-001"].credential, Credential::Legacy(_)));
}

#[tokio::test]
async fn wal_appends_counted_through_channel() {
    let engine = engine("appends_counter.wal");
    assert_eq!(engine.wal_appends_since_compact().await, 0);
    // Facility event plus its activity entry.
    engine.create_facility(&admin(), "Palma Hall").await.unwrap();
    assert_eq!(engine.wal_appends_since_compact().await, 2);
}

// ── Concurrency ──────────────────────────────────────────

#[tokio::test]
async fn concurrent_same_slot_has_one_winner() {
    let path = test_wal_path("race_same_slot.wal");
    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(path.clone(), notify.clone()).unwrap());
    let code = seed(&engine).await;

    let n = 16;
    let mut handles = Vec::new();
    for i in 0..n {
        let eng = engine.clone();
        let code = code.clone();
        // Every request overlaps 09:30-10:00.
        let start = if i % 2 == 0 { "09:00" } else { "09:30" };
        handles.push(tokio::spawn(async move {
            eng.submit_reservation(&admin(), request(&code, june(2), start, "10:30")).await
        }));
    }

    let mut won = 0;
    let mut conflicts = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => won += 1,
            Err(EngineError::Conflict { .. }) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(won, 1);
    assert_eq!(conflicts, n - 1);

    let reopened = Engine::new(path, notify).unwrap();
    assert_eq!(reopened.list_reservations(&ReservationFilter::default()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_submissions_get_distinct_ids() {
    let engine = Arc::new(engine("race_reservation_ids.wal"));
    let code = seed(&engine).await;

    let mut handles = Vec::new();
    for hour in 6..18 {
        let eng = engine.clone();
        let code = code.clone();
        handles.push(tokio::spawn(async move {
            let start = format!("{hour:02}:00");
            let end = format!("{hour:02}:45");
            eng.submit_reservation(&admin(), request(&code, june(2), &start, &end)).await
        }));
    }

    let mut ids = std::collections::BTreeSet::new();
    for h in handles {
        ids.insert(h.await.unwrap().unwrap().id);
    }
    assert_eq!(ids.len(), 12);
    assert!(ids.contains("R-001"));
    assert!(ids.contains("R-012"));
}

#[tokio::test]
async fn concurrent_user_creation_gets_distinct_ids() {
    let path = test_wal_path("race_user_ids.wal");
    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(path.clone(), notify.clone()).unwrap());

    let n = 6;
    let mut handles = Vec::new();
    for i in 0..n {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            eng.create_user(&admin(), new_user("Staff", Role::Staff, &format!("staff{i}@campus.edu")))
                .await
        }));
    }

    let mut ids: Vec<String> = Vec::new();
    for h in handles {
        ids.push(h.await.unwrap().unwrap().id);
    }
    ids.sort();
    let expected: Vec<String> = (1..=n).map(|i| format!("S-{i:03}")).collect();
    assert_eq!(ids, expected);

    let reopened = Engine::new(path, notify).unwrap();
    assert_eq!(reopened.list_users(&UserFilter::default()).await.unwrap().total, n);
}

#[tokio::test]
async fn concurrent_manual_batches_across_facilities() {
    let engine = Arc::new(engine("race_manual_batches.wal"));
    let palma = seed(&engine).await;
    let gym = engine.create_facility(&admin(), "Gym").await.unwrap().code;

    // Each batch touches both facilities, in opposite orders, on its own day.
    let mut handles = Vec::new();
    for day in 2..10 {
        let eng = engine.clone();
        let (first, second) = if day % 2 == 0 { (palma.clone(), gym.clone()) } else { (gym.clone(), palma.clone()) };
        handles.push(tokio::spawn(async move {
            eng.add_manual_events(
                &admin(),
                vec![
                    manual(&first, june(day), "08:00", "09:00", "Mass"),
                    manual(&second, june(day), "08:00", "09:00", "Drill"),
                ],
            )
            .await
        }));
    }
    for h in handles {
        assert_eq!(h.await.unwrap().unwrap().len(), 2);
    }
    assert_eq!(engine.list_manual_events(None, None).await.unwrap().len(), 16);
}
